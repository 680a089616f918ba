//! Shared fixtures for unit tests: a small crop_yield database on disk

use rusqlite::{params, Connection};
use std::path::PathBuf;
use tempfile::TempDir;

pub(crate) const STATES: [&str; 3] = ["Assam", "Odisha", "Punjab"];

/// (crop, season, per-state base production, per-state yearly increment)
const CROPS: [(&str, &str, [f64; 3], [f64; 3]); 2] = [
    ("Rice", "Kharif     ", [4000.0, 6000.0, 10000.0], [100.0, 50.0, 200.0]),
    ("Wheat", "Rabi       ", [100.0, 50.0, 15000.0], [5.0, 2.0, 300.0]),
];

const RAINFALL: [(f64, f64); 3] = [(2500.0, 10.0), (1500.0, 20.0), (600.0, 5.0)];

/// Production of `crop` in `state` for `year` as seeded
pub(crate) fn production(crop: &str, state: &str, year: i64) -> f64 {
    let s = STATES.iter().position(|x| *x == state).expect("known state");
    let (_, _, base, step) = CROPS.iter().find(|c| c.0 == crop).expect("known crop");
    base[s] + step[s] * (year - 2010) as f64
}

/// Writes the fixture database and returns it; years 2010-2018
pub(crate) fn seeded_database() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("crop_yield.db");
    let conn = Connection::open(&path).expect("open fixture db");
    conn.execute_batch(
        r#"CREATE TABLE crop_yield (
            Crop TEXT, Crop_Year INTEGER, Season TEXT, State TEXT,
            Area REAL, Production REAL, Annual_Rainfall REAL,
            Fertilizer REAL, Pesticide REAL, Yield REAL
        );"#,
    )
    .expect("create table");

    for (s, state) in STATES.iter().enumerate() {
        for year in 2010..=2018i64 {
            let offset = (year - 2010) as f64;
            let rainfall = RAINFALL[s].0 + RAINFALL[s].1 * offset;
            for (crop, season, _, _) in CROPS.iter() {
                let prod = production(crop, state, year);
                let area = 1000.0;
                conn.execute(
                    "INSERT INTO crop_yield VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![crop, year, season, state, area, prod, rainfall, area * 100.0, area * 0.5, prod / area],
                )
                .expect("insert row");
            }
        }
    }
    drop(conn);
    (dir, path)
}
