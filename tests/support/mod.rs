//! Shared fixtures for integration tests
#![allow(dead_code)]

use rusqlite::{params, Connection};
use samarth_qa::config::PipelineConfig;
use samarth_qa::llm::ScriptedModel;
use samarth_qa::pipeline::Pipeline;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const STATES: [&str; 3] = ["Assam", "Odisha", "Punjab"];

/// (crop, per-state base production in 2010, per-state yearly increment)
const CROPS: [(&str, [f64; 3], [f64; 3]); 2] = [
    ("Rice", [4000.0, 6000.0, 10000.0], [100.0, 50.0, 200.0]),
    ("Wheat", [100.0, 50.0, 15000.0], [5.0, 2.0, 300.0]),
];

pub fn production(crop: &str, state: &str, year: i64) -> f64 {
    let s = STATES.iter().position(|x| *x == state).unwrap();
    let (_, base, step) = CROPS.iter().find(|c| c.0 == crop).unwrap();
    base[s] + step[s] * (year - 2010) as f64
}

/// crop_yield table for 2010-2018, three states, two crops
pub fn seeded_database() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crop_yield.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        r#"CREATE TABLE crop_yield (
            Crop TEXT, Crop_Year INTEGER, Season TEXT, State TEXT,
            Area REAL, Production REAL, Annual_Rainfall REAL,
            Fertilizer REAL, Pesticide REAL, Yield REAL
        );"#,
    )
    .unwrap();

    for (s, state) in STATES.iter().enumerate() {
        for year in 2010..=2018i64 {
            let rainfall = [2500.0, 1500.0, 600.0][s] + [10.0, 20.0, 5.0][s] * (year - 2010) as f64;
            for (crop, _, _) in CROPS.iter() {
                let prod = production(crop, state, year);
                conn.execute(
                    "INSERT INTO crop_yield VALUES (?1, ?2, 'Whole Year', ?3, 1000.0, ?4, ?5, 100000.0, 500.0, ?6)",
                    params![crop, year, state, prod, rainfall, prod / 1000.0],
                )
                .unwrap();
            }
        }
    }
    (dir, path)
}

pub fn config_for(path: &PathBuf) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.store.database_path = path.clone();
    config.store.pool_size = 2;
    config
}

/// Pipeline over a fresh fixture database, answering from `model`
pub async fn pipeline_with(
    model: ScriptedModel,
    configure: impl FnOnce(&mut PipelineConfig),
) -> (TempDir, Pipeline, Arc<ScriptedModel>) {
    let (dir, path) = seeded_database();
    let mut config = config_for(&path);
    configure(&mut config);

    let model = Arc::new(model);
    let pipeline = Pipeline::bootstrap(&config, model.clone()).await.unwrap();
    (dir, pipeline, model)
}
