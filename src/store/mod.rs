//! Tabular store: read-only access to the authoritative dataset

pub mod sqlite;
pub mod value;

pub use sqlite::{RowSet, TabularStore};
pub use value::{Row, Scalar};
