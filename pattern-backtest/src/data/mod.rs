pub mod loader;
pub mod provider;
pub mod synthetic;

pub use loader::{load_csv, load_json, parse_timestamp, read_csv};
pub use provider::{BarProvider, FileBarProvider, InMemoryBarProvider};
pub use synthetic::{bars_from_closes, generate_random_walk, generate_v_shape};

use std::path::Path;

use common::{Bar, EngineError, Result};

/// Dispatch on the file extension (`csv` or `json`, any case)
pub fn load_file(path: &Path) -> Result<Vec<Bar>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => load_csv(path),
        Some(ext) if ext.eq_ignore_ascii_case("json") => load_json(path),
        _ => Err(EngineError::DataLoad(format!(
            "{}: expected a .csv or .json bar file",
            path.display()
        ))),
    }
}
