use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data_store::resource_key::TableKind;

/// Environment variable overriding [`ResourceManagerConfig::data_dir`].
pub const DATA_DIR_ENV: &str = "ITINERARY_DATA_DIR";

/// Where and how the resource manager keeps its table files.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResourceManagerConfig {
    /// Directory holding the marker and one file per table.
    pub data_dir: PathBuf,
    /// Name of the database marker file inside `data_dir`.
    pub marker_file: String,
    /// Extension of the table files, without the dot.
    pub table_extension: String,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            marker_file: "travel.db".to_string(),
            table_extension: "tbl".to_string(),
        }
    }
}

impl ResourceManagerConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Defaults, with `data_dir` taken from `ITINERARY_DATA_DIR` when set.
    pub fn from_env() -> Self {
        match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::with_data_dir(dir),
            _ => Self::default(),
        }
    }

    pub fn marker_path(&self) -> PathBuf {
        self.data_dir.join(&self.marker_file)
    }

    pub fn table_path(&self, kind: TableKind) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}", kind.prefix(), self.table_extension))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
