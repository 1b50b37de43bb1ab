use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::ResourceManagerConfig;
use crate::data_store::entity::Row;
use crate::data_store::resource_key::TableKind;
use crate::data_store::snapshot::Table;
use crate::errors::{ItineraryError, Result};
use crate::storage::Storage;

/// [`Storage`] backed by one bincode file per table in a data directory.
///
/// A table is written to a temporary sibling, fsynced, and renamed over the
/// previous file, so a reader only ever sees a complete table file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    config: ResourceManagerConfig,
}

impl FileStorage {
    /// Opens the data directory described by `config`, creating it if needed.
    pub fn open(config: ResourceManagerConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).map_err(|e| {
            ItineraryError::StorageError(format!(
                "could not create data directory {}: {}",
                config.data_dir.display(),
                e
            ))
        })?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ResourceManagerConfig {
        &self.config
    }

    /// Removes the marker and every table file, leaving an uninitialised
    /// database behind.
    pub fn clear(&self) -> Result<()> {
        for kind in TableKind::ALL {
            remove_if_exists(&self.config.table_path(kind))?;
        }
        remove_if_exists(&self.config.marker_path())?;
        info!("Cleared database in {}", self.config.data_dir.display());
        Ok(())
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        path.with_file_name(name)
    }

    fn sync_dir(&self) -> Result<()> {
        // Directory fsync makes the rename durable; not supported everywhere.
        #[cfg(unix)]
        File::open(&self.config.data_dir)?.sync_all()?;
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl Storage for FileStorage {
    fn load_table(&self, kind: TableKind) -> Result<Option<Table>> {
        let path = self.config.table_path(kind);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No table file for {} at {}", kind, path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let rows: BTreeMap<String, Row> =
            bincode::deserialize_from(BufReader::new(file)).map_err(|e| {
                ItineraryError::StorageError(format!(
                    "corrupt table file {}: {}",
                    path.display(),
                    e
                ))
            })?;
        debug!("Loaded {} rows for {} from {}", rows.len(), kind, path.display());
        Ok(Some(rows.into_iter().collect()))
    }

    fn store_table(&self, kind: TableKind, table: &Table) -> Result<()> {
        let path = self.config.table_path(kind);
        let tmp = Self::temp_path(&path);

        // Sorted so identical tables produce identical files.
        let rows: BTreeMap<&String, &Row> = table.iter().collect();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, &rows)?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| ItineraryError::Io(e.into_error()))?
            .sync_all()?;

        fs::rename(&tmp, &path)?;
        self.sync_dir()?;
        debug!("Stored {} rows for {} to {}", rows.len(), kind, path.display());
        Ok(())
    }

    fn marker_exists(&self) -> Result<bool> {
        Ok(self.config.marker_path().try_exists()?)
    }

    fn create_marker(&self) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.config.marker_path())?;
        file.sync_all()?;
        self.sync_dir()?;
        info!(
            "Created database marker {}",
            self.config.marker_path().display()
        );
        Ok(())
    }
}
