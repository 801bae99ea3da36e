//! Index configuration.

use crate::record::RecordFormat;
use chunk_data::{
    ChunkGrid,
    DEFAULT_CHUNK_SIZE,
};
use std::{
    path::Path,
    fs::File,
    io::{
        BufReader,
        BufWriter,
    },
    time::Duration,
};
use serde::{Serialize, Deserialize};
use anyhow::*;


pub const SETTINGS_FILE_NAME: &'static str = "marker_index.json";


/// Index settings. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Chunk width and depth in tiles. Must match the host's chunking.
    pub chunk_size: u32,
    /// Seconds between sweeps for stale entries.
    pub sweep_interval_secs: u64,
    /// Key of the chunk metadata slot the record is stored under.
    pub metadata_key: String,
    /// Format records are written in. Both formats are always readable.
    pub record_format: RecordFormat,
    /// Whether mutations are mirrored into chunk metadata at all.
    pub persist_mutations: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        IndexSettings {
            chunk_size: DEFAULT_CHUNK_SIZE,
            sweep_interval_secs: 300,
            metadata_key: "marked_positions".to_owned(),
            record_format: RecordFormat::Legacy,
            persist_mutations: true,
        }
    }
}

impl IndexSettings {
    /// Read from a JSON file, falling back to defaults if that fails for any reason.
    pub fn read(path: impl AsRef<Path>) -> Self {
        Self::try_read(path.as_ref())
            .map_err(|e| warn!(%e, path=%path.as_ref().display(), "using default index settings"))
            .unwrap_or_default()
    }

    pub fn try_read(path: impl AsRef<Path>) -> Result<Self> {
        let settings: Self = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }

    /// Check values a host could plausibly get wrong in a hand-edited file.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.chunk_size > 0, "chunk_size must be positive");
        ensure!(self.chunk_size <= i32::MAX as u32, "chunk_size too large");
        ensure!(self.sweep_interval_secs > 0, "sweep_interval_secs must be positive");
        ensure!(!self.metadata_key.is_empty(), "metadata_key must not be empty");
        Ok(())
    }

    pub fn grid(&self) -> ChunkGrid {
        ChunkGrid::new(self.chunk_size)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        env,
        fs,
        process,
    };

    fn temp_path(name: &str) -> std::path::PathBuf {
        env::temp_dir().join(format!("marker_index_{}_{}", process::id(), name))
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings: IndexSettings = serde_json::from_str(r#"{ "chunk_size": 32 }"#).unwrap();
        assert_eq!(settings.chunk_size, 32);
        assert_eq!(settings.sweep_interval(), Duration::from_secs(300));
        assert_eq!(settings.record_format, RecordFormat::Legacy);
        assert!(settings.persist_mutations);
    }

    #[test]
    fn write_then_read() {
        let path = temp_path(SETTINGS_FILE_NAME);
        let settings = IndexSettings {
            sweep_interval_secs: 60,
            record_format: RecordFormat::Escaped,
            ..Default::default()
        };
        settings.write(&path).unwrap();
        assert_eq!(IndexSettings::try_read(&path).unwrap(), settings);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let path = temp_path("invalid.json");
        fs::write(&path, r#"{ "chunk_size": 0 }"#).unwrap();
        assert!(IndexSettings::try_read(&path).is_err());
        assert_eq!(IndexSettings::read(&path), IndexSettings::default());
        fs::remove_file(&path).unwrap();

        assert_eq!(IndexSettings::read(temp_path("does_not_exist.json")), IndexSettings::default());
    }
}
