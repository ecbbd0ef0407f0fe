use std::path::PathBuf;

use serde::Deserialize;

/// On-disk format the scan reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    Parquet,
}

/// Process-wide execution configuration, loaded once at startup and immutable
/// afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecConfig {
    pub format: DataFormat,
    pub data_path: PathBuf,
    /// Trace raw records as the scan reads them.
    #[serde(default)]
    pub show_raw: bool,
}

impl ExecConfig {
    pub fn new(format: DataFormat, data_path: impl Into<PathBuf>) -> Self {
        Self {
            format,
            data_path: data_path.into(),
            show_raw: false,
        }
    }

    /// Path of one table's data file.
    pub fn table_path(&self, table: &str) -> PathBuf {
        let ext = match self.format {
            DataFormat::Csv => "tbl",
            DataFormat::Parquet => "parquet",
        };
        self.data_path.join(format!("{table}.{ext}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_paths_follow_the_format() {
        let cfg = ExecConfig::new(DataFormat::Csv, "/data");
        assert_eq!(cfg.table_path("nation"), PathBuf::from("/data/nation.tbl"));
        let cfg = ExecConfig::new(DataFormat::Parquet, "/data");
        assert_eq!(
            cfg.table_path("lineitem"),
            PathBuf::from("/data/lineitem.parquet")
        );
    }

    #[test]
    fn config_deserializes_from_toml() {
        let cfg: ExecConfig =
            toml::from_str("format = \"csv\"\ndata_path = \"/tpch\"\nshow_raw = true").unwrap();
        assert_eq!(cfg.format, DataFormat::Csv);
        assert!(cfg.show_raw);
    }
}
