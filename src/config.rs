use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context, Result};
use log::LevelFilter;
use serde::Deserialize;

/// Longest command line the console accepts, terminator excluded.
pub const LINE_BUFFER_LEN: usize = 80;
/// Bytes read per device round trip by `cat`.
pub const CAT_CHUNK_LEN: usize = 512;
pub const PROMPT: &str = "\n$ ";
pub const BANNER: &str = "\nSD FAT console. Type \"h\" (+ Enter) for command list.\n";
pub const DEFAULT_IMAGE: &str = "sdcard.img";

pub const LOG_JSON_PATH_ENV: &str = "SDCONSOLE_LOG_JSON_PATH";

/// Geometry for formatting a fresh image.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FormatConfig {
    pub sectors: u32,
    pub sectors_per_cluster: Option<u8>,
    pub label: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConsoleConfig {
    pub image: PathBuf,
    pub mount_on_start: bool,
    pub echo: bool,
    pub log_level: String,
    pub log_json_path: Option<PathBuf>,
    pub format: Option<FormatConfig>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            image: PathBuf::from(DEFAULT_IMAGE),
            mount_on_start: true,
            echo: false,
            log_level: "warn".to_owned(),
            log_json_path: None,
            format: None,
        }
    }
}

impl ConsoleConfig {
    /// Defaults, or the TOML file at `path` layered over them.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.level_filter()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var(LOG_JSON_PATH_ENV) {
            if !path.trim().is_empty() {
                self.log_json_path = Some(PathBuf::from(path));
            }
        }
    }

    pub fn level_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(self.log_level.trim())
            .map_err(|_| anyhow!("log_level must be one of off/error/warn/info/debug/trace"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = ConsoleConfig::from_toml("").unwrap();
        assert_eq!(config, ConsoleConfig::default());
        assert_eq!(config.level_filter().unwrap(), LevelFilter::Warn);
    }

    #[test]
    fn parses_format_table() {
        let config = ConsoleConfig::from_toml(
            r#"
image = "card.img"
mount_on_start = false
echo = true
log_level = "debug"

[format]
sectors = 8192
label = "notes"
"#,
        )
        .unwrap();
        assert_eq!(config.image, PathBuf::from("card.img"));
        assert!(!config.mount_on_start);
        assert!(config.echo);
        assert_eq!(config.level_filter().unwrap(), LevelFilter::Debug);
        let format = config.format.unwrap();
        assert_eq!(format.sectors, 8192);
        assert_eq!(format.sectors_per_cluster, None);
        assert_eq!(format.label.as_deref(), Some("notes"));
    }

    #[test]
    fn rejects_unknown_keys_and_levels() {
        assert!(ConsoleConfig::from_toml("imagee = \"x\"").is_err());
        assert!(ConsoleConfig::from_toml("log_level = \"loud\"").is_err());
    }
}
