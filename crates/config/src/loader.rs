use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::FerryConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["ferry.toml", "ferry.yaml", "ferry.yml", "ferry.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<FerryConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    parse_config(&substitute_env(&raw), path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./ferry.{toml,yaml,yml,json}`
/// 2. `<user config dir>/ferry.{toml,yaml,yml,json}`
///
/// Returns the path that was loaded, if any, alongside the config.
/// A missing or unreadable file yields `FerryConfig::default()`.
pub fn discover_and_load() -> (FerryConfig, Option<PathBuf>) {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return (FerryConfig::default(), None);
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => (cfg, Some(path)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            (FerryConfig::default(), None)
        },
    }
}

/// First existing config file in the standard locations.
#[must_use]
pub fn find_config_file() -> Option<PathBuf> {
    find_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_in(&dir)))
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

/// The user-global config directory.
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "ferry").map(|d| d.config_dir().to_path_buf())
}

/// Serialize `config` to TOML at `path`, creating parent directories.
pub fn save_config(config: &FerryConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))?;
    std::fs::write(path, toml_str)?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

/// Parse raw text according to the file extension. Unknown extensions are
/// read as TOML.
pub fn parse_config(raw: &str, path: &Path) -> anyhow::Result<FerryConfig> {
    Ok(match format_of(path) {
        Format::Toml => toml::from_str(raw)?,
        Format::Yaml => serde_yaml::from_str(raw)?,
        Format::Json => serde_json::from_str(raw)?,
    })
}

/// Parse raw text into a format-neutral tree, for validation.
pub(crate) fn parse_value(raw: &str, format: Format) -> anyhow::Result<serde_json::Value> {
    Ok(match format {
        Format::Toml => serde_json::to_value(toml::from_str::<toml::Value>(raw)?)?,
        Format::Yaml => serde_json::to_value(serde_yaml::from_str::<serde_yaml::Value>(raw)?)?,
        Format::Json => serde_json::from_str(raw)?,
    })
}

/// Supported config file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Yaml,
    Json,
}

/// Format implied by the file extension.
#[must_use]
pub fn format_of(path: &Path) -> Format {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => Format::Yaml,
        Some("json") => Format::Json,
        _ => Format::Toml,
    }
}
