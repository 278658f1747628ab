//! Configuration loading, validation, and env substitution.
//!
//! Config files: `ferry.toml`, `ferry.yaml`, `ferry.yml`, or `ferry.json`,
//! searched in `./` then the user config directory (`~/.config/ferry/` on Linux).
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        Format, config_dir, discover_and_load, find_config_file, format_of, load_config,
        save_config,
    },
    schema::FerryConfig,
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_str},
};
