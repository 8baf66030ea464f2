//! Configuration schema, file discovery, and environment overrides.
//!
//! Config files: `relaygate.toml`, `relaygate.yaml`, or `relaygate.json`.
//! Searched in `./` then `~/.config/relaygate/`. Supports `${ENV_VAR}`
//! substitution in string values; environment variables listed in
//! `SPEC_FULL.md` §6 always take precedence over the file.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use loader::{config_dir, discover_and_load, find_or_default_config_path, save_config};
pub use schema::RelaygateConfig;
