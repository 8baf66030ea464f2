use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::RelaygateConfig};

const CONFIG_FILENAMES: &[&str] = &["relaygate.toml", "relaygate.yaml", "relaygate.yml", "relaygate.json"];

/// Load config from the given path (any supported format), applying
/// `${ENV_VAR}` substitution first.
pub fn load_config(path: &Path) -> anyhow::Result<RelaygateConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then layer the
/// `SPEC_FULL.md` §6 environment variables on top. Returns
/// `RelaygateConfig::default()` (with env overrides applied) if no config
/// file is found.
pub fn discover_and_load() -> RelaygateConfig {
    let mut config = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                RelaygateConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        RelaygateConfig::default()
    };
    apply_env_overrides(&mut config);
    config
}

/// Apply the environment variables from `SPEC_FULL.md` §6 over `config`,
/// in place. Unset variables leave the existing value untouched.
pub fn apply_env_overrides(config: &mut RelaygateConfig) {
    if let Ok(v) = std::env::var("BUS_URL") {
        config.bus.url = v;
    }
    if let Ok(v) = std::env::var("CACHE_URL") {
        config.cache.url = v;
    }
    if let Ok(v) = std::env::var("JWT_SECRET") {
        config.auth.jwt_secret = v;
    }
    if let Ok(v) = std::env::var("JWT_ALG") {
        config.auth.jwt_alg = v;
    }
    if let Ok(v) = std::env::var("REQUEST_SUBJECT") {
        config.bus.request_subject = v;
    }
    if let Ok(v) = std::env::var("RAW_MEMORY_SUBJECT") {
        config.bus.raw_memory_subject = v;
    }
    if let Some(v) = std::env::var("HOT_MSG_LIMIT").ok().and_then(|s| s.parse().ok()) {
        config.cache.hot_msg_limit = v;
    }
    if let Some(v) = std::env::var("HOT_TTL_MIN").ok().and_then(|s| s.parse().ok()) {
        config.cache.hot_ttl_min = v;
    }
    if let Some(v) = std::env::var("IDLE_CHUNK_TIMEOUT")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        config.timeouts.idle_chunk_timeout_secs = v;
    }
    if let Some(v) = std::env::var("TOTAL_TICKET_TIMEOUT")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        config.timeouts.total_ticket_timeout_secs = v;
    }
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "relaygate") {
        let config_dir = dirs.config_dir();
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/relaygate/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "relaygate").map(|d| d.config_dir().to_path_buf())
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relaygate.toml")
}

/// Serialize `config` to TOML and write it to the user-global config path.
pub fn save_config(config: &RelaygateConfig) -> anyhow::Result<PathBuf> {
    let path = find_or_default_config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))?;
    std::fs::write(&path, toml_str)?;
    debug!(path = %path.display(), "saved config");
    Ok(path)
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RelaygateConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn parse_config_reads_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[server]\nport = 9999").unwrap();
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.server.port, 9999);
    }

    #[test]
    #[allow(unsafe_code)]
    fn apply_env_overrides_prefers_env_over_file() {
        // SAFETY: test runs single-threaded within this process's env.
        unsafe {
            std::env::set_var("HOT_MSG_LIMIT", "5");
        }
        let mut cfg = RelaygateConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.cache.hot_msg_limit, 5);
        unsafe {
            std::env::remove_var("HOT_MSG_LIMIT");
        }
    }
}
