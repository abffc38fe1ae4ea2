use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::ParleyConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["parley.toml", "parley.yaml", "parley.yml", "parley.json"];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, config discovery only looks in
/// this directory (project-local and user-global paths are skipped).
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<ParleyConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./parley.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/parley/parley.{toml,yaml,yml,json}` (user-global)
///
/// Returns `ParleyConfig::default()` if no config file is found or the file
/// fails to parse.
pub fn discover_and_load() -> ParleyConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return ParleyConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            ParleyConfig::default()
        },
    }
}

/// Find the first config file in standard locations.
///
/// When a config dir override is set, only that directory is searched.
pub fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return first_existing(&dir);
    }

    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/parley/
    home_dir()
        .map(|h| h.join(".config").join("parley"))
        .and_then(|dir| first_existing(&dir))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory: override, or `~/.config/parley/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("parley"))
}

/// Returns the data directory: `~/.parley/`.
pub fn data_dir() -> PathBuf {
    home_dir()
        .map(|h| h.join(".parley"))
        .unwrap_or_else(|| PathBuf::from(".parley"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ParleyConfig> {
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
    use {super::*, crate::schema::SecretsBackend};

    #[test]
    fn parses_yaml_and_json() {
        let yaml = parse_config("hub:\n  acknowledge_handshakes: false\n", Path::new("p.yaml"))
            .unwrap();
        assert!(!yaml.hub.acknowledge_handshakes);

        let json = parse_config(r#"{"otp":{"digits":8}}"#, Path::new("p.json")).unwrap();
        assert_eq!(json.otp.digits, 8);
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(parse_config("", Path::new("parley.ini")).is_err());
    }

    // Single test touching the process-wide override so parallel tests don't race.
    #[test]
    fn override_dir_is_searched_exclusively() {
        let dir = tempfile::tempdir().unwrap();
        set_config_dir(dir.path().to_path_buf());
        assert!(find_config_file().is_none());
        assert_eq!(discover_and_load().server.bind, "127.0.0.1");

        std::fs::write(
            dir.path().join("parley.toml"),
            "[secrets]\nbackend = \"none\"\n[server]\nport = 9100\n",
        )
        .unwrap();
        let cfg = discover_and_load();
        assert_eq!(cfg.secrets.backend, SecretsBackend::None);
        assert_eq!(cfg.server.resolved_port(), 9100);
        assert_eq!(config_dir(), Some(dir.path().to_path_buf()));

        std::fs::write(dir.path().join("parley.toml"), "[server\nbroken").unwrap();
        assert_eq!(discover_and_load().server.port, None);

        clear_config_dir();
    }
}
