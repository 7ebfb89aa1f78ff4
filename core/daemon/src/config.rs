//! Daemon configuration (`~/.slot-status/daemon.toml`).
//!
//! Every field is optional. A missing file means defaults; a malformed file
//! is reported to the caller, which falls back to defaults.
//!
//! ```toml
//! state_path = "/Users/me/.slot-status/slots.json"
//! socket_path = "/Users/me/.slot-status/daemon.sock"
//! compacting_ttl_secs = 300
//! reaper_interval_secs = 15
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

const BASE_DIR_NAME: &str = ".slot-status";
const CONFIG_FILE_NAME: &str = "daemon.toml";
const SOCKET_NAME: &str = "daemon.sock";
const STATE_FILE_NAME: &str = "slots.json";
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 15;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub state_path: Option<PathBuf>,
    pub socket_path: Option<PathBuf>,
    /// Slots stuck in `compacting` longer than this are demoted to `idle`.
    /// Unset disables the policy.
    pub compacting_ttl_secs: Option<u64>,
    pub reaper_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_path: None,
            socket_path: None,
            compacting_ttl_secs: None,
            reaper_interval_secs: DEFAULT_REAPER_INTERVAL_SECS,
        }
    }
}

impl DaemonConfig {
    pub fn state_path(&self, base_dir: &Path) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| base_dir.join(STATE_FILE_NAME))
    }

    pub fn socket_path(&self, base_dir: &Path) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| base_dir.join(SOCKET_NAME))
    }
}

pub fn base_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(BASE_DIR_NAME))
}

pub fn default_config_path(base_dir: &Path) -> PathBuf {
    base_dir.join(CONFIG_FILE_NAME)
}

pub fn load_config(path: &Path) -> Result<DaemonConfig, String> {
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }

    let content = fs_err::read_to_string(path)
        .map_err(|err| format!("Failed to read config {}: {}", path.display(), err))?;
    toml::from_str::<DaemonConfig>(&content)
        .map_err(|err| format!("Failed to parse config {}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(&temp_dir.path().join("missing.toml")).expect("load config");
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.reaper_interval_secs, 15);
        assert_eq!(config.compacting_ttl_secs, None);
    }

    #[test]
    fn load_config_parses_fields() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("daemon.toml");
        fs_err::write(
            &path,
            r#"
state_path = "/tmp/slots.json"
compacting_ttl_secs = 300
"#,
        )
        .expect("write config");

        let config = load_config(&path).expect("load config");
        assert_eq!(config.state_path, Some(PathBuf::from("/tmp/slots.json")));
        assert_eq!(config.compacting_ttl_secs, Some(300));
        assert_eq!(config.reaper_interval_secs, 15);
        assert_eq!(
            config.socket_path(Path::new("/base")),
            PathBuf::from("/base/daemon.sock")
        );
    }

    #[test]
    fn load_config_rejects_unknown_keys() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("daemon.toml");
        fs_err::write(&path, "colour = \"red\"\n").expect("write config");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn paths_default_under_base_dir() {
        let config = DaemonConfig::default();
        let base = Path::new("/home/me/.slot-status");
        assert_eq!(config.state_path(base), base.join("slots.json"));
        assert_eq!(config.socket_path(base), base.join("daemon.sock"));
    }
}
