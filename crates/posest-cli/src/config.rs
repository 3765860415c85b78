//! Configuration – reads/writes `~/.posest/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use posest_middleware::RosbridgeTopics;
use posest_types::{OperatingMode, PosestError};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "POSEST_CONFIG";

/// Persisted arbiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Sensor configuration; accepts a name (`"lidar_odom_ekf"`) or the
    /// historical index (`3`).
    #[serde(default, deserialize_with = "deserialize_mode")]
    pub mode: OperatingMode,

    /// Arms the publish scheduler.
    #[serde(default)]
    pub publish: bool,

    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// A feed older than this is stale.
    #[serde(default = "default_freshness_timeout_ms")]
    pub freshness_timeout_ms: u64,

    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,

    /// Cap on the x/y/z position variance of checked odometry (m²).
    #[serde(default = "default_max_position_variance")]
    pub max_position_variance: f64,

    #[serde(default = "default_rosbridge_url")]
    pub rosbridge_url: String,

    #[serde(default)]
    pub topics: RosbridgeTopics,
}

fn default_tick_ms() -> u64 {
    20
}
fn default_freshness_timeout_ms() -> u64 {
    500
}
fn default_status_interval_ms() -> u64 {
    1000
}
fn default_max_position_variance() -> f64 {
    1.0
}
fn default_rosbridge_url() -> String {
    "ws://localhost:9090".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            publish: false,
            tick_ms: default_tick_ms(),
            freshness_timeout_ms: default_freshness_timeout_ms(),
            status_interval_ms: default_status_interval_ms(),
            max_position_variance: default_max_position_variance(),
            rosbridge_url: default_rosbridge_url(),
            topics: RosbridgeTopics::default(),
        }
    }
}

impl Config {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn freshness_timeout(&self) -> Duration {
        Duration::from_millis(self.freshness_timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), PosestError> {
        if self.tick_ms == 0 {
            return Err(PosestError::Config("tick_ms must be greater than zero".to_string()));
        }
        if self.freshness_timeout_ms == 0 {
            return Err(PosestError::Config(
                "freshness_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.status_interval_ms == 0 {
            return Err(PosestError::Config(
                "status_interval_ms must be greater than zero".to_string(),
            ));
        }
        if !(self.max_position_variance.is_finite() && self.max_position_variance >= 0.0) {
            return Err(PosestError::Config(format!(
                "max_position_variance must be a non-negative number, got {}",
                self.max_position_variance
            )));
        }
        if !self.rosbridge_url.starts_with("ws://") && !self.rosbridge_url.starts_with("wss://") {
            return Err(PosestError::Config(format!(
                "rosbridge_url must be a ws:// or wss:// URL, got '{}'",
                self.rosbridge_url
            )));
        }
        Ok(())
    }
}

fn deserialize_mode<'de, D>(deserializer: D) -> Result<OperatingMode, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Index(u8),
        Name(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Index(i) => i.to_string().parse(),
        Raw::Name(name) => name.parse(),
    }
    .map_err(serde::de::Error::custom)
}

/// `$POSEST_CONFIG` when set, otherwise `~/.posest/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".posest").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, PosestError> {
    load_from(&config_path())
}

/// Load the config from `path`, then apply `POSEST_*` overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, PosestError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| PosestError::Config(format!("Failed to read config at {}: {e}", path.display())))?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| PosestError::Config(format!("Failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// The on-disk config, or defaults with `POSEST_*` overrides applied when
/// no file exists.
pub fn load_or_default() -> Result<Config, PosestError> {
    match load()? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

/// Apply `POSEST_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `POSEST_MODE` | `mode` (name or index) |
/// | `POSEST_PUBLISH` | `publish` (`true`/`false`/`1`/`0`) |
/// | `POSEST_ROSBRIDGE_URL` | `rosbridge_url` |
/// | `POSEST_TICK_MS` | `tick_ms` |
/// | `POSEST_TIMEOUT_MS` | `freshness_timeout_ms` |
///
/// Unparsable values are logged and ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("POSEST_MODE") {
        match v.parse::<OperatingMode>() {
            Ok(mode) => cfg.mode = mode,
            Err(e) => warn!(value = %v, error = %e, "ignoring POSEST_MODE"),
        }
    }
    if let Some(v) = lookup("POSEST_PUBLISH") {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => cfg.publish = true,
            "0" | "false" | "no" | "off" => cfg.publish = false,
            _ => warn!(value = %v, "ignoring POSEST_PUBLISH"),
        }
    }
    if let Some(v) = lookup("POSEST_ROSBRIDGE_URL") {
        cfg.rosbridge_url = v;
    }
    if let Some(v) = lookup("POSEST_TICK_MS") {
        match v.trim().parse::<u64>() {
            Ok(ms) => cfg.tick_ms = ms,
            Err(_) => warn!(value = %v, "ignoring POSEST_TICK_MS"),
        }
    }
    if let Some(v) = lookup("POSEST_TIMEOUT_MS") {
        match v.trim().parse::<u64>() {
            Ok(ms) => cfg.freshness_timeout_ms = ms,
            Err(_) => warn!(value = %v, "ignoring POSEST_TIMEOUT_MS"),
        }
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), PosestError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PosestError::Config(format!("Failed to create config directory: {e}")))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                PosestError::Config(format!("Failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| PosestError::Serialization(format!("Failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| PosestError::Config(format!("Failed to write config at {}: {e}", path.display()));
    // Owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_publish_loop_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.mode, OperatingMode::Mocap);
        assert!(!cfg.publish);
        assert_eq!(cfg.tick_period(), Duration::from_millis(20));
        assert_eq!(cfg.freshness_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.topics.vision_pose, "mavros/vision_pose/pose");
        assert!(cfg.validate().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            mode: OperatingMode::LidarOdomEkf,
            publish: true,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("mode = \"lidar_odom_ekf\""));

        let loaded: Config = toml::from_str(&raw).expect("parse");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn mode_accepts_numeric_index() {
        let cfg: Config = toml::from_str("mode = 4\npublish = true\n").unwrap();
        assert_eq!(cfg.mode, OperatingMode::ExternalOdomEkf);
        assert!(cfg.publish);
        assert_eq!(cfg.tick_ms, 20);
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        assert!(toml::from_str::<Config>("mode = 9\n").is_err());
        assert!(toml::from_str::<Config>("mode = \"warp_drive\"\n").is_err());
    }

    #[test]
    fn partial_topics_table_keeps_other_defaults() {
        let cfg: Config = toml::from_str("[topics]\nmocap = \"/vrpn/drone/pose\"\n").unwrap();
        assert_eq!(cfg.topics.mocap, "/vrpn/drone/pose");
        assert_eq!(cfg.topics.secondary_ekf, "imu_ekf/odom");
    }

    #[test]
    fn config_path_points_to_posest_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".posest"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn load_from_reports_malformed_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "tick_ms = \"fast\"").unwrap();
        assert!(matches!(load_from(&path), Err(PosestError::Config(_))));
    }

    #[test]
    fn overrides_apply_mode_and_publish() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            lookup(&[("POSEST_MODE", "2"), ("POSEST_PUBLISH", "true")]),
        );
        assert_eq!(cfg.mode, OperatingMode::LidarOdom);
        assert!(cfg.publish);
    }

    #[test]
    fn overrides_apply_timing_and_url() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            lookup(&[
                ("POSEST_TICK_MS", "10"),
                ("POSEST_TIMEOUT_MS", "250"),
                ("POSEST_ROSBRIDGE_URL", "ws://drone:9090"),
            ]),
        );
        assert_eq!(cfg.tick_ms, 10);
        assert_eq!(cfg.freshness_timeout_ms, 250);
        assert_eq!(cfg.rosbridge_url, "ws://drone:9090");
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            lookup(&[
                ("POSEST_MODE", "warp_drive"),
                ("POSEST_PUBLISH", "maybe"),
                ("POSEST_TICK_MS", "fast"),
            ]),
        );
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn validate_rejects_zero_periods_and_bad_url() {
        let cfg = Config {
            tick_ms: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            freshness_timeout_ms: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            rosbridge_url: "http://localhost:9090".to_string(),
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(PosestError::Config(_))));
    }
}
