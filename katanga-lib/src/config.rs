use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    abi::{FRAME_EVENT_NAME, SETUP_MUTEX_NAME},
    error::ConfigError,
    process::Bitness,
};

pub const CONFIG_FILE_NAME: &str = "katanga.toml";

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LaunchSettings {
    pub grace_ms: u64,
    pub poll_interval_ms: u64,
    /// Zero waits until cancelled.
    pub wait_timeout_ms: u64,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            grace_ms: 8_000,
            poll_interval_ms: 100,
            wait_timeout_ms: 0,
        }
    }
}

impl LaunchSettings {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_ms > 0).then(|| Duration::from_millis(self.wait_timeout_ms))
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ExitWatchSettings {
    pub initial_delay_ms: u64,
    pub interval_ms: u64,
}

impl Default for ExitWatchSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 10_000,
            interval_ms: 2_000,
        }
    }
}

impl ExitWatchSettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FrameSettings {
    pub rate_hz: u32,
    /// How long the target may run after `go` before `stop` is raised.
    pub stop_after_us: u64,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            rate_hz: 90,
            stop_after_us: 3_000,
        }
    }
}

impl FrameSettings {
    pub fn period(&self) -> Duration {
        Duration::from_secs(1) / self.rate_hz.max(1)
    }

    pub fn stop_after(&self) -> Duration {
        Duration::from_micros(self.stop_after_us)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSettings {
    pub dll_32: String,
    pub dll_64: String,
    /// How long the agent waits for the setup lock before giving up on a swap.
    pub setup_timeout_ms: u64,
    pub pacing_timeout_ms: u64,
    /// Consecutive pacing timeouts before the agent stops waiting.
    pub pacing_relax_after: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            dll_32: "katanga_agent32.dll".to_owned(),
            dll_64: "katanga_agent64.dll".to_owned(),
            setup_timeout_ms: 1_000,
            pacing_timeout_ms: 25,
            pacing_relax_after: 90,
        }
    }
}

impl AgentSettings {
    pub fn file_name(&self, bitness: Bitness) -> &str {
        match bitness {
            Bitness::X86 => &self.dll_32,
            Bitness::X64 => &self.dll_64,
        }
    }

    pub fn path_in(&self, dir: &Path, bitness: Bitness) -> PathBuf {
        dir.join(self.file_name(bitness))
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn pacing_timeout(&self) -> Duration {
        Duration::from_millis(self.pacing_timeout_ms)
    }
}

/// Names of the kernel objects both sides open. The agent reads the same
/// file from its own folder, so both agree.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectNames {
    pub setup_mutex: String,
    pub frame_event: String,
}

impl Default for ObjectNames {
    fn default() -> Self {
        Self {
            setup_mutex: SETUP_MUTEX_NAME.to_owned(),
            frame_event: FRAME_EVENT_NAME.to_owned(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub launch: LaunchSettings,
    pub exit_watch: ExitWatchSettings,
    pub frame: FrameSettings,
    pub agent: AgentSettings,
    pub names: ObjectNames,
}

impl Settings {
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// A missing file yields the defaults; a broken one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("{} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    source,
                })
            }
        };
        let settings = Self::parse(path, &text)?;
        info!("loaded {}", path.display());
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let settings = Settings::parse(Path::new("katanga.toml"), "").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.launch.grace(), Duration::from_secs(8));
        assert_eq!(settings.launch.poll_interval(), Duration::from_millis(100));
        assert_eq!(settings.launch.wait_timeout(), None);
        assert_eq!(settings.exit_watch.initial_delay(), Duration::from_secs(10));
        assert_eq!(settings.frame.stop_after(), Duration::from_millis(3));
        assert_eq!(settings.agent.setup_timeout(), Duration::from_secs(1));
        assert_eq!(settings.agent.pacing_timeout(), Duration::from_millis(25));
        assert_eq!(settings.names.setup_mutex, "KatangaSetupMutex");
        assert_eq!(settings.names.frame_event, "KatangaFrameEvent");
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let text = r#"
[launch]
grace_ms = 3000
wait_timeout_ms = 60000

[agent]
dll_64 = "custom64.dll"
"#;
        let settings = Settings::parse(Path::new("katanga.toml"), text).unwrap();
        assert_eq!(settings.launch.grace(), Duration::from_secs(3));
        assert_eq!(settings.launch.poll_interval_ms, 100);
        assert_eq!(
            settings.launch.wait_timeout(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(settings.agent.file_name(Bitness::X64), "custom64.dll");
        assert_eq!(settings.agent.file_name(Bitness::X86), "katanga_agent32.dll");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Settings::parse(Path::new("bad.toml"), "[launch]\ngrace = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn frame_period_follows_rate() {
        let frame = FrameSettings {
            rate_hz: 90,
            ..Default::default()
        };
        assert_eq!(frame.period(), Duration::from_nanos(11_111_111));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir().join("katanga-config-test-missing.toml");
        let _ = fs::remove_file(&path);
        assert_eq!(Settings::load(&path).unwrap(), Settings::default());
    }
}
