use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(
        option_env!("FACEGUARD_CONFIG_PATH").unwrap_or("/etc/security/faceguard/config.toml"),
    )
});

pub static MATCHER_SCRIPT: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(
        option_env!("FACEGUARD_MATCHER_SCRIPT").unwrap_or("/lib/security/faceguard/compare.py"),
    )
});

pub const DEFAULT_LID_STATE_GLOB: &str = "/proc/acpi/button/lid/*/state";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub core: CoreConfig,
    pub matcher: MatcherConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub disabled: bool,
    pub ignore_ssh: bool,
    pub ignore_closed_lid: bool,
    pub detection_notice: bool,
    pub no_confirmation: bool,
    pub workaround: Workaround,
    pub lid_state_glob: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            ignore_ssh: true,
            ignore_closed_lid: true,
            detection_notice: false,
            no_confirmation: true,
            workaround: Workaround::Input,
            lid_state_glob: DEFAULT_LID_STATE_GLOB.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub interpreter: PathBuf,
    pub script: PathBuf,
    pub grace_period_ms: u64,
    pub termination_signal: Signal,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("/usr/bin/python3"),
            script: MATCHER_SCRIPT.to_path_buf(),
            grace_period_ms: 2500,
            termination_signal: Signal(libc::SIGKILL),
        }
    }
}

impl MatcherConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// How the password prompt races the face matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Workaround {
    /// Face only, no password prompt.
    Off,
    /// Race a password prompt; an empty line falls back to the face result.
    Input,
    /// Same race as `Input`, kept as a separate value for installed configs.
    Native,
}

impl Workaround {
    pub fn races_password(self) -> bool {
        !matches!(self, Workaround::Off)
    }
}

const SIGNAL_NAMES: &[(&str, i32)] = &[
    ("SIGHUP", libc::SIGHUP),
    ("SIGINT", libc::SIGINT),
    ("SIGQUIT", libc::SIGQUIT),
    ("SIGKILL", libc::SIGKILL),
    ("SIGUSR1", libc::SIGUSR1),
    ("SIGUSR2", libc::SIGUSR2),
    ("SIGALRM", libc::SIGALRM),
    ("SIGTERM", libc::SIGTERM),
];

/// A POSIX signal named in the config file, e.g. `"SIGTERM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signal(pub i32);

impl Signal {
    pub fn number(self) -> i32 {
        self.0
    }
}

impl TryFrom<String> for Signal {
    type Error = String;

    fn try_from(name: String) -> std::result::Result<Self, Self::Error> {
        let upper = name.trim().to_ascii_uppercase();
        let wanted = if upper.starts_with("SIG") {
            upper
        } else {
            format!("SIG{upper}")
        };
        SIGNAL_NAMES
            .iter()
            .find(|(n, _)| *n == wanted)
            .map(|(_, num)| Signal(*num))
            .ok_or_else(|| format!("unsupported signal {name:?}"))
    }
}

impl From<Signal> for String {
    fn from(sig: Signal) -> Self {
        sig.to_string()
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match SIGNAL_NAMES.iter().find(|(_, num)| *num == self.0) {
            Some((name, _)) => f.write_str(name),
            None => write!(f, "signal {}", self.0),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = load_config(Some(&dir.path().join("absent.toml")))?;
        assert_eq!(cfg, Config::default());
        assert!(cfg.core.ignore_ssh);
        assert!(cfg.core.no_confirmation);
        assert_eq!(cfg.core.workaround, Workaround::Input);
        assert_eq!(cfg.matcher.grace_period(), Duration::from_millis(2500));
        assert_eq!(cfg.matcher.termination_signal, Signal(libc::SIGKILL));
        Ok(())
    }

    #[test]
    fn partial_file_keeps_other_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[core]\nworkaround = \"off\"\ndetection_notice = true\n\n[matcher]\ntermination_signal = \"term\"\n",
        )?;
        let cfg = load_config(Some(&path))?;
        assert_eq!(cfg.core.workaround, Workaround::Off);
        assert!(cfg.core.detection_notice);
        assert!(cfg.core.ignore_closed_lid);
        assert_eq!(cfg.matcher.termination_signal, Signal(libc::SIGTERM));
        assert_eq!(cfg.matcher.grace_period_ms, 2500);
        Ok(())
    }

    #[test]
    fn unknown_workaround_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[core]\nworkaround = \"sometimes\"\n")?;
        assert!(load_config(Some(&path)).is_err());
        Ok(())
    }

    #[test]
    fn unknown_signal_is_rejected() {
        assert!(Signal::try_from("SIGBOGUS".to_string()).is_err());
        assert_eq!(
            Signal::try_from("sigusr1".to_string()),
            Ok(Signal(libc::SIGUSR1))
        );
    }

    #[test]
    fn save_then_load_preserves_disabled_flag() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.core.disabled = true;
        save_config(&cfg, Some(&path))?;
        let raw = std::fs::read_to_string(&path)?;
        assert!(raw.contains("termination_signal = \"SIGKILL\""));
        assert!(load_config(Some(&path))?.core.disabled);
        Ok(())
    }

    #[test]
    fn only_off_skips_the_password_race() {
        assert!(!Workaround::Off.races_password());
        assert!(Workaround::Input.races_password());
        assert!(Workaround::Native.races_password());
    }
}
