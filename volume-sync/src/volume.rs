//! Desktop volume access
//!
//! [`VolumeSource`] is the seam between the sync core and the host's audio
//! mixer. [`SystemVolume`] implements it by driving the platform's mixer
//! tool: `wpctl` on PipeWire desktops, `osascript` on macOS.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::trace;

use crate::error::VolumeError;

/// A desktop volume level in 0..=100
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VolumeLevel(u8);

impl VolumeLevel {
    pub const MIN: VolumeLevel = VolumeLevel(0);
    pub const MAX: VolumeLevel = VolumeLevel(100);

    /// Create a level, rejecting anything above 100
    pub fn new(level: u8) -> Result<Self, VolumeError> {
        if level > Self::MAX.0 {
            return Err(VolumeError::OutOfRange(i64::from(level)));
        }
        Ok(Self(level))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Whether the level is above zero
    pub fn is_audible(self) -> bool {
        self.0 > 0
    }
}

impl TryFrom<u8> for VolumeLevel {
    type Error = VolumeError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Self::new(level)
    }
}

impl TryFrom<i64> for VolumeLevel {
    type Error = VolumeError;

    fn try_from(level: i64) -> Result<Self, Self::Error> {
        u8::try_from(level)
            .map_err(|_| VolumeError::OutOfRange(level))
            .and_then(Self::new)
    }
}

impl From<VolumeLevel> for u8 {
    fn from(level: VolumeLevel) -> Self {
        level.0
    }
}

impl fmt::Display for VolumeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Read and write access to the host's output volume
#[async_trait]
pub trait VolumeSource: Send + Sync {
    /// Read the current output volume
    async fn get_volume(&self) -> Result<VolumeLevel, VolumeError>;

    /// Set the output volume
    async fn set_volume(&self, level: VolumeLevel) -> Result<(), VolumeError>;
}

/// Mixer tool used by [`SystemVolume`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeBackend {
    /// PipeWire's `wpctl`, acting on the default audio sink
    Wpctl,
    /// AppleScript via `osascript`
    Osascript,
}

impl VolumeBackend {
    /// Name of the executable
    pub fn tool(&self) -> &'static str {
        match self {
            VolumeBackend::Wpctl => "wpctl",
            VolumeBackend::Osascript => "osascript",
        }
    }

    fn get_args(&self) -> Vec<String> {
        match self {
            VolumeBackend::Wpctl => vec!["get-volume".into(), DEFAULT_SINK.into()],
            VolumeBackend::Osascript => vec![
                "-e".into(),
                "output volume of (get volume settings)".into(),
            ],
        }
    }

    fn set_args(&self, level: VolumeLevel) -> Vec<String> {
        match self {
            VolumeBackend::Wpctl => vec![
                "set-volume".into(),
                DEFAULT_SINK.into(),
                format!("{:.2}", f64::from(level.value()) / 100.0),
            ],
            VolumeBackend::Osascript => {
                vec!["-e".into(), format!("set volume output volume {level}")]
            }
        }
    }

    /// Parse the output of the get command
    pub fn parse_volume(&self, output: &str) -> Result<VolumeLevel, VolumeError> {
        match self {
            VolumeBackend::Wpctl => parse_wpctl_volume(output),
            VolumeBackend::Osascript => parse_osascript_volume(output),
        }
    }
}

impl Default for VolumeBackend {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            VolumeBackend::Osascript
        } else {
            VolumeBackend::Wpctl
        }
    }
}

impl FromStr for VolumeBackend {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wpctl" | "pipewire" => Ok(VolumeBackend::Wpctl),
            "osascript" | "macos" => Ok(VolumeBackend::Osascript),
            other => Err(VolumeError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for VolumeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool())
    }
}

const DEFAULT_SINK: &str = "@DEFAULT_AUDIO_SINK@";

/// Parse `Volume: 0.40` or `Volume: 0.40 [MUTED]`
///
/// PipeWire allows boosting above 100%; such levels are reported as 100.
fn parse_wpctl_volume(output: &str) -> Result<VolumeLevel, VolumeError> {
    let unexpected = || VolumeError::UnexpectedOutput {
        tool: "wpctl",
        output: output.to_string(),
    };

    let fraction: f64 = output
        .trim()
        .strip_prefix("Volume:")
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
        .ok_or_else(unexpected)?;

    if !fraction.is_finite() || fraction < 0.0 {
        return Err(unexpected());
    }

    let percent = (fraction * 100.0).round().min(100.0) as u8;
    VolumeLevel::new(percent)
}

/// Parse the bare integer printed by AppleScript
fn parse_osascript_volume(output: &str) -> Result<VolumeLevel, VolumeError> {
    // "missing value" is printed when there is no output device.
    let level: i64 = output
        .trim()
        .parse()
        .map_err(|_| VolumeError::UnexpectedOutput {
            tool: "osascript",
            output: output.to_string(),
        })?;
    VolumeLevel::try_from(level)
}

/// The host's volume, driven through the platform mixer tool
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemVolume {
    backend: VolumeBackend,
}

impl SystemVolume {
    pub fn new(backend: VolumeBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> VolumeBackend {
        self.backend
    }

    async fn run(&self, args: Vec<String>) -> Result<String, VolumeError> {
        let tool = self.backend.tool();
        trace!(tool, ?args, "Running mixer command");

        let output = Command::new(tool)
            .args(&args)
            .output()
            .await
            .map_err(|e| VolumeError::CommandFailed {
                tool,
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(VolumeError::CommandFailed {
                tool,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl VolumeSource for SystemVolume {
    async fn get_volume(&self) -> Result<VolumeLevel, VolumeError> {
        let output = self.run(self.backend.get_args()).await?;
        self.backend.parse_volume(&output)
    }

    async fn set_volume(&self, level: VolumeLevel) -> Result<(), VolumeError> {
        self.run(self.backend.set_args(level)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_volume_level_bounds() {
        assert_eq!(VolumeLevel::new(0).unwrap(), VolumeLevel::MIN);
        assert_eq!(VolumeLevel::new(100).unwrap(), VolumeLevel::MAX);
        assert_eq!(VolumeLevel::new(101), Err(VolumeError::OutOfRange(101)));

        assert_eq!(VolumeLevel::try_from(-1i64), Err(VolumeError::OutOfRange(-1)));
        assert_eq!(VolumeLevel::try_from(300i64), Err(VolumeError::OutOfRange(300)));
        assert_eq!(VolumeLevel::try_from(55i64).unwrap().value(), 55);

        assert!(!VolumeLevel::MIN.is_audible());
        assert!(VolumeLevel::new(1).unwrap().is_audible());
        assert_eq!(u8::from(VolumeLevel::MAX), 100);
        assert_eq!(VolumeLevel::new(42).unwrap().to_string(), "42");
    }

    #[rstest]
    #[case("Volume: 0.40", 40)]
    #[case("Volume: 0.40 [MUTED]", 40)]
    #[case("Volume: 0.00", 0)]
    #[case("Volume: 1.00", 100)]
    #[case("Volume: 1.35", 100)]
    #[case("  Volume: 0.555\n", 56)]
    fn test_parse_wpctl_volume(#[case] output: &str, #[case] expected: u8) {
        let level = VolumeBackend::Wpctl.parse_volume(output).unwrap();
        assert_eq!(level.value(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("Volume:")]
    #[case("Volume: loud")]
    #[case("Volume: -0.10")]
    #[case("Mute: 0.40")]
    fn test_parse_wpctl_rejects_garbage(#[case] output: &str) {
        assert!(matches!(
            VolumeBackend::Wpctl.parse_volume(output),
            Err(VolumeError::UnexpectedOutput { tool: "wpctl", .. })
        ));
    }

    #[rstest]
    #[case("40", 40)]
    #[case("0\n", 0)]
    #[case("100", 100)]
    fn test_parse_osascript_volume(#[case] output: &str, #[case] expected: u8) {
        let level = VolumeBackend::Osascript.parse_volume(output).unwrap();
        assert_eq!(level.value(), expected);
    }

    #[test]
    fn test_parse_osascript_rejects_garbage() {
        assert!(matches!(
            VolumeBackend::Osascript.parse_volume("missing value"),
            Err(VolumeError::UnexpectedOutput {
                tool: "osascript",
                ..
            })
        ));
        assert_eq!(
            VolumeBackend::Osascript.parse_volume("101"),
            Err(VolumeError::OutOfRange(101))
        );
    }

    #[test]
    fn test_set_args() {
        let level = VolumeLevel::new(70).unwrap();
        assert_eq!(
            VolumeBackend::Wpctl.set_args(level),
            vec!["set-volume", "@DEFAULT_AUDIO_SINK@", "0.70"]
        );
        assert_eq!(
            VolumeBackend::Osascript.set_args(level),
            vec!["-e", "set volume output volume 70"]
        );
        assert_eq!(
            VolumeBackend::Wpctl.set_args(VolumeLevel::MAX)[2],
            "1.00"
        );
    }

    #[rstest]
    #[case("wpctl", VolumeBackend::Wpctl)]
    #[case("PipeWire", VolumeBackend::Wpctl)]
    #[case("osascript", VolumeBackend::Osascript)]
    #[case(" macos ", VolumeBackend::Osascript)]
    fn test_backend_from_str(#[case] input: &str, #[case] expected: VolumeBackend) {
        assert_eq!(input.parse::<VolumeBackend>().unwrap(), expected);
    }

    #[test]
    fn test_backend_from_str_unknown() {
        assert_eq!(
            "alsa".parse::<VolumeBackend>(),
            Err(VolumeError::UnknownBackend("alsa".to_string()))
        );
    }

    #[tokio::test]
    async fn test_missing_tool_is_command_failure() {
        // Whether wpctl is missing or rejects the flag, the result is an error.
        let volume = SystemVolume::new(VolumeBackend::Wpctl);
        let result = volume
            .run(vec!["--definitely-not-a-flag".to_string()])
            .await;
        assert!(result.is_err());
    }
}
