use crate::command::DeviceRef;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Maps a Bluetooth device onto a locally addressable capture source
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, device: &DeviceRef) -> Result<String>;
}

/// Resolves sources by asking PulseAudio/PipeWire through `pactl`
pub struct PactlResolver {
    program: String,
}

impl PactlResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl SourceResolver for PactlResolver {
    async fn resolve(&self, device: &DeviceRef) -> Result<String> {
        let output = Command::new(&self.program)
            .args(["list", "short", "sources"])
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        debug!("Audio sources:\n{}", listing);

        match find_bluetooth_source(&listing, &device.mac) {
            Some(source) => Ok(source),
            None => bail!("audio source for {} ({}) not found", device.mac, device.name),
        }
    }
}

/// Find the capture source belonging to `mac` in `pactl list short sources` output
///
/// PulseAudio names sources `bluez_source.AA_BB_...`, PipeWire uses
/// `bluez_input.AA:BB:...`; both spellings are accepted. Monitor sources of
/// sinks are skipped.
pub fn find_bluetooth_source(listing: &str, mac: &str) -> Option<String> {
    let mac = mac.trim().to_ascii_uppercase();
    if mac.is_empty() {
        return None;
    }
    let underscored = mac.replace(':', "_");

    listing
        .lines()
        .filter_map(|line| line.split('\t').nth(1).or_else(|| line.split_whitespace().nth(1)))
        .map(str::trim)
        .filter(|name| name.starts_with("bluez_"))
        .filter(|name| !name.ends_with(".monitor"))
        .find(|name| {
            let upper = name.to_ascii_uppercase();
            upper.contains(&mac) || upper.contains(&underscored)
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
0\talsa_input.platform-soc_sound.analog-mono\tmodule-alsa-card.c\ts16le 1ch 44100Hz\tSUSPENDED
1\tbluez_sink.11_22_33_44_55_66.a2dp_sink.monitor\tmodule-bluez5-device.c\ts16le 2ch 44100Hz\tIDLE
2\tbluez_source.AA_BB_CC_DD_EE_FF.a2dp_source\tmodule-bluez5-device.c\ts16le 2ch 44100Hz\tRUNNING
";

    #[test]
    fn finds_pulseaudio_bluez_source() {
        let source = find_bluetooth_source(LISTING, "aa:bb:cc:dd:ee:ff");
        assert_eq!(source.as_deref(), Some("bluez_source.AA_BB_CC_DD_EE_FF.a2dp_source"));
    }

    #[test]
    fn finds_pipewire_bluez_input() {
        let listing = "57\tbluez_input.AA:BB:CC:DD:EE:FF.0\tPipeWire\ts16le 1ch 16000Hz\tRUNNING\n";
        let source = find_bluetooth_source(listing, "AA:BB:CC:DD:EE:FF");
        assert_eq!(source.as_deref(), Some("bluez_input.AA:BB:CC:DD:EE:FF.0"));
    }

    #[test]
    fn skips_monitor_sources_and_unknown_devices() {
        assert_eq!(find_bluetooth_source(LISTING, "11:22:33:44:55:66"), None);
        assert_eq!(find_bluetooth_source(LISTING, "00:00:00:00:00:00"), None);
        assert_eq!(find_bluetooth_source(LISTING, ""), None);
    }
}
