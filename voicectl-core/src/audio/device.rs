//! Input device discovery for `voicectl devices` and `--device` resolution.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDevice {
    pub name: String,
    pub is_default: bool,
    /// Name suggests the device records system output rather than a microphone.
    pub is_loopback: bool,
    /// Best guess for a speech microphone; at most one device carries it.
    pub is_recommended: bool,
}

/// Substrings of capture devices that mirror speaker output.
const LOOPBACK_HINTS: &[&str] = &[
    "stereo mix",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "wave out",
    "virtual output",
    "speakers (",
    "headphones (",
];

const MICROPHONE_HINTS: &[&str] = &["microphone", "mic", "headset", "array", "usb", "webcam"];

pub fn looks_like_loopback(name: &str) -> bool {
    let lowered = name.trim().to_lowercase();
    LOOPBACK_HINTS.iter().any(|hint| lowered.contains(hint))
}

/// Ranking score for picking a wake-word microphone. Higher wins.
pub fn microphone_score(name: &str, is_default: bool) -> i32 {
    let lowered = name.trim().to_lowercase();
    let mut score = if looks_like_loopback(&lowered) { -16 } else { 8 };
    if MICROPHONE_HINTS.iter().any(|hint| lowered.contains(hint)) {
        score += 6;
    }
    if is_default {
        score += 2;
    }
    score
}

/// Mark the best candidate and order the list: recommended first, loopback last.
pub fn rank_devices(mut devices: Vec<InputDevice>) -> Vec<InputDevice> {
    let best = devices
        .iter()
        .enumerate()
        .max_by_key(|(_, d)| microphone_score(&d.name, d.is_default))
        .map(|(idx, _)| idx);
    if let Some(idx) = best {
        devices[idx].is_recommended = !devices[idx].is_loopback;
    }
    devices.sort_by_key(|d| {
        (
            !d.is_recommended,
            d.is_loopback,
            !d.is_default,
            d.name.to_lowercase(),
        )
    });
    devices
}

/// Enumerate capture devices on the default host. Empty when none are found.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<InputDevice> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let names: Vec<String> = match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(idx, d)| d.name().unwrap_or_else(|_| format!("input {}", idx + 1)))
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            default_name.iter().cloned().collect()
        }
    };

    rank_devices(
        names
            .into_iter()
            .map(|name| InputDevice {
                is_default: default_name.as_deref() == Some(name.as_str()),
                is_loopback: looks_like_loopback(&name),
                is_recommended: false,
                name,
            })
            .collect(),
    )
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<InputDevice> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, is_default: bool) -> InputDevice {
        InputDevice {
            name: name.into(),
            is_default,
            is_loopback: looks_like_loopback(name),
            is_recommended: false,
        }
    }

    #[test]
    fn loopback_names_are_recognised() {
        assert!(looks_like_loopback("Stereo Mix (Realtek Audio)"));
        assert!(looks_like_loopback("Monitor of Built-in Audio"));
        assert!(!looks_like_loopback("Blue Yeti USB Microphone"));
    }

    #[test]
    fn microphone_outranks_default_loopback() {
        let ranked = rank_devices(vec![
            device("Stereo Mix (Realtek Audio)", true),
            device("Microphone Array (Intel)", false),
            device("Line In", false),
        ]);
        assert_eq!(ranked[0].name, "Microphone Array (Intel)");
        assert!(ranked[0].is_recommended);
        assert_eq!(ranked.last().unwrap().name, "Stereo Mix (Realtek Audio)");
        assert_eq!(ranked.iter().filter(|d| d.is_recommended).count(), 1);
    }

    #[test]
    fn only_loopback_devices_get_no_recommendation() {
        let ranked = rank_devices(vec![device("What U Hear", true)]);
        assert!(!ranked[0].is_recommended);
    }
}
