//! Lifecycle events broadcast by the controller.
//!
//! Every hook call has a matching [`ControllerEvent`], so hosts can observe
//! the controller without implementing `ControllerHooks`. Events serialise as
//! JSON objects tagged by `"type"`:
//!
//! ```json
//! {"type":"beginCommand","seq":4,"name":"turn on $device","args":{"device":"lights"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::command::CommandArgs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ControllerEvent {
    /// Audio is flowing and the wake engine is armed.
    Ready { seq: u64 },
    /// The wake word was accepted and a cloud session opened.
    Triggered {
        seq: u64,
        lag_samples: usize,
        spliced_samples: usize,
    },
    BeginCommand {
        seq: u64,
        name: String,
        args: CommandArgs,
    },
    FinishCommand {
        seq: u64,
        name: String,
        args: CommandArgs,
    },
    UnknownCommand { seq: u64, text: String },
    Error { seq: u64, message: String },
    Status {
        seq: u64,
        status: ControllerStatus,
        detail: Option<String>,
    },
}

impl ControllerEvent {
    pub fn seq(&self) -> u64 {
        match self {
            Self::Ready { seq }
            | Self::Triggered { seq, .. }
            | Self::BeginCommand { seq, .. }
            | Self::FinishCommand { seq, .. }
            | Self::UnknownCommand { seq, .. }
            | Self::Error { seq, .. }
            | Self::Status { seq, .. } => *seq,
        }
    }
}

/// Coarse controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerStatus {
    /// Constructed, `start()` not called yet.
    Idle,
    /// Waiting for the wake word.
    Listening,
    /// A command session is in flight.
    Recording,
    /// Capture ended; may be started again.
    Stopped,
    /// The audio source failed.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_command_serializes_with_tag_and_ordered_args() {
        let event = ControllerEvent::BeginCommand {
            seq: 4,
            name: "turn on $device".into(),
            args: [("device", Some("lights".to_string()))].into_iter().collect(),
        };

        let json = serde_json::to_value(&event).expect("serialize begin event");
        assert_eq!(json["type"], "beginCommand");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["name"], "turn on $device");
        assert_eq!(json["args"]["device"], "lights");

        let round_trip: ControllerEvent =
            serde_json::from_value(json).expect("deserialize begin event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn triggered_fields_are_camel_case() {
        let event = ControllerEvent::Triggered {
            seq: 1,
            lag_samples: 3_200,
            spliced_samples: 3_200,
        };
        let json = serde_json::to_value(&event).expect("serialize triggered event");
        assert_eq!(json["type"], "triggered");
        assert_eq!(json["lagSamples"], 3_200);
        assert_eq!(json["splicedSamples"], 3_200);
    }

    #[test]
    fn status_event_uses_lowercase_status() {
        let event = ControllerEvent::Status {
            seq: 9,
            status: ControllerStatus::Recording,
            detail: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "recording");
        assert!(json["detail"].is_null());
        assert_eq!(event.seq(), 9);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<ControllerStatus>(r#""Listening""#).is_err());
    }
}
