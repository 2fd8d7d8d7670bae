//! Types a host can forward over its own event bus.
//!
//! All of them derive `serde::Serialize` + `serde::Deserialize`; the CLI
//! prints them as JSON lines with `--json-events`.

pub mod events;

pub use events::{ControllerEvent, ControllerStatus};
