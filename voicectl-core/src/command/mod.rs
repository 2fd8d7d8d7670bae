//! Command-pattern language and dispatcher.
//!
//! ```text
//! "turn (on|off) $device"  ──compile──►  CommandPattern (regex + group map)
//!                                               │
//! "turn on lights and then play $song..."      │ matches()
//!                                               ▼
//!                         MatchResult { variables, continuation }
//!                                               │
//!                      CommandRegistry::perform_all_commands loops on
//!                      the continuation until nothing is left
//! ```

pub mod pattern;
pub mod registry;
pub mod synonyms;

pub use pattern::{Atom, CommandPattern, MatchResult, PatternError};
pub use registry::{CommandHandler, CommandRegistry, DispatchListener, DispatchReport};
pub use synonyms::SynonymTable;

use std::fmt;

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

/// Typed arguments extracted from a matched utterance.
///
/// Entries keep the left-to-right order of the `$name` atoms in the pattern.
/// A variable that took no part in the match is present with a `None` value,
/// so handlers must handle absence explicitly. Serialises as an ordered JSON
/// object with `null` for absent values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    entries: Vec<(String, Option<String>)>,
}

impl CommandArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: Option<String>) {
        self.entries.push((name.into(), value));
    }

    /// Value captured for `name`, if the variable exists and matched.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Whether the pattern declares `name` at all.
    pub fn declares(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for CommandArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (name, value)) in self.entries.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            match value {
                Some(v) => write!(f, "{name}={v:?}")?,
                None => write!(f, "{name}=<none>")?,
            }
        }
        Ok(())
    }
}

impl<N: Into<String>> FromIterator<(N, Option<String>)> for CommandArgs {
    fn from_iter<T: IntoIterator<Item = (N, Option<String>)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        }
    }
}

impl Serialize for CommandArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CommandArgs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ArgsVisitor;

        impl<'de> Visitor<'de> for ArgsVisitor {
            type Value = CommandArgs;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of variable names to optional strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut args = CommandArgs::new();
                while let Some((name, value)) = access.next_entry::<String, Option<String>>()? {
                    args.push(name, value);
                }
                Ok(args)
            }
        }

        deserializer.deserialize_map(ArgsVisitor)
    }
}
