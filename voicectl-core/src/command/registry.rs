//! Ordered command table and the chained dispatcher.

use tracing::{debug, warn};

use super::{pattern::CommandPattern, synonyms::SynonymTable, CommandArgs};
use crate::error::{Result, VoiceError};

/// Sentence punctuation that cloud recognisers append to words. Only removed
/// at the end of a token, so `10:30` and `21.5` survive.
const STRIPPED_PUNCTUATION: [char; 6] = ['.', ',', '!', '?', ';', ':'];

/// Something that runs when its pattern matches.
pub trait CommandHandler: Send + Sync + 'static {
    fn handle(&self, args: &CommandArgs) -> anyhow::Result<()>;
}

impl<F> CommandHandler for F
where
    F: Fn(&CommandArgs) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, args: &CommandArgs) -> anyhow::Result<()> {
        self(args)
    }
}

/// Observer of dispatch progress. `name` is the pattern source.
pub trait DispatchListener {
    fn begin_command(&self, name: &str, args: &CommandArgs);
    fn finish_command(&self, name: &str, args: &CommandArgs);
    fn unknown_command(&self, text: &str);
    fn command_failed(&self, name: &str, error: &anyhow::Error);
}

/// Listener that ignores everything.
impl DispatchListener for () {
    fn begin_command(&self, _: &str, _: &CommandArgs) {}
    fn finish_command(&self, _: &str, _: &CommandArgs) {}
    fn unknown_command(&self, _: &str) {}
    fn command_failed(&self, _: &str, _: &anyhow::Error) {}
}

/// Outcome of one `perform_all_commands` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Pattern sources of the handlers that completed, in chain order.
    pub handled: Vec<String>,
    /// Text that matched no pattern.
    pub unknown: Option<String>,
    /// Pattern source and message of a handler that returned an error.
    pub failed: Option<(String, String)>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.unknown.is_none() && self.failed.is_none()
    }
}

struct Registered {
    pattern: CommandPattern,
    handler: Box<dyn CommandHandler>,
}

/// Commands in registration order; earlier entries win.
pub struct CommandRegistry {
    synonyms: SynonymTable,
    commands: Vec<Registered>,
    strip_punctuation: bool,
    transliterate: bool,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            synonyms: SynonymTable::new(),
            commands: Vec::new(),
            strip_punctuation: true,
            transliterate: true,
        }
    }

    /// Toggle removal of trailing `. , ! ? ; :` from each word before matching.
    pub fn set_strip_punctuation(&mut self, enabled: bool) {
        self.strip_punctuation = enabled;
    }

    /// Toggle folding of the utterance to ASCII (`café` → `cafe`) before matching.
    pub fn set_transliterate(&mut self, enabled: bool) {
        self.transliterate = enabled;
    }

    /// Register synonyms for `word`.
    ///
    /// # Errors
    /// `VoiceError::SynonymsFrozen` once any command has been compiled.
    pub fn add_synonyms<I, S>(&mut self, word: &str, alternatives: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.commands.is_empty() {
            return Err(VoiceError::SynonymsFrozen {
                word: word.to_string(),
            });
        }
        self.synonyms.insert(word, alternatives);
        Ok(())
    }

    /// Compile `pattern` and append it with `handler`.
    ///
    /// # Errors
    /// `VoiceError::Pattern` when the pattern is malformed.
    pub fn add_command<H: CommandHandler>(&mut self, pattern: &str, handler: H) -> Result<()> {
        let pattern = CommandPattern::compile(pattern, &self.synonyms)?;
        debug!(pattern = pattern.source(), regex = pattern.as_regex(), "command registered");
        self.commands.push(Registered {
            pattern,
            handler: Box::new(handler),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &CommandPattern> {
        self.commands.iter().map(|c| &c.pattern)
    }

    pub fn synonyms(&self) -> &SynonymTable {
        &self.synonyms
    }

    /// Match `utterance` and run handlers, following `and then` chains.
    ///
    /// The first pass reports unknown text as originally received; later
    /// passes report the remaining continuation.
    pub fn perform_all_commands(
        &self,
        utterance: &str,
        listener: &dyn DispatchListener,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut text = self.normalize(utterance);
        let mut original = Some(utterance);

        loop {
            let hit = self
                .commands
                .iter()
                .find_map(|c| c.pattern.matches(&text).map(|m| (c, m)));

            let Some((command, matched)) = hit else {
                let reported = original.map_or_else(|| text.clone(), |o| o.trim().to_string());
                debug!(text = %reported, "no command matched");
                listener.unknown_command(&reported);
                report.unknown = Some(reported);
                return report;
            };

            let name = command.pattern.source();
            listener.begin_command(name, &matched.variables);
            debug!(command = name, args = %matched.variables, "running command");

            if let Err(err) = command.handler.handle(&matched.variables) {
                warn!(command = name, "command handler failed: {err:#}");
                listener.command_failed(name, &err);
                report.failed = Some((name.to_string(), format!("{err:#}")));
                return report;
            }

            listener.finish_command(name, &matched.variables);
            report.handled.push(name.to_string());

            match matched.continuation {
                Some(rest) => {
                    text = rest;
                    original = None;
                }
                None => return report,
            }
        }
    }

    fn normalize(&self, utterance: &str) -> String {
        let folded = if self.transliterate {
            deunicode::deunicode(utterance)
        } else {
            utterance.to_string()
        };
        folded
            .split_whitespace()
            .map(|word| {
                if self.strip_punctuation {
                    word.trim_end_matches(|c: char| STRIPPED_PUNCTUATION.contains(&c))
                } else {
                    word
                }
            })
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
