//! Command-pattern compiler.
//!
//! ## Grammar
//!
//! | Token | Atom | Regex |
//! |-------|------|-------|
//! | `word` | literal (or synonym alternation) | `word` / `(word\|syn)` |
//! | `$name` | single word capture | `(\w+)` |
//! | `$name...` | greedy capture | `(.+?)` |
//! | `$name(<re>)` | custom regex capture | `(<re>)` |
//! | `(a b\|c)` | literal group, may span tokens | `(a\s+b\|c)` |
//!
//! Atoms are joined with `\s+`, the whole expression is anchored at both ends
//! and matched case-insensitively. Unless the last atom is greedy, an optional
//! `\s+and\s+then\s+(.+)` tail captures a chained command.

use regex::Regex;
use thiserror::Error;

use super::{synonyms::SynonymTable, CommandArgs};

const CONTINUATION: &str = r"(?:\s+and\s+then\s+(.+))?";

/// Compile-time faults in a command pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,

    #[error("group '{0}' is never closed")]
    UnterminatedGroup(String),

    #[error("nested parentheses in group '{0}'")]
    NestedGroup(String),

    #[error("empty alternative in group '{0}'")]
    EmptyAlternative(String),

    #[error("unbalanced parenthesis in literal '{0}'")]
    StrayParenthesis(String),

    #[error("invalid variable token '{0}'")]
    InvalidVariable(String),

    #[error("variable '${0}' declared twice")]
    DuplicateVariable(String),

    #[error("invalid regex in '{token}': {reason}")]
    InvalidRegex { token: String, reason: String },
}

/// One compiled element of a pattern. `group` is the capturing-group index
/// in the compiled regex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Atom {
    Literal(String),
    /// A literal expanded with registered synonyms.
    LiteralAlternation { words: Vec<String>, group: usize },
    SingleWordCapture { name: String, group: usize },
    GreedyCapture { name: String, group: usize },
    CustomRegexCapture { name: String, regex: String, group: usize },
    /// An explicit `( … | … )` group; its text is discarded on dispatch.
    LiteralGroup { words: Vec<String>, group: usize },
}

impl Atom {
    fn to_regex(&self) -> String {
        match self {
            Atom::Literal(word) => phrase_regex(word),
            Atom::LiteralAlternation { words, .. } | Atom::LiteralGroup { words, .. } => {
                let alts: Vec<String> = words.iter().map(|w| phrase_regex(w)).collect();
                format!("({})", alts.join("|"))
            }
            Atom::SingleWordCapture { .. } => r"(\w+)".to_string(),
            Atom::GreedyCapture { .. } => "(.+?)".to_string(),
            Atom::CustomRegexCapture { regex, .. } => format!("({regex})"),
        }
    }

    /// Variable name for `$` atoms.
    pub fn variable(&self) -> Option<(&str, usize)> {
        match self {
            Atom::SingleWordCapture { name, group }
            | Atom::GreedyCapture { name, group }
            | Atom::CustomRegexCapture { name, group, .. } => Some((name.as_str(), *group)),
            _ => None,
        }
    }
}

/// Result of one successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub variables: CommandArgs,
    /// Text after `and then`, to be dispatched next.
    pub continuation: Option<String>,
}

/// An immutable, reusable matcher built once from a pattern string.
#[derive(Debug, Clone)]
pub struct CommandPattern {
    source: String,
    atoms: Vec<Atom>,
    /// `$name` → capturing group, in atom order.
    variable_index: Vec<(String, usize)>,
    continuation_group: Option<usize>,
    regex: Regex,
}

impl CommandPattern {
    /// Compile `source`, expanding literals found in `synonyms`.
    ///
    /// # Errors
    /// Any malformed token is rejected here; matching never fails.
    pub fn compile(source: &str, synonyms: &SynonymTable) -> Result<Self, PatternError> {
        let mut tokens = source.split_whitespace();
        let mut atoms = Vec::new();
        let mut variable_index: Vec<(String, usize)> = Vec::new();
        // Group 0 is the whole match.
        let mut next_group = 1usize;

        while let Some(token) = tokens.next() {
            let atom = if let Some(rest) = token.strip_prefix('$') {
                let atom = compile_variable(token, rest, next_group)?;
                if let Some((name, _)) = atom.variable() {
                    if variable_index.iter().any(|(n, _)| n == name) {
                        return Err(PatternError::DuplicateVariable(name.to_string()));
                    }
                }
                atom
            } else if token.starts_with('(') {
                let mut group_text = token.to_string();
                while !(group_text.len() >= 2 && group_text.ends_with(')')) {
                    match tokens.next() {
                        Some(t) => {
                            group_text.push(' ');
                            group_text.push_str(t);
                        }
                        None => return Err(PatternError::UnterminatedGroup(group_text)),
                    }
                }
                Atom::LiteralGroup {
                    words: parse_group(&group_text)?,
                    group: next_group,
                }
            } else if token.contains(['(', ')']) {
                return Err(PatternError::StrayParenthesis(token.to_string()));
            } else if let Some(alts) = synonyms.alternatives(token) {
                let mut words = Vec::with_capacity(alts.len() + 1);
                words.push(token.to_lowercase());
                words.extend(alts.iter().cloned());
                Atom::LiteralAlternation {
                    words,
                    group: next_group,
                }
            } else {
                Atom::Literal(token.to_string())
            };

            next_group += groups_used(&atom)?;
            if let Some((name, group)) = atom.variable() {
                variable_index.push((name.to_string(), group));
            }
            atoms.push(atom);
        }

        let last = atoms.last().ok_or(PatternError::Empty)?;
        let can_chain = !matches!(last, Atom::GreedyCapture { .. });

        let body: Vec<String> = atoms.iter().map(Atom::to_regex).collect();
        let mut expr = format!(r"(?i)^{}", body.join(r"\s+"));
        let continuation_group = if can_chain {
            expr.push_str(CONTINUATION);
            Some(next_group)
        } else {
            None
        };
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| PatternError::InvalidRegex {
            token: source.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source: source.split_whitespace().collect::<Vec<_>>().join(" "),
            atoms,
            variable_index,
            continuation_group,
            regex,
        })
    }

    /// Full-string, case-insensitive match. `None` when the utterance does not fit.
    pub fn matches(&self, utterance: &str) -> Option<MatchResult> {
        let caps = self.regex.captures(utterance)?;

        let variables = self
            .variable_index
            .iter()
            .map(|(name, group)| {
                (
                    name.clone(),
                    caps.get(*group).map(|m| m.as_str().to_string()),
                )
            })
            .collect();

        let continuation = self
            .continuation_group
            .and_then(|g| caps.get(g))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());

        Some(MatchResult {
            variables,
            continuation,
        })
    }

    /// The pattern text, whitespace-normalised. Used as the command name.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// Capturing group assigned to `$name`.
    pub fn group_of(&self, name: &str) -> Option<usize> {
        self.variable_index
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, g)| *g)
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variable_index.iter().map(|(n, _)| n.as_str())
    }

    /// `false` when the pattern ends in a greedy capture.
    pub fn can_chain(&self) -> bool {
        self.continuation_group.is_some()
    }

    pub fn as_regex(&self) -> &str {
        self.regex.as_str()
    }
}

fn compile_variable(token: &str, rest: &str, group: usize) -> Result<Atom, PatternError> {
    if rest.ends_with(')') {
        let open = rest
            .find('(')
            .ok_or_else(|| PatternError::InvalidVariable(token.to_string()))?;
        let name = valid_name(token, &rest[..open])?;
        let body = &rest[open + 1..rest.len() - 1];
        if body.is_empty() {
            return Err(PatternError::InvalidRegex {
                token: token.to_string(),
                reason: "empty expression".into(),
            });
        }
        return Ok(Atom::CustomRegexCapture {
            name,
            regex: body.to_string(),
            group,
        });
    }

    if let Some(name) = rest.strip_suffix("...") {
        return Ok(Atom::GreedyCapture {
            name: valid_name(token, name)?,
            group,
        });
    }

    Ok(Atom::SingleWordCapture {
        name: valid_name(token, rest)?,
        group,
    })
}

fn valid_name(token: &str, name: &str) -> Result<String, PatternError> {
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(PatternError::InvalidVariable(token.to_string()));
    }
    Ok(name.to_string())
}

/// Split `(a b|c)` into its alternatives.
fn parse_group(group_text: &str) -> Result<Vec<String>, PatternError> {
    let inner = &group_text[1..group_text.len() - 1];
    if inner.contains(['(', ')']) {
        return Err(PatternError::NestedGroup(group_text.to_string()));
    }
    inner
        .split('|')
        .map(|alt| {
            let words = alt.split_whitespace().collect::<Vec<_>>();
            if words.is_empty() {
                Err(PatternError::EmptyAlternative(group_text.to_string()))
            } else {
                Ok(words.join(" ").to_lowercase())
            }
        })
        .collect()
}

/// Capturing groups an atom consumes, including groups inside custom regexes.
fn groups_used(atom: &Atom) -> Result<usize, PatternError> {
    match atom {
        Atom::Literal(_) => Ok(0),
        Atom::CustomRegexCapture { name, regex, .. } => {
            let inner = Regex::new(regex).map_err(|e| PatternError::InvalidRegex {
                token: format!("${name}({regex})"),
                reason: e.to_string(),
            })?;
            Ok(inner.captures_len())
        }
        _ => Ok(1),
    }
}

/// Escaped literal where internal whitespace matches any whitespace run.
fn phrase_regex(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+")
}
