//! Word → alternatives table consulted when patterns are compiled.

use std::collections::BTreeMap;

/// Registered synonyms, keyed by lowercase word.
///
/// Compiled patterns copy the alternatives they use, so later edits to a
/// table never change an already compiled pattern.
#[derive(Debug, Clone, Default)]
pub struct SynonymTable {
    words: BTreeMap<String, Vec<String>>,
}

impl SynonymTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `alternatives` for `word`, merging with earlier entries.
    ///
    /// Words are compared case-insensitively; blanks and duplicates are dropped.
    pub fn insert<I, S>(&mut self, word: &str, alternatives: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = normalize_word(word);
        if key.is_empty() {
            return;
        }
        let entry = self.words.entry(key.clone()).or_default();
        for alt in alternatives {
            let alt = normalize_word(alt.as_ref());
            if alt.is_empty() || alt == key || entry.contains(&alt) {
                continue;
            }
            entry.push(alt);
        }
    }

    /// Alternatives registered for `word` (without the word itself).
    pub fn alternatives(&self, word: &str) -> Option<&[String]> {
        self.words
            .get(&normalize_word(word))
            .map(Vec::as_slice)
            .filter(|alts| !alts.is_empty())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

fn normalize_word(word: &str) -> String {
    word.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_and_dedups_case_insensitively() {
        let mut table = SynonymTable::new();
        table.insert("Lights", ["lamp", "LAMP", " "]);
        table.insert("lights", ["bulbs", "lights"]);
        assert_eq!(
            table.alternatives("LIGHTS"),
            Some(&["lamp".to_string(), "bulbs".to_string()][..])
        );
        assert_eq!(table.alternatives("fan"), None);
    }

    #[test]
    fn word_without_alternatives_is_not_a_synonym() {
        let mut table = SynonymTable::new();
        table.insert("fan", Vec::<String>::new());
        assert_eq!(table.alternatives("fan"), None);
    }
}
