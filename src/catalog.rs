//! canned model names and prompt texts, keyed by short names.

use bevy::log::warn;

/// an ordered, immutable `key -> value` table.
#[derive(Clone, Copy, Debug)]
pub struct Catalog {
    entries: &'static [(&'static str, &'static str)],
}

impl Catalog {
    pub const fn new(entries: &'static [(&'static str, &'static str)]) -> Self {
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&'static str> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    pub fn entry(&self, index: usize) -> Option<(&'static str, &'static str)> {
        self.entries.get(index).copied()
    }

    pub fn position_of_value(&self, value: &str) -> Option<usize> {
        self.entries.iter().position(|(_, v)| *v == value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    pub fn values(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub const MODELS: Catalog = Catalog::new(&[
    ("LLAMA3_2", "llama3.2"),
    ("LLAMA3_1_8B", "llama3.1:8b"),
    ("LLAMA3_1_70B", "llama3.1:70b"),
    ("LLAMA3_1_405B", "llama3.1:405b"),
]);

pub const DEFAULT_MODEL: &str = "llama3.1:8b";

pub const SYSTEM_PROMPTS: Catalog = Catalog::new(&[
    ("DEFAULT", "You are a helpful, respectful and honest assistant."),
    ("ASSISTANT", "You are a helpful, respectful, and honest assistant."),
    (
        "USRPRO1",
        "You are a professional assistant helping a software engineering student.",
    ),
]);

pub const STATIC_PROMPTS: Catalog = Catalog::new(&[
    ("FIX", "Help me fix this."),
    ("SUMMARIZE", "Summarize this in 100 words or less."),
    ("EXPLAIN", "Explain this in simple terms."),
    ("TRANSLATE", "Translate this into English."),
    ("CODE", "Write code for this."),
    ("TEST", "Write a test for this."),
    ("DEBUG", "Debug this code."),
    ("OPTIMIZE", "Optimize this code."),
    ("REFACTOR", "Refactor this code."),
    ("DOCUMENT", "Document this code."),
    ("EXPAND", "Expand this into a full program."),
    ("SIMPLIFY", "Simplify this code."),
    ("EXPLORE", "Explore this topic."),
    ("RESEARCH", "Research this topic."),
]);

/// pick a model from a user choice: empty -> default, a number -> that
/// catalog index, a known model name -> itself, anything else -> default.
pub fn resolve_model(choice: Option<&str>) -> &'static str {
    let choice = match choice.map(str::trim) {
        None | Some("") => return DEFAULT_MODEL,
        Some(c) => c,
    };
    if let Ok(index) = choice.parse::<usize>() {
        if let Some((_, model)) = MODELS.entry(index) {
            return model;
        }
    } else if let Some(model) = MODELS.values().find(|m| *m == choice) {
        return model;
    } else if let Some(model) = MODELS.get(choice) {
        return model;
    }
    warn!(target: "bevy_ollama", "invalid model '{}', using default '{}'", choice, DEFAULT_MODEL);
    DEFAULT_MODEL
}
