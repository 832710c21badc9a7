//! prompt composition: merges the optional system / static / user fragments
//! into the single `prompt` string sent to the generate endpoint.
//!
//! which fragments are present (after trimming) forms a 3-bit code; the code
//! indexes a fixed layout table, so every combination is spelled out once.

use std::fmt;

/// returned (as text) when every fragment is empty; callers must not send it.
pub const NO_PROMPT: &str = "No prompt provided";

pub const SYSTEM_PREFIX: &str = "Treat this as a system prompt:\n";
pub const USER_PREFIX: &str = "Treat this as a user prompt:\n";

/// which fragments carry non-whitespace text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Presence {
    pub system: bool,
    pub static_: bool,
    pub user: bool,
}

impl Presence {
    pub fn of(system: &str, static_: &str, user: &str) -> Self {
        Self {
            system: !system.trim().is_empty(),
            static_: !static_.trim().is_empty(),
            user: !user.trim().is_empty(),
        }
    }

    /// `system` is the high bit, `user` the low bit.
    pub fn code(self) -> usize {
        (usize::from(self.system) << 2) | (usize::from(self.static_) << 1) | usize::from(self.user)
    }
}

/// output of [`compose`]. `NoPrompt` is a signal, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComposedPrompt {
    NoPrompt,
    Text(String),
}

impl ComposedPrompt {
    pub fn as_str(&self) -> &str {
        match self {
            ComposedPrompt::NoPrompt => NO_PROMPT,
            ComposedPrompt::Text(t) => t,
        }
    }

    pub fn is_sendable(&self) -> bool {
        matches!(self, ComposedPrompt::Text(_))
    }

    /// the prompt text, or `None` for the sentinel.
    pub fn into_text(self) -> Option<String> {
        match self {
            ComposedPrompt::NoPrompt => None,
            ComposedPrompt::Text(t) => Some(t),
        }
    }
}

impl fmt::Display for ComposedPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Layout {
    NoPrompt,
    User,
    Static,
    StaticThenUser,
    System,
    FramedUser,
    FramedStatic,
    FramedStaticThenUser,
}

// indexed by `Presence::code()`
const LAYOUTS: [Layout; 8] = [
    Layout::NoPrompt,             // 0 0 0
    Layout::User,                 // 0 0 1
    Layout::Static,               // 0 1 0
    Layout::StaticThenUser,       // 0 1 1
    Layout::System,               // 1 0 0
    Layout::FramedUser,           // 1 0 1
    Layout::FramedStatic,         // 1 1 0
    Layout::FramedStaticThenUser, // 1 1 1
];

fn framed(system: &str, body: &str) -> String {
    format!("{SYSTEM_PREFIX}{system}\n{USER_PREFIX}{body}")
}

/// compose the outbound prompt. `None` and whitespace-only fragments count as
/// absent; present fragments are used trimmed.
pub fn compose(system: Option<&str>, static_: Option<&str>, user: Option<&str>) -> ComposedPrompt {
    let system = system.unwrap_or_default().trim();
    let static_ = static_.unwrap_or_default().trim();
    let user = user.unwrap_or_default().trim();

    let text = match LAYOUTS[Presence::of(system, static_, user).code()] {
        Layout::NoPrompt => return ComposedPrompt::NoPrompt,
        Layout::User => user.to_string(),
        Layout::Static => static_.to_string(),
        Layout::StaticThenUser => format!("{static_}\n{user}"),
        Layout::System => system.to_string(),
        Layout::FramedUser => framed(system, user),
        Layout::FramedStatic => framed(system, static_),
        Layout::FramedStaticThenUser => framed(system, &format!("{static_}\n\n{user}")),
    };
    ComposedPrompt::Text(text)
}

/// single-field front ends: always the user-only layout, even when empty.
pub fn compose_user_only(user: &str) -> ComposedPrompt {
    ComposedPrompt::Text(user.trim().to_string())
}
