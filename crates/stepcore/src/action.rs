use serde::{Deserialize, Serialize};
use std::fmt;

/// Label returned by a node's post phase and used to pick its successor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    /// Label used when post returns no action.
    pub const DEFAULT: &'static str = "default";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Normalize an optional post result: `None` becomes `"default"`.
    pub fn from_option(action: Option<Action>) -> Self {
        action.unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl Default for Action {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Action {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

impl From<String> for Action {
    fn from(label: String) -> Self {
        Self(label)
    }
}

impl PartialEq<str> for Action {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Action {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_action_is_default() {
        assert_eq!(Action::from_option(None), "default");
        assert!(Action::from_option(None).is_default());
        assert_eq!(Action::from_option(Some("approved".into())), "approved");
    }
}
