//! Typed session identifier.
//!
//! Session ids are operator-chosen strings (they name per-client log files),
//! so unlike database ids they wrap a `String`. [`SessionId::generate`] gives
//! a random one when the configuration does not name the session.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one streaming session (one simulated client).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Derive the id of the `index`-th session started from this one.
    #[must_use]
    pub fn nth(&self, index: usize) -> Self {
        Self(format!("{}-{}", self.0, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::generate()
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_nth() {
        let base = SessionId::from("client");
        assert_eq!(base.nth(3).as_str(), "client-3");
    }

    #[test]
    fn test_serde_transparent() {
        let id = SessionId::from("abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""abc""#);
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
