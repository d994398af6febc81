use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, URL-safe playback credential.
///
/// Carries no stream identity: the binding lives server-side and can only be
/// recovered by lookup.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaybackToken(String);

impl PlaybackToken {
    #[must_use]
    pub const fn from_string(token: String) -> Self {
        Self(token)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Short prefix safe to put in logs.
    #[must_use]
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

/// Log-safe prefix of an arbitrary token string.
#[must_use]
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{prefix}…")
}

impl fmt::Debug for PlaybackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PlaybackToken").field(&self.redacted()).finish()
    }
}

impl fmt::Display for PlaybackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-side record a token resolves to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBinding {
    pub stream_id: String,
    pub viewer_id: Option<String>,
    /// Unix timestamp (seconds)
    pub issued_at: i64,
}

/// Result of a successful issuance
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: PlaybackToken,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_output_is_redacted() {
        let token = PlaybackToken::from_string("abcdefghijklmnopqrstuvwxyz".to_string());
        let debug = format!("{token:?}");
        assert!(debug.contains("abcdef"));
        assert!(!debug.contains("ghijkl"));
    }

    #[test]
    fn test_binding_json_shape() {
        let binding = TokenBinding {
            stream_id: "stream-001".to_string(),
            viewer_id: Some("viewer-9".to_string()),
            issued_at: 1_700_000_000,
        };
        let json = serde_json::to_value(&binding).unwrap();
        assert_eq!(json["stream_id"], "stream-001");
        assert_eq!(json["viewer_id"], "viewer-9");
    }
}
