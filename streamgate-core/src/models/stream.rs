use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::access::AllowedHostSet;

/// Caption track attached to a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
    pub language_code: String,
    pub label: String,
    pub caption_url: String,
}

/// Catalog record for one playable stream.
///
/// `origin_url` and `allowed_hosts` are edge-internal: they decide where the
/// relay may fetch from and must never be exposed to viewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub availability_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub availability_end: Option<DateTime<Utc>>,
    #[serde(default = "default_visible")]
    pub is_visible: bool,
    pub origin_url: Url,
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default)]
    pub captions: Vec<Caption>,
}

const fn default_visible() -> bool {
    true
}

impl Stream {
    /// A stream is available iff it is visible and `now` falls inside the
    /// (inclusive, optionally open-ended) availability window.
    #[must_use]
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        if !self.is_visible {
            return false;
        }
        if self.availability_start.is_some_and(|start| now < start) {
            return false;
        }
        if self.availability_end.is_some_and(|end| now > end) {
            return false;
        }
        true
    }

    /// Configured host patterns plus the origin's own hostname.
    #[must_use]
    pub fn allowed_host_set(&self) -> AllowedHostSet {
        let mut hosts = AllowedHostSet::new(self.allowed_hosts.iter().cloned());
        if let Some(origin_host) = self.origin_url.host_str() {
            hosts.insert(origin_host);
        }
        hosts
    }
}
