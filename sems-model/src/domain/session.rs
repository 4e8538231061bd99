use std::fmt;

use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};

/// A live SEMS Portal login.
///
/// The portal hands out an opaque token object together with the regional API
/// root that must be used for every following request. It never reports an
/// expiry, so the session carries a locally computed one.
#[derive(Clone, PartialEq)]
pub struct Session {
    pub token: Map<String, Value>,
    pub api_base: String,
    pub obtained_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl Session {
    pub fn new(
        token: Map<String, Value>,
        api_base: impl Into<String>,
        obtained_at: OffsetDateTime,
        max_age: Duration,
    ) -> Self {
        Self {
            token,
            api_base: api_base.into(),
            obtained_at,
            expires_at: obtained_at.saturating_add(max_age),
        }
    }

    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }

    /// Value of the `token` header for authenticated calls.
    ///
    /// The portal expects the login payload echoed back with the API root
    /// under the `api` key.
    pub fn token_header(&self) -> String {
        let mut token = self.token.clone();
        token.insert("api".to_string(), Value::String(self.api_base.clone()));
        Value::Object(token).to_string()
    }

    /// Join a relative API path onto the regional API root.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("uid", &self.token.get("uid"))
            .field("api_base", &self.api_base)
            .field("obtained_at", &self.obtained_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
