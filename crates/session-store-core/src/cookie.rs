//! Identifier cookie description and the cookie I/O contract.

use serde::{Deserialize, Serialize};

/// An outgoing cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lifetime in seconds. Zero makes a browser-session cookie.
    pub ttl: u64,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    /// Session cookie for an identifier: no expiry, path `/`, neither secure
    /// nor http-only.
    #[must_use]
    pub fn session(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ttl: 0,
            path: "/".to_string(),
            domain,
            secure: false,
            http_only: false,
        }
    }
}

/// Request-scoped cookie I/O.
pub trait CookieJar: Send + Sync {
    /// Value of an incoming cookie.
    fn get(&self, name: &str) -> Option<String>;

    /// Queue a cookie to be sent to the client.
    fn set(&self, cookie: &Cookie);

    /// Remove a cookie from the client.
    fn delete(&self, name: &str);
}
