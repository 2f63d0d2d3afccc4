use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream proxy description. Credentials stay inside the process boundary:
/// anything echoed outward goes through [`ProxySpec::redacted`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySpec {
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxySpec {
    /// Copy with credentials removed.
    pub fn redacted(&self) -> ProxySpec {
        ProxySpec {
            server: self.server.clone(),
            username: None,
            password: None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() || self.password.is_some()
    }
}

impl fmt::Debug for ProxySpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProxySpec")
            .field("server", &self.server)
            .field("username", &self.username.as_deref().map(|_| "<set>"))
            .field("password", &self.password.as_deref().map(|_| "<set>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_strips_credentials() {
        let proxy = ProxySpec {
            server: "http://proxy.example:8080".to_owned(),
            username: Some("user".to_owned()),
            password: Some("hunter2".to_owned()),
        };
        let redacted = proxy.redacted();
        assert_eq!(redacted.server, proxy.server);
        assert!(!redacted.has_credentials());
        assert!(!format!("{proxy:?}").contains("hunter2"));
    }
}
