//! Passthrough credentials forwarded to tool providers on behalf of a user.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One provider credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassthroughCredential {
    pub token: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl fmt::Debug for PassthroughCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassthroughCredential")
            .field("token", &"[REDACTED]")
            .field("kind", &self.kind)
            .finish()
    }
}

/// Credentials keyed by provider, sent with `execute_tool_with_auth`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassthroughAuthBundle {
    #[serde(default)]
    pub credentials: BTreeMap<String, PassthroughCredential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
}

impl PassthroughAuthBundle {
    /// Add a credential for `provider`
    #[must_use]
    pub fn with_token(mut self, provider: impl Into<String>, token: impl Into<String>) -> Self {
        self.credentials
            .insert(provider.into(), PassthroughCredential { token: token.into(), kind: None });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_tokens() {
        let bundle = PassthroughAuthBundle::default().with_token("github", "ghp_secret");
        let rendered = format!("{bundle:?}");
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_serializes_type_field() {
        let mut bundle = PassthroughAuthBundle::default();
        bundle.credentials.insert(
            "gitlab".into(),
            PassthroughCredential { token: "t".into(), kind: Some("pat".into()) },
        );
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["credentials"]["gitlab"]["type"], "pat");
        assert!(json.get("session_id").is_none());
    }
}
