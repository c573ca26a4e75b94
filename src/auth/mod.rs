//! Credential loading for the Converse API
//!
//! Loads previously stored OAuth2 credentials from disk and hands the access
//! token to the gRPC layer as an opaque bearer token. Token issuance and
//! refresh are handled by an external tool; this client only consumes an
//! already-valid token and fails fast when none is available.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Credential loading errors, surfaced before any turn starts.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials file not found at {0}; run the authorization tool first")]
    CredentialsNotFound(String),

    #[error("failed to read credentials: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed credentials file: {0}")]
    Malformed(String),

    #[error("stored credentials contain no access token")]
    MissingToken,
}

/// Stored OAuth2 credentials as written by the authorization tool.
///
/// Only the access token is consumed here; the refresh fields are carried so
/// a round-trip through this type does not lose them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

impl StoredCredentials {
    /// Parse credentials from their JSON representation.
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        serde_json::from_str(json).map_err(|e| AuthError::Malformed(e.to_string()))
    }

    /// The opaque bearer token, or an error when the file holds none.
    pub fn bearer_token(&self) -> Result<&str, AuthError> {
        if self.access_token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        Ok(&self.access_token)
    }
}

/// Load stored credentials from the given path.
pub fn load_credentials(path: &Path) -> Result<StoredCredentials, AuthError> {
    if !path.exists() {
        return Err(AuthError::CredentialsNotFound(path.display().to_string()));
    }
    let contents = std::fs::read_to_string(path)?;
    StoredCredentials::from_json(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credentials() {
        let json = r#"{"access_token": "ya29.token", "refresh_token": "1/refresh"}"#;
        let creds = StoredCredentials::from_json(json).unwrap();
        assert_eq!(creds.bearer_token().unwrap(), "ya29.token");
        assert_eq!(creds.refresh_token.as_deref(), Some("1/refresh"));
    }

    #[test]
    fn test_missing_token_rejected() {
        let creds = StoredCredentials::from_json(r#"{"refresh_token": "1/r"}"#).unwrap();
        assert!(matches!(creds.bearer_token(), Err(AuthError::MissingToken)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            StoredCredentials::from_json("not json"),
            Err(AuthError::Malformed(_))
        ));
    }

    #[test]
    fn test_missing_file_reported_with_path() {
        let err = load_credentials(Path::new("/nonexistent/creds.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/creds.json"));
    }
}
