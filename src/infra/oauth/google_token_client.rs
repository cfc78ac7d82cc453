// OAuth 2.0 token-endpoint client for user credentials (authorization_code
// and refresh_token grants). This is the half of the provider boundary that
// the Google-wrapping scripts used to each carry a private copy of.
//
// Classification contract: 400/401/403 from the token endpoint mean the
// grant itself is bad (revoked consent, invalid_grant, bad client) and map
// to PermanentAuth; timeouts, connection errors, 408/429 and 5xx map to
// Transient so the manager's backoff loop can have a go at them.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::core::auth::retry::ProviderError;
use crate::core::auth::{CredentialRecord, TokenGrant, TokenProvider};

/// Everything needed to talk to one OAuth provider. Defaults point at
/// Google since that is what the surrounding automation targets, but nothing
/// here is Google-specific.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_uri: String,
    pub auth_uri: String,
    pub redirect_uri: String,
    /// Scopes requested at interactive consent time.
    pub scopes: Vec<String>,
}

impl Default for OAuthClientConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            auth_uri: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            redirect_uri: "http://localhost".to_string(),
            scopes: Vec::new(),
        }
    }
}

/// Wire format of a successful token-endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Space-separated per RFC 6749.
    #[serde(default)]
    scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

/// Wire format of an RFC 6749 error response.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub(crate) fn grant_from(response: TokenResponse) -> TokenGrant {
    TokenGrant {
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        expires_in_secs: response.expires_in,
        scopes: response
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
    }
}

/// Map a non-success token-endpoint response onto the two error classes.
pub(crate) fn classify_response(status: u16, body: &str) -> ProviderError {
    let detail = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) => match err.error_description {
            Some(desc) => format!("{} ({desc})", err.error),
            None => err.error,
        },
        Err(_) => format!("HTTP {status}"),
    };

    match status {
        408 | 429 => ProviderError::Transient(detail),
        400 | 401 | 403 => ProviderError::PermanentAuth(detail),
        s if s >= 500 => ProviderError::Transient(detail),
        _ => ProviderError::Transient(format!("unexpected token endpoint response: {detail}")),
    }
}

pub(crate) fn map_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Transient("token endpoint request timed out".to_string())
    } else {
        ProviderError::Transient(err.to_string())
    }
}

pub struct GoogleTokenClient {
    client: Client,
    config: OAuthClientConfig,
}

impl GoogleTokenClient {
    pub fn new(config: OAuthClientConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// URL to open in a browser for interactive consent. `access_type=offline`
    /// plus `prompt=consent` is what makes Google hand back a refresh token.
    pub fn consent_url(&self) -> Result<String, ProviderError> {
        let url = reqwest::Url::parse_with_params(
            &self.config.auth_uri,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", self.config.scopes.join(" ").as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| {
            ProviderError::PermanentAuth(format!(
                "invalid auth URI '{}': {e}",
                self.config.auth_uri
            ))
        })?;
        Ok(url.into())
    }

    async fn post_grant(&self, params: &[(&str, &str)]) -> Result<TokenGrant, ProviderError> {
        let response = self
            .client
            .post(&self.config.token_uri)
            .form(params)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if status.is_success() {
            let parsed: TokenResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Transient(format!("malformed token response: {e}")))?;
            return Ok(grant_from(parsed));
        }

        let body = response.text().await.unwrap_or_default();
        let err = classify_response(status.as_u16(), &body);
        tracing::debug!(status = status.as_u16(), class = ?err.class(), "token endpoint rejected grant");
        Err(err)
    }
}

#[async_trait]
impl TokenProvider for GoogleTokenClient {
    async fn refresh(&self, record: &CredentialRecord) -> Result<TokenGrant, ProviderError> {
        let refresh_token = record.refresh_token.as_deref().ok_or_else(|| {
            ProviderError::PermanentAuth("no refresh token on record".to_string())
        })?;

        self.post_grant(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        self.post_grant(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_grant_is_permanent() {
        let err = classify_response(
            400,
            r#"{"error":"invalid_grant","error_description":"Token has been revoked."}"#,
        );
        match err {
            ProviderError::PermanentAuth(msg) => {
                assert!(msg.contains("invalid_grant"));
                assert!(msg.contains("revoked"));
            }
            other => panic!("expected PermanentAuth, got {other:?}"),
        }
    }

    #[test]
    fn unauthorized_client_is_permanent() {
        assert!(matches!(
            classify_response(401, r#"{"error":"invalid_client"}"#),
            ProviderError::PermanentAuth(_)
        ));
    }

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        assert!(matches!(
            classify_response(429, ""),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            classify_response(503, "upstream unavailable"),
            ProviderError::Transient(_)
        ));
    }

    #[test]
    fn token_response_parses_google_shape() {
        let json = r#"{
            "access_token": "ya29.abc",
            "expires_in": 3599,
            "scope": "https://www.googleapis.com/auth/tasks https://www.googleapis.com/auth/blogger",
            "token_type": "Bearer"
        }"#;

        let grant = grant_from(serde_json::from_str(json).unwrap());
        assert_eq!(grant.access_token, "ya29.abc");
        assert_eq!(grant.expires_in_secs, 3599);
        assert!(grant.refresh_token.is_none());
        assert_eq!(grant.scopes.len(), 2);
    }

    #[test]
    fn consent_url_requests_offline_access() {
        let client = GoogleTokenClient::new(OAuthClientConfig {
            client_id: "my-client".to_string(),
            scopes: vec!["scope-a".to_string(), "scope-b".to_string()],
            ..Default::default()
        });

        let url = client.consent_url().unwrap();
        assert!(url.starts_with("https://accounts.google.com/"));
        assert!(url.contains("client_id=my-client"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));

        let parsed = reqwest::Url::parse(&url).unwrap();
        let scope = parsed
            .query_pairs()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(scope, "scope-a scope-b");
    }

    #[test]
    fn consent_url_escapes_every_parameter() {
        let client = GoogleTokenClient::new(OAuthClientConfig {
            client_id: "id with spaces&ampersand".to_string(),
            redirect_uri: "http://localhost:8080/callback?x=1".to_string(),
            scopes: vec!["https://www.googleapis.com/auth/tasks".to_string()],
            ..Default::default()
        });

        let url = client.consent_url().unwrap();
        // Raw reserved characters from the inputs must not survive into the
        // query string where they would split or corrupt parameters.
        let query = url.split_once('?').unwrap().1;
        assert!(!query.contains("x=1"));
        assert!(!query.contains(' '));

        let parsed = reqwest::Url::parse(&url).unwrap();
        let get = |key: &str| {
            parsed
                .query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
                .unwrap()
        };
        assert_eq!(get("client_id"), "id with spaces&ampersand");
        assert_eq!(get("redirect_uri"), "http://localhost:8080/callback?x=1");
        assert_eq!(get("scope"), "https://www.googleapis.com/auth/tasks");
    }

    #[test]
    fn consent_url_rejects_a_malformed_auth_uri() {
        let client = GoogleTokenClient::new(OAuthClientConfig {
            auth_uri: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            client.consent_url(),
            Err(ProviderError::PermanentAuth(_))
        ));
    }
}
