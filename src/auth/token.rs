//! Exchange of long-lived secrets for short-lived access tokens

use super::Credential;
use crate::errors::{Result, SenderError};
use crate::transport::http_client;
use chrono::TimeDelta;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_AUTH_BASE_URL: &str = "https://console.cloud.vmware.com/";

const CLIENT_CREDENTIALS_PATH: &str = "/csp/gateway/am/api/auth/authorize";
const API_TOKEN_PATH: &str = "/csp/gateway/am/api/auth/api-tokens/authorize";

/// What the sender presents to the authentication endpoint
#[derive(Clone, PartialEq)]
pub enum Grant {
    ClientCredentials {
        client_id: String,
        client_secret: String,
        org_id: Option<String>,
    },
    ApiToken {
        token: String,
    },
}

impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grant::ClientCredentials {
                client_id, org_id, ..
            } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .field("org_id", org_id)
                .finish_non_exhaustive(),
            Grant::ApiToken { .. } => f.debug_struct("ApiToken").finish_non_exhaustive(),
        }
    }
}

/// Why a token exchange failed
#[derive(Debug, Clone, PartialEq)]
pub enum TokenError {
    /// The endpoint refused the presented secret; cached tokens are no longer trusted
    Rejected(String),
    /// The endpoint could not be reached or answered unexpectedly
    Unavailable(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Rejected(msg) => write!(f, "credentials rejected: {}", msg),
            TokenError::Unavailable(msg) => write!(f, "token endpoint unavailable: {}", msg),
        }
    }
}

impl From<TokenError> for SenderError {
    fn from(err: TokenError) -> Self {
        SenderError::Auth(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Client for the authentication endpoint
#[derive(Debug, Clone)]
pub struct TokenClient {
    client: Client,
    base_url: String,
    grant: Grant,
}

impl TokenClient {
    pub fn new(base_url: impl Into<String>, grant: Grant, http_timeout: Duration) -> Result<Self> {
        let client = http_client(http_timeout)?;

        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            grant,
        })
    }

    /// Request a fresh access token
    pub async fn fetch(&self) -> std::result::Result<Credential, TokenError> {
        let request = match &self.grant {
            Grant::ClientCredentials {
                client_id,
                client_secret,
                org_id,
            } => {
                let mut form = vec![("grant_type", "client_credentials")];
                if let Some(org_id) = org_id {
                    form.push(("orgId", org_id.as_str()));
                }
                self.client
                    .post(format!("{}{}", self.base_url, CLIENT_CREDENTIALS_PATH))
                    .basic_auth(client_id, Some(client_secret))
                    .form(&form)
            }
            Grant::ApiToken { token } => self
                .client
                .post(format!("{}{}", self.base_url, API_TOKEN_PATH))
                .form(&[("grant_type", "api_token"), ("api_token", token.as_str())]),
        };

        let response = request
            .send()
            .await
            .map_err(|err| TokenError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let msg = format!("status {}: {}", status, body);
            return Err(if status.is_client_error() {
                TokenError::Rejected(msg)
            } else {
                TokenError::Unavailable(msg)
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| TokenError::Unavailable(format!("malformed token response: {}", err)))?;

        debug!("Obtained access token valid for {}s", token.expires_in);
        Ok(Credential::expiring_in(
            token.access_token,
            token_lifetime(token.expires_in),
        ))
    }
}

/// `expires_in` as a duration, saturating instead of overflowing
fn token_lifetime(expires_in: i64) -> TimeDelta {
    TimeDelta::try_seconds(expires_in).unwrap_or(if expires_in < 0 {
        TimeDelta::MIN
    } else {
        TimeDelta::MAX
    })
}
