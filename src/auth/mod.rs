//! Authorization material for outbound HTTP requests

mod refresh;
mod token;

pub use refresh::{
    DEFAULT_REFRESH_FALLBACK, REFRESH_MARGIN, TokenRefresher, calculate_refresh_interval,
};
pub use token::{DEFAULT_AUTH_BASE_URL, Grant, TokenClient, TokenError};

use crate::errors::Result;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How the sender authenticates, as configured
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Authentication {
    /// Proxy mode: no credential is attached
    #[default]
    None,

    /// Long-lived ingestion token sent as-is
    ApiToken { token: String },

    /// Client id/secret exchanged for short-lived access tokens
    ClientCredentials {
        base_url: String,
        client_id: String,
        client_secret: String,
        org_id: Option<String>,
    },

    /// Service API token exchanged for short-lived access tokens
    ServiceApiToken { base_url: String, token: String },
}

impl Authentication {
    pub fn is_none(&self) -> bool {
        matches!(self, Authentication::None)
    }
}

/// A credential value and when it stops being valid
#[derive(Clone, PartialEq)]
pub struct Credential {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// A credential that never expires
    pub fn permanent(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn expiring_at(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }

    /// A credential valid for `ttl` from now. A lifetime too large to
    /// represent as a timestamp is treated as permanent; a negative one that
    /// underflows is already expired.
    pub fn expiring_in(value: impl Into<String>, ttl: TimeDelta) -> Self {
        let now = Utc::now();
        match now.checked_add_signed(ttl) {
            Some(expires_at) => Self::expiring_at(value, expires_at),
            None if ttl < TimeDelta::zero() => Self::expiring_at(value, now),
            None => Self::permanent(value),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Remaining lifetime, negative once expired. `None` for permanent credentials.
    pub fn ttl(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.expires_at.map(|expires_at| expires_at - now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Attaches credentials to requests. Shared by every HTTP transport of a sender.
#[derive(Debug, Clone, Default)]
pub enum CredentialProvider {
    #[default]
    None,
    Static(Credential),
    Dynamic(Arc<TokenRefresher>),
}

impl CredentialProvider {
    /// Build the provider for a configured authentication method.
    ///
    /// Dynamic providers start their refresh task immediately, so this must be
    /// called from within a Tokio runtime.
    pub fn from_authentication(
        authentication: &Authentication,
        http_timeout: Duration,
        refresh_fallback: Duration,
    ) -> Result<Self> {
        let (base_url, grant) = match authentication {
            Authentication::None => {
                info!("Sending through a proxy, no credentials attached");
                return Ok(CredentialProvider::None);
            }
            Authentication::ApiToken { token } => {
                info!("Direct ingestion authenticated with an API token");
                return Ok(CredentialProvider::Static(Credential::permanent(token.clone())));
            }
            Authentication::ClientCredentials {
                base_url,
                client_id,
                client_secret,
                org_id,
            } => {
                info!("Direct ingestion authenticated with client credentials");
                (
                    base_url,
                    Grant::ClientCredentials {
                        client_id: client_id.clone(),
                        client_secret: client_secret.clone(),
                        org_id: org_id.clone(),
                    },
                )
            }
            Authentication::ServiceApiToken { base_url, token } => {
                info!("Direct ingestion authenticated with a service API token");
                (base_url, Grant::ApiToken { token: token.clone() })
            }
        };

        let client = TokenClient::new(base_url.clone(), grant, http_timeout)?;
        let refresher = Arc::new(TokenRefresher::new(client, refresh_fallback));
        refresher.start();

        Ok(CredentialProvider::Dynamic(refresher))
    }

    pub fn static_token(token: impl Into<String>) -> Self {
        CredentialProvider::Static(Credential::permanent(token))
    }

    /// Whether requests go straight to the service rather than through a proxy
    pub fn is_direct(&self) -> bool {
        !matches!(self, CredentialProvider::None)
    }

    /// Attach `Authorization: Bearer <token>` when a credential is configured
    pub async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        match self {
            CredentialProvider::None => Ok(request),
            CredentialProvider::Static(credential) => Ok(request.bearer_auth(credential.value())),
            CredentialProvider::Dynamic(refresher) => {
                let token = refresher.token().await?;
                Ok(request.bearer_auth(token))
            }
        }
    }

    /// Stop background refresh, if any
    pub async fn close(&self) {
        if let CredentialProvider::Dynamic(refresher) = self {
            refresher.close().await;
        }
    }
}
