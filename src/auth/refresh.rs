//! Background refresh of short-lived access tokens

use super::token::{TokenClient, TokenError};
use super::Credential;
use crate::errors::{Result, SenderError};
use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tokens are refreshed no later than this long before they expire
pub const REFRESH_MARGIN: Duration = Duration::from_secs(180);

/// Wait used when the token lifetime is unusable or a refresh failed
pub const DEFAULT_REFRESH_FALLBACK: Duration = Duration::from_secs(60);

/// Time until the next refresh for a token with `ttl` left.
///
/// Subtracts the smaller of [`REFRESH_MARGIN`] and 5% of the lifetime, so
/// long-lived tokens refresh about three minutes before expiry and short-lived
/// ones proportionally earlier. Lifetimes at or under the margin get `fallback`.
pub fn calculate_refresh_interval(ttl: TimeDelta, fallback: Duration) -> Duration {
    let ttl_secs = ttl.num_seconds();
    let margin_secs = REFRESH_MARGIN.as_secs() as i64;

    if ttl_secs - margin_secs <= 0 {
        return fallback;
    }

    let proportional = ttl_secs.saturating_mul(95) / 100;
    Duration::from_secs(proportional.max(ttl_secs - margin_secs) as u64)
}

/// Caches an access token and keeps it fresh on a computed schedule
#[derive(Debug)]
pub struct TokenRefresher {
    client: TokenClient,
    fallback: Duration,
    credential: RwLock<Option<Credential>>,
    refresh_lock: Mutex<()>,
    cancel: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TokenRefresher {
    pub fn new(client: TokenClient, fallback: Duration) -> Self {
        Self {
            client,
            fallback,
            credential: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Spawn the refresh loop. Calling it again while running does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() || self.cancel.is_cancelled() {
            return;
        }

        let refresher = Arc::clone(self);
        *task = Some(tokio::spawn(async move { refresher.run().await }));
    }

    async fn run(self: Arc<Self>) {
        let mut next = self.initial_interval().await;

        loop {
            debug!("Next token refresh in {:?}", next);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(next) => {}
            }

            next = match self.refresh().await {
                Ok(interval) => interval,
                Err(err) => {
                    warn!("Token refresh failed, retrying in {:?}: {}", self.fallback, err);
                    self.fallback
                }
            };
        }

        debug!("Token refresh task stopped");
    }

    /// Interval before the first scheduled refresh. Fetches now unless an
    /// `authorize` call already did.
    async fn initial_interval(&self) -> Duration {
        let _guard = self.refresh_lock.lock().await;

        let ttl = self
            .credential
            .read()
            .await
            .as_ref()
            .and_then(|credential| credential.ttl(Utc::now()));
        if let Some(ttl) = ttl {
            if ttl > TimeDelta::zero() {
                return calculate_refresh_interval(ttl, self.fallback);
            }
        }

        match self.refresh_locked().await {
            Ok(interval) => interval,
            Err(err) => {
                warn!("Initial token fetch failed, retrying in {:?}: {}", self.fallback, err);
                self.fallback
            }
        }
    }

    /// Fetch a new token now and return the interval until the next refresh
    pub async fn refresh(&self) -> Result<Duration> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<Duration> {
        match self.client.fetch().await {
            Ok(credential) => {
                let ttl = credential.ttl(Utc::now());
                *self.credential.write().await = Some(credential);

                match ttl {
                    Some(ttl) => {
                        info!("Access token refreshed, valid for {}s", ttl.num_seconds());
                        Ok(calculate_refresh_interval(ttl, self.fallback))
                    }
                    None => {
                        info!("Access token refreshed with no usable expiry");
                        Ok(self.fallback)
                    }
                }
            }
            Err(TokenError::Rejected(msg)) => {
                *self.credential.write().await = None;
                Err(TokenError::Rejected(msg).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Current cached credential, if any
    pub async fn current(&self) -> Option<Credential> {
        self.credential.read().await.clone()
    }

    /// A usable token: the cached one while it is valid, otherwise a freshly fetched one
    pub async fn token(&self) -> Result<String> {
        if let Some(token) = self.valid_token().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(token) = self.valid_token().await {
            return Ok(token);
        }

        self.refresh_locked().await?;
        self.valid_token()
            .await
            .ok_or_else(|| SenderError::Auth("received an already expired token".to_string()))
    }

    async fn valid_token(&self) -> Option<String> {
        let credential = self.credential.read().await;
        credential
            .as_ref()
            .filter(|credential| !credential.is_expired(Utc::now()))
            .map(|credential| credential.value().to_string())
    }

    /// Stop the refresh loop and wait for it to exit
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("Token refresh task ended abnormally: {}", err);
            }
        }
    }
}
