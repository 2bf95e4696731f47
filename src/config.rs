//! Configuration management for the telemetry sender

use crate::auth::{Authentication, DEFAULT_AUTH_BASE_URL, DEFAULT_REFRESH_FALLBACK};
use crate::pipeline::{
    DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_BUFFER_SIZE, PipelineConfig,
};
use crate::throttle::{DEFAULT_THROTTLE_SLEEP, ThrottlePolicy};
use crate::transport::DEFAULT_CONNECT_TIMEOUT;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_PROXY_HOST: &str = "localhost";
pub const DEFAULT_METRICS_PORT: u16 = 2878;
pub const DEFAULT_TRACING_PORT: u16 = 30001;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Where batches are delivered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Endpoint {
    /// HTTP POST per batch, to the service or an HTTP-speaking proxy
    Http {
        server_url: String,
        /// Spans and span logs go here when set, otherwise to `server_url`
        traces_url: Option<String>,
    },

    /// Newline-delimited TCP streams to a proxy
    Stream {
        host: String,
        metrics_port: u16,
        /// Histograms go here when set, otherwise to `metrics_port`
        distribution_port: Option<u16>,
        tracing_port: u16,
    },
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::Http {
            server_url: format!("http://{}:{}", DEFAULT_PROXY_HOST, DEFAULT_METRICS_PORT),
            traces_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Delivery destination
    pub endpoint: Endpoint,

    /// Credentials for direct ingestion
    pub authentication: Authentication,

    /// Maximum lines per delivered batch
    pub batch_size: usize,

    /// Maximum lines buffered per data kind
    pub max_buffer_size: usize,

    /// Period of the background flush
    pub flush_interval: Duration,

    /// Pause after the remote service signals overload
    pub throttle_sleep: Duration,

    /// Timeout for each HTTP request
    pub http_timeout: Duration,

    /// Timeout for establishing a proxy stream
    pub connect_timeout: Duration,

    /// Wait before retrying a failed or unusable token refresh
    pub token_refresh_fallback: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            authentication: Authentication::None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            throttle_sleep: DEFAULT_THROTTLE_SLEEP,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            token_refresh_fallback: DEFAULT_REFRESH_FALLBACK,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source. Unparsable values are ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(host) = lookup("PROXY_HOST") {
            config.endpoint = Endpoint::Stream {
                host,
                metrics_port: parse(&lookup, "PROXY_METRICS_PORT").unwrap_or(DEFAULT_METRICS_PORT),
                distribution_port: parse(&lookup, "PROXY_DISTRIBUTION_PORT"),
                tracing_port: parse(&lookup, "PROXY_TRACING_PORT").unwrap_or(DEFAULT_TRACING_PORT),
            };
        } else if let Some(url) = lookup("SENDER_URL") {
            let (server_url, token) = match split_url_token(&url) {
                Some((server_url, token)) => (server_url, Some(token)),
                None => (url, None),
            };
            if let Some(token) = token {
                config.authentication = Authentication::ApiToken { token };
            }
            config.endpoint = Endpoint::Http {
                server_url,
                traces_url: lookup("SENDER_TRACES_URL"),
            };
        }

        let auth_base_url = lookup("CSP_BASE_URL").unwrap_or_else(|| DEFAULT_AUTH_BASE_URL.to_string());

        if let (Some(client_id), Some(client_secret)) =
            (lookup("CSP_CLIENT_ID"), lookup("CSP_CLIENT_SECRET"))
        {
            config.authentication = Authentication::ClientCredentials {
                base_url: auth_base_url,
                client_id,
                client_secret,
                org_id: lookup("CSP_ORG_ID"),
            };
        } else if let Some(token) = lookup("CSP_API_TOKEN") {
            config.authentication = Authentication::ServiceApiToken {
                base_url: auth_base_url,
                token,
            };
        } else if let Some(token) = lookup("SENDER_API_TOKEN") {
            config.authentication = Authentication::ApiToken { token };
        }

        if let Some(size) = parse(&lookup, "BATCH_SIZE") {
            config.batch_size = size;
        }

        if let Some(size) = parse(&lookup, "MAX_BUFFER_SIZE") {
            config.max_buffer_size = size;
        }

        if let Some(ms) = parse::<u64, _>(&lookup, "FLUSH_INTERVAL_MS") {
            config.flush_interval = Duration::from_millis(ms);
        }

        if let Some(seconds) = parse::<u64, _>(&lookup, "THROTTLE_SLEEP_SECONDS") {
            config.throttle_sleep = Duration::from_secs(seconds);
        }

        if let Some(seconds) = parse::<u64, _>(&lookup, "HTTP_TIMEOUT_SECONDS") {
            config.http_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = parse::<u64, _>(&lookup, "CONNECT_TIMEOUT_SECONDS") {
            config.connect_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = parse::<u64, _>(&lookup, "TOKEN_REFRESH_FALLBACK_SECONDS") {
            config.token_refresh_fallback = Duration::from_secs(seconds);
        }

        config
    }

    /// Direct ingestion to `server_url`. An API token given as URL userinfo
    /// (`https://TOKEN@host`) becomes the authentication.
    pub fn direct(server_url: &str) -> Self {
        let mut config = Config::default();
        match split_url_token(server_url) {
            Some((url, token)) => {
                config.endpoint = Endpoint::Http {
                    server_url: url,
                    traces_url: None,
                };
                config.authentication = Authentication::ApiToken { token };
            }
            None => {
                config.endpoint = Endpoint::Http {
                    server_url: server_url.to_string(),
                    traces_url: None,
                };
            }
        }
        config
    }

    /// Settings shared by every pipeline before kind-specific policy is applied
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            batch_size: self.batch_size,
            max_buffer_size: self.max_buffer_size,
            flush_interval: self.flush_interval,
            throttle_sleep: self.throttle_sleep,
            throttle_policy: ThrottlePolicy::SkipTick,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }

        if self.max_buffer_size == 0 {
            return Err("max_buffer_size must be greater than 0".to_string());
        }

        if self.flush_interval.is_zero() {
            return Err("flush_interval must be greater than 0".to_string());
        }

        if self.http_timeout.is_zero() {
            return Err("http_timeout must be greater than 0".to_string());
        }

        match &self.endpoint {
            Endpoint::Http {
                server_url,
                traces_url,
            } => {
                validate_url("server_url", server_url)?;
                if let Some(traces_url) = traces_url {
                    validate_url("traces_url", traces_url)?;
                }
            }
            Endpoint::Stream {
                host,
                metrics_port,
                distribution_port,
                tracing_port,
            } => {
                if host.is_empty() {
                    return Err("proxy host cannot be empty".to_string());
                }
                if *metrics_port == 0 || *tracing_port == 0 || *distribution_port == Some(0) {
                    return Err("proxy ports must be greater than 0".to_string());
                }
                if !self.authentication.is_none() {
                    return Err("authentication requires an HTTP endpoint".to_string());
                }
            }
        }

        match &self.authentication {
            Authentication::None => {}
            Authentication::ApiToken { token } => {
                if token.is_empty() {
                    return Err("API token cannot be empty".to_string());
                }
            }
            Authentication::ClientCredentials {
                base_url,
                client_id,
                client_secret,
                ..
            } => {
                validate_url("authentication base_url", base_url)?;
                if client_id.is_empty() || client_secret.is_empty() {
                    return Err("client_id and client_secret cannot be empty".to_string());
                }
            }
            Authentication::ServiceApiToken { base_url, token } => {
                validate_url("authentication base_url", base_url)?;
                if token.is_empty() {
                    return Err("service API token cannot be empty".to_string());
                }
            }
        }

        Ok(())
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|value| value.trim().parse().ok())
}

fn validate_url(name: &str, value: &str) -> Result<(), String> {
    let url = Url::parse(value).map_err(|err| format!("{} is not a valid URL: {}", name, err))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(format!("{} has unsupported scheme {}", name, scheme)),
    }
}

/// Split `https://TOKEN@host` into the bare URL and the token
fn split_url_token(value: &str) -> Option<(String, String)> {
    let mut url = Url::parse(value).ok()?;
    let token = url.username().to_string();
    if token.is_empty() {
        return None;
    }

    url.set_username("").ok()?;
    url.set_password(None).ok()?;
    Some((url.as_str().trim_end_matches('/').to_string(), token))
}
