//! Client construction options.
//!
//! # Design
//! Everything that can be wrong with a configuration is rejected by
//! `ClientBuilder::build`, before any request is made: a missing token with
//! no refresh callback, a blank token, or an unknown environment name read
//! from the process environment.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::client::GeocachingClient;
use crate::environment::{Environment, EnvironmentSettings};
use crate::error::{GeocachingError, Result};
use crate::http::Transport;
use crate::retry::BackoffPolicy;
use crate::settings::Settings;

/// Per-request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

pub const ENV_TOKEN: &str = "GEOCACHING_TOKEN";
pub const ENV_ENVIRONMENT: &str = "GEOCACHING_ENVIRONMENT";
pub const ENV_TIMEOUT_SECS: &str = "GEOCACHING_TIMEOUT_SECS";
pub const ENV_TRACKABLES: &str = "GEOCACHING_TRACKABLES";

/// Supplies a fresh bearer token. Called before every request attempt.
pub trait TokenRefresh: Send + Sync {
    fn refresh(&self) -> Result<String>;
}

impl<F> TokenRefresh for F
where
    F: Fn() -> Result<String> + Send + Sync,
{
    fn refresh(&self) -> Result<String> {
        self()
    }
}

pub(crate) type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Builder for `GeocachingClient`.
pub struct ClientBuilder {
    pub(crate) token: Option<String>,
    pub(crate) environment: Environment,
    pub(crate) environment_settings: Option<EnvironmentSettings>,
    pub(crate) request_timeout: Duration,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) token_refresh: Option<Arc<dyn TokenRefresh>>,
    pub(crate) settings: Settings,
    pub(crate) connection_retry: BackoffPolicy,
    pub(crate) rate_limit_retry: BackoffPolicy,
    pub(crate) sleeper: Sleeper,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("environment", &self.environment)
            .field("environment_settings", &self.environment_settings)
            .field("request_timeout", &self.request_timeout)
            .field("external_transport", &self.transport.is_some())
            .field("token_refresh", &self.token_refresh.is_some())
            .field("settings", &self.settings)
            .field("connection_retry", &self.connection_retry)
            .field("rate_limit_retry", &self.rate_limit_retry)
            .finish()
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            token: None,
            environment: Environment::default(),
            environment_settings: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            transport: None,
            token_refresh: None,
            settings: Settings::default(),
            connection_retry: BackoffPolicy::connection(),
            rate_limit_retry: BackoffPolicy::rate_limit(),
            sleeper: Arc::new(std::thread::sleep),
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read options from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read options through `lookup`, using the `GEOCACHING_*` names.
    /// Unset variables keep their defaults.
    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::new();
        if let Some(token) = lookup(ENV_TOKEN) {
            builder = builder.token(token);
        }
        if let Some(name) = lookup(ENV_ENVIRONMENT) {
            builder = builder.environment(name.parse()?);
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                GeocachingError::Config(format!(
                    "{ENV_TIMEOUT_SECS} is not a number of seconds: {raw:?}"
                ))
            })?;
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(list) = lookup(ENV_TRACKABLES) {
            builder = builder.settings(Settings::from_code_list(&list));
        }
        Ok(builder)
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Target an explicit endpoint instead of a named environment.
    pub fn environment_settings(mut self, settings: EnvironmentSettings) -> Self {
        self.environment_settings = Some(settings);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Use a caller-owned transport. The client never releases it.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn token_refresh(mut self, refresh: impl TokenRefresh + 'static) -> Self {
        self.token_refresh = Some(Arc::new(refresh));
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn connection_retry(mut self, policy: BackoffPolicy) -> Self {
        self.connection_retry = policy;
        self
    }

    pub fn rate_limit_retry(mut self, policy: BackoffPolicy) -> Self {
        self.rate_limit_retry = policy;
        self
    }

    /// Replace the function used to wait between retries.
    pub fn sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<GeocachingClient> {
        match (&self.token, &self.token_refresh) {
            (None, None) => {
                return Err(GeocachingError::Config(
                    "a bearer token or a token refresh callback is required".to_string(),
                ))
            }
            (Some(token), None) if token.trim().is_empty() => {
                return Err(GeocachingError::Config("bearer token is empty".to_string()))
            }
            _ => {}
        }
        if self.request_timeout.is_zero() {
            return Err(GeocachingError::Config("request timeout must be positive".to_string()));
        }
        Ok(GeocachingClient::from_builder(self))
    }
}
