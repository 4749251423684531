use std::sync::Arc;

use chrono::Duration;
use log::{debug, error, warn};
use thiserror::Error;

use crate::cache::{Cache, InMemoryCache};
use crate::context::Context;
use crate::eval::Evaluator;
use crate::fetch::{ApiResponse, Fetcher};
use crate::flag_value::FlagValue;

const DEFAULT_CACHE_TTL_SECS: i64 = 60;

/// Errors raised while building a [ClientConfig].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no SDK key provided")]
    EmptySdkKey,
}

/// Settings of a [Client]. Build one with [ClientConfigBuilder].
pub struct ClientConfig {
    sdk_key: String,
    cache_ttl: Option<Duration>,
    cache: Box<dyn Cache>,
}

impl ClientConfig {
    pub fn sdk_key(&self) -> &str {
        &self.sdk_key
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    /// The key under which the toggle payload of this SDK key is cached.
    pub fn cache_key(&self) -> String {
        format!("switchover_{}_toggles_v2", self.sdk_key)
    }
}

/// Builds a [ClientConfig].
///
/// ```
/// # use switchover_sdk::ClientConfigBuilder;
/// let config = ClientConfigBuilder::new("my-sdk-key")
///     .cache_ttl(Some(chrono::Duration::seconds(300)))
///     .build()
///     .unwrap();
/// assert_eq!(config.cache_key(), "switchover_my-sdk-key_toggles_v2");
///
/// assert!(ClientConfigBuilder::new("").build().is_err());
/// ```
pub struct ClientConfigBuilder {
    sdk_key: String,
    cache_ttl: Option<Duration>,
    cache: Option<Box<dyn Cache>>,
}

impl ClientConfigBuilder {
    pub fn new(sdk_key: impl Into<String>) -> Self {
        ClientConfigBuilder {
            sdk_key: sdk_key.into(),
            cache_ttl: Some(Duration::seconds(DEFAULT_CACHE_TTL_SECS)),
            cache: None,
        }
    }

    /// How long a fetched payload is served from the cache. None keeps it until [Client::refresh].
    pub fn cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Replace the default [InMemoryCache].
    pub fn cache(mut self, cache: Box<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        if self.sdk_key.is_empty() {
            return Err(ConfigError::EmptySdkKey);
        }
        Ok(ClientConfig {
            sdk_key: self.sdk_key,
            cache_ttl: self.cache_ttl,
            cache: self
                .cache
                .unwrap_or_else(|| Box::new(InMemoryCache::new())),
        })
    }
}

/// Client is the entry point for applications: it loads toggles through a [Fetcher], keeps them
/// in the configured [Cache] and evaluates them.
///
/// No method returns an error. Every evaluation or fetch failure is logged and answered with the
/// caller's default value.
pub struct Client {
    config: ClientConfig,
    fetcher: Arc<dyn Fetcher>,
    evaluator: Evaluator,
}

impl Client {
    pub fn new(config: ClientConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Client {
            config,
            fetcher,
            evaluator: Evaluator::default(),
        }
    }

    /// Returns the value of the toggle `name`, or `default` when the toggle is inactive, its
    /// conditions do not hold, the toggles cannot be loaded, or evaluation fails.
    pub fn toggle_value(&self, name: &str, default: FlagValue, context: Option<&Context>) -> FlagValue {
        let response = match self.load_toggles() {
            Some(response) => response,
            None => {
                error!("Toggle config is unavailable, will return default value");
                return default;
            }
        };

        match self
            .evaluator
            .evaluate(&response.payload, name, context, default.clone())
        {
            Ok(value) => value,
            Err(e) => {
                error!("{}. Will return default value", e);
                default
            }
        }
    }

    pub fn bool_value(&self, name: &str, default: bool, context: Option<&Context>) -> bool {
        self.toggle_value(name, default.into(), context)
            .as_bool()
            .unwrap_or(default)
    }

    pub fn str_value(&self, name: &str, default: &str, context: Option<&Context>) -> String {
        self.toggle_value(name, default.into(), context)
            .as_string()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn float_value(&self, name: &str, default: f64, context: Option<&Context>) -> f64 {
        self.toggle_value(name, default.into(), context)
            .as_float()
            .unwrap_or(default)
    }

    pub fn int_value(&self, name: &str, default: i64, context: Option<&Context>) -> i64 {
        let value = self.toggle_value(name, default.into(), context);
        value.as_int().unwrap_or_else(|| {
            warn!("toggle value is not an int but {:?}", value);
            default
        })
    }

    pub fn json_value(
        &self,
        name: &str,
        default: serde_json::Value,
        context: Option<&Context>,
    ) -> serde_json::Value {
        self.toggle_value(name, default.clone().into(), context)
            .as_json()
            .unwrap_or(default)
    }

    /// The names of all loaded toggles in payload order, or an empty list if none can be loaded.
    pub fn toggle_keys(&self) -> Vec<String> {
        self.load_toggles()
            .map(|response| response.toggle_names())
            .unwrap_or_default()
    }

    /// Fetch toggles now and overwrite the cached payload, regardless of its age.
    pub fn refresh(&self) {
        let cache_key = self.config.cache_key();
        let last_modified = self
            .config
            .cache
            .get(&cache_key)
            .and_then(|response| response.last_modified.clone());

        match self
            .fetcher
            .fetch_all(&self.config.sdk_key, last_modified.as_deref())
        {
            Ok(response) => {
                self.config
                    .cache
                    .set(&cache_key, Arc::new(response), self.config.cache_ttl);
            }
            Err(e) => error!("Refreshing failed! {}", e),
        }
    }

    fn load_toggles(&self) -> Option<Arc<ApiResponse>> {
        let cache_key = self.config.cache_key();
        if let Some(response) = self.config.cache.get(&cache_key) {
            return Some(response);
        }

        debug!("No cached toggles for {}, fetching", cache_key);
        match self.fetcher.fetch_all(&self.config.sdk_key, None) {
            Ok(response) => {
                let response = Arc::new(response);
                self.config
                    .cache
                    .set(&cache_key, response.clone(), self.config.cache_ttl);
                Some(response)
            }
            Err(e) => {
                error!("{}", e);
                None
            }
        }
    }
}
