//! Engine configuration (Configuration record, §3).
//!
//! `GENUI_*` environment variables override the corresponding option when set,
//! following the teacher's `OPEN_AGENT_*` convention.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::rate_limit::RateLimitConfig;
use crate::{Error, Result};
use std::env;
use std::time::Duration;

/// Direct-to-LLM vs via-proxy routing, per §4.8.
#[derive(Debug, Clone)]
pub enum DispatchMode {
    Direct { api_key: String },
    Proxy { endpoint: String, auth_token: Option<String> },
}

#[derive(Debug, Clone)]
pub struct DeduplicationConfig {
    pub window: Duration,
    pub max_cache_size: usize,
    pub hash_messages: bool,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_cache_size: 1000,
            hash_messages: true,
        }
    }
}

/// Full set of recognized runtime options, one record per dispatcher.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: DispatchMode,
    pub model: Option<String>,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub temperature: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
    pub include_history: bool,
    pub max_history_messages: Option<usize>,
    pub circuit_breaker_config: CircuitBreakerConfig,
    pub disable_circuit_breaker: bool,
    pub rate_limit_config: RateLimitConfig,
    pub deduplication_config: DeduplicationConfig,
    pub enable_tool_search: bool,
    pub max_loaded_tools_per_session: usize,
    pub stream_inactivity_timeout: Duration,
}

impl Config {
    pub fn builder(mode: DispatchMode) -> ConfigBuilder {
        ConfigBuilder::new(mode)
    }
}

/// Fluent, validate-on-build configuration builder.
pub struct ConfigBuilder {
    mode: DispatchMode,
    model: Option<String>,
    max_tokens: u32,
    timeout: Duration,
    retry_attempts: u32,
    top_p: Option<f32>,
    top_k: Option<u32>,
    temperature: Option<f32>,
    stop_sequences: Option<Vec<String>>,
    include_history: bool,
    max_history_messages: Option<usize>,
    circuit_breaker_config: CircuitBreakerConfig,
    disable_circuit_breaker: bool,
    rate_limit_config: RateLimitConfig,
    deduplication_config: DeduplicationConfig,
    enable_tool_search: bool,
    max_loaded_tools_per_session: usize,
    stream_inactivity_timeout: Duration,
}

impl ConfigBuilder {
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            mode,
            model: None,
            max_tokens: 4096,
            timeout: Duration::from_secs(60),
            retry_attempts: 3,
            top_p: None,
            top_k: None,
            temperature: None,
            stop_sequences: None,
            include_history: true,
            max_history_messages: None,
            circuit_breaker_config: CircuitBreakerConfig::default(),
            disable_circuit_breaker: false,
            rate_limit_config: RateLimitConfig::default(),
            deduplication_config: DeduplicationConfig::default(),
            enable_tool_search: false,
            max_loaded_tools_per_session: 50,
            stream_inactivity_timeout: Duration::from_secs(30),
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn stop_sequences(mut self, sequences: Vec<String>) -> Self {
        self.stop_sequences = Some(sequences);
        self
    }

    pub fn include_history(mut self, include: bool) -> Self {
        self.include_history = include;
        self
    }

    pub fn max_history_messages(mut self, max: usize) -> Self {
        self.max_history_messages = Some(max);
        self
    }

    pub fn circuit_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker_config = config;
        self
    }

    pub fn disable_circuit_breaker(mut self, disable: bool) -> Self {
        self.disable_circuit_breaker = disable;
        self
    }

    pub fn rate_limit_config(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit_config = config;
        self
    }

    pub fn deduplication_config(mut self, config: DeduplicationConfig) -> Self {
        self.deduplication_config = config;
        self
    }

    pub fn enable_tool_search(mut self, enable: bool) -> Self {
        self.enable_tool_search = enable;
        self
    }

    pub fn max_loaded_tools_per_session(mut self, max: usize) -> Self {
        self.max_loaded_tools_per_session = max;
        self
    }

    pub fn stream_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.stream_inactivity_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Config> {
        if self.max_tokens == 0 {
            return Err(Error::config("max_tokens must be greater than zero"));
        }
        if let DispatchMode::Direct { api_key } = &self.mode {
            if api_key.trim().is_empty() {
                return Err(Error::config("Direct mode requires a non-empty api_key"));
            }
        }
        if let DispatchMode::Proxy { endpoint, .. } = &self.mode {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(Error::config("proxyEndpoint must start with http:// or https://"));
            }
        }

        let mode = resolve_mode_env(self.mode);

        Ok(Config {
            mode,
            model: self.model.or_else(|| env::var("GENUI_MODEL").ok()),
            max_tokens: self.max_tokens,
            timeout: self.timeout,
            retry_attempts: self.retry_attempts,
            top_p: self.top_p,
            top_k: self.top_k,
            temperature: self.temperature,
            stop_sequences: self.stop_sequences,
            include_history: self.include_history,
            max_history_messages: self.max_history_messages,
            circuit_breaker_config: self.circuit_breaker_config,
            disable_circuit_breaker: self.disable_circuit_breaker,
            rate_limit_config: self.rate_limit_config,
            deduplication_config: self.deduplication_config,
            enable_tool_search: self.enable_tool_search,
            max_loaded_tools_per_session: self.max_loaded_tools_per_session,
            stream_inactivity_timeout: self.stream_inactivity_timeout,
        })
    }
}

fn resolve_mode_env(mode: DispatchMode) -> DispatchMode {
    if let Ok(endpoint) = env::var("GENUI_PROXY_ENDPOINT") {
        let auth_token = env::var("GENUI_PROXY_AUTH_TOKEN").ok();
        return DispatchMode::Proxy { endpoint, auth_token };
    }
    match mode {
        DispatchMode::Direct { api_key } => DispatchMode::Direct {
            api_key: env::var("GENUI_API_KEY").unwrap_or(api_key),
        },
        other => other,
    }
}
