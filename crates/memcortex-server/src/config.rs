//! Server configuration.
//!
//! Covers protocol version pinning, WebSocket pool limits, rate-limit
//! defaults, auth requirements, scheduler strategy selection, analytics
//! flush interval, and AI provider auto-detection. Loadable
//! programmatically via the builder or from the environment via the
//! `config` crate.

use std::time::Duration;

use config::{Config, Environment};
use memcortex_protocol::MCP_PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};

/// Collect the process environment into a `config` source, tolerant of
/// type coercion failures on individual keys (each caller reads its own
/// keys with `get`/`get_string` and treats a miss as "not overridden").
fn load_env() -> Config {
    Config::builder()
        .add_source(Environment::default().try_parsing(true))
        .build()
        .unwrap_or_else(|_| Config::builder().build().expect("an empty config source set always builds"))
}

/// Default maximum concurrent WebSocket connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Default rate limit, in requests per second.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// Default analytics flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Which concurrency strategy the request scheduler (C4) runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerStrategy {
    /// Bounded queue with a fixed worker pool.
    WorkerPool,
    /// Size/timeout-triggered batching.
    Batch,
    /// N stages connected by channels.
    Pipeline,
}

impl Default for SchedulerStrategy {
    fn default() -> Self {
        Self::WorkerPool
    }
}

/// LLM provider selection, auto-detected from the environment when unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    /// Anthropic Claude.
    Claude,
    /// OpenAI.
    OpenAi,
    /// Perplexity.
    Perplexity,
    /// Deterministic mock, used when no provider key is configured.
    Mock,
}

impl AiProvider {
    /// Auto-detect from `AI_PROVIDER`, falling back to whichever
    /// provider's API key is present, priority claude > openai >
    /// perplexity > mock.
    pub fn detect_from_env() -> Self {
        Self::detect_from(&load_env())
    }

    fn detect_from(cfg: &Config) -> Self {
        if let Ok(value) = cfg.get_string("ai_provider") {
            return match value.to_lowercase().as_str() {
                "claude" => Self::Claude,
                "openai" => Self::OpenAi,
                "perplexity" => Self::Perplexity,
                _ => Self::Mock,
            };
        }
        if cfg.get_string("claude_api_key").is_ok() {
            Self::Claude
        } else if cfg.get_string("openai_api_key").is_ok() {
            Self::OpenAi
        } else if cfg.get_string("perplexity_api_key").is_ok() {
            Self::Perplexity
        } else {
            Self::Mock
        }
    }
}

/// Protocol version negotiation configuration.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Version this server reports and prefers.
    pub version: String,
    /// Reject connections that request a different version.
    pub strict: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: MCP_PROTOCOL_VERSION.to_string(),
            strict: false,
        }
    }
}

/// WebSocket connection pool limits.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum concurrent connections admitted.
    pub max_connections: usize,
    /// Interval between server-initiated pings.
    pub ping_interval: Duration,
    /// How long to wait for a pong before treating the peer as dead.
    pub pong_timeout: Duration,
    /// Maximum inbound frame size, in bytes.
    pub max_message_size: usize,
    /// Whether connections must authenticate before `initialize`.
    pub enable_auth: bool,
    /// Origins allowed to open a connection. Empty means unrestricted.
    pub allowed_origins: Vec<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            max_message_size: 10 * 1024 * 1024,
            enable_auth: true,
            allowed_origins: Vec::new(),
        }
    }
}

/// Rate-limit defaults handed to the [`crate::middleware::rate_limit::RateLimiterRegistry`].
#[derive(Debug, Clone)]
pub struct RateLimitDefaults {
    /// Sustained requests per second.
    pub requests_per_second: u32,
    /// Burst capacity above the sustained rate.
    pub burst: u32,
    /// How long an idle identifier's bucket survives before eviction.
    pub bucket_ttl: Duration,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_RATE_LIMIT,
            burst: DEFAULT_RATE_LIMIT * 2,
            bucket_ttl: Duration::from_secs(300),
        }
    }
}

/// Authentication requirements.
#[derive(Debug, Clone, Default)]
pub struct AuthRequirements {
    /// Require a valid credential (JWT or API key) on every request.
    pub required: bool,
    /// Accept JWT bearer tokens.
    pub allow_jwt: bool,
    /// Accept API keys.
    pub allow_api_key: bool,
}

/// AI provider configuration, auto-detected unless overridden.
#[derive(Debug, Clone)]
pub struct AiProviderConfig {
    /// Selected provider.
    pub provider: AiProvider,
    /// API key for the selected provider, if any.
    pub api_key: Option<String>,
    /// Override base URL for the selected provider, if any.
    pub base_url: Option<String>,
    /// Override model identifier for the selected provider, if any.
    pub model: Option<String>,
}

impl AiProviderConfig {
    fn from_env() -> Self {
        Self::from_config(&load_env())
    }

    fn from_config(cfg: &Config) -> Self {
        let provider = AiProvider::detect_from(cfg);
        let prefix = match provider {
            AiProvider::Claude => "claude",
            AiProvider::OpenAi => "openai",
            AiProvider::Perplexity => "perplexity",
            AiProvider::Mock => {
                return Self {
                    provider,
                    api_key: None,
                    base_url: None,
                    model: None,
                };
            }
        };
        Self {
            provider,
            api_key: cfg.get_string(&format!("{prefix}_api_key")).ok(),
            base_url: cfg.get_string(&format!("{prefix}_base_url")).ok(),
            model: cfg.get_string(&format!("{prefix}_model")).ok(),
        }
    }
}

impl Default for AiProviderConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::Mock,
            api_key: None,
            base_url: None,
            model: None,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Protocol version negotiation.
    pub protocol: ProtocolConfig,
    /// WebSocket pool limits.
    pub websocket: WebSocketConfig,
    /// Rate-limit defaults.
    pub rate_limit: RateLimitDefaults,
    /// Auth requirements.
    pub auth: AuthRequirements,
    /// Which scheduler strategy to run.
    pub scheduler_strategy: SchedulerStrategy,
    /// How often the analytics engine flushes pending counters.
    pub analytics_flush_interval: Duration,
    /// AI provider selection and credentials.
    pub ai_provider: AiProviderConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            websocket: WebSocketConfig::default(),
            rate_limit: RateLimitDefaults::default(),
            auth: AuthRequirements::default(),
            scheduler_strategy: SchedulerStrategy::default(),
            analytics_flush_interval: DEFAULT_FLUSH_INTERVAL,
            ai_provider: AiProviderConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a builder.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Load configuration from the environment: defaults form the base
    /// layer, a `config::Environment` source overlays any keys present
    /// in the process environment (`MAX_CONNECTIONS`, `PING_INTERVAL_SECS`,
    /// `PONG_TIMEOUT_SECS`, `MAX_MESSAGE_SIZE`, `ENABLE_AUTH`,
    /// `ALLOWED_ORIGINS`, `REQUESTS_PER_SECOND`, `REQUIRE_AUTH`,
    /// `SCHEDULER_STRATEGY`, `ANALYTICS_FLUSH_INTERVAL_SECS`), and the AI
    /// provider is auto-detected per [`AiProvider::detect_from_env`].
    pub fn from_env() -> Self {
        let cfg = load_env();
        let mut config = Self::default();

        if let Ok(value) = cfg.get::<usize>("max_connections") {
            config.websocket.max_connections = value;
        }
        if let Ok(value) = cfg.get::<u64>("ping_interval_secs") {
            config.websocket.ping_interval = Duration::from_secs(value);
        }
        if let Ok(value) = cfg.get::<u64>("pong_timeout_secs") {
            config.websocket.pong_timeout = Duration::from_secs(value);
        }
        if let Ok(value) = cfg.get::<usize>("max_message_size") {
            config.websocket.max_message_size = value;
        }
        if let Ok(value) = cfg.get::<bool>("enable_auth") {
            config.websocket.enable_auth = value;
        }
        if let Ok(value) = cfg.get_string("allowed_origins") {
            config.websocket.allowed_origins =
                value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        }
        if let Ok(value) = cfg.get::<u32>("requests_per_second") {
            config.rate_limit.requests_per_second = value;
            config.rate_limit.burst = value * 2;
        }
        if let Ok(value) = cfg.get::<bool>("require_auth") {
            config.auth.required = value;
        }
        if let Ok(value) = cfg.get_string("scheduler_strategy") {
            config.scheduler_strategy = match value.to_lowercase().as_str() {
                "batch" => SchedulerStrategy::Batch,
                "pipeline" => SchedulerStrategy::Pipeline,
                _ => SchedulerStrategy::WorkerPool,
            };
        }
        if let Ok(value) = cfg.get::<u64>("analytics_flush_interval_secs") {
            config.analytics_flush_interval = Duration::from_secs(value);
        }

        config.ai_provider = AiProviderConfig::from_config(&cfg);
        config
    }
}

/// Errors surfaced by [`ServerConfigBuilder::try_build`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigValidationError {
    /// `max_message_size` was set below the minimum viable frame size.
    #[error("max_message_size {size} is below the minimum of {min} bytes")]
    InvalidMessageSize {
        /// The configured size.
        size: usize,
        /// Minimum allowed size.
        min: usize,
    },

    /// The WebSocket pool was configured with zero capacity.
    #[error("max_connections must be non-zero")]
    InvalidConnectionLimit,

    /// The rate limit was configured to admit nothing.
    #[error("requests_per_second must be non-zero")]
    InvalidRateLimit,
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone, Default)]
pub struct ServerConfigBuilder {
    protocol: Option<ProtocolConfig>,
    websocket: Option<WebSocketConfig>,
    rate_limit: Option<RateLimitDefaults>,
    auth: Option<AuthRequirements>,
    scheduler_strategy: Option<SchedulerStrategy>,
    analytics_flush_interval: Option<Duration>,
    ai_provider: Option<AiProviderConfig>,
}

impl ServerConfigBuilder {
    /// Set protocol version negotiation.
    pub fn protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Set WebSocket pool limits.
    pub fn websocket(mut self, websocket: WebSocketConfig) -> Self {
        self.websocket = Some(websocket);
        self
    }

    /// Set rate-limit defaults.
    pub fn rate_limit(mut self, rate_limit: RateLimitDefaults) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Set auth requirements.
    pub fn auth(mut self, auth: AuthRequirements) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Set the scheduler strategy.
    pub fn scheduler_strategy(mut self, strategy: SchedulerStrategy) -> Self {
        self.scheduler_strategy = Some(strategy);
        self
    }

    /// Set the analytics flush interval.
    pub fn analytics_flush_interval(mut self, interval: Duration) -> Self {
        self.analytics_flush_interval = Some(interval);
        self
    }

    /// Set AI provider configuration directly, bypassing auto-detection.
    pub fn ai_provider(mut self, ai_provider: AiProviderConfig) -> Self {
        self.ai_provider = Some(ai_provider);
        self
    }

    /// Build with defaults for unset fields. Always succeeds.
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            protocol: self.protocol.unwrap_or_default(),
            websocket: self.websocket.unwrap_or_default(),
            rate_limit: self.rate_limit.unwrap_or_default(),
            auth: self.auth.unwrap_or_default(),
            scheduler_strategy: self.scheduler_strategy.unwrap_or_default(),
            analytics_flush_interval: self.analytics_flush_interval.unwrap_or(DEFAULT_FLUSH_INTERVAL),
            ai_provider: self.ai_provider.unwrap_or_default(),
        }
    }

    /// Build with validation.
    pub fn try_build(self) -> Result<ServerConfig, ConfigValidationError> {
        let websocket = self.websocket.clone().unwrap_or_default();
        if websocket.max_message_size < 1024 {
            return Err(ConfigValidationError::InvalidMessageSize {
                size: websocket.max_message_size,
                min: 1024,
            });
        }
        if websocket.max_connections == 0 {
            return Err(ConfigValidationError::InvalidConnectionLimit);
        }

        let rate_limit = self.rate_limit.clone().unwrap_or_default();
        if rate_limit.requests_per_second == 0 {
            return Err(ConfigValidationError::InvalidRateLimit);
        }

        Ok(self.build())
    }
}
