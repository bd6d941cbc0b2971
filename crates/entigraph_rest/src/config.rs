//! Client configuration.

use std::time::Duration;

/// Default number of commands per batch request.
pub const DEFAULT_BATCH_LIMIT: usize = 50;

/// Configuration for backend requests.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API endpoint, e.g. `https://api.example.com/1`.
    pub api_endpoint: String,
    /// Application identifier header value.
    pub application_id: String,
    /// Client key header value.
    pub client_key: String,
    /// Session token of the signed-in user.
    pub session_token: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
    /// Maximum commands per batch request.
    pub batch_limit: usize,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Creates a configuration for `api_endpoint`.
    pub fn new(
        api_endpoint: impl Into<String>,
        application_id: impl Into<String>,
        client_key: impl Into<String>,
    ) -> Self {
        Self {
            api_endpoint: api_endpoint.into().trim_end_matches('/').to_string(),
            application_id: application_id.into(),
            client_key: client_key.into(),
            session_token: None,
            timeout: Duration::from_secs(10),
            batch_limit: DEFAULT_BATCH_LIMIT,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the session token.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the batch limit. Zero is treated as one.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Absolute URL of `path`.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.api_endpoint, path.trim_start_matches('/'))
    }

    /// Path prefix batch commands use: the endpoint's URL path wrapped in
    /// slashes, e.g. `/1/` for `https://api.example.com/1`.
    pub fn batch_path_prefix(&self) -> String {
        let without_scheme = self
            .api_endpoint
            .split_once("://")
            .map_or(self.api_endpoint.as_str(), |(_, rest)| rest);
        let path = without_scheme
            .split_once('/')
            .map_or("", |(_, path)| path)
            .trim_matches('/');
        if path.is_empty() {
            "/".to_string()
        } else {
            format!("/{path}/")
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("", "", "")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // up to 25%
            let jitter = delay_secs * 0.25 * rand::random::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new("https://api.example.com/1/", "app", "key")
            .with_session_token("r:abc")
            .with_batch_limit(0)
            .with_timeout(Duration::from_secs(3));

        assert_eq!(config.api_endpoint, "https://api.example.com/1");
        assert_eq!(config.session_token.as_deref(), Some("r:abc"));
        assert_eq!(config.batch_limit, 1);
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(
            config.url_for("/classes/Game"),
            "https://api.example.com/1/classes/Game"
        );
    }

    #[test]
    fn batch_prefix_follows_endpoint_path() {
        assert_eq!(
            ClientConfig::new("https://api.example.com/1", "a", "k").batch_path_prefix(),
            "/1/"
        );
        assert_eq!(
            ClientConfig::new("https://host/parse/v2/", "a", "k").batch_path_prefix(),
            "/parse/v2/"
        );
        assert_eq!(
            ClientConfig::new("http://localhost:1337", "a", "k").batch_path_prefix(),
            "/"
        );
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn retry_config_exponential_backoff() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_millis(400))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let config = RetryConfig::new(3).with_initial_delay(Duration::from_millis(100));
        for _ in 0..20 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }
}
