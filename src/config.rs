//! Poller configuration from environment variables

use crate::ingest::retry::RetryPolicy;
use std::env;

/// Configuration for the poller binary.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Tracked symbols, polled in this order every cycle
    pub symbols: Vec<String>,

    /// Poll period in seconds
    pub poll_interval_secs: u64,

    /// Quote API base URL
    pub quote_api_url: String,

    /// Kafka bootstrap servers
    pub kafka_bootstrap: String,

    /// Topic carrying PriceEvents
    pub topic: String,

    /// Retry policy for failed publish acknowledgments
    pub retry_policy: RetryPolicy,
}

impl PollerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SYMBOLS` (comma-separated, default: SNOW,AMZN,GOOGL,MSFT)
    /// - `POLL_INTERVAL_SECS` (default: 30)
    /// - `QUOTE_API_URL` (default: https://query1.finance.yahoo.com)
    /// - `KAFKA_BOOTSTRAP` (default: localhost:9092)
    /// - `QUOTES_TOPIC` (default: quotes.v1)
    /// - `PUBLISH_RETRY` (none | fixed:N | backoff[:initial,max,retries],
    ///   default: none)
    pub fn from_env() -> Self {
        let symbols = env::var("SYMBOLS")
            .map(|s| {
                s.split(',')
                    .map(|sym| sym.trim().to_string())
                    .filter(|sym| !sym.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| {
                vec![
                    "SNOW".to_string(),
                    "AMZN".to_string(),
                    "GOOGL".to_string(),
                    "MSFT".to_string(),
                ]
            });

        Self {
            symbols,

            poll_interval_secs: env::var("POLL_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            quote_api_url: env::var("QUOTE_API_URL")
                .unwrap_or_else(|_| "https://query1.finance.yahoo.com".to_string()),

            kafka_bootstrap: env::var("KAFKA_BOOTSTRAP")
                .unwrap_or_else(|_| "localhost:9092".to_string()),

            topic: env::var("QUOTES_TOPIC").unwrap_or_else(|_| "quotes.v1".to_string()),

            retry_policy: env::var("PUBLISH_RETRY")
                .ok()
                .and_then(|s| RetryPolicy::parse(&s))
                .unwrap_or(RetryPolicy::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poller_config_defaults_and_overrides() {
        env::remove_var("SYMBOLS");
        env::remove_var("POLL_INTERVAL_SECS");
        env::remove_var("QUOTE_API_URL");
        env::remove_var("KAFKA_BOOTSTRAP");
        env::remove_var("QUOTES_TOPIC");
        env::remove_var("PUBLISH_RETRY");

        let config = PollerConfig::from_env();
        assert_eq!(config.symbols, vec!["SNOW", "AMZN", "GOOGL", "MSFT"]);
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.quote_api_url, "https://query1.finance.yahoo.com");
        assert_eq!(config.kafka_bootstrap, "localhost:9092");
        assert_eq!(config.topic, "quotes.v1");
        assert_eq!(config.retry_policy, RetryPolicy::None);

        env::set_var("SYMBOLS", "AAPL, TSLA ,,NVDA");
        env::set_var("POLL_INTERVAL_SECS", "10");
        env::set_var("QUOTE_API_URL", "http://localhost:8099");
        env::set_var("KAFKA_BOOTSTRAP", "kafka:9092");
        env::set_var("QUOTES_TOPIC", "quotes.test");
        env::set_var("PUBLISH_RETRY", "fixed:3");

        let config = PollerConfig::from_env();
        assert_eq!(config.symbols, vec!["AAPL", "TSLA", "NVDA"]);
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.quote_api_url, "http://localhost:8099");
        assert_eq!(config.kafka_bootstrap, "kafka:9092");
        assert_eq!(config.topic, "quotes.test");
        assert_eq!(config.retry_policy, RetryPolicy::Fixed { attempts: 3 });

        // Unparseable policy falls back to the default
        env::set_var("PUBLISH_RETRY", "whenever");
        let config = PollerConfig::from_env();
        assert_eq!(config.retry_policy, RetryPolicy::None);

        env::remove_var("SYMBOLS");
        env::remove_var("POLL_INTERVAL_SECS");
        env::remove_var("QUOTE_API_URL");
        env::remove_var("KAFKA_BOOTSTRAP");
        env::remove_var("QUOTES_TOPIC");
        env::remove_var("PUBLISH_RETRY");
    }
}
