use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{HttpClientError, Result};

/// Delay schedule applied between retry attempts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BackoffStrategy {
    /// The same `backoff_interval` before every retry.
    #[default]
    Constant,
    /// `backoff_interval * 2^retry`, capped at `max_delay` unless it is zero.
    Exponential { max_delay: Duration },
}

/// Configures the transport, timeouts and retry behavior of a
/// [`ResilientClient`](crate::ResilientClient).
///
/// Zero durations mean "not set" and leave the transport default in place.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClientConfig {
    /// TCP connect timeout.
    pub dial_timeout: Duration,
    /// Overall per-attempt timeout, from send until the body is read.
    pub read_timeout: Duration,
    /// TCP keep-alive probe interval.
    pub keep_alive: Duration,
    /// Base delay between a failed attempt and the next retry.
    pub backoff_interval: Duration,
    /// Additional attempts after the first transport failure.
    pub retry_count: u32,
    /// Delay schedule between retries.
    pub backoff: BackoffStrategy,
    /// How long an idle pooled connection is kept.
    pub pool_idle_timeout: Duration,
    /// Upper bound on idle pooled connections per host.
    pub pool_max_idle_per_host: Option<usize>,
    /// `User-Agent` header sent with every request.
    pub user_agent: Option<String>,
}

impl ClientConfig {
    /// Creates a config with every option disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the TCP connect timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets the per-attempt request timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the TCP keep-alive probe interval.
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Sets the base delay between retries.
    pub fn with_backoff_interval(mut self, interval: Duration) -> Self {
        self.backoff_interval = interval;
        self
    }

    /// Sets the number of additional attempts after a transport failure.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Sets the delay schedule between retries.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets how long idle pooled connections are kept.
    pub fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    /// Caps idle pooled connections per host.
    pub fn with_pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = Some(max);
        self
    }

    /// Sets the `User-Agent` header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Delay to wait before retry number `retry` (0 = first retry).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        match self.backoff {
            BackoffStrategy::Constant => self.backoff_interval,
            BackoffStrategy::Exponential { max_delay } => {
                let exp = retry.min(16);
                let delay = self.backoff_interval.saturating_mul(1u32 << exp);
                if max_delay.is_zero() {
                    delay
                } else {
                    delay.min(max_delay)
                }
            }
        }
    }

    /// Parses a TOML document.
    ///
    /// Keys are read from an `[http_client]` table when present, otherwise
    /// from the top level. Durations are integer milliseconds:
    ///
    /// ```
    /// use std::time::Duration;
    /// use resilient_http::ClientConfig;
    ///
    /// let config = ClientConfig::from_toml_str(
    ///     "[http_client]\nread_timeout_ms = 1500\nretry_count = 3\n",
    /// )
    /// .unwrap();
    /// assert_eq!(config.read_timeout, Duration::from_millis(1500));
    /// assert_eq!(config.retry_count, 3);
    /// ```
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let mut table: toml::Table = toml::from_str(input)
            .map_err(|err| HttpClientError::Configuration(format!("invalid TOML: {err}")))?;

        let section = match table.remove("http_client") {
            Some(toml::Value::Table(section)) => section,
            Some(_) => {
                return Err(HttpClientError::Configuration(
                    "`http_client` must be a table".to_owned(),
                ))
            }
            None => table,
        };

        let raw: RawConfig = toml::Value::Table(section)
            .try_into()
            .map_err(|err| HttpClientError::Configuration(format!("invalid client config: {err}")))?;
        raw.validate()
    }

    /// Reads and parses a TOML file, see [`ClientConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            HttpClientError::Configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    dial_timeout_ms: Option<i64>,
    read_timeout_ms: Option<i64>,
    keep_alive_ms: Option<i64>,
    backoff_interval_ms: Option<i64>,
    retry_count: Option<i64>,
    backoff: Option<RawBackoff>,
    max_backoff_ms: Option<i64>,
    pool_idle_timeout_ms: Option<i64>,
    pool_max_idle_per_host: Option<i64>,
    user_agent: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawBackoff {
    Constant,
    Exponential,
}

impl RawConfig {
    fn validate(self) -> Result<ClientConfig> {
        let max_backoff = millis("max_backoff_ms", self.max_backoff_ms)?;
        let backoff = match self.backoff {
            None | Some(RawBackoff::Constant) => BackoffStrategy::Constant,
            Some(RawBackoff::Exponential) => BackoffStrategy::Exponential {
                max_delay: max_backoff,
            },
        };

        let pool_max_idle_per_host = self
            .pool_max_idle_per_host
            .map(|value| {
                usize::try_from(value).map_err(|_| {
                    HttpClientError::Configuration(format!(
                        "pool_max_idle_per_host must not be negative, got {value}"
                    ))
                })
            })
            .transpose()?;

        Ok(ClientConfig {
            dial_timeout: millis("dial_timeout_ms", self.dial_timeout_ms)?,
            read_timeout: millis("read_timeout_ms", self.read_timeout_ms)?,
            keep_alive: millis("keep_alive_ms", self.keep_alive_ms)?,
            backoff_interval: millis("backoff_interval_ms", self.backoff_interval_ms)?,
            retry_count: count("retry_count", self.retry_count)?,
            backoff,
            pool_idle_timeout: millis("pool_idle_timeout_ms", self.pool_idle_timeout_ms)?,
            pool_max_idle_per_host,
            user_agent: self.user_agent,
        })
    }
}

fn millis(key: &str, value: Option<i64>) -> Result<Duration> {
    let Some(ms) = value else {
        return Ok(Duration::ZERO);
    };
    u64::try_from(ms)
        .map(Duration::from_millis)
        .map_err(|_| HttpClientError::Configuration(format!("{key} must not be negative, got {ms}")))
}

fn count(key: &str, value: Option<i64>) -> Result<u32> {
    let Some(n) = value else {
        return Ok(0);
    };
    u32::try_from(n).map_err(|_| {
        HttpClientError::Configuration(format!(
            "{key} must be between 0 and {}, got {n}",
            u32::MAX
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::{BackoffStrategy, ClientConfig};
    use crate::HttpClientError;

    #[test]
    fn default_disables_everything() {
        let config = ClientConfig::default();
        assert_eq!(config.dial_timeout, Duration::ZERO);
        assert_eq!(config.read_timeout, Duration::ZERO);
        assert_eq!(config.keep_alive, Duration::ZERO);
        assert_eq!(config.backoff_interval, Duration::ZERO);
        assert_eq!(config.retry_count, 0);
        assert_eq!(config.backoff, BackoffStrategy::Constant);
        assert_eq!(config.pool_max_idle_per_host, None);
    }

    #[test]
    fn constant_backoff_ignores_retry_number() {
        let config = ClientConfig::new().with_backoff_interval(Duration::from_millis(10));
        assert_eq!(config.backoff_delay(0), Duration::from_millis(10));
        assert_eq!(config.backoff_delay(7), Duration::from_millis(10));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let config = ClientConfig::new()
            .with_backoff_interval(Duration::from_millis(100))
            .with_backoff(BackoffStrategy::Exponential {
                max_delay: Duration::from_millis(500),
            });

        assert_eq!(config.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(500));
    }

    #[test]
    fn exponential_backoff_without_cap_clamps_exponent() {
        let config = ClientConfig::new()
            .with_backoff_interval(Duration::from_millis(1))
            .with_backoff(BackoffStrategy::Exponential {
                max_delay: Duration::ZERO,
            });

        assert_eq!(config.backoff_delay(16), Duration::from_millis(65_536));
        assert_eq!(config.backoff_delay(40), Duration::from_millis(65_536));
    }

    #[test]
    fn parses_http_client_section() {
        let config = ClientConfig::from_toml_str(
            r#"
            [http_client]
            dial_timeout_ms = 1000
            read_timeout_ms = 2000
            keep_alive_ms = 30000
            backoff_interval_ms = 250
            retry_count = 10
            backoff = "exponential"
            max_backoff_ms = 4000
            pool_idle_timeout_ms = 90000
            pool_max_idle_per_host = 16
            user_agent = "svc/1.0"
            "#,
        )
        .expect("config must parse");

        assert_eq!(config.dial_timeout, Duration::from_secs(1));
        assert_eq!(config.read_timeout, Duration::from_secs(2));
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert_eq!(config.backoff_interval, Duration::from_millis(250));
        assert_eq!(config.retry_count, 10);
        assert_eq!(
            config.backoff,
            BackoffStrategy::Exponential {
                max_delay: Duration::from_secs(4)
            }
        );
        assert_eq!(config.pool_idle_timeout, Duration::from_secs(90));
        assert_eq!(config.pool_max_idle_per_host, Some(16));
        assert_eq!(config.user_agent.as_deref(), Some("svc/1.0"));
    }

    #[test]
    fn parses_top_level_keys_and_defaults_the_rest() {
        let config = ClientConfig::from_toml_str("retry_count = 2\n").expect("config must parse");
        assert_eq!(config.retry_count, 2);
        assert_eq!(config.read_timeout, Duration::ZERO);
        assert_eq!(config.backoff, BackoffStrategy::Constant);
    }

    #[test]
    fn rejects_negative_duration() {
        let err = ClientConfig::from_toml_str("[http_client]\ndial_timeout_ms = -5\n")
            .expect_err("negative duration must fail");

        match err {
            HttpClientError::Configuration(message) => {
                assert!(message.contains("dial_timeout_ms"), "{message}");
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_negative_retry_count() {
        let err = ClientConfig::from_toml_str("retry_count = -1\n")
            .expect_err("negative retry count must fail");
        assert!(matches!(err, HttpClientError::Configuration(_)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = ClientConfig::from_toml_str("[http_client]\nretries = 3\n")
            .expect_err("unknown key must fail");
        assert!(matches!(err, HttpClientError::Configuration(_)));
    }

    #[test]
    fn rejects_non_table_section() {
        let err = ClientConfig::from_toml_str("http_client = 3\n")
            .expect_err("scalar section must fail");
        assert!(matches!(err, HttpClientError::Configuration(_)));
    }

    #[test]
    fn reads_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("must create temp file");
        writeln!(file, "[http_client]\nbackoff_interval_ms = 75").expect("must write config");

        let config = ClientConfig::from_file(file.path()).expect("config file must load");
        assert_eq!(config.backoff_interval, Duration::from_millis(75));
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let err = ClientConfig::from_file("/definitely/not/here.toml")
            .expect_err("missing file must fail");
        assert!(matches!(err, HttpClientError::Configuration(_)));
    }
}
