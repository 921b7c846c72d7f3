use std::fmt::{Display, Formatter};
use std::time::Duration;

use url::Url;

use crate::{Error, PitrResult};

const DEFAULT_ENDPOINT: &str = "https://spanner.googleapis.com/";

/// The fully qualified name of a Spanner database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabasePath {
    pub project: String,
    pub instance: String,
    pub database: String,
}

impl Display for DatabasePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "projects/{}/instances/{}/databases/{}",
            self.project, self.instance, self.database
        )
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Url,
    pub database: DatabasePath,
    pub token: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl ClientConfig {
    pub fn builder(
        project: impl Into<String>,
        instance: impl Into<String>,
        database: impl Into<String>,
    ) -> ClientConfigBuilder {
        ClientConfigBuilder::new(project, instance, database)
    }

    /// Delay before retry number `attempt` (starting at 1).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        (self.retry_base_delay * attempt).min(self.retry_max_delay)
    }
}

pub struct ClientConfigBuilder {
    project: String,
    instance: String,
    database: String,
    endpoint: Option<String>,
    token: Option<String>,
    timeout: Duration,
    connect_timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

impl ClientConfigBuilder {
    pub fn new(
        project: impl Into<String>,
        instance: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            instance: instance.into(),
            database: database.into(),
            endpoint: None,
            token: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(10),
        }
    }

    /// Base URL of the REST API. A value without a scheme is taken to be `https`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Talk to the Spanner emulator's REST port at `host` (e.g. `localhost:9020`) over plain
    /// http, as `SPANNER_EMULATOR_HOST` is usually set.
    pub fn emulator_host(mut self, host: impl AsRef<str>) -> Self {
        self.endpoint = Some(format!("http://{}", host.as_ref()));
        self
    }

    /// OAuth2 bearer token sent with every request. The emulator needs none.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    pub fn build(self) -> PitrResult<ClientConfig> {
        for (what, value) in [
            ("project", &self.project),
            ("instance", &self.instance),
            ("database", &self.database),
        ] {
            if value.is_empty() || value.contains('/') {
                return Err(Error::invalid_configuration(format!(
                    "Invalid {what} id: '{value}'"
                )));
            }
        }

        let endpoint = self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };
        let mut endpoint = Url::parse(&endpoint)?;
        if !endpoint.path().ends_with('/') {
            endpoint.set_path(&format!("{}/", endpoint.path()));
        }

        Ok(ClientConfig {
            endpoint,
            database: DatabasePath {
                project: self.project,
                instance: self.instance,
                database: self.database,
            },
            token: self.token,
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
            max_retries: self.max_retries,
            retry_base_delay: self.retry_base_delay,
            retry_max_delay: self.retry_max_delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::builder("p", "i", "d").build().unwrap();
        assert_eq!(config.endpoint.as_str(), "https://spanner.googleapis.com/");
        assert_eq!(
            config.database.to_string(),
            "projects/p/instances/i/databases/d"
        );
        assert_eq!(config.token, None);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_endpoints() {
        let config = ClientConfig::builder("p", "i", "d")
            .emulator_host("localhost:9020")
            .build()
            .unwrap();
        assert_eq!(config.endpoint.as_str(), "http://localhost:9020/");

        let config = ClientConfig::builder("p", "i", "d")
            .endpoint("spanner.example.com/api")
            .build()
            .unwrap();
        assert_eq!(config.endpoint.as_str(), "https://spanner.example.com/api/");
    }

    #[test]
    fn test_invalid_ids() {
        assert!(ClientConfig::builder("", "i", "d").build().is_err());
        assert!(ClientConfig::builder("p", "i/x", "d").build().is_err());
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let config = ClientConfig::builder("p", "i", "d")
            .retry_delays(Duration::from_secs(4), Duration::from_secs(10))
            .build()
            .unwrap();
        assert_eq!(config.retry_delay(1), Duration::from_secs(4));
        assert_eq!(config.retry_delay(3), Duration::from_secs(10));
    }
}
