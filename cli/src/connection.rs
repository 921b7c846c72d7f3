use clap::Args;
use pitr_kernel::engine::spanner::{ClientConfig, SpannerEngine};
use tracing::info;

use crate::time::parse_duration;
use crate::CliError;

#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// Google Cloud project that owns the instance
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Spanner instance id
    #[arg(long, global = true)]
    pub instance: Option<String>,

    /// Spanner database id
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// OAuth2 access token, e.g. from `gcloud auth print-access-token`
    #[arg(long, env = "SPANNER_ACCESS_TOKEN", hide_env_values = true, global = true)]
    pub access_token: Option<String>,

    /// Host and port of a Spanner emulator's REST endpoint
    #[arg(long, env = "SPANNER_EMULATOR_HOST", global = true)]
    pub emulator_host: Option<String>,

    /// Spanner REST endpoint, when not using the public API. Takes precedence over the emulator
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Timeout for each read from the database, as an ISO-8601 duration
    #[arg(long, default_value = "PT30S", value_parser = parse_duration, global = true)]
    pub timeout: std::time::Duration,
}

impl ConnectionArgs {
    pub fn client_config(&self) -> Result<ClientConfig, CliError> {
        let required = |value: &Option<String>, flag: &str| {
            value
                .clone()
                .ok_or_else(|| CliError::InvalidArgument(format!("--{flag} is required")))
        };
        let mut builder = ClientConfig::builder(
            required(&self.project, "project")?,
            required(&self.instance, "instance")?,
            required(&self.database, "database")?,
        )
        .timeout(self.timeout);

        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint(endpoint);
        } else if let Some(host) = &self.emulator_host {
            info!("Using the Spanner emulator at {host}");
            builder = builder.emulator_host(host);
        }
        if let Some(token) = &self.access_token {
            builder = builder.token(token);
        }
        Ok(builder.build()?)
    }

    /// Open a session on the database and check that it answers.
    pub fn connect(&self) -> Result<SpannerEngine, CliError> {
        let engine = SpannerEngine::connect(self.client_config()?)
            .map_err(|e| CliError::Connect(Box::new(e)))?;
        info!("Connected to Spanner.");
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        connection: ConnectionArgs,
    }

    fn parse(args: &[&str]) -> ConnectionArgs {
        TestCli::try_parse_from(std::iter::once("pitr").chain(args.iter().copied()))
            .unwrap()
            .connection
    }

    #[test]
    fn test_client_config() {
        let args = parse(&[
            "--project=p",
            "--instance=i",
            "--database=d",
            "--endpoint=http://localhost:9020",
            "--access-token=secret",
            "--timeout=PT5S",
        ]);
        let config = args.client_config().unwrap();
        assert_eq!(config.database.to_string(), "projects/p/instances/i/databases/d");
        assert_eq!(config.endpoint.as_str(), "http://localhost:9020/");
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.timeout, std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_missing_database() {
        let args = parse(&["--project=p", "--instance=i"]);
        let err = args.client_config().unwrap_err();
        assert!(err.to_string().contains("--database"));
    }
}
