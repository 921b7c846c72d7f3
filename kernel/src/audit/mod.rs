//! Search of Cloud Audit Logs for the commits made to a database.
//!
//! When the moment of damage is unknown, the commit audit entries of the suspected principals
//! usually narrow the search window down before any bisection is needed.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Runtime;
use tracing::{debug, instrument};
use url::Url;

use crate::engine::spanner::{
    execute_with_retry, handle_response, http_client, ClientConfig, DatabasePath,
};
use crate::PitrResult;

const LOGGING_ENDPOINT: &str = "https://logging.googleapis.com/";
const PAGE_SIZE: u32 = 1000;

/// The Cloud Logging filter that selects `Commit` calls against `database` by principals matching
/// `account_expression` (a RE2 regex, without the `user:` prefix) within `[start, end]`.
pub fn commit_log_filter(
    database: &DatabasePath,
    account_expression: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> String {
    let timestamp = |at: DateTime<Utc>| at.to_rfc3339_opts(SecondsFormat::AutoSi, true);
    [
        r#"resource.type="spanner_instance""#.to_string(),
        format!(r#"resource.labels.instance_id="{}""#, database.instance),
        format!(r#"resource.labels.project_id="{}""#, database.project),
        format!(
            r#"protoPayload.authenticationInfo.principalSubject=~"user:{account_expression}""#
        ),
        r#"protoPayload.methodName="google.spanner.v1.Spanner.Commit""#.to_string(),
        format!(r#"protoPayload.authorizationInfo.resourceAttributes.name="{database}""#),
        format!(r#"timestamp >= "{}""#, timestamp(start)),
        format!(r#"timestamp <= "{}""#, timestamp(end)),
    ]
    .join(" AND\n")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListEntriesRequest<'a> {
    resource_names: Vec<String>,
    filter: &'a str,
    order_by: &'static str,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListEntriesResponse {
    #[serde(default)]
    entries: Vec<Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Lists log entries through the Cloud Logging REST API.
pub struct AuditLogClient {
    client: Client,
    config: ClientConfig,
    runtime: Runtime,
}

impl AuditLogClient {
    /// A client reusing the credentials, timeouts and retry settings of `config`.
    pub fn try_new(config: &ClientConfig) -> PitrResult<Self> {
        let mut config = config.clone();
        config.endpoint = Url::parse(LOGGING_ENDPOINT)?;
        Ok(Self {
            client: http_client(&config)?,
            config,
            runtime: tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?,
        })
    }

    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.config.endpoint = endpoint;
        self
    }

    /// Every entry of `project` matching `filter`, oldest first.
    pub fn list_entries(&self, project: &str, filter: &str) -> PitrResult<Vec<Value>> {
        self.runtime.block_on(self.list_all(project, filter))
    }

    async fn list_all(&self, project: &str, filter: &str) -> PitrResult<Vec<Value>> {
        let mut entries = Vec::new();
        let mut page_token = None;
        loop {
            let page = self.list_page(project, filter, page_token).await?;
            debug!("Read {} log entries", page.entries.len());
            entries.extend(page.entries);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(entries),
            }
        }
    }

    #[instrument(skip(self, filter))]
    async fn list_page(
        &self,
        project: &str,
        filter: &str,
        page_token: Option<String>,
    ) -> PitrResult<ListEntriesResponse> {
        let url = self.config.endpoint.join("v2/entries:list")?;
        let request = ListEntriesRequest {
            resource_names: vec![format!("projects/{project}")],
            filter,
            order_by: "timestamp asc",
            page_size: PAGE_SIZE,
            page_token,
        };
        let response = execute_with_retry(&self.config, || {
            self.client.post(url.clone()).json(&request).send()
        })
        .await?;
        handle_response(response).await
    }
}
