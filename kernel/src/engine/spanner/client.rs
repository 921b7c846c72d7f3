use std::future::Future;

use reqwest::{header, Client, Response, StatusCode};
use serde::de::IgnoredAny;
use tracing::{debug, instrument, warn};
use url::Url;

use super::config::ClientConfig;
use super::models::{ErrorResponse, ErrorStatus, ExecuteSqlRequest, Session};
use crate::{Error, PitrResult};

pub(crate) const SESSION_NOT_FOUND: &str = "Session not found";

/// Async client for the handful of Spanner REST calls a read-only session needs.
#[derive(Debug, Clone)]
pub struct SpannerClient {
    client: Client,
    config: ClientConfig,
}

impl SpannerClient {
    pub fn new(config: ClientConfig) -> PitrResult<Self> {
        Ok(Self {
            client: http_client(&config)?,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn api_url(&self, path: &str) -> PitrResult<Url> {
        Ok(self.config.endpoint.join(&format!("v1/{path}"))?)
    }

    #[instrument(skip(self))]
    pub async fn create_session(&self) -> PitrResult<Session> {
        let url = self.api_url(&format!("{}/sessions", self.config.database))?;
        let body = serde_json::json!({});
        let response = execute_with_retry(&self.config, || {
            self.client.post(url.clone()).json(&body).send()
        })
        .await?;
        let session: Session = handle_response(response).await?;
        debug!("Created session {}", session.name);
        Ok(session)
    }

    /// Start a streaming query. The returned response has a successful status; its body is a JSON
    /// array of `PartialResultSet` messages, still to be read.
    #[instrument(skip(self, request), fields(sql = %request.sql))]
    pub async fn execute_streaming_sql(
        &self,
        session: &str,
        request: &ExecuteSqlRequest,
    ) -> PitrResult<Response> {
        let url = self.api_url(&format!("{session}:executeStreamingSql"))?;
        let response = execute_with_retry(&self.config, || {
            self.client.post(url.clone()).json(request).send()
        })
        .await?;
        check_status(response).await
    }

    #[instrument(skip(self))]
    pub async fn delete_session(&self, session: &str) -> PitrResult<()> {
        let url = self.api_url(session)?;
        let response =
            execute_with_retry(&self.config, || self.client.delete(url.clone()).send()).await?;
        let _: IgnoredAny = handle_response(response).await?;
        Ok(())
    }
}

/// True for the error Spanner returns once a session has expired or been deleted.
pub(crate) fn is_session_not_found(error: &Error) -> bool {
    matches!(error, Error::Query { status, message }
        if status == "NOT_FOUND" && message.starts_with(SESSION_NOT_FOUND))
}

/// A reqwest client sending JSON and, when configured, the bearer token.
pub(crate) fn http_client(config: &ClientConfig) -> PitrResult<Client> {
    let mut headers = header::HeaderMap::new();
    if let Some(token) = &config.token {
        let value = header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::invalid_configuration(format!("Invalid access token: {e}")))?;
        headers.insert(header::AUTHORIZATION, value);
    }
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );

    Ok(Client::builder()
        .default_headers(headers)
        .read_timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .build()?)
}

/// Send a request, retrying transport errors and 5xx responses with a linearly growing delay.
pub(crate) async fn execute_with_retry<F, Fut>(config: &ClientConfig, f: F) -> PitrResult<Response>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut retries = 0;
    let max_retries = config.max_retries;

    loop {
        match f().await {
            Ok(response) => {
                if response.status().is_server_error() && retries < max_retries {
                    retries += 1;
                    warn!(
                        "Server error {}, retrying (attempt {}/{})",
                        response.status(),
                        retries,
                        max_retries
                    );
                    tokio::time::sleep(config.retry_delay(retries)).await;
                    continue;
                }
                return Ok(response);
            }
            Err(e) => {
                if retries >= max_retries {
                    return Err(Error::from(e));
                }
                retries += 1;
                warn!(
                    "Request failed, retrying (attempt {}/{}): {}",
                    retries, max_retries, e
                );
                tokio::time::sleep(config.retry_delay(retries)).await;
            }
        }
    }
}

/// Decode a successful response body, or turn the error body into an [`Error`].
pub(crate) async fn handle_response<T>(response: Response) -> PitrResult<T>
where
    T: serde::de::DeserializeOwned,
{
    check_status(response)
        .await?
        .json::<T>()
        .await
        .map_err(Error::from)
}

/// Pass a successful response through, or turn the error body into an [`Error`].
pub(crate) async fn check_status(response: Response) -> PitrResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(status_error(status, &body))
}

pub(crate) fn status_error(status: StatusCode, body: &str) -> Error {
    let error = serde_json::from_str::<ErrorResponse>(body)
        .map(|response| response.error)
        .unwrap_or_else(|_| ErrorStatus {
            code: i32::from(status.as_u16()),
            message: body.to_string(),
            status: String::new(),
        });
    let code = if error.status.is_empty() {
        status.as_u16().to_string()
    } else {
        error.status
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::AuthenticationFailed(error.message)
        }
        StatusCode::NOT_FOUND if !error.message.starts_with(SESSION_NOT_FOUND) => {
            Error::TargetNotFound(error.message)
        }
        _ => Error::query(code, error.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case::database_missing(
        404,
        r#"{"error":{"code":404,"message":"Database not found: projects/p/instances/i/databases/d","status":"NOT_FOUND"}}"#,
        "target"
    )]
    #[case::session_expired(
        404,
        r#"{"error":{"code":404,"message":"Session not found: projects/p/instances/i/databases/d/sessions/s","status":"NOT_FOUND"}}"#,
        "session"
    )]
    #[case::table_missing(
        400,
        r#"{"error":{"code":400,"message":"Table not found: orders","status":"INVALID_ARGUMENT"}}"#,
        "query"
    )]
    #[case::unauthorized(401, "not json", "auth")]
    #[case::forbidden(403, r#"{"error":{"code":403,"message":"denied","status":"PERMISSION_DENIED"}}"#, "auth")]
    fn test_status_error(#[case] status: u16, #[case] body: &str, #[case] expected: &str) {
        let error = status_error(StatusCode::from_u16(status).unwrap(), body);
        let kind = match &error {
            Error::TargetNotFound(_) => "target",
            Error::AuthenticationFailed(_) => "auth",
            e if is_session_not_found(e) => "session",
            Error::Query { .. } => "query",
            other => panic!("unexpected error {other:?}"),
        };
        assert_eq!(kind, expected);
    }

    #[test]
    fn test_plain_text_error_body() {
        let error = status_error(StatusCode::BAD_GATEWAY, "upstream down");
        match error {
            Error::Query { status, message } => {
                assert_eq!(status, "502");
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
