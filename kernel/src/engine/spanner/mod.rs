//! A [`TimeTravelClient`] for Cloud Spanner, over its REST API.
//!
//! All reads run in single-use read-only transactions on one session, which is created on first
//! use and deleted when the engine is dropped. Results are streamed: a cursor reads the response
//! body as its rows are consumed. The engine and its cursors drive the async client on a shared
//! single-threaded tokio runtime, so they must not be used from inside an async context.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::row::RowCursor;
use crate::{Error, PitrResult, TimeTravelClient, TimestampBound};

mod client;
mod config;
mod decode;
mod models;
mod stream;

pub use client::SpannerClient;
pub(crate) use client::{execute_with_retry, handle_response, http_client};
pub use config::{ClientConfig, ClientConfigBuilder, DatabasePath};
pub use models::{ExecuteSqlRequest, PartialResultSet};

use client::{is_session_not_found, SESSION_NOT_FOUND};
use stream::StreamingRows;

#[derive(Debug)]
pub struct SpannerEngine {
    client: SpannerClient,
    runtime: Arc<Runtime>,
    session: Mutex<Option<String>>,
}

impl SpannerEngine {
    pub fn try_new(config: ClientConfig) -> PitrResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            client: SpannerClient::new(config)?,
            runtime: Arc::new(runtime),
            session: Mutex::new(None),
        })
    }

    /// Create an engine and check that the database answers a strong `SELECT true`.
    pub fn connect(config: ClientConfig) -> PitrResult<Self> {
        let engine = Self::try_new(config)?;
        let connected = engine
            .execute_now("SELECT true", None)?
            .next()
            .transpose()?
            .map(|row| row.first_boolean())
            .transpose()?
            .unwrap_or(false);
        if !connected {
            return Err(Error::generic(format!(
                "Connection check against {} did not return true",
                engine.database()
            )));
        }
        info!("Connected to {}", engine.database());
        Ok(engine)
    }

    pub fn database(&self) -> &DatabasePath {
        &self.client.config().database
    }

    fn session_guard(&self) -> MutexGuard<'_, Option<String>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> PitrResult<String> {
        let mut guard = self.session_guard();
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.runtime.block_on(self.client.create_session())?.name;
        *guard = Some(session.clone());
        Ok(session)
    }

    fn forget_session(&self, expired: &str) {
        let mut guard = self.session_guard();
        if guard.as_deref() == Some(expired) {
            *guard = None;
        }
    }
}

impl TimeTravelClient for SpannerEngine {
    fn execute(&self, query: &str, bound: TimestampBound) -> PitrResult<RowCursor> {
        let request = ExecuteSqlRequest::read_only(query, bound);
        let session = self.session()?;
        let response = match self
            .runtime
            .block_on(self.client.execute_streaming_sql(&session, &request))
        {
            Err(e) if is_session_not_found(&e) => {
                warn!("Session {session} expired, creating a new one");
                self.forget_session(&session);
                let session = self.session()?;
                match self
                    .runtime
                    .block_on(self.client.execute_streaming_sql(&session, &request))
                {
                    Err(Error::Query { message, .. }) if message.starts_with(SESSION_NOT_FOUND) => {
                        return Err(Error::TargetNotFound(message))
                    }
                    result => result?,
                }
            }
            result => result?,
        };
        debug!("Opened query with {bound:?}");
        StreamingRows::open(self.runtime.clone(), response)
    }
}

impl Drop for SpannerEngine {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            match self.runtime.block_on(self.client.delete_session(&session)) {
                Ok(()) => debug!("Deleted session {session}"),
                Err(e) => warn!("Could not delete session {session}: {e}"),
            }
        }
    }
}
