//! Uniform, fallback-guarded calls to analysis producers.
//!
//! [`ProducerClient::call`] never fails: a timeout, transport error or
//! malformed body is converted into the producer's canonical fallback value,
//! tagged with the reason.

use crate::analysis::events::{EventSink, PipelineEvent};
use crate::analysis::fallback::FallbackValue;
use crate::error::{AnalysisError, Result};
use crate::models::{ProducerKind, ProducerResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Wire-level access to the remote producers.
#[async_trait]
pub trait ProducerTransport: Send + Sync {
    /// Send `body` to the producer for `kind` and return its JSON answer.
    async fn invoke(&self, kind: ProducerKind, body: Value) -> Result<Value>;
}

/// Calls producers through a [`ProducerTransport`] with a per-call deadline.
#[derive(Clone)]
pub struct ProducerClient {
    transport: Arc<dyn ProducerTransport>,
    timeout: Duration,
    events: EventSink,
}

impl ProducerClient {
    pub fn new(transport: Arc<dyn ProducerTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Call the producer that answers with `T`.
    pub async fn call<T, R>(&self, request: &R) -> ProducerResult<T>
    where
        T: DeserializeOwned + FallbackValue,
        R: Serialize + ?Sized,
    {
        let kind = T::KIND;
        let started = Instant::now();
        debug!("{} analysis started", kind);
        self.events.emit(PipelineEvent::ProducerStarted { kind });

        match self.try_call::<T, R>(request).await {
            Ok(value) => {
                let elapsed = started.elapsed();
                info!("{} analysis completed in {}ms", kind, elapsed.as_millis());
                self.events
                    .emit(PipelineEvent::ProducerSucceeded { kind, elapsed });
                ProducerResult::success(value)
            }
            Err(err) => {
                warn!("{} analysis failed, using fallback: {}", kind, err);
                let reason = err.to_string();
                self.events.emit(PipelineEvent::ProducerFellBack {
                    kind,
                    reason: reason.clone(),
                });
                ProducerResult::fallback(T::fallback(), reason)
            }
        }
    }

    async fn try_call<T, R>(&self, request: &R) -> Result<T>
    where
        T: DeserializeOwned + FallbackValue,
        R: Serialize + ?Sized,
    {
        let kind = T::KIND;
        let body = serde_json::to_value(request).map_err(|e| AnalysisError::ProducerParse {
            kind,
            message: format!("request could not be encoded: {}", e),
        })?;

        let answer = tokio::time::timeout(self.timeout, self.transport.invoke(kind, body))
            .await
            .map_err(|_| AnalysisError::ProducerTimeout {
                kind,
                after: self.timeout,
            })??;

        serde_json::from_value(answer).map_err(|e| AnalysisError::ProducerParse {
            kind,
            message: e.to_string(),
        })
    }
}
