//! In-memory fakes for the pipeline seams (testing only).
//!
//! Each fake counts how often it is used so tests can assert on call
//! ordering and on the absence of calls.

use crate::cache::{CacheStore, Fingerprint};
use crate::error::{AnalysisError, Result};
use crate::models::{AggregateResult, ProducerKind};
use crate::permission::{PermissionError, PermissionService};
use crate::producer::ProducerTransport;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a fake producer answers.
#[derive(Debug, Clone)]
pub enum Behavior {
    Respond(Value),
    Delay(Duration, Value),
    Fail(String),
    Hang,
    Panic,
}

/// A realistic, non-fallback body for each producer.
pub fn genuine_body(kind: ProducerKind) -> Value {
    match kind {
        ProducerKind::Title => json!({"result": "Add refresh token rotation"}),
        ProducerKind::Summary => json!({"result": "Rotates refresh tokens on every use."}),
        ProducerKind::Reviewers => json!({
            "result": [{"username": "river-otter", "reason": "maintains auth"}]
        }),
        ProducerKind::Priority => json!({
            "result": {"priority": [{"title": "Token reuse", "reason": "security sensitive"}]}
        }),
        ProducerKind::Convention => json!({
            "result": [{"file": "TokenService.rs", "rule": "file_names", "message": "use snake_case"}]
        }),
    }
}

/// Producer transport with scripted per-producer behavior.
#[derive(Debug, Default)]
pub struct FakeTransport {
    behaviors: HashMap<ProducerKind, Behavior>,
    calls: Mutex<HashMap<ProducerKind, usize>>,
    bodies: Mutex<HashMap<ProducerKind, Value>>,
    in_flight: Arc<AtomicUsize>,
}

/// Counts a call as in flight until its future completes or is dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlight(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeTransport {
    /// Every producer answers immediately with [`genuine_body`].
    pub fn genuine() -> Self {
        Self::default()
    }

    /// Every producer behaves the same way.
    pub fn all(behavior: Behavior) -> Self {
        let mut transport = Self::default();
        for kind in [
            ProducerKind::Title,
            ProducerKind::Summary,
            ProducerKind::Reviewers,
            ProducerKind::Priority,
            ProducerKind::Convention,
        ] {
            transport.behaviors.insert(kind, behavior.clone());
        }
        transport
    }

    pub fn with(mut self, kind: ProducerKind, behavior: Behavior) -> Self {
        self.behaviors.insert(kind, behavior);
        self
    }

    pub fn calls(&self, kind: ProducerKind) -> usize {
        self.calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn last_body(&self, kind: ProducerKind) -> Option<Value> {
        self.bodies.lock().unwrap().get(&kind).cloned()
    }

    /// Calls started but neither finished nor cancelled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProducerTransport for FakeTransport {
    async fn invoke(&self, kind: ProducerKind, body: Value) -> Result<Value> {
        *self.calls.lock().unwrap().entry(kind).or_default() += 1;
        self.bodies.lock().unwrap().insert(kind, body);
        let _in_flight = InFlight::enter(&self.in_flight);

        let behavior = self
            .behaviors
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Behavior::Respond(genuine_body(kind)));

        match behavior {
            Behavior::Respond(value) => Ok(value),
            Behavior::Delay(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Behavior::Fail(message) => Err(AnalysisError::ProducerTransport { kind, message }),
            Behavior::Hang => futures::future::pending::<Result<Value>>().await,
            Behavior::Panic => panic!("{} producer exploded", kind),
        }
    }
}

/// Cache store that records every read and write.
#[derive(Debug, Default)]
pub struct FakeCache {
    entries: Mutex<HashMap<String, AggregateResult>>,
    writes: Mutex<Vec<String>>,
    reads: AtomicUsize,
    fail_reads: bool,
    fail_writes: bool,
}

impl FakeCache {
    pub fn seeded(self, fingerprint: &Fingerprint, aggregate: AggregateResult) -> Self {
        self.entries
            .lock()
            .unwrap()
            .insert(fingerprint.cache_key(), aggregate);
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Keys written, in write order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for FakeCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<AggregateResult>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            return Err(AnalysisError::CacheRead("store unreachable".to_string()));
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&fingerprint.cache_key())
            .cloned())
    }

    async fn put(&self, fingerprint: &Fingerprint, aggregate: &AggregateResult) -> Result<()> {
        self.writes.lock().unwrap().push(fingerprint.cache_key());
        if self.fail_writes {
            return Err(AnalysisError::CacheWrite("store is read-only".to_string()));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(fingerprint.cache_key(), aggregate.clone());
        Ok(())
    }
}

/// Permission service that grants or denies everything.
#[derive(Debug)]
pub struct FakePermissions {
    allowed: bool,
    checks: AtomicUsize,
}

impl FakePermissions {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            checks: AtomicUsize::new(0),
        }
    }

    pub fn deny() -> Self {
        Self {
            allowed: false,
            checks: AtomicUsize::new(0),
        }
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl PermissionService for FakePermissions {
    fn validate(&self, user_id: u64, repo_id: u64) -> std::result::Result<(), PermissionError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.allowed {
            Ok(())
        } else {
            Err(PermissionError::Forbidden { user_id, repo_id })
        }
    }
}
