//! Parallel analysis with caching.
//!
//! [`AggregationEngine::analyze_all`] runs the title, reviewer and priority
//! producers for one request and combines their answers:
//!
//! 1. cache lookup by request fingerprint (a hit returns immediately and
//!    skips the permission check)
//! 2. permission check on the blocking pool
//! 3. concurrent producer calls, each with its own deadline and fallback
//! 4. combination into an [`AggregateResult`]
//! 5. background cache write when no field is a fallback
//!
//! Steps 2-5 share one overall deadline. Missing it, or any panic in those
//! steps, yields an aggregate built from fallbacks with `has_errors` set.
//! A permission denial is the only error returned to the caller.
//!
//! Two concurrent requests with the same fingerprint both miss the cache and
//! both run the producers unless `coalesce_duplicates` is enabled. When it
//! is, the first caller to receive a cacheable shared aggregate writes it,
//! whether or not that caller started the fan-out.

use crate::analysis::events::{EventSink, PipelineEvent};
use crate::analysis::fallback;
use crate::cache::{CacheStore, Fingerprint};
use crate::config::Config;
use crate::error::{AnalysisError, Result};
use crate::models::{
    AggregateResult, AnalysisRequest, ConventionRequest, ConventionResponse, PriorityResponse,
    Principal, ProducerResult, ReviewerResponse, SummaryResponse, TitleResponse,
};
use crate::permission::{PermissionGate, PermissionService};
use crate::producer::{ProducerClient, ProducerTransport};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Deadlines and policies for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deadline for each individual producer.
    pub producer_timeout: Duration,
    /// Deadline for permission check, fan-out, combination and cache gate together.
    pub overall_timeout: Duration,
    /// Let concurrent requests for the same fingerprint share one fan-out.
    pub coalesce_duplicates: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            producer_timeout: Duration::from_secs(120),
            overall_timeout: Duration::from_secs(300),
            coalesce_duplicates: false,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            producer_timeout: Duration::from_secs(config.producers.producer_timeout_seconds),
            overall_timeout: Duration::from_secs(config.pipeline.overall_timeout_seconds),
            coalesce_duplicates: config.pipeline.coalesce_duplicates,
        }
    }
}

type SharedFanOut = Shared<BoxFuture<'static, Result<AggregateResult>>>;

#[derive(Clone)]
struct Flight {
    id: u64,
    result: SharedFanOut,
    /// Set by the first caller that writes the shared aggregate to the cache.
    cached: Arc<AtomicBool>,
}

type FlightMap = Arc<Mutex<HashMap<Fingerprint, Flight>>>;

fn lock(flights: &FlightMap) -> MutexGuard<'_, HashMap<Fingerprint, Flight>> {
    flights.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the leader's registry entry when the leader finishes or is dropped.
struct FlightGuard {
    flights: FlightMap,
    fingerprint: Fingerprint,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut flights = lock(&self.flights);
        if flights.get(&self.fingerprint).map(|f| f.id) == Some(self.id) {
            flights.remove(&self.fingerprint);
        }
    }
}

/// Orchestrates producers, permission checks and the result cache.
pub struct AggregationEngine {
    client: ProducerClient,
    cache: Arc<dyn CacheStore>,
    gate: PermissionGate,
    config: EngineConfig,
    events: EventSink,
    background: TaskTracker,
    flights: FlightMap,
    next_flight: AtomicU64,
}

impl AggregationEngine {
    pub fn new(
        transport: Arc<dyn ProducerTransport>,
        cache: Arc<dyn CacheStore>,
        permissions: Arc<dyn PermissionService>,
        config: EngineConfig,
    ) -> Self {
        info!(
            "Aggregation engine ready (producer timeout {}s, overall timeout {}s)",
            config.producer_timeout.as_secs_f64(),
            config.overall_timeout.as_secs_f64()
        );

        Self {
            client: ProducerClient::new(transport, config.producer_timeout),
            cache,
            gate: PermissionGate::new(permissions),
            config,
            events: EventSink::disabled(),
            background: TaskTracker::new(),
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_flight: AtomicU64::new(0),
        }
    }

    /// Report pipeline progress to `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.client = self.client.with_events(events.clone());
        self.events = events;
        self
    }

    /// Run title, reviewer and priority analysis for `request`.
    ///
    /// Always returns a complete aggregate unless the principal is denied.
    pub async fn analyze_all(
        &self,
        principal: &Principal,
        request: &AnalysisRequest,
    ) -> Result<AggregateResult> {
        info!(
            "Starting full analysis for repository {} ({} -> {})",
            request.repo_id, request.source, request.target
        );

        let fingerprint = Fingerprint::of(request);
        if let Some(cached) = self.cached(&fingerprint).await {
            info!("Cache hit for {} - skipping analysis", fingerprint.short());
            return Ok(cached);
        }
        info!("Cache miss for {} - running producers", fingerprint.short());

        let started_at = Utc::now();
        let clock = Instant::now();

        let outcome = tokio::time::timeout(
            self.config.overall_timeout,
            self.run_pipeline(principal, request, &fingerprint, started_at),
        )
        .await;

        let aggregate = match outcome {
            Ok(Ok(aggregate)) => {
                info!(
                    "Full analysis completed in {:.1}s",
                    clock.elapsed().as_secs_f64()
                );
                aggregate
            }
            Ok(Err(err)) if err.is_permission_denied() => return Err(err),
            Ok(Err(err)) => self.degrade(started_at, clock, &err),
            Err(_) => self.degrade(
                started_at,
                clock,
                &AnalysisError::OverallTimeout(self.config.overall_timeout),
            ),
        };

        Ok(aggregate)
    }

    /// Check that `principal` may analyze `repo_id`.
    ///
    /// The single-producer entry points do not check permissions themselves.
    pub async fn authorize(&self, principal: &Principal, repo_id: u64) -> Result<()> {
        self.gate.check(principal, repo_id).await
    }

    /// Suggest a pull request title.
    pub async fn recommend_title(&self, request: &AnalysisRequest) -> ProducerResult<TitleResponse> {
        self.client.call(request).await
    }

    /// Recommend reviewers for the change.
    pub async fn recommend_reviewers(
        &self,
        request: &AnalysisRequest,
    ) -> ProducerResult<ReviewerResponse> {
        self.client.call(request).await
    }

    /// Recommend review priorities for the change.
    pub async fn recommend_priority(
        &self,
        request: &AnalysisRequest,
    ) -> ProducerResult<PriorityResponse> {
        self.client.call(request).await
    }

    /// Summarize the change.
    pub async fn summarize(&self, request: &AnalysisRequest) -> ProducerResult<SummaryResponse> {
        self.client.call(request).await
    }

    /// Check the change against naming conventions.
    pub async fn check_conventions(
        &self,
        request: &ConventionRequest,
    ) -> ProducerResult<ConventionResponse> {
        self.client.call(request).await
    }

    /// Wait for background cache writes started so far.
    pub async fn flush(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    async fn cached(&self, fingerprint: &Fingerprint) -> Option<AggregateResult> {
        let key = fingerprint.cache_key();
        let found = match self.cache.get(fingerprint).await {
            Ok(Some(aggregate)) if fallback::is_cacheable(&aggregate) => Some(aggregate),
            Ok(Some(_)) => {
                warn!("Ignoring cached aggregate {} that contains fallbacks", fingerprint.short());
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache lookup failed, treating as miss: {}", e);
                None
            }
        };

        match found {
            Some(_) => self.events.emit(PipelineEvent::CacheHit { key }),
            None => self.events.emit(PipelineEvent::CacheMiss { key }),
        }
        found
    }

    async fn run_pipeline(
        &self,
        principal: &Principal,
        request: &AnalysisRequest,
        fingerprint: &Fingerprint,
        started_at: DateTime<Utc>,
    ) -> Result<AggregateResult> {
        self.gate.check(principal, request.repo_id).await?;
        self.events.emit(PipelineEvent::PermissionGranted {
            user_id: principal.user_id,
            repo_id: request.repo_id,
        });

        let (aggregate, claim) = self.settle(request, fingerprint, started_at).await;
        let aggregate = aggregate?;

        self.cache_gate(fingerprint, &aggregate, claim.as_deref());
        Ok(aggregate)
    }

    /// Run the fan-out, or join one already running for the same fingerprint.
    ///
    /// Returns the aggregate and, for a shared fan-out, the flag claimed by
    /// whichever caller writes it to the cache.
    async fn settle(
        &self,
        request: &AnalysisRequest,
        fingerprint: &Fingerprint,
        started_at: DateTime<Utc>,
    ) -> (Result<AggregateResult>, Option<Arc<AtomicBool>>) {
        if !self.config.coalesce_duplicates {
            let result = fan_out(self.client.clone(), request.clone(), started_at).await;
            return (result, None);
        }

        let (flight, guard) = {
            let mut flights = lock(&self.flights);
            match flights.get(fingerprint) {
                Some(existing) => (existing.clone(), None),
                None => {
                    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                    let flight = Flight {
                        id,
                        result: fan_out(self.client.clone(), request.clone(), started_at)
                            .boxed()
                            .shared(),
                        cached: Arc::new(AtomicBool::new(false)),
                    };
                    flights.insert(fingerprint.clone(), flight.clone());
                    let guard = FlightGuard {
                        flights: Arc::clone(&self.flights),
                        fingerprint: fingerprint.clone(),
                        id,
                    };
                    (flight, Some(guard))
                }
            }
        };

        if guard.is_none() {
            info!("Joining in-flight analysis for {}", fingerprint.short());
        }

        let result = flight.result.await;
        drop(guard);
        (result, Some(flight.cached))
    }

    /// Write `aggregate` in the background if it is cacheable and `claim`,
    /// when present, has not already been taken.
    fn cache_gate(
        &self,
        fingerprint: &Fingerprint,
        aggregate: &AggregateResult,
        claim: Option<&AtomicBool>,
    ) {
        let key = fingerprint.cache_key();

        if !fallback::is_cacheable(aggregate) {
            info!(
                "Aggregate contains fallback values ({:?}) - not caching",
                aggregate.fallback_kinds()
            );
            self.events.emit(PipelineEvent::CacheWriteSkipped { key });
            return;
        }

        if claim.is_some_and(|flag| flag.swap(true, Ordering::AcqRel)) {
            debug!("Shared aggregate {} already cached by another caller", fingerprint.short());
            return;
        }

        info!("Aggregate is fully genuine - caching as {}", key);
        let cache = Arc::clone(&self.cache);
        let events = self.events.clone();
        let fingerprint = fingerprint.clone();
        let aggregate = aggregate.clone();

        self.background.spawn(async move {
            match cache.put(&fingerprint, &aggregate).await {
                Ok(()) => {
                    debug!("Cached aggregate {}", fingerprint.short());
                    events.emit(PipelineEvent::CacheWritten { key });
                }
                Err(e) => {
                    warn!("Cache write failed, result still returned: {}", e);
                    events.emit(PipelineEvent::CacheWriteFailed {
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        });
    }

    fn degrade(
        &self,
        started_at: DateTime<Utc>,
        clock: Instant,
        cause: &AnalysisError,
    ) -> AggregateResult {
        error!(
            "Full analysis failed after {:.1}s, returning fallback result: {}",
            clock.elapsed().as_secs_f64(),
            cause
        );
        self.events.emit(PipelineEvent::Degraded {
            reason: cause.to_string(),
        });
        fallback::degraded_aggregate(started_at, cause.to_string())
    }
}

/// Call the three aggregate producers concurrently and combine the answers.
///
/// The calls are polled inside this future rather than spawned, so dropping
/// it cancels them.
async fn fan_out(
    client: ProducerClient,
    request: AnalysisRequest,
    started_at: DateTime<Utc>,
) -> Result<AggregateResult> {
    let produce = async {
        debug!("Calling title, reviewer and priority producers");
        let (title, reviewers, priority) = tokio::join!(
            client.call::<TitleResponse, _>(&request),
            client.call::<ReviewerResponse, _>(&request),
            client.call::<PriorityResponse, _>(&request),
        );

        AggregateResult {
            title,
            reviewers,
            priority,
            analysis_time: started_at,
            has_errors: false,
            error_message: None,
        }
    };

    AssertUnwindSafe(produce)
        .catch_unwind()
        .await
        .map_err(|panic| AnalysisError::Panicked(panic_message(panic.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fallback::{DEFAULT_PRIORITY_TITLE, DEFAULT_TITLE};
    use crate::models::{ConventionRules, ProducerKind};
    use crate::permission::PermissionError;
    use crate::testing::{genuine_body, Behavior, FakeCache, FakePermissions, FakeTransport};

    struct Harness {
        transport: Arc<FakeTransport>,
        cache: Arc<FakeCache>,
        permissions: Arc<FakePermissions>,
        engine: AggregationEngine,
    }

    fn config(producer_ms: u64, overall_ms: u64) -> EngineConfig {
        EngineConfig {
            producer_timeout: Duration::from_millis(producer_ms),
            overall_timeout: Duration::from_millis(overall_ms),
            coalesce_duplicates: false,
        }
    }

    fn harness(
        transport: FakeTransport,
        cache: FakeCache,
        permissions: FakePermissions,
        config: EngineConfig,
    ) -> Harness {
        let transport = Arc::new(transport);
        let cache = Arc::new(cache);
        let permissions = Arc::new(permissions);
        let engine = AggregationEngine::new(
            transport.clone(),
            cache.clone(),
            permissions.clone(),
            config,
        );
        Harness {
            transport,
            cache,
            permissions,
            engine,
        }
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest::new(42, "feature/refresh-token", "main").with_diff("+rotate()")
    }

    fn principal() -> Principal {
        Principal::new(7)
    }

    async fn genuine_aggregate() -> AggregateResult {
        let h = harness(
            FakeTransport::genuine(),
            FakeCache::default(),
            FakePermissions::allow(),
            config(1_000, 5_000),
        );
        h.engine.analyze_all(&principal(), &request()).await.unwrap()
    }

    #[tokio::test]
    async fn test_genuine_results_are_combined_and_cached_once() {
        let h = harness(
            FakeTransport::genuine(),
            FakeCache::default(),
            FakePermissions::allow(),
            config(1_000, 5_000),
        );

        let aggregate = h.engine.analyze_all(&principal(), &request()).await.unwrap();
        h.engine.flush().await;

        assert!(!aggregate.has_errors);
        assert!(aggregate.fallback_kinds().is_empty());
        assert_eq!(aggregate.title.value().result, "Add refresh token rotation");
        assert_eq!(h.transport.calls(ProducerKind::Title), 1);
        assert_eq!(h.transport.calls(ProducerKind::Reviewers), 1);
        assert_eq!(h.transport.calls(ProducerKind::Priority), 1);
        assert_eq!(h.transport.calls(ProducerKind::Summary), 0);
        assert_eq!(h.cache.writes(), vec![Fingerprint::of(&request()).cache_key()]);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_producers_and_permission() {
        let cached = genuine_aggregate().await;
        let h = harness(
            FakeTransport::genuine(),
            FakeCache::default().seeded(&Fingerprint::of(&request()), cached.clone()),
            FakePermissions::deny(),
            config(1_000, 5_000),
        );

        let aggregate = h.engine.analyze_all(&principal(), &request()).await.unwrap();

        assert_eq!(aggregate, cached);
        assert_eq!(h.transport.total_calls(), 0);
        assert_eq!(h.permissions.checks(), 0);
    }

    #[tokio::test]
    async fn test_title_timeout_falls_back_without_error_flag() {
        let h = harness(
            FakeTransport::genuine().with(ProducerKind::Title, Behavior::Hang),
            FakeCache::default(),
            FakePermissions::allow(),
            config(50, 5_000),
        );

        let aggregate = h.engine.analyze_all(&principal(), &request()).await.unwrap();
        h.engine.flush().await;

        assert!(aggregate.title.is_fallback());
        assert_eq!(aggregate.title.value().result, DEFAULT_TITLE);
        assert!(!aggregate.reviewers.is_fallback());
        assert!(!aggregate.has_errors);
        assert!(!fallback::is_cacheable(&aggregate));
        assert!(h.cache.writes().is_empty());
    }

    #[tokio::test]
    async fn test_any_single_fallback_prevents_cache_write() {
        for kind in [ProducerKind::Title, ProducerKind::Reviewers, ProducerKind::Priority] {
            let h = harness(
                FakeTransport::genuine().with(kind, Behavior::Fail("502 bad gateway".to_string())),
                FakeCache::default(),
                FakePermissions::allow(),
                config(1_000, 5_000),
            );

            let aggregate = h.engine.analyze_all(&principal(), &request()).await.unwrap();
            h.engine.flush().await;

            assert_eq!(aggregate.fallback_kinds(), vec![kind]);
            assert!(h.cache.writes().is_empty(), "{} fallback was cached", kind);
        }
    }

    #[tokio::test]
    async fn test_permission_denied_makes_no_calls() {
        let h = harness(
            FakeTransport::genuine(),
            FakeCache::default(),
            FakePermissions::deny(),
            config(1_000, 5_000),
        );

        let err = h
            .engine
            .analyze_all(&principal(), &request())
            .await
            .unwrap_err();
        h.engine.flush().await;

        assert!(err.is_permission_denied());
        assert_eq!(h.permissions.checks(), 1);
        assert_eq!(h.transport.total_calls(), 0);
        assert!(h.cache.writes().is_empty());
    }

    #[tokio::test]
    async fn test_overall_timeout_degrades_to_defaults() {
        let h = harness(
            FakeTransport::all(Behavior::Hang),
            FakeCache::default(),
            FakePermissions::allow(),
            config(10_000, 100),
        );

        let started = Instant::now();
        let aggregate = h.engine.analyze_all(&principal(), &request()).await.unwrap();
        h.engine.flush().await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(aggregate.has_errors);
        assert!(aggregate
            .error_message
            .as_deref()
            .unwrap()
            .contains("did not complete"));
        assert_eq!(aggregate.title.value().result, DEFAULT_TITLE);
        assert!(aggregate.reviewers.value().result.is_empty());
        assert_eq!(
            aggregate.priority.value().result.priority[0].title,
            DEFAULT_PRIORITY_TITLE
        );
        assert!(h.cache.writes().is_empty());
    }

    #[tokio::test]
    async fn test_producer_panic_degrades() {
        let h = harness(
            FakeTransport::genuine().with(ProducerKind::Priority, Behavior::Panic),
            FakeCache::default(),
            FakePermissions::allow(),
            config(1_000, 5_000),
        );

        let aggregate = h.engine.analyze_all(&principal(), &request()).await.unwrap();
        h.engine.flush().await;

        assert!(aggregate.has_errors);
        assert!(aggregate
            .error_message
            .as_deref()
            .unwrap()
            .contains("priority producer exploded"));
        assert_eq!(aggregate.fallback_kinds().len(), 3);
        assert!(h.cache.writes().is_empty());
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache_identically() {
        let h = harness(
            FakeTransport::genuine(),
            FakeCache::default(),
            FakePermissions::allow(),
            config(1_000, 5_000),
        );

        let first = h.engine.analyze_all(&principal(), &request()).await.unwrap();
        h.engine.flush().await;
        let second = h.engine.analyze_all(&principal(), &request()).await.unwrap();

        assert_eq!(h.transport.total_calls(), 3);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_cache_read_failure_is_a_miss() {
        let h = harness(
            FakeTransport::genuine(),
            FakeCache::default().failing_reads(),
            FakePermissions::allow(),
            config(1_000, 5_000),
        );

        let aggregate = h.engine.analyze_all(&principal(), &request()).await.unwrap();

        assert!(!aggregate.has_errors);
        assert_eq!(h.cache.reads(), 1);
        assert_eq!(h.transport.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_returns_result() {
        let (sink, mut rx) = EventSink::channel();
        let h = harness(
            FakeTransport::genuine(),
            FakeCache::default().failing_writes(),
            FakePermissions::allow(),
            config(1_000, 5_000),
        );
        let engine = h.engine.with_events(sink);

        let aggregate = engine.analyze_all(&principal(), &request()).await.unwrap();
        engine.flush().await;
        drop(engine);

        assert!(!aggregate.has_errors);
        let mut write_failed = false;
        while let Some(event) = rx.recv().await {
            if let PipelineEvent::CacheWriteFailed { reason, .. } = event {
                write_failed = reason.contains("read-only");
            }
        }
        assert!(write_failed);
    }

    #[tokio::test]
    async fn test_cached_fallback_entry_is_ignored() {
        let mut poisoned = genuine_aggregate().await;
        poisoned.title = ProducerResult::fallback(fallback::default_for(), "old timeout");
        let h = harness(
            FakeTransport::genuine(),
            FakeCache::default().seeded(&Fingerprint::of(&request()), poisoned),
            FakePermissions::allow(),
            config(1_000, 5_000),
        );

        let aggregate = h.engine.analyze_all(&principal(), &request()).await.unwrap();

        assert!(!aggregate.title.is_fallback());
        assert_eq!(h.transport.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_producers_run_concurrently() {
        let delay = Duration::from_millis(200);
        let h = harness(
            FakeTransport::genuine()
                .with(ProducerKind::Title, Behavior::Delay(delay, genuine_body(ProducerKind::Title)))
                .with(
                    ProducerKind::Reviewers,
                    Behavior::Delay(delay, genuine_body(ProducerKind::Reviewers)),
                )
                .with(
                    ProducerKind::Priority,
                    Behavior::Delay(delay, genuine_body(ProducerKind::Priority)),
                ),
            FakeCache::default(),
            FakePermissions::allow(),
            config(2_000, 5_000),
        );

        let started = Instant::now();
        let aggregate = h.engine.analyze_all(&principal(), &request()).await.unwrap();

        assert!(aggregate.fallback_kinds().is_empty());
        assert!(started.elapsed() < delay * 3);
    }

    #[tokio::test]
    async fn test_duplicate_requests_both_compute_by_default() {
        let delay = Duration::from_millis(100);
        let h = harness(
            FakeTransport::genuine()
                .with(ProducerKind::Title, Behavior::Delay(delay, genuine_body(ProducerKind::Title))),
            FakeCache::default(),
            FakePermissions::allow(),
            config(2_000, 5_000),
        );

        let (p, r) = (principal(), request());
        let (a, b) = tokio::join!(h.engine.analyze_all(&p, &r), h.engine.analyze_all(&p, &r));
        h.engine.flush().await;

        assert!(a.unwrap().fallback_kinds().is_empty());
        assert!(b.unwrap().fallback_kinds().is_empty());
        assert_eq!(h.transport.calls(ProducerKind::Title), 2);
        assert_eq!(h.cache.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_coalescing_shares_one_fan_out() {
        let delay = Duration::from_millis(100);
        let mut cfg = config(2_000, 5_000);
        cfg.coalesce_duplicates = true;
        let h = harness(
            FakeTransport::genuine()
                .with(ProducerKind::Title, Behavior::Delay(delay, genuine_body(ProducerKind::Title))),
            FakeCache::default(),
            FakePermissions::allow(),
            cfg,
        );

        let (p, p8, r) = (principal(), Principal::new(8), request());
        let (a, b) = tokio::join!(h.engine.analyze_all(&p, &r), h.engine.analyze_all(&p8, &r));
        h.engine.flush().await;

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(h.permissions.checks(), 2);
        assert_eq!(h.transport.calls(ProducerKind::Title), 1);
        assert_eq!(h.cache.writes().len(), 1);
        assert!(lock(&h.engine.flights).is_empty());
    }

    #[tokio::test]
    async fn test_follower_caches_when_leader_is_dropped() {
        let delay = Duration::from_millis(300);
        let mut cfg = config(2_000, 5_000);
        cfg.coalesce_duplicates = true;
        let h = harness(
            FakeTransport::genuine()
                .with(ProducerKind::Title, Behavior::Delay(delay, genuine_body(ProducerKind::Title))),
            FakeCache::default(),
            FakePermissions::allow(),
            cfg,
        );

        let (p, p8, r) = (principal(), Principal::new(8), request());
        let (leader, follower) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(150), h.engine.analyze_all(&p, &r)),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                h.engine.analyze_all(&p8, &r).await
            },
        );
        h.engine.flush().await;

        assert!(leader.is_err());
        let follower = follower.unwrap();
        assert!(!follower.has_errors);
        assert!(follower.fallback_kinds().is_empty());
        assert_eq!(h.transport.calls(ProducerKind::Title), 1);
        assert_eq!(h.cache.writes().len(), 1);
        assert!(lock(&h.engine.flights).is_empty());
    }

    #[tokio::test]
    async fn test_dropping_analysis_cancels_producer_calls() {
        let h = harness(
            FakeTransport::all(Behavior::Hang),
            FakeCache::default(),
            FakePermissions::allow(),
            config(10_000, 10_000),
        );

        let (p, r) = (principal(), request());
        let outcome =
            tokio::time::timeout(Duration::from_millis(150), h.engine.analyze_all(&p, &r)).await;

        assert!(outcome.is_err());
        assert_eq!(h.transport.total_calls(), 3);
        assert_eq!(h.transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_overall_timeout_during_permission_check_degrades() {
        struct SlowPermissions;

        impl PermissionService for SlowPermissions {
            fn validate(&self, _: u64, _: u64) -> std::result::Result<(), PermissionError> {
                std::thread::sleep(Duration::from_millis(400));
                Ok(())
            }
        }

        let transport = Arc::new(FakeTransport::genuine());
        let cache = Arc::new(FakeCache::default());
        let engine = AggregationEngine::new(
            transport.clone(),
            cache.clone(),
            Arc::new(SlowPermissions),
            config(1_000, 100),
        );

        let aggregate = engine.analyze_all(&principal(), &request()).await.unwrap();
        engine.flush().await;

        assert!(aggregate.has_errors);
        assert_eq!(
            aggregate.error_message.as_deref(),
            Some("analysis did not complete within 100ms")
        );
        assert_eq!(transport.total_calls(), 0);
        assert!(cache.writes().is_empty());
    }

    #[tokio::test]
    async fn test_single_producer_entry_points() {
        let h = harness(
            FakeTransport::genuine().with(ProducerKind::Summary, Behavior::Hang),
            FakeCache::default(),
            FakePermissions::deny(),
            config(50, 5_000),
        );

        let title = h.engine.recommend_title(&request()).await;
        let reviewers = h.engine.recommend_reviewers(&request()).await;
        let priority = h.engine.recommend_priority(&request()).await;
        let summary = h.engine.summarize(&request()).await;
        let conventions = h
            .engine
            .check_conventions(&ConventionRequest::for_change(
                &request(),
                ConventionRules::default(),
            ))
            .await;

        assert!(!title.is_fallback());
        assert!(!reviewers.is_fallback());
        assert!(!priority.is_fallback());
        assert!(summary.is_fallback());
        assert_eq!(conventions.value().result.len(), 1);
        assert!(h.cache.writes().is_empty());
    }

    #[test]
    fn test_engine_config_from_file_config() {
        let mut config = Config::default();
        config.producers.producer_timeout_seconds = 9;
        config.pipeline.overall_timeout_seconds = 20;
        config.pipeline.coalesce_duplicates = true;

        let engine_config = EngineConfig::from(&config);

        assert_eq!(engine_config.producer_timeout, Duration::from_secs(9));
        assert_eq!(engine_config.overall_timeout, Duration::from_secs(20));
        assert!(engine_config.coalesce_duplicates);
    }
}
