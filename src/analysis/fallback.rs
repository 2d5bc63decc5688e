//! Fallback values and cache eligibility.
//!
//! Every producer response type has a canonical degraded value that is
//! substituted when the producer fails. This module owns those values, the
//! predicates that recognise them, and the rule deciding whether an
//! aggregate may be cached. Nothing here performs I/O.

use crate::models::{
    AggregateResult, ConventionResponse, PriorityItem, PriorityList, PriorityResponse,
    ProducerKind, ProducerResult, ReviewerResponse, SummaryResponse, TitleResponse,
};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Title returned when the title producer fails.
pub const DEFAULT_TITLE: &str = "Error occurred during analysis";

/// Summary returned when the summary producer fails.
pub const DEFAULT_SUMMARY: &str = "Summary is unavailable";

/// Title of the single priority item returned when the priority producer fails.
pub const DEFAULT_PRIORITY_TITLE: &str = "Default priority";

/// Reason of the single priority item returned when the priority producer fails.
pub const DEFAULT_PRIORITY_REASON: &str = "Please set the priority manually";

/// A producer response type with a canonical degraded value.
pub trait FallbackValue: Sized {
    /// Producer that returns this type.
    const KIND: ProducerKind;

    /// The canonical degraded value.
    fn fallback() -> Self;

    /// Whether this value looks like the canonical degraded value.
    fn resembles_fallback(&self) -> bool;
}

impl FallbackValue for TitleResponse {
    const KIND: ProducerKind = ProducerKind::Title;

    fn fallback() -> Self {
        TitleResponse {
            result: DEFAULT_TITLE.to_string(),
        }
    }

    fn resembles_fallback(&self) -> bool {
        let title = self.result.trim();
        title.is_empty() || title == DEFAULT_TITLE
    }
}

impl FallbackValue for ReviewerResponse {
    const KIND: ProducerKind = ProducerKind::Reviewers;

    fn fallback() -> Self {
        ReviewerResponse { result: Vec::new() }
    }

    fn resembles_fallback(&self) -> bool {
        self.result.is_empty()
    }
}

impl FallbackValue for PriorityResponse {
    const KIND: ProducerKind = ProducerKind::Priority;

    fn fallback() -> Self {
        PriorityResponse {
            result: PriorityList {
                priority: vec![PriorityItem {
                    title: DEFAULT_PRIORITY_TITLE.to_string(),
                    reason: DEFAULT_PRIORITY_REASON.to_string(),
                }],
            },
        }
    }

    // Only the first item is compared.
    fn resembles_fallback(&self) -> bool {
        match self.result.priority.first() {
            None => true,
            Some(first) => {
                first.title == DEFAULT_PRIORITY_TITLE && first.reason == DEFAULT_PRIORITY_REASON
            }
        }
    }
}

impl FallbackValue for SummaryResponse {
    const KIND: ProducerKind = ProducerKind::Summary;

    fn fallback() -> Self {
        SummaryResponse {
            result: DEFAULT_SUMMARY.to_string(),
        }
    }

    fn resembles_fallback(&self) -> bool {
        let summary = self.result.trim();
        summary.is_empty() || summary == DEFAULT_SUMMARY
    }
}

impl FallbackValue for ConventionResponse {
    const KIND: ProducerKind = ProducerKind::Convention;

    fn fallback() -> Self {
        ConventionResponse { result: Vec::new() }
    }

    // No violations is a legitimate answer.
    fn resembles_fallback(&self) -> bool {
        false
    }
}

/// The canonical degraded value for `T`'s producer.
pub fn default_for<T: FallbackValue>() -> T {
    T::fallback()
}

/// Whether `value` equals or resembles `T`'s canonical degraded value.
pub fn is_fallback<T: FallbackValue>(value: &T) -> bool {
    value.resembles_fallback()
}

/// Whether a producer result must keep an aggregate out of the cache.
fn disqualifies<T: FallbackValue>(result: &ProducerResult<T>) -> bool {
    if result.is_fallback() {
        debug!("{} is a fallback - not caching", T::KIND);
        return true;
    }
    if result.value().resembles_fallback() {
        debug!("{} resembles its fallback value - not caching", T::KIND);
        return true;
    }
    false
}

/// Decide whether an aggregate may be written to the cache.
///
/// A single fallback field disqualifies the whole aggregate.
pub fn is_cacheable(aggregate: &AggregateResult) -> bool {
    if aggregate.has_errors {
        return false;
    }
    !(disqualifies(&aggregate.title)
        || disqualifies(&aggregate.reviewers)
        || disqualifies(&aggregate.priority))
}

/// Build an aggregate made entirely of fallbacks, flagged as errored.
pub fn degraded_aggregate(started_at: DateTime<Utc>, cause: impl Into<String>) -> AggregateResult {
    let cause = cause.into();
    AggregateResult {
        title: ProducerResult::fallback(default_for(), cause.clone()),
        reviewers: ProducerResult::fallback(default_for(), cause.clone()),
        priority: ProducerResult::fallback(default_for(), cause.clone()),
        analysis_time: started_at,
        has_errors: true,
        error_message: Some(cause),
    }
}
