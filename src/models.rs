//! Data models for the analysis aggregator.
//!
//! This module contains the request types sent to the analysis producers,
//! the typed producer responses, and the aggregate returned to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the independent remote analysis capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerKind {
    /// Pull request title suggestion
    Title,
    /// Pull request summary
    Summary,
    /// Reviewer recommendation
    Reviewers,
    /// Review priority recommendation
    Priority,
    /// Coding convention check
    Convention,
}

impl fmt::Display for ProducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProducerKind::Title => write!(f, "title"),
            ProducerKind::Summary => write!(f, "summary"),
            ProducerKind::Reviewers => write!(f, "reviewers"),
            ProducerKind::Priority => write!(f, "priority"),
            ProducerKind::Convention => write!(f, "convention"),
        }
    }
}

impl ProducerKind {
    /// Path of the producer endpoint, relative to the producer base URL.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ProducerKind::Title => "/ai/pull_requests/title",
            ProducerKind::Summary => "/ai/pull_requests/summary",
            ProducerKind::Reviewers => "/ai/reviewers/recommend",
            ProducerKind::Priority => "/ai/priority/recommend",
            ProducerKind::Convention => "/ai/coding-convention/check",
        }
    }
}

/// The principal on whose behalf an analysis runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: u64,
}

impl Principal {
    pub fn new(user_id: u64) -> Self {
        Self { user_id }
    }
}

/// A code change submitted for analysis.
///
/// Every field feeds the cache fingerprint (see `cache::Fingerprint::of`),
/// each one hashed with a length prefix, so struct field order is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Repository identifier.
    pub repo_id: u64,
    /// Source (head) ref of the change.
    pub source: String,
    /// Target (base) ref of the change.
    pub target: String,
    /// Unified diff of the change, when the caller has it at hand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl AnalysisRequest {
    pub fn new(repo_id: u64, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            repo_id,
            source: source.into(),
            target: target.into(),
            diff: None,
        }
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = Some(diff.into());
        self
    }
}

/// Naming rules checked by the convention producer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConventionRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_names: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_names: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_names: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_names: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant_names: Option<String>,
}

impl ConventionRules {
    pub fn is_empty(&self) -> bool {
        self.file_names.is_none()
            && self.function_names.is_none()
            && self.variable_names.is_none()
            && self.class_names.is_none()
            && self.constant_names.is_none()
    }
}

/// Request for a coding convention check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConventionRequest {
    pub repo_id: u64,
    pub source: String,
    pub target: String,
    pub rules: ConventionRules,
}

impl ConventionRequest {
    /// Build a convention request for the same change as `request`.
    pub fn for_change(request: &AnalysisRequest, rules: ConventionRules) -> Self {
        Self {
            repo_id: request.repo_id,
            source: request.source.clone(),
            target: request.target.clone(),
            rules,
        }
    }
}

/// A merged pull request handed to the producers' long-term store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedPullRequest {
    pub id: u64,
    pub repo_id: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub source: String,
    pub target: String,
    pub merged_at: DateTime<Utc>,
}

/// Suggested pull request title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleResponse {
    pub result: String,
}

/// A single recommended reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerRecommendation {
    pub username: String,
    #[serde(default)]
    pub reason: String,
}

/// Recommended reviewers, best match first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerResponse {
    #[serde(default)]
    pub result: Vec<ReviewerRecommendation>,
}

/// One prioritized review concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityItem {
    pub title: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityList {
    #[serde(default)]
    pub priority: Vec<PriorityItem>,
}

/// Recommended review priorities, most important first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityResponse {
    #[serde(default)]
    pub result: PriorityList,
}

/// Free-text summary of the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub result: String,
}

/// A naming rule the change violates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConventionViolation {
    pub file: String,
    pub rule: String,
    #[serde(default)]
    pub message: String,
}

/// Convention violations found in the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConventionResponse {
    #[serde(default)]
    pub result: Vec<ConventionViolation>,
}

/// Outcome of a single producer call.
///
/// A `Fallback` carries the canonical degraded value for its producer, so it
/// has the same shape as a `Success`; the tag is what tells them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProducerResult<T> {
    Success { value: T },
    Fallback { value: T, reason: String },
}

impl<T> ProducerResult<T> {
    pub fn success(value: T) -> Self {
        ProducerResult::Success { value }
    }

    pub fn fallback(value: T, reason: impl Into<String>) -> Self {
        ProducerResult::Fallback {
            value,
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            ProducerResult::Success { value } | ProducerResult::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ProducerResult::Fallback { .. })
    }

    /// Why the fallback was substituted, if it was.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ProducerResult::Success { .. } => None,
            ProducerResult::Fallback { reason, .. } => Some(reason),
        }
    }
}

/// Combined title, reviewer and priority analysis for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub title: ProducerResult<TitleResponse>,
    pub reviewers: ProducerResult<ReviewerResponse>,
    pub priority: ProducerResult<PriorityResponse>,
    /// When aggregation started.
    pub analysis_time: DateTime<Utc>,
    /// Set only when the whole pipeline degraded, not for a single fallback.
    #[serde(default)]
    pub has_errors: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AggregateResult {
    /// Producers whose result in this aggregate is a fallback.
    pub fn fallback_kinds(&self) -> Vec<ProducerKind> {
        let mut kinds = Vec::new();
        if self.title.is_fallback() {
            kinds.push(ProducerKind::Title);
        }
        if self.reviewers.is_fallback() {
            kinds.push(ProducerKind::Reviewers);
        }
        if self.priority.is_fallback() {
            kinds.push(ProducerKind::Priority);
        }
        kinds
    }
}
