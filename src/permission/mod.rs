//! Permission checks run before any producer is called.
//!
//! [`PermissionService`] is a blocking interface (it typically wraps a
//! database lookup). [`PermissionGate`] runs it on tokio's blocking pool so
//! it never occupies a runtime worker.

use crate::config::PermissionsConfig;
use crate::error::{AnalysisError, Result};
use crate::models::Principal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("user {user_id} has no access to repository {repo_id}")]
    Forbidden { user_id: u64, repo_id: u64 },

    #[error("permission service unavailable: {0}")]
    Unavailable(String),
}

/// Decides whether a user may analyze a repository. May block.
pub trait PermissionService: Send + Sync + 'static {
    fn validate(&self, user_id: u64, repo_id: u64) -> std::result::Result<(), PermissionError>;
}

/// Grants read from configuration.
#[derive(Debug, Clone, Default)]
pub struct AllowListService {
    allow_all: bool,
    grants: HashMap<u64, HashSet<u64>>,
}

impl AllowListService {
    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            grants: HashMap::new(),
        }
    }

    pub fn grant(mut self, user_id: u64, repo_id: u64) -> Self {
        self.grants.entry(user_id).or_default().insert(repo_id);
        self
    }
}

impl From<&PermissionsConfig> for AllowListService {
    fn from(config: &PermissionsConfig) -> Self {
        let mut service = Self {
            allow_all: config.allow_all,
            grants: HashMap::new(),
        };
        for grant in &config.grants {
            service
                .grants
                .entry(grant.user_id)
                .or_default()
                .extend(grant.repo_ids.iter().copied());
        }
        service
    }
}

impl PermissionService for AllowListService {
    fn validate(&self, user_id: u64, repo_id: u64) -> std::result::Result<(), PermissionError> {
        if self.allow_all {
            return Ok(());
        }
        match self.grants.get(&user_id) {
            Some(repos) if repos.contains(&repo_id) => Ok(()),
            _ => Err(PermissionError::Forbidden { user_id, repo_id }),
        }
    }
}

/// Runs a [`PermissionService`] off the async workers.
#[derive(Clone)]
pub struct PermissionGate {
    service: Arc<dyn PermissionService>,
}

impl PermissionGate {
    pub fn new(service: Arc<dyn PermissionService>) -> Self {
        Self { service }
    }

    /// Fails closed: an unavailable service or a crashed check is a denial.
    pub async fn check(&self, principal: &Principal, repo_id: u64) -> Result<()> {
        let service = Arc::clone(&self.service);
        let user_id = principal.user_id;

        let outcome =
            tokio::task::spawn_blocking(move || service.validate(user_id, repo_id)).await;

        let reason = match outcome {
            Ok(Ok(())) => {
                debug!("User {} may analyze repository {}", user_id, repo_id);
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("permission check aborted: {}", e),
        };

        warn!("Permission denied for user {} on repository {}: {}", user_id, repo_id, reason);
        Err(AnalysisError::PermissionDenied {
            user_id,
            repo_id,
            reason,
        })
    }
}
