//! Repository events and request context.
//!
//! Events are what a repository tells the outside world about proxy mode
//! changes and administrative cache expiry. Each event that concerns a
//! request carries a [`ContextSnapshot`]: an immutable copy of the caller's
//! [`RequestContext`] taken when the event is built, so listeners never see
//! later mutations.

use crate::{ProxyModeTransition, ProxyMode, RepositoryId, RepositoryPath, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

/// Context key: bypass the negative cache and revalidate cached content.
pub const CTX_AS_EXPIRED: &str = "request.asExpired";

/// Context key: never contact the remote.
pub const CTX_LOCAL_ONLY: &str = "request.localOnly";

/// Context key: skip the local proxy cache.
pub const CTX_REMOTE_ONLY: &str = "request.remoteOnly";

/// Mutable key/value context travelling with a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestContext {
    values: BTreeMap<String, Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    fn flag(&self, key: &str) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn is_as_expired(&self) -> bool {
        self.flag(CTX_AS_EXPIRED)
    }

    pub fn is_local_only(&self) -> bool {
        self.flag(CTX_LOCAL_ONLY)
    }

    pub fn is_remote_only(&self) -> bool {
        self.flag(CTX_REMOTE_ONLY)
    }

    /// Deep copy of the current values.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot(Arc::new(self.values.clone()))
    }
}

/// Immutable copy of a [`RequestContext`]. Cheap to clone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextSnapshot(Arc<BTreeMap<String, Value>>);

impl ContextSnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

// ============================================================================
// EXPIRY OUTCOME
// ============================================================================

/// Result of an administrative cache expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheExpiryOutcome {
    pub repository: RepositoryId,
    pub path: RepositoryPath,
    /// True when at least one entry was actually removed or expired.
    pub altered: bool,
}

impl CacheExpiryOutcome {
    pub fn new(repository: RepositoryId, path: RepositoryPath, altered: bool) -> Self {
        Self {
            repository,
            path,
            altered,
        }
    }

    pub fn not_altered(repository: RepositoryId, path: RepositoryPath) -> Self {
        Self::new(repository, path, false)
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Events emitted by repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryEvent {
    ProxyModeChanged {
        repository: RepositoryId,
        old_mode: ProxyMode,
        new_mode: ProxyMode,
        cause: Option<String>,
        at: Timestamp,
    },
    ExpireProxyCaches {
        repository: RepositoryId,
        path: RepositoryPath,
        context: ContextSnapshot,
        altered: bool,
    },
    ExpireNotFoundCaches {
        repository: RepositoryId,
        path: RepositoryPath,
        context: ContextSnapshot,
        altered: bool,
    },
}

impl RepositoryEvent {
    pub fn proxy_mode_changed(repository: RepositoryId, transition: &ProxyModeTransition) -> Self {
        RepositoryEvent::ProxyModeChanged {
            repository,
            old_mode: transition.old_mode(),
            new_mode: transition.new_mode(),
            cause: transition.cause().map(str::to_string),
            at: Utc::now(),
        }
    }

    pub fn expire_proxy_caches(outcome: &CacheExpiryOutcome, context: &RequestContext) -> Self {
        RepositoryEvent::ExpireProxyCaches {
            repository: outcome.repository.clone(),
            path: outcome.path.clone(),
            context: context.snapshot(),
            altered: outcome.altered,
        }
    }

    pub fn expire_not_found_caches(outcome: &CacheExpiryOutcome, context: &RequestContext) -> Self {
        RepositoryEvent::ExpireNotFoundCaches {
            repository: outcome.repository.clone(),
            path: outcome.path.clone(),
            context: context.snapshot(),
            altered: outcome.altered,
        }
    }

    pub fn repository(&self) -> &RepositoryId {
        match self {
            RepositoryEvent::ProxyModeChanged { repository, .. }
            | RepositoryEvent::ExpireProxyCaches { repository, .. }
            | RepositoryEvent::ExpireNotFoundCaches { repository, .. } => repository,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            RepositoryEvent::ProxyModeChanged { .. } => "PROXY_MODE_CHANGED",
            RepositoryEvent::ExpireProxyCaches { .. } => "EXPIRE_PROXY_CACHES",
            RepositoryEvent::ExpireNotFoundCaches { .. } => "EXPIRE_NOT_FOUND_CACHES",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_isolated_from_later_mutation() {
        let mut ctx = RequestContext::new().with("user", "admin");
        let snapshot = ctx.snapshot();
        ctx.insert("user", "someone-else");
        ctx.insert("extra", 1);
        assert_eq!(snapshot.get("user"), Some(&Value::from("admin")));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_context_flags() {
        let ctx = RequestContext::new()
            .with(CTX_AS_EXPIRED, true)
            .with(CTX_LOCAL_ONLY, "yes");
        assert!(ctx.is_as_expired());
        // only real booleans count
        assert!(!ctx.is_local_only());
        assert!(!ctx.is_remote_only());
    }

    #[test]
    fn test_event_from_outcome() {
        let outcome = CacheExpiryOutcome::new(
            RepositoryId::new("central"),
            RepositoryPath::new("/com/example"),
            true,
        );
        let ctx = RequestContext::new().with("origin", "admin-task");
        let event = RepositoryEvent::expire_not_found_caches(&outcome, &ctx);
        assert_eq!(event.repository().as_str(), "central");
        assert_eq!(event.event_type(), "EXPIRE_NOT_FOUND_CACHES");
        match event {
            RepositoryEvent::ExpireNotFoundCaches { altered, context, .. } => {
                assert!(altered);
                assert_eq!(context.get("origin"), Some(&Value::from("admin-task")));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_proxy_mode_changed_serializes_with_tag() {
        let transition =
            ProxyModeTransition::between(ProxyMode::Allow, ProxyMode::BlockedManual, None).unwrap();
        let event = RepositoryEvent::proxy_mode_changed(RepositoryId::new("central"), &transition);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PROXY_MODE_CHANGED");
        assert_eq!(json["old_mode"], "ALLOW");
        assert_eq!(json["new_mode"], "BLOCKED_MANUAL");
        assert!(json["cause"].is_null());
    }
}
