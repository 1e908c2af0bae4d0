//! Proxy mode state holder
//!
//! Owns the current [`ProxyMode`] of one proxy repository and applies the
//! transition rules:
//!
//! - a transition to the current mode is suppressed, nothing is published
//! - `BlockedManual` is never overwritten by `BlockedAuto`
//! - `BlockedAuto` is refused while auto-blocking is disabled
//!
//! Accepted transitions are published as `ProxyModeChanged` events while the
//! state lock is held, so observers see them in the order they happened.

use depot_core::{ProxyMode, ProxyModeTransition, RepositoryEvent, RepositoryId};
use depot_events::EventPublisher;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug)]
struct ModeInner {
    mode: ProxyMode,
    auto_block_enabled: bool,
}

/// Shared proxy mode of a repository.
pub struct ProxyModeState {
    repository: RepositoryId,
    inner: Mutex<ModeInner>,
    publisher: Arc<dyn EventPublisher>,
}

impl ProxyModeState {
    pub fn new(
        repository: RepositoryId,
        mode: ProxyMode,
        auto_block_enabled: bool,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            repository,
            inner: Mutex::new(ModeInner {
                mode,
                auto_block_enabled,
            }),
            publisher,
        }
    }

    pub fn repository(&self) -> &RepositoryId {
        &self.repository
    }

    pub fn mode(&self) -> ProxyMode {
        self.lock().mode
    }

    pub fn is_auto_block_enabled(&self) -> bool {
        self.lock().auto_block_enabled
    }

    /// Move to `new_mode`.
    ///
    /// # Arguments
    /// * `new_mode` - Target mode
    /// * `cause` - Description of the failure that caused a block, if any
    ///
    /// # Returns
    /// The transition that happened, or `None` if the mode did not change.
    pub fn set_mode(&self, new_mode: ProxyMode, cause: Option<String>) -> Option<ProxyModeTransition> {
        let mut inner = self.lock();
        self.apply(&mut inner, new_mode, cause)
    }

    /// Move to `new_mode` only if the current mode is still `expected`.
    ///
    /// The check and the transition happen under one lock, so a concurrent
    /// manual block cannot be lifted by an automatic unblock.
    pub fn transition_from(
        &self,
        expected: ProxyMode,
        new_mode: ProxyMode,
        cause: Option<String>,
    ) -> Option<ProxyModeTransition> {
        let mut inner = self.lock();
        if inner.mode != expected {
            debug!(
                repository = %self.repository,
                expected = %expected,
                actual = %inner.mode,
                "Proxy mode moved on, transition skipped"
            );
            return None;
        }
        self.apply(&mut inner, new_mode, cause)
    }

    /// Enable or disable auto-blocking. Disabling it while auto-blocked
    /// returns the repository to `Allow`.
    pub fn set_auto_block_enabled(&self, enabled: bool) -> Option<ProxyModeTransition> {
        let mut inner = self.lock();
        inner.auto_block_enabled = enabled;
        if !enabled && inner.mode == ProxyMode::BlockedAuto {
            return self.apply(&mut inner, ProxyMode::Allow, None);
        }
        None
    }

    fn apply(
        &self,
        inner: &mut ModeInner,
        new_mode: ProxyMode,
        cause: Option<String>,
    ) -> Option<ProxyModeTransition> {
        if new_mode == ProxyMode::BlockedAuto {
            if inner.mode == ProxyMode::BlockedManual {
                debug!(repository = %self.repository, "Manually blocked, ignoring auto-block");
                return None;
            }
            if !inner.auto_block_enabled {
                debug!(repository = %self.repository, "Auto-block disabled, ignoring auto-block");
                return None;
            }
        }

        let transition = ProxyModeTransition::between(inner.mode, new_mode, cause)?;
        inner.mode = new_mode;

        match new_mode {
            ProxyMode::BlockedAuto => warn!(
                repository = %self.repository,
                cause = transition.cause().unwrap_or("unknown"),
                "Remote unavailable, proxy auto-blocked"
            ),
            ProxyMode::BlockedManual => warn!(
                repository = %self.repository,
                old_mode = %transition.old_mode(),
                "Proxy blocked manually"
            ),
            ProxyMode::Allow if transition.old_mode().should_auto_unblock() => warn!(
                repository = %self.repository,
                "Remote available again, proxy auto-unblocked"
            ),
            ProxyMode::Allow => info!(
                repository = %self.repository,
                old_mode = %transition.old_mode(),
                "Proxy unblocked"
            ),
        }

        self.publisher.publish(RepositoryEvent::proxy_mode_changed(
            self.repository.clone(),
            &transition,
        ));
        Some(transition)
    }

    fn lock(&self) -> MutexGuard<'_, ModeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ProxyModeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ProxyModeState")
            .field("repository", &self.repository)
            .field("mode", &inner.mode)
            .field("auto_block_enabled", &inner.auto_block_enabled)
            .finish()
    }
}
