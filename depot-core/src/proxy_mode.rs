//! Proxy mode of a proxying repository

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a proxy repository may contact its remote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProxyMode {
    /// Remote access allowed
    #[default]
    Allow,
    /// Blocked after failed remote probes, cleared by the next successful probe
    BlockedAuto,
    /// Blocked by an administrator, cleared only by an administrator
    BlockedManual,
}

impl ProxyMode {
    /// True when outbound remote requests are permitted.
    pub fn should_proxy(&self) -> bool {
        matches!(self, ProxyMode::Allow)
    }

    /// True when a successful remote probe may lift the block.
    pub fn should_auto_unblock(&self) -> bool {
        matches!(self, ProxyMode::BlockedAuto)
    }

    pub fn is_blocked(&self) -> bool {
        !self.should_proxy()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::Allow => "ALLOW",
            ProxyMode::BlockedAuto => "BLOCKED_AUTO",
            ProxyMode::BlockedManual => "BLOCKED_MANUAL",
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALLOW" => Ok(ProxyMode::Allow),
            "BLOCKED_AUTO" => Ok(ProxyMode::BlockedAuto),
            "BLOCKED_MANUAL" => Ok(ProxyMode::BlockedManual),
            other => Err(format!("unknown proxy mode: {}", other)),
        }
    }
}

/// A proxy mode change that actually happened.
///
/// Only constructible through [`ProxyModeTransition::between`], which refuses
/// to build a record when nothing changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyModeTransition {
    old: ProxyMode,
    new: ProxyMode,
    cause: Option<String>,
}

impl ProxyModeTransition {
    /// Record a transition, or `None` when `old == new`.
    pub fn between(old: ProxyMode, new: ProxyMode, cause: Option<String>) -> Option<Self> {
        if old == new {
            return None;
        }
        Some(Self { old, new, cause })
    }

    pub fn old_mode(&self) -> ProxyMode {
        self.old
    }

    pub fn new_mode(&self) -> ProxyMode {
        self.new
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_allow_proxies() {
        assert!(ProxyMode::Allow.should_proxy());
        assert!(!ProxyMode::BlockedAuto.should_proxy());
        assert!(!ProxyMode::BlockedManual.should_proxy());
    }

    #[test]
    fn test_only_auto_block_auto_unblocks() {
        assert!(ProxyMode::BlockedAuto.should_auto_unblock());
        assert!(!ProxyMode::BlockedManual.should_auto_unblock());
        assert!(!ProxyMode::Allow.should_auto_unblock());
    }

    #[test]
    fn test_display_and_parse() {
        for mode in [ProxyMode::Allow, ProxyMode::BlockedAuto, ProxyMode::BlockedManual] {
            assert_eq!(mode.to_string().parse::<ProxyMode>(), Ok(mode));
        }
        assert_eq!(ProxyMode::BlockedManual.to_string(), "BLOCKED_MANUAL");
        assert!("OPEN".parse::<ProxyMode>().is_err());
    }

    #[test]
    fn test_serde_uses_screaming_case() {
        let json = serde_json::to_string(&ProxyMode::BlockedAuto).unwrap();
        assert_eq!(json, "\"BLOCKED_AUTO\"");
    }

    #[test]
    fn test_no_op_transition_is_not_recorded() {
        assert!(ProxyModeTransition::between(ProxyMode::Allow, ProxyMode::Allow, None).is_none());
        let t = ProxyModeTransition::between(
            ProxyMode::Allow,
            ProxyMode::BlockedAuto,
            Some("connect refused".to_string()),
        )
        .unwrap();
        assert_eq!(t.old_mode(), ProxyMode::Allow);
        assert_eq!(t.new_mode(), ProxyMode::BlockedAuto);
        assert_eq!(t.cause(), Some("connect refused"));
    }
}
