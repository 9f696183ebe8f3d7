//! Network guard: unconditional interception of outbound connections
//! during replay.
//!
//! Agents call `check` before opening any socket. Hosts pass by exact
//! match or trailing-dot suffix match against the allow-list; everything
//! else fails with the fixed diagnostic substring the contract evaluator
//! greps for in the `run_finished` stderr tail.

use trajectly_types::{ENV_NETWORK_ALLOWLIST, ENV_REPLAY_GUARD, NETWORK_BLOCK_MESSAGE};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct NetworkGuard {
    allowlist: Vec<String>,
}

impl NetworkGuard {
    pub fn new(allowlist: &[String]) -> NetworkGuard {
        NetworkGuard {
            allowlist: allowlist
                .iter()
                .map(|host| host.trim().to_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
        }
    }

    fn allowed(&self, host: &str) -> bool {
        let host = host.trim().to_lowercase();
        if host.is_empty() {
            return false;
        }
        self.allowlist
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)))
    }

    /// Permit or block one outbound connection attempt.
    pub fn check(&self, host: &str) -> Result<()> {
        if self.allowed(host) {
            return Ok(());
        }
        let shown = if host.trim().is_empty() {
            "unknown"
        } else {
            host
        };
        Err(Error::NetworkBlocked(format!(
            "{}. Use recorded fixtures, configure contracts.network.allowlist, or disable replay mode. (host={})",
            NETWORK_BLOCK_MESSAGE,
            shown.trim().to_lowercase()
        )))
    }
}

/// Guard from the environment; `None` unless replay-guard mode is active.
pub fn network_guard_from_env() -> Option<NetworkGuard> {
    if std::env::var(ENV_REPLAY_GUARD).ok().as_deref() != Some("1") {
        return None;
    }
    let allowlist: Vec<String> = std::env::var(ENV_NETWORK_ALLOWLIST)
        .unwrap_or_default()
        .split(',')
        .map(str::to_string)
        .collect();
    Some(NetworkGuard::new(&allowlist))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_suffix_match() {
        let guard = NetworkGuard::new(&["api.example.com".to_string()]);
        assert!(guard.check("api.example.com").is_ok());
        assert!(guard.check("API.Example.Com").is_ok());
        assert!(guard.check("v2.api.example.com").is_ok());
        assert!(guard.check("evil-api.example.net").is_err());
        assert!(guard.check("notapi.example.com").is_err());
    }

    #[test]
    fn test_empty_allowlist_blocks_everything() {
        let guard = NetworkGuard::new(&[]);
        let err = guard.check("example.com").unwrap_err();
        assert!(err.to_string().contains(NETWORK_BLOCK_MESSAGE));
        assert!(err.to_string().contains("host=example.com"));
    }

    #[test]
    fn test_empty_host_blocked_as_unknown() {
        let guard = NetworkGuard::new(&["example.com".to_string()]);
        let err = guard.check("  ").unwrap_err();
        assert!(err.to_string().contains("host=unknown"));
    }
}
