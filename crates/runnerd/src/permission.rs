//! Allow-list of commands the daemon is permitted to execute.
//!
//! The registry holds an immutable [`AllowList`] behind a readers-writer lock.
//! Reloading builds a complete replacement set before taking the write lock
//! and swapping it in, so a concurrent check observes either the old list or
//! the new one, never a mixture.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Character that causes a request to be rejected regardless of the allow-list.
const FORBIDDEN_MARKER: char = '&';

/// Decides whether a parsed request may be executed.
#[cfg_attr(test, mockall::automock)]
pub trait CommandPolicy: Send + Sync {
    /// Returns `true` when the request may run.
    fn is_allowed(&self, request: &[String]) -> bool;
}

/// Immutable set of permitted command names.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AllowList {
    commands: HashSet<String>,
}

impl AllowList {
    /// Builds a list from a raw payload of whitespace-separated command names.
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let commands = text.split_whitespace().map(str::to_owned).collect();
        Self { commands }
    }

    /// Returns `true` when `command` is listed.
    #[must_use]
    pub fn contains(&self, command: &str) -> bool {
        self.commands.contains(command)
    }

    /// Number of listed commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` when nothing is permitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Thread-safe, reloadable allow-list.
#[derive(Debug, Default)]
pub struct PermissionRegistry {
    current: RwLock<Arc<AllowList>>,
}

impl PermissionRegistry {
    /// Creates a registry that denies everything until the first reload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the allow-list with the commands named in `payload` and
    /// returns how many commands are now permitted.
    ///
    /// Empty or malformed payloads yield an empty, deny-all list.
    pub fn reload(&self, payload: &[u8]) -> usize {
        let replacement = Arc::new(AllowList::from_payload(payload));
        let count = replacement.len();
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = replacement;
        count
    }

    /// Returns the allow-list in force at the time of the call.
    #[must_use]
    pub fn snapshot(&self) -> Arc<AllowList> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }
}

impl CommandPolicy for PermissionRegistry {
    fn is_allowed(&self, request: &[String]) -> bool {
        let Some(command) = request.first() else {
            return false;
        };
        if request
            .iter()
            .any(|token| token.contains(FORBIDDEN_MARKER))
        {
            return false;
        }
        self.snapshot().contains(command)
    }
}
