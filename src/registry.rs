//! Topic-listener registry and prefix matching.
//!
//! The registry is an ordered structure: distinct prefixes are kept in
//! first-registration order, and entries under one prefix in registration
//! order. Dispatch order follows that iteration order.
//!
//! Matching is pure and independent of socket I/O, so the dispatch
//! contract can be tested without a connection.
//!
//! # Matching Rules
//!
//! - A listener registered on prefix `p` matches topic `t` when `t`
//!   starts with `p` (so the empty prefix matches everything).
//! - With `exact: true`, the match additionally requires `p == t`.
//! - One inbound envelope invokes a given listener at most once, even
//!   when several matching prefixes reference it.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

// ============================================================================
// Types
// ============================================================================

/// Listener callback type.
///
/// Called with `(topic, body)` for each matching inbound envelope.
/// Listeners are compared by `Arc` identity: registering the same `Arc`
/// twice under one prefix is a no-op.
pub type Listener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

// ============================================================================
// RegisterOptions
// ============================================================================

/// Options accepted by `register`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterOptions {
    /// Require the subscribed prefix to equal the message topic exactly,
    /// rather than merely prefixing it. Defaults to `false`.
    pub exact: bool,
}

impl RegisterOptions {
    /// Options with `exact` set.
    #[inline]
    #[must_use]
    pub const fn exact() -> Self {
        Self { exact: true }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// One registered listener under a prefix.
struct Entry {
    /// Exact-match flag from [`RegisterOptions`].
    exact: bool,
    /// The callback.
    listener: Listener,
}

/// All listeners registered under one prefix, in registration order.
struct PrefixEntries {
    /// The subscribed topic prefix.
    prefix: String,
    /// Entries in registration order.
    entries: Vec<Entry>,
}

/// Ordered topic-listener registry.
///
/// Owned by a connection; grows for the life of the connection (there is
/// no unregister operation).
#[derive(Default)]
pub struct Registry {
    /// Distinct prefixes in first-registration order.
    prefixes: Vec<PrefixEntries>,
}

impl Registry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener under a prefix.
    ///
    /// Duplicate registration of the same `(prefix, listener)` pair is a
    /// no-op, checked by `Arc` identity of the listener.
    ///
    /// Returns `true` if the registration was new.
    pub fn add(
        &mut self,
        prefix: impl Into<String>,
        listener: Listener,
        options: RegisterOptions,
    ) -> bool {
        let prefix = prefix.into();

        if let Some(group) = self.prefixes.iter_mut().find(|g| g.prefix == prefix) {
            if group
                .entries
                .iter()
                .any(|e| Arc::ptr_eq(&e.listener, &listener))
            {
                debug!(prefix = %prefix, "Duplicate registration ignored");
                return false;
            }
            group.entries.push(Entry {
                exact: options.exact,
                listener,
            });
        } else {
            self.prefixes.push(PrefixEntries {
                prefix,
                entries: vec![Entry {
                    exact: options.exact,
                    listener,
                }],
            });
        }

        true
    }

    /// Returns the listeners matching a topic, each at most once, in
    /// registry iteration order.
    ///
    /// The result is a snapshot: invoking it after the lock on the
    /// registry is released means listeners may re-enter `register`
    /// without deadlock, and registrations added mid-dispatch do not
    /// affect the current message.
    #[must_use]
    pub fn matching(&self, topic: &str) -> Vec<Listener> {
        let mut matched: Vec<Listener> = Vec::new();

        for group in &self.prefixes {
            for entry in &group.entries {
                if !prefix_matches(&group.prefix, entry.exact, topic) {
                    continue;
                }
                if matched.iter().any(|l| Arc::ptr_eq(l, &entry.listener)) {
                    continue;
                }
                matched.push(Arc::clone(&entry.listener));
            }
        }

        matched
    }

    /// Returns the total number of registered entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.prefixes.iter().map(|g| g.entries.len()).sum()
    }

    /// Returns `true` if no listeners are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

// ============================================================================
// Matching & Invocation
// ============================================================================

/// Returns `true` if a listener on `prefix` matches `topic`.
#[inline]
#[must_use]
pub fn prefix_matches(prefix: &str, exact: bool, topic: &str) -> bool {
    if exact {
        prefix == topic
    } else {
        topic.starts_with(prefix)
    }
}

/// Invokes each listener with `(topic, body)`, isolating panics.
///
/// A panicking listener is logged and does not prevent the remaining
/// listeners from running.
pub fn invoke_all(listeners: &[Listener], topic: &str, body: &Value) {
    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener(topic, body))).is_err() {
            error!(topic = %topic, "Listener panicked during dispatch");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
