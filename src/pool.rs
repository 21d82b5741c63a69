//! Connection-pool bookkeeping.
//!
//! Requests served by the pooling engine are tracked per [`PoolKey`], the
//! identity of a connection group: target host and port, plus the proxy
//! credentials and address when a proxy is used. The counts are kept at the
//! request level. They mirror how the engine's own pool is used but do not
//! observe its sockets. Each dispatch holds a
//! [`PoolLease`]; a lease that is not finished releases its slot when it is
//! dropped, so every failure path (including cancellation) gives the slot
//! back.

use std::{
    borrow::Borrow,
    collections::HashMap,
    fmt,
    sync::{Mutex, PoisonError},
};

use tracing::trace;

use crate::request::{PreparedRequest, ProxyUrl};

/// The identity of a pooled connection group.
///
/// Rendered as `{host}:{port}`, followed by
/// `:{user}:{pass}@{proxy_host}:{proxy_port}` when a proxy is used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey(String);

impl PoolKey {
    /// Builds a key from its components.
    #[must_use]
    pub fn new(host: &str, port: u16, proxy: Option<&ProxyUrl>) -> Self {
        let mut key = format!("{host}:{port}");
        if let Some(proxy) = proxy {
            key.push_str(&format!(
                ":{}:{}@{}:{}",
                proxy.username().unwrap_or_default(),
                proxy.password().unwrap_or_default(),
                proxy.host(),
                proxy.port().map(|p| p.to_string()).unwrap_or_default(),
            ));
        }
        Self(key)
    }

    /// Derives the key for a prepared request.
    #[must_use]
    pub fn for_request(request: &PreparedRequest) -> Self {
        let uri = request.uri();
        let port = uri.port_u16().unwrap_or_else(|| {
            if uri.scheme_str() == Some("https") {
                443
            } else {
                80
            }
        });
        Self::new(uri.host().unwrap_or_default(), port, request.proxy())
    }

    /// Returns the key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PoolKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PoolKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PoolKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A snapshot of one connection group, counted in request slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    /// Requests currently in flight.
    pub in_use: usize,
    /// Slots freed by completed requests and available for reuse, capped at
    /// the idle limit.
    pub idle: usize,
    /// Slots taken when no idle slot was free.
    pub created: u64,
    /// Slots released after a failed request.
    pub failed: u64,
}

/// Per-key pool bookkeeping for one client.
#[derive(Debug)]
pub struct PoolRegistry {
    max_idle: usize,
    groups: Mutex<HashMap<PoolKey, PoolStatus>>,
}

impl PoolRegistry {
    /// Creates a registry keeping at most `max_idle` idle slots per key.
    #[must_use]
    pub fn new(max_idle: usize) -> Self {
        Self {
            max_idle,
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the status of a group, or `None` if the key was never used or
    /// has been released.
    #[must_use]
    pub fn status(&self, key: &str) -> Option<PoolStatus> {
        self.lock().get(key).copied()
    }

    /// Forgets a group and its counts. Empty or unknown keys are a no-op.
    pub fn release(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        if self.lock().remove(key).is_some() {
            trace!(key, "released connection group");
        }
    }

    /// Takes a slot in the group for `key`, reusing an idle slot if one is
    /// available.
    pub fn acquire(&self, key: PoolKey) -> PoolLease<'_> {
        {
            let mut groups = self.lock();
            let group = groups.entry(key.clone()).or_default();
            group.in_use += 1;
            if group.idle > 0 {
                group.idle -= 1;
            } else {
                group.created += 1;
            }
            trace!(key = key.as_str(), in_use = group.in_use, "acquired pool slot");
        }
        PoolLease {
            registry: self,
            key,
            finished: false,
        }
    }

    fn check_in(&self, key: &PoolKey) {
        let mut groups = self.lock();
        if let Some(group) = groups.get_mut(key) {
            group.in_use = group.in_use.saturating_sub(1);
            if group.idle < self.max_idle {
                group.idle += 1;
            }
        }
    }

    fn discard(&self, key: &PoolKey) {
        let mut groups = self.lock();
        if let Some(group) = groups.get_mut(key) {
            group.in_use = group.in_use.saturating_sub(1);
            group.failed += 1;
            trace!(key = key.as_str(), failed = group.failed, "released pool slot after failure");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PoolKey, PoolStatus>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

/// A slot held for the duration of one request.
#[derive(Debug)]
pub struct PoolLease<'a> {
    registry: &'a PoolRegistry,
    key: PoolKey,
    finished: bool,
}

impl PoolLease<'_> {
    /// Returns the slot to the group as idle.
    pub fn finish(mut self) {
        self.finished = true;
        self.registry.check_in(&self.key);
    }
}

impl Drop for PoolLease<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.registry.discard(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_includes_proxy_credentials() {
        let proxy = ProxyUrl::parse("bob:pw@proxy.local:3128").unwrap();
        assert_eq!(PoolKey::new("api.example", 443, None).as_str(), "api.example:443");
        assert_eq!(
            PoolKey::new("api.example", 443, Some(&proxy)).as_str(),
            "api.example:443:bob:pw@proxy.local:3128"
        );
    }

    #[test]
    fn unknown_key_has_no_status() {
        let registry = PoolRegistry::default();
        assert_eq!(registry.status("never:80"), None);
        registry.release("never:80");
        registry.release("");
    }

    #[test]
    fn finished_lease_returns_slot_to_idle() {
        let registry = PoolRegistry::default();
        let key = PoolKey::from("host:80");

        let lease = registry.acquire(key.clone());
        assert_eq!(registry.status("host:80").unwrap().in_use, 1);
        lease.finish();

        let status = registry.status("host:80").unwrap();
        assert_eq!(status, PoolStatus { in_use: 0, idle: 1, created: 1, failed: 0 });

        registry.acquire(key).finish();
        assert_eq!(registry.status("host:80").unwrap().created, 1);
    }

    #[test]
    fn dropped_lease_counts_as_failure() {
        let registry = PoolRegistry::default();
        drop(registry.acquire(PoolKey::from("host:80")));

        let status = registry.status("host:80").unwrap();
        assert_eq!(status.in_use, 0);
        assert_eq!(status.idle, 0);
        assert_eq!(status.failed, 1);
    }

    #[test]
    fn idle_slots_are_capped() {
        let registry = PoolRegistry::new(1);
        let a = registry.acquire(PoolKey::from("host:80"));
        let b = registry.acquire(PoolKey::from("host:80"));
        a.finish();
        b.finish();
        assert_eq!(registry.status("host:80").unwrap().idle, 1);
    }

    #[test]
    fn release_forgets_the_group() {
        let registry = PoolRegistry::default();
        registry.acquire(PoolKey::from("host:80")).finish();
        registry.release("host:80");
        assert_eq!(registry.status("host:80"), None);
    }
}
