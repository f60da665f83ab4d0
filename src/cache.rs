use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

/// Kinds of upstream reads the gateway caches, each with its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Branch,
    Vehicle,
    Invoice,
    Delivery,
    Expense,
}

impl ResourceType {
    pub fn prefix(&self) -> &'static str {
        match self {
            ResourceType::Branch => "branch",
            ResourceType::Vehicle => "vehicle",
            ResourceType::Invoice => "invoice",
            ResourceType::Delivery => "delivery",
            ResourceType::Expense => "expense",
        }
    }
}

/// Per-resource expiry. Reference data lives long, transactional data short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub branch: Duration,
    pub vehicle: Duration,
    pub invoice: Duration,
    pub delivery: Duration,
    pub expense: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            branch: Duration::from_secs(24 * 3600),
            vehicle: Duration::from_secs(12 * 3600),
            invoice: Duration::from_secs(3600),
            delivery: Duration::from_secs(30 * 60),
            expense: Duration::from_secs(30 * 60),
        }
    }
}

impl CachePolicy {
    pub fn ttl_for(&self, resource: ResourceType) -> Duration {
        match resource {
            ResourceType::Branch => self.branch,
            ResourceType::Vehicle => self.vehicle,
            ResourceType::Invoice => self.invoice,
            ResourceType::Delivery => self.delivery,
            ResourceType::Expense => self.expense,
        }
    }
}

/// Parameters that identify one cached result set. Ordered, so insertion
/// order never changes the derived key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheParams(BTreeMap<String, String>);

impl CacheParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Adds the parameter only when a value is present.
    pub fn with_opt(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// Derive the cache key for a resource query.
///
/// Keys stay human readable (`invoice_<branch>_<date>[_ranged]`,
/// `vehicle_<branch>`, `branch_config`) so that substring invalidation can
/// target a branch. Components are escaped so separators inside values
/// cannot make two different queries share a key.
pub fn cache_key(resource: ResourceType, params: &CacheParams) -> String {
    let branch = encode_component(params.get("branch").unwrap_or_default());
    match resource {
        ResourceType::Branch => "branch_config".to_string(),
        ResourceType::Vehicle => format!("vehicle_{}", branch),
        ResourceType::Invoice => {
            let date = encode_component(params.get("date").unwrap_or_default());
            let ranged = params.get("ranged") == Some("true");
            format!(
                "invoice_{}_{}{}",
                branch,
                date,
                if ranged { "_ranged" } else { "" }
            )
        }
        ResourceType::Delivery | ResourceType::Expense => {
            let rest: Vec<String> = params
                .0
                .iter()
                .filter(|(k, _)| k.as_str() != "branch")
                .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
                .collect();
            format!("{}_{}_{}", resource.prefix(), branch, rest.join(";"))
        }
    }
}

/// Key prefix covering every entry of `resource` for one branch. Used with
/// [`CacheStore::invalidate_by_pattern`] after mutations. The trailing
/// separator keeps branch `A` from matching branch `AB`. Not for vehicle
/// keys, which end at the branch.
pub fn branch_pattern(resource: ResourceType, branch: &str) -> String {
    format!("{}_{}_", resource.prefix(), encode_component(branch))
}

fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            '=' => out.push_str("%3D"),
            ';' => out.push_str("%3B"),
            other => out.push(other),
        }
    }
    out
}

#[derive(Clone)]
pub(crate) struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub keys: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Process-local TTL cache shared by all in-flight requests.
///
/// Entries are checked on read and evicted lazily; `evict_expired()` is run
/// periodically by the sweeper job to bound memory. Concurrent misses on the
/// same key each fetch upstream; there is no fill coalescing.
#[derive(Clone)]
pub struct CacheStore {
    pub(crate) entries: Arc<DashMap<String, CacheEntry>>,
    policy: CachePolicy,
    enabled: bool,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl CacheStore {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            policy,
            enabled: true,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A store that never retains anything; every lookup goes upstream.
    pub fn disabled(policy: CachePolicy) -> Self {
        Self {
            enabled: false,
            ..Self::new(policy)
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_fresh(Instant::now()) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            // expired; drop the ref before removing
            drop(entry);
            self.evict_if_stale(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Remove `key` only if it is still expired at removal time, so a value
    /// written concurrently by `set` survives.
    fn evict_if_stale(&self, key: &str) -> bool {
        self.entries
            .remove_if(key, |_, entry| !entry.is_fresh(Instant::now()))
            .is_some()
    }

    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        if !self.enabled {
            return;
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Delete every key containing `pattern`. Returns how many were removed.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = !key.contains(pattern);
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            tracing::debug!(pattern = pattern, removed = removed, "cache entries invalidated");
        }
        removed
    }

    pub fn clear(&self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Remove all expired entries.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.is_fresh(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            keys: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Serve `resource` from cache, or run `fetch` and cache a successful result
    /// under the resource's TTL. Failed fetches are never cached.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        resource: ResourceType,
        params: &CacheParams,
        fetch: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let key = cache_key(resource, params);
        if let Some(hit) = self.get(&key) {
            tracing::debug!(cache_key = %key, "cache hit");
            return Ok(hit);
        }

        tracing::debug!(cache_key = %key, "cache miss, fetching upstream");
        let value = fetch().await?;
        self.set(&key, value.clone(), self.policy.ttl_for(resource));
        Ok(value)
    }
}
