//! Credential pools with health tracking
//!
//! Each provider owns a [`ProviderPool`]: an arena of shared
//! [`CredentialRecord`]s, each guarding its own [`CredentialState`], plus a
//! rotation cursor. Acquisition never waits. A caller either gets a
//! [`CredentialLease`] on an eligible record right away or learns that none
//! is eligible.
//!
//! Record status moves only through this state machine:
//!
//! - `Active` → `Disabled` on an authentication failure or once
//!   `error_count` reaches the limit
//! - `Active` → `CoolingDown` when rate limited; acquisition reactivates the
//!   record once the cooldown has passed
//! - any status → `Active` after a successful usage sync

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use secrecy::SecretString;
use switchyard_config::{Config, CredentialConfig, PoolConfig, ProviderType};
use thiserror::Error;
use tokio::time::Instant;

use crate::error::ProviderError;
use crate::observer::Observer;

static NEXT_CREDENTIAL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle of a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialId(u64);

impl CredentialId {
    fn next() -> Self {
        Self(NEXT_CREDENTIAL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cred-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Active,
    /// Rate limited until the given instant
    CoolingDown { until: Instant },
    Disabled,
}

/// Mutable health of one credential
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialState {
    pub error_count: u32,
    pub status: CredentialStatus,
    pub last_sync_at: Option<Instant>,
    pub usage_snapshot: Option<serde_json::Value>,
    pub needs_refresh: bool,
    pub in_flight: u32,
}

impl Default for CredentialState {
    fn default() -> Self {
        Self {
            error_count: 0,
            status: CredentialStatus::Active,
            last_sync_at: None,
            usage_snapshot: None,
            needs_refresh: false,
            in_flight: 0,
        }
    }
}

impl CredentialState {
    fn is_stale(&self, now: Instant, near_expiry: Duration) -> bool {
        self.last_sync_at
            .is_none_or(|synced| now.saturating_duration_since(synced) > near_expiry)
    }
}

/// A pooled credential
pub struct CredentialRecord {
    pub id: CredentialId,
    pub provider: ProviderType,
    pub label: String,
    pub secret: SecretString,
    /// Provider-specific extras such as `cf_clearance`, `profile_arn` or `region`
    pub attributes: BTreeMap<String, String>,
    /// Switched off in configuration; never leased or refreshed
    pub held: bool,
    state: Mutex<CredentialState>,
}

impl CredentialRecord {
    pub fn new(provider: ProviderType, label: impl Into<String>, secret: SecretString) -> Self {
        Self {
            id: CredentialId::next(),
            provider,
            label: label.into(),
            secret,
            attributes: BTreeMap::new(),
            held: false,
            state: Mutex::new(CredentialState::default()),
        }
    }

    pub fn from_config(provider: ProviderType, index: usize, config: &CredentialConfig) -> Self {
        let label = config
            .label
            .clone()
            .unwrap_or_else(|| format!("{provider}-{index}"));

        let mut record = Self::new(provider, label, config.secret.clone()).with_attributes(config.attributes.clone());
        if config.disabled {
            record.held = true;
            record.state.get_mut().status = CredentialStatus::Disabled;
        }
        record
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Snapshot of the current state
    pub fn state(&self) -> CredentialState {
        self.state.lock().clone()
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("label", &self.label)
            .field("held", &self.held)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    #[error("pool has no credentials")]
    Empty,

    #[error("no eligible credential")]
    NoEligible,
}

/// How the pool reacts to request and sync outcomes
#[derive(Debug, Clone, Copy)]
pub struct PoolPolicy {
    pub max_error_count: u32,
    pub near_expiry: Duration,
    pub rate_limit_cooldown: Duration,
    pub reset_errors_on_success: bool,
    pub reset_errors_on_sync: bool,
}

impl From<&PoolConfig> for PoolPolicy {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_error_count: config.max_error_count,
            near_expiry: config.near_expiry(),
            rate_limit_cooldown: config.rate_limit_cooldown(),
            reset_errors_on_success: config.reset_errors_on_success,
            reset_errors_on_sync: config.reset_errors_on_sync,
        }
    }
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

/// Credentials of one provider
pub struct ProviderPool {
    provider: ProviderType,
    records: RwLock<Vec<Arc<CredentialRecord>>>,
    cursor: AtomicUsize,
    policy: PoolPolicy,
    observer: Arc<dyn Observer>,
}

impl ProviderPool {
    pub fn new(provider: ProviderType, policy: PoolPolicy, observer: Arc<dyn Observer>) -> Self {
        Self {
            provider,
            records: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            policy,
            observer,
        }
    }

    pub const fn provider(&self) -> ProviderType {
        self.provider
    }

    pub const fn policy(&self) -> &PoolPolicy {
        &self.policy
    }

    pub fn insert(&self, record: CredentialRecord) -> CredentialId {
        let id = record.id;
        self.records.write().push(Arc::new(record));
        tracing::debug!(provider = %self.provider, credential = %id, "credential added to pool");
        id
    }

    pub fn remove(&self, id: CredentialId) -> Option<Arc<CredentialRecord>> {
        let mut records = self.records.write();
        let position = records.iter().position(|record| record.id == id)?;
        Some(records.remove(position))
    }

    pub fn get(&self, id: CredentialId) -> Option<Arc<CredentialRecord>> {
        self.records.read().iter().find(|record| record.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of the arena
    pub fn records(&self) -> Vec<Arc<CredentialRecord>> {
        self.records.read().clone()
    }

    /// Lease any eligible credential
    ///
    /// # Errors
    ///
    /// Returns an error when the pool is empty or nothing is eligible.
    pub fn acquire(self: &Arc<Self>) -> Result<CredentialLease, AcquireError> {
        self.acquire_excluding(&HashSet::new())
    }

    /// Lease an eligible credential not in `tried`
    ///
    /// Racing callers start from distinct slots of the rotation.
    ///
    /// # Errors
    ///
    /// Returns `Empty` for an empty pool and `NoEligible` when every record
    /// is tried, disabled or cooling down.
    pub fn acquire_excluding(self: &Arc<Self>, tried: &HashSet<CredentialId>) -> Result<CredentialLease, AcquireError> {
        let records = self.records.read();
        let len = records.len();
        if len == 0 {
            return Err(AcquireError::Empty);
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        let now = Instant::now();

        for offset in 0..len {
            let record = &records[(start + offset) % len];
            if tried.contains(&record.id) {
                continue;
            }

            let mut state = record.state.lock();
            let reactivated = match state.status {
                CredentialStatus::Disabled => continue,
                CredentialStatus::CoolingDown { until } if until > now => continue,
                CredentialStatus::CoolingDown { .. } => {
                    state.status = CredentialStatus::Active;
                    true
                }
                CredentialStatus::Active => false,
            };

            if state.is_stale(now, self.policy.near_expiry) {
                state.needs_refresh = true;
            }
            state.in_flight += 1;
            let snapshot = reactivated.then(|| state.clone());
            drop(state);

            if let Some(snapshot) = snapshot {
                tracing::info!(provider = %self.provider, credential = %record.id, "cooldown over, credential active");
                self.observer.credential_state_changed(self.provider, record.id, &snapshot);
            }

            return Ok(CredentialLease {
                pool: Arc::clone(self),
                record: Arc::clone(record),
            });
        }

        Err(AcquireError::NoEligible)
    }

    /// Flag stale records and return those due for a usage sync
    pub fn scan_refresh_candidates(&self) -> Vec<Arc<CredentialRecord>> {
        let now = Instant::now();
        self.records
            .read()
            .iter()
            .filter(|record| !record.held)
            .filter(|record| {
                let mut state = record.state.lock();
                if state.is_stale(now, self.policy.near_expiry) {
                    state.needs_refresh = true;
                }
                state.needs_refresh
            })
            .cloned()
            .collect()
    }

    /// Apply a successful usage sync
    pub fn record_sync_success(&self, record: &CredentialRecord, snapshot: serde_json::Value) {
        let mut state = record.state.lock();
        let previous = state.status;
        state.status = CredentialStatus::Active;
        if self.policy.reset_errors_on_sync {
            state.error_count = 0;
        }
        state.last_sync_at = Some(Instant::now());
        state.usage_snapshot = Some(snapshot);
        state.needs_refresh = false;
        let snapshot = state.clone();
        drop(state);

        if previous != CredentialStatus::Active {
            tracing::info!(provider = %self.provider, credential = %record.id, "credential reactivated by refresh");
        }
        self.observer.credential_state_changed(self.provider, record.id, &snapshot);
    }

    /// Apply a failed usage sync; never disables the record on its own
    pub fn record_sync_failure(&self, record: &CredentialRecord) {
        let mut state = record.state.lock();
        state.error_count = state.error_count.saturating_add(1);
        let snapshot = state.clone();
        drop(state);

        self.observer.credential_state_changed(self.provider, record.id, &snapshot);
    }

    fn record_success(&self, record: &CredentialRecord) {
        if !self.policy.reset_errors_on_success {
            return;
        }

        let mut state = record.state.lock();
        if state.error_count == 0 {
            return;
        }
        state.error_count = 0;
        let snapshot = state.clone();
        drop(state);

        self.observer.credential_state_changed(self.provider, record.id, &snapshot);
    }

    /// Apply the failure policy; returns whether the record is still usable
    fn record_failure(&self, record: &CredentialRecord, error: &ProviderError) -> bool {
        if matches!(error, ProviderError::Protocol(_)) {
            return true;
        }

        let mut state = record.state.lock();
        state.error_count = state.error_count.saturating_add(1);

        let next = match error {
            ProviderError::Auth(_) => CredentialStatus::Disabled,
            _ if state.error_count >= self.policy.max_error_count => CredentialStatus::Disabled,
            ProviderError::RateLimited { retry_after, .. } if state.status == CredentialStatus::Active => {
                CredentialStatus::CoolingDown {
                    until: Instant::now() + retry_after.unwrap_or(self.policy.rate_limit_cooldown),
                }
            }
            _ => state.status,
        };
        let changed = next != state.status;
        state.status = next;
        let usable = next == CredentialStatus::Active;
        let snapshot = state.clone();
        drop(state);

        match next {
            CredentialStatus::Disabled if changed => tracing::warn!(
                provider = %self.provider,
                credential = %record.id,
                error_count = snapshot.error_count,
                error = %error,
                "credential disabled"
            ),
            CredentialStatus::CoolingDown { .. } if changed => tracing::info!(
                provider = %self.provider,
                credential = %record.id,
                "credential rate limited, cooling down"
            ),
            _ => {}
        }
        self.observer.credential_state_changed(self.provider, record.id, &snapshot);

        usable
    }

    fn release(record: &CredentialRecord) {
        let mut state = record.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

/// Exclusive use of one credential for one call
///
/// Dropping a lease without settling it only releases the in-flight slot.
pub struct CredentialLease {
    pool: Arc<ProviderPool>,
    record: Arc<CredentialRecord>,
}

impl CredentialLease {
    pub fn id(&self) -> CredentialId {
        self.record.id
    }

    pub fn record(&self) -> &CredentialRecord {
        &self.record
    }

    pub fn provider(&self) -> ProviderType {
        self.pool.provider
    }

    /// Record a failed attempt while keeping the lease
    ///
    /// Returns whether the credential may be tried again.
    pub fn record_failure(&self, error: &ProviderError) -> bool {
        self.pool.record_failure(&self.record, error)
    }

    /// Settle after a successful call
    pub fn succeed(self) {
        self.pool.record_success(&self.record);
    }

    /// Settle after a failed call
    pub fn fail(self, error: &ProviderError) {
        self.pool.record_failure(&self.record, error);
    }
}

impl Drop for CredentialLease {
    fn drop(&mut self) {
        ProviderPool::release(&self.record);
    }
}

impl fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialLease")
            .field("provider", &self.pool.provider)
            .field("credential", &self.record.id)
            .finish()
    }
}

/// Every provider's pool
pub struct PoolManager {
    pools: IndexMap<ProviderType, Arc<ProviderPool>>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self { pools: IndexMap::new() }
    }

    /// Pools for every provider with credentials configured
    pub fn from_config(config: &Config, observer: &Arc<dyn Observer>) -> Self {
        let policy = PoolPolicy::from(&config.pool);
        let mut manager = Self::new();

        for (provider, provider_config) in &config.providers {
            if provider_config.credentials.is_empty() {
                continue;
            }

            let pool = ProviderPool::new(*provider, policy, Arc::clone(observer));
            for (index, credential) in provider_config.credentials.iter().enumerate() {
                pool.insert(CredentialRecord::from_config(*provider, index, credential));
            }

            tracing::info!(provider = %provider, credentials = pool.len(), "credential pool ready");
            manager.add_pool(Arc::new(pool));
        }

        manager
    }

    pub fn add_pool(&mut self, pool: Arc<ProviderPool>) {
        self.pools.insert(pool.provider(), pool);
    }

    pub fn get(&self, provider: ProviderType) -> Option<&Arc<ProviderPool>> {
        self.pools.get(&provider)
    }

    pub fn providers(&self) -> impl Iterator<Item = ProviderType> + '_ {
        self.pools.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProviderPool>> {
        self.pools.values()
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use secrecy::SecretString;

    use super::*;
    use crate::observer::NoopObserver;

    fn pool_with(count: usize, policy: PoolPolicy) -> (Arc<ProviderPool>, Vec<CredentialId>) {
        let pool = Arc::new(ProviderPool::new(ProviderType::Claude, policy, Arc::new(NoopObserver)));
        let ids = (0..count)
            .map(|i| {
                pool.insert(CredentialRecord::new(
                    ProviderType::Claude,
                    format!("key-{i}"),
                    SecretString::from(format!("sk-{i}")),
                ))
            })
            .collect();
        (pool, ids)
    }

    fn transport_error() -> ProviderError {
        ProviderError::Transport("reset".into())
    }

    #[test]
    fn empty_pool_is_distinguished() {
        let (pool, _) = pool_with(0, PoolPolicy::default());
        assert_eq!(pool.acquire().unwrap_err(), AcquireError::Empty);
    }

    #[test]
    fn rotation_starts_at_distinct_slots() {
        let (pool, ids) = pool_with(3, PoolPolicy::default());

        let leases: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        let mut seen: Vec<CredentialId> = leases.iter().map(CredentialLease::id).collect();
        seen.sort();
        assert_eq!(seen, ids);
        assert!(ids.iter().all(|id| pool.get(*id).unwrap().state().in_flight == 1));
    }

    #[test]
    fn tried_records_are_skipped() {
        let (pool, ids) = pool_with(2, PoolPolicy::default());

        let tried: HashSet<CredentialId> = [ids[0]].into_iter().collect();
        for _ in 0..4 {
            assert_eq!(pool.acquire_excluding(&tried).unwrap().id(), ids[1]);
        }

        let all: HashSet<CredentialId> = ids.iter().copied().collect();
        assert_eq!(pool.acquire_excluding(&all).unwrap_err(), AcquireError::NoEligible);
    }

    #[test]
    fn auth_failure_disables_at_once() {
        let (pool, ids) = pool_with(1, PoolPolicy::default());

        pool.acquire().unwrap().fail(&ProviderError::Auth("revoked".into()));

        let state = pool.get(ids[0]).unwrap().state();
        assert_eq!(state.status, CredentialStatus::Disabled);
        assert_eq!(state.in_flight, 0);
        assert_eq!(pool.acquire().unwrap_err(), AcquireError::NoEligible);
    }

    #[test]
    fn repeated_failures_disable_at_the_limit() {
        let policy = PoolPolicy {
            max_error_count: 3,
            ..PoolPolicy::default()
        };
        let (pool, ids) = pool_with(1, policy);

        for _ in 0..2 {
            pool.acquire().unwrap().fail(&transport_error());
        }
        assert_eq!(pool.get(ids[0]).unwrap().state().status, CredentialStatus::Active);

        pool.acquire().unwrap().fail(&transport_error());
        let state = pool.get(ids[0]).unwrap().state();
        assert_eq!(state.status, CredentialStatus::Disabled);
        assert_eq!(state.error_count, 3);
    }

    #[test]
    fn success_resets_errors_only_when_enabled() {
        let (pool, ids) = pool_with(1, PoolPolicy::default());
        pool.acquire().unwrap().fail(&transport_error());
        pool.acquire().unwrap().succeed();
        assert_eq!(pool.get(ids[0]).unwrap().state().error_count, 0);

        let policy = PoolPolicy {
            reset_errors_on_success: false,
            ..PoolPolicy::default()
        };
        let (pool, ids) = pool_with(1, policy);
        pool.acquire().unwrap().fail(&transport_error());
        pool.acquire().unwrap().succeed();
        assert_eq!(pool.get(ids[0]).unwrap().state().error_count, 1);
    }

    #[test]
    fn protocol_failures_carry_no_penalty() {
        let (pool, ids) = pool_with(1, PoolPolicy::default());
        pool.acquire().unwrap().fail(&ProviderError::Protocol("bad shape".into()));

        let state = pool.get(ids[0]).unwrap().state();
        assert_eq!(state.error_count, 0);
        assert_eq!(state.status, CredentialStatus::Active);
    }

    #[test]
    fn dropped_lease_only_releases() {
        let (pool, ids) = pool_with(1, PoolPolicy::default());
        let lease = pool.acquire().unwrap();
        assert_eq!(pool.get(ids[0]).unwrap().state().in_flight, 1);

        drop(lease);
        let state = pool.get(ids[0]).unwrap().state();
        assert_eq!(state.in_flight, 0);
        assert_eq!(state.error_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_credentials_cool_down() {
        let policy = PoolPolicy {
            rate_limit_cooldown: Duration::from_secs(30),
            ..PoolPolicy::default()
        };
        let (pool, ids) = pool_with(1, policy);

        pool.acquire().unwrap().fail(&ProviderError::RateLimited {
            retry_after: None,
            message: "slow down".into(),
        });
        assert!(matches!(
            pool.get(ids[0]).unwrap().state().status,
            CredentialStatus::CoolingDown { .. }
        ));
        assert_eq!(pool.acquire().unwrap_err(), AcquireError::NoEligible);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(pool.acquire().unwrap().id(), ids[0]);
        assert_eq!(pool.get(ids[0]).unwrap().state().status, CredentialStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_cooldown() {
        let (pool, _) = pool_with(1, PoolPolicy::default());

        pool.acquire().unwrap().fail(&ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
            message: "slow down".into(),
        });

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(pool.acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn staleness_flags_without_blocking() {
        let (pool, ids) = pool_with(1, PoolPolicy::default());
        let record = pool.get(ids[0]).unwrap();

        drop(pool.acquire().unwrap());
        assert!(record.state().needs_refresh);

        pool.record_sync_success(&record, serde_json::json!({"remaining": 5}));
        assert!(pool.scan_refresh_candidates().is_empty());

        tokio::time::advance(Duration::from_secs(16 * 60)).await;
        assert_eq!(pool.scan_refresh_candidates().len(), 1);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn sync_success_reactivates_and_resets() {
        let (pool, ids) = pool_with(1, PoolPolicy::default());
        let record = pool.get(ids[0]).unwrap();
        pool.acquire().unwrap().fail(&ProviderError::Auth("expired".into()));

        pool.record_sync_success(&record, serde_json::json!({"remaining": 10}));

        let state = record.state();
        assert_eq!(state.status, CredentialStatus::Active);
        assert_eq!(state.error_count, 0);
        assert_eq!(state.usage_snapshot, Some(serde_json::json!({"remaining": 10})));
        assert!(!state.needs_refresh);
        assert!(state.last_sync_at.is_some());
    }

    #[test]
    fn sync_keeps_errors_when_reset_disabled() {
        let policy = PoolPolicy {
            reset_errors_on_sync: false,
            ..PoolPolicy::default()
        };
        let (pool, ids) = pool_with(1, policy);
        let record = pool.get(ids[0]).unwrap();
        pool.acquire().unwrap().fail(&transport_error());

        pool.record_sync_success(&record, serde_json::json!({}));

        let state = record.state();
        assert_eq!(state.status, CredentialStatus::Active);
        assert_eq!(state.error_count, 1);
        assert!(state.last_sync_at.is_some());
    }

    #[test]
    fn sync_failure_counts_but_never_disables() {
        let policy = PoolPolicy {
            max_error_count: 1,
            ..PoolPolicy::default()
        };
        let (pool, ids) = pool_with(1, policy);
        let record = pool.get(ids[0]).unwrap();

        pool.record_sync_failure(&record);
        pool.record_sync_failure(&record);

        let state = record.state();
        assert_eq!(state.error_count, 2);
        assert_eq!(state.status, CredentialStatus::Active);
    }

    #[test]
    fn held_credentials_are_never_leased() {
        let config = CredentialConfig {
            label: None,
            secret: SecretString::from("sk"),
            attributes: BTreeMap::from([("region".to_owned(), "eu-west-1".to_owned())]),
            disabled: true,
        };
        let record = CredentialRecord::from_config(ProviderType::Kiro, 2, &config);
        assert_eq!(record.label, "kiro-2");
        assert_eq!(record.attribute("region"), Some("eu-west-1"));

        let pool = Arc::new(ProviderPool::new(ProviderType::Kiro, PoolPolicy::default(), Arc::new(NoopObserver)));
        pool.insert(record);
        assert_eq!(pool.acquire().unwrap_err(), AcquireError::NoEligible);
        assert!(pool.scan_refresh_candidates().is_empty());
    }

    #[test]
    fn removal_runs_beside_acquisition() {
        let (pool, ids) = pool_with(2, PoolPolicy::default());
        let lease = pool.acquire().unwrap();

        assert!(pool.remove(ids[0]).is_some());
        assert_eq!(pool.len(), 1);
        drop(lease);
        assert_eq!(pool.acquire().unwrap().id(), ids[1]);
    }
}
