//! In-process cache used when no backing store is configured or reachable

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::errors::{CacheError, CacheResult};
use super::r#trait::{CacheHealth, CacheMode, CacheStore, TTL_MISSING, TTL_PERSISTENT};

struct Slot {
    value: String,
    expires_at: Option<Instant>,
    /// Pending expiry task; aborted whenever the slot is replaced or removed
    timer: Option<AbortHandle>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

type SlotMap = HashMap<String, Slot>;

/// Map guarded by a mutex with one expiry timer per key carrying a TTL.
///
/// Reads also check the deadline, so an entry is never returned past its TTL even if its
/// timer has not fired yet (or could not be scheduled outside a runtime).
#[derive(Clone, Default)]
pub struct MemoryCache {
    slots: Arc<Mutex<SlotMap>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        let mut slots = self.slots.lock();
        Self::live_slot(&mut slots, key).map(|slot| slot.value.clone())
    }

    pub fn set_value(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let mut slots = self.slots.lock();
        self.insert_slot(&mut slots, key, value.to_string(), ttl);
    }

    pub fn del_value(&self, key: &str) -> u64 {
        let mut slots = self.slots.lock();
        Self::remove_slot(&mut slots, key)
    }

    pub fn exists_value(&self, key: &str) -> bool {
        let mut slots = self.slots.lock();
        Self::live_slot(&mut slots, key).is_some()
    }

    /// Increments the integer at `key`, keeping any TTL already attached to it.
    pub fn incr_value(&self, key: &str) -> CacheResult<i64> {
        let mut slots = self.slots.lock();
        match Self::live_slot(&mut slots, key) {
            Some(slot) => {
                let current: i64 = slot
                    .value
                    .parse()
                    .map_err(|_| CacheError::NotAnInteger(key.to_string()))?;
                let next = current
                    .checked_add(1)
                    .ok_or_else(|| CacheError::Overflow(key.to_string()))?;
                slot.value = next.to_string();
                Ok(next)
            }
            None => {
                self.insert_slot(&mut slots, key, "1".to_string(), None);
                Ok(1)
            }
        }
    }

    pub fn expire_value(&self, key: &str, ttl: Duration) -> bool {
        let mut slots = self.slots.lock();
        let Some(slot) = Self::live_slot(&mut slots, key) else {
            return false;
        };
        let value = slot.value.clone();
        self.insert_slot(&mut slots, key, value, Some(ttl));
        true
    }

    pub fn ttl_value(&self, key: &str) -> i64 {
        let mut slots = self.slots.lock();
        let now = Instant::now();
        match Self::live_slot(&mut slots, key) {
            None => TTL_MISSING,
            Some(Slot { expires_at: None, .. }) => TTL_PERSISTENT,
            Some(Slot { expires_at: Some(at), .. }) => {
                let remaining = at.saturating_duration_since(now);
                // Round up so a freshly set 5s key reports 5
                remaining.as_millis().div_ceil(1000) as i64
            }
        }
    }

    pub fn mget_values(&self, keys: &[String]) -> Vec<Option<String>> {
        let mut slots = self.slots.lock();
        keys.iter()
            .map(|key| Self::live_slot(&mut slots, key).map(|slot| slot.value.clone()))
            .collect()
    }

    pub fn mset_values(&self, entries: &[(String, String)], ttl: Option<Duration>) {
        let mut slots = self.slots.lock();
        for (key, value) in entries {
            self.insert_slot(&mut slots, key, value.clone(), ttl);
        }
    }

    pub fn mdel_values(&self, keys: &[String]) -> u64 {
        let mut slots = self.slots.lock();
        keys.iter().map(|key| Self::remove_slot(&mut slots, key)).sum()
    }

    /// Removes every entry and cancels every pending expiry timer.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.values_mut() {
            slot.cancel_timer();
        }
        slots.clear();
    }

    pub fn len(&self) -> usize {
        let mut slots = self.slots.lock();
        let now = Instant::now();
        slots.retain(|_, slot| {
            if slot.is_expired(now) {
                slot.cancel_timer();
                false
            } else {
                true
            }
        });
        slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of expiry timers still scheduled.
    pub fn pending_timers(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.timer.as_ref().is_some_and(|t| !t.is_finished()))
            .count()
    }

    fn live_slot<'a>(slots: &'a mut SlotMap, key: &str) -> Option<&'a mut Slot> {
        let now = Instant::now();
        if slots.get(key).is_some_and(|slot| slot.is_expired(now)) {
            Self::remove_slot(slots, key);
            return None;
        }
        slots.get_mut(key)
    }

    fn remove_slot(slots: &mut SlotMap, key: &str) -> u64 {
        match slots.remove(key) {
            Some(mut slot) => {
                slot.cancel_timer();
                1
            }
            None => 0,
        }
    }

    fn insert_slot(&self, slots: &mut SlotMap, key: &str, value: String, ttl: Option<Duration>) {
        Self::remove_slot(slots, key);
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        let timer = expires_at.and_then(|at| self.schedule_expiry(key, at));
        slots.insert(
            key.to_string(),
            Slot {
                value,
                expires_at,
                timer,
            },
        );
    }

    fn schedule_expiry(&self, key: &str, at: Instant) -> Option<AbortHandle> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let slots: Weak<Mutex<SlotMap>> = Arc::downgrade(&self.slots);
        let key = key.to_string();
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(at).await;
            let Some(slots) = slots.upgrade() else {
                return;
            };
            let mut slots = slots.lock();
            if slots.get(&key).is_some_and(|slot| slot.is_expired(Instant::now())) {
                slots.remove(&key);
            }
        });
        Some(task.abort_handle())
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        // Last handle going away: stop the timers instead of letting them wake for nothing
        if Arc::strong_count(&self.slots) == 1 {
            self.clear();
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.get_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.set_value(key, value, ttl);
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        Ok(self.del_value(key))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.exists_value(key))
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.incr_value(key)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        Ok(self.expire_value(key, ttl))
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        Ok(self.ttl_value(key))
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        Ok(self.mget_values(keys))
    }

    async fn mset(&self, entries: &[(String, String)], ttl: Option<Duration>) -> CacheResult<()> {
        self.mset_values(entries, ttl);
        Ok(())
    }

    async fn mdel(&self, keys: &[String]) -> CacheResult<u64> {
        Ok(self.mdel_values(keys))
    }

    async fn flush(&self) -> CacheResult<()> {
        self.clear();
        Ok(())
    }

    async fn health(&self) -> CacheHealth {
        CacheHealth {
            status: "healthy",
            mode: CacheMode::Memory,
            memory_keys: self.len(),
            detail: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new();
        cache.set_value("session", "abc", Some(Duration::from_secs(5)));

        assert_eq!(cache.get_value("session"), Some("abc".to_string()));
        assert_eq!(cache.ttl_value("session"), 5);

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.get_value("session"), None);
        assert_eq!(cache.ttl_value("session"), TTL_MISSING);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_removes_entry_without_read() {
        let cache = MemoryCache::new();
        cache.set_value("k", "v", Some(Duration::from_secs(1)));

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;

        assert_eq!(cache.slots.lock().len(), 0);
    }

    #[tokio::test]
    async fn test_incr_missing_key_starts_at_one_without_ttl() {
        let cache = MemoryCache::new();

        assert_eq!(cache.incr_value("hits").unwrap(), 1);
        assert_eq!(cache.incr_value("hits").unwrap(), 2);
        assert_eq!(cache.ttl_value("hits"), TTL_PERSISTENT);
    }

    #[tokio::test]
    async fn test_incr_keeps_existing_ttl() {
        let cache = MemoryCache::new();
        cache.incr_value("hits").unwrap();
        assert!(cache.expire_value("hits", Duration::from_secs(60)));

        cache.incr_value("hits").unwrap();

        assert!(cache.ttl_value("hits") > 0);
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let cache = MemoryCache::new();
        cache.set_value("name", "alice", None);

        assert!(matches!(cache.incr_value("name"), Err(CacheError::NotAnInteger(_))));
    }

    #[tokio::test]
    async fn test_incr_at_max_overflows() {
        let cache = MemoryCache::new();
        cache.set_value("counter", &i64::MAX.to_string(), None);

        assert!(matches!(
            cache.incr_value("counter"),
            Err(CacheError::Overflow(ref key)) if key == "counter"
        ));
        assert_eq!(cache.get_value("counter"), Some(i64::MAX.to_string()));
    }

    #[tokio::test]
    async fn test_del_and_expire_are_idempotent() {
        let cache = MemoryCache::new();
        cache.set_value("k", "v", None);

        assert_eq!(cache.del_value("k"), 1);
        assert_eq!(cache.del_value("k"), 0);
        assert!(!cache.expire_value("k", Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_overwrite_cancels_previous_timer() {
        let cache = MemoryCache::new();
        cache.set_value("k", "v1", Some(Duration::from_secs(30)));
        cache.set_value("k", "v2", None);

        assert_eq!(cache.pending_timers(), 0);
        assert_eq!(cache.ttl_value("k"), TTL_PERSISTENT);
    }

    #[tokio::test]
    async fn test_clear_cancels_all_timers() {
        let cache = MemoryCache::new();
        for i in 0..10 {
            cache.set_value(&format!("k{i}"), "v", Some(Duration::from_secs(60)));
        }
        assert_eq!(cache.pending_timers(), 10);

        cache.clear();

        assert_eq!(cache.pending_timers(), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let cache = MemoryCache::new();
        let entries = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ];
        cache.mset_values(&entries, None);

        let keys = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        assert_eq!(
            cache.mget_values(&keys),
            vec![Some("1".to_string()), None, Some("2".to_string())]
        );
        assert_eq!(cache.mdel_values(&keys), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_outside_runtime_still_expires_on_read() {
        let cache = MemoryCache::new();
        cache.set_value("k", "v", Some(Duration::from_millis(1)));
        assert_eq!(cache.pending_timers(), 0);

        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.get_value("k"), None);
    }
}
