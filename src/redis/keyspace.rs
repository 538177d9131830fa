use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::Mutex;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_millis() as u64
}

/// A stored value with an optional absolute expiry, in milliseconds since
/// the epoch. There is no background sweep; expiry is checked lazily on
/// access, matching the reference implementation's `time.time()` check.
#[derive(Debug, Clone)]
pub struct Value {
    pub data: Bytes,
    pub expires_at_ms: Option<u64>,
}

impl Value {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            expires_at_ms: None,
        }
    }

    pub fn with_expiry(data: Bytes, expires_at_ms: u64) -> Self {
        Self {
            data,
            expires_at_ms: Some(expires_at_ms),
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        self.expires_at_ms.is_some_and(|exp| exp < now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<Bytes, Value>,
}

/// The whole keyspace behind a single coarse mutex. Every method grabs the
/// lock, does its work, and releases it; nothing awaits I/O while holding
/// it.
#[derive(Debug, Default)]
pub struct Keyspace {
    inner: Mutex<Inner>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &[u8]) -> Option<Bytes> {
        let mut inner = self.inner.lock().await;
        let now = now_ms();
        match inner.entries.get(key) {
            Some(value) if value.is_expired(now) => {
                inner.entries.remove(key);
                None
            }
            Some(value) => Some(value.data.clone()),
            None => None,
        }
    }

    pub async fn set(&self, key: Bytes, value: Bytes) {
        let mut inner = self.inner.lock().await;
        inner.entries.insert(key, Value::new(value));
    }

    pub async fn set_px(&self, key: Bytes, value: Bytes, ttl_ms: u64) {
        let expires_at = now_ms() + ttl_ms;
        let mut inner = self.inner.lock().await;
        inner.entries.insert(key, Value::with_expiry(value, expires_at));
    }

    /// All non-expired keys, sweeping any expired entries found along the
    /// way. Only `KEYS *` ever calls this.
    pub async fn keys_all(&self) -> Vec<Bytes> {
        let mut inner = self.inner.lock().await;
        let now = now_ms();
        let expired: Vec<Bytes> = inner
            .entries
            .iter()
            .filter(|(_, value)| value.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            inner.entries.remove(&key);
        }
        inner.entries.keys().cloned().collect()
    }

    /// Inserts an entry straight from the RDB loader, bypassing the normal
    /// write path (no propagation, no "now" rebasing beyond what the
    /// snapshot already encodes).
    pub async fn load(&self, key: Bytes, value: Value) {
        let mut inner = self.inner.lock().await;
        inner.entries.insert(key, value);
    }
}
