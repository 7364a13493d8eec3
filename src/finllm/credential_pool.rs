//! API-key rotation with rate-limit cooldowns.
//!
//! A [`CredentialPool`] owns every API key the gateway may use and decides
//! which one the next upstream call gets. Keys that were recently rate
//! limited are skipped until their cooldown expires; when every key is
//! cooling down, selection falls back to the key whose cooldown expires
//! soonest, so selection never fails.
//!
//! # Example
//!
//! ```rust
//! use finllm::CredentialPool;
//!
//! let pool = CredentialPool::new(vec![
//!     "key-alpha-0001".into(),
//!     "key-bravo-0002".into(),
//! ]).unwrap();
//!
//! let key = pool.select_random();
//! let stats = pool.stats();
//! assert_eq!(stats.total, 2);
//! assert!(!key.is_empty());
//! ```

use log::{info, warn};
use rand::Rng;
use std::error::Error;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-credential bookkeeping. All fields are owned by the pool and only
/// touched under its guard.
struct CredentialRecord {
    key: String,
    usage_count: u64,
    last_used_at: Option<Instant>,
    rate_limited_until: Option<Instant>,
}

impl CredentialRecord {
    fn new(key: String) -> Self {
        Self {
            key,
            usage_count: 0,
            last_used_at: None,
            rate_limited_until: None,
        }
    }

    fn is_available(&self, now: Instant) -> bool {
        match self.rate_limited_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

/// Errors raised while building a pool. Selection itself never fails.
#[derive(Debug, Clone)]
pub enum PoolError {
    /// No usable API keys were supplied or found in the environment.
    NoCredentials,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::NoCredentials => write!(f, "no API credentials configured"),
        }
    }
}

impl Error for PoolError {}

/// Snapshot of one credential's state, with the key masked.
#[derive(Debug, Clone)]
pub struct CredentialStats {
    pub key_preview: String,
    pub usage_count: u64,
    /// Remaining cooldown, `None` when the credential is available.
    pub cooldown_remaining: Option<Duration>,
}

/// Point-in-time snapshot of the whole pool.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub credentials: Vec<CredentialStats>,
}

/// Rotating pool of provider API keys.
pub struct CredentialPool {
    records: Mutex<Vec<CredentialRecord>>,
}

impl CredentialPool {
    /// Build a pool from explicit keys. Empty strings are dropped and
    /// duplicates collapse into a single record.
    pub fn new(keys: Vec<String>) -> Result<Self, PoolError> {
        let mut records: Vec<CredentialRecord> = Vec::new();
        for key in keys {
            if key.is_empty() {
                continue;
            }
            if records.iter().any(|r| r.key == key) {
                continue;
            }
            records.push(CredentialRecord::new(key));
        }
        if records.is_empty() {
            return Err(PoolError::NoCredentials);
        }
        info!("credential pool initialised with {} key(s)", records.len());
        Ok(Self {
            records: Mutex::new(records),
        })
    }

    /// Build a pool from environment variables: `{prefix}` itself plus the
    /// numbered variants `{prefix}_1`, `{prefix}_2`, ... scanned until the
    /// first gap.
    pub fn from_env(prefix: &str) -> Result<Self, PoolError> {
        let mut keys = Vec::new();
        if let Ok(key) = std::env::var(prefix) {
            keys.push(key);
        }
        let mut index = 1u32;
        while let Ok(key) = std::env::var(format!("{}_{}", prefix, index)) {
            keys.push(key);
            index += 1;
        }
        Self::new(keys)
    }

    /// Uniformly random pick among available credentials; falls back to the
    /// soonest-expiring one when everything is cooling down.
    pub fn select_random(&self) -> String {
        let mut records = self.records.lock().unwrap();
        let now = Instant::now();
        let available = available_indexes(&records, now);
        let index = if available.is_empty() {
            fallback_index(&records)
        } else {
            available[rand::thread_rng().gen_range(0..available.len())]
        };
        touch(&mut records, index, now)
    }

    /// Pick the available credential with the lowest usage count.
    pub fn select_least_used(&self) -> String {
        let mut records = self.records.lock().unwrap();
        let now = Instant::now();
        let available = available_indexes(&records, now);
        let index = if available.is_empty() {
            fallback_index(&records)
        } else {
            available
                .into_iter()
                .min_by_key(|&i| records[i].usage_count)
                .unwrap_or(0)
        };
        touch(&mut records, index, now)
    }

    /// Pick the available credential that was used longest ago. Credentials
    /// that were never used sort first.
    pub fn select_least_recently_used(&self) -> String {
        let mut records = self.records.lock().unwrap();
        let now = Instant::now();
        let available = available_indexes(&records, now);
        let index = if available.is_empty() {
            fallback_index(&records)
        } else {
            available
                .into_iter()
                .min_by_key(|&i| records[i].last_used_at)
                .unwrap_or(0)
        };
        touch(&mut records, index, now)
    }

    /// Put a credential on cooldown. A later mark never shortens an existing
    /// cooldown: the effective expiry is the max of the old and new values.
    pub fn mark_rate_limited(&self, key: &str, cooldown: Duration) {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.key == key) {
            Some(record) => {
                let candidate = Instant::now() + cooldown;
                let effective = match record.rate_limited_until {
                    Some(existing) if existing > candidate => existing,
                    _ => candidate,
                };
                record.rate_limited_until = Some(effective);
                info!(
                    "credential {} rate limited, cooling down for {:?}",
                    mask_key(key),
                    cooldown
                );
            }
            None => {
                warn!(
                    "tried to rate-limit unknown credential {}",
                    mask_key(key)
                );
            }
        }
    }

    /// Snapshot usage and cooldown state for every credential.
    pub fn stats(&self) -> PoolStats {
        let records = self.records.lock().unwrap();
        let now = Instant::now();
        let credentials: Vec<CredentialStats> = records
            .iter()
            .map(|record| {
                let cooldown_remaining = record.rate_limited_until.and_then(|until| {
                    let left = until.saturating_duration_since(now);
                    if left.is_zero() {
                        None
                    } else {
                        Some(left)
                    }
                });
                CredentialStats {
                    key_preview: mask_key(&record.key),
                    usage_count: record.usage_count,
                    cooldown_remaining,
                }
            })
            .collect();
        PoolStats {
            total: records.len(),
            available: records.iter().filter(|r| r.is_available(now)).count(),
            credentials,
        }
    }

    /// Zero the usage counters and last-used marks. Cooldown state is
    /// operational and survives a reset.
    pub fn reset_usage_stats(&self) {
        let mut records = self.records.lock().unwrap();
        for record in records.iter_mut() {
            record.usage_count = 0;
            record.last_used_at = None;
        }
    }

    /// Number of credentials in the pool.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn available_indexes(records: &[CredentialRecord], now: Instant) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_available(now))
        .map(|(i, _)| i)
        .collect()
}

/// Index of the credential whose cooldown expires soonest. Only reached when
/// no credential is available, so every record carries an expiry.
fn fallback_index(records: &[CredentialRecord]) -> usize {
    warn!("all credentials cooling down, falling back to the soonest-available one");
    records
        .iter()
        .enumerate()
        .min_by_key(|(_, r)| r.rate_limited_until)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn touch(records: &mut [CredentialRecord], index: usize, now: Instant) -> String {
    let record = &mut records[index];
    record.usage_count += 1;
    record.last_used_at = Some(now);
    record.key.clone()
}

/// Mask an API key for logs and stats: first eight characters plus an
/// ellipsis, or `***` for short keys.
pub fn mask_key(key: &str) -> String {
    if key.chars().count() <= 8 {
        return "***".to_string();
    }
    let prefix: String = key.chars().take(8).collect();
    format!("{}...", prefix)
}
