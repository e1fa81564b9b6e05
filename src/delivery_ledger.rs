//! On-disk record of leads already created in the CRM.
//!
//! Entries are keyed by the ad-platform lead id and survive restarts, so a
//! lead that shows up again in a later extraction window is not created twice.
//! Each entry expires once it is older than the retention window; a window of
//! `None` keeps entries forever.

use crate::errors::{AppError, ResultExt};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use moka::sync::Cache;
use moka::Expiry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MAX_ENTRIES: u64 = 500_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub crm_id: String,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    entries: BTreeMap<String, LedgerEntry>,
}

/// Expires each entry relative to when it was delivered, not when it was loaded.
struct SinceDelivery {
    retention: Option<ChronoDuration>,
}

impl SinceDelivery {
    fn remaining(&self, entry: &LedgerEntry, now: DateTime<Utc>) -> Option<Duration> {
        let retention = self.retention?;
        let left = retention - (now - entry.delivered_at);
        Some(left.to_std().unwrap_or(Duration::ZERO))
    }
}

impl Expiry<String, LedgerEntry> for SinceDelivery {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &LedgerEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        self.remaining(value, Utc::now())
    }
}

pub struct DeliveryLedger {
    path: Option<PathBuf>,
    retention: Option<ChronoDuration>,
    entries: Cache<String, LedgerEntry>,
    write_lock: Mutex<()>,
}

impl DeliveryLedger {
    /// Retention that covers a full extraction window plus one day of slack.
    /// A zero-day lookback fetches everything, so entries never expire.
    pub fn retention_for(lookback_days: u32) -> Option<ChronoDuration> {
        (lookback_days > 0).then(|| ChronoDuration::days(i64::from(lookback_days) + 1))
    }

    /// Loads the ledger at `path`. A missing or corrupt file starts empty.
    pub fn open(path: impl Into<PathBuf>, retention: Option<ChronoDuration>) -> Self {
        let path = path.into();
        let ledger = Self::build(Some(path.clone()), retention);
        let now = Utc::now();

        let mut expired = 0usize;
        for (lead_id, entry) in read_file(&path).entries {
            if ledger.is_expired(&entry, now) {
                expired += 1;
                continue;
            }
            ledger.entries.insert(lead_id, entry);
        }
        tracing::debug!(
            path = %path.display(),
            expired,
            "Loaded delivery ledger"
        );
        ledger
    }

    /// Ledger that is never written to disk.
    pub fn in_memory(retention: Option<ChronoDuration>) -> Self {
        Self::build(None, retention)
    }

    fn build(path: Option<PathBuf>, retention: Option<ChronoDuration>) -> Self {
        let entries = Cache::builder()
            .max_capacity(MAX_ENTRIES)
            .expire_after(SinceDelivery { retention })
            .build();
        Self {
            path,
            retention,
            entries,
            write_lock: Mutex::new(()),
        }
    }

    fn is_expired(&self, entry: &LedgerEntry, now: DateTime<Utc>) -> bool {
        self.retention
            .is_some_and(|retention| now - entry.delivered_at >= retention)
    }

    pub fn get(&self, lead_id: &str) -> Option<LedgerEntry> {
        self.entries
            .get(lead_id)
            .filter(|entry| !self.is_expired(entry, Utc::now()))
    }

    pub fn len(&self) -> usize {
        self.entries.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remembers `lead_id` as delivered and persists the ledger.
    ///
    /// The in-memory entry is kept even if the write fails.
    pub fn record(&self, lead_id: &str, crm_id: &str) -> Result<(), AppError> {
        self.record_at(lead_id, crm_id, Utc::now())
    }

    pub(crate) fn record_at(
        &self,
        lead_id: &str,
        crm_id: &str,
        delivered_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.entries.insert(
            lead_id.to_string(),
            LedgerEntry {
                crm_id: crm_id.to_string(),
                delivered_at,
            },
        );
        self.persist()
    }

    fn persist(&self) -> Result<(), AppError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let now = Utc::now();
        let entries = self
            .entries
            .iter()
            .filter(|(_, entry)| !self.is_expired(entry, now))
            .map(|(lead_id, entry)| ((*lead_id).clone(), entry))
            .collect();
        write_file(path, &LedgerFile { entries })
    }
}

fn read_file(path: &Path) -> LedgerFile {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return LedgerFile::default();
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt delivery ledger");
        LedgerFile::default()
    })
}

fn write_file(path: &Path, file: &LedgerFile) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
