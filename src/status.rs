//! Status catalog: named states per document class.
//!
//! Codes are stable opaque strings grouped by domain prefix (`RQ_` for
//! requisitions, `level_` for the license family). The executor treats them
//! opaquely except for the domain tags in [`StatusFlags`], which drive the
//! fee, payment, category and expiry preconditions.
//!
//! The registry is read-mostly. Runtime callers only resolve and enumerate;
//! mutation is reserved for seeding and invalidates the process-wide cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use sled::Db;

use crate::error::WorkflowError;

const CACHE_TTL: Duration = Duration::from_secs(300);

const VERSION_KEY: &[u8] = b"meta/registry_version";

/// Domain tags recognised by the executor at specific stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct StatusFlags {
    #[n(0)]
    pub fee_setting: bool,
    #[n(1)]
    pub category_revisable: bool,
    #[n(2)]
    pub payment_awaiting: bool,
    #[n(3)]
    pub terminal_approved: bool,
    #[n(4)]
    pub terminal_rejected: bool,
    /// Documents sitting at this status longer than the window are expirable.
    #[n(5)]
    pub expiry_after_days: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Status {
    #[n(0)]
    pub code: String,
    #[n(1)]
    pub label: String,
    #[n(2)]
    pub active: bool,
    #[n(3)]
    pub flags: StatusFlags,
}

impl Status {
    pub fn new(code: &str, label: &str) -> Self {
        Self {
            code: code.to_string(),
            label: label.to_string(),
            active: true,
            flags: StatusFlags::default(),
        }
    }

    pub fn with_flags(code: &str, label: &str, flags: StatusFlags) -> Self {
        Self {
            code: code.to_string(),
            label: label.to_string(),
            active: true,
            flags,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.flags.terminal_approved || self.flags.terminal_rejected
    }
}

fn status_key(code: &str) -> Vec<u8> {
    format!("status/{code}").into_bytes()
}

/// Bump the shared registry version. Called whenever statuses or rules are
/// mutated so other handles reload before their TTL elapses.
pub(crate) fn bump_registry_version(db: &Db) -> Result<u64, WorkflowError> {
    let ivec = db.update_and_fetch(VERSION_KEY, |old| {
        let current = old
            .and_then(|b| b.try_into().ok())
            .map(u64::from_be_bytes)
            .unwrap_or(0);
        Some(current.wrapping_add(1).to_be_bytes().to_vec())
    })?;
    Ok(ivec
        .and_then(|b| b.as_ref().try_into().ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0))
}

pub(crate) fn registry_version(db: &Db) -> Result<u64, WorkflowError> {
    Ok(db
        .get(VERSION_KEY)?
        .and_then(|b| b.as_ref().try_into().ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0))
}

struct Cache {
    entries: HashMap<String, Status>,
    loaded_at: Option<Instant>,
    version: u64,
}

pub struct StatusRegistry {
    db: Arc<Db>,
    cache: RwLock<Cache>,
}

impl StatusRegistry {
    pub fn new(db: Arc<Db>) -> Self {
        Self {
            db,
            cache: RwLock::new(Cache {
                entries: HashMap::new(),
                loaded_at: None,
                version: 0,
            }),
        }
    }

    /// Resolve a status code. Unknown codes are a `NotFound` error; a rule
    /// referencing one is reported as misconfiguration by the caller.
    pub fn get(&self, code: &str) -> Result<Status, WorkflowError> {
        self.refresh_if_stale()?;
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache
            .entries
            .get(code)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(format!("status '{code}'")))
    }

    pub fn list_by_prefix(&self, prefix: &str) -> Result<Vec<Status>, WorkflowError> {
        self.refresh_if_stale()?;
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<Status> = cache
            .entries
            .values()
            .filter(|s| s.code.starts_with(prefix))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(found)
    }

    /// Statuses carrying an expiry window, for the expirer's sweep.
    pub fn expirable(&self) -> Result<Vec<Status>, WorkflowError> {
        self.refresh_if_stale()?;
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        Ok(cache
            .entries
            .values()
            .filter(|s| s.flags.expiry_after_days.is_some())
            .cloned()
            .collect())
    }

    /// Seeding-only write path. Overwrites an existing code and invalidates
    /// the cache process-wide.
    pub fn insert(&self, status: Status) -> Result<(), WorkflowError> {
        let bytes = minicbor::to_vec(&status)?;
        self.db.insert(status_key(&status.code), bytes)?;
        bump_registry_version(&self.db)?;
        self.invalidate();
        Ok(())
    }

    pub fn invalidate(&self) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.loaded_at = None;
    }

    fn refresh_if_stale(&self) -> Result<(), WorkflowError> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(at) = cache.loaded_at {
                if at.elapsed() < CACHE_TTL {
                    return Ok(());
                }
            }
        }

        // TTL elapsed; an unchanged version means only the clock moved
        let version = registry_version(&self.db)?;
        {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            if cache.loaded_at.is_some() && cache.version == version {
                cache.loaded_at = Some(Instant::now());
                return Ok(());
            }
        }

        let mut entries = HashMap::new();
        for item in self.db.scan_prefix(b"status/") {
            let (_, value) = item?;
            let status: Status = minicbor::decode(&value)?;
            entries.insert(status.code.clone(), status);
        }

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.entries = entries;
        cache.loaded_at = Some(Instant::now());
        cache.version = version;
        Ok(())
    }
}
