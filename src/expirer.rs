//! Time-driven expirer: advances aged documents without user action.
//!
//! A single instance per data store sweeps documents whose status carries an
//! expiry window and whose last update is older than it, then runs the same
//! transition machinery with a synthetic `EXPIRE` action as the system user.
//! Single-instance coordination happens through an advisory lease record;
//! row locks are taken with `try_lock` so a busy document is deferred to the
//! next tick instead of blocking the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;

use crate::document::Document;
use crate::error::WorkflowError;
use crate::rules::Action;
use crate::service::{ActionPayload, WorkflowService};
use crate::user::User;
use crate::utils::{self, TimeStamp};

const LEASE_KEY: &[u8] = b"expirer/lease";

/// Upper bound on expiry attempts per tick so one slow sweep cannot wedge
/// the loop.
const SWEEP_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
struct Lease {
    #[n(0)]
    holder: String,
    #[n(1)]
    expires_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Documents whose status and age met an expiry rule.
    pub candidates: usize,
    pub expired: usize,
    /// Row lock was held by a user request; retried next tick.
    pub deferred: usize,
    pub failed: usize,
}

pub struct Expirer {
    service: Arc<WorkflowService>,
    holder: String,
    lease_ttl: chrono::Duration,
    system: User,
}

impl Expirer {
    pub fn new(service: Arc<WorkflowService>) -> Self {
        Self {
            service,
            holder: utils::new_uuid_to_bech32("expirer_")
                .unwrap_or_else(|_| "expirer".to_string()),
            lease_ttl: chrono::Duration::seconds(60),
            system: User::system(),
        }
    }

    pub fn with_lease_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// One sweep. Each expiry commits independently; failures are logged and
    /// skipped, so a crashed sweep resumes naturally on the next tick.
    pub fn tick(&self) -> Result<SweepReport, WorkflowError> {
        let mut report = SweepReport::default();

        if !self.acquire_lease()? {
            tracing::debug!(holder = %self.holder, "expirer lease held elsewhere, skipping tick");
            return Ok(report);
        }

        let windows: Vec<(String, i64)> = self
            .service
            .statuses()
            .expirable()?
            .into_iter()
            .filter_map(|s| s.flags.expiry_after_days.map(|d| (s.code, d)))
            .collect();
        if windows.is_empty() {
            return Ok(report);
        }

        let now = Utc::now();
        for item in self.service.db().scan_prefix(b"doc/") {
            if report.candidates >= SWEEP_LIMIT {
                break;
            }
            let (_, value) = item?;
            let document: Document = minicbor::decode(&value)?;

            let Some((_, window_days)) = windows
                .iter()
                .find(|(code, _)| *code == document.status_code)
            else {
                continue;
            };
            let age = now.signed_duration_since(document.updated_at.to_datetime_utc());
            if age <= chrono::Duration::days(*window_days) {
                continue;
            }

            report.candidates += 1;
            let lock = self.service.row_lock(&document.id);
            let Ok(_guard) = lock.try_lock() else {
                tracing::warn!(document = %document.id, "row lock busy, deferring expiry");
                report.deferred += 1;
                continue;
            };
            match self
                .service
                .apply_locked(&document.id, &self.system, Action::Expire, ActionPayload::Expire)
            {
                Ok(expired) => {
                    tracing::info!(document = %expired.id, to = %expired.status_code, "document expired");
                    report.expired += 1;
                }
                Err(err) => {
                    tracing::warn!(document = %document.id, error = %err, "expiry failed, skipping");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Loop `tick` on the calling thread until `shutdown` is raised.
    pub fn run(&self, interval: Duration, shutdown: Arc<AtomicBool>) {
        tracing::info!(holder = %self.holder, "expirer loop started");
        while !shutdown.load(Ordering::Relaxed) {
            match self.tick() {
                Ok(report) if report.candidates > 0 => {
                    tracing::info!(
                        expired = report.expired,
                        deferred = report.deferred,
                        failed = report.failed,
                        "expirer sweep finished"
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "expirer tick failed");
                }
            }
            std::thread::sleep(interval);
        }
        tracing::info!(holder = %self.holder, "expirer loop stopped");
    }

    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
        std::thread::spawn(move || self.run(interval, shutdown))
    }

    /// Take or renew the advisory lease. A live lease held by another
    /// instance means this tick is skipped; a stale one may be taken over.
    fn acquire_lease(&self) -> Result<bool, WorkflowError> {
        let db = self.service.db();
        let now = Utc::now();

        let current = db.get(LEASE_KEY)?;
        let may_take = match &current {
            None => true,
            Some(bytes) => {
                let lease: Lease = minicbor::decode(bytes)?;
                lease.holder == self.holder || lease.expires_at.to_datetime_utc() <= now
            }
        };
        if !may_take {
            return Ok(false);
        }

        let renewed = Lease {
            holder: self.holder.clone(),
            expires_at: TimeStamp::from(now + self.lease_ttl),
        };
        let swapped = db.compare_and_swap(
            LEASE_KEY,
            current.as_deref(),
            Some(minicbor::to_vec(&renewed)?),
        )?;
        Ok(swapped.is_ok())
    }
}
