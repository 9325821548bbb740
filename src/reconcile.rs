// ===============================
// src/reconcile.rs (background repair loop)
// ===============================
//
// Two classes of drift can survive a crash or a dropped webhook:
//   - a payment intent stuck pending while the gateway already settled,
//   - a job awarded without its milestones (only possible for state
//     written by older builds; acceptance now seeds them atomically).
// The loop re-queries the gateway for stale intents and re-seeds missing
// milestones from the accepted proposal snapshot.
//
use chrono::{Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{IntentStatus, JobStatus, ProposalStatus};
use crate::error::PayResult;
use crate::metrics::{RECONCILE_REPAIRS, RECONCILE_RUNS};
use crate::milestone::apply_create_milestones;
use crate::store::Datastore;
use crate::wallet::{DepositOutcome, WalletStore};

#[derive(Clone)]
pub struct Reconciler {
    db: Datastore,
    wallets: WalletStore,
    grace_secs: i64,
}

impl Reconciler {
    pub fn new(db: Datastore, wallets: WalletStore, grace_secs: i64) -> Self {
        Self { db, wallets, grace_secs }
    }

    /// One sweep. Returns (intents settled, jobs repaired).
    pub async fn run_once(&self) -> (usize, usize) {
        RECONCILE_RUNS.inc();
        let settled = self.settle_stale_intents().await;
        let repaired = match self.reseed_missing_milestones().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "milestone repair sweep failed");
                0
            }
        };
        (settled, repaired)
    }

    /// Re-verifies pending intents older than the grace window against
    /// the gateway, concurrently. confirm_deposit is idempotent, so a
    /// webhook racing the sweep cannot double-credit.
    async fn settle_stale_intents(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.grace_secs);
        let stale: Vec<String> = self
            .db
            .read(move |state| {
                state
                    .payment_intents
                    .values()
                    .filter(|i| i.status == IntentStatus::Pending && i.created_at < cutoff)
                    .map(|i| i.reference.clone())
                    .collect()
            })
            .await;
        if stale.is_empty() {
            return 0;
        }

        let checks = stale.iter().map(|r| self.wallets.confirm_deposit(r));
        let mut settled = 0;
        for (reference, out) in stale.iter().zip(join_all(checks).await) {
            match out {
                Ok(DepositOutcome::Credited(amount)) => {
                    settled += 1;
                    RECONCILE_REPAIRS.with_label_values(&["intent"]).inc();
                    info!(%reference, amount, "stale intent settled by reconciler");
                }
                Ok(DepositOutcome::Failed) => {
                    RECONCILE_REPAIRS.with_label_values(&["intent_failed"]).inc();
                    info!(%reference, "stale intent marked failed");
                }
                Ok(_) => {}
                Err(e) => warn!(%reference, error = %e, "intent re-verification failed"),
            }
        }
        settled
    }

    /// Finds in-progress jobs with no milestone list and re-seeds it from
    /// the job's accepted proposal.
    async fn reseed_missing_milestones(&self) -> PayResult<usize> {
        let broken: Vec<String> = self
            .db
            .read(|state| {
                state
                    .jobs
                    .values()
                    .filter(|j| {
                        j.status == JobStatus::InProgress
                            && state.milestones.get(&j.id).map(|m| m.is_empty()).unwrap_or(true)
                    })
                    .map(|j| j.id.clone())
                    .collect()
            })
            .await;

        let mut repaired = 0;
        for job_id in broken {
            let jid = job_id.clone();
            let n = self
                .db
                .run(move |state| {
                    let accepted = state
                        .proposals
                        .values()
                        .find(|p| p.job_id == jid && p.status == ProposalStatus::Accepted)
                        .cloned();
                    match accepted {
                        Some(p) => apply_create_milestones(state, &jid, &p),
                        None => Ok(0),
                    }
                })
                .await?;
            if n > 0 {
                repaired += 1;
                RECONCILE_REPAIRS.with_label_values(&["milestones"]).inc();
                warn!(%job_id, milestones = n, "re-seeded missing milestones");
            }
        }
        Ok(repaired)
    }
}

/// Periodic driver, spawned at startup.
pub async fn run(reconciler: Reconciler, interval_secs: u64) {
    let mut tick = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let (settled, repaired) = reconciler.run_once().await;
        if settled > 0 || repaired > 0 {
            info!(settled, repaired, "reconcile sweep applied repairs");
        }
    }
}
