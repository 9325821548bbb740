// ===============================
// src/store.rs
// ===============================
//
// Injected datastore abstraction over the logical collections
// (wallets, transactions, escrow, milestones, proposals, jobs,
// paymentIntents, users). In-memory, guarded by a single async mutex.
//
// `run` is the multi-record transaction primitive: the closure mutates a
// draft copy of the state, and the draft replaces the live state only on
// Ok. Any error leaves zero observable writes, which is what the
// orchestrator relies on for its all-or-nothing guarantee.
//
use ahash::AHashMap as HashMap;
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::{
    Escrow, Job, Milestone, PaymentIntent, Proposal, TxRecord, UserProfile, Wallet,
};
use crate::error::{PayError, PayResult};

#[derive(Debug, Clone, Default)]
pub struct State {
    pub wallets: HashMap<String, Wallet>,
    pub transactions: Vec<TxRecord>,
    pub escrows: HashMap<String, Escrow>,
    /// job_id -> ordered milestone list (proposal order is preserved).
    pub milestones: HashMap<String, Vec<Milestone>>,
    pub proposals: HashMap<String, Proposal>,
    pub jobs: HashMap<String, Job>,
    /// keyed by gateway reference, not document id.
    pub payment_intents: HashMap<String, PaymentIntent>,
    pub profiles: HashMap<String, UserProfile>,
}

impl State {
    pub fn wallet(&self, user_id: &str) -> PayResult<&Wallet> {
        self.wallets.get(user_id).ok_or(PayError::NotFound("wallet"))
    }

    pub fn wallet_mut(&mut self, user_id: &str) -> PayResult<&mut Wallet> {
        self.wallets.get_mut(user_id).ok_or(PayError::NotFound("wallet"))
    }

    pub fn job(&self, job_id: &str) -> PayResult<&Job> {
        self.jobs.get(job_id).ok_or(PayError::NotFound("job"))
    }

    pub fn job_mut(&mut self, job_id: &str) -> PayResult<&mut Job> {
        self.jobs.get_mut(job_id).ok_or(PayError::NotFound("job"))
    }

    pub fn escrow(&self, job_id: &str) -> PayResult<&Escrow> {
        self.escrows.get(job_id).ok_or(PayError::NotFound("escrow"))
    }

    pub fn escrow_mut(&mut self, job_id: &str) -> PayResult<&mut Escrow> {
        self.escrows.get_mut(job_id).ok_or(PayError::NotFound("escrow"))
    }

    pub fn proposal(&self, proposal_id: &str) -> PayResult<&Proposal> {
        self.proposals.get(proposal_id).ok_or(PayError::NotFound("proposal"))
    }

    pub fn milestone_mut(&mut self, job_id: &str, milestone_id: &str) -> PayResult<&mut Milestone> {
        self.milestones
            .get_mut(job_id)
            .and_then(|ms| ms.iter_mut().find(|m| m.id == milestone_id))
            .ok_or(PayError::NotFound("milestone"))
    }

    pub fn profile_mut(&mut self, user_id: &str) -> &mut UserProfile {
        self.profiles.entry(user_id.to_string()).or_insert_with(|| UserProfile {
            user_id: user_id.to_string(),
            ..Default::default()
        })
    }
}

#[derive(Clone, Default)]
pub struct Datastore {
    inner: Arc<Mutex<State>>,
}

impl Datastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic multi-record transaction. All precondition checks and all
    /// writes belong inside one closure; an Err drops the draft.
    pub async fn run<T>(&self, f: impl FnOnce(&mut State) -> PayResult<T>) -> PayResult<T> {
        let mut guard = self.inner.lock().await;
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        *guard = draft;
        Ok(out)
    }

    /// Read-only snapshot access.
    pub async fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        let guard = self.inner.lock().await;
        f(&guard)
    }
}

/// Unique-enough document id, same shape the gateway references use:
/// prefix, millis, random u32.
pub fn new_id(prefix: &str) -> String {
    let ms = Utc::now().timestamp_millis();
    format!("{}-{}-{}", prefix, ms, rand::thread_rng().gen::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_transaction_leaves_no_writes() {
        let db = Datastore::new();
        let res: PayResult<()> = db
            .run(|state| {
                state.profiles.insert(
                    "u1".into(),
                    UserProfile { user_id: "u1".into(), ..Default::default() },
                );
                Err(PayError::InvalidState("forced abort"))
            })
            .await;
        assert!(res.is_err());
        let count = db.read(|s| s.profiles.len()).await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let db = Datastore::new();
        db.run(|state| {
            state.profile_mut("u1").total_reviews = 3;
            Ok(())
        })
        .await
        .unwrap();
        let n = db.read(|s| s.profiles.get("u1").map(|p| p.total_reviews)).await;
        assert_eq!(n, Some(3));
    }
}
