// ===============================
// src/testkit.rs (shared test fixtures)
// ===============================
use chrono::Utc;
use tokio::sync::mpsc;

use crate::activity::Outbox;
use crate::config::Policy;
use crate::domain::{
    Activity, Job, JobStatus, MilestoneDraft, PaymentPreference, Proposal, ProposalStatus, Wallet,
    WalletStatus,
};
use crate::escrow::EscrowStore;
use crate::gateway::{Gateway, MockGateway};
use crate::job::JobStore;
use crate::milestone::MilestoneStore;
use crate::orchestrator::Orchestrator;
use crate::proposal::ProposalStore;
use crate::store::{new_id, Datastore};
use crate::wallet::WalletStore;

pub struct Harness {
    pub db: Datastore,
    pub mock: MockGateway,
    pub gateway: Gateway,
    pub wallets: WalletStore,
    pub escrows: EscrowStore,
    pub milestones: MilestoneStore,
    pub jobs: JobStore,
    pub proposals: ProposalStore,
    pub orchestrator: Orchestrator,
    // kept alive so emit() never sees a closed channel
    _outbox_rx: mpsc::Receiver<Activity>,
}

fn build(policy: Policy) -> Harness {
    let db = Datastore::new();
    let mock = MockGateway::new();
    let gateway = Gateway::Mock(mock.clone());
    let (outbox, rx) = Outbox::channel(64);
    Harness {
        wallets: WalletStore::new(db.clone(), gateway.clone(), outbox.clone(), policy.clone()),
        escrows: EscrowStore::new(db.clone()),
        milestones: MilestoneStore::new(db.clone()),
        jobs: JobStore::new(db.clone()),
        proposals: ProposalStore::new(db.clone()),
        orchestrator: Orchestrator::new(db.clone(), outbox, policy),
        db,
        mock,
        gateway,
        _outbox_rx: rx,
    }
}

pub fn harness() -> Harness {
    build(Policy {
        enforce_sequential_milestones: false,
        min_deposit: 100,
        max_withdrawal: 500_000_000,
    })
}

impl Harness {
    pub fn with_sequential_milestones(self) -> Harness {
        build(Policy {
            enforce_sequential_milestones: true,
            min_deposit: 100,
            max_withdrawal: 500_000_000,
        })
    }

    /// Inserts a funded wallet directly, skipping gateway provisioning.
    pub async fn seed_wallet(&self, user_id: &str, balance: i64) {
        let uid = user_id.to_string();
        self.db
            .run(move |state| {
                let now = Utc::now();
                state.wallets.insert(
                    uid.clone(),
                    Wallet {
                        user_id: uid.clone(),
                        full_name: uid.clone(),
                        email: format!("{uid}@example.com"),
                        balance,
                        total_earnings: 0,
                        total_withdrawals: 0,
                        account_number: "2000000001".into(),
                        bank_name: "Virtual Bank".into(),
                        account_reference: format!("REF-{uid}"),
                        status: WalletStatus::Active,
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(())
            })
            .await
            .unwrap();
    }

    /// Inserts an already-awarded job so milestone operations have their
    /// participant checks satisfied.
    pub async fn seed_job(&self, job_id: &str, client_id: &str, freelancer_id: &str) {
        let (jid, cid, fid) =
            (job_id.to_string(), client_id.to_string(), freelancer_id.to_string());
        self.db
            .run(move |state| {
                let now = Utc::now();
                state.jobs.insert(
                    jid.clone(),
                    Job {
                        id: jid.clone(),
                        client_id: cid.clone(),
                        title: "Seeded job".into(),
                        description: String::new(),
                        budget: 50_000,
                        accepted_amount: Some(50_000),
                        status: JobStatus::InProgress,
                        awarded_to: Some(fid.clone()),
                        payment_preference: Some(PaymentPreference::PerMilestone),
                        milestone_drafts: Vec::new(),
                        pending_reviews: Vec::new(),
                        reviews: Vec::new(),
                        created_at: now,
                        updated_at: now,
                        completed_at: None,
                    },
                );
                Ok(())
            })
            .await
            .unwrap();
    }

    pub async fn profile_rating(&self, user_id: &str) -> (f64, u32) {
        let uid = user_id.to_string();
        self.db
            .read(move |state| {
                state
                    .profiles
                    .get(&uid)
                    .map(|p| (p.rating, p.total_reviews))
                    .unwrap_or((0.0, 0))
            })
            .await
    }
}

pub fn draft(name: &str, amount: i64, duration_weeks: u32) -> MilestoneDraft {
    MilestoneDraft {
        name: name.to_string(),
        description: format!("{name} deliverable"),
        amount,
        duration_weeks,
    }
}

pub fn new_proposal(job_id: &str, freelancer_id: &str, amount: i64) -> crate::proposal::NewProposal {
    crate::proposal::NewProposal {
        job_id: job_id.to_string(),
        freelancer_id: freelancer_id.to_string(),
        proposed_amount: amount,
        completion_weeks: 4,
        payment_preference: PaymentPreference::PerMilestone,
        milestones: Vec::new(),
        cover_letter: "I can do this.".into(),
    }
}

/// A ready-made accepted-shape proposal for exercising milestone seeding
/// without going through the proposal store.
pub fn proposal_with_milestones(job_id: &str, items: &[(&str, i64, u32)]) -> Proposal {
    let milestones: Vec<MilestoneDraft> =
        items.iter().map(|(n, a, w)| draft(n, *a, *w)).collect();
    let total: i64 = milestones.iter().map(|m| m.amount).sum();
    let now = Utc::now();
    Proposal {
        id: new_id("PROP"),
        job_id: job_id.to_string(),
        freelancer_id: "lancer".into(),
        client_id: "client".into(),
        proposed_amount: total,
        completion_weeks: items.iter().map(|(_, _, w)| *w).sum(),
        payment_preference: PaymentPreference::PerMilestone,
        milestones,
        cover_letter: String::new(),
        status: ProposalStatus::Accepted,
        submitted_at: now,
        updated_at: now,
    }
}
