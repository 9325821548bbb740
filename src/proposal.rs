// ===============================
// src/proposal.rs (proposal submission & state)
// ===============================
use chrono::Utc;

use crate::domain::{
    JobStatus, MilestoneDraft, PaymentPreference, Proposal, ProposalStatus,
};
use crate::error::{PayError, PayResult};
use crate::store::{new_id, Datastore};

/// Submission payload; client_id is cloned from the job, never trusted
/// from the caller.
#[derive(Debug, Clone)]
pub struct NewProposal {
    pub job_id: String,
    pub freelancer_id: String,
    pub proposed_amount: i64,
    pub completion_weeks: u32,
    pub payment_preference: PaymentPreference,
    pub milestones: Vec<MilestoneDraft>,
    pub cover_letter: String,
}

#[derive(Clone)]
pub struct ProposalStore {
    db: Datastore,
}

impl ProposalStore {
    pub fn new(db: Datastore) -> Self {
        Self { db }
    }

    pub async fn create_proposal(&self, input: NewProposal) -> PayResult<Proposal> {
        if input.proposed_amount <= 0 {
            return Err(PayError::Validation("proposed amount must be positive"));
        }
        if input.payment_preference == PaymentPreference::PerMilestone {
            if input.milestones.is_empty() {
                return Err(PayError::Validation(
                    "milestones are required for per-milestone payment",
                ));
            }
            if input.milestones.iter().any(|m| m.amount <= 0) {
                return Err(PayError::Validation("milestone amounts must be positive"));
            }
            let total: i64 = input.milestones.iter().map(|m| m.amount).sum();
            if total != input.proposed_amount {
                return Err(PayError::Validation(
                    "milestone amounts must sum to the proposed amount",
                ));
            }
        }

        let now = Utc::now();
        self.db
            .run(move |state| {
                let job = state.job(&input.job_id)?;
                if job.status != JobStatus::Open {
                    return Err(PayError::InvalidState("job is not open for proposals"));
                }
                if job.client_id == input.freelancer_id {
                    return Err(PayError::Unauthorized("cannot propose on your own job"));
                }
                let duplicate = state.proposals.values().any(|p| {
                    p.job_id == input.job_id
                        && p.freelancer_id == input.freelancer_id
                        && p.status == ProposalStatus::Pending
                });
                if duplicate {
                    return Err(PayError::InvalidState("pending proposal already exists"));
                }

                let proposal = Proposal {
                    id: new_id("PROP"),
                    job_id: input.job_id.clone(),
                    freelancer_id: input.freelancer_id.clone(),
                    client_id: job.client_id.clone(),
                    proposed_amount: input.proposed_amount,
                    completion_weeks: input.completion_weeks,
                    payment_preference: input.payment_preference,
                    milestones: if input.payment_preference == PaymentPreference::PerMilestone {
                        input.milestones.clone()
                    } else {
                        Vec::new()
                    },
                    cover_letter: input.cover_letter.clone(),
                    status: ProposalStatus::Pending,
                    submitted_at: now,
                    updated_at: now,
                };
                state.proposals.insert(proposal.id.clone(), proposal.clone());
                Ok(proposal)
            })
            .await
    }

    pub async fn withdraw_proposal(
        &self,
        proposal_id: &str,
        freelancer_id: &str,
    ) -> PayResult<()> {
        let (pid, fid) = (proposal_id.to_string(), freelancer_id.to_string());
        self.db
            .run(move |state| {
                let p = state
                    .proposals
                    .get_mut(&pid)
                    .ok_or(PayError::NotFound("proposal"))?;
                if p.freelancer_id != fid {
                    return Err(PayError::Unauthorized("not the proposal owner"));
                }
                if p.status != ProposalStatus::Pending {
                    return Err(PayError::InvalidState("proposal is no longer pending"));
                }
                p.status = ProposalStatus::Withdrawn;
                p.updated_at = Utc::now();
                Ok(())
            })
            .await
    }

    pub async fn decline_proposal(&self, proposal_id: &str, client_id: &str) -> PayResult<()> {
        let (pid, cid) = (proposal_id.to_string(), client_id.to_string());
        self.db
            .run(move |state| {
                let p = state
                    .proposals
                    .get_mut(&pid)
                    .ok_or(PayError::NotFound("proposal"))?;
                if p.client_id != cid {
                    return Err(PayError::Unauthorized("only the job's client can decline"));
                }
                if p.status != ProposalStatus::Pending {
                    return Err(PayError::InvalidState("proposal is no longer pending"));
                }
                p.status = ProposalStatus::Rejected;
                p.updated_at = Utc::now();
                Ok(())
            })
            .await
    }

    pub async fn get_proposal(&self, proposal_id: &str) -> PayResult<Proposal> {
        self.db
            .read(|s| s.proposals.get(proposal_id).cloned())
            .await
            .ok_or(PayError::NotFound("proposal"))
    }

    pub async fn proposals_by_job(&self, job_id: &str) -> Vec<Proposal> {
        let jid = job_id.to_string();
        self.sorted(move |p| p.job_id == jid).await
    }

    pub async fn proposals_by_freelancer(&self, freelancer_id: &str) -> Vec<Proposal> {
        let fid = freelancer_id.to_string();
        self.sorted(move |p| p.freelancer_id == fid).await
    }

    /// Everything the user can see: submitted as freelancer or received as
    /// client, newest first.
    pub async fn proposals_by_user(&self, user_id: &str) -> Vec<Proposal> {
        let uid = user_id.to_string();
        self.sorted(move |p| p.freelancer_id == uid || p.client_id == uid).await
    }

    async fn sorted(&self, pred: impl Fn(&Proposal) -> bool + Send + 'static) -> Vec<Proposal> {
        let mut out = self
            .db
            .read(move |s| s.proposals.values().filter(|p| pred(p)).cloned().collect::<Vec<_>>())
            .await;
        out.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        out
    }
}
