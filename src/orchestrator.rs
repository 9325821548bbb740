// ===============================
// src/orchestrator.rs (escrow & milestone workflow)
// ===============================
//
// Every operation here is one datastore transaction: precondition checks
// (authorization, sufficient escrow, not-already-paid) and all writes share
// the same atomic unit, so a typed error means zero observable writes.
// Activity emission happens after commit and is allowed to fail.
//
use chrono::Utc;
use tracing::info;

use crate::activity::Outbox;
use crate::config::Policy;
use crate::domain::{
    fmt_naira, Activity, EscrowStatus, JobStatus, MilestoneStatus, PaymentPreference,
    PaymentStatus, ProposalStatus, Review, ReviewerRole, TxType,
};
use crate::error::{PayError, PayResult};
use crate::escrow::{apply_create, apply_reduce, apply_release};
use crate::metrics::{
    ESCROWS_CREATED, ESCROW_HELD, JOBS_CANCELLED, JOBS_COMPLETED, PROPOSALS_ACCEPTED,
    PROPOSALS_REJECTED, RELEASED_KOBO, RELEASES, REVIEWS_SUBMITTED, TX_APPENDED,
};
use crate::milestone::apply_create_milestones;
use crate::store::{Datastore, State};
use crate::wallet::{append_record, apply_adjustment};

#[derive(Clone)]
pub struct Orchestrator {
    db: Datastore,
    outbox: Outbox,
    policy: Policy,
}

/// Marks the job completed once every milestone is both completed and
/// paid, and closes out the (by then empty) escrow hold.
fn finish_job_if_done(state: &mut State, job_id: &str) -> PayResult<bool> {
    let all_done = state
        .milestones
        .get(job_id)
        .map(|ms| {
            !ms.is_empty()
                && ms.iter().all(|m| {
                    m.status == MilestoneStatus::Completed && m.payment_status == PaymentStatus::Paid
                })
        })
        .unwrap_or(false);
    if !all_done {
        return Ok(false);
    }

    let now = Utc::now();
    let job = state.job_mut(job_id)?;
    job.status = JobStatus::Completed;
    job.pending_reviews = vec![ReviewerRole::Client, ReviewerRole::Freelancer];
    job.reviews = Vec::new();
    job.completed_at = Some(now);
    job.updated_at = now;

    if state.escrows.get(job_id).map(|e| e.status) == Some(EscrowStatus::Held) {
        apply_release(state, job_id, false)?;
    }
    Ok(true)
}

/// Credits the freelancer and appends the mirrored payment_sent row for
/// the client's statement (the client's balance was already debited when
/// the escrow hold was funded).
fn apply_payout(
    state: &mut State,
    client_id: &str,
    freelancer_id: &str,
    amount: i64,
    reference: &str,
    description: &str,
) -> PayResult<()> {
    apply_adjustment(
        state,
        freelancer_id,
        Some(client_id),
        amount,
        TxType::PaymentReceived,
        reference,
        description,
    )?;
    append_record(
        state,
        client_id,
        Some(freelancer_id),
        -amount,
        TxType::PaymentSent,
        reference,
        description,
    );
    Ok(())
}

impl Orchestrator {
    pub fn new(db: Datastore, outbox: Outbox, policy: Policy) -> Self {
        Self { db, outbox, policy }
    }

    /// Accepts one proposal and rejects its pending siblings. Escrow
    /// funding, job award, proposal statuses, and milestone seeding all
    /// commit together — there is no observable window where a job is
    /// in progress without milestones.
    pub async fn accept_proposal(
        &self,
        proposal_id: &str,
        job_id: &str,
        client_id: &str,
    ) -> PayResult<()> {
        let (pid, jid, cid) =
            (proposal_id.to_string(), job_id.to_string(), client_id.to_string());
        let (proposal, rejected) = self
            .db
            .run(move |state| {
                let proposal = state.proposal(&pid)?.clone();
                if proposal.job_id != jid {
                    return Err(PayError::NotFound("proposal"));
                }
                if proposal.status != ProposalStatus::Pending {
                    return Err(PayError::InvalidState("proposal is no longer pending"));
                }
                let job = state.job(&jid)?.clone();
                if job.client_id != cid {
                    return Err(PayError::Unauthorized("only the job's client can accept"));
                }
                if job.status != JobStatus::Open {
                    return Err(PayError::InvalidState("job is not open"));
                }

                apply_create(
                    state,
                    &jid,
                    proposal.proposed_amount,
                    &job.client_id,
                    &proposal.freelancer_id,
                )?;

                let mut rejected = 0u64;
                for p in state.proposals.values_mut().filter(|p| p.job_id == jid) {
                    if p.id == pid {
                        p.status = ProposalStatus::Accepted;
                    } else if p.status != ProposalStatus::Rejected {
                        p.status = ProposalStatus::Rejected;
                        rejected += 1;
                    }
                    p.updated_at = Utc::now();
                }

                let job = state.job_mut(&jid)?;
                job.status = JobStatus::InProgress;
                job.awarded_to = Some(proposal.freelancer_id.clone());
                job.accepted_amount = Some(proposal.proposed_amount);
                job.payment_preference = Some(proposal.payment_preference);
                job.milestone_drafts = proposal.milestones.clone();
                job.updated_at = Utc::now();

                apply_create_milestones(state, &jid, &proposal)?;
                Ok((proposal, rejected))
            })
            .await?;

        PROPOSALS_ACCEPTED.inc();
        PROPOSALS_REJECTED.inc_by(rejected);
        ESCROWS_CREATED.inc();
        ESCROW_HELD.add(proposal.proposed_amount);
        TX_APPENDED.with_label_values(&["payment_sent"]).inc();
        info!(
            job_id = %job_id,
            proposal_id = %proposal_id,
            amount = proposal.proposed_amount,
            "proposal accepted, escrow funded"
        );

        self.outbox
            .emit_all(vec![
                Activity::new(
                    &proposal.client_id,
                    "contract_started",
                    format!(
                        "Accepted a proposal of {} and funded escrow",
                        fmt_naira(proposal.proposed_amount)
                    ),
                )
                .with_job(job_id)
                .with_amount(proposal.proposed_amount),
                Activity::new(
                    &proposal.freelancer_id,
                    "proposal_accepted",
                    "Your proposal was accepted. Work can begin.".to_string(),
                )
                .with_job(job_id),
            ])
            .await;
        Ok(())
    }

    /// Releases one milestone's payment out of escrow. The already-paid
    /// check lives inside the same transaction as the credit, so a
    /// duplicate concurrent call loses cleanly with `AlreadyPaid`.
    pub async fn release_milestone_payment(
        &self,
        job_id: &str,
        milestone_id: &str,
        amount: i64,
        client_id: &str,
        freelancer_id: &str,
    ) -> PayResult<()> {
        let enforce_order = self.policy.enforce_sequential_milestones;
        let (jid, mid, cid, fid) = (
            job_id.to_string(),
            milestone_id.to_string(),
            client_id.to_string(),
            freelancer_id.to_string(),
        );
        let completed = self
            .db
            .run(move |state| {
                let job = state.job(&jid)?;
                if job.status != JobStatus::InProgress {
                    return Err(PayError::InvalidState("job is not in progress"));
                }
                if job.client_id != cid {
                    return Err(PayError::Unauthorized("only the client can release payment"));
                }
                if job.awarded_to.as_deref() != Some(fid.as_str()) {
                    return Err(PayError::Validation("freelancer does not match job award"));
                }

                let milestones =
                    state.milestones.get(&jid).ok_or(PayError::NotFound("milestone"))?;
                let idx = milestones
                    .iter()
                    .position(|m| m.id == mid)
                    .ok_or(PayError::NotFound("milestone"))?;
                if milestones[idx].payment_status == PaymentStatus::Paid {
                    return Err(PayError::AlreadyPaid);
                }
                if milestones[idx].amount != amount {
                    return Err(PayError::Validation("amount does not match milestone"));
                }
                if enforce_order
                    && milestones[..idx].iter().any(|m| m.payment_status != PaymentStatus::Paid)
                {
                    return Err(PayError::InvalidState("earlier milestones are unpaid"));
                }

                state.escrow(&jid)?;
                apply_reduce(state, &jid, amount)?;
                apply_payout(
                    state,
                    &cid,
                    &fid,
                    amount,
                    &format!("REL-{jid}-{mid}"),
                    "Milestone payment",
                )?;

                let ms = state.milestone_mut(&jid, &mid)?;
                ms.payment_status = PaymentStatus::Paid;
                ms.paid_at = Some(Utc::now());
                if ms.status != MilestoneStatus::Completed {
                    ms.status = MilestoneStatus::Completed;
                    ms.progress = 100;
                    ms.completed_at = Some(Utc::now());
                }
                ms.updated_at = Utc::now();

                finish_job_if_done(state, &jid)
            })
            .await?;

        RELEASES.with_label_values(&["milestone"]).inc();
        RELEASED_KOBO.with_label_values(&["milestone"]).inc_by(amount as u64);
        ESCROW_HELD.sub(amount);
        TX_APPENDED.with_label_values(&["payment_received"]).inc();
        TX_APPENDED.with_label_values(&["payment_sent"]).inc();
        if completed {
            JOBS_COMPLETED.inc();
        }
        info!(job_id = %job_id, milestone_id = %milestone_id, amount, completed, "milestone paid");

        let mut activities = vec![
            Activity::new(
                client_id,
                "milestone_payment_sent",
                format!("Payment of {} released for milestone", fmt_naira(amount)),
            )
            .with_job(job_id)
            .with_amount(-amount),
            Activity::new(
                freelancer_id,
                "milestone_payment_received",
                format!("Received payment of {} for milestone", fmt_naira(amount)),
            )
            .with_job(job_id)
            .with_amount(amount),
        ];
        if completed {
            activities.push(
                Activity::new(client_id, "job_completed", "All milestones completed. Please leave a review.".to_string())
                    .with_job(job_id),
            );
            activities.push(
                Activity::new(freelancer_id, "job_completed", "Completed all milestones. Please leave a review.".to_string())
                    .with_job(job_id),
            );
        }
        self.outbox.emit_all(activities).await;
        Ok(())
    }

    /// Completion-preference payout: drains the remaining hold in one
    /// step, marks the synthetic milestone paid, and completes the job.
    pub async fn release_job_payment(
        &self,
        job_id: &str,
        amount: i64,
        client_id: &str,
        freelancer_id: &str,
    ) -> PayResult<()> {
        let (jid, cid, fid) =
            (job_id.to_string(), client_id.to_string(), freelancer_id.to_string());
        self.db
            .run(move |state| {
                let job = state.job(&jid)?;
                if job.status != JobStatus::InProgress {
                    return Err(PayError::InvalidState("job is not in progress"));
                }
                if job.client_id != cid {
                    return Err(PayError::Unauthorized("only the client can release payment"));
                }
                if job.awarded_to.as_deref() != Some(fid.as_str()) {
                    return Err(PayError::Validation("freelancer does not match job award"));
                }
                if job.payment_preference != Some(PaymentPreference::Completion) {
                    return Err(PayError::InvalidState("job is not completion-preference"));
                }

                let escrow = state.escrow(&jid)?;
                if escrow.status != EscrowStatus::Held {
                    return Err(PayError::AlreadyPaid);
                }
                if escrow.amount != amount {
                    return Err(PayError::Validation("amount does not match remaining escrow"));
                }

                apply_reduce(state, &jid, amount)?;
                apply_payout(
                    state,
                    &cid,
                    &fid,
                    amount,
                    &format!("REL-{jid}"),
                    "Full payment for completed job",
                )?;

                let now = Utc::now();
                for ms in state.milestones.entry(jid.clone()).or_default().iter_mut() {
                    if ms.payment_status != PaymentStatus::Paid {
                        ms.payment_status = PaymentStatus::Paid;
                        ms.paid_at = Some(now);
                        ms.status = MilestoneStatus::Completed;
                        ms.progress = 100;
                        ms.completed_at = Some(now);
                        ms.updated_at = now;
                    }
                }

                if !finish_job_if_done(state, &jid)? {
                    return Err(PayError::InvalidState("job has no milestones to pay"));
                }
                Ok(())
            })
            .await?;

        RELEASES.with_label_values(&["full"]).inc();
        RELEASED_KOBO.with_label_values(&["full"]).inc_by(amount as u64);
        ESCROW_HELD.sub(amount);
        TX_APPENDED.with_label_values(&["payment_received"]).inc();
        TX_APPENDED.with_label_values(&["payment_sent"]).inc();
        JOBS_COMPLETED.inc();
        info!(job_id = %job_id, amount, "full job payment released");

        self.outbox
            .emit_all(vec![
                Activity::new(
                    client_id,
                    "job_payment_sent",
                    format!("Full payment of {} released for completed job", fmt_naira(amount)),
                )
                .with_job(job_id)
                .with_amount(-amount),
                Activity::new(
                    freelancer_id,
                    "job_payment_received",
                    format!("Received full payment of {} for completed job", fmt_naira(amount)),
                )
                .with_job(job_id)
                .with_amount(amount),
            ])
            .await;
        Ok(())
    }

    /// Records one side's review and folds the rating into the reviewee's
    /// running average, all in one transaction.
    pub async fn submit_job_review(
        &self,
        job_id: &str,
        reviewer_id: &str,
        rating: u8,
        comment: &str,
    ) -> PayResult<()> {
        if !(1..=5).contains(&rating) {
            return Err(PayError::Validation("rating must be within 1..=5"));
        }
        let (jid, rid, text) = (job_id.to_string(), reviewer_id.to_string(), comment.to_string());
        let reviewee = self
            .db
            .run(move |state| {
                let job = state.job(&jid)?.clone();
                if job.status != JobStatus::Completed {
                    return Err(PayError::InvalidState("job is not completed"));
                }
                let freelancer =
                    job.awarded_to.clone().ok_or(PayError::InvalidState("job was never awarded"))?;
                let (role, reviewee) = if rid == job.client_id {
                    (ReviewerRole::Client, freelancer)
                } else if rid == freelancer {
                    (ReviewerRole::Freelancer, job.client_id.clone())
                } else {
                    return Err(PayError::Unauthorized("not a job participant"));
                };
                if job.review_for(role).is_some() {
                    return Err(PayError::AlreadyReviewed);
                }

                let job = state.job_mut(&jid)?;
                job.reviews.push((
                    role,
                    Review { rating, comment: text.clone(), created_at: Utc::now() },
                ));
                job.pending_reviews.retain(|r| *r != role);
                job.updated_at = Utc::now();

                let profile = state.profile_mut(&reviewee);
                let count = profile.total_reviews as f64;
                profile.rating = (profile.rating * count + rating as f64) / (count + 1.0);
                profile.total_reviews += 1;
                Ok(reviewee)
            })
            .await?;

        REVIEWS_SUBMITTED.inc();
        self.outbox
            .emit(
                Activity::new(
                    &reviewee,
                    "review_received",
                    format!("Received a {rating}-star review"),
                )
                .with_job(job_id),
            )
            .await;
        Ok(())
    }

    /// Cancels a job before any payment has been released. A held escrow
    /// is refunded to the client in the same transaction — cancellation
    /// never silently drops held funds.
    pub async fn cancel_job(&self, job_id: &str, client_id: &str) -> PayResult<()> {
        let (jid, cid) = (job_id.to_string(), client_id.to_string());
        let refunded = self
            .db
            .run(move |state| {
                let job = state.job(&jid)?;
                if job.client_id != cid {
                    return Err(PayError::Unauthorized("only the client can cancel the job"));
                }
                match job.status {
                    JobStatus::Open | JobStatus::InProgress => {}
                    _ => return Err(PayError::InvalidState("job can no longer be cancelled")),
                }
                let any_paid = state
                    .milestones
                    .get(&jid)
                    .map(|ms| ms.iter().any(|m| m.payment_status == PaymentStatus::Paid))
                    .unwrap_or(false);
                if any_paid {
                    return Err(PayError::InvalidState("payments already released"));
                }

                let mut refunded = 0i64;
                if state.escrows.get(&jid).map(|e| e.status) == Some(EscrowStatus::Held) {
                    refunded = apply_release(state, &jid, true)?;
                    if refunded > 0 {
                        // refund, not income: balance comes back without
                        // touching the earnings totals
                        let wallet = state.wallet_mut(&cid)?;
                        wallet.balance += refunded;
                        wallet.updated_at = Utc::now();
                        append_record(
                            state,
                            &cid,
                            None,
                            refunded,
                            TxType::Deposit,
                            &format!("ESC-{jid}-refund"),
                            "Escrow refund for cancelled job",
                        );
                    }
                }

                for p in state.proposals.values_mut().filter(|p| p.job_id == jid) {
                    if p.status == ProposalStatus::Pending {
                        p.status = ProposalStatus::Rejected;
                        p.updated_at = Utc::now();
                    }
                }

                let job = state.job_mut(&jid)?;
                job.status = JobStatus::Cancelled;
                job.updated_at = Utc::now();
                Ok(refunded)
            })
            .await?;

        JOBS_CANCELLED.inc();
        if refunded > 0 {
            ESCROW_HELD.sub(refunded);
            TX_APPENDED.with_label_values(&["deposit"]).inc();
        }
        info!(job_id = %job_id, refunded, "job cancelled");

        self.outbox
            .emit(
                Activity::new(client_id, "job_cancelled", "Job cancelled".to_string())
                    .with_job(job_id)
                    .with_amount(refunded),
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Milestone;
    use crate::testkit::{draft, harness, new_proposal, Harness};

    /// Posts a job, submits a proposal, accepts it. Returns (job_id,
    /// proposal_id).
    async fn awarded_job(
        h: &Harness,
        budget: i64,
        preference: PaymentPreference,
        milestones: &[(&str, i64, u32)],
    ) -> (String, String) {
        h.seed_wallet("client", budget).await;
        h.seed_wallet("lancer", 0).await;
        let job = h.jobs.create_job("client", "Site", "Build a site", budget).await.unwrap();

        let mut input = new_proposal(&job.id, "lancer", budget);
        input.payment_preference = preference;
        input.milestones = milestones.iter().map(|(n, a, w)| draft(n, *a, *w)).collect();
        let p = h.proposals.create_proposal(input).await.unwrap();

        h.orchestrator.accept_proposal(&p.id, &job.id, "client").await.unwrap();
        (job.id, p.id)
    }

    async fn milestones_of(h: &Harness, job_id: &str) -> Vec<Milestone> {
        h.milestones.get_milestones(job_id).await
    }

    /// Held amount always equals the accepted amount minus everything paid out.
    async fn assert_escrow_invariant(h: &Harness, job_id: &str) {
        let job = h.jobs.get_job(job_id).await.unwrap();
        let escrow = h.escrows.get_escrow(job_id).await.unwrap();
        let paid: i64 = milestones_of(h, job_id)
            .await
            .iter()
            .filter(|m| m.payment_status == PaymentStatus::Paid)
            .map(|m| m.amount)
            .sum();
        assert_eq!(escrow.amount, job.accepted_amount.unwrap() - paid);
    }

    #[tokio::test]
    async fn accepting_rejects_all_sibling_proposals() {
        let h = harness();
        h.seed_wallet("client", 50_000).await;
        h.seed_wallet("lancer", 0).await;
        let job = h.jobs.create_job("client", "Site", "Build a site", 50_000).await.unwrap();

        let mut winner = new_proposal(&job.id, "lancer", 50_000);
        winner.milestones = vec![draft("All", 50_000, 4)];
        let winner = h.proposals.create_proposal(winner).await.unwrap();
        for other in ["l2", "l3", "l4"] {
            let mut p = new_proposal(&job.id, other, 50_000);
            p.milestones = vec![draft("All", 50_000, 4)];
            h.proposals.create_proposal(p).await.unwrap();
        }

        // only the job's client can accept
        let err = h
            .orchestrator
            .accept_proposal(&winner.id, &job.id, "lancer")
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::Unauthorized(_)));

        h.orchestrator.accept_proposal(&winner.id, &job.id, "client").await.unwrap();

        let all = h.proposals.proposals_by_job(&job.id).await;
        assert_eq!(all.len(), 4);
        assert_eq!(
            all.iter().filter(|p| p.status == ProposalStatus::Accepted).count(),
            1
        );
        assert_eq!(
            all.iter().filter(|p| p.status == ProposalStatus::Rejected).count(),
            3
        );

        // award + escrow + milestones landed in the same commit
        let job = h.jobs.get_job(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.awarded_to.as_deref(), Some("lancer"));
        assert_eq!(job.accepted_amount, Some(50_000));
        assert_eq!(h.wallets.get_balance("client").await.unwrap(), 0);
        assert_eq!(milestones_of(&h, &job.id).await.len(), 1);
        assert_escrow_invariant(&h, &job.id).await;

        // a second acceptance attempt finds the job no longer open
        let err = h.orchestrator.accept_proposal(&winner.id, &job.id, "client").await.unwrap_err();
        assert!(matches!(err, PayError::InvalidState(_)));
    }

    #[tokio::test]
    async fn underfunded_client_cannot_accept() {
        let h = harness();
        h.seed_wallet("client", 60_000).await;
        h.seed_wallet("lancer", 0).await;
        let job = h.jobs.create_job("client", "Site", "x", 50_000).await.unwrap();
        // balance drops below the proposal after posting
        h.wallets
            .adjust_balance("client", -40_000, TxType::Withdrawal, "drain")
            .await
            .unwrap();

        let mut p = new_proposal(&job.id, "lancer", 50_000);
        p.milestones = vec![draft("All", 50_000, 4)];
        let p = h.proposals.create_proposal(p).await.unwrap();

        let err = h.orchestrator.accept_proposal(&p.id, &job.id, "client").await.unwrap_err();
        assert!(matches!(err, PayError::InsufficientFunds));
        // nothing moved: proposal pending, job open, no escrow
        assert_eq!(
            h.proposals.get_proposal(&p.id).await.unwrap().status,
            ProposalStatus::Pending
        );
        assert_eq!(h.jobs.get_job(&job.id).await.unwrap().status, JobStatus::Open);
        assert!(h.escrows.get_escrow(&job.id).await.is_err());
    }

    #[tokio::test]
    async fn completion_job_full_payout_scenario() {
        let h = harness();
        let (job_id, _) = awarded_job(&h, 50_000, PaymentPreference::Completion, &[]).await;

        let escrow = h.escrows.get_escrow(&job_id).await.unwrap();
        assert_eq!(escrow.amount, 50_000);
        assert_eq!(h.wallets.get_balance("client").await.unwrap(), 0);

        h.orchestrator
            .release_job_payment(&job_id, 50_000, "client", "lancer")
            .await
            .unwrap();

        assert_eq!(h.wallets.get_balance("lancer").await.unwrap(), 50_000);
        let escrow = h.escrows.get_escrow(&job_id).await.unwrap();
        assert_eq!(escrow.status, EscrowStatus::Released);
        assert_eq!(escrow.amount, 0);

        let job = h.jobs.get_job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.pending_reviews,
            vec![ReviewerRole::Client, ReviewerRole::Freelancer]
        );

        // paying out twice fails with no balance movement
        let err = h
            .orchestrator
            .release_job_payment(&job_id, 50_000, "client", "lancer")
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::InvalidState(_)));
        assert_eq!(h.wallets.get_balance("lancer").await.unwrap(), 50_000);
    }

    #[tokio::test]
    async fn per_milestone_payout_scenario() {
        let h = harness();
        let (job_id, _) = awarded_job(
            &h,
            50_000,
            PaymentPreference::PerMilestone,
            &[("Design", 20_000, 1), ("Build", 30_000, 3)],
        )
        .await;
        let ms = milestones_of(&h, &job_id).await;

        h.orchestrator
            .release_milestone_payment(&job_id, &ms[0].id, 20_000, "client", "lancer")
            .await
            .unwrap();
        assert_eq!(h.escrows.get_escrow(&job_id).await.unwrap().amount, 30_000);
        assert_eq!(h.wallets.get_balance("lancer").await.unwrap(), 20_000);
        assert_eq!(h.jobs.get_job(&job_id).await.unwrap().status, JobStatus::InProgress);
        assert_escrow_invariant(&h, &job_id).await;

        // duplicate release is rejected and moves nothing
        let err = h
            .orchestrator
            .release_milestone_payment(&job_id, &ms[0].id, 20_000, "client", "lancer")
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::AlreadyPaid));
        assert_eq!(h.wallets.get_balance("lancer").await.unwrap(), 20_000);
        assert_eq!(h.escrows.get_escrow(&job_id).await.unwrap().amount, 30_000);

        h.orchestrator
            .release_milestone_payment(&job_id, &ms[1].id, 30_000, "client", "lancer")
            .await
            .unwrap();
        assert_eq!(h.escrows.get_escrow(&job_id).await.unwrap().amount, 0);
        assert_eq!(h.wallets.get_balance("lancer").await.unwrap(), 50_000);

        let job = h.jobs.get_job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(h.escrows.get_escrow(&job_id).await.unwrap().status, EscrowStatus::Released);
        assert_escrow_invariant(&h, &job_id).await;

        let lancer_wallet = h.wallets.get_wallet("lancer").await.unwrap();
        assert_eq!(lancer_wallet.total_earnings, 50_000);
    }

    #[tokio::test]
    async fn release_guards_actor_amount_and_state() {
        let h = harness();
        let (job_id, _) = awarded_job(
            &h,
            50_000,
            PaymentPreference::PerMilestone,
            &[("Design", 20_000, 1), ("Build", 30_000, 3)],
        )
        .await;
        let ms = milestones_of(&h, &job_id).await;

        let err = h
            .orchestrator
            .release_milestone_payment(&job_id, &ms[0].id, 20_000, "lancer", "lancer")
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::Unauthorized(_)));

        let err = h
            .orchestrator
            .release_milestone_payment(&job_id, &ms[0].id, 25_000, "client", "lancer")
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::Validation(_)));

        let err = h
            .orchestrator
            .release_milestone_payment(&job_id, "MS-missing", 20_000, "client", "lancer")
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::NotFound("milestone")));

        // none of the failed attempts moved money
        assert_eq!(h.wallets.get_balance("lancer").await.unwrap(), 0);
        assert_eq!(h.escrows.get_escrow(&job_id).await.unwrap().amount, 50_000);
    }

    #[tokio::test]
    async fn out_of_order_release_respects_policy_flag() {
        // default: paying milestone 2 before 1 is allowed
        let h = harness();
        let (job_id, _) = awarded_job(
            &h,
            50_000,
            PaymentPreference::PerMilestone,
            &[("Design", 20_000, 1), ("Build", 30_000, 3)],
        )
        .await;
        let ms = milestones_of(&h, &job_id).await;
        h.orchestrator
            .release_milestone_payment(&job_id, &ms[1].id, 30_000, "client", "lancer")
            .await
            .unwrap();
        assert_escrow_invariant(&h, &job_id).await;

        // with enforcement on, the same release is rejected
        let h = harness().with_sequential_milestones();
        let (job_id, _) = awarded_job(
            &h,
            50_000,
            PaymentPreference::PerMilestone,
            &[("Design", 20_000, 1), ("Build", 30_000, 3)],
        )
        .await;
        let ms = milestones_of(&h, &job_id).await;
        let err = h
            .orchestrator
            .release_milestone_payment(&job_id, &ms[1].id, 30_000, "client", "lancer")
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::InvalidState(_)));

        h.orchestrator
            .release_milestone_payment(&job_id, &ms[0].id, 20_000, "client", "lancer")
            .await
            .unwrap();
        h.orchestrator
            .release_milestone_payment(&job_id, &ms[1].id, 30_000, "client", "lancer")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reviews_gate_on_completion_and_roles() {
        let h = harness();
        let (job_id, _) = awarded_job(&h, 50_000, PaymentPreference::Completion, &[]).await;

        // not completed yet
        let err = h
            .orchestrator
            .submit_job_review(&job_id, "client", 5, "great")
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::InvalidState(_)));

        h.orchestrator
            .release_job_payment(&job_id, 50_000, "client", "lancer")
            .await
            .unwrap();

        let err = h
            .orchestrator
            .submit_job_review(&job_id, "stranger", 5, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::Unauthorized(_)));

        h.orchestrator.submit_job_review(&job_id, "client", 4, "solid work").await.unwrap();
        let job = h.jobs.get_job(&job_id).await.unwrap();
        assert_eq!(job.pending_reviews, vec![ReviewerRole::Freelancer]);
        assert_eq!(h.profile_rating("lancer").await, (4.0, 1));

        // same role twice
        let err = h
            .orchestrator
            .submit_job_review(&job_id, "client", 1, "changed my mind")
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::AlreadyReviewed));
        assert_eq!(h.profile_rating("lancer").await, (4.0, 1));

        h.orchestrator.submit_job_review(&job_id, "lancer", 5, "great client").await.unwrap();
        let job = h.jobs.get_job(&job_id).await.unwrap();
        assert!(job.pending_reviews.is_empty());
        assert_eq!(job.reviews.len(), 2);
        assert_eq!(h.profile_rating("client").await, (5.0, 1));
    }

    #[tokio::test]
    async fn running_average_folds_across_jobs() {
        let h = harness();
        for _ in 0..2 {
            let (job_id, _) = awarded_job(&h, 10_000, PaymentPreference::Completion, &[]).await;
            h.orchestrator
                .release_job_payment(&job_id, 10_000, "client", "lancer")
                .await
                .unwrap();
            h.orchestrator.submit_job_review(&job_id, "client", 4, "ok").await.unwrap();
            // refill for the next round
            h.wallets.adjust_balance("client", 10_000, TxType::Deposit, "refill").await.unwrap();
        }
        let (job_id, _) = awarded_job(&h, 10_000, PaymentPreference::Completion, &[]).await;
        h.orchestrator
            .release_job_payment(&job_id, 10_000, "client", "lancer")
            .await
            .unwrap();
        h.orchestrator.submit_job_review(&job_id, "client", 5, "better").await.unwrap();

        // (4 + 4 + 5) / 3
        let (rating, count) = h.profile_rating("lancer").await;
        assert_eq!(count, 3);
        assert!((rating - 13.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cancel_refunds_the_full_hold() {
        let h = harness();
        let (job_id, _) = awarded_job(&h, 50_000, PaymentPreference::Completion, &[]).await;
        assert_eq!(h.wallets.get_balance("client").await.unwrap(), 0);

        let err = h.orchestrator.cancel_job(&job_id, "lancer").await.unwrap_err();
        assert!(matches!(err, PayError::Unauthorized(_)));

        h.orchestrator.cancel_job(&job_id, "client").await.unwrap();
        assert_eq!(h.wallets.get_balance("client").await.unwrap(), 50_000);
        let escrow = h.escrows.get_escrow(&job_id).await.unwrap();
        assert_eq!(escrow.status, EscrowStatus::Released);
        assert_eq!(escrow.amount, 0);
        assert_eq!(h.jobs.get_job(&job_id).await.unwrap().status, JobStatus::Cancelled);
        // refund is not income
        assert_eq!(h.wallets.get_wallet("client").await.unwrap().total_earnings, 0);
    }

    #[tokio::test]
    async fn cancel_is_blocked_after_a_release() {
        let h = harness();
        let (job_id, _) = awarded_job(
            &h,
            50_000,
            PaymentPreference::PerMilestone,
            &[("Design", 20_000, 1), ("Build", 30_000, 3)],
        )
        .await;
        let ms = milestones_of(&h, &job_id).await;
        h.orchestrator
            .release_milestone_payment(&job_id, &ms[0].id, 20_000, "client", "lancer")
            .await
            .unwrap();

        let err = h.orchestrator.cancel_job(&job_id, "client").await.unwrap_err();
        assert!(matches!(err, PayError::InvalidState(_)));
        assert_eq!(h.jobs.get_job(&job_id).await.unwrap().status, JobStatus::InProgress);
    }
}
