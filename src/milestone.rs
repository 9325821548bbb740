// ===============================
// src/milestone.rs (Milestone Store)
// ===============================
use chrono::Utc;

use crate::domain::{
    FileRef, Milestone, MilestoneStatus, PaymentPreference, PaymentStatus, Proposal,
};
use crate::error::{PayError, PayResult};
use crate::store::{new_id, Datastore, State};

/// Seeds the milestone records for a freshly accepted proposal. Per-milestone
/// proposals map draft-for-draft in proposal order; completion-preference
/// proposals get one synthetic milestone covering the full amount.
pub(crate) fn apply_create_milestones(
    state: &mut State,
    job_id: &str,
    proposal: &Proposal,
) -> PayResult<usize> {
    if state.milestones.get(job_id).map_or(false, |ms| !ms.is_empty()) {
        return Err(PayError::InvalidState("milestones already exist for job"));
    }

    let now = Utc::now();
    let blank = |name: &str, description: &str, amount: i64, duration_weeks: u32| Milestone {
        id: new_id("MS"),
        job_id: job_id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        amount,
        duration_weeks,
        status: MilestoneStatus::Pending,
        progress: 0,
        payment_status: PaymentStatus::Unpaid,
        attachments: Vec::new(),
        start_date: None,
        completed_at: None,
        paid_at: None,
        created_at: now,
        updated_at: now,
    };

    let records: Vec<Milestone> = match proposal.payment_preference {
        PaymentPreference::PerMilestone => proposal
            .milestones
            .iter()
            .map(|d| blank(&d.name, &d.description, d.amount, d.duration_weeks))
            .collect(),
        PaymentPreference::Completion => vec![blank(
            "Project Completion",
            "Full payment upon project completion",
            proposal.proposed_amount,
            proposal.completion_weeks,
        )],
    };
    if records.is_empty() {
        return Err(PayError::Validation("proposal has no milestones to seed"));
    }

    let count = records.len();
    state.milestones.insert(job_id.to_string(), records);
    Ok(count)
}

fn is_participant(state: &State, job_id: &str, actor_id: &str) -> PayResult<bool> {
    let job = state.job(job_id)?;
    Ok(actor_id == job.client_id || Some(actor_id) == job.awarded_to.as_deref())
}

#[derive(Clone)]
pub struct MilestoneStore {
    db: Datastore,
}

impl MilestoneStore {
    pub fn new(db: Datastore) -> Self {
        Self { db }
    }

    pub async fn create_milestones(&self, job_id: &str, proposal: &Proposal) -> PayResult<usize> {
        let (j, p) = (job_id.to_string(), proposal.clone());
        self.db.run(move |state| apply_create_milestones(state, &j, &p)).await
    }

    /// Empty vec (not an error) when the job has no milestones yet.
    pub async fn get_milestones(&self, job_id: &str) -> Vec<Milestone> {
        let j = job_id.to_string();
        self.db
            .read(move |s| s.milestones.get(&j).cloned().unwrap_or_default())
            .await
    }

    pub async fn update_progress(
        &self,
        job_id: &str,
        milestone_id: &str,
        progress: u8,
        actor_id: &str,
    ) -> PayResult<()> {
        if progress > 100 {
            return Err(PayError::Validation("progress must be within 0..=100"));
        }
        let (j, m, a) = (job_id.to_string(), milestone_id.to_string(), actor_id.to_string());
        self.db
            .run(move |state| {
                if !is_participant(state, &j, &a)? {
                    return Err(PayError::Unauthorized("not a participant of this job"));
                }
                let ms = state.milestone_mut(&j, &m)?;
                if ms.status == MilestoneStatus::Completed {
                    return Err(PayError::InvalidState("milestone already completed"));
                }
                if ms.status == MilestoneStatus::Pending && progress > 0 {
                    ms.status = MilestoneStatus::InProgress;
                    ms.start_date = Some(Utc::now());
                }
                ms.progress = progress;
                ms.updated_at = Utc::now();
                Ok(())
            })
            .await
    }

    /// Only the job's client may sign a milestone off.
    pub async fn mark_complete(
        &self,
        job_id: &str,
        milestone_id: &str,
        actor_id: &str,
    ) -> PayResult<()> {
        let (j, m, a) = (job_id.to_string(), milestone_id.to_string(), actor_id.to_string());
        self.db
            .run(move |state| {
                let job = state.job(&j)?;
                if job.client_id != a {
                    return Err(PayError::Unauthorized("only the client can complete milestones"));
                }
                let ms = state.milestone_mut(&j, &m)?;
                if ms.status == MilestoneStatus::Completed {
                    return Err(PayError::AlreadyCompleted);
                }
                ms.status = MilestoneStatus::Completed;
                ms.progress = 100;
                ms.completed_at = Some(Utc::now());
                ms.updated_at = Utc::now();
                Ok(())
            })
            .await
    }

    /// Appends to the attachment list; never touches status or payment.
    pub async fn attach_file(
        &self,
        job_id: &str,
        milestone_id: &str,
        url: &str,
        file_name: &str,
        uploader_id: &str,
    ) -> PayResult<()> {
        let (j, m, u) = (job_id.to_string(), milestone_id.to_string(), uploader_id.to_string());
        let file = FileRef {
            url: url.to_string(),
            file_name: file_name.to_string(),
            uploaded_by: uploader_id.to_string(),
            uploaded_at: Utc::now(),
        };
        self.db
            .run(move |state| {
                if !is_participant(state, &j, &u)? {
                    return Err(PayError::Unauthorized("not a participant of this job"));
                }
                let ms = state.milestone_mut(&j, &m)?;
                ms.attachments.push(file);
                ms.updated_at = Utc::now();
                Ok(())
            })
            .await
    }
}
