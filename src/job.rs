// ===============================
// src/job.rs (job postings)
// ===============================
use chrono::Utc;

use crate::domain::{Job, JobStatus};
use crate::error::{PayError, PayResult};
use crate::store::{new_id, Datastore};

#[derive(Clone)]
pub struct JobStore {
    db: Datastore,
}

impl JobStore {
    pub fn new(db: Datastore) -> Self {
        Self { db }
    }

    /// Posting a job requires a wallet able to cover the budget, so the
    /// later escrow hold cannot be dead on arrival.
    pub async fn create_job(
        &self,
        client_id: &str,
        title: &str,
        description: &str,
        budget: i64,
    ) -> PayResult<Job> {
        if budget <= 0 {
            return Err(PayError::Validation("job budget must be positive"));
        }
        let now = Utc::now();
        let job = Job {
            id: new_id("JOB"),
            client_id: client_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            budget,
            accepted_amount: None,
            status: JobStatus::Open,
            awarded_to: None,
            payment_preference: None,
            milestone_drafts: Vec::new(),
            pending_reviews: Vec::new(),
            reviews: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.db
            .run(move |state| {
                let wallet = state.wallet(&job.client_id)?;
                if wallet.balance < job.budget {
                    return Err(PayError::InsufficientFunds);
                }
                state.jobs.insert(job.id.clone(), job.clone());
                Ok(job)
            })
            .await
    }

    pub async fn get_job(&self, job_id: &str) -> PayResult<Job> {
        self.db
            .read(|s| s.jobs.get(job_id).cloned())
            .await
            .ok_or(PayError::NotFound("job"))
    }

    pub async fn open_jobs(&self) -> Vec<Job> {
        let mut jobs = self
            .db
            .read(|s| {
                s.jobs
                    .values()
                    .filter(|j| j.status == JobStatus::Open)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn jobs_by_client(&self, client_id: &str) -> Vec<Job> {
        let cid = client_id.to_string();
        let mut jobs = self
            .db
            .read(move |s| {
                s.jobs.values().filter(|j| j.client_id == cid).cloned().collect::<Vec<_>>()
            })
            .await;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::harness;

    #[tokio::test]
    async fn posting_requires_fundable_budget() {
        let h = harness();
        h.seed_wallet("client", 10_000).await;

        let err = h
            .jobs
            .create_job("client", "Logo", "Design a logo", 20_000)
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::InsufficientFunds));

        let job = h.jobs.create_job("client", "Logo", "Design a logo", 10_000).await.unwrap();
        assert_eq!(job.status, JobStatus::Open);
        assert_eq!(h.jobs.get_job(&job.id).await.unwrap().budget, 10_000);
    }

    #[tokio::test]
    async fn missing_wallet_cannot_post() {
        let h = harness();
        let err = h.jobs.create_job("ghost", "Logo", "x", 1_000).await.unwrap_err();
        assert!(matches!(err, PayError::NotFound("wallet")));
    }
}
