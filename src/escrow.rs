// ===============================
// src/escrow.rs (Escrow Store)
// ===============================
use chrono::Utc;

use crate::domain::{Escrow, EscrowStatus, TxType};
use crate::error::{PayError, PayResult};
use crate::metrics::{ESCROWS_CREATED, ESCROW_HELD};
use crate::store::{Datastore, State};
use crate::wallet::apply_adjustment;

/// Creates the Held record and debits the client wallet. Composable into a
/// wider transaction (proposal acceptance); failure of either half aborts
/// both.
pub(crate) fn apply_create(
    state: &mut State,
    job_id: &str,
    amount: i64,
    client_id: &str,
    freelancer_id: &str,
) -> PayResult<()> {
    if amount <= 0 {
        return Err(PayError::Validation("escrow amount must be positive"));
    }
    if state.escrows.contains_key(job_id) {
        return Err(PayError::InvalidState("escrow already exists for job"));
    }
    apply_adjustment(
        state,
        client_id,
        Some(freelancer_id),
        -amount,
        TxType::PaymentSent,
        &format!("ESC-{job_id}"),
        "Escrow hold",
    )?;
    let now = Utc::now();
    state.escrows.insert(
        job_id.to_string(),
        Escrow {
            job_id: job_id.to_string(),
            amount,
            status: EscrowStatus::Held,
            client_id: client_id.to_string(),
            freelancer_id: freelancer_id.to_string(),
            created_at: now,
            updated_at: now,
            released_at: None,
        },
    );
    Ok(())
}

pub(crate) fn apply_reduce(state: &mut State, job_id: &str, amount: i64) -> PayResult<()> {
    let escrow = state.escrow_mut(job_id)?;
    if escrow.status != EscrowStatus::Held {
        return Err(PayError::InvalidState("escrow already released"));
    }
    if amount > escrow.amount {
        return Err(PayError::InsufficientEscrow);
    }
    escrow.amount -= amount;
    escrow.updated_at = Utc::now();
    Ok(())
}

/// Flips the hold to Released. Only valid once the amount has reached
/// zero, unless `force` drains the remainder (full-completion payout).
/// Returns the remainder that was still held.
pub(crate) fn apply_release(state: &mut State, job_id: &str, force: bool) -> PayResult<i64> {
    let escrow = state.escrow_mut(job_id)?;
    if escrow.status == EscrowStatus::Released {
        return Err(PayError::InvalidState("escrow already released"));
    }
    if escrow.amount > 0 && !force {
        return Err(PayError::InvalidState("escrow still holds funds"));
    }
    let remainder = escrow.amount;
    escrow.amount = 0;
    escrow.status = EscrowStatus::Released;
    escrow.released_at = Some(Utc::now());
    escrow.updated_at = Utc::now();
    Ok(remainder)
}

#[derive(Clone)]
pub struct EscrowStore {
    db: Datastore,
}

impl EscrowStore {
    pub fn new(db: Datastore) -> Self {
        Self { db }
    }

    pub async fn create_escrow(
        &self,
        job_id: &str,
        amount: i64,
        client_id: &str,
        freelancer_id: &str,
    ) -> PayResult<()> {
        let (j, c, f) = (job_id.to_string(), client_id.to_string(), freelancer_id.to_string());
        self.db
            .run(move |state| apply_create(state, &j, amount, &c, &f))
            .await?;
        ESCROWS_CREATED.inc();
        ESCROW_HELD.add(amount);
        Ok(())
    }

    pub async fn reduce_escrow(&self, job_id: &str, amount: i64) -> PayResult<()> {
        let j = job_id.to_string();
        self.db.run(move |state| apply_reduce(state, &j, amount)).await?;
        ESCROW_HELD.sub(amount);
        Ok(())
    }

    pub async fn mark_released(&self, job_id: &str, force: bool) -> PayResult<()> {
        let j = job_id.to_string();
        let remainder = self.db.run(move |state| apply_release(state, &j, force)).await?;
        ESCROW_HELD.sub(remainder);
        Ok(())
    }

    pub async fn get_escrow(&self, job_id: &str) -> PayResult<Escrow> {
        self.db
            .read(|s| s.escrows.get(job_id).cloned())
            .await
            .ok_or(PayError::NotFound("escrow"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::harness;

    #[tokio::test]
    async fn create_escrow_debits_client_atomically() {
        let h = harness();
        h.seed_wallet("client", 50_000).await;
        h.seed_wallet("lancer", 0).await;

        h.escrows.create_escrow("job-1", 30_000, "client", "lancer").await.unwrap();
        assert_eq!(h.wallets.get_balance("client").await.unwrap(), 20_000);

        let e = h.escrows.get_escrow("job-1").await.unwrap();
        assert_eq!(e.amount, 30_000);
        assert_eq!(e.status, EscrowStatus::Held);
    }

    #[tokio::test]
    async fn underfunded_client_aborts_both_halves() {
        let h = harness();
        h.seed_wallet("client", 10_000).await;
        h.seed_wallet("lancer", 0).await;

        let err = h
            .escrows
            .create_escrow("job-1", 30_000, "client", "lancer")
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::InsufficientFunds));
        // no partial debit, no orphan hold
        assert_eq!(h.wallets.get_balance("client").await.unwrap(), 10_000);
        assert!(matches!(
            h.escrows.get_escrow("job-1").await.unwrap_err(),
            PayError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn reduce_beyond_hold_is_rejected() {
        let h = harness();
        h.seed_wallet("client", 50_000).await;
        h.escrows.create_escrow("job-1", 30_000, "client", "lancer").await.unwrap();

        let err = h.escrows.reduce_escrow("job-1", 40_000).await.unwrap_err();
        assert!(matches!(err, PayError::InsufficientEscrow));
        assert_eq!(h.escrows.get_escrow("job-1").await.unwrap().amount, 30_000);

        h.escrows.reduce_escrow("job-1", 30_000).await.unwrap();
        assert_eq!(h.escrows.get_escrow("job-1").await.unwrap().amount, 0);
    }

    #[tokio::test]
    async fn release_requires_zero_unless_forced() {
        let h = harness();
        h.seed_wallet("client", 50_000).await;
        h.escrows.create_escrow("job-1", 30_000, "client", "lancer").await.unwrap();

        let err = h.escrows.mark_released("job-1", false).await.unwrap_err();
        assert!(matches!(err, PayError::InvalidState(_)));

        h.escrows.mark_released("job-1", true).await.unwrap();
        let e = h.escrows.get_escrow("job-1").await.unwrap();
        assert_eq!(e.status, EscrowStatus::Released);
        assert_eq!(e.amount, 0);

        // releasing twice is rejected
        let err = h.escrows.mark_released("job-1", true).await.unwrap_err();
        assert!(matches!(err, PayError::InvalidState(_)));
    }
}
