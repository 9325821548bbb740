// ===============================
// src/wallet.rs (Ledger Store)
// ===============================
use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};

use crate::activity::Outbox;
use crate::config::Policy;
use crate::domain::{
    fmt_naira, Activity, IntentStatus, PaymentIntent, TxRecord, TxStatus, TxType, Wallet,
    WalletStatus,
};
use crate::error::{PayError, PayResult};
use crate::gateway::{BankDetails, CheckoutSession, Gateway, RemoteStatus, ReservedAccount};
use crate::metrics::{INTENTS_OPEN, TX_APPENDED, WALLETS_CREATED};
use crate::store::{new_id, Datastore, State};

/// Appends one immutable ledger row. Record-only: no balance effect.
pub(crate) fn append_record(
    state: &mut State,
    user_id: &str,
    counterparty: Option<&str>,
    amount: i64,
    tx_type: TxType,
    reference: &str,
    description: &str,
) {
    state.transactions.push(TxRecord {
        id: new_id("TX"),
        user_id: user_id.to_string(),
        counterparty_id: counterparty.map(str::to_string),
        tx_type,
        amount,
        reference: reference.to_string(),
        status: TxStatus::Completed,
        description: description.to_string(),
        created_at: Utc::now(),
    });
}

/// Atomic balance adjustment, always paired with a ledger row carrying the
/// same sign. The non-negative balance check happens here, inside whatever
/// transaction the caller composed this into.
pub(crate) fn apply_adjustment(
    state: &mut State,
    user_id: &str,
    counterparty: Option<&str>,
    delta: i64,
    tx_type: TxType,
    reference: &str,
    description: &str,
) -> PayResult<()> {
    let wallet = state.wallet_mut(user_id)?;
    let new_balance = wallet.balance + delta;
    if new_balance < 0 {
        return Err(PayError::InsufficientFunds);
    }
    wallet.balance = new_balance;
    if delta > 0 && matches!(tx_type, TxType::PaymentReceived | TxType::Deposit) {
        wallet.total_earnings += delta;
    }
    if tx_type == TxType::Withdrawal {
        wallet.total_withdrawals += delta.abs();
    }
    wallet.updated_at = Utc::now();

    append_record(state, user_id, counterparty, delta, tx_type, reference, description);
    Ok(())
}

/// Outcome of a deposit confirmation. `AlreadyProcessed` is the idempotent
/// short-circuit for duplicate callbacks/webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositOutcome {
    Credited(i64),
    StillPending,
    Failed,
    AlreadyProcessed,
}

#[derive(Clone)]
pub struct WalletStore {
    db: Datastore,
    gateway: Gateway,
    outbox: Outbox,
    policy: Policy,
}

impl WalletStore {
    pub fn new(db: Datastore, gateway: Gateway, outbox: Outbox, policy: Policy) -> Self {
        Self { db, gateway, outbox, policy }
    }

    /// Idempotent: an existing wallet is returned unchanged. External
    /// account provisioning is best-effort — a gateway outage degrades to
    /// a locally generated placeholder account, never a failed creation.
    pub async fn create_wallet(
        &self,
        user_id: &str,
        full_name: &str,
        email: &str,
    ) -> PayResult<Wallet> {
        if let Some(existing) = self.db.read(|s| s.wallets.get(user_id).cloned()).await {
            return Ok(existing);
        }

        let reserved = match self.gateway.reserve_account(user_id, full_name, email).await {
            Ok(r) => r,
            Err(e) => {
                warn!(%user_id, err = %e, "account provisioning failed, using placeholder");
                ReservedAccount {
                    account_number: format!(
                        "2{:09}",
                        rand::thread_rng().gen_range(0..1_000_000_000u32)
                    ),
                    bank_name: "Virtual Bank".to_string(),
                    account_reference: format!("REF-{user_id}"),
                }
            }
        };

        let now = Utc::now();
        let wallet = Wallet {
            user_id: user_id.to_string(),
            full_name: full_name.to_string(),
            email: email.to_string(),
            balance: 0,
            total_earnings: 0,
            total_withdrawals: 0,
            account_number: reserved.account_number,
            bank_name: reserved.bank_name,
            account_reference: reserved.account_reference,
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let (wallet, created) = self
            .db
            .run(move |state| {
                // lost the race to another creation: keep the first record
                if let Some(existing) = state.wallets.get(&wallet.user_id) {
                    return Ok((existing.clone(), false));
                }
                state.wallets.insert(wallet.user_id.clone(), wallet.clone());
                Ok((wallet, true))
            })
            .await?;

        if created {
            WALLETS_CREATED.inc();
            info!(user_id = %wallet.user_id, account = %wallet.account_number, "wallet created");
        }
        Ok(wallet)
    }

    pub async fn get_wallet(&self, user_id: &str) -> PayResult<Wallet> {
        self.db
            .read(|s| s.wallets.get(user_id).cloned())
            .await
            .ok_or(PayError::NotFound("wallet"))
    }

    pub async fn get_balance(&self, user_id: &str) -> PayResult<i64> {
        Ok(self.get_wallet(user_id).await?.balance)
    }

    pub async fn adjust_balance(
        &self,
        user_id: &str,
        delta: i64,
        tx_type: TxType,
        description: &str,
    ) -> PayResult<()> {
        let reference = new_id("TX");
        let uid = user_id.to_string();
        let desc = description.to_string();
        self.db
            .run(move |state| apply_adjustment(state, &uid, None, delta, tx_type, &reference, &desc))
            .await?;
        TX_APPENDED.with_label_values(&[tx_type.label()]).inc();
        Ok(())
    }

    /// Wallet-to-wallet transfer: balance check, debit+credit, and the two
    /// mirrored ledger rows, all in one transaction.
    pub async fn transfer_funds(
        &self,
        from_user: &str,
        to_user: &str,
        amount: i64,
        description: &str,
    ) -> PayResult<()> {
        if amount <= 0 {
            return Err(PayError::Validation("transfer amount must be positive"));
        }
        let reference = new_id("TRF");
        let (from, to, desc) =
            (from_user.to_string(), to_user.to_string(), description.to_string());
        self.db
            .run(move |state| {
                state.wallet(&to)?; // receiver must exist before we debit
                apply_adjustment(
                    state, &from, Some(&to), -amount, TxType::PaymentSent, &reference, &desc,
                )?;
                apply_adjustment(
                    state, &to, Some(&from), amount, TxType::PaymentReceived, &reference, &desc,
                )?;
                Ok(())
            })
            .await?;

        TX_APPENDED.with_label_values(&["payment_sent"]).inc();
        TX_APPENDED.with_label_values(&["payment_received"]).inc();
        self.outbox
            .emit_all(vec![
                Activity::new(
                    from_user,
                    "payment_sent",
                    format!("Sent payment of {} for {}", fmt_naira(amount), description),
                )
                .with_amount(-amount),
                Activity::new(
                    to_user,
                    "payment_received",
                    format!("Received payment of {} for {}", fmt_naira(amount), description),
                )
                .with_amount(amount),
            ])
            .await;
        Ok(())
    }

    /// Starts a wallet-funding flow. The local payment intent is persisted
    /// before the gateway is contacted, so a crash after initiation can be
    /// reconciled later by reference. No wallet credit happens here.
    pub async fn initialize_deposit(
        &self,
        user_id: &str,
        amount: i64,
    ) -> PayResult<CheckoutSession> {
        if amount < self.policy.min_deposit {
            return Err(PayError::Validation("deposit below minimum"));
        }
        let wallet = self.get_wallet(user_id).await?;
        let reference = format!("PAY-{}-{}", Utc::now().timestamp_millis(), user_id);

        let intent = PaymentIntent {
            id: new_id("PI"),
            user_id: user_id.to_string(),
            reference: reference.clone(),
            amount,
            status: IntentStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.db
            .run(move |state| {
                state.payment_intents.insert(intent.reference.clone(), intent);
                Ok(())
            })
            .await?;
        INTENTS_OPEN.inc();

        match self
            .gateway
            .initialize_payment(amount, user_id, &wallet.email, &reference)
            .await
        {
            Ok(session) => Ok(session),
            Err(e) => {
                let r = reference.clone();
                let _ = self
                    .db
                    .run(move |state| {
                        if let Some(intent) = state.payment_intents.get_mut(&r) {
                            intent.status = IntentStatus::Failed;
                        }
                        Ok(())
                    })
                    .await;
                INTENTS_OPEN.dec();
                Err(e)
            }
        }
    }

    /// Settles a deposit after the out-of-band confirmation. A pending
    /// gateway status is surfaced, never credited; a duplicate call finds
    /// the intent already Completed and changes nothing.
    pub async fn confirm_deposit(&self, reference: &str) -> PayResult<DepositOutcome> {
        let intent = self
            .db
            .read(|s| s.payment_intents.get(reference).cloned())
            .await
            .ok_or(PayError::NotFound("payment intent"))?;
        if intent.status == IntentStatus::Completed {
            return Ok(DepositOutcome::AlreadyProcessed);
        }

        let verification = self.gateway.verify_payment(reference).await?;
        match verification.status {
            RemoteStatus::Pending => Ok(DepositOutcome::StillPending),
            RemoteStatus::Failed => {
                let r = reference.to_string();
                self.db
                    .run(move |state| {
                        if let Some(intent) = state.payment_intents.get_mut(&r) {
                            intent.status = IntentStatus::Failed;
                        }
                        Ok(())
                    })
                    .await?;
                INTENTS_OPEN.dec();
                Ok(DepositOutcome::Failed)
            }
            RemoteStatus::Paid => {
                // trust the gateway's amount when it reports one
                let amount = if verification.amount > 0 { verification.amount } else { intent.amount };
                let r = reference.to_string();
                let outcome = self
                    .db
                    .run(move |state| {
                        let intent = state
                            .payment_intents
                            .get_mut(&r)
                            .ok_or(PayError::NotFound("payment intent"))?;
                        if intent.status == IntentStatus::Completed {
                            return Ok(DepositOutcome::AlreadyProcessed);
                        }
                        intent.status = IntentStatus::Completed;
                        intent.completed_at = Some(Utc::now());
                        let user_id = intent.user_id.clone();
                        apply_adjustment(
                            state, &user_id, None, amount, TxType::Deposit, &r, "Wallet funding",
                        )?;
                        Ok(DepositOutcome::Credited(amount))
                    })
                    .await?;

                if let DepositOutcome::Credited(amount) = outcome {
                    INTENTS_OPEN.dec();
                    TX_APPENDED.with_label_values(&["deposit"]).inc();
                    self.outbox
                        .emit(
                            Activity::new(
                                &intent.user_id,
                                "deposit",
                                format!("Funded wallet with {}", fmt_naira(amount)),
                            )
                            .with_amount(amount),
                        )
                        .await;
                }
                Ok(outcome)
            }
        }
    }

    /// Bank withdrawal: disbursement is requested first, then the debit and
    /// ledger row land in one transaction. A gateway failure aborts with
    /// zero local writes.
    pub async fn withdraw(
        &self,
        user_id: &str,
        amount: i64,
        bank_details: &BankDetails,
    ) -> PayResult<String> {
        if amount <= 0 {
            return Err(PayError::Validation("withdrawal amount must be positive"));
        }
        if amount > self.policy.max_withdrawal {
            return Err(PayError::Validation("withdrawal above single-transfer cap"));
        }
        let wallet = self.get_wallet(user_id).await?;
        if wallet.balance < amount {
            return Err(PayError::InsufficientFunds);
        }

        let reference = format!("WD-{}-{}", Utc::now().timestamp_millis(), user_id);
        self.gateway.disburse(bank_details, amount, &reference).await?;

        let (uid, r) = (user_id.to_string(), reference.clone());
        self.db
            .run(move |state| {
                apply_adjustment(
                    state,
                    &uid,
                    None,
                    -amount,
                    TxType::Withdrawal,
                    &r,
                    "Withdrawal to bank account",
                )
            })
            .await?;

        TX_APPENDED.with_label_values(&["withdrawal"]).inc();
        self.outbox
            .emit(
                Activity::new(
                    user_id,
                    "withdrawal",
                    format!("Withdrew {} from wallet", fmt_naira(amount)),
                )
                .with_amount(-amount),
            )
            .await;
        Ok(reference)
    }

    /// Newest-first ledger rows for one user.
    pub async fn transaction_history(&self, user_id: &str) -> Vec<TxRecord> {
        let uid = user_id.to_string();
        let mut rows = self
            .db
            .read(move |s| {
                s.transactions
                    .iter()
                    .filter(|t| t.user_id == uid)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::harness;

    #[tokio::test]
    async fn create_wallet_is_idempotent() {
        let h = harness();
        let first = h.wallets.create_wallet("u1", "Ada Obi", "ada@example.com").await.unwrap();
        h.wallets.adjust_balance("u1", 5_000, TxType::Deposit, "seed").await.unwrap();

        let second = h.wallets.create_wallet("u1", "Ada Obi", "ada@example.com").await.unwrap();
        assert_eq!(second.account_number, first.account_number);
        assert_eq!(second.account_reference, first.account_reference);
        // balance of the live wallet is untouched by the repeat call
        assert_eq!(h.wallets.get_balance("u1").await.unwrap(), 5_000);
    }

    #[tokio::test]
    async fn create_wallet_survives_gateway_outage() {
        let h = harness();
        h.mock.set_fail_reserve(true);
        let w = h.wallets.create_wallet("u2", "Bola Ade", "bola@example.com").await.unwrap();
        assert_eq!(w.bank_name, "Virtual Bank");
        assert!(w.account_number.starts_with('2'));
        assert_eq!(w.balance, 0);
    }

    #[tokio::test]
    async fn deposit_not_credited_until_gateway_confirms() {
        let h = harness();
        h.wallets.create_wallet("u1", "Ada Obi", "ada@example.com").await.unwrap();

        let session = h.wallets.initialize_deposit("u1", 50_000).await.unwrap();
        assert_eq!(h.wallets.get_balance("u1").await.unwrap(), 0);

        // gateway still reports pending
        let out = h.wallets.confirm_deposit(&session.reference).await.unwrap();
        assert_eq!(out, DepositOutcome::StillPending);
        assert_eq!(h.wallets.get_balance("u1").await.unwrap(), 0);

        h.mock.settle(&session.reference);
        let out = h.wallets.confirm_deposit(&session.reference).await.unwrap();
        assert_eq!(out, DepositOutcome::Credited(50_000));
        assert_eq!(h.wallets.get_balance("u1").await.unwrap(), 50_000);

        // duplicate webhook: no double credit
        let out = h.wallets.confirm_deposit(&session.reference).await.unwrap();
        assert_eq!(out, DepositOutcome::AlreadyProcessed);
        assert_eq!(h.wallets.get_balance("u1").await.unwrap(), 50_000);
    }

    #[tokio::test]
    async fn withdrawal_requires_funds_and_gateway() {
        let h = harness();
        h.wallets.create_wallet("u1", "Ada Obi", "ada@example.com").await.unwrap();
        h.wallets.adjust_balance("u1", 20_000, TxType::Deposit, "seed").await.unwrap();
        let bank = BankDetails {
            account_number: "0011223344".into(),
            bank_code: "035".into(),
            account_name: "Ada Obi".into(),
            bank_name: "Wema Bank".into(),
            narration: None,
        };

        let err = h.wallets.withdraw("u1", 30_000, &bank).await.unwrap_err();
        assert!(matches!(err, PayError::InsufficientFunds));

        h.mock.set_fail_disburse(true);
        let err = h.wallets.withdraw("u1", 10_000, &bank).await.unwrap_err();
        assert!(matches!(err, PayError::Gateway(_)));
        // failed disbursement leaves the balance untouched
        assert_eq!(h.wallets.get_balance("u1").await.unwrap(), 20_000);

        h.mock.set_fail_disburse(false);
        h.wallets.withdraw("u1", 10_000, &bank).await.unwrap();
        assert_eq!(h.wallets.get_balance("u1").await.unwrap(), 10_000);
        assert_eq!(h.mock.disbursement_count(), 1);

        let w = h.wallets.get_wallet("u1").await.unwrap();
        assert_eq!(w.total_withdrawals, 10_000);
    }

    #[tokio::test]
    async fn transfer_is_all_or_nothing() {
        let h = harness();
        h.wallets.create_wallet("a", "A", "a@example.com").await.unwrap();
        h.wallets.create_wallet("b", "B", "b@example.com").await.unwrap();
        h.wallets.adjust_balance("a", 10_000, TxType::Deposit, "seed").await.unwrap();

        let err = h.wallets.transfer_funds("a", "b", 15_000, "too much").await.unwrap_err();
        assert!(matches!(err, PayError::InsufficientFunds));
        assert_eq!(h.wallets.get_balance("a").await.unwrap(), 10_000);
        assert_eq!(h.wallets.get_balance("b").await.unwrap(), 0);

        h.wallets.transfer_funds("a", "b", 4_000, "logo design").await.unwrap();
        assert_eq!(h.wallets.get_balance("a").await.unwrap(), 6_000);
        assert_eq!(h.wallets.get_balance("b").await.unwrap(), 4_000);

        // one row per side, mirrored signs
        let a_rows = h.wallets.transaction_history("a").await;
        let b_rows = h.wallets.transaction_history("b").await;
        assert_eq!(a_rows[0].tx_type, TxType::PaymentSent);
        assert_eq!(a_rows[0].amount, -4_000);
        assert_eq!(b_rows[0].tx_type, TxType::PaymentReceived);
        assert_eq!(b_rows[0].amount, 4_000);
        assert_eq!(a_rows[0].reference, b_rows[0].reference);
    }
}
