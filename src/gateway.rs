// ===============================
// src/gateway.rs (mock gateway + gateway-facing types)
// ===============================
//
// The payment gateway is an external collaborator: fallible, asynchronous,
// idempotent by reference. The mock variant settles nothing on its own —
// a payment stays Pending until `MockGateway::settle` flips it, which is
// how tests (and the demo) model the out-of-band confirmation webhook.
//
use ahash::AHashMap as HashMap;
use rand::Rng;
use std::sync::{Arc, Mutex};

use crate::error::{PayError, PayResult};
use crate::gateway_monnify::MonnifyClient;
use crate::metrics::GATEWAY_CALLS;

#[derive(Debug, Clone)]
pub struct ReservedAccount {
    pub account_number: String,
    pub bank_name: String,
    pub account_reference: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus { Paid, Pending, Failed }

#[derive(Debug, Clone)]
pub struct PaymentVerification {
    pub status: RemoteStatus,
    pub amount: i64,
}

#[derive(Debug, Clone)]
pub struct BankDetails {
    pub account_number: String,
    pub bank_code: String,
    pub account_name: String,
    pub bank_name: String,
    pub narration: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisbursementStatus { Processing, Completed }

/// Gateway dispatch. One variant per venue mode, same shape as the
/// mock/real split in config::GatewayMode.
#[derive(Clone)]
pub enum Gateway {
    Mock(MockGateway),
    Monnify(MonnifyClient),
}

impl Gateway {
    pub async fn reserve_account(
        &self,
        user_id: &str,
        full_name: &str,
        email: &str,
    ) -> PayResult<ReservedAccount> {
        let out = match self {
            Gateway::Mock(m) => m.reserve_account(user_id),
            Gateway::Monnify(c) => c.reserve_account(user_id, full_name, email).await,
        };
        track("reserve_account", &out);
        out
    }

    pub async fn initialize_payment(
        &self,
        amount: i64,
        user_id: &str,
        email: &str,
        reference: &str,
    ) -> PayResult<CheckoutSession> {
        let out = match self {
            Gateway::Mock(m) => m.initialize_payment(amount, reference),
            Gateway::Monnify(c) => c.initialize_payment(amount, user_id, email, reference).await,
        };
        track("initialize_payment", &out);
        out
    }

    pub async fn verify_payment(&self, reference: &str) -> PayResult<PaymentVerification> {
        let out = match self {
            Gateway::Mock(m) => m.verify_payment(reference),
            Gateway::Monnify(c) => c.verify_payment(reference).await,
        };
        track("verify_payment", &out);
        out
    }

    pub async fn disburse(
        &self,
        details: &BankDetails,
        amount: i64,
        reference: &str,
    ) -> PayResult<DisbursementStatus> {
        let out = match self {
            Gateway::Mock(m) => m.disburse(details, amount, reference),
            Gateway::Monnify(c) => c.disburse(details, amount, reference).await,
        };
        track("disburse", &out);
        out
    }
}

fn track<T>(op: &str, out: &PayResult<T>) {
    let outcome = if out.is_ok() { "ok" } else { "err" };
    GATEWAY_CALLS.with_label_values(&[op, outcome]).inc();
}

// -------- Mock implementation --------

#[derive(Debug, Default)]
struct MockState {
    /// reference -> (amount, status)
    payments: HashMap<String, (i64, RemoteStatus)>,
    disbursements: Vec<(String, i64)>,
    fail_reserve: bool,
    fail_disburse: bool,
}

#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/demo hook: mark an initialized payment as paid, as the real
    /// gateway would after the customer completes checkout.
    pub fn settle(&self, reference: &str) {
        let mut s = self.state.lock().unwrap();
        if let Some(entry) = s.payments.get_mut(reference) {
            entry.1 = RemoteStatus::Paid;
        }
    }

    pub fn set_fail_reserve(&self, fail: bool) {
        self.state.lock().unwrap().fail_reserve = fail;
    }

    pub fn set_fail_disburse(&self, fail: bool) {
        self.state.lock().unwrap().fail_disburse = fail;
    }

    pub fn disbursement_count(&self) -> usize {
        self.state.lock().unwrap().disbursements.len()
    }

    fn reserve_account(&self, user_id: &str) -> PayResult<ReservedAccount> {
        let s = self.state.lock().unwrap();
        if s.fail_reserve {
            return Err(PayError::Gateway("reserve_account unavailable".into()));
        }
        Ok(ReservedAccount {
            account_number: format!("3{:09}", rand::thread_rng().gen_range(0..1_000_000_000u32)),
            bank_name: "Mock Bank".to_string(),
            account_reference: format!("MREF-{user_id}"),
        })
    }

    fn initialize_payment(&self, amount: i64, reference: &str) -> PayResult<CheckoutSession> {
        let mut s = self.state.lock().unwrap();
        s.payments
            .entry(reference.to_string())
            .or_insert((amount, RemoteStatus::Pending));
        Ok(CheckoutSession {
            checkout_url: format!("https://checkout.mock/{reference}"),
            reference: reference.to_string(),
        })
    }

    fn verify_payment(&self, reference: &str) -> PayResult<PaymentVerification> {
        let s = self.state.lock().unwrap();
        match s.payments.get(reference) {
            Some((amount, status)) => Ok(PaymentVerification { status: *status, amount: *amount }),
            None => Err(PayError::Gateway(format!("unknown reference {reference}"))),
        }
    }

    fn disburse(
        &self,
        _details: &BankDetails,
        amount: i64,
        reference: &str,
    ) -> PayResult<DisbursementStatus> {
        let mut s = self.state.lock().unwrap();
        if s.fail_disburse {
            return Err(PayError::Gateway("disbursement rejected".into()));
        }
        s.disbursements.push((reference.to_string(), amount));
        Ok(DisbursementStatus::Processing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_payment_stays_pending_until_settled() {
        let mock = MockGateway::new();
        let gw = Gateway::Mock(mock.clone());

        gw.initialize_payment(50_000, "u1", "u1@example.com", "PAY-1")
            .await
            .unwrap();
        let v = gw.verify_payment("PAY-1").await.unwrap();
        assert_eq!(v.status, RemoteStatus::Pending);

        mock.settle("PAY-1");
        let v = gw.verify_payment("PAY-1").await.unwrap();
        assert_eq!(v.status, RemoteStatus::Paid);
        assert_eq!(v.amount, 50_000);
    }

    #[tokio::test]
    async fn unknown_reference_is_a_gateway_error() {
        let gw = Gateway::Mock(MockGateway::new());
        let err = gw.verify_payment("PAY-MISSING").await.unwrap_err();
        assert!(matches!(err, PayError::Gateway(_)));
    }
}
