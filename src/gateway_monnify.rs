// ===============================
// src/gateway_monnify.rs
// ===============================
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha512;

use crate::config::MonnifyKeys;
use crate::error::{PayError, PayResult};
use crate::gateway::{
    BankDetails, CheckoutSession, DisbursementStatus, PaymentVerification, RemoteStatus,
    ReservedAccount,
};

/// Monnify REST gateway: token login, reserved accounts, hosted checkout,
/// transaction query, single disbursement. Amounts cross the wire in naira
/// (major units); everything local is kobo.
#[derive(Clone)]
pub struct MonnifyClient {
    http: reqwest::Client,
    base_url: String,
    keys: MonnifyKeys,
}

// Monnify wraps every response the same way.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    request_successful: bool,
    response_message: Option<String>,
    response_body: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginBody {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReservedBody {
    account_number: String,
    bank_name: String,
    account_reference: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitBody {
    checkout_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxQueryBody {
    payment_status: String,
    #[serde(default)]
    amount_paid: Option<f64>,
    #[serde(default)]
    amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisburseBody {
    #[serde(default)]
    status: Option<String>,
}

fn naira(kobo: i64) -> f64 {
    (kobo as f64) / 100.0
}

fn kobo(naira: f64) -> i64 {
    (naira * 100.0).round() as i64
}

fn gw_err(e: reqwest::Error) -> PayError {
    PayError::Gateway(format!("{e}"))
}

fn unwrap_body<T>(env: Envelope<T>, ctx: &str) -> PayResult<T> {
    if !env.request_successful {
        let msg = env.response_message.unwrap_or_else(|| "request failed".to_string());
        return Err(PayError::Gateway(format!("{ctx}: {msg}")));
    }
    env.response_body
        .ok_or_else(|| PayError::Gateway(format!("{ctx}: empty response body")))
}

impl MonnifyClient {
    pub fn new(base_url: String, keys: MonnifyKeys) -> Self {
        Self { http: reqwest::Client::new(), base_url, keys }
    }

    async fn login(&self) -> PayResult<String> {
        let url = format!("{}/api/v1/auth/login", self.base_url);
        let rsp = self
            .http
            .post(url)
            .basic_auth(&self.keys.api_key, Some(&self.keys.secret_key))
            .send()
            .await
            .map_err(gw_err)?;
        let env = rsp.json::<Envelope<LoginBody>>().await.map_err(gw_err)?;
        Ok(unwrap_body(env, "login")?.access_token)
    }

    pub async fn reserve_account(
        &self,
        user_id: &str,
        full_name: &str,
        email: &str,
    ) -> PayResult<ReservedAccount> {
        let token = self.login().await?;
        let url = format!("{}/api/v2/bank-transfer/reserved-accounts", self.base_url);
        let body = json!({
            "accountReference": user_id,
            "accountName": full_name,
            "customerEmail": email,
            "customerName": full_name,
            "currencyCode": "NGN",
            "contractCode": self.keys.contract_code,
            "getAllAvailableBanks": false,
            "preferredBanks": ["035"], // Wema bank code
        });
        let rsp = self
            .http
            .post(url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(gw_err)?;
        let env = rsp.json::<Envelope<ReservedBody>>().await.map_err(gw_err)?;
        let b = unwrap_body(env, "reserve_account")?;
        tracing::info!(account = %b.account_number, bank = %b.bank_name, "reserved account");
        Ok(ReservedAccount {
            account_number: b.account_number,
            bank_name: b.bank_name,
            account_reference: b.account_reference,
        })
    }

    pub async fn initialize_payment(
        &self,
        amount: i64,
        _user_id: &str,
        email: &str,
        reference: &str,
    ) -> PayResult<CheckoutSession> {
        let token = self.login().await?;
        let url = format!("{}/api/v1/merchant/transactions/init-transaction", self.base_url);
        let body = json!({
            "amount": naira(amount),
            "customerName": email,
            "customerEmail": email,
            "paymentReference": reference,
            "paymentDescription": "Wallet funding",
            "currencyCode": "NGN",
            "contractCode": self.keys.contract_code,
            "paymentMethods": ["CARD", "ACCOUNT_TRANSFER"],
        });
        let rsp = self
            .http
            .post(url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(gw_err)?;
        let env = rsp.json::<Envelope<InitBody>>().await.map_err(gw_err)?;
        let b = unwrap_body(env, "initialize_payment")?;
        Ok(CheckoutSession {
            checkout_url: b.checkout_url,
            reference: reference.to_string(),
        })
    }

    pub async fn verify_payment(&self, reference: &str) -> PayResult<PaymentVerification> {
        let token = self.login().await?;
        let url = format!(
            "{}/api/v1/merchant/transactions/query?paymentReference={}",
            self.base_url,
            urlencoding::encode(reference)
        );
        let rsp = self
            .http
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(gw_err)?;
        let env = rsp.json::<Envelope<TxQueryBody>>().await.map_err(gw_err)?;
        let b = unwrap_body(env, "verify_payment")?;
        let status = match b.payment_status.as_str() {
            "PAID" | "COMPLETED" => RemoteStatus::Paid,
            "PENDING" | "PARTIALLY_PAID" => RemoteStatus::Pending,
            _ => RemoteStatus::Failed,
        };
        let amount = kobo(b.amount_paid.or(b.amount).unwrap_or(0.0));
        Ok(PaymentVerification { status, amount })
    }

    pub async fn disburse(
        &self,
        details: &BankDetails,
        amount: i64,
        reference: &str,
    ) -> PayResult<DisbursementStatus> {
        let token = self.login().await?;
        let url = format!("{}/api/v2/disbursements/single", self.base_url);
        let body = json!({
            "reference": reference,
            "destinationAccountNumber": details.account_number,
            "destinationBankCode": details.bank_code,
            "destinationAccountName": details.account_name,
            "amount": naira(amount),
            "currency": "NGN",
            "narration": details.narration.clone().unwrap_or_else(|| "Withdrawal from wallet".to_string()),
            "sourceAccountNumber": self.keys.source_account,
            "contractCode": self.keys.contract_code,
        });
        let rsp = self
            .http
            .post(url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(gw_err)?;
        let env = rsp.json::<Envelope<DisburseBody>>().await.map_err(gw_err)?;
        let b = unwrap_body(env, "disburse")?;
        match b.status.as_deref() {
            Some("SUCCESS") | Some("COMPLETED") => Ok(DisbursementStatus::Completed),
            _ => Ok(DisbursementStatus::Processing),
        }
    }
}

/// Monnify signs webhook payloads with HMAC-SHA512 of the raw body using
/// the client secret; the hex digest arrives in the `monnify-signature`
/// header. Callers must verify before trusting a payment confirmation.
pub fn verify_webhook_signature(secret: &str, raw_body: &[u8], signature_hex: &str) -> bool {
    let mut mac = match Hmac::<Sha512>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(raw_body);
    let digest = hex::encode(mac.finalize().into_bytes());
    digest.eq_ignore_ascii_case(signature_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_signature_round_trip() {
        let secret = "test-secret";
        let body = br#"{"eventType":"SUCCESSFUL_TRANSACTION","paymentReference":"PAY-1"}"#;

        let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_webhook_signature(secret, body, &sig));
        assert!(verify_webhook_signature(secret, body, &sig.to_uppercase()));
        assert!(!verify_webhook_signature(secret, b"tampered", &sig));
        assert!(!verify_webhook_signature("wrong-secret", body, &sig));
    }

    #[test]
    fn kobo_naira_conversion() {
        assert_eq!(naira(50_000), 500.0);
        assert_eq!(kobo(500.0), 50_000);
        assert_eq!(kobo(123.45), 12_345);
    }
}
