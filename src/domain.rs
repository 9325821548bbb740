// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// All money fields are minor currency units (kobo), i64 and signed only
// where the record itself is signed (TxRecord.amount).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType { Deposit, Withdrawal, PaymentSent, PaymentReceived }

impl TxType {
    pub fn label(&self) -> &'static str {
        match self {
            TxType::Deposit => "deposit",
            TxType::Withdrawal => "withdrawal",
            TxType::PaymentSent => "payment_sent",
            TxType::PaymentReceived => "payment_received",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus { Active, Suspended }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    pub balance: i64,
    pub total_earnings: i64,
    pub total_withdrawals: i64,
    pub account_number: String,
    pub bank_name: String,
    pub account_reference: String,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only ledger entry. One row per side of a transfer; sender and
/// receiver each get their own record with their own sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub id: String,
    pub user_id: String,
    pub counterparty_id: Option<String>,
    pub tx_type: TxType,
    pub amount: i64,
    pub reference: String,
    pub status: TxStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus { Completed, Pending, Failed }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus { Held, Released }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escrow {
    pub job_id: String,
    pub amount: i64,
    pub status: EscrowStatus,
    pub client_id: String,
    pub freelancer_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus { Pending, InProgress, Completed, Disputed }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { Unpaid, Paid }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub job_id: String,
    pub name: String,
    pub description: String,
    pub amount: i64,
    pub duration_weeks: u32,
    pub status: MilestoneStatus,
    pub progress: u8,
    pub payment_status: PaymentStatus,
    pub attachments: Vec<FileRef>,
    pub start_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    pub file_name: String,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPreference { PerMilestone, Completion }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus { Pending, Accepted, Rejected, Withdrawn }

/// Milestone breakdown as submitted with a proposal. Used to seed the
/// milestone store once the proposal is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneDraft {
    pub name: String,
    pub description: String,
    pub amount: i64,
    pub duration_weeks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub job_id: String,
    pub freelancer_id: String,
    pub client_id: String,
    pub proposed_amount: i64,
    pub completion_weeks: u32,
    pub payment_preference: PaymentPreference,
    pub milestones: Vec<MilestoneDraft>,
    pub cover_letter: String,
    pub status: ProposalStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus { Open, InProgress, Completed, Cancelled }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerRole { Client, Freelancer }

impl ReviewerRole {
    pub fn label(&self) -> &'static str {
        match self {
            ReviewerRole::Client => "client",
            ReviewerRole::Freelancer => "freelancer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub client_id: String,
    pub title: String,
    pub description: String,
    pub budget: i64,
    pub accepted_amount: Option<i64>,
    pub status: JobStatus,
    pub awarded_to: Option<String>,
    pub payment_preference: Option<PaymentPreference>,
    pub milestone_drafts: Vec<MilestoneDraft>,
    pub pending_reviews: Vec<ReviewerRole>,
    pub reviews: Vec<(ReviewerRole, Review)>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn review_for(&self, role: ReviewerRole) -> Option<&Review> {
        self.reviews.iter().find(|(r, _)| *r == role).map(|(_, rv)| rv)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus { Pending, Completed, Failed }

/// Persisted before any external gateway call so a crash after initiation
/// can be reconciled later by re-querying the gateway with the reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub user_id: String,
    pub reference: String,
    pub amount: i64,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Running-average rating per user; updated transactionally with each
/// submitted review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub rating: f64,
    pub total_reviews: u32,
}

// -------- Activity feed (best-effort outbox payload) --------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub user_id: String,
    pub kind: String,
    pub text: String,
    pub job_id: Option<String>,
    pub amount: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl Activity {
    pub fn new(user_id: &str, kind: &str, text: String) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            text,
            job_id: None,
            amount: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_job(mut self, job_id: &str) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }

    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// Formats kobo as a naira string for activity texts.
pub fn fmt_naira(amount: i64) -> String {
    format!("₦{}.{:02}", amount / 100, (amount % 100).abs())
}
