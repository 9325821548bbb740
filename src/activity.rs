// ===============================
// src/activity.rs (best-effort outbox)
// ===============================
//
// Activity/notification emission is fire-and-forget and sits outside the
// financial transaction boundary: a dropped or duplicated activity must
// never affect ledger state, and a full channel must never block or
// unwind a committed payment.
//
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::Activity;
use crate::metrics::ACTIVITIES;

#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Activity>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Activity>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn emit(&self, activity: Activity) {
        match self.tx.try_send(activity) {
            Ok(()) => ACTIVITIES.with_label_values(&["sent"]).inc(),
            Err(e) => {
                warn!(?e, "activity dropped");
                ACTIVITIES.with_label_values(&["dropped"]).inc();
            }
        }
    }

    /// Both parties of a transfer get their own activity.
    pub async fn emit_all(&self, activities: Vec<Activity>) {
        join_all(activities.into_iter().map(|a| self.emit(a))).await;
    }
}

/// Dispatcher task: logs every activity and forwards it to the JSONL
/// recorder when one is configured.
pub async fn run(mut rx: mpsc::Receiver<Activity>, rec_tx: Option<mpsc::Sender<Activity>>) {
    while let Some(act) = rx.recv().await {
        info!(user = %act.user_id, kind = %act.kind, text = %act.text, "activity");
        if let Some(tx) = &rec_tx {
            let _ = tx.try_send(act);
        }
    }
}
