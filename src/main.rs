// ===============================
// src/main.rs
// ===============================
/*
 # active configuration
curl -s localhost:9898/metrics | egrep '^config_gateway_mode'

# payment activity
curl -s localhost:9898/metrics | grep '^escrow'
curl -s localhost:9898/metrics | grep '^releases_total'

*/
/*
=============================================================================
Project : gigpay_rust — escrow & milestone payment engine for a freelance
          marketplace, in Rust
Version : 0.5.0
License : MIT (see LICENSE)

Summary : Wallets backed by a payment gateway (mock/Monnify), an append-only
          transaction ledger, escrow holds funded on proposal acceptance,
          per-milestone and on-completion payment release, two-sided job
          reviews, a background reconciler, Prometheus metrics, and a JSONL
          activity recorder.
=============================================================================
*/
mod activity;
mod config;
mod domain;
mod error;
mod escrow;
mod gateway; // mock gateway (settle-on-demand)
mod gateway_monnify; // real Monnify (REST + HMAC webhook verification)
mod job;
mod metrics;
mod milestone;
mod orchestrator;
mod proposal;
mod reconcile;
mod recorder;
mod store;
mod wallet;

#[cfg(test)]
mod testkit;

use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{error, info};

use crate::activity::Outbox;
use crate::domain::Activity;
use crate::gateway::Gateway;
use crate::gateway_monnify::MonnifyClient;
use crate::orchestrator::Orchestrator;
use crate::store::Datastore;

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Load config & policy ----
    let (args, policy) = config::load();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    // ---- Human-friendly startup info + export config to metrics ----
    info!(
        gateway_mode = %args.gateway_mode.label(),
        monnify_base = %args.monnify_base_url,
        reconcile_interval_secs = args.reconcile_interval_secs,
        sequential_milestones = policy.enforce_sequential_milestones,
        "startup config"
    );
    crate::metrics::CONFIG_GATEWAY_MODE
        .with_label_values(&[args.gateway_mode.label()])
        .set(1);

    // ---- Activity outbox + recorder (optional) ----
    let (outbox, activity_rx) = Outbox::channel(4096);
    let rec_tx = args.record_file.clone().map(|path| {
        let (tx, rx) = mpsc::channel::<Activity>(8192);
        tokio::spawn(recorder::run(rx, path));
        tx
    });
    tokio::spawn(activity::run(activity_rx, rec_tx));

    // ---- Datastore & gateway ----
    let db = Datastore::new();
    let mock = gateway::MockGateway::new();
    let gateway = match args.gateway_mode {
        config::GatewayMode::Mock => Gateway::Mock(mock.clone()),
        config::GatewayMode::MonnifySandbox | config::GatewayMode::MonnifyLive => {
            let keys = match config::MonnifyKeys::from_env() {
                Ok(keys) => keys,
                Err(e) => {
                    error!(error = %e, "missing Monnify credentials");
                    std::process::exit(1);
                }
            };
            Gateway::Monnify(MonnifyClient::new(args.monnify_base_url.clone(), keys))
        }
    };

    // ---- Stores & orchestrator ----
    let wallets =
        wallet::WalletStore::new(db.clone(), gateway.clone(), outbox.clone(), policy.clone());
    let escrows = escrow::EscrowStore::new(db.clone());
    let milestones = milestone::MilestoneStore::new(db.clone());
    let jobs = job::JobStore::new(db.clone());
    let proposals = proposal::ProposalStore::new(db.clone());
    let orchestrator = Orchestrator::new(db.clone(), outbox.clone(), policy.clone());

    // ---- Reconciler ----
    let reconciler =
        reconcile::Reconciler::new(db.clone(), wallets.clone(), args.intent_grace_secs);
    tokio::spawn(reconcile::run(reconciler, args.reconcile_interval_secs));

    // ---- Demo scenario (mock gateway only) ----
    if args.run_demo && args.gateway_mode == config::GatewayMode::Mock {
        tokio::spawn(demo_scenario(
            mock,
            wallets.clone(),
            jobs.clone(),
            proposals.clone(),
            milestones.clone(),
            escrows.clone(),
            orchestrator.clone(),
        ));
    }

    // ---- Heartbeat ----
    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        let (wallets_n, jobs_n, held) = db
            .read(|state| {
                let held: i64 = state
                    .escrows
                    .values()
                    .filter(|e| e.status == domain::EscrowStatus::Held)
                    .map(|e| e.amount)
                    .sum();
                (state.wallets.len(), state.jobs.len(), held)
            })
            .await;
        info!(wallets = wallets_n, jobs = jobs_n, escrow_held_kobo = held, "heartbeat");
    }
}

/// End-to-end walkthrough against the mock gateway: fund a client wallet,
/// post a job, accept a two-milestone proposal, release both payments,
/// exchange reviews. Failures are logged, never fatal.
async fn demo_scenario(
    mock: gateway::MockGateway,
    wallets: wallet::WalletStore,
    jobs: job::JobStore,
    proposals: proposal::ProposalStore,
    milestones: milestone::MilestoneStore,
    escrows: escrow::EscrowStore,
    orchestrator: Orchestrator,
) {
    if let Err(e) = run_demo(
        &mock,
        &wallets,
        &jobs,
        &proposals,
        &milestones,
        &escrows,
        &orchestrator,
    )
    .await
    {
        error!(error = %e, "demo scenario failed");
    }
}

async fn run_demo(
    mock: &gateway::MockGateway,
    wallets: &wallet::WalletStore,
    jobs: &job::JobStore,
    proposals: &proposal::ProposalStore,
    milestones: &milestone::MilestoneStore,
    escrows: &escrow::EscrowStore,
    orchestrator: &Orchestrator,
) -> error::PayResult<()> {
    info!("demo: funding client wallet via mock checkout");
    wallets.create_wallet("demo-client", "Demo Client", "client@example.com").await?;
    wallets.create_wallet("demo-lancer", "Demo Freelancer", "lancer@example.com").await?;

    let session = wallets.initialize_deposit("demo-client", 5_000_000).await?;
    mock.settle(&session.reference);
    wallets.confirm_deposit(&session.reference).await?;
    let balance = wallets.get_balance("demo-client").await?;
    info!(balance, "demo: client funded");

    let job = jobs
        .create_job("demo-client", "Marketplace redesign", "Two-phase redesign", 5_000_000)
        .await?;
    let input = proposal::NewProposal {
        job_id: job.id.clone(),
        freelancer_id: "demo-lancer".into(),
        proposed_amount: 5_000_000,
        completion_weeks: 4,
        payment_preference: domain::PaymentPreference::PerMilestone,
        milestones: vec![
            domain::MilestoneDraft {
                name: "Design".into(),
                description: "Wireframes and visual design".into(),
                amount: 2_000_000,
                duration_weeks: 1,
            },
            domain::MilestoneDraft {
                name: "Build".into(),
                description: "Implementation and launch".into(),
                amount: 3_000_000,
                duration_weeks: 3,
            },
        ],
        cover_letter: "Redesign in two milestones.".into(),
    };
    let prop = proposals.create_proposal(input).await?;
    orchestrator.accept_proposal(&prop.id, &job.id, "demo-client").await?;
    let escrow = escrows.get_escrow(&job.id).await?.amount;
    info!(escrow, "demo: proposal accepted, escrow funded");

    let ms = milestones.get_milestones(&job.id).await;
    for m in &ms {
        milestones.update_progress(&job.id, &m.id, 100, "demo-lancer").await?;
        milestones.mark_complete(&job.id, &m.id, "demo-client").await?;
        orchestrator
            .release_milestone_payment(&job.id, &m.id, m.amount, "demo-client", "demo-lancer")
            .await?;
    }
    let lancer_balance = wallets.get_balance("demo-lancer").await?;
    info!(lancer_balance, "demo: all milestones paid, job completed");

    orchestrator.submit_job_review(&job.id, "demo-client", 5, "Excellent work").await?;
    orchestrator.submit_job_review(&job.id, "demo-lancer", 5, "Great client").await?;

    let bank = gateway::BankDetails {
        account_number: "0011223344".into(),
        bank_code: "035".into(),
        account_name: "Demo Freelancer".into(),
        bank_name: "Wema Bank".into(),
        narration: None,
    };
    let wd_ref = wallets.withdraw("demo-lancer", 1_000_000, &bank).await?;
    let ledger_rows = wallets.transaction_history("demo-lancer").await.len();
    info!(
        reference = %wd_ref,
        ledger_rows,
        "demo: freelancer withdrawal requested, scenario complete"
    );
    Ok(())
}
