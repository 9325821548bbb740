// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Ledger / escrow metrics --------
pub static WALLETS_CREATED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("wallets_created_total", "wallets created").unwrap());

pub static TX_APPENDED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ledger_transactions_total", "ledger records appended per type"),
        &["type"],
    )
    .unwrap()
});

pub static ESCROWS_CREATED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("escrows_created_total", "escrow holds created").unwrap());

pub static ESCROW_HELD: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("escrow_held_kobo", "total amount currently held in escrow").unwrap());

pub static RELEASES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("payments_released_total", "escrow releases (labels: kind)"),
        &["kind"],
    )
    .unwrap()
});

pub static RELEASED_KOBO: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("payments_released_kobo_total", "released amount per kind"),
        &["kind"],
    )
    .unwrap()
});

// -------- Workflow metrics --------
pub static PROPOSALS_ACCEPTED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("proposals_accepted_total", "proposals accepted").unwrap());

pub static PROPOSALS_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("proposals_rejected_total", "proposals rejected (incl. siblings)").unwrap()
});

pub static JOBS_COMPLETED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("jobs_completed_total", "jobs completed").unwrap());

pub static JOBS_CANCELLED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("jobs_cancelled_total", "jobs cancelled").unwrap());

pub static REVIEWS_SUBMITTED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("reviews_submitted_total", "job reviews recorded").unwrap());

// -------- Gateway / outbox health --------
pub static GATEWAY_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_calls_total", "payment gateway calls (labels: op, outcome)"),
        &["op", "outcome"],
    )
    .unwrap()
});

pub static ACTIVITIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("activities_total", "activity outbox emissions (labels: result)"),
        &["result"],
    )
    .unwrap()
});

pub static INTENTS_OPEN: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("payment_intents_open", "payment intents still pending").unwrap());

pub static RECONCILE_RUNS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("reconcile_runs_total", "reconciler passes").unwrap());

pub static RECONCILE_REPAIRS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reconcile_repairs_total", "reconciler repairs (labels: kind)"),
        &["kind"],
    )
    .unwrap()
});

// ---- Config visibility ----
pub static CONFIG_GATEWAY_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_gateway_mode", "gateway mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(WALLETS_CREATED.clone())),
        REGISTRY.register(Box::new(TX_APPENDED.clone())),
        REGISTRY.register(Box::new(ESCROWS_CREATED.clone())),
        REGISTRY.register(Box::new(ESCROW_HELD.clone())),
        REGISTRY.register(Box::new(RELEASES.clone())),
        REGISTRY.register(Box::new(RELEASED_KOBO.clone())),
        REGISTRY.register(Box::new(PROPOSALS_ACCEPTED.clone())),
        REGISTRY.register(Box::new(PROPOSALS_REJECTED.clone())),
        REGISTRY.register(Box::new(JOBS_COMPLETED.clone())),
        REGISTRY.register(Box::new(JOBS_CANCELLED.clone())),
        REGISTRY.register(Box::new(REVIEWS_SUBMITTED.clone())),
        REGISTRY.register(Box::new(GATEWAY_CALLS.clone())),
        REGISTRY.register(Box::new(ACTIVITIES.clone())),
        REGISTRY.register(Box::new(INTENTS_OPEN.clone())),
        REGISTRY.register(Box::new(RECONCILE_RUNS.clone())),
        REGISTRY.register(Box::new(RECONCILE_REPAIRS.clone())),
        REGISTRY.register(Box::new(CONFIG_GATEWAY_MODE.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .unwrap_or_else(|e| panic!("metrics bind {} failed: {}", addr, e));
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}
