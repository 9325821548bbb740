// ===============================
// src/config.rs
// ===============================
use std::env;
use dotenvy::dotenv;

/// Which payment gateway backs wallet funding / withdrawal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayMode {
    Mock,
    MonnifySandbox,
    MonnifyLive,
}

impl GatewayMode {
    pub fn from_env(key: &str, default_mode: GatewayMode) -> GatewayMode {
        match env::var(key).unwrap_or_default().to_ascii_lowercase().as_str() {
            "mock"            => GatewayMode::Mock,
            "monnify_sandbox" => GatewayMode::MonnifySandbox,
            "monnify_live"    => GatewayMode::MonnifyLive,
            _ => default_mode,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            GatewayMode::Mock           => "https://sandbox.monnify.com", // unused in mock
            GatewayMode::MonnifySandbox => "https://sandbox.monnify.com",
            GatewayMode::MonnifyLive    => "https://api.monnify.com",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GatewayMode::Mock           => "mock",
            GatewayMode::MonnifySandbox => "monnify_sandbox",
            GatewayMode::MonnifyLive    => "monnify_live",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    // gateway
    pub gateway_mode: GatewayMode,
    pub monnify_base_url: String,

    // files/metrics
    pub record_file: Option<String>,
    pub metrics_port: u16,

    // reconciliation loop
    pub reconcile_interval_secs: u64,
    pub intent_grace_secs: i64,

    // drive a demo scenario through the orchestrator on startup (mock only)
    pub run_demo: bool,
}

/// Financial policy knobs. `enforce_sequential_milestones` is off by
/// default: the platform historically allowed paying milestone 3 before 1.
#[derive(Clone, Debug)]
pub struct Policy {
    pub enforce_sequential_milestones: bool,
    pub min_deposit: i64,
    pub max_withdrawal: i64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key).unwrap_or_default().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

pub fn load() -> (Args, Policy) {
    // Make sure .env is read (MONNIFY_* keys, RECORD_FILE, etc.)
    let _ = dotenv();

    let gateway_mode = GatewayMode::from_env("GATEWAY_MODE", GatewayMode::Mock);
    let monnify_base_url = env::var("MONNIFY_BASE_URL")
        .unwrap_or_else(|_| gateway_mode.default_base_url().to_string());

    let record_file = env::var("RECORD_FILE").ok();
    let metrics_port = env_parse("METRICS_PORT", 9898u16);

    let reconcile_interval_secs = env_parse("RECONCILE_INTERVAL_SECS", 30u64);
    let intent_grace_secs = env_parse("INTENT_GRACE_SECS", 60i64);

    let run_demo = env_flag("DEMO", gateway_mode == GatewayMode::Mock);

    let args = Args {
        gateway_mode,
        monnify_base_url,
        record_file,
        metrics_port,
        reconcile_interval_secs,
        intent_grace_secs,
        run_demo,
    };

    let policy = Policy {
        enforce_sequential_milestones: env_flag("ENFORCE_SEQUENTIAL_MILESTONES", false),
        // kobo: ₦1.00 minimum funding, ₦5,000,000.00 single-withdrawal cap
        min_deposit: env_parse("MIN_DEPOSIT", 100i64),
        max_withdrawal: env_parse("MAX_WITHDRAWAL", 500_000_000i64),
    };

    (args, policy)
}

/// Monnify credentials, read separately so the mock path never touches them.
#[derive(Clone, Debug)]
pub struct MonnifyKeys {
    pub api_key: String,
    pub secret_key: String,
    pub contract_code: String,
    pub source_account: String,
}

impl MonnifyKeys {
    pub fn from_env() -> Result<Self, String> {
        let get = |k: &str| env::var(k).map_err(|_| format!("{k} missing"));
        Ok(Self {
            api_key: get("MONNIFY_API_KEY")?,
            secret_key: get("MONNIFY_SECRET_KEY")?,
            contract_code: get("MONNIFY_CONTRACT_CODE")?,
            source_account: env::var("MONNIFY_SOURCE_ACCOUNT")
                .unwrap_or_else(|_| "0123456789".to_string()),
        })
    }
}
