//! Environment-based Configuration
//!
//! Every setting is read from an `ESCROW_`-prefixed environment variable.
//! Secrets (signature key, wallet seed) MUST be provided explicitly on
//! mainnet; testnet falls back to fixed development values.
//!
//! # Environment Variables
//!
//! ## Network
//! - `ESCROW_NETWORK` - "mainnet" or "testnet" (default: "testnet")
//! - `ESCROW_CHAIN_API_URL` - chain index API endpoint
//! - `ESCROW_CHAIN_API_KEY` - optional API key sent with every request
//!
//! ## Storage
//! - `ESCROW_DATABASE_PATH` - SQLite file (default: "data/escrow.db")
//! - `ESCROW_KV_DB_INDEX` - DB index used in keyspace channel names (default: 0)
//!
//! ## Secrets
//! - `ESCROW_SIGNATURE_SECRET` - HMAC key for deal signatures
//! - `ESCROW_WALLET_SEED` - seed for escrow address derivation
//!
//! ## Observer tuning
//! - `ESCROW_SCAN_WORKERS` - deposit scan pool size (default: 10)
//! - `ESCROW_DEPOSIT_QUEUE` - deposit candidate queue capacity (default: 256)
//! - `ESCROW_MASTER_POLL_MS` - masterchain poll interval (default: 300)
//! - `ESCROW_CHAIN_TIMEOUT_MS` - per-call chain timeout (default: 5000)
//!
//! ## Escrow
//! - `ESCROW_WATCH_TTL_SECS` - deposit window per escrow address (default: 86400)
//! - `ESCROW_GAS_NANO` - fixed gas reserve in nanotons (default: 50000000)
//! - `ESCROW_COMMISSION_PERCENT` - commission on price (default: 5)
//!
//! ## Actions
//! - `ESCROW_DRY_RUN_ACTIONS` - "true" runs release, refund and channel post
//!   against logging stand-ins (default: false, rejected on mainnet). Without
//!   it the action worker is not started.
//!
//! ## Optional
//! - `ESCROW_LOG_LEVEL` - debug, info, warn, error (default: info)

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::deal::EscrowFees;

const DEV_SIGNATURE_SECRET: &str = "ad-escrow-dev-signature-secret";
const DEV_WALLET_SEED: &str = "ad-escrow-dev-wallet-seed";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Chain network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            _ => Err(ConfigError::InvalidValue(
                "ESCROW_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl Network {
    /// Default chain index API for this network
    pub fn default_chain_api(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://toncenter.com/api/v2",
            Network::Testnet => "https://testnet.toncenter.com/api/v2",
        }
    }
}

/// Timing of the three consumer loops every stream consumer runs
#[derive(Debug, Clone)]
pub struct StreamTimings {
    /// Main read loop tick; also the blocking read window
    pub poll_interval: Duration,
    /// Entries fetched per read
    pub batch_size: usize,
    /// Pending-reclaim loop tick
    pub reclaim_interval: Duration,
    /// Minimum idle time before an unacked entry can be reclaimed
    pub reclaim_min_idle: Duration,
    /// Trim loop tick
    pub trim_interval: Duration,
    /// Entries older than this are trimmed regardless of ack state
    pub retention: Duration,
}

impl Default for StreamTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            batch_size: 10,
            reclaim_interval: Duration::from_secs(30),
            reclaim_min_idle: Duration::from_secs(60),
            trim_interval: Duration::from_secs(24 * 60 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Chain observer settings
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub scan_workers: usize,
    pub deposit_queue_capacity: usize,
    pub master_poll_interval: Duration,
    pub chain_timeout: Duration,
    /// Attempts per block fetch before giving up on a shard for this round
    pub fetch_attempts: u32,
    pub fetch_retry_delay: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            scan_workers: 10,
            deposit_queue_capacity: 256,
            master_poll_interval: Duration::from_millis(300),
            chain_timeout: Duration::from_secs(5),
            fetch_attempts: 3,
            fetch_retry_delay: Duration::from_millis(200),
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub network: Network,
    pub chain_api_url: String,
    pub chain_api_key: Option<String>,
    pub database_path: PathBuf,
    pub kv_db_index: u32,
    pub signature_secret: String,
    pub wallet_seed: String,
    pub observer: ObserverConfig,
    pub streams: StreamTimings,
    /// How long an escrow address stays watched without a deposit
    pub watch_ttl: Duration,
    pub fees: EscrowFees,
    /// TTL of a deal action lock row
    pub lock_ttl: Duration,
    pub escrow_creation_interval: Duration,
    pub action_interval: Duration,
    /// Run guarded actions against dry-run transfers and posts
    pub dry_run_actions: bool,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let network = Network::Testnet;
        Self {
            network,
            chain_api_url: network.default_chain_api().to_string(),
            chain_api_key: None,
            database_path: PathBuf::from("data/escrow.db"),
            kv_db_index: 0,
            signature_secret: DEV_SIGNATURE_SECRET.to_string(),
            wallet_seed: DEV_WALLET_SEED.to_string(),
            observer: ObserverConfig::default(),
            streams: StreamTimings::default(),
            watch_ttl: Duration::from_secs(24 * 60 * 60),
            fees: EscrowFees::default(),
            lock_ttl: Duration::from_secs(5 * 60),
            escrow_creation_interval: Duration::from_secs(5),
            action_interval: Duration::from_secs(10),
            dry_run_actions: false,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let network: Network = env::var("ESCROW_NETWORK")
            .unwrap_or_else(|_| "testnet".to_string())
            .parse()?;

        let chain_api_url = env::var("ESCROW_CHAIN_API_URL")
            .unwrap_or_else(|_| network.default_chain_api().to_string());
        let chain_api_key = env::var("ESCROW_CHAIN_API_KEY").ok().filter(|k| !k.is_empty());

        let database_path = env::var("ESCROW_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let signature_secret =
            get_secret("ESCROW_SIGNATURE_SECRET", DEV_SIGNATURE_SECRET, network)?;
        let wallet_seed = get_secret("ESCROW_WALLET_SEED", DEV_WALLET_SEED, network)?;

        let observer = ObserverConfig {
            scan_workers: parse_or("ESCROW_SCAN_WORKERS", defaults.observer.scan_workers)?,
            deposit_queue_capacity: parse_or(
                "ESCROW_DEPOSIT_QUEUE",
                defaults.observer.deposit_queue_capacity,
            )?,
            master_poll_interval: Duration::from_millis(parse_or("ESCROW_MASTER_POLL_MS", 300)?),
            chain_timeout: Duration::from_millis(parse_or("ESCROW_CHAIN_TIMEOUT_MS", 5000)?),
            ..defaults.observer
        };

        if observer.scan_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "ESCROW_SCAN_WORKERS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if observer.deposit_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "ESCROW_DEPOSIT_QUEUE".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let dry_run_actions =
            check_dry_run_actions(network, parse_or("ESCROW_DRY_RUN_ACTIONS", false)?)?;

        let fees = EscrowFees {
            gas_nano: parse_or("ESCROW_GAS_NANO", defaults.fees.gas_nano)?,
            commission_percent: parse_or(
                "ESCROW_COMMISSION_PERCENT",
                defaults.fees.commission_percent,
            )?,
        };

        Ok(Self {
            network,
            chain_api_url,
            chain_api_key,
            database_path,
            kv_db_index: parse_or("ESCROW_KV_DB_INDEX", defaults.kv_db_index)?,
            signature_secret,
            wallet_seed,
            observer,
            streams: defaults.streams,
            watch_ttl: Duration::from_secs(parse_or("ESCROW_WATCH_TTL_SECS", 86_400)?),
            fees,
            lock_ttl: defaults.lock_ttl,
            escrow_creation_interval: defaults.escrow_creation_interval,
            action_interval: defaults.action_interval,
            dry_run_actions,
            log_level: env::var("ESCROW_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Log configuration summary (hiding secrets)
    pub fn log_summary(&self) {
        tracing::info!(
            network = ?self.network,
            chain_api = %self.chain_api_url,
            database = %self.database_path.display(),
            scan_workers = self.observer.scan_workers,
            deposit_queue = self.observer.deposit_queue_capacity,
            watch_ttl_secs = self.watch_ttl.as_secs(),
            gas_nano = self.fees.gas_nano,
            commission_percent = self.fees.commission_percent,
            dry_run_actions = self.dry_run_actions,
            "Configuration loaded"
        );
    }
}

/// Secrets are mandatory on mainnet, defaulted elsewhere
fn get_secret(var_name: &str, dev_default: &str, network: Network) -> Result<String, ConfigError> {
    match env::var(var_name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ if network == Network::Mainnet => Err(ConfigError::MissingEnvVar(var_name.to_string())),
        _ => {
            tracing::warn!(var = var_name, "Using development default secret");
            Ok(dev_default.to_string())
        }
    }
}

/// Dry-run payouts never move funds, so they are refused on mainnet
fn check_dry_run_actions(network: Network, requested: bool) -> Result<bool, ConfigError> {
    if requested && network == Network::Mainnet {
        return Err(ConfigError::InvalidValue(
            "ESCROW_DRY_RUN_ACTIONS".to_string(),
            "dry-run actions are not allowed on mainnet".to_string(),
        ));
    }
    Ok(requested)
}

fn parse_or<T: FromStr>(var_name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var_name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(var_name.to_string(), format!("cannot parse '{}'", raw))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert!(matches!("mainnet".parse::<Network>(), Ok(Network::Mainnet)));
        assert!(matches!("TEST".parse::<Network>(), Ok(Network::Testnet)));
        assert!("devnet".parse::<Network>().is_err());
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.observer.scan_workers, 10);
        assert_eq!(config.observer.deposit_queue_capacity, 256);
        assert_eq!(config.observer.fetch_attempts, 3);
        assert_eq!(config.lock_ttl, Duration::from_secs(300));
        assert_eq!(config.streams.poll_interval, Duration::from_millis(100));
        assert!(!config.dry_run_actions);
    }

    #[test]
    fn test_dry_run_actions_refused_on_mainnet() {
        assert!(matches!(
            check_dry_run_actions(Network::Mainnet, true),
            Err(ConfigError::InvalidValue(var, _)) if var == "ESCROW_DRY_RUN_ACTIONS"
        ));
        assert!(!check_dry_run_actions(Network::Mainnet, false).unwrap());
        assert!(check_dry_run_actions(Network::Testnet, true).unwrap());
    }

    #[test]
    fn test_mainnet_requires_secrets() {
        let result = get_secret("ESCROW_TEST_UNSET_SECRET_VAR", "dev", Network::Mainnet);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(_))));

        let result = get_secret("ESCROW_TEST_UNSET_SECRET_VAR", "dev", Network::Testnet);
        assert_eq!(result.unwrap(), "dev");
    }
}
