use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::ChainAddress;

mod duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub global: GlobalConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub queries: QueryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Chains keyed by the name callers use with `get_chain`
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Log level for the orchestrator
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// How long to wait for an acknowledgment before the outcome is ambiguous
    #[serde(with = "duration::required")]
    pub ambiguous_timeout: Duration,
    /// Maximum operations waiting per account
    pub max_queue_size: usize,
    /// Retry policy for queries and never-submitted writes
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial retry delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum retry delay in milliseconds (backoff cap)
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
    /// Jitter factor to avoid thundering herd (0.0 to 1.0)
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Longest forwarding route accepted, counting every hop
    pub max_hops: usize,
    /// Timeout applied to hops that do not carry their own
    #[serde(with = "duration::required")]
    pub default_timeout: Duration,
    /// Retries the forwarding middleware may attempt per hop
    pub forward_retries: u8,
    /// Contract that executes swap hops
    pub swap_venue: Option<ChainAddress>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Serve repeated queries from cache for at most this long. Unset disables caching.
    #[serde(default, with = "duration::optional")]
    pub cache_staleness: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file holding the account identity table
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain identifier, e.g. `celestia` or `cosmoshub-4`
    pub chain_id: String,
    /// Bech32 prefix for accounts
    pub address_prefix: String,
    /// Native staking denom
    #[serde(default)]
    pub staking_denom: Option<String>,
    /// IBC connections keyed by counterparty chain id
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
    #[serde(default)]
    pub ica_enabled: bool,
    #[serde(default)]
    pub icq_enabled: bool,
    /// Packet forward middleware available on this chain
    #[serde(default)]
    pub pfm_enabled: bool,
    #[serde(default)]
    pub ibc_hooks_enabled: bool,
    /// Message type URLs the host allows; empty allows everything
    #[serde(default)]
    pub allow_messages: Vec<String>,
    /// Query type URLs the host allows; empty allows everything
    #[serde(default)]
    pub allow_queries: Vec<String>,
    /// Several messages may share one transaction
    #[serde(default)]
    pub batch_messages: bool,
    /// Set when the chain hosts liquid staking for other chains
    #[serde(default)]
    pub liquid_staking: Option<LiquidStakingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection identifier, e.g. `connection-0`
    pub id: String,
    /// Light client on this chain, e.g. `07-tendermint-0`
    pub client_id: String,
    pub counterparty_client_id: String,
    pub counterparty_connection_id: String,
    /// ICS-20 channel toward the counterparty
    pub transfer_channel: String,
    #[serde(default = "default_connection_state")]
    pub state: ConnectionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Init,
    TryOpen,
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidStakingConfig {
    /// Host-zone denoms accepted for liquid staking
    pub host_denoms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Brand name handed in by callers
    pub brand: String,
    /// Denom per chain id; a trace path such as `transfer/channel-0/uatom` is hashed
    pub denoms: HashMap<String, String>,
}

fn default_connection_state() -> ConnectionState {
    ConnectionState::Open
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file, with `ORCHESTRATOR__` environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()).format(::config::FileFormat::Toml))
            .add_source(::config::Environment::with_prefix("ORCHESTRATOR").separator("__"))
            .build()?;
        let config: OrchestratorConfig = settings.try_deserialize()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get chain configuration by name
    pub fn get_chain(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.get(name)
    }
}

impl ChainConfig {
    /// Transfer channel toward `counterparty_chain_id`, if an open connection exists
    pub fn transfer_channel(&self, counterparty_chain_id: &str) -> Option<&str> {
        self.connections
            .get(counterparty_chain_id)
            .filter(|c| c.state == ConnectionState::Open)
            .map(|c| c.transfer_channel.as_str())
    }

    pub fn allows_message(&self, type_url: &str) -> bool {
        self.allow_messages.is_empty() || self.allow_messages.iter().any(|m| m == type_url)
    }

    pub fn allows_query(&self, type_url: &str) -> bool {
        self.allow_queries.is_empty() || self.allow_queries.iter().any(|q| q == type_url)
    }
}

impl StoreConfig {
    /// Path with `~` expanded
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            ambiguous_timeout: Duration::from_secs(60),
            max_queue_size: 100,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,   // Start with half a second
            max_delay_ms: 10_000,    // Cap at 10 seconds
            backoff_multiplier: 2.0, // Double the delay each time
            jitter_factor: 0.1,      // 10% jitter
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_hops: 8,
            default_timeout: Duration::from_secs(600),
            forward_retries: 2,
            swap_venue: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let path = dirs::home_dir()
            .map(|home| home.join(".orchestrator").join("accounts.json").to_string_lossy().to_string())
            .unwrap_or_else(|| "~/.orchestrator/accounts.json".to_string());
        Self { path }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let mut chains = HashMap::new();

        chains.insert("celestia".to_string(), ChainConfig {
            chain_id: "celestia".to_string(),
            address_prefix: "celestia".to_string(),
            staking_denom: Some("utia".to_string()),
            connections: HashMap::from([(
                "stride-1".to_string(),
                ConnectionConfig {
                    id: "connection-2".to_string(),
                    client_id: "07-tendermint-2".to_string(),
                    counterparty_client_id: "07-tendermint-153".to_string(),
                    counterparty_connection_id: "connection-151".to_string(),
                    transfer_channel: "channel-4".to_string(),
                    state: ConnectionState::Open,
                },
            ), (
                "osmosis-1".to_string(),
                ConnectionConfig {
                    id: "connection-0".to_string(),
                    client_id: "07-tendermint-0".to_string(),
                    counterparty_client_id: "07-tendermint-3012".to_string(),
                    counterparty_connection_id: "connection-2519".to_string(),
                    transfer_channel: "channel-2".to_string(),
                    state: ConnectionState::Open,
                },
            )]),
            ica_enabled: true,
            icq_enabled: false,
            pfm_enabled: false,
            ibc_hooks_enabled: false,
            allow_messages: vec![],
            allow_queries: vec![],
            batch_messages: false,
            liquid_staking: None,
        });

        chains.insert("stride".to_string(), ChainConfig {
            chain_id: "stride-1".to_string(),
            address_prefix: "stride".to_string(),
            staking_denom: Some("ustrd".to_string()),
            connections: HashMap::from([(
                "celestia".to_string(),
                ConnectionConfig {
                    id: "connection-151".to_string(),
                    client_id: "07-tendermint-153".to_string(),
                    counterparty_client_id: "07-tendermint-2".to_string(),
                    counterparty_connection_id: "connection-2".to_string(),
                    transfer_channel: "channel-162".to_string(),
                    state: ConnectionState::Open,
                },
            )]),
            ica_enabled: true,
            icq_enabled: true,
            pfm_enabled: true,
            ibc_hooks_enabled: false,
            allow_messages: vec![],
            allow_queries: vec![],
            batch_messages: true,
            liquid_staking: Some(LiquidStakingConfig {
                host_denoms: vec!["utia".to_string(), "uatom".to_string()],
            }),
        });

        chains.insert("osmosis".to_string(), ChainConfig {
            chain_id: "osmosis-1".to_string(),
            address_prefix: "osmo".to_string(),
            staking_denom: Some("uosmo".to_string()),
            connections: HashMap::from([(
                "celestia".to_string(),
                ConnectionConfig {
                    id: "connection-2519".to_string(),
                    client_id: "07-tendermint-3012".to_string(),
                    counterparty_client_id: "07-tendermint-0".to_string(),
                    counterparty_connection_id: "connection-0".to_string(),
                    transfer_channel: "channel-6994".to_string(),
                    state: ConnectionState::Open,
                },
            )]),
            ica_enabled: true,
            icq_enabled: true,
            pfm_enabled: true,
            ibc_hooks_enabled: true,
            allow_messages: vec![],
            allow_queries: vec![],
            batch_messages: true,
            liquid_staking: None,
        });

        Self {
            global: GlobalConfig {
                log_level: "info".to_string(),
            },
            executor: ExecutorConfig::default(),
            transfer: TransferConfig::default(),
            queries: QueryConfig::default(),
            store: StoreConfig::default(),
            chains,
            assets: vec![AssetConfig {
                brand: "TIA".to_string(),
                denoms: HashMap::from([
                    ("celestia".to_string(), "utia".to_string()),
                    ("stride-1".to_string(), "transfer/channel-162/utia".to_string()),
                    ("osmosis-1".to_string(), "transfer/channel-6994/utia".to_string()),
                ]),
            }],
        }
    }
}
