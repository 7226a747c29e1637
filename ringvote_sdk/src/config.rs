use crate::error::{Result, VoteError};
use crate::types::{CellDep, HashType, OutPoint, Script, H256};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable overriding the configured RPC endpoint.
pub const RPC_URL_ENV: &str = "RINGVOTE_RPC_URL";

/// How the published key set is referenced by ballots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// Key batches are published individually and listed by a PubkeyIndexCell.
    IndexCell,
    /// Only a merkle root over all key batches is published.
    MerkleRoot,
}

impl ProtocolVariant {
    /// Tag written as the verifier type-script argument.
    pub fn tag(self) -> u8 {
        match self {
            ProtocolVariant::IndexCell => 0x01,
            ProtocolVariant::MerkleRoot => 0x02,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(ProtocolVariant::IndexCell),
            0x02 => Some(ProtocolVariant::MerkleRoot),
            _ => None,
        }
    }
}

impl Default for ProtocolVariant {
    fn default() -> Self {
        ProtocolVariant::MerkleRoot
    }
}

/// On-chain location and identity of the ring-signature verifier script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierConfig {
    pub code_hash: H256,
    #[serde(default = "default_hash_type")]
    pub hash_type: HashType,
    /// Cell holding the verifier binary.
    pub code_cell: OutPoint,
}

impl VerifierConfig {
    /// Type script attached to ballot cells of the given variant.
    pub fn type_script(&self, variant: ProtocolVariant) -> Script {
        Script::new(self.code_hash, self.hash_type, vec![variant.tag()])
    }

    pub fn cell_dep(&self) -> CellDep {
        CellDep::code(self.code_cell)
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            code_hash: H256([
                0x2d, 0x9a, 0x20, 0x6d, 0xea, 0xc2, 0x47, 0x46, 0xec, 0x53, 0x1f, 0x15, 0x05,
                0xc0, 0xda, 0xaf, 0x84, 0x6c, 0xf9, 0x2a, 0x97, 0x63, 0x80, 0xdf, 0x0b, 0x35,
                0x0f, 0x59, 0xfa, 0x3a, 0x65, 0x61,
            ]),
            hash_type: default_hash_type(),
            code_cell: OutPoint::new(
                H256([
                    0x46, 0xe5, 0xf3, 0xaa, 0xb4, 0xe2, 0xec, 0x52, 0x2f, 0xef, 0x6d, 0x94, 0x3c,
                    0xd7, 0x5b, 0x24, 0x2e, 0x22, 0x4e, 0x33, 0x75, 0x9c, 0x94, 0x00, 0xa9, 0x11,
                    0x86, 0xfc, 0xc7, 0x6b, 0x97, 0x57,
                ]),
                0,
            ),
        }
    }
}

/// Protocol parameters shared by publication and submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub variant: ProtocolVariant,

    /// Maximum keys per batch (B).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Shannons per 1000 serialized bytes.
    #[serde(default = "default_fee_rate")]
    pub fee_rate: u64,

    /// Batches fetched concurrently while loading an index-cell election.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Refuse to start publishing when the loaded balance is below the estimate.
    #[serde(default = "default_enforce_balance")]
    pub enforce_balance: bool,

    #[serde(default)]
    pub verifier: VerifierConfig,

    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
}

fn default_hash_type() -> HashType {
    HashType::Data1
}

fn default_batch_size() -> usize {
    600
}

fn default_fee_rate() -> u64 {
    1000
}

fn default_fetch_concurrency() -> usize {
    10
}

fn default_enforce_balance() -> bool {
    true
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8114".to_string()
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            variant: ProtocolVariant::default(),
            batch_size: default_batch_size(),
            fee_rate: default_fee_rate(),
            fetch_concurrency: default_fetch_concurrency(),
            enforce_balance: default_enforce_balance(),
            verifier: VerifierConfig::default(),
            rpc_url: default_rpc_url(),
        }
    }
}

impl ProtocolConfig {
    /// Read a JSON config file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: ProtocolConfig = serde_json::from_str(&raw)?;
        info!("Loaded protocol config from {}", path.as_ref().display());
        Ok(config.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(RPC_URL_ENV) {
            if !url.trim().is_empty() {
                info!("RPC endpoint overridden by {}: {}", RPC_URL_ENV, url);
                self.rpc_url = url;
            }
        }
        self
    }

    pub fn with_variant(mut self, variant: ProtocolVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_fee_rate(mut self, fee_rate: u64) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    pub fn with_enforce_balance(mut self, enforce: bool) -> Self {
        self.enforce_balance = enforce;
        self
    }

    pub fn with_verifier(mut self, verifier: VerifierConfig) -> Self {
        self.verifier = verifier;
        self
    }

    /// Check the parameters; errors make the config unusable.
    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();

        if self.batch_size == 0 || self.batch_size > u16::MAX as usize {
            validation.add_error(format!(
                "batch_size must be within 1..={}, got {}",
                u16::MAX,
                self.batch_size
            ));
        }
        if self.fetch_concurrency == 0 {
            validation.add_error("fetch_concurrency must be at least 1".into());
        }
        if self.fee_rate < 1000 {
            validation.add_warning(format!(
                "fee_rate {} is below the default relay minimum of 1000",
                self.fee_rate
            ));
        }
        if !self.enforce_balance {
            validation.add_warning(
                "enforce_balance disabled - publication may stop halfway on low balance".into(),
            );
        }
        if !self.rpc_url.starts_with("http://") && !self.rpc_url.starts_with("https://") {
            validation.add_error(format!("rpc_url `{}` is not an http(s) URL", self.rpc_url));
        }

        validation
    }

    /// Like [`validate`](Self::validate) but fails on the first error.
    pub fn ensure_valid(&self) -> Result<()> {
        let validation = self.validate();
        validation.log_summary();
        match validation.errors.first() {
            Some(first) => Err(VoteError::Validation(first.clone())),
            None => Ok(()),
        }
    }
}

/// Validation result for configuration checks
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    fn new() -> Self {
        Self::default()
    }

    fn add_warning(&mut self, msg: String) {
        self.warnings.push(msg);
    }

    fn add_error(&mut self, msg: String) {
        self.errors.push(msg);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn log_summary(&self) {
        for w in &self.warnings {
            warn!("config: {}", w);
        }
        for e in &self.errors {
            warn!("config error: {}", e);
        }
    }
}

/// Everything a voter needs to locate a published election.
///
/// The batch size is not recoverable from the chain data, so it travels
/// with the references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionRef {
    pub candidate_cell: OutPoint,
    /// PubkeyIndexCell or MerkleRootRecord cell, depending on the variant.
    pub key_source_cell: OutPoint,
    pub variant: ProtocolVariant,
    pub batch_size: usize,
}

impl ElectionRef {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
