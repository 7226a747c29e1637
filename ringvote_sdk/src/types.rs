use crate::error::{Result, VoteError};
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Shannons per CKB.
pub const ONE_CKB: u64 = 100_000_000;

/// Width of a stored RSA modulus.
pub const MODULUS_BYTES: usize = 256;

/// Width of a stored RSA public exponent.
pub const EXPONENT_BYTES: usize = 4;

/// Candidate slot: 4-byte id followed by a 100-byte description field.
pub const CANDIDATE_ID_BYTES: usize = 4;
pub const DESCRIPTION_FIELD_BYTES: usize = 100;
pub const MAX_DESCRIPTION_BYTES: usize = DESCRIPTION_FIELD_BYTES - 1;
pub const CANDIDATE_SLOT_BYTES: usize = CANDIDATE_ID_BYTES + DESCRIPTION_FIELD_BYTES;

/// 32-byte hash (transaction hash, code hash, merkle root).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct H256(pub [u8; 32]);

impl H256 {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            VoteError::Parse(format!("expected 32 hash bytes, got {}", bytes.len()))
        })?;
        Ok(H256(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for H256 {
    type Err = VoteError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        let raw = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes = hex::decode(raw)
            .map_err(|e| VoteError::Validation(format!("invalid hash `{}`: {}", s, e)))?;
        H256::from_slice(&bytes)
            .map_err(|_| VoteError::Validation(format!("hash `{}` is not 32 bytes", s)))
    }
}

impl Serialize for H256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        H256::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Reference to one cell: the transaction that created it and the output index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: H256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(tx_hash: H256, index: u32) -> Self {
        Self { tx_hash, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.index)
    }
}

/// Accepts `0xHASH:INDEX` or a bare hash (index 0).
impl FromStr for OutPoint {
    type Err = VoteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().split_once(':') {
            Some((hash, index)) => {
                let index = index.parse::<u32>().map_err(|e| {
                    VoteError::Validation(format!("invalid output index in `{}`: {}", s, e))
                })?;
                Ok(OutPoint::new(hash.parse()?, index))
            }
            None => Ok(OutPoint::new(s.parse()?, 0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashType {
    Data,
    Type,
    Data1,
    Data2,
}

impl HashType {
    pub fn as_byte(self) -> u8 {
        match self {
            HashType::Data => 0,
            HashType::Type => 1,
            HashType::Data1 => 2,
            HashType::Data2 => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script {
    pub code_hash: H256,
    pub hash_type: HashType,
    #[serde(with = "hex_bytes")]
    pub args: Vec<u8>,
}

impl Script {
    pub fn new(code_hash: H256, hash_type: HashType, args: Vec<u8>) -> Self {
        Self {
            code_hash,
            hash_type,
            args,
        }
    }

    /// Bytes this script occupies in a cell (code hash, hash type, args).
    pub fn occupied_bytes(&self) -> usize {
        32 + 1 + self.args.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepType {
    Code,
    DepGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellDep {
    pub out_point: OutPoint,
    pub dep_type: DepType,
}

impl CellDep {
    pub fn code(out_point: OutPoint) -> Self {
        Self {
            out_point,
            dep_type: DepType::Code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellInput {
    pub previous_output: OutPoint,
    pub since: u64,
}

impl CellInput {
    pub fn new(previous_output: OutPoint) -> Self {
        Self {
            previous_output,
            since: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellOutput {
    /// Capacity in shannons.
    pub capacity: u64,
    pub lock: Script,
    pub type_: Option<Script>,
}

/// Wallet address together with the lock script it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub encoded: String,
    pub lock: Script,
}

/// Plain capacity cell owned by the signer, usable as a funding input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveCell {
    pub out_point: OutPoint,
    pub capacity: u64,
}

/// Addresses and aggregate balance of the account driving a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountData {
    pub addresses: Vec<Address>,
    /// Balance in shannons.
    pub balance: u64,
}

impl AccountData {
    /// Lock of the first address; published cells and change go there.
    pub fn primary_lock(&self) -> Result<&Script> {
        self.addresses
            .first()
            .map(|a| &a.lock)
            .ok_or_else(|| VoteError::Validation("signer exposes no address".into()))
    }
}

// ========== Published records ==========

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEntry {
    #[serde(with = "hex_array4")]
    pub id: [u8; CANDIDATE_ID_BYTES],
    pub description: String,
}

impl CandidateEntry {
    pub fn new(id: [u8; CANDIDATE_ID_BYTES], description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
        }
    }

    /// New entry with a random identifier.
    pub fn random(description: impl Into<String>) -> Self {
        Self::new(rand::random(), description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RsaPubKey {
    pub n: BigUint,
    pub e: BigUint,
}

impl RsaPubKey {
    pub fn new(n: BigUint, e: BigUint) -> Self {
        Self { n, e }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PubkeyIndexEntry {
    pub tx_hash: H256,
    pub index: u32,
}

impl PubkeyIndexEntry {
    pub fn out_point(&self) -> OutPoint {
        OutPoint::new(self.tx_hash, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MerkleRootRecord {
    pub root: [u8; 32],
    /// Number of published keys.
    pub leaf_count: u32,
    /// Number of key batches, i.e. merkle leaves.
    pub batch_count: u32,
}

/// Serde helper: `Vec<u8>` as `0x`-prefixed hex.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        hex::decode(raw.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

mod hex_array4 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 4], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 4], D::Error> {
        let raw = String::deserialize(d)?;
        let bytes = hex::decode(raw.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("candidate id must be 4 bytes"))
    }
}
