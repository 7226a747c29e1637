pub mod batching;
pub mod client;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keyfile;
pub mod progress;
pub mod publication;
pub mod submission;
pub mod tally;
pub mod transaction;
pub mod types;

pub use batching::{BatchPlan, KeyLocation};
pub use client::{BallotPage, ChainRpc, ChainTransaction, JsonRpcClient, Signer};
pub use codec::KeyArrays;
pub use config::{ElectionRef, ProtocolConfig, ProtocolVariant, VerifierConfig};
pub use crypto::{FixtureCrypto, RingCrypto, RingSignature, RsaRingCrypto};
pub use error::{Result, VoteError};
pub use keyfile::VoterSecret;
pub use progress::{Progress, ProgressReporter};
pub use publication::{PublicationReceipt, PublicationStage, PublicationWorkflow};
pub use submission::{LoadedElection, SubmissionStage, SubmissionWorkflow};
pub use transaction::{PreparedTransaction, Transaction, TransactionBuilder};

/// SDK version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::{ChainRpc, JsonRpcClient, Signer};
    pub use crate::config::{ElectionRef, ProtocolConfig, ProtocolVariant};
    pub use crate::crypto::{RingCrypto, RsaRingCrypto};
    pub use crate::error::{Result, VoteError};
    pub use crate::keyfile::{parse_public_keys, parse_secret_key, VoterSecret};
    pub use crate::publication::PublicationWorkflow;
    pub use crate::submission::SubmissionWorkflow;
    pub use crate::types::*;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
