//! Voter side: load a published election, find the voter's key, sign and
//! broadcast one ballot.

use crate::batching::{BatchPlan, KeyLocation};
use crate::client::{ChainRpc, ChainTransaction, Signer};
use crate::codec::{self, BatchInclusion, KeyArrays};
use crate::config::{ElectionRef, ProtocolConfig, ProtocolVariant};
use crate::crypto::RingCrypto;
use crate::error::{Result, VoteError};
use crate::keyfile::VoterSecret;
use crate::progress::ProgressReporter;
use crate::transaction::{PreparedTransaction, TransactionBuilder, WitnessArgs};
use crate::types::*;
use futures::future::try_join_all;
use log::{debug, info};
use std::fmt;
use std::sync::Arc;

/// Published key set as loaded from chain (and, for merkle elections, the
/// voter-supplied key file).
#[derive(Debug, Clone)]
pub enum LoadedKeys {
    IndexCell {
        entries: Vec<PubkeyIndexEntry>,
        batches: Vec<Vec<RsaPubKey>>,
    },
    MerkleRoot {
        record: MerkleRootRecord,
        keys: Vec<RsaPubKey>,
    },
}

#[derive(Debug, Clone)]
pub struct LoadedElection {
    pub election: ElectionRef,
    pub candidates: Vec<CandidateEntry>,
    pub keys: LoadedKeys,
}

impl LoadedElection {
    pub fn key_count(&self) -> usize {
        match &self.keys {
            LoadedKeys::IndexCell { batches, .. } => batches.iter().map(Vec::len).sum(),
            LoadedKeys::MerkleRoot { keys, .. } => keys.len(),
        }
    }

    pub fn batch_plan(&self) -> Result<BatchPlan> {
        BatchPlan::new(self.key_count(), self.election.batch_size)
    }

    /// Keys of one batch, in publication order.
    pub fn batch(&self, batch_index: usize) -> Option<&[RsaPubKey]> {
        match &self.keys {
            LoadedKeys::IndexCell { batches, .. } => batches.get(batch_index).map(Vec::as_slice),
            LoadedKeys::MerkleRoot { keys, .. } => {
                let range = self.batch_plan().ok()?.batch_range(batch_index)?;
                Some(&keys[range])
            }
        }
    }

    /// Linear scan for an exact `(n, e)` match across batches.
    pub fn locate(&self, key: &RsaPubKey) -> Result<KeyLocation> {
        let index = match &self.keys {
            LoadedKeys::IndexCell { batches, .. } => batches.iter().flatten().position(|k| k == key),
            LoadedKeys::MerkleRoot { keys, .. } => keys.iter().position(|k| k == key),
        };
        index
            .and_then(|i| self.batch_plan().ok()?.locate(i))
            .ok_or_else(|| {
                VoteError::CryptographicMismatch("key not found in published set".into())
            })
    }

    pub fn has_candidate(&self, id: &[u8; CANDIDATE_ID_BYTES]) -> bool {
        self.candidates.iter().any(|c| &c.id == id)
    }

    /// Cell the ballot references as its key source.
    fn key_dep(&self, batch_index: usize) -> Result<OutPoint> {
        match &self.keys {
            LoadedKeys::IndexCell { entries, .. } => entries
                .get(batch_index)
                .map(PubkeyIndexEntry::out_point)
                .ok_or_else(|| VoteError::Validation(format!("no batch {}", batch_index))),
            LoadedKeys::MerkleRoot { .. } => Ok(self.election.key_source_cell),
        }
    }
}

async fn fetch(rpc: &dyn ChainRpc, out_point: &OutPoint) -> Result<ChainTransaction> {
    rpc.get_transaction(&out_point.tx_hash)
        .await?
        .ok_or_else(|| VoteError::Validation(format!("invalid cell reference {}", out_point)))
}

async fn fetch_batch(rpc: &dyn ChainRpc, entry: &PubkeyIndexEntry) -> Result<Vec<RsaPubKey>> {
    let out_point = entry.out_point();
    let tx = fetch(rpc, &out_point).await?;
    codec::decode_pubkey_batch(tx.output_data(out_point.index)?)
}

/// Fetch and decode everything a voter needs.
///
/// Index-cell elections fetch their batches in groups of
/// `fetch_concurrency`; merkle elections need `key_file` and check that it
/// reproduces the published root.
pub async fn load_election(
    rpc: &dyn ChainRpc,
    crypto: Arc<dyn RingCrypto>,
    election: &ElectionRef,
    key_file: Option<Vec<RsaPubKey>>,
    fetch_concurrency: usize,
    progress: &ProgressReporter,
) -> Result<LoadedElection> {
    let batch_size = election.batch_size;
    // rejects a batch size outside 1..=u16::MAX
    BatchPlan::new(0, batch_size)?;

    let candidate_tx = fetch(rpc, &election.candidate_cell).await?;
    let candidates =
        codec::decode_candidate_list(candidate_tx.output_data(election.candidate_cell.index)?)?;
    let source_tx = fetch(rpc, &election.key_source_cell).await?;
    let source = source_tx.output_data(election.key_source_cell.index)?;

    let keys = match election.variant {
        ProtocolVariant::IndexCell => {
            let entries = codec::decode_pubkey_index(source)?;
            if entries.is_empty() {
                return Err(VoteError::Validation("key index lists no batches".into()));
            }
            let mut batches = Vec::with_capacity(entries.len());
            for group in entries.chunks(fetch_concurrency.max(1)) {
                let fetched = try_join_all(group.iter().map(|e| fetch_batch(rpc, e))).await?;
                batches.extend(fetched);
                progress.report(batches.len(), entries.len(), "key batches");
            }
            let last = batches.len().saturating_sub(1);
            for (i, batch) in batches.iter().enumerate() {
                let ok = if i == last {
                    !batch.is_empty() && batch.len() <= batch_size
                } else {
                    batch.len() == batch_size
                };
                if !ok {
                    return Err(VoteError::Validation(format!(
                        "batch {} holds {} keys, inconsistent with batch size {}",
                        i,
                        batch.len(),
                        batch_size
                    )));
                }
            }
            LoadedKeys::IndexCell { entries, batches }
        }
        ProtocolVariant::MerkleRoot => {
            let record = codec::decode_merkle_root(source)?;
            let keys = key_file.ok_or_else(|| {
                VoteError::Validation("merkle election requires the published key file".into())
            })?;
            let plan = BatchPlan::new(record.leaf_count as usize, batch_size)?;
            if plan.batch_count() != record.batch_count as usize {
                return Err(VoteError::Validation(format!(
                    "{} leaves in {} batches do not match batch size {}",
                    record.leaf_count, record.batch_count, batch_size
                )));
            }
            if keys.len() != record.leaf_count as usize {
                return Err(VoteError::CryptographicMismatch(format!(
                    "key file holds {} keys, election published {}",
                    keys.len(),
                    record.leaf_count
                )));
            }
            let arrays = KeyArrays::from_keys(&keys)?;
            let root = tokio::task::spawn_blocking(move || {
                crypto.create_merkle_root(&arrays, batch_size)
            })
            .await??;
            if root != record.root {
                return Err(VoteError::CryptographicMismatch(
                    "key file does not reproduce the published merkle root".into(),
                ));
            }
            LoadedKeys::MerkleRoot { record, keys }
        }
    };

    let loaded = LoadedElection {
        election: election.clone(),
        candidates,
        keys,
    };
    info!(
        "Election loaded: {} candidates, {} keys",
        loaded.candidates.len(),
        loaded.key_count()
    );
    Ok(loaded)
}

#[derive(Debug, Clone)]
pub enum SubmissionStage {
    Init,
    CandidateLoaded(LoadedElection),
    Voted {
        election: LoadedElection,
        ballot_tx: H256,
    },
}

impl fmt::Display for SubmissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubmissionStage::Init => "Init",
            SubmissionStage::CandidateLoaded(_) => "CandidateLoaded",
            SubmissionStage::Voted { .. } => "Voted",
        })
    }
}

pub struct SubmissionWorkflow {
    rpc: Arc<dyn ChainRpc>,
    signer: Arc<dyn Signer>,
    crypto: Arc<dyn RingCrypto>,
    config: ProtocolConfig,
    progress: ProgressReporter,
    stage: SubmissionStage,
}

impl SubmissionWorkflow {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        signer: Arc<dyn Signer>,
        crypto: Arc<dyn RingCrypto>,
        config: ProtocolConfig,
    ) -> Result<Self> {
        config.ensure_valid()?;
        Ok(Self {
            rpc,
            signer,
            crypto,
            config,
            progress: ProgressReporter::disabled(),
            stage: SubmissionStage::Init,
        })
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn stage(&self) -> &SubmissionStage {
        &self.stage
    }

    pub fn election(&self) -> Option<&LoadedElection> {
        match &self.stage {
            SubmissionStage::CandidateLoaded(election) => Some(election),
            SubmissionStage::Voted { election, .. } => Some(election),
            SubmissionStage::Init => None,
        }
    }

    /// `Init → CandidateLoaded`.
    pub async fn load_candidates_and_keys(
        &mut self,
        election: &ElectionRef,
        key_file: Option<Vec<RsaPubKey>>,
    ) -> Result<()> {
        if !matches!(self.stage, SubmissionStage::Init) {
            return Err(VoteError::workflow("load_candidates_and_keys", &self.stage));
        }
        let loaded = load_election(
            self.rpc.as_ref(),
            Arc::clone(&self.crypto),
            election,
            key_file,
            self.config.fetch_concurrency,
            &self.progress,
        )
        .await?;
        self.stage = SubmissionStage::CandidateLoaded(loaded);
        Ok(())
    }

    /// `CandidateLoaded → Voted`, only once the ballot is broadcast.
    pub async fn vote(
        &mut self,
        candidate_id: [u8; CANDIDATE_ID_BYTES],
        secret: &VoterSecret,
    ) -> Result<H256> {
        let SubmissionStage::CandidateLoaded(election) = &self.stage else {
            return Err(VoteError::workflow("vote", &self.stage));
        };
        if !election.has_candidate(&candidate_id) {
            return Err(VoteError::Validation(format!(
                "unknown candidate {}",
                hex::encode(candidate_id)
            )));
        }

        let location = election.locate(&secret.public)?;
        let variant = election.election.variant;
        let batch_size = election.election.batch_size;
        let ring_keys = election.batch(location.batch_index).ok_or_else(|| {
            VoteError::Validation(format!("no batch {}", location.batch_index))
        })?;
        let ring = KeyArrays::from_keys(ring_keys)?;
        let all_keys = match &election.keys {
            LoadedKeys::MerkleRoot { keys, .. } => Some(KeyArrays::from_keys(keys)?),
            LoadedKeys::IndexCell { .. } => None,
        };
        debug!(
            "Signing with key at batch {} offset {}",
            location.batch_index, location.offset
        );

        let crypto = Arc::clone(&self.crypto);
        let signer_secret = secret.clone();
        let ring_for_sig = ring.clone();
        let (signature, proof) = tokio::task::spawn_blocking(move || -> Result<_> {
            let signature = crypto.create_ring_signature(
                &ring_for_sig,
                &signer_secret,
                location.offset,
                &candidate_id,
            )?;
            let proof = match all_keys {
                Some(keys) => Some(crypto.create_merkle_proof(
                    &keys,
                    batch_size,
                    location.batch_index,
                )?),
                None => None,
            };
            Ok((signature, proof))
        })
        .await??;

        let inclusion = proof.as_deref().map(|proof| BatchInclusion {
            batch_index: location.batch_index as u32,
            proof,
        });
        let output_data = codec::encode_ballot_output(variant, &candidate_id, &signature)?;
        let payload = codec::encode_ballot_witness(variant, &signature, &ring, inclusion)?;

        let voter_lock = self
            .signer
            .address_objs()
            .await?
            .into_iter()
            .next()
            .map(|a| a.lock)
            .ok_or_else(|| VoteError::Validation("signer exposes no address".into()))?;
        let verifier = &self.config.verifier;
        let draft = TransactionBuilder::new()
            .cell_dep(CellDep::code(election.election.candidate_cell))
            .cell_dep(CellDep::code(election.key_dep(location.batch_index)?))
            .cell_dep(verifier.cell_dep())
            .output(voter_lock, Some(verifier.type_script(variant)), output_data)
            .witness(
                WitnessArgs {
                    output_type: Some(payload),
                    ..Default::default()
                }
                .to_molecule(),
            )
            .build()?;

        let mut ballot = PreparedTransaction::new("ballot", draft);
        let ballot_tx = ballot
            .commit(self.signer.as_ref(), self.config.fee_rate)
            .await?;

        info!("Ballot for candidate {} sent as {}", hex::encode(candidate_id), ballot_tx);
        self.stage = match std::mem::replace(&mut self.stage, SubmissionStage::Init) {
            SubmissionStage::CandidateLoaded(election) => SubmissionStage::Voted {
                election,
                ballot_tx,
            },
            other => other,
        };
        Ok(ballot_tx)
    }
}
