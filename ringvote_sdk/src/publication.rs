//! Administrator side: publish the candidate list and the voter key set.
//!
//! Records are committed strictly in order: candidate list, key batches or
//! merkle root, then (index-cell variant) the index of batch hashes. A failed
//! `send` leaves every committed record in place; calling `send` again
//! resumes at the first uncommitted record.

use crate::batching::BatchPlan;
use crate::client::Signer;
use crate::codec::{self, KeyArrays};
use crate::config::{ElectionRef, ProtocolConfig, ProtocolVariant};
use crate::crypto::RingCrypto;
use crate::error::{Result, VoteError};
use crate::keyfile::render_public_keys;
use crate::progress::ProgressReporter;
use crate::transaction::{occupied_capacity, prepare_cell, PreparedTransaction};
use crate::types::*;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where the published key set lives.
#[derive(Debug)]
pub enum KeySourcePlan {
    IndexCell {
        batch_txs: Vec<PreparedTransaction>,
        /// Built once every batch hash is known.
        index_tx: Option<PreparedTransaction>,
        index_estimate: u64,
    },
    MerkleRoot {
        record: MerkleRootRecord,
        root_tx: PreparedTransaction,
    },
}

/// Everything prepared for publication, including commit progress.
#[derive(Debug)]
pub struct PublicationPlan {
    candidates: Vec<CandidateEntry>,
    keys: Vec<RsaPubKey>,
    batches: BatchPlan,
    candidate_tx: PreparedTransaction,
    key_source: KeySourcePlan,
}

impl PublicationPlan {
    /// Candidate list as prepared.
    pub fn candidates(&self) -> &[CandidateEntry] {
        &self.candidates
    }

    /// How the key set is split into batches.
    pub fn batch_plan(&self) -> BatchPlan {
        self.batches
    }

    /// Candidate list record; read-only, the workflow commits it.
    pub fn candidate_tx(&self) -> &PreparedTransaction {
        &self.candidate_tx
    }

    /// Key batches and index, or merkle root record.
    pub fn key_source(&self) -> &KeySourcePlan {
        &self.key_source
    }

    /// Records published by a complete `send`: the candidate list, every
    /// key batch and the index (index cell), or the candidate list and the
    /// root (merkle). Progress totals of both phases use this count.
    pub fn record_count(&self) -> usize {
        match &self.key_source {
            KeySourcePlan::IndexCell { batch_txs, .. } => 2 + batch_txs.len(),
            KeySourcePlan::MerkleRoot { .. } => 2,
        }
    }

    fn prepared(&self) -> Vec<&PreparedTransaction> {
        let mut all = vec![&self.candidate_tx];
        match &self.key_source {
            KeySourcePlan::IndexCell {
                batch_txs,
                index_tx,
                ..
            } => {
                all.extend(batch_txs.iter());
                all.extend(index_tx.iter());
            }
            KeySourcePlan::MerkleRoot { root_tx, .. } => all.push(root_tx),
        }
        all
    }

    /// Records already broadcast.
    pub fn committed_count(&self) -> usize {
        self.prepared().iter().filter(|tx| tx.is_committed()).count()
    }

    /// Whether any record has been broadcast.
    pub fn any_committed(&self) -> bool {
        self.committed_count() > 0
    }

    /// Output capacity of every record, before fees.
    pub fn required_capacity(&self) -> u64 {
        let prepared: u64 = self.prepared().iter().map(|tx| tx.required_capacity()).sum();
        prepared + self.pending_index_estimate()
    }

    /// Output capacity of the records not yet committed.
    pub fn remaining_capacity(&self) -> u64 {
        let pending: u64 = self
            .prepared()
            .iter()
            .filter(|tx| !tx.is_committed())
            .map(|tx| tx.required_capacity())
            .sum();
        pending + self.pending_index_estimate()
    }

    fn pending_index_estimate(&self) -> u64 {
        match &self.key_source {
            KeySourcePlan::IndexCell {
                index_tx: None,
                index_estimate,
                ..
            } => *index_estimate,
            _ => 0,
        }
    }

    fn receipt(&self, variant: ProtocolVariant) -> Result<PublicationReceipt> {
        let unsent = || VoteError::Validation("publication has unsent records".into());
        let candidate_tx = self.candidate_tx.committed_hash().ok_or_else(unsent)?;
        let (key_batch_txs, index_tx, merkle_root_tx, key_source, key_material) =
            match &self.key_source {
                KeySourcePlan::IndexCell {
                    batch_txs,
                    index_tx,
                    ..
                } => {
                    let hashes = batch_txs
                        .iter()
                        .map(|tx| tx.committed_hash().ok_or_else(unsent))
                        .collect::<Result<Vec<_>>>()?;
                    let index = index_tx
                        .as_ref()
                        .and_then(PreparedTransaction::committed_hash)
                        .ok_or_else(unsent)?;
                    (hashes, Some(index), None, index, None)
                }
                KeySourcePlan::MerkleRoot { root_tx, .. } => {
                    let root = root_tx.committed_hash().ok_or_else(unsent)?;
                    (
                        Vec::new(),
                        None,
                        Some(root),
                        root,
                        Some(render_public_keys(&self.keys)?),
                    )
                }
            };

        Ok(PublicationReceipt {
            election: ElectionRef {
                candidate_cell: OutPoint::new(candidate_tx, 0),
                key_source_cell: OutPoint::new(key_source, 0),
                variant,
                batch_size: self.batches.batch_size(),
            },
            candidate_tx,
            key_batch_txs,
            index_tx,
            merkle_root_tx,
            key_material,
            published_at: Utc::now(),
        })
    }
}

/// Result of a completed publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationReceipt {
    /// What voters need to locate the election.
    pub election: ElectionRef,
    pub candidate_tx: H256,
    pub key_batch_txs: Vec<H256>,
    pub index_tx: Option<H256>,
    pub merkle_root_tx: Option<H256>,
    /// Full key set as JWK lines (merkle variant), for voters to download.
    pub key_material: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Advisory numbers reported by `prepare_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparationSummary {
    pub record_count: usize,
    pub batch_count: usize,
    pub required_capacity: u64,
    pub available: u64,
}

impl PreparationSummary {
    /// Whether the loaded balance covers the required capacity.
    pub fn is_sufficient(&self) -> bool {
        self.available >= self.required_capacity
    }
}

/// Administrator stages; each carries exactly what is valid in it.
#[derive(Debug)]
pub enum PublicationStage {
    Init,
    AccountLoaded {
        account: AccountData,
    },
    DataPrepared {
        account: AccountData,
        plan: PublicationPlan,
    },
    Sent {
        account: AccountData,
        receipt: PublicationReceipt,
    },
}

impl PublicationStage {
    /// Stage name used in logs and workflow errors.
    pub fn name(&self) -> &'static str {
        match self {
            PublicationStage::Init => "Init",
            PublicationStage::AccountLoaded { .. } => "AccountLoaded",
            PublicationStage::DataPrepared { .. } => "DataPrepared",
            PublicationStage::Sent { .. } => "Sent",
        }
    }
}

impl fmt::Display for PublicationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Drives one publication from account loading to the receipt.
pub struct PublicationWorkflow {
    signer: Arc<dyn Signer>,
    crypto: Arc<dyn RingCrypto>,
    config: ProtocolConfig,
    progress: ProgressReporter,
    stage: PublicationStage,
}

impl PublicationWorkflow {
    /// Create a workflow in `Init`; fails on an invalid config.
    pub fn new(
        signer: Arc<dyn Signer>,
        crypto: Arc<dyn RingCrypto>,
        config: ProtocolConfig,
    ) -> Result<Self> {
        config.ensure_valid()?;
        Ok(Self {
            signer,
            crypto,
            config,
            progress: ProgressReporter::disabled(),
            stage: PublicationStage::Init,
        })
    }

    /// Report per-record progress to `progress`.
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Current stage.
    pub fn stage(&self) -> &PublicationStage {
        &self.stage
    }

    /// Protocol parameters in use.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    async fn fetch_account(&self) -> Result<AccountData> {
        let addresses = self.signer.address_objs().await?;
        if addresses.is_empty() {
            return Err(VoteError::Validation("signer exposes no address".into()));
        }
        let balance = self.signer.balance().await?;
        Ok(AccountData { addresses, balance })
    }

    /// `Init | AccountLoaded → AccountLoaded`.
    pub async fn load_account(&mut self) -> Result<AccountData> {
        match self.stage {
            PublicationStage::Init | PublicationStage::AccountLoaded { .. } => {}
            ref other => return Err(VoteError::workflow("load_account", other)),
        }
        let account = self.fetch_account().await?;
        info!(
            "Account loaded: {} addresses, balance {} CKB",
            account.addresses.len(),
            account.balance / ONE_CKB
        );
        self.stage = PublicationStage::AccountLoaded {
            account: account.clone(),
        };
        Ok(account)
    }

    /// Re-read the balance without changing stage, e.g. after topping up
    /// the account between two `send` attempts.
    pub async fn refresh_balance(&mut self) -> Result<u64> {
        let balance = match &self.stage {
            PublicationStage::AccountLoaded { .. } | PublicationStage::DataPrepared { .. } => {
                self.signer.balance().await?
            }
            other => return Err(VoteError::workflow("refresh_balance", other)),
        };
        match &mut self.stage {
            PublicationStage::AccountLoaded { account }
            | PublicationStage::DataPrepared { account, .. } => account.balance = balance,
            _ => {}
        }
        Ok(balance)
    }

    /// `AccountLoaded → DataPrepared`. Encodes every record and prepares
    /// its transaction; nothing is broadcast.
    pub async fn prepare_data(
        &mut self,
        candidates: Vec<CandidateEntry>,
        keys: Vec<RsaPubKey>,
    ) -> Result<PreparationSummary> {
        let account = match &self.stage {
            PublicationStage::AccountLoaded { account } => account.clone(),
            other => return Err(VoteError::workflow("prepare_data", other)),
        };
        if candidates.is_empty() {
            return Err(VoteError::Validation("at least one candidate required".into()));
        }
        if keys.is_empty() {
            return Err(VoteError::Validation("at least one key required".into()));
        }

        let lock = account.primary_lock()?.clone();
        let batches = BatchPlan::new(keys.len(), self.config.batch_size)?;
        let batch_count = batches.batch_count();
        if batch_count > u16::MAX as usize {
            return Err(VoteError::Encoding(format!(
                "{} batches exceed the index capacity of {}",
                batch_count,
                u16::MAX
            )));
        }

        let total = match self.config.variant {
            ProtocolVariant::IndexCell => 2 + batch_count,
            ProtocolVariant::MerkleRoot => 2,
        };
        let mut done = 0;

        let candidate_tx = prepare_cell(
            "candidate list",
            codec::encode_candidate_list(&candidates)?,
            &lock,
        )?;
        done += 1;
        self.progress.report(done, total, candidate_tx.label());

        let key_source = match self.config.variant {
            ProtocolVariant::IndexCell => {
                let mut batch_txs = Vec::with_capacity(batch_count);
                for (i, batch) in batches.split(&keys)?.into_iter().enumerate() {
                    let label = format!("key batch {}/{}", i + 1, batch_count);
                    let tx = prepare_cell(label, codec::encode_pubkey_batch(batch)?, &lock)?;
                    done += 1;
                    self.progress.report(done, total, tx.label());
                    batch_txs.push(tx);
                }
                // the index is built from batch hashes during send; only its
                // capacity is reserved here
                done += 1;
                self.progress.report(done, total, "key index");
                KeySourcePlan::IndexCell {
                    batch_txs,
                    index_tx: None,
                    index_estimate: occupied_capacity(&lock, None, 2 + 36 * batch_count),
                }
            }
            ProtocolVariant::MerkleRoot => {
                let arrays = KeyArrays::from_keys(&keys)?;
                let crypto = Arc::clone(&self.crypto);
                let batch_size = batches.batch_size();
                let root = tokio::task::spawn_blocking(move || {
                    crypto.create_merkle_root(&arrays, batch_size)
                })
                .await??;
                let record = MerkleRootRecord {
                    root,
                    leaf_count: keys.len() as u32,
                    batch_count: batch_count as u32,
                };
                let root_tx = prepare_cell("merkle root", codec::encode_merkle_root(&record)?, &lock)?;
                done += 1;
                self.progress.report(done, total, root_tx.label());
                KeySourcePlan::MerkleRoot { record, root_tx }
            }
        };

        let plan = PublicationPlan {
            candidates,
            keys,
            batches,
            candidate_tx,
            key_source,
        };
        let summary = PreparationSummary {
            record_count: plan.record_count(),
            batch_count,
            required_capacity: plan.required_capacity(),
            available: account.balance,
        };
        if summary.is_sufficient() {
            info!(
                "Prepared {} records, {} CKB required before fees",
                summary.record_count,
                summary.required_capacity / ONE_CKB
            );
        } else {
            warn!(
                "Prepared {} records; {} CKB required but only {} CKB available",
                summary.record_count,
                summary.required_capacity / ONE_CKB,
                summary.available / ONE_CKB
            );
        }

        self.stage = PublicationStage::DataPrepared { account, plan };
        Ok(summary)
    }

    /// `DataPrepared → AccountLoaded`, discarding the prepared records.
    /// Refused once any record has been broadcast.
    pub fn return_to_editing(&mut self) -> Result<()> {
        let account = match &self.stage {
            PublicationStage::DataPrepared { plan, .. } if plan.any_committed() => {
                return Err(VoteError::workflow(
                    "return_to_editing",
                    "DataPrepared (records already broadcast)",
                ));
            }
            PublicationStage::DataPrepared { account, .. } => account.clone(),
            other => return Err(VoteError::workflow("return_to_editing", other)),
        };
        info!("Prepared records discarded");
        self.stage = PublicationStage::AccountLoaded { account };
        Ok(())
    }

    /// `DataPrepared → Sent`. Commits the remaining records in order.
    pub async fn send(&mut self) -> Result<PublicationReceipt> {
        let stage = self.stage.name();
        let PublicationStage::DataPrepared { account, plan } = &mut self.stage else {
            return Err(VoteError::workflow("send", stage));
        };

        let remaining = plan.remaining_capacity();
        if self.config.enforce_balance && account.balance < remaining {
            return Err(VoteError::InsufficientBalance {
                required: remaining,
                available: account.balance,
            });
        }
        let lock = account.primary_lock()?.clone();

        send_records(
            plan,
            self.signer.as_ref(),
            &lock,
            self.config.fee_rate,
            &self.progress,
        )
        .await?;

        let receipt = plan.receipt(self.config.variant)?;
        let account = account.clone();
        info!(
            "Publication complete: candidates at {}, keys at {}",
            receipt.election.candidate_cell, receipt.election.key_source_cell
        );
        self.stage = PublicationStage::Sent {
            account,
            receipt: receipt.clone(),
        };
        Ok(receipt)
    }
}

async fn commit_once(
    tx: &mut PreparedTransaction,
    signer: &dyn Signer,
    fee_rate: u64,
) -> Result<H256> {
    if let Some(hash) = tx.committed_hash() {
        debug!("{} already committed as {}, skipping", tx.label(), hash);
        return Ok(hash);
    }
    tx.commit(signer, fee_rate).await
}

async fn send_records(
    plan: &mut PublicationPlan,
    signer: &dyn Signer,
    lock: &Script,
    fee_rate: u64,
    progress: &ProgressReporter,
) -> Result<()> {
    let total = plan.record_count();
    let mut done = 0;

    commit_once(&mut plan.candidate_tx, signer, fee_rate).await?;
    done += 1;
    progress.report(done, total, plan.candidate_tx.label());

    match &mut plan.key_source {
        KeySourcePlan::IndexCell {
            batch_txs,
            index_tx,
            ..
        } => {
            for tx in batch_txs.iter_mut() {
                commit_once(tx, signer, fee_rate).await?;
                done += 1;
                progress.report(done, total, tx.label());
            }
            if index_tx.is_none() {
                let entries = batch_txs
                    .iter()
                    .map(|tx| {
                        tx.committed_hash()
                            .map(|tx_hash| PubkeyIndexEntry { tx_hash, index: 0 })
                            .ok_or_else(|| {
                                VoteError::Validation(format!("{} is not committed", tx.label()))
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
                *index_tx = Some(prepare_cell(
                    "key index",
                    codec::encode_pubkey_index(&entries)?,
                    lock,
                )?);
            }
            if let Some(tx) = index_tx.as_mut() {
                commit_once(tx, signer, fee_rate).await?;
                done += 1;
                progress.report(done, total, tx.label());
            }
        }
        KeySourcePlan::MerkleRoot { root_tx, .. } => {
            commit_once(root_tx, signer, fee_rate).await?;
            done += 1;
            progress.report(done, total, root_tx.label());
        }
    }
    Ok(())
}
