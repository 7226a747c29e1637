#![allow(dead_code)]

use async_trait::async_trait;
use num_bigint::BigUint;
use ringvote_sdk::client::{BallotPage, ChainRpc, ChainTransaction, Signer};
use ringvote_sdk::keyfile::VoterSecret;
use ringvote_sdk::transaction::Transaction;
use ringvote_sdk::types::*;
use ringvote_sdk::{Result, VoteError};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};

/// In-memory ledger shared by [`MockSigner`] and [`MockRpc`].
#[derive(Clone, Default)]
pub struct MockChain {
    txs: Arc<Mutex<Vec<(H256, Transaction)>>>,
}

impl MockChain {
    pub fn len(&self) -> usize {
        self.txs.lock().unwrap().len()
    }

    pub fn get(&self, hash: &H256) -> Option<Transaction> {
        self.txs
            .lock()
            .unwrap()
            .iter()
            .find(|(h, _)| h == hash)
            .map(|(_, tx)| tx.clone())
    }

    pub fn hashes(&self) -> Vec<H256> {
        self.txs.lock().unwrap().iter().map(|(h, _)| *h).collect()
    }

    fn push(&self, tx: Transaction) -> H256 {
        let mut txs = self.txs.lock().unwrap();
        let hash = H256(
            Sha256::new()
                .chain_update((txs.len() as u64).to_le_bytes())
                .chain_update(format!("{:?}", tx))
                .finalize()
                .into(),
        );
        txs.push((hash, tx));
        hash
    }
}

pub fn lock_script(seed: u8) -> Script {
    Script::new(H256([0x9b; 32]), HashType::Type, vec![seed; 20])
}

pub struct MockSigner {
    pub chain: MockChain,
    pub lock: Script,
    cells: Mutex<Vec<LiveCell>>,
    /// Fail the broadcast with this 1-based number.
    fail_send_at: Mutex<Option<usize>>,
    attempts: Mutex<usize>,
    reported_balance: Mutex<Option<u64>>,
}

impl MockSigner {
    pub fn new(chain: MockChain, seed: u8, funding_ckb: &[u64]) -> Self {
        let cells = funding_ckb
            .iter()
            .enumerate()
            .map(|(i, ckb)| LiveCell {
                out_point: OutPoint::new(H256([seed.wrapping_add(i as u8 + 1); 32]), i as u32),
                capacity: ckb * ONE_CKB,
            })
            .collect();
        Self {
            chain,
            lock: lock_script(seed),
            cells: Mutex::new(cells),
            fail_send_at: Mutex::new(None),
            attempts: Mutex::new(0),
            reported_balance: Mutex::new(None),
        }
    }

    pub fn fail_send_at(&self, attempt: usize) {
        *self.fail_send_at.lock().unwrap() = Some(attempt);
    }

    /// Report this balance instead of the sum of live cells.
    pub fn report_balance(&self, shannons: u64) {
        *self.reported_balance.lock().unwrap() = Some(shannons);
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Signer for MockSigner {
    async fn address_objs(&self) -> Result<Vec<Address>> {
        Ok(vec![Address {
            encoded: format!("ckt1mock{}", hex::encode(&self.lock.args[..4])),
            lock: self.lock.clone(),
        }])
    }

    async fn balance(&self) -> Result<u64> {
        if let Some(balance) = *self.reported_balance.lock().unwrap() {
            return Ok(balance);
        }
        Ok(self.cells.lock().unwrap().iter().map(|c| c.capacity).sum())
    }

    async fn live_cells(&self) -> Result<Vec<LiveCell>> {
        Ok(self.cells.lock().unwrap().clone())
    }

    async fn sign_transaction(&self, mut tx: Transaction) -> Result<Transaction> {
        if let Some(first) = tx.witnesses.first_mut() {
            // stand-in for a secp256k1 signature over the placeholder
            let placeholder = vec![0u8; 65];
            let signature = vec![0x5a; 65];
            if let Some(pos) = first.windows(65).position(|w| w == placeholder.as_slice()) {
                first[pos..pos + 65].copy_from_slice(&signature);
            }
        }
        Ok(tx)
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<H256> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        let mut fail = self.fail_send_at.lock().unwrap();
        if *fail == Some(attempt) {
            *fail = None;
            return Err(VoteError::Network("connection reset by peer".into()));
        }
        drop(fail);

        let hash = self.chain.push(tx.clone());
        let mut cells = self.cells.lock().unwrap();
        cells.retain(|c| !tx.inputs.iter().any(|i| i.previous_output == c.out_point));
        for (i, (output, data)) in tx.outputs.iter().zip(&tx.outputs_data).enumerate() {
            if output.lock == self.lock && output.type_.is_none() && data.is_empty() {
                cells.push(LiveCell {
                    out_point: OutPoint::new(hash, i as u32),
                    capacity: output.capacity,
                });
            }
        }
        Ok(hash)
    }
}

pub struct MockRpc {
    pub chain: MockChain,
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn get_transaction(&self, hash: &H256) -> Result<Option<ChainTransaction>> {
        Ok(self.chain.get(hash).map(|tx| ChainTransaction {
            hash: *hash,
            cell_deps: tx.cell_deps,
            outputs: tx.outputs,
            outputs_data: tx.outputs_data,
        }))
    }

    async fn get_ballot_transactions(
        &self,
        type_script: &Script,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<BallotPage> {
        let start: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let matching: Vec<H256> = self
            .chain
            .hashes()
            .into_iter()
            .filter(|h| {
                self.chain
                    .get(h)
                    .map(|tx| tx.outputs.iter().any(|o| o.type_.as_ref() == Some(type_script)))
                    .unwrap_or(false)
            })
            .collect();
        let page: Vec<H256> = matching.iter().skip(start).take(limit as usize).copied().collect();
        let next = start + page.len();
        Ok(BallotPage {
            last_cursor: (!page.is_empty()).then(|| next.to_string()),
            tx_hashes: page,
        })
    }
}

/// Distinct 2048-bit-sized test keys; only their bytes matter to the fixtures.
pub fn test_keys(count: usize) -> Vec<RsaPubKey> {
    (0..count)
        .map(|i| {
            let mut n = Sha256::digest((i as u64).to_le_bytes()).to_vec();
            n.resize(256, 0xa5);
            n[0] |= 0x80;
            RsaPubKey::new(BigUint::from_bytes_be(&n), BigUint::from(65537u32))
        })
        .collect()
}

/// Secret for a key from [`test_keys`]; the private factors are never
/// checked by the fixture crypto.
pub fn secret_for(key: &RsaPubKey) -> VoterSecret {
    VoterSecret {
        public: key.clone(),
        d: BigUint::from(3u32),
        p: BigUint::from(5u32),
        q: BigUint::from(7u32),
    }
}

pub fn candidates() -> Vec<CandidateEntry> {
    vec![
        CandidateEntry::new([0, 0, 0, 1], "Alice"),
        CandidateEntry::new([0, 0, 0, 2], "Bob"),
    ]
}
