use crate::client::ChainRpc;
use crate::codec;
use crate::config::{ElectionRef, ProtocolVariant};
use crate::error::{Result, VoteError};
use crate::types::*;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

/// Ballot-relevant parts of one transaction found by type script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BallotRecord {
    pub tx_hash: H256,
    /// Second cell dep, the key source the ballot was signed against.
    pub key_source: Option<OutPoint>,
    pub output_data: Vec<u8>,
}

/// What a ballot is checked against.
#[derive(Debug, Clone)]
pub struct TallyContext {
    pub variant: ProtocolVariant,
    pub candidates: Vec<CandidateEntry>,
    /// Cells a valid ballot may reference as key source.
    pub key_sources: HashSet<OutPoint>,
}

impl TallyContext {
    /// Read the candidate list and key source cells of an election.
    pub async fn load(rpc: &dyn ChainRpc, election: &ElectionRef) -> Result<Self> {
        let fetch = |op: OutPoint| async move {
            rpc.get_transaction(&op.tx_hash)
                .await?
                .ok_or_else(|| VoteError::Validation(format!("invalid cell reference {}", op)))
        };
        let candidate_tx = fetch(election.candidate_cell).await?;
        let candidates =
            codec::decode_candidate_list(candidate_tx.output_data(election.candidate_cell.index)?)?;

        let key_sources = match election.variant {
            ProtocolVariant::IndexCell => {
                let index_tx = fetch(election.key_source_cell).await?;
                codec::decode_pubkey_index(index_tx.output_data(election.key_source_cell.index)?)?
                    .iter()
                    .map(PubkeyIndexEntry::out_point)
                    .collect()
            }
            ProtocolVariant::MerkleRoot => HashSet::from([election.key_source_cell]),
        };
        Ok(Self {
            variant: election.variant,
            candidates,
            key_sources,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TallyResult {
    /// Votes per candidate, in candidate-list order.
    pub counts: Vec<(CandidateEntry, usize)>,
    pub accepted: usize,
    /// Later ballots reusing a key image.
    pub duplicates: Vec<H256>,
    pub rejected: Vec<(H256, String)>,
}

/// Count ballots: first ballot per key image wins; ballots with an unknown
/// candidate or a foreign key source are rejected.
pub fn tally(context: &TallyContext, ballots: &[BallotRecord]) -> TallyResult {
    let mut votes: HashMap<[u8; CANDIDATE_ID_BYTES], usize> =
        context.candidates.iter().map(|c| (c.id, 0)).collect();
    let mut seen_images = HashSet::new();
    let mut result = TallyResult::default();

    for ballot in ballots {
        let reject = |why: String| (ballot.tx_hash, why);
        match ballot.key_source {
            Some(source) if context.key_sources.contains(&source) => {}
            Some(source) => {
                result
                    .rejected
                    .push(reject(format!("key source {} is not part of the election", source)));
                continue;
            }
            None => {
                result.rejected.push(reject("missing key source cell dep".into()));
                continue;
            }
        }
        let (id, image) = match codec::decode_ballot_output(context.variant, &ballot.output_data) {
            Ok(decoded) => decoded,
            Err(e) => {
                result.rejected.push(reject(e.to_string()));
                continue;
            }
        };
        let Some(count) = votes.get_mut(&id) else {
            result
                .rejected
                .push(reject(format!("unknown candidate {}", hex::encode(id))));
            continue;
        };
        if !seen_images.insert(image) {
            warn!("Ballot {} reuses a key image, ignored", ballot.tx_hash);
            result.duplicates.push(ballot.tx_hash);
            continue;
        }
        *count += 1;
        result.accepted += 1;
    }

    result.counts = context
        .candidates
        .iter()
        .map(|c| (c.clone(), votes.get(&c.id).copied().unwrap_or(0)))
        .collect();
    result
}

/// Page through every transaction carrying `type_script` and extract its
/// ballot output.
pub async fn collect_ballots(
    rpc: &dyn ChainRpc,
    type_script: &Script,
    page_limit: u32,
) -> Result<Vec<BallotRecord>> {
    let mut ballots = Vec::new();
    let mut cursor = None;
    loop {
        let page = rpc
            .get_ballot_transactions(type_script, cursor.take(), page_limit)
            .await?;
        debug!("ballot page with {} transactions", page.tx_hashes.len());
        for hash in &page.tx_hashes {
            let Some(tx) = rpc.get_transaction(hash).await? else {
                warn!("Ballot transaction {} disappeared, skipped", hash);
                continue;
            };
            let Some(index) = tx
                .outputs
                .iter()
                .position(|o| o.type_.as_ref() == Some(type_script))
            else {
                continue;
            };
            ballots.push(BallotRecord {
                tx_hash: tx.hash,
                key_source: tx.cell_deps.get(1).map(|d| d.out_point),
                output_data: tx.outputs_data.get(index).cloned().unwrap_or_default(),
            });
        }
        if page.tx_hashes.is_empty() {
            break;
        }
        match page.last_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    info!("Collected {} ballots", ballots.len());
    Ok(ballots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TallyContext {
        TallyContext {
            variant: ProtocolVariant::MerkleRoot,
            candidates: vec![
                CandidateEntry::new([0, 0, 0, 1], "Alice"),
                CandidateEntry::new([0, 0, 0, 2], "Bob"),
            ],
            key_sources: HashSet::from([OutPoint::new(H256([1; 32]), 0)]),
        }
    }

    fn ballot(seed: u8, id: [u8; 4], image: u8, source: OutPoint) -> BallotRecord {
        let mut output_data = id.to_vec();
        output_data.extend_from_slice(&[image; 256]);
        BallotRecord {
            tx_hash: H256([seed; 32]),
            key_source: Some(source),
            output_data,
        }
    }

    #[test]
    fn test_first_vote_per_image_wins() {
        let source = OutPoint::new(H256([1; 32]), 0);
        let ballots = vec![
            ballot(10, [0, 0, 0, 1], 7, source),
            ballot(11, [0, 0, 0, 2], 7, source),
            ballot(12, [0, 0, 0, 2], 8, source),
        ];
        let result = tally(&context(), &ballots);
        assert_eq!(result.accepted, 2);
        assert_eq!(result.duplicates, vec![H256([11; 32])]);
        assert_eq!(result.counts[0].1, 1);
        assert_eq!(result.counts[1].1, 1);
    }

    #[test]
    fn test_rejections() {
        let source = OutPoint::new(H256([1; 32]), 0);
        let foreign = OutPoint::new(H256([2; 32]), 0);
        let mut truncated = ballot(13, [0, 0, 0, 1], 3, source);
        truncated.output_data.truncate(100);
        let ballots = vec![
            ballot(10, [0, 0, 0, 9], 1, source),
            ballot(11, [0, 0, 0, 1], 2, foreign),
            truncated,
        ];
        let result = tally(&context(), &ballots);
        assert_eq!(result.accepted, 0);
        assert_eq!(result.rejected.len(), 3);
        assert!(result.rejected[0].1.contains("unknown candidate"));
        assert!(result.rejected[1].1.contains("not part of the election"));
    }
}
