mod common;

use common::*;
use ringvote_sdk::codec;
use ringvote_sdk::config::{ProtocolConfig, ProtocolVariant};
use ringvote_sdk::crypto::FixtureCrypto;
use ringvote_sdk::keyfile::parse_public_keys;
use ringvote_sdk::progress::ProgressReporter;
use ringvote_sdk::publication::{PublicationStage, PublicationWorkflow};
use ringvote_sdk::types::*;
use ringvote_sdk::VoteError;
use std::sync::Arc;

fn workflow(signer: Arc<MockSigner>, variant: ProtocolVariant) -> PublicationWorkflow {
    let config = ProtocolConfig::default().with_variant(variant);
    PublicationWorkflow::new(signer, Arc::new(FixtureCrypto::new()), config).unwrap()
}

#[tokio::test]
async fn test_single_candidate_publication() {
    let chain = MockChain::default();
    let signer = Arc::new(MockSigner::new(chain.clone(), 1, &[100_000]));
    let mut wf = workflow(signer, ProtocolVariant::MerkleRoot);

    wf.load_account().await.unwrap();
    let alice = vec![CandidateEntry::new([0, 0, 0, 1], "Alice")];
    wf.prepare_data(alice.clone(), test_keys(3)).await.unwrap();
    let receipt = wf.send().await.unwrap();

    let candidate_tx = chain.get(&receipt.candidate_tx).unwrap();
    assert_eq!(candidate_tx.outputs_data[0].len(), 106);
    assert_eq!(codec::decode_candidate_list(&candidate_tx.outputs_data[0]).unwrap(), alice);
    assert!(matches!(wf.stage(), PublicationStage::Sent { .. }));
}

#[tokio::test]
async fn test_index_variant_splits_601_keys() {
    let chain = MockChain::default();
    let signer = Arc::new(MockSigner::new(chain.clone(), 1, &[500_000]));
    let mut wf = workflow(signer, ProtocolVariant::IndexCell);

    wf.load_account().await.unwrap();
    let summary = wf.prepare_data(candidates(), test_keys(601)).await.unwrap();
    assert_eq!(summary.batch_count, 2);
    assert_eq!(summary.record_count, 4);

    let receipt = wf.send().await.unwrap();
    assert_eq!(receipt.key_batch_txs.len(), 2);
    assert_eq!(receipt.election.batch_size, 600);
    assert!(receipt.key_material.is_none());

    let sizes: Vec<usize> = receipt
        .key_batch_txs
        .iter()
        .map(|h| codec::decode_pubkey_batch(&chain.get(h).unwrap().outputs_data[0]).unwrap().len())
        .collect();
    assert_eq!(sizes, vec![600, 1]);

    let index_tx = chain.get(&receipt.index_tx.unwrap()).unwrap();
    let entries = codec::decode_pubkey_index(&index_tx.outputs_data[0]).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].tx_hash, receipt.key_batch_txs[0]);
    assert_eq!(entries[1].tx_hash, receipt.key_batch_txs[1]);
    assert!(entries.iter().all(|e| e.index == 0));

    // candidate, batches, then index
    assert_eq!(
        chain.hashes(),
        vec![
            receipt.candidate_tx,
            receipt.key_batch_txs[0],
            receipt.key_batch_txs[1],
            receipt.index_tx.unwrap()
        ]
    );
}

#[tokio::test]
async fn test_failed_send_resumes_without_republishing() {
    let chain = MockChain::default();
    let signer = Arc::new(MockSigner::new(chain.clone(), 1, &[500_000]));
    let mut wf = workflow(signer.clone(), ProtocolVariant::IndexCell);

    wf.load_account().await.unwrap();
    wf.prepare_data(candidates(), test_keys(601)).await.unwrap();

    // candidate, batch 1, batch 2 go through; the index cell fails
    signer.fail_send_at(4);
    let err = wf.send().await.unwrap_err();
    assert!(matches!(err, VoteError::Network(_)));
    assert_eq!(chain.len(), 3);

    let committed = match wf.stage() {
        PublicationStage::DataPrepared { plan, .. } => {
            assert_eq!(plan.committed_count(), 3);
            plan.candidate_tx().committed_hash().unwrap()
        }
        other => panic!("unexpected stage {}", other),
    };
    assert!(matches!(
        wf.return_to_editing(),
        Err(VoteError::WorkflowState { .. })
    ));

    let receipt = wf.send().await.unwrap();
    assert_eq!(receipt.candidate_tx, committed);
    assert_eq!(chain.len(), 4);
    assert_eq!(signer.attempts(), 5);
    assert_eq!(chain.hashes()[..3], [receipt.candidate_tx, receipt.key_batch_txs[0], receipt.key_batch_txs[1]]);
}

#[tokio::test]
async fn test_send_requires_prepared_data() {
    let signer = Arc::new(MockSigner::new(MockChain::default(), 1, &[1000]));
    let mut wf = workflow(signer, ProtocolVariant::MerkleRoot);

    assert!(matches!(
        wf.send().await,
        Err(VoteError::WorkflowState { .. })
    ));
    wf.load_account().await.unwrap();
    let err = wf.send().await.unwrap_err();
    assert!(matches!(err, VoteError::WorkflowState { ref stage, .. } if stage == "AccountLoaded"));
    assert!(matches!(wf.stage(), PublicationStage::AccountLoaded { .. }));
}

#[tokio::test]
async fn test_empty_inputs_rejected_before_network() {
    let chain = MockChain::default();
    let signer = Arc::new(MockSigner::new(chain.clone(), 1, &[1000]));
    let mut wf = workflow(signer.clone(), ProtocolVariant::IndexCell);
    wf.load_account().await.unwrap();

    let err = wf.prepare_data(candidates(), Vec::new()).await.unwrap_err();
    assert!(matches!(err, VoteError::Validation(ref msg) if msg.contains("at least one key")));
    assert!(wf.prepare_data(Vec::new(), test_keys(1)).await.is_err());

    assert!(matches!(wf.stage(), PublicationStage::AccountLoaded { .. }));
    assert_eq!(signer.attempts(), 0);
    assert_eq!(chain.len(), 0);
}

#[tokio::test]
async fn test_low_balance_blocks_send() {
    let chain = MockChain::default();
    let signer = Arc::new(MockSigner::new(chain.clone(), 1, &[500_000]));
    signer.report_balance(10 * ONE_CKB);
    let mut wf = workflow(signer.clone(), ProtocolVariant::MerkleRoot);

    wf.load_account().await.unwrap();
    let summary = wf.prepare_data(candidates(), test_keys(5)).await.unwrap();
    assert!(!summary.is_sufficient());

    let err = wf.send().await.unwrap_err();
    assert!(matches!(err, VoteError::InsufficientBalance { .. }));
    assert_eq!(chain.len(), 0);
    assert!(matches!(wf.stage(), PublicationStage::DataPrepared { .. }));

    // back to editing is still allowed, nothing was broadcast
    wf.return_to_editing().unwrap();
    assert!(matches!(wf.stage(), PublicationStage::AccountLoaded { .. }));
}

#[tokio::test]
async fn test_merkle_publication_returns_key_material() {
    let chain = MockChain::default();
    let signer = Arc::new(MockSigner::new(chain.clone(), 1, &[100_000]));
    let (progress, mut events) = ProgressReporter::channel();
    let mut wf = workflow(signer, ProtocolVariant::MerkleRoot).with_progress(progress);

    let keys = test_keys(1201);
    wf.load_account().await.unwrap();
    wf.prepare_data(candidates(), keys.clone()).await.unwrap();
    let receipt = wf.send().await.unwrap();

    let root_tx = chain.get(&receipt.merkle_root_tx.unwrap()).unwrap();
    let record = codec::decode_merkle_root(&root_tx.outputs_data[0]).unwrap();
    assert_eq!(record.leaf_count, 1201);
    assert_eq!(record.batch_count, 3);
    assert_eq!(receipt.election.key_source_cell.tx_hash, receipt.merkle_root_tx.unwrap());

    let material = receipt.key_material.unwrap();
    assert_eq!(parse_public_keys(&material).unwrap(), keys);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push((event.done, event.total));
    }
    // two records prepared, two sent
    assert_eq!(seen, vec![(1, 2), (2, 2), (1, 2), (2, 2)]);
}

#[tokio::test]
async fn test_index_progress_uses_one_record_count() {
    let chain = MockChain::default();
    let signer = Arc::new(MockSigner::new(chain.clone(), 1, &[500_000]));
    let (progress, mut events) = ProgressReporter::channel();
    let mut wf = workflow(signer, ProtocolVariant::IndexCell).with_progress(progress);

    wf.load_account().await.unwrap();
    let summary = wf.prepare_data(candidates(), test_keys(601)).await.unwrap();
    wf.send().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push((event.done, event.total));
    }
    let total = summary.record_count;
    assert_eq!(total, 4);
    let phase: Vec<(usize, usize)> = (1..=total).map(|done| (done, total)).collect();
    assert_eq!(seen, [phase.clone(), phase].concat());
}

#[tokio::test]
async fn test_each_record_is_published_once() {
    let chain = MockChain::default();
    let signer = Arc::new(MockSigner::new(chain.clone(), 1, &[500_000]));
    let mut wf = workflow(signer.clone(), ProtocolVariant::IndexCell);

    wf.load_account().await.unwrap();
    wf.prepare_data(candidates(), test_keys(601)).await.unwrap();

    // candidate list goes through, the first batch fails
    signer.fail_send_at(2);
    assert!(wf.send().await.is_err());
    let receipt = wf.send().await.unwrap();

    let candidate_data = codec::encode_candidate_list(&candidates()).unwrap();
    let published: Vec<H256> = chain
        .hashes()
        .into_iter()
        .filter(|h| chain.get(h).unwrap().outputs_data.first() == Some(&candidate_data))
        .collect();
    assert_eq!(published, vec![receipt.candidate_tx]);
    assert_eq!(chain.len(), 4);
}
