//! End-to-end consensus scenarios: propose -> vote -> finalize on a
//! three-node roster, and chain reconciliation across diverging nodes.

use consentchain::consensus::{CandidateChain, ConsensusEngine, DEFAULT_THRESHOLD};
use consentchain::error::ChainError;
use consentchain::ledger::Ledger;
use consentchain::merkle::MerkleTree;
use consentchain::transaction::{Transaction, TxPayload};
use parking_lot::RwLock;
use std::sync::Arc;

fn shared_ledger() -> Arc<RwLock<Ledger>> {
    let ledger = Arc::new(RwLock::new(Ledger::new()));
    ledger.write().create_genesis_block().unwrap();
    ledger
}

fn consent_tx(subject: &str) -> Transaction {
    Transaction::new(
        "clinic-east".to_string(),
        "consent-registry".to_string(),
        TxPayload::ConsentChange {
            subject: subject.to_string(),
            scope: "lab-results".to_string(),
            granted: true,
        },
    )
}

#[test]
fn three_node_network_finalizes_after_full_agreement() {
    let ledger = shared_ledger();
    let engine = ConsensusEngine::new(
        "hospital-east",
        vec!["hospital-west".to_string(), "registry".to_string()],
        DEFAULT_THRESHOLD,
        Arc::clone(&ledger),
    )
    .unwrap();

    let proposal = engine
        .propose_block(vec![consent_tx("patient-1"), consent_tx("patient-2")])
        .unwrap();
    let hash = proposal.block.hash;

    // Proposer's self-vote plus one peer: below the ceil(3 * 0.67) = 3 bar.
    engine.record_vote(&hash, "hospital-west", true).unwrap();
    let status = engine.check_consensus(&hash).unwrap();
    assert_eq!(status.agreement_count, 2);
    assert_eq!(status.required_agreement, 3);
    assert!(!status.reached);
    assert_eq!(ledger.read().chain_length(), 1);

    // Third affirmative vote tips the quorum; the block lands on the chain.
    engine.record_vote(&hash, "registry", true).unwrap();
    let status = engine.check_consensus(&hash).unwrap();
    assert!(status.reached);
    assert_eq!(ledger.read().chain_length(), 2);
    assert_eq!(ledger.read().total_transactions(), 2);

    // The proposal record is consumed by finalization.
    assert!(matches!(
        engine.check_consensus(&hash),
        Err(ChainError::ProposalNotFound(_))
    ));

    // The committed block carries a verifiable Merkle commitment.
    let ledger = ledger.read();
    let head = ledger.latest_block().unwrap();
    let tree = MerkleTree::build(&head.transactions).unwrap();
    assert_eq!(tree.root(), head.merkle_root);
    let proof = tree.proof(&head.transactions[1]).unwrap();
    assert!(MerkleTree::verify(
        &head.transactions[1],
        &proof,
        Some(&head.merkle_root)
    ));
}

#[test]
fn finalized_transactions_are_searchable() {
    let ledger = shared_ledger();
    let engine =
        ConsensusEngine::new("solo", vec![], DEFAULT_THRESHOLD, Arc::clone(&ledger)).unwrap();

    let proposal = engine.propose_block(vec![consent_tx("patient-7")]).unwrap();
    assert!(engine.check_consensus(&proposal.block.hash).unwrap().reached);

    let hits = ledger.read().search_transactions(|tx| {
        matches!(&tx.data, TxPayload::ConsentChange { subject, .. } if subject == "patient-7")
    });
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].block_index, 1);
}

/// Grow a node's chain by `blocks` finalized blocks and return its engine.
fn grown_node(node_id: &str, blocks: usize) -> (ConsensusEngine, Arc<RwLock<Ledger>>) {
    let ledger = shared_ledger();
    let engine =
        ConsensusEngine::new(node_id, vec![], DEFAULT_THRESHOLD, Arc::clone(&ledger)).unwrap();
    for i in 0..blocks {
        let proposal = engine
            .propose_block(vec![consent_tx(&format!("{}-patient-{}", node_id, i))])
            .unwrap();
        assert!(engine.check_consensus(&proposal.block.hash).unwrap().reached);
    }
    (engine, ledger)
}

#[test]
fn sync_adopts_the_longest_valid_chain() {
    let (local_engine, local_ledger) = grown_node("local", 1);
    let (_, short_ledger) = grown_node("peer-short", 1);
    let (_, long_ledger) = grown_node("peer-long", 3);

    let result = local_engine.sync_chain(vec![
        CandidateChain {
            node_id: "peer-short".to_string(),
            chain: short_ledger.read().blocks().to_vec(),
        },
        CandidateChain {
            node_id: "peer-long".to_string(),
            chain: long_ledger.read().blocks().to_vec(),
        },
    ]);

    assert!(result.swapped);
    assert_eq!(result.adopted_from.as_deref(), Some("peer-long"));
    assert_eq!(result.length_before, 2);
    assert_eq!(result.length_after, 4);
    assert_eq!(
        local_ledger.read().latest_block().unwrap().hash,
        long_ledger.read().latest_block().unwrap().hash
    );
}

#[test]
fn sync_rejects_longer_but_corrupted_chain() {
    let (local_engine, local_ledger) = grown_node("local", 1);
    let (_, long_ledger) = grown_node("peer-long", 3);

    let mut corrupted = long_ledger.read().blocks().to_vec();
    // One flipped transaction deep in the chain breaks re-derivation.
    corrupted[2].transactions[0].to = "mallory".to_string();

    let head_before = local_ledger.read().latest_block().unwrap().hash;
    let result = local_engine.sync_chain(vec![CandidateChain {
        node_id: "peer-long".to_string(),
        chain: corrupted,
    }]);

    assert!(!result.swapped);
    assert_eq!(result.rejected, vec!["peer-long".to_string()]);
    assert_eq!(result.length_after, 2);
    assert_eq!(local_ledger.read().latest_block().unwrap().hash, head_before);
}

#[test]
fn sync_keeps_local_chain_on_equal_length() {
    let (local_engine, local_ledger) = grown_node("local", 2);
    let (_, peer_ledger) = grown_node("peer", 2);

    let head_before = local_ledger.read().latest_block().unwrap().hash;
    let result = local_engine.sync_chain(vec![CandidateChain {
        node_id: "peer".to_string(),
        chain: peer_ledger.read().blocks().to_vec(),
    }]);

    assert!(!result.swapped);
    assert!(result.rejected.is_empty());
    assert_eq!(local_ledger.read().latest_block().unwrap().hash, head_before);
}

#[test]
fn pending_proposals_are_dropped_after_a_sync_swap() {
    let (local_engine, _local_ledger) = grown_node("local", 0);
    let (_, long_ledger) = grown_node("peer-long", 2);

    let stale = local_engine
        .propose_block(vec![consent_tx("patient-9")])
        .unwrap();
    assert_eq!(local_engine.pending_count(), 1);

    let result = local_engine.sync_chain(vec![CandidateChain {
        node_id: "peer-long".to_string(),
        chain: long_ledger.read().blocks().to_vec(),
    }]);
    assert!(result.swapped);

    // The adopted head superseded the proposal's previous_hash.
    assert_eq!(local_engine.pending_count(), 0);
    assert!(matches!(
        local_engine.check_consensus(&stale.block.hash),
        Err(ChainError::ProposalNotFound(_))
    ));
}
