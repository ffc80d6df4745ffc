#![forbid(unsafe_code)]
//! Local single-process walkthrough of the consensus path: propose a block,
//! collect simulated peer votes, finalize, prove a transaction, and run one
//! sync round. Network transport stays external to the core by design; this
//! binary stands in for it.

use clap::Parser;
use consentchain::config::load_config;
use consentchain::consensus::{CandidateChain, ConsensusEngine};
use consentchain::error::Result;
use consentchain::ledger::Ledger;
use consentchain::merkle::MerkleTree;
use consentchain::persistence::JsonFilePersistence;
use consentchain::transaction::{Transaction, TxPayload};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "consentchain-sim", about = "Scripted local consensus run")]
struct Args {
    /// Path to the node config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Number of simulated peers voting alongside this node
    #[arg(long, default_value_t = 2)]
    peers: usize,
}

fn sample_batch() -> Vec<Transaction> {
    vec![
        Transaction::new(
            "clinic-east".to_string(),
            "consent-registry".to_string(),
            TxPayload::ConsentChange {
                subject: "patient-1024".to_string(),
                scope: "lab-results".to_string(),
                granted: true,
            },
        ),
        Transaction::new(
            "auditor".to_string(),
            "consent-registry".to_string(),
            TxPayload::AuditEntry {
                actor: "dr-lee".to_string(),
                action: "read".to_string(),
                resource: "chart-1024".to_string(),
            },
        ),
    ]
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let config = load_config(&args.config)?;
    let store = JsonFilePersistence::open(format!("{}/chain.json", config.node.data_dir))?;
    let mut ledger = Ledger::restore(Box::new(store))?;
    if ledger.chain_length() == 0 {
        ledger.create_genesis_block()?;
    }
    let ledger = Arc::new(RwLock::new(ledger));

    let peer_ids: Vec<String> = (0..args.peers).map(|i| format!("sim-peer-{}", i)).collect();
    let engine = ConsensusEngine::new(
        config.node.node_id.clone(),
        peer_ids.clone(),
        config.consensus.threshold,
        Arc::clone(&ledger),
    )?;

    info!(
        node = %config.node.node_id,
        roster = engine.roster_size(),
        height = ledger.read().chain_length(),
        "node initialized"
    );

    // Propose and let every simulated peer affirm.
    let proposal = engine.propose_block(sample_batch())?;
    info!(proposal = %proposal.proposal_id, "proposal broadcast");

    for peer in &peer_ids {
        // The proposal record is consumed the moment it finalizes, so later
        // simulated votes simply find nothing left to vote on.
        if engine.record_vote(&proposal.block.hash, peer, true).is_err() {
            break;
        }
        match engine.check_consensus(&proposal.block.hash) {
            Ok(status) => info!(
                agreement = status.agreement_count,
                required = status.required_agreement,
                reached = status.reached,
                "consensus status"
            ),
            Err(_) => break,
        }
    }

    {
        let ledger = ledger.read();
        let head = ledger
            .latest_block()
            .expect("chain has a head after genesis");
        info!(
            height = ledger.chain_length(),
            transactions = ledger.total_transactions(),
            head = %head.hash_str(),
            "chain state after finalization"
        );

        // Standalone integrity check: prove the first transaction of the head
        // block against its Merkle commitment.
        if let Some(tx) = head.transactions.first() {
            let tree = MerkleTree::build(&head.transactions)?;
            let proof = tree.proof(tx)?;
            info!(
                record = %tx.id,
                path_len = proof.path.len(),
                verified = MerkleTree::verify(tx, &proof, Some(&head.merkle_root)),
                "merkle inclusion proof"
            );
        }
    }

    // One sync round against a corrupted candidate: it must be rejected and
    // the local chain left untouched.
    let mut corrupted = ledger.read().blocks().to_vec();
    if let Some(block) = corrupted.last_mut() {
        if let Some(tx) = block.transactions.first_mut() {
            tx.to = "mallory".to_string();
        }
    }
    let result = engine.sync_chain(vec![CandidateChain {
        node_id: "sim-peer-0".to_string(),
        chain: corrupted,
    }]);
    info!(
        swapped = result.swapped,
        rejected = result.rejected.len(),
        height = result.length_after,
        "sync round complete"
    );

    Ok(())
}
