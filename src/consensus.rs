//! Quorum-vote consensus engine.
//!
//! Orchestrates block proposals over a shared [`Ledger`]: validates candidate
//! blocks, merges votes from network participants, finalizes a block exactly
//! once when the agreement threshold is met, and reconciles the local chain
//! against peer-supplied candidates with a longest-valid-chain rule.
//!
//! The engine is synchronous and CPU-bound; proposal broadcast and vote
//! solicitation belong to an external transport, which is also trusted to
//! have authenticated the originating node of every vote it delivers.

use crate::crypto::Sha256Hash;
use crate::error::{ChainError, Result};
use crate::ledger::{Block, Ledger};
use crate::transaction::validation;
use crate::transaction::Transaction;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type NodeId = String;

/// Default agreement fraction of the live roster.
pub const DEFAULT_THRESHOLD: f64 = 0.67;

/// A single node's verdict on a candidate block. At most one per
/// (block, node); the first vote wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(with = "crate::crypto::hex_hash")]
    pub block_hash: Sha256Hash,
    pub node_id: NodeId,
    pub is_valid: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProposalState {
    Voting,
    Finalized,
    Abandoned,
}

/// Bookkeeping for a candidate block, keyed by its hash. Created on
/// proposal, discarded once finalized or superseded by a new head.
#[derive(Debug)]
struct PendingProposal {
    block: Block,
    proposer: NodeId,
    proposed_at: u64,
    votes: HashMap<NodeId, Vote>,
    state: ProposalState,
}

/// Result of `propose_block`: the candidate, its id and the proposer's
/// self-vote.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub proposal_id: String,
    pub block: Block,
    pub vote: Vote,
}

/// Snapshot of the vote state for one candidate block. Not a final answer
/// until `reached` is observed true.
#[derive(Debug, Clone)]
pub struct ConsensusStatus {
    pub votes: Vec<Vote>,
    pub total_nodes: usize,
    pub agreement_count: usize,
    pub required_agreement: usize,
    pub reached: bool,
}

/// A full chain snapshot advertised by a peer.
#[derive(Debug, Clone)]
pub struct CandidateChain {
    pub node_id: NodeId,
    pub chain: Vec<Block>,
}

#[derive(Debug, Clone)]
pub struct SyncResult {
    pub swapped: bool,
    pub length_before: usize,
    pub length_after: usize,
    pub adopted_from: Option<NodeId>,
    pub rejected: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct NodeFailureResult {
    pub node_id: NodeId,
    pub purged_votes: usize,
    pub remaining_nodes: usize,
    pub required_agreement: usize,
}

/// Votes required for finality: `ceil(total * threshold)`. All nodes must
/// use this exact formula or they will disagree on when a block is final.
pub fn required_agreement(total_nodes: usize, threshold: f64) -> usize {
    (((total_nodes as f64) * threshold).ceil() as usize).max(1)
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

pub struct ConsensusEngine {
    node_id: NodeId,
    threshold: f64,
    roster: RwLock<HashSet<NodeId>>,
    ledger: Arc<RwLock<Ledger>>,
    proposals: RwLock<HashMap<Sha256Hash, Arc<Mutex<PendingProposal>>>>,
}

impl ConsensusEngine {
    /// Build an engine for `node_id` over a shared ledger. The roster is
    /// `peers` plus the node itself. Threshold outside (0, 1] or an empty
    /// node id is a configuration error.
    pub fn new(
        node_id: impl Into<NodeId>,
        peers: Vec<NodeId>,
        threshold: f64,
        ledger: Arc<RwLock<Ledger>>,
    ) -> Result<Self> {
        let node_id = node_id.into();
        if node_id.trim().is_empty() {
            return Err(ChainError::Config("node id must not be empty".to_string()));
        }
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ChainError::Config(format!(
                "consensus threshold must be in (0, 1], got {}",
                threshold
            )));
        }

        let mut roster: HashSet<NodeId> = peers.into_iter().collect();
        roster.insert(node_id.clone());

        Ok(ConsensusEngine {
            node_id,
            threshold,
            roster: RwLock::new(roster),
            ledger,
            proposals: RwLock::new(HashMap::new()),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn roster_size(&self) -> usize {
        self.roster.read().len()
    }

    pub fn pending_count(&self) -> usize {
        self.proposals.read().len()
    }

    /// Add a node to the roster. Changes the agreement denominator for all
    /// subsequent consensus checks.
    pub fn register_node(&self, node_id: impl Into<NodeId>) -> bool {
        self.roster.write().insert(node_id.into())
    }

    /// Package a candidate block on top of the current head and cast the
    /// proposer's own affirmative vote. Propose implies local validation
    /// passed.
    pub fn propose_block(&self, transactions: Vec<Transaction>) -> Result<Proposal> {
        if transactions.is_empty() {
            return Err(ChainError::InvalidTransactionBatch(
                "transaction batch is empty".to_string(),
            ));
        }
        for tx in &transactions {
            validation::validate_structure(tx)
                .map_err(|err| ChainError::InvalidTransactionBatch(err.to_string()))?;
        }

        let timestamp = now_millis();
        let block = {
            let ledger = self.ledger.read();
            let head = ledger.latest_block().ok_or_else(|| {
                ChainError::Internal("cannot propose: genesis block missing".to_string())
            })?;
            let index = ledger.chain_length() as u64;
            let previous_hash = head.hash;
            let merkle_root = Ledger::calculate_merkle_root(&transactions)?;
            let hash = Ledger::calculate_block_hash(
                index,
                timestamp,
                &transactions,
                &previous_hash,
                &merkle_root,
                0,
            )?;
            Block {
                index,
                timestamp,
                transactions,
                previous_hash,
                merkle_root,
                hash,
                nonce: 0,
            }
        };

        let vote = Vote {
            block_hash: block.hash,
            node_id: self.node_id.clone(),
            is_valid: true,
            timestamp,
        };
        let mut votes = HashMap::new();
        votes.insert(self.node_id.clone(), vote.clone());

        let proposal_id = hex::encode(block.hash);
        self.proposals.write().insert(
            block.hash,
            Arc::new(Mutex::new(PendingProposal {
                block: block.clone(),
                proposer: self.node_id.clone(),
                proposed_at: timestamp,
                votes,
                state: ProposalState::Voting,
            })),
        );

        debug!(
            proposal = %proposal_id,
            index = block.index,
            txs = block.transactions.len(),
            "block proposed"
        );

        Ok(Proposal {
            proposal_id,
            block,
            vote,
        })
    }

    /// Ingest a candidate block proposed by a peer: validate it against the
    /// local chain, register it for voting, and cast this node's computed
    /// vote.
    pub fn receive_proposal(&self, block: Block, proposer: &str) -> Result<Vote> {
        let verdict = self.validate_block_proposal(&block);
        let block_hash = block.hash;

        {
            let mut proposals = self.proposals.write();
            proposals.entry(block_hash).or_insert_with(|| {
                Arc::new(Mutex::new(PendingProposal {
                    block,
                    proposer: proposer.to_string(),
                    proposed_at: now_millis(),
                    votes: HashMap::new(),
                    state: ProposalState::Voting,
                }))
            });
        }

        let me = self.node_id.clone();
        self.record_vote(&block_hash, &me, verdict)
    }

    /// Re-derive a candidate block's commitments and check it still extends
    /// the *current* head. A proposal becomes invalid if the chain advanced
    /// underneath it; the caller must re-propose, not retry.
    pub fn validate_block_proposal(&self, block: &Block) -> bool {
        if !block.transactions.iter().all(validation::is_valid) {
            return false;
        }

        let ledger = self.ledger.read();
        let head = match ledger.latest_block() {
            Some(head) => head,
            None => return false,
        };
        if block.previous_hash != head.hash || block.index != ledger.chain_length() as u64 {
            return false;
        }

        match Ledger::calculate_merkle_root(&block.transactions) {
            Ok(root) if root == block.merkle_root => {}
            _ => return false,
        }
        matches!(Ledger::block_hash_of(block), Ok(hash) if hash == block.hash)
    }

    /// Cast this node's vote. When `is_valid` is omitted the verdict is
    /// computed locally via `validate_block_proposal`.
    pub fn vote_on_block(&self, block_hash: &Sha256Hash, is_valid: Option<bool>) -> Result<Vote> {
        let verdict = match is_valid {
            Some(verdict) => verdict,
            None => {
                let block = {
                    let entry = self.get_proposal(block_hash)?;
                    let guard = entry.lock();
                    guard.block.clone()
                };
                self.validate_block_proposal(&block)
            }
        };
        let me = self.node_id.clone();
        self.record_vote(block_hash, &me, verdict)
    }

    /// Merge a vote delivered by the transport. Re-voting by the same node
    /// returns the existing vote unchanged.
    pub fn record_vote(
        &self,
        block_hash: &Sha256Hash,
        node_id: &str,
        is_valid: bool,
    ) -> Result<Vote> {
        let entry = self.get_proposal(block_hash)?;
        let mut proposal = entry.lock();

        if let Some(existing) = proposal.votes.get(node_id) {
            return Ok(existing.clone());
        }

        let vote = Vote {
            block_hash: *block_hash,
            node_id: node_id.to_string(),
            is_valid,
            timestamp: now_millis(),
        };
        proposal.votes.insert(node_id.to_string(), vote.clone());
        debug!(
            proposal = %hex::encode(block_hash),
            node = node_id,
            is_valid,
            votes = proposal.votes.len(),
            "vote recorded"
        );
        Ok(vote)
    }

    /// Report the current vote snapshot for a candidate block. The moment
    /// `reached` is observed true the proposal is finalized: its state flips
    /// once, the block is appended to the ledger exactly once, and the
    /// proposal record is discarded along with any proposals the new head
    /// made stale.
    pub fn check_consensus(&self, block_hash: &Sha256Hash) -> Result<ConsensusStatus> {
        let entry = self.get_proposal(block_hash)?;

        let mut resolved = false;
        let status = {
            let mut proposal = entry.lock();
            let status = self.status_of(&proposal);

            if status.reached && proposal.state == ProposalState::Voting {
                // Check-and-set under the proposal lock guards against
                // double-finalization from concurrent checkers.
                proposal.state = ProposalState::Finalized;
                match self.ledger.write().append_block(proposal.block.clone()) {
                    Ok(()) => {
                        info!(
                            proposal = %hex::encode(block_hash),
                            proposer = %proposal.proposer,
                            index = proposal.block.index,
                            agreement = status.agreement_count,
                            required = status.required_agreement,
                            age_ms = now_millis().saturating_sub(proposal.proposed_at),
                            "block finalized"
                        );
                    }
                    Err(err) => {
                        // The chain advanced underneath the proposal; drop it.
                        warn!(
                            proposal = %hex::encode(block_hash),
                            %err,
                            "finalization failed, abandoning proposal"
                        );
                        proposal.state = ProposalState::Abandoned;
                    }
                }
                resolved = true;
            }
            status
        };

        if resolved {
            self.proposals.write().remove(block_hash);
            self.prune_stale_proposals();
        }

        Ok(status)
    }

    /// Reconcile the local chain against peer candidates. Every candidate is
    /// fully re-validated independent of the advertising node; the longest
    /// valid chain strictly longer than the local one is adopted, ties favor
    /// the local chain. Never fails: rejections are reported, not thrown.
    pub fn sync_chain(&self, candidates: Vec<CandidateChain>) -> SyncResult {
        let length_before = self.ledger.read().chain_length();

        let mut rejected = Vec::new();
        let mut best: Option<CandidateChain> = None;
        for candidate in candidates {
            // Candidate validation is read-only over external data; the
            // ledger write lock is not held here.
            if let Err(err) = Ledger::validate_chain(&candidate.chain) {
                warn!(node = %candidate.node_id, %err, "rejecting candidate chain");
                rejected.push(candidate.node_id);
                continue;
            }
            if candidate.chain.len() <= length_before {
                continue;
            }
            let better = best
                .as_ref()
                .map_or(true, |current| candidate.chain.len() > current.chain.len());
            if better {
                best = Some(candidate);
            }
        }

        let mut swapped = false;
        let mut adopted_from = None;
        if let Some(CandidateChain { node_id, chain }) = best {
            match self.ledger.write().replace_chain(chain) {
                Ok(()) => {
                    info!(node = %node_id, "adopted longer valid chain");
                    adopted_from = Some(node_id);
                    swapped = true;
                }
                Err(err) => {
                    // Local chain grew past the candidate while we validated.
                    warn!(node = %node_id, %err, "chain replacement lost the race");
                    rejected.push(node_id);
                }
            }
        }

        if swapped {
            self.prune_stale_proposals();
        }

        let length_after = self.ledger.read().chain_length();
        SyncResult {
            swapped,
            length_before,
            length_after,
            adopted_from,
            rejected,
        }
    }

    /// Evict a node: remove it from the roster and purge its votes from all
    /// pending proposals. Subsequent consensus checks use the smaller
    /// denominator.
    pub fn handle_node_failure(&self, node_id: &str) -> NodeFailureResult {
        let removed = self.roster.write().remove(node_id);
        if !removed {
            warn!(node = node_id, "failure reported for unknown node");
        }

        let entries: Vec<Arc<Mutex<PendingProposal>>> =
            self.proposals.read().values().cloned().collect();
        let mut purged_votes = 0;
        for entry in entries {
            if entry.lock().votes.remove(node_id).is_some() {
                purged_votes += 1;
            }
        }

        let remaining_nodes = self.roster.read().len();
        let required = required_agreement(remaining_nodes, self.threshold);
        info!(
            node = node_id,
            purged_votes, remaining_nodes, "node evicted from roster"
        );

        NodeFailureResult {
            node_id: node_id.to_string(),
            purged_votes,
            remaining_nodes,
            required_agreement: required,
        }
    }

    fn get_proposal(&self, block_hash: &Sha256Hash) -> Result<Arc<Mutex<PendingProposal>>> {
        self.proposals
            .read()
            .get(block_hash)
            .cloned()
            .ok_or_else(|| ChainError::ProposalNotFound(hex::encode(block_hash)))
    }

    fn status_of(&self, proposal: &PendingProposal) -> ConsensusStatus {
        let roster = self.roster.read();
        let total_nodes = roster.len();
        // Only votes from current roster members count toward agreement, so
        // an evicted node's lingering vote can never finalize a block.
        let agreement_count = proposal
            .votes
            .values()
            .filter(|vote| vote.is_valid && roster.contains(&vote.node_id))
            .count();
        let required = required_agreement(total_nodes, self.threshold);

        ConsensusStatus {
            votes: proposal.votes.values().cloned().collect(),
            total_nodes,
            agreement_count,
            required_agreement: required,
            reached: total_nodes > 0 && agreement_count >= required,
        }
    }

    /// Drop proposals whose `previous_hash` no longer matches the head.
    fn prune_stale_proposals(&self) {
        let head_hash = match self.ledger.read().latest_block() {
            Some(head) => head.hash,
            None => return,
        };

        let stale: Vec<Sha256Hash> = self
            .proposals
            .read()
            .iter()
            .filter(|(_, entry)| entry.lock().block.previous_hash != head_hash)
            .map(|(hash, _)| *hash)
            .collect();

        if stale.is_empty() {
            return;
        }

        let mut proposals = self.proposals.write();
        for hash in &stale {
            proposals.remove(hash);
        }
        debug!(count = stale.len(), "pruned stale proposals");
    }
}
