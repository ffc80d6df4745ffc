//! ConsentChain - a permissioned ledger core for consent and audit records
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`ledger`] - Hash-linked block chain, admission checks and queries
//! - [`transaction`] - Transaction types and structural validation
//! - [`merkle`] - Merkle tree, inclusion proofs and batch verification
//!
//! ## Consensus
//! - [`consensus`] - Quorum voting, finalization and chain reconciliation
//!
//! ## Cryptography
//! - [`crypto`] - SHA-256 digests and canonical encoding
//!
//! ## State Management
//! - [`persistence`] - Chain snapshot backends (in-memory, JSON file)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod ledger;
pub mod merkle;
pub mod transaction;

// ============================================================================
// Consensus
// ============================================================================
pub mod consensus;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
