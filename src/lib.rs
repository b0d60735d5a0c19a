//! PeerLend Risk Engine Library
//!
//! This library provides the borrower trust and repayment risk engine for
//! the PeerLend marketplace: trust score calculation, the payment retry
//! state machine, the accountability cascade, and the vouch ledger.
//!
//! # Modules
//!
//! - `core`: Core business logic.
//! - `integrations`: External service integrations.
//! - `cascade`: Accountability cascade for defaulted borrowers.
//! - `circuit_breaker`: Circuit breaker for the payments gateway.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `errors`: Error handling types.
//! - `gateway`: Payments gateway client.
//! - `models`: Core data models.
//! - `notifier`: Outbound notification delivery.
//! - `retry_engine`: Payment collection and retry state machine.
//! - `storage`: Persistence trait with Postgres and in-memory backends.
//! - `trust_score`: Trust score calculator.
//! - `vouch_ledger`: Vouch records and the strength formula.

pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod cascade;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod notifier;
pub mod retry_engine;
pub mod storage;
pub mod trust_score;
pub mod vouch_ledger;
