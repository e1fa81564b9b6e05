//! Facebook Ads → B2Cor lead synchronization.
//!
//! Pulls leads captured by Facebook lead forms into timestamped staging files
//! and pushes them into the B2Cor CRM, optionally on a recurring schedule.
//!
//! # Modules
//!
//! - `core`: Pipeline components (extractor, sender, retention, scheduler, orchestrator).
//! - `integrations`: External service clients (Facebook Graph API, B2Cor).
//! - `obs`: Logging setup.
//! - `b2cor_client`: B2Cor CRM client.
//! - `config`: Persisted configuration and runtime settings.
//! - `contact`: E-mail and phone validation.
//! - `credentials`: Credential lifecycle (verify / interactive obtain).
//! - `errors`: Error handling types.
//! - `extractor`: Lead extraction into staging files.
//! - `facebook_client`: Facebook Graph API client.
//! - `models`: Lead records, selections, delivery tallies.
//! - `orchestrator`: End-to-end operations used by the CLI.
//! - `prompts`: Interactive terminal prompts.
//! - `retention`: Staging file retention sweep.
//! - `scheduler`: Recurring job state machine and polling loop.
//! - `sender`: Lead delivery to the CRM.
//! - `staging`: Staging file format and atomic publish.

pub mod core;
pub mod integrations;
pub mod obs;

pub mod b2cor_client;
pub mod config;
pub mod contact;
pub mod credentials;
pub mod delivery_ledger;
pub mod errors;
pub mod extractor;
pub mod facebook_client;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod retention;
pub mod scheduler;
pub mod sender;
pub mod staging;
