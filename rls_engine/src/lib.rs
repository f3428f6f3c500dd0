//! RLSGuard Engine: static and live checks for Postgres row level security.
//!
//! Two independent pipelines share one report model:
//!
//! - **Static analysis** ([`engine::AnalysisEngine`]): scans SQL migration
//!   files, folds the DDL into a schema model and runs naming, constraint,
//!   index and RLS rules over it in parallel.
//! - **Live harness** ([`harness::Orchestrator`]): connects to a database,
//!   seeds per-scenario fixtures and probes every table as simulated
//!   identities to prove that isolation actually holds.
//!
//! Both produce a [`types::Report`] rendered by [`reporter`].

pub mod checkers;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod harness;
pub mod reporter;
pub mod scanner;
pub mod schema;
pub mod sql_lexer;
pub mod types;
