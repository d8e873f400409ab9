//! Integration tests for polywatch-bot.
//!
//! These tests drive the whole pipeline with in-memory collaborators:
//! - ingest from push and poll sources
//! - enrichment through cached, guarded context lookups
//! - detection, alert dedup and delivery

pub mod common;
