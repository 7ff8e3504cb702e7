//! # Stockpile
//!
//! Background data-movement pipeline for a multi-tenant inventory: exports of
//! the registries into XML archives, archive uploads, and step-wise restores
//! back into the database, run by worker pools under per-user concurrency
//! limits.

pub mod archive;
pub mod auth;
pub mod concurrency;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod handlers;
pub mod import;
pub mod models;
pub mod repositories;
pub mod restore;
pub mod security;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod workers;
pub use migration;

#[cfg(test)]
mod testing;
