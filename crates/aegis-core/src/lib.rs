//! # Aegis Core
//!
//! Metadata store and engines for the Aegis encrypted file vault.
//!
//! This crate provides:
//! - **MetaStore**: the transactional relational store for every entity
//!   record (users, blobs, files, folders, rooms, shares, rotations)
//! - **FileEngine**: upload ingest with ciphertext dedup, quota
//!   accounting, downloads, trash lifecycle, blob garbage collection
//! - **ShareEngine**: tokenised public shares with password-bound key
//!   wrapping, persistent rate limiting, and counted downloads
//! - **KeyRotationEngine**: resumable, rollback-capable envelope key
//!   rotation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              HTTP surface (axum)            │
//! ├──────────────┬──────────────┬───────────────┤
//! │  FileEngine  │ ShareEngine  │ RotationEngine│
//! ├──────────────┴──────────────┴───────────────┤
//! │        MetaStore (sqlx transactions)        │
//! ├─────────────────────────────────────────────┤
//! │   BlobStore (memory / S3)  ·  aegis-crypto  │
//! └─────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod error;
pub mod store;

pub use engine::{
    AccessContext, CreateShareRequest, FileDownload, FileEngine, IngestRequest, KeyRotationEngine,
    PublicShareInfo, RotationProgress, ShareCredential, ShareEngine, ShareGrant, SharedDownload,
};
pub use error::{CoreError, Result};
pub use store::MetaStore;
