//! media-store - A content-addressable media store
//!
//! This crate accepts uploaded media, classifies and deduplicates it by
//! content, and tracks it in a single unified table, with:
//! - Byte-sniffing type classification with an extension fallback
//! - SHA-256 content addressing and a datastore-enforced uniqueness index
//! - Legacy image/document adapters over the unified table
//! - A transactional legacy-to-unified migration with backup, rollback and
//!   verification
//! - redb embedded database for metadata (ACID, MVCC, crash-safe)
//! - REST API with multipart upload support

pub mod api;
pub mod cas;
pub mod classify;
pub mod config;
pub mod error;
pub mod imaging;
pub mod migration;
pub mod object_store;
pub mod reconcile;
pub mod router;
pub mod service;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use config::Config;
use service::MediaService;
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub media: MediaService,
}
