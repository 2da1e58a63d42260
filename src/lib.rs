//! # Photo Archive
//!
//! Local photo library indexing: exact and near-duplicate detection, face
//! clustering, backup tracking and a reversible trash.
//!
//! ## Core Philosophy
//! - **Never auto-delete** - files only leave the photo tree through the trash
//! - **Rescans are cheap** - unchanged files are never re-read
//! - **Crash-safe** - every committed batch or backed-up record survives a kill
//!
//! ## Architecture
//! - `core` - The archive engine (UI-agnostic)
//! - `config` - Settings and on-disk layout
//! - `events` - Event-driven progress reporting
//! - `error` - Error types with recovery hints

pub mod config;
pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{ArchiveError, Result};

/// Initialize tracing for the library
///
/// This should be called once by the application entry point. `RUST_LOG`
/// controls the filter; a second call is a no-op.
pub fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
