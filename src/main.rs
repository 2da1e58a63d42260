//! # photo-archive CLI
//!
//! Command-line interface for the photo archive.
//!
//! ## Usage
//! ```bash
//! photo-archive scan ~/Photos
//! photo-archive duplicates --threshold 6 --json
//! photo-archive backup --destination /mnt/backup
//! ```

mod cli;

use photo_archive::Result;

fn main() -> Result<()> {
    photo_archive::init_tracing();
    cli::run()
}
