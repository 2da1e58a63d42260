//! # Events Module
//!
//! Observable progress stream for the surrounding application.
//!
//! ## Design
//! Every long-running operation (scan, backup pass, re-clustering) takes an
//! [`EventSender`] and reports counts through it. UI layers subscribe to the
//! receiving end instead of polling the store.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         if let Event::Index(IndexEvent::Progress(p)) = event {
//!             println!("{} done, {} left, {} errors", p.processed, p.remaining, p.errored);
//!         }
//!     }
//! });
//!
//! let result = pipeline.run_with_events(&store, &sender)?;
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
