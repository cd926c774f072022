//! capfile - capture file lifecycle for a packet analyzer.
//!
//! A [`capture::CaptureFile`] owns one open pcap or pcapng file and the
//! per-frame index built while reading it. On top of that index it
//! filters, rescans, searches, saves, exports and merges, reporting
//! progress and honoring a cooperative stop flag.
//!
//! # Example
//!
//! ```no_run
//! use capfile::capture::CaptureFile;
//! use capfile::config::Preferences;
//!
//! fn main() -> capfile::Result<()> {
//!     let mut cf = CaptureFile::new(Preferences::default());
//!     cf.open("capture.pcapng", None)?;
//!     cf.read(false)?;
//!     cf.filter_packets("udp", false)?;
//!     println!("{} of {} packets displayed", cf.displayed_count(), cf.count());
//!     Ok(())
//! }
//! ```

pub mod capture;
pub mod cli;
pub mod config;
pub mod dissect;
pub mod error;
pub mod events;
pub mod filter;
pub mod frame;
pub mod io;
pub mod progress;

pub use error::{Error, Result};
