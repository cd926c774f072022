//! Capture file I/O.
//!
//! Reading goes through the [`CaptureReader`] trait so the pipeline can be
//! driven by any record source; [`PcapFileReader`] is the implementation
//! for classic pcap and pcapng files on disk. Writing goes through
//! [`CaptureWriter`], created by [`open_writer`].
//!
//! ## Compression Support
//!
//! Compressed input is decompressed transparently. Supported formats (via
//! feature flags):
//! - Gzip (.gz) - always enabled, readable and writable
//! - Zstd (.zst) - `compress-zstd` feature, readable and writable
//! - LZ4 (.lz4) - `compress-lz4` feature, readable and writable
//! - Bzip2 (.bz2) - `compress-bzip2` feature, read-only
//! - XZ (.xz) - `compress-xz` feature, read-only

mod decompress;
mod merge;
mod pcap_stream;
mod reader;
mod writer;

pub use decompress::{Compression, FileDecoder, FileEncoder};
pub use merge::{merge_captures, total_input_size, MergeMode, MergeProgress};
pub use pcap_stream::{linktype, FileFormat, InterfaceInfo};
pub use reader::{CaptureReader, Encapsulation, PcapFileReader, Record, RecordHeader};
pub use writer::{copy_file, open_writer, CaptureWriter, WriteOptions};
