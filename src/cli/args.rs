//! Command-line argument definitions.

use std::path::PathBuf;

use clap::Parser;

use crate::capture::{ByteEncoding, SearchKind, SummaryFormat, TextPattern};
use crate::error::Error;
use crate::io::{Compression, FileFormat};

fn parse_format(s: &str) -> Result<FileFormat, String> {
    FileFormat::from_name(s).ok_or_else(|| format!("unknown capture format '{s}' (pcap, pcap-ns, pcapng)"))
}

fn parse_compression(s: &str) -> Result<Compression, String> {
    Compression::from_name(s).ok_or_else(|| format!("unknown compression '{s}'"))
}

/// Open, filter, search and save capture files.
#[derive(Parser, Debug)]
#[command(name = "capfile")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Capture file to open
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Filter applied while reading; rejected packets are dropped
    #[arg(short = 'R', long = "read-filter", value_name = "FILTER")]
    pub read_filter: Option<String>,

    /// Display filter
    #[arg(short = 'Y', long = "display-filter", value_name = "FILTER")]
    pub display_filter: Option<String>,

    /// Dissect every packet again after reading
    #[arg(long)]
    pub redissect: bool,

    /// Select this packet number
    #[arg(long, value_name = "N")]
    pub goto: Option<u64>,

    /// Search for a packet: string, wide, summary, tree, hex, regex,
    /// filter, marked or reftime, as KIND:VALUE
    #[arg(long, value_name = "KIND:VALUE")]
    pub find: Option<String>,

    /// Search backward instead of forward
    #[arg(long)]
    pub backward: bool,

    /// Stop at the end of the file instead of wrapping around
    #[arg(long = "no-wrap")]
    pub no_wrap: bool,

    /// Match search text case-sensitively
    #[arg(long = "case-sensitive")]
    pub case_sensitive: bool,

    /// Save all packets to this file
    #[arg(short = 'w', long = "write", value_name = "OUT")]
    pub write: Option<PathBuf>,

    /// Output capture format
    #[arg(short = 'F', long = "format", value_parser = parse_format, default_value = "pcapng")]
    pub format: FileFormat,

    /// Compress the output (gzip, and zstd/lz4/bzip2/xz when built in)
    #[arg(long, value_parser = parse_compression, value_name = "METHOD")]
    pub compress: Option<Compression>,

    /// Leave packet comments out of the saved file
    #[arg(long = "discard-comments")]
    pub discard_comments: bool,

    /// Export a range of packets to this file
    #[arg(long, value_name = "OUT")]
    pub export: Option<PathBuf>,

    /// Packets to export: all, displayed, marked, marked-range or "1-5,9,12-"
    #[arg(long, value_name = "RANGE", default_value = "displayed")]
    pub range: String,

    /// Write the packet summary lines to this file
    #[arg(long, value_name = "OUT")]
    pub summary: Option<PathBuf>,

    /// Format of the summary file
    #[arg(long = "summary-format", default_value = "text")]
    pub summary_format: SummaryFormat,

    /// Merge input files: OUT IN...
    #[arg(long, num_args = 2.., value_names = ["OUT", "IN"])]
    pub merge: Option<Vec<PathBuf>>,

    /// Concatenate merge inputs instead of interleaving them by time
    #[arg(long)]
    pub append: bool,

    /// Preferences file (JSON)
    #[arg(long, value_name = "FILE")]
    pub prefs: Option<PathBuf>,

    /// Show progress bars for long operations
    #[arg(long)]
    pub progress: bool,

    /// Start an interactive session
    #[arg(short = 'i', long)]
    pub interactive: bool,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Whether any action besides listing packets was requested.
    pub fn has_action(&self) -> bool {
        self.goto.is_some()
            || self.find.is_some()
            || self.write.is_some()
            || self.export.is_some()
            || self.summary.is_some()
            || self.interactive
    }

    /// Merge output and inputs, if `--merge` was given.
    pub fn merge_paths(&self) -> Option<(PathBuf, Vec<PathBuf>)> {
        let paths = self.merge.as_ref()?;
        let (output, inputs) = paths.split_first()?;
        Some((output.clone(), inputs.to_vec()))
    }
}

/// Parse a search request of the form `KIND:VALUE`.
pub fn parse_search(request: &str, case_sensitive: bool) -> Result<SearchKind, Error> {
    let (kind, value) = request.split_once(':').unwrap_or((request, ""));
    match kind.to_ascii_lowercase().as_str() {
        "string" | "str" => Ok(SearchKind::string(value, ByteEncoding::Narrow)),
        "wide" => Ok(SearchKind::string(value, ByteEncoding::Wide)),
        "any" => Ok(SearchKind::string(value, ByteEncoding::NarrowAndWide)),
        "summary" => Ok(SearchKind::Summary(TextPattern::plain(value))),
        "tree" => Ok(SearchKind::Tree(TextPattern::plain(value))),
        "tree-regex" => Ok(SearchKind::Tree(TextPattern::regex(value, case_sensitive)?)),
        "hex" => SearchKind::hex(value),
        "regex" => SearchKind::bytes_regex(value),
        "filter" => SearchKind::filter(value),
        "marked" => Ok(SearchKind::Marked),
        "reftime" => Ok(SearchKind::TimeRef),
        other => Err(Error::InvalidPattern {
            pattern: request.to_string(),
            reason: format!("unknown search kind '{other}'"),
        }),
    }
}
