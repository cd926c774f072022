//! Command-line interface module.
//!
//! This module handles:
//! - Argument parsing via clap
//! - Interactive REPL via rustyline
//! - Terminal output: packet lists, hex dumps and progress bars

mod args;
mod output;
mod repl;

pub use args::{parse_search, Args};
pub use output::{
    format_timestamp, hexdump, install_interrupt_handler, print_file_info, print_packet_detail,
    print_packet_list, print_protocol_stats, IndicatifReporter,
};
pub use repl::{Repl, ReplCommand, ReplInput};
