//! Terminal output: packet listings, hex dumps, progress bars and Ctrl-C.

use std::io::Write;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};

use crate::capture::{format_text_line, CaptureFile};
use crate::dissect::{ColumnId, Columns, ProtocolStats};
use crate::error::Error;
use crate::progress::{ProgressReporter, StopFlag};

/// Progress bar resolution.
const BAR_STEPS: u64 = 1000;

/// [`ProgressReporter`] drawing an indicatif bar on stderr.
#[derive(Default)]
pub struct IndicatifReporter {
    bar: Option<ProgressBar>,
}

impl IndicatifReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for IndicatifReporter {
    fn begin(&mut self, task: &str, item: &str) {
        let bar = ProgressBar::new(BAR_STEPS);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {prefix} [{bar:40.cyan/blue}] {percent}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        bar.set_style(style);
        bar.set_prefix(format!("{task} {item}"));
        self.bar = Some(bar);
    }

    fn update(&mut self, fraction: f32, status: &str) {
        if let Some(bar) = &self.bar {
            bar.set_position((fraction * BAR_STEPS as f32) as u64);
            bar.set_message(status.to_string());
        }
    }

    fn end(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Raise `stop` on Ctrl-C so long operations end early.
pub fn install_interrupt_handler(stop: StopFlag) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        tracing::debug!("interrupt received, stopping");
        stop.stop();
    })
}

/// Classic 16-bytes-per-line hex dump with an ASCII column.
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in data.chunks(16).enumerate() {
        let mut hex = String::with_capacity(49);
        for (j, b) in chunk.iter().enumerate() {
            if j == 8 {
                hex.push(' ');
            }
            hex.push_str(&format!("{b:02x} "));
        }
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        out.push_str(&format!("{:04x}  {hex:<49} {ascii}\n", i * 16));
    }
    out
}

/// Absolute time as UTC with nanoseconds.
pub fn format_timestamp(ns: i64) -> String {
    let secs = ns.div_euclid(1_000_000_000);
    let nanos = ns.rem_euclid(1_000_000_000) as u32;
    match DateTime::<Utc>::from_timestamp(secs, nanos) {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S%.9f UTC").to_string(),
        None => format!("{ns} ns"),
    }
}

fn header_line() -> String {
    let titles: Vec<String> = ColumnId::ALL.iter().map(|c| c.title().to_string()).collect();
    format_text_line(&Columns {
        number: titles[0].clone(),
        time: titles[1].clone(),
        source: titles[2].clone(),
        destination: titles[3].clone(),
        protocol: titles[4].clone(),
        length: titles[5].clone(),
        info: titles[6].clone(),
    })
}

/// Print the summary line of every displayed frame, at most `limit`.
pub fn print_packet_list<W: Write>(cf: &mut CaptureFile, out: &mut W, limit: Option<usize>) -> Result<usize, Error> {
    let displayed: Vec<u64> = cf
        .frames()
        .iter()
        .filter(|f| f.flags.is_displayed())
        .map(|f| f.num)
        .take(limit.unwrap_or(usize::MAX))
        .collect();
    writeln!(out, "{}", header_line())?;
    for num in &displayed {
        let columns = cf.frame_columns(*num)?;
        let marker = if cf.current_frame() == Some(*num) { '>' } else { ' ' };
        writeln!(out, "{marker}{}", format_text_line(&columns))?;
    }
    Ok(displayed.len())
}

/// Print the protocol tree and hex dump of one frame.
pub fn print_packet_detail<W: Write>(cf: &mut CaptureFile, num: u64, out: &mut W) -> Result<(), Error> {
    let dissection = cf.dissect_frame(num)?;
    if let Some(tree) = &dissection.tree {
        write!(out, "{}", tree.render())?;
    }
    if let Some(comment) = cf.comment(num) {
        writeln!(out, "Comment: {comment}")?;
    }
    let data = cf.frame_bytes(num)?;
    writeln!(out)?;
    write!(out, "{}", hexdump(&data))?;
    Ok(())
}

/// Print file-level information.
pub fn print_file_info<W: Write>(cf: &CaptureFile, out: &mut W) -> Result<(), Error> {
    writeln!(out, "File:        {}", cf.display_name())?;
    if let Some(format) = cf.format() {
        writeln!(out, "Format:      {format} ({})", cf.compression())?;
    }
    writeln!(out, "Encap:       {:?}", cf.encapsulation())?;
    writeln!(out, "Snaplen:     {}", cf.snaplen())?;
    writeln!(out, "Packets:     {}", cf.count())?;
    writeln!(out, "Displayed:   {}", cf.displayed_count())?;
    writeln!(out, "Marked:      {}", cf.marked_count())?;
    writeln!(out, "Ignored:     {}", cf.ignored_count())?;
    writeln!(out, "Time refs:   {}", cf.ref_time_count())?;
    writeln!(out, "Comments:    {}", cf.packet_comment_count())?;
    if let Some(drops) = cf.drops() {
        writeln!(out, "Dropped:     {drops}")?;
    }
    let frames = cf.frames();
    if let (Some(first), Some(last)) = (frames.iter().next(), frames.iter().next_back()) {
        writeln!(out, "First:       {}", format_timestamp(first.abs_ts))?;
        writeln!(out, "Last:        {}", format_timestamp(last.abs_ts))?;
    }
    if !cf.display_filter_text().is_empty() {
        writeln!(out, "Filter:      {}", cf.display_filter_text())?;
    }
    if cf.unsaved_changes() {
        writeln!(out, "(unsaved changes)")?;
    }
    Ok(())
}

/// Print a protocol hierarchy table.
pub fn print_protocol_stats<W: Write>(stats: &ProtocolStats, out: &mut W) -> std::io::Result<()> {
    writeln!(out, "{:<12} {:>10} {:>14}", "Protocol", "Frames", "Bytes")?;
    for (name, count) in stats.iter() {
        writeln!(out, "{:<12} {:>10} {:>14}", name, count.frames, count.bytes)?;
    }
    writeln!(out, "{:<12} {:>10}", "total", stats.frames())?;
    Ok(())
}
