//! Packet summary export: one line of columns per frame.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

use super::range::PacketRange;
use super::{CaptureFile, Outcome};
use crate::dissect::{ColumnId, Columns};
use crate::error::{Error, WriteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryFormat {
    /// Aligned plain text
    #[default]
    Text,
    Csv,
    /// One JSON array of objects
    Json,
}

impl FromStr for SummaryFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(SummaryFormat::Text),
            "csv" => Ok(SummaryFormat::Csv),
            "json" => Ok(SummaryFormat::Json),
            other => Err(format!("unknown summary format: {other}")),
        }
    }
}

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    number: u64,
    time: &'a str,
    source: &'a str,
    destination: &'a str,
    protocol: &'a str,
    length: &'a str,
    info: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
}

impl<'a> SummaryRow<'a> {
    fn new(number: u64, columns: &'a Columns, comment: Option<String>) -> Self {
        Self {
            number,
            time: &columns.time,
            source: &columns.source,
            destination: &columns.destination,
            protocol: &columns.protocol,
            length: &columns.length,
            info: &columns.info,
            comment,
        }
    }
}

/// Render one text line. Also used by the CLI listing.
pub fn format_text_line(columns: &Columns) -> String {
    format!(
        "{:>6} {:>12} {:<39} {:<39} {:<8} {:>6} {}",
        columns.number,
        columns.time,
        columns.source,
        columns.destination,
        columns.protocol,
        columns.length,
        columns.info
    )
}

fn text_header() -> String {
    let title = |id: ColumnId| id.title();
    format!(
        "{:>6} {:>12} {:<39} {:<39} {:<8} {:>6} {}",
        title(ColumnId::Number),
        title(ColumnId::Time),
        title(ColumnId::Source),
        title(ColumnId::Destination),
        title(ColumnId::Protocol),
        title(ColumnId::Length),
        title(ColumnId::Info)
    )
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl CaptureFile {
    /// Write the summary columns of the frames in `range` to `path`.
    pub fn export_summary<P: AsRef<Path>>(
        &mut self,
        path: P,
        range: &PacketRange,
        format: SummaryFormat,
    ) -> Result<Outcome, Error> {
        let path = path.as_ref();
        let io_err = |e: std::io::Error| Error::Write(WriteError::from_io(path, &e));
        let file = File::create(path).map_err(io_err)?;
        let mut out = BufWriter::new(file);

        match format {
            SummaryFormat::Text => writeln!(out, "{}", text_header()).map_err(io_err)?,
            SummaryFormat::Csv => {
                let titles: Vec<&str> = ColumnId::ALL.iter().map(|c| c.title()).collect();
                writeln!(out, "{}", titles.join(",")).map_err(io_err)?;
            }
            SummaryFormat::Json => out.write_all(b"[").map_err(io_err)?,
        }

        let mut first = true;
        let outcome = self.process_specified_records(range, "Printing", |cf, frame, record| {
            let dissection = cf.dissect_throwaway(frame.num, &record.data, false, true)?;
            let columns = dissection
                .columns
                .unwrap_or_else(|| Columns::for_frame(&CaptureFile::frame_context(frame)));
            match format {
                SummaryFormat::Text => writeln!(out, "{}", format_text_line(&columns)).map_err(io_err)?,
                SummaryFormat::Csv => {
                    let fields: Vec<String> = ColumnId::ALL
                        .iter()
                        .map(|id| csv_field(columns.get(*id)))
                        .collect();
                    writeln!(out, "{}", fields.join(",")).map_err(io_err)?;
                }
                SummaryFormat::Json => {
                    if !first {
                        out.write_all(b",").map_err(io_err)?;
                    }
                    let row = SummaryRow::new(frame.num, &columns, cf.comment(frame.num));
                    serde_json::to_writer(&mut out, &row)
                        .map_err(|e| io_err(std::io::Error::other(e)))?;
                }
            }
            first = false;
            Ok(())
        })?;

        if format == SummaryFormat::Json {
            out.write_all(b"]\n").map_err(io_err)?;
        }
        out.flush().map_err(io_err)?;
        tracing::debug!(path = %path.display(), ?format, "summary written");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_summary_format_names() {
        assert_eq!("CSV".parse::<SummaryFormat>().unwrap(), SummaryFormat::Csv);
        assert_eq!("json".parse::<SummaryFormat>().unwrap(), SummaryFormat::Json);
        assert!("xml".parse::<SummaryFormat>().is_err());
    }

    #[test]
    fn test_json_row_skips_missing_comment() {
        let columns = Columns {
            number: "1".into(),
            protocol: "UDP".into(),
            ..Default::default()
        };
        let row = SummaryRow::new(1, &columns, None);
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("\"protocol\":\"UDP\""));
        assert!(!json.contains("comment"));
    }
}
