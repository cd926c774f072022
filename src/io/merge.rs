//! Byte-level merge of several capture files into one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::decompress::Compression;
use super::pcap_stream::FileFormat;
use super::reader::{CaptureReader, Encapsulation, PcapFileReader, Record};
use super::writer::{open_writer, WriteOptions};
use crate::error::MergeError;
use crate::progress::Outcome;

/// How records from several inputs are ordered in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Interleave by timestamp; equal timestamps keep input order
    #[default]
    Chronological,
    /// All of the first input, then all of the second, and so on
    Append,
}

/// Where a merge stands, handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeProgress {
    /// Sum of the read positions of every input
    pub combined_offset: u64,
    pub records_written: u64,
}

struct MergeInput {
    index: usize,
    reader: PcapFileReader,
    pending: Option<Record>,
    /// Interface id → link type, as described by this input
    interfaces: HashMap<u32, u32>,
}

impl MergeInput {
    fn advance(&mut self) -> Result<(), MergeError> {
        self.pending = self
            .reader
            .read_next()
            .map_err(|source| MergeError::CantReadInput {
                index: self.index,
                source,
            })?;
        // Interface blocks may appear between packets.
        for (id, info) in self.reader.interfaces().iter().enumerate() {
            self.interfaces.entry(id as u32).or_insert(info.link_type);
        }
        Ok(())
    }

    fn link_type_of(&self, record: &Record) -> Result<u32, MergeError> {
        match record.header.interface_id {
            None => Ok(record.header.encap),
            Some(id) => self
                .interfaces
                .get(&id)
                .copied()
                .ok_or(MergeError::BadInterfaceId {
                    index: self.index,
                    id,
                }),
        }
    }
}

/// Sum of the on-disk sizes of `inputs`, for progress scaling.
pub fn total_input_size(inputs: &[PathBuf]) -> u64 {
    inputs
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

/// Merge `inputs` into `output`.
///
/// `on_record` is called after every record written; returning `false`
/// stops the merge, which then reports [`Outcome::Aborted`] and leaves a
/// partial output behind.
pub fn merge_captures<F>(
    output: &Path,
    inputs: &[PathBuf],
    format: FileFormat,
    mode: MergeMode,
    max_packet_size: u32,
    mut on_record: F,
) -> Result<Outcome, MergeError>
where
    F: FnMut(MergeProgress) -> bool,
{
    let mut sources = Vec::with_capacity(inputs.len());
    for (index, path) in inputs.iter().enumerate() {
        let reader = PcapFileReader::open(path, None)
            .map_err(|source| MergeError::CantOpenInput { index, source })?;
        let mut input = MergeInput {
            index,
            reader,
            pending: None,
            interfaces: HashMap::new(),
        };
        input.advance()?;
        sources.push(input);
    }

    let encapsulation = Encapsulation::from_types(
        sources
            .iter()
            .flat_map(|s| s.reader.interfaces().iter().map(|i| i.link_type))
            .collect::<Vec<_>>(),
    );
    let snaplen = sources
        .iter()
        .filter_map(|s| s.reader.snaplen())
        .max()
        .unwrap_or(max_packet_size);

    let options = WriteOptions {
        format,
        encapsulation,
        snaplen,
        compression: Compression::None,
        max_packet_size,
    };
    let mut writer = open_writer(output, &options).map_err(MergeError::CantOpenOutput)?;
    tracing::info!(
        output = %output.display(),
        inputs = inputs.len(),
        ?mode,
        "merging capture files"
    );

    loop {
        let next = match mode {
            MergeMode::Append => sources.iter().position(|s| s.pending.is_some()),
            MergeMode::Chronological => sources
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.pending.as_ref().map(|r| (i, r.header.timestamp_ns)))
                .min_by_key(|&(i, ts)| (ts, i))
                .map(|(i, _)| i),
        };
        let Some(i) = next else { break };

        let input = &mut sources[i];
        let Some(mut record) = input.pending.take() else {
            break;
        };
        record.header.encap = input.link_type_of(&record)?;
        writer
            .write(&record.header, &record.data)
            .map_err(MergeError::CantWriteOutput)?;
        input.advance()?;

        let progress = MergeProgress {
            combined_offset: sources.iter().map(|s| s.reader.position()).sum(),
            records_written: writer.records_written(),
        };
        if !on_record(progress) {
            writer.finish().map_err(MergeError::CantCloseOutput)?;
            tracing::info!("merge stopped after {} records", progress.records_written);
            return Ok(Outcome::Aborted);
        }
    }

    writer.finish().map_err(MergeError::CantCloseOutput)?;
    Ok(Outcome::Completed)
}
