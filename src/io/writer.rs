//! Capture file writers: classic pcap (µs and ns) and pcapng, encoded by
//! pcap-parser. Size limits, offsets and compression are handled here.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use pcap_parser::pcap::{LegacyPcapBlock, PcapHeader};
use pcap_parser::pcapng::{
    EnhancedPacketBlock, InterfaceDescriptionBlock, OptionCode, PcapNGOption, SectionHeaderBlock,
    BOM_MAGIC, EPB_MAGIC, IDB_MAGIC, SHB_MAGIC,
};
use pcap_parser::{Linktype, ToVec};

use super::decompress::{Compression, FileEncoder};
use super::pcap_stream::{linktype, FileFormat};
use super::reader::{Encapsulation, RecordHeader};
use crate::error::{WriteError, WriteErrorKind};

/// Sink for records being saved.
pub trait CaptureWriter {
    /// Append a record; returns the offset it was written at in the
    /// uncompressed output.
    fn write(&mut self, header: &RecordHeader, data: &[u8]) -> Result<u64, WriteError>;

    /// Number of records written so far.
    fn records_written(&self) -> u64;

    /// Flush, finish compression, and close the file.
    fn finish(self: Box<Self>) -> Result<(), WriteError>;
}

/// Parameters for [`open_writer`].
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub format: FileFormat,
    pub encapsulation: Encapsulation,
    pub snaplen: u32,
    pub compression: Compression,
    /// Records with a larger captured length are rejected
    pub max_packet_size: u32,
}

/// Create `path` and return a writer for the requested format.
pub fn open_writer<P: AsRef<Path>>(
    path: P,
    options: &WriteOptions,
) -> Result<Box<dyn CaptureWriter>, WriteError> {
    let path = path.as_ref();
    if !options.compression.can_write() {
        return Err(WriteError::new(path, WriteErrorKind::CompressionNotSupported));
    }
    if options.encapsulation == Encapsulation::PerPacket
        && !options.format.supports_per_packet_encap()
    {
        return Err(WriteError::new(path, WriteErrorKind::UnwritableEncapsulation));
    }

    let file = File::create(path)
        .map_err(|e| WriteError::new(path, WriteErrorKind::CantCreate(e.kind())))?;
    let out = FileEncoder::new(file, options.compression)
        .ok_or_else(|| WriteError::new(path, WriteErrorKind::CompressionNotSupported))?
        .map_err(|e| WriteError::new(path, WriteErrorKind::CantOpen(e.kind())))?;

    let sink = CountingSink {
        path: path.to_path_buf(),
        out,
        written: 0,
    };

    tracing::debug!(
        path = %path.display(),
        format = %options.format,
        compression = %options.compression,
        "opening capture writer"
    );

    let writer: Box<dyn CaptureWriter> = match options.format {
        FileFormat::Pcap | FileFormat::PcapNsec => {
            Box::new(ClassicWriter::new(sink, options)?)
        }
        FileFormat::PcapNg => Box::new(NgWriter::new(sink, options)?),
    };
    Ok(writer)
}

struct CountingSink {
    path: PathBuf,
    out: FileEncoder,
    written: u64,
}

impl CountingSink {
    fn put(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
        self.out
            .write_all(bytes)
            .map_err(|e| WriteError::from_io(&self.path, &e))?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn close(self) -> Result<(), WriteError> {
        let path = self.path;
        self.out
            .finish()
            .map_err(|e| WriteError::new(&path, WriteErrorKind::CantClose(e.kind())))
    }
}

fn check_size(sink: &CountingSink, header: &RecordHeader, max: u32, index: u64) -> Result<(), WriteError> {
    if header.caplen > max {
        return Err(WriteError::new(
            &sink.path,
            WriteErrorKind::PacketTooLarge {
                frame: index,
                len: header.caplen,
            },
        ));
    }
    Ok(())
}

fn split_timestamp(ns: i64) -> (i64, i64) {
    (ns.div_euclid(1_000_000_000), ns.rem_euclid(1_000_000_000))
}

/// Serialize one block. pcap-parser fixes up magic numbers, lengths and
/// option padding before encoding.
fn encode<T: ToVec>(sink: &CountingSink, block: &mut T) -> Result<Vec<u8>, WriteError> {
    block.to_vec().map_err(|e| {
        tracing::debug!(path = %sink.path.display(), "block serialization failed: {e:?}");
        WriteError::new(&sink.path, WriteErrorKind::UnwritableRecordType)
    })
}

/// Classic pcap, always little-endian.
struct ClassicWriter {
    sink: CountingSink,
    nanosecond: bool,
    link_type: u32,
    max_packet_size: u32,
    records: u64,
}

impl ClassicWriter {
    fn new(mut sink: CountingSink, options: &WriteOptions) -> Result<Self, WriteError> {
        let nanosecond = options.format == FileFormat::PcapNsec;
        let link_type = match options.encapsulation {
            Encapsulation::Single(lt) => lt,
            Encapsulation::Unknown => linktype::ETHERNET,
            Encapsulation::PerPacket => {
                return Err(WriteError::new(
                    &sink.path,
                    WriteErrorKind::UnwritableEncapsulation,
                ))
            }
        };

        let mut header = PcapHeader {
            magic_number: if nanosecond { 0xa1b2_3c4d } else { 0xa1b2_c3d4 },
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: options.snaplen,
            network: Linktype(link_type as i32),
        };
        let bytes = encode(&sink, &mut header)?;
        sink.put(&bytes)?;

        Ok(Self {
            sink,
            nanosecond,
            link_type,
            max_packet_size: options.max_packet_size,
            records: 0,
        })
    }
}

impl CaptureWriter for ClassicWriter {
    fn write(&mut self, header: &RecordHeader, data: &[u8]) -> Result<u64, WriteError> {
        check_size(&self.sink, header, self.max_packet_size, self.records + 1)?;
        if header.encap != self.link_type {
            return Err(WriteError::new(
                &self.sink.path,
                WriteErrorKind::UnwritableEncapsulation,
            ));
        }

        let (secs, frac_ns) = split_timestamp(header.timestamp_ns);
        let frac = if self.nanosecond { frac_ns } else { frac_ns / 1_000 };
        let caplen = data.len() as u32;
        let mut block = LegacyPcapBlock {
            ts_sec: secs as u32,
            ts_usec: frac as u32,
            caplen,
            origlen: header.orig_len.max(caplen),
            data,
        };
        let bytes = encode(&self.sink, &mut block)?;

        let offset = self.sink.written;
        self.sink.put(&bytes)?;
        self.records += 1;
        Ok(offset)
    }

    fn records_written(&self) -> u64 {
        self.records
    }

    fn finish(self: Box<Self>) -> Result<(), WriteError> {
        self.sink.close()
    }
}

/// Nanosecond resolution, as a power of ten.
const NG_TSRESOL: u8 = 9;

fn comment_option(comment: &str) -> PcapNGOption<'_> {
    PcapNGOption {
        code: OptionCode::Comment,
        len: comment.len() as u16,
        value: Cow::Borrowed(comment.as_bytes()),
    }
}

/// pcapng, little-endian, one interface per distinct link type, nanosecond
/// timestamps.
struct NgWriter {
    sink: CountingSink,
    snaplen: u32,
    max_packet_size: u32,
    interfaces: HashMap<u32, u32>,
    records: u64,
}

impl NgWriter {
    fn new(mut sink: CountingSink, options: &WriteOptions) -> Result<Self, WriteError> {
        let mut shb = SectionHeaderBlock {
            block_type: SHB_MAGIC,
            block_len1: 0,
            bom: BOM_MAGIC,
            major_version: 1,
            minor_version: 0,
            section_len: -1,
            options: Vec::new(),
            block_len2: 0,
        };
        let bytes = encode(&sink, &mut shb)?;
        sink.put(&bytes)?;

        let mut writer = Self {
            sink,
            snaplen: options.snaplen,
            max_packet_size: options.max_packet_size,
            interfaces: HashMap::new(),
            records: 0,
        };
        if let Encapsulation::Single(lt) = options.encapsulation {
            writer.interface_for(lt)?;
        }
        Ok(writer)
    }

    fn interface_for(&mut self, link_type: u32) -> Result<u32, WriteError> {
        if let Some(id) = self.interfaces.get(&link_type) {
            return Ok(*id);
        }
        let id = self.interfaces.len() as u32;

        let mut idb = InterfaceDescriptionBlock {
            block_type: IDB_MAGIC,
            block_len1: 0,
            linktype: Linktype(link_type as i32),
            reserved: 0,
            snaplen: self.snaplen,
            options: Vec::new(),
            block_len2: 0,
            if_tsresol: NG_TSRESOL,
            if_tsoffset: 0,
        };
        let bytes = encode(&self.sink, &mut idb)?;
        self.sink.put(&bytes)?;

        self.interfaces.insert(link_type, id);
        Ok(id)
    }
}

impl CaptureWriter for NgWriter {
    fn write(&mut self, header: &RecordHeader, data: &[u8]) -> Result<u64, WriteError> {
        check_size(&self.sink, header, self.max_packet_size, self.records + 1)?;
        let if_id = self.interface_for(header.encap)?;

        let ts = header.timestamp_ns.max(0) as u64;
        let caplen = data.len() as u32;
        let mut epb = EnhancedPacketBlock {
            block_type: EPB_MAGIC,
            block_len1: 0,
            if_id,
            ts_high: (ts >> 32) as u32,
            ts_low: ts as u32,
            caplen,
            origlen: header.orig_len.max(caplen),
            data,
            options: header.comments.iter().map(|c| comment_option(c)).collect(),
            block_len2: 0,
        };
        let bytes = encode(&self.sink, &mut epb)?;

        let offset = self.sink.written;
        self.sink.put(&bytes)?;
        self.records += 1;
        Ok(offset)
    }

    fn records_written(&self) -> u64 {
        self.records
    }

    fn finish(self: Box<Self>) -> Result<(), WriteError> {
        self.sink.close()
    }
}

/// Copy `from` to `to` byte for byte.
pub fn copy_file(from: &Path, to: &Path) -> io::Result<u64> {
    let mut src = File::open(from)?;
    let mut dst = File::create(to)?;
    let n = io::copy(&mut src, &mut dst)?;
    dst.sync_all()?;
    Ok(n)
}
