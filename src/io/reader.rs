//! Sequential and random-access capture file reading.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::decompress::{Compression, FileDecoder};
use super::pcap_stream::{
    detect_format, parse_classic_header, parse_classic_record, parse_ng_block,
    read_classic_record, read_exact_or_eof, read_ng_block, FileFormat, InterfaceInfo,
    ParsedBlock, RawPacket, PCAP_HEADER_LEN,
};
use crate::error::{OpenError, OpenErrorKind, ReadError};

/// Buffer size for sequential reads.
const BUFFER_SIZE: usize = 256 * 1024;

/// Link-layer type of a whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encapsulation {
    /// Not known yet (pcapng before its first interface block)
    Unknown,
    /// Every record has this link type
    Single(u32),
    /// Records have different link types
    PerPacket,
}

impl Encapsulation {
    /// Fold a set of observed per-record link types into one value.
    pub fn from_types<I: IntoIterator<Item = u32>>(types: I) -> Self {
        let mut result = Encapsulation::Unknown;
        for t in types {
            result = match result {
                Encapsulation::Unknown => Encapsulation::Single(t),
                Encapsulation::Single(cur) if cur == t => result,
                _ => Encapsulation::PerPacket,
            };
        }
        result
    }
}

/// Per-record metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// Absolute time in nanoseconds since the Unix epoch
    pub timestamp_ns: i64,
    pub caplen: u32,
    pub orig_len: u32,
    /// Link-layer type of this record
    pub encap: u32,
    pub interface_id: Option<u32>,
    /// Comments stored in the file with this record
    pub comments: Vec<String>,
}

/// One record read from a capture file.
#[derive(Debug, Clone)]
pub struct Record {
    pub header: RecordHeader,
    pub data: Bytes,
    /// Location of the record, usable with [`CaptureReader::seek_read`]
    pub offset: u64,
}

/// Access to the records of a capture file.
///
/// Sequential reading never consumes a partial record, so a reader over a
/// file that is still being written can be polled again after a short read.
pub trait CaptureReader {
    /// Next record, or `None` at the end of the data currently available.
    fn read_next(&mut self) -> Result<Option<Record>, ReadError>;

    /// Re-read the record at `offset`. Works after `close_sequential`.
    fn seek_read(&mut self, offset: u64) -> Result<Record, ReadError>;

    fn file_size(&self) -> Option<u64>;

    /// Offset the next sequential read starts at.
    fn position(&self) -> u64;

    /// Release resources only needed for sequential reading.
    fn close_sequential(&mut self);

    fn format(&self) -> FileFormat;

    fn compression(&self) -> Compression;

    fn snaplen(&self) -> Option<u32>;

    fn encapsulation(&self) -> Encapsulation;

    fn interfaces(&self) -> &[InterfaceInfo];
}

#[derive(Debug, Clone, Copy)]
struct Section {
    offset: u64,
    big_endian: bool,
    iface_base: u32,
}

enum SequentialSource {
    Plain(BufReader<File>),
    Compressed(BufReader<FileDecoder>),
}

impl SequentialSource {
    fn reader(&mut self) -> &mut dyn Read {
        match self {
            SequentialSource::Plain(r) => r,
            SequentialSource::Compressed(r) => r,
        }
    }
}

/// Reader for classic pcap and pcapng files, optionally compressed.
pub struct PcapFileReader {
    path: PathBuf,
    format: FileFormat,
    compression: Compression,
    file_size: Option<u64>,
    /// Byte order of a classic pcap file
    big_endian: bool,
    snaplen: Option<u32>,
    sequential: Option<SequentialSource>,
    next_offset: u64,
    random: Option<File>,
    sections: Vec<Section>,
    interfaces: Vec<InterfaceInfo>,
}

impl std::fmt::Debug for PcapFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcapFileReader")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("compression", &self.compression)
            .field("next_offset", &self.next_offset)
            .finish()
    }
}

fn classify_metadata(path: &Path) -> Result<fs::Metadata, OpenError> {
    let meta = fs::metadata(path).map_err(|e| OpenError::from_io(path, &e))?;
    if meta.is_file() {
        return Ok(meta);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if meta.file_type().is_fifo() {
            return Err(OpenError::new(path, OpenErrorKind::PipeUnsupported));
        }
    }
    Err(OpenError::new(path, OpenErrorKind::NotRegularFile))
}

fn open_decoder(path: &Path, compression: Compression) -> io::Result<FileDecoder> {
    FileDecoder::new(File::open(path)?, compression)
}

impl PcapFileReader {
    /// Open `path`, detecting compression and capture format.
    ///
    /// With a `type_hint`, only that format is accepted.
    pub fn open<P: AsRef<Path>>(path: P, type_hint: Option<FileFormat>) -> Result<Self, OpenError> {
        let path = path.as_ref();
        let meta = classify_metadata(path)?;

        let mut file = File::open(path).map_err(|e| OpenError::from_io(path, &e))?;
        let mut magic = [0u8; 6];
        let n = file
            .read(&mut magic)
            .map_err(|e| OpenError::from_io(path, &e))?;
        let compression = Compression::detect(&magic[..n]);
        file.seek(SeekFrom::Start(0))
            .map_err(|e| OpenError::from_io(path, &e))?;

        let decompress_err = |e: io::Error| {
            if compression.is_compressed() {
                OpenError::new(path, OpenErrorKind::Decompress).with_detail(e.to_string())
            } else {
                OpenError::from_io(path, &e)
            }
        };

        let mut source = if compression.is_compressed() {
            let decoder = FileDecoder::new(file, compression).map_err(decompress_err)?;
            SequentialSource::Compressed(BufReader::with_capacity(BUFFER_SIZE, decoder))
        } else {
            SequentialSource::Plain(BufReader::with_capacity(BUFFER_SIZE, file))
        };

        // Enough for the pcapng byte-order magic.
        let mut head = [0u8; 12];
        let got = {
            let reader = source.reader();
            let mut filled = 0;
            while filled < head.len() {
                match reader.read(&mut head[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(decompress_err(e)),
                }
            }
            filled
        };

        let (format, big_endian) = detect_format(&head[..got])
            .ok_or_else(|| OpenError::new(path, OpenErrorKind::UnknownFormat))?;
        if let Some(hint) = type_hint {
            if hint != format {
                return Err(OpenError::new(path, OpenErrorKind::UnknownFormat)
                    .with_detail(format!("expected {hint}, found {format}")));
            }
        }

        let mut reader = Self {
            path: path.to_path_buf(),
            format,
            compression,
            file_size: Some(meta.len()),
            big_endian,
            snaplen: None,
            sequential: None,
            next_offset: 0,
            random: None,
            sections: Vec::new(),
            interfaces: Vec::new(),
        };

        let header_err = |e: ReadError| {
            let kind = match e.kind {
                crate::error::ReadErrorKind::ShortRead => OpenErrorKind::ShortRead,
                crate::error::ReadErrorKind::Decompress => OpenErrorKind::Decompress,
                _ => OpenErrorKind::BadFile,
            };
            let err = OpenError::new(path, kind);
            match e.detail {
                Some(d) => err.with_detail(d),
                None => err,
            }
        };

        if format.is_pcapng() {
            // The section header goes through the same framing as every
            // other block; the bytes already consumed are replayed first.
            let mut framed = io::Cursor::new(head[..got].to_vec()).chain(source.reader());
            let raw = read_ng_block(&mut framed, big_endian)
                .map_err(header_err)?
                .ok_or_else(|| OpenError::new(path, OpenErrorKind::ShortRead))?;
            match parse_ng_block(&raw, big_endian).map_err(header_err)? {
                ParsedBlock::Section { big_endian } => reader.sections.push(Section {
                    offset: 0,
                    big_endian,
                    iface_base: 0,
                }),
                _ => return Err(OpenError::new(path, OpenErrorKind::BadFile)),
            }
            reader.next_offset = raw.len() as u64;
        } else {
            let mut header = [0u8; PCAP_HEADER_LEN];
            header[..got].copy_from_slice(&head[..got]);
            if got < head.len() {
                return Err(OpenError::new(path, OpenErrorKind::ShortRead));
            }
            let complete = read_exact_or_eof(source.reader(), &mut header[got..])
                .map_err(header_err)?;
            if !complete {
                return Err(OpenError::new(path, OpenErrorKind::ShortRead));
            }
            let info = parse_classic_header(&header).map_err(header_err)?;
            let tsresol = if format == FileFormat::PcapNsec { 9 } else { 6 };
            reader.snaplen = Some(info.snaplen).filter(|s| *s != 0);
            reader
                .interfaces
                .push(InterfaceInfo::new(info.link_type, info.snaplen, tsresol));
            reader.next_offset = PCAP_HEADER_LEN as u64;
        }

        reader.sequential = Some(source);
        tracing::debug!(
            path = %path.display(),
            %format,
            %compression,
            "opened capture file"
        );
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn section_at(&self, offset: u64) -> Option<Section> {
        self.sections
            .iter()
            .rev()
            .find(|s| s.offset <= offset)
            .copied()
    }

    fn current_section(&self) -> Option<Section> {
        self.sections.last().copied()
    }

    fn to_record(&self, packet: RawPacket, section: Option<Section>, offset: u64) -> Result<Record, ReadError> {
        let (iface_index, interface_id) = match (packet.interface_id, section) {
            (Some(id), Some(s)) => (s.iface_base as usize + id as usize, Some(id)),
            _ => (0, None),
        };
        let iface = self.interfaces.get(iface_index).ok_or_else(|| {
            ReadError::bad_file(format!(
                "record refers to interface {}, which was never described",
                packet.interface_id.unwrap_or(0)
            ))
        })?;

        let timestamp_ns = match (packet.classic_ts, packet.ticks) {
            (Some((secs, frac)), _) => {
                let frac_ns = if self.format == FileFormat::PcapNsec {
                    i64::from(frac)
                } else {
                    i64::from(frac) * 1_000
                };
                i64::from(secs) * 1_000_000_000 + frac_ns
            }
            (None, Some(ticks)) => iface.ticks_to_ns(ticks),
            (None, None) => 0,
        };

        Ok(Record {
            header: RecordHeader {
                timestamp_ns,
                caplen: packet.caplen,
                orig_len: packet.orig_len,
                encap: iface.link_type,
                interface_id,
                comments: packet.comments,
            },
            data: packet.data,
            offset,
        })
    }

    /// Read one block or record from `source`, without interpreting it.
    fn read_raw(&self, source: &mut dyn Read, big_endian: bool) -> Result<Option<Vec<u8>>, ReadError> {
        if self.format.is_pcapng() {
            read_ng_block(source, big_endian)
        } else {
            read_classic_record(source, big_endian)
        }
    }

    fn random_source(&mut self, offset: u64) -> Result<Box<dyn Read + '_>, ReadError> {
        if self.compression.is_compressed() {
            let mut decoder = open_decoder(&self.path, self.compression)?;
            let skipped = io::copy(&mut (&mut decoder).take(offset), &mut io::sink())?;
            if skipped < offset {
                return Err(ReadError::short_read());
            }
            return Ok(Box::new(decoder));
        }
        if self.random.is_none() {
            self.random = Some(File::open(&self.path)?);
        }
        let file = self
            .random
            .as_mut()
            .ok_or_else(|| ReadError::bad_file("random access handle unavailable"))?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(Box::new(file))
    }

    /// Return the sequential cursor to the start of an incomplete record.
    fn rewind_partial(&mut self) {
        let offset = self.next_offset;
        if let Some(SequentialSource::Plain(reader)) = self.sequential.as_mut() {
            if let Err(e) = reader.seek(SeekFrom::Start(offset)) {
                tracing::warn!("could not rewind to offset {offset}: {e}");
            }
        }
    }
}

impl CaptureReader for PcapFileReader {
    fn read_next(&mut self) -> Result<Option<Record>, ReadError> {
        loop {
            let big_endian = if self.format.is_pcapng() {
                self.current_section().map_or(false, |s| s.big_endian)
            } else {
                self.big_endian
            };
            let mut source = match self.sequential.take() {
                Some(source) => source,
                None => return Ok(None),
            };
            let raw = self.read_raw(source.reader(), big_endian);
            self.sequential = Some(source);

            let raw = match raw {
                Ok(Some(raw)) => raw,
                Ok(None) => return Ok(None),
                Err(e) => {
                    if e.is_short_read() {
                        self.rewind_partial();
                    }
                    return Err(e);
                }
            };

            let offset = self.next_offset;
            self.next_offset += raw.len() as u64;

            if !self.format.is_pcapng() {
                let packet = parse_classic_record(&raw, big_endian)?;
                return self.to_record(packet, None, offset).map(Some);
            }

            match parse_ng_block(&raw, big_endian)? {
                ParsedBlock::Section { big_endian } => {
                    let iface_base = self.interfaces.len() as u32;
                    self.sections.push(Section {
                        offset,
                        big_endian,
                        iface_base,
                    });
                }
                ParsedBlock::Interface(info) => {
                    if self.snaplen.is_none() && info.snaplen != 0 {
                        self.snaplen = Some(info.snaplen);
                    }
                    self.interfaces.push(info);
                }
                ParsedBlock::Packet(packet) => {
                    let section = self.section_at(offset);
                    return self.to_record(packet, section, offset).map(Some);
                }
                ParsedBlock::Other => {}
            }
        }
    }

    fn seek_read(&mut self, offset: u64) -> Result<Record, ReadError> {
        let section = self.section_at(offset);
        let big_endian = match section {
            Some(s) if self.format.is_pcapng() => s.big_endian,
            _ => self.big_endian,
        };
        let format = self.format;
        let raw = {
            let mut source = self.random_source(offset)?;
            if format.is_pcapng() {
                read_ng_block(&mut source, big_endian)?
            } else {
                read_classic_record(&mut source, big_endian)?
            }
        }
        .ok_or_else(ReadError::short_read)?;

        let packet = if format.is_pcapng() {
            match parse_ng_block(&raw, big_endian)? {
                ParsedBlock::Packet(packet) => packet,
                _ => {
                    return Err(ReadError::bad_file(format!(
                        "no packet record at offset {offset}"
                    )))
                }
            }
        } else {
            parse_classic_record(&raw, big_endian)?
        };
        self.to_record(packet, section, offset)
    }

    fn file_size(&self) -> Option<u64> {
        self.file_size
    }

    fn position(&self) -> u64 {
        self.next_offset
    }

    fn close_sequential(&mut self) {
        self.sequential = None;
    }

    fn format(&self) -> FileFormat {
        self.format
    }

    fn compression(&self) -> Compression {
        self.compression
    }

    fn snaplen(&self) -> Option<u32> {
        self.snaplen
    }

    fn encapsulation(&self) -> Encapsulation {
        Encapsulation::from_types(self.interfaces.iter().map(|i| i.link_type))
    }

    fn interfaces(&self) -> &[InterfaceInfo] {
        &self.interfaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn pcap_bytes(records: &[&[u8]]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&[0xd4, 0xc3, 0xb2, 0xa1, 2, 0, 4, 0]);
        data.extend_from_slice(&[0u8; 8]);
        data.extend_from_slice(&65535u32.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        for (i, payload) in records.iter().enumerate() {
            data.extend_from_slice(&(100 + i as u32).to_le_bytes());
            data.extend_from_slice(&250u32.to_le_bytes());
            data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            data.extend_from_slice(payload);
        }
        data
    }

    fn temp_with(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_sequential_and_random_access() {
        let file = temp_with(&pcap_bytes(&[b"first", b"second"]));
        let mut reader = PcapFileReader::open(file.path(), None).unwrap();
        assert_eq!(reader.format(), FileFormat::Pcap);
        assert_eq!(reader.encapsulation(), Encapsulation::Single(1));

        let first = reader.read_next().unwrap().unwrap();
        let second = reader.read_next().unwrap().unwrap();
        assert!(reader.read_next().unwrap().is_none());

        assert_eq!(first.offset, 24);
        assert_eq!(&first.data[..], b"first");
        assert_eq!(first.header.timestamp_ns, 100_000_250_000);

        reader.close_sequential();
        let again = reader.seek_read(second.offset).unwrap();
        assert_eq!(&again.data[..], b"second");
        let again = reader.seek_read(first.offset).unwrap();
        assert_eq!(&again.data[..], b"first");
    }

    #[test]
    fn test_partial_record_can_be_retried() {
        let full = pcap_bytes(&[b"abcdef"]);
        let mut file = temp_with(&full[..full.len() - 2]);
        let mut reader = PcapFileReader::open(file.path(), None).unwrap();

        let err = reader.read_next().unwrap_err();
        assert!(err.is_short_read());
        assert_eq!(reader.position(), 24);

        file.write_all(&full[full.len() - 2..]).unwrap();
        file.flush().unwrap();
        let rec = reader.read_next().unwrap().unwrap();
        assert_eq!(&rec.data[..], b"abcdef");
    }

    #[test]
    fn test_open_rejects_garbage() {
        let file = temp_with(b"this is not a capture file at all");
        let err = PcapFileReader::open(file.path(), None).unwrap_err();
        assert_eq!(err.kind, OpenErrorKind::UnknownFormat);
    }

    #[test]
    fn test_open_truncated_header() {
        let bytes = pcap_bytes(&[]);
        let file = temp_with(&bytes[..16]);
        let err = PcapFileReader::open(file.path(), None).unwrap_err();
        assert_eq!(err.kind, OpenErrorKind::ShortRead);
    }

    #[test]
    fn test_open_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = PcapFileReader::open(dir.path(), None).unwrap_err();
        assert_eq!(err.kind, OpenErrorKind::NotRegularFile);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PcapFileReader::open(dir.path().join("nope.pcap"), None).unwrap_err();
        assert_eq!(err.kind, OpenErrorKind::CantOpen(io::ErrorKind::NotFound));
    }

    #[test]
    fn test_type_hint_mismatch() {
        let file = temp_with(&pcap_bytes(&[b"x"]));
        let err = PcapFileReader::open(file.path(), Some(FileFormat::PcapNg)).unwrap_err();
        assert_eq!(err.kind, OpenErrorKind::UnknownFormat);
    }

    #[test]
    fn test_encapsulation_from_types() {
        assert_eq!(Encapsulation::from_types([]), Encapsulation::Unknown);
        assert_eq!(Encapsulation::from_types([1, 1]), Encapsulation::Single(1));
        assert_eq!(Encapsulation::from_types([1, 101]), Encapsulation::PerPacket);
    }
}
