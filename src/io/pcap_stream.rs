//! Block-level framing and parsing for classic pcap and pcapng.
//!
//! Framing (how many bytes make up the next record) is done here so that a
//! reader never consumes a partial record; the bytes of a complete record
//! are then handed to `pcap_parser` for decoding.

use std::fmt;
use std::io::{self, Read};

use bytes::Bytes;
use pcap_parser::pcap::{parse_pcap_frame, parse_pcap_frame_be, parse_pcap_header};
use pcap_parser::pcapng::{parse_block_be, parse_block_le, Block};

use crate::error::ReadError;

pub const PCAP_HEADER_LEN: usize = 24;
pub const PCAP_RECORD_HEADER_LEN: usize = 16;

const PCAPNG_SHB_TYPE: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];
const PCAPNG_BOM_LE: [u8; 4] = [0x4d, 0x3c, 0x2b, 0x1a];
const PCAPNG_BOM_BE: [u8; 4] = [0x1a, 0x2b, 0x3c, 0x4d];

/// Sanity limit on the size of one record or block.
pub const MAX_BLOCK_LEN: u32 = 16 * 1024 * 1024;

const OPT_COMMENT: u16 = 1;
const OPT_IF_NAME: u16 = 2;
const OPT_IF_TSRESOL: u16 = 9;

/// Link-layer type numbers used by the built-in dissector and writers.
pub mod linktype {
    pub const NULL: u32 = 0;
    pub const ETHERNET: u32 = 1;
    pub const RAW: u32 = 101;
    pub const IPV4: u32 = 228;
    pub const IPV6: u32 = 229;
}

/// On-disk capture file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    /// Classic pcap, microsecond timestamps
    Pcap,
    /// Classic pcap, nanosecond timestamps
    PcapNsec,
    /// pcapng
    PcapNg,
}

impl FileFormat {
    pub fn name(&self) -> &'static str {
        match self {
            FileFormat::Pcap => "pcap",
            FileFormat::PcapNsec => "pcap-ns",
            FileFormat::PcapNg => "pcapng",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "pcap" | "libpcap" => Some(FileFormat::Pcap),
            "pcap-ns" | "nsecpcap" => Some(FileFormat::PcapNsec),
            "pcapng" | "ng" => Some(FileFormat::PcapNg),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Pcap | FileFormat::PcapNsec => "pcap",
            FileFormat::PcapNg => "pcapng",
        }
    }

    pub fn is_pcapng(&self) -> bool {
        matches!(self, FileFormat::PcapNg)
    }

    /// Whether the format can hold records of different link types.
    pub fn supports_per_packet_encap(&self) -> bool {
        self.is_pcapng()
    }

    /// Whether records can carry comments.
    pub fn supports_comments(&self) -> bool {
        self.is_pcapng()
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identify a capture format from the first bytes of the (decompressed)
/// stream. Returns the format and whether it is big-endian.
///
/// For pcapng the first 12 bytes are needed to see the byte-order magic.
pub fn detect_format(head: &[u8]) -> Option<(FileFormat, bool)> {
    match head {
        [0xd4, 0xc3, 0xb2, 0xa1, ..] => Some((FileFormat::Pcap, false)),
        [0xa1, 0xb2, 0xc3, 0xd4, ..] => Some((FileFormat::Pcap, true)),
        [0x4d, 0x3c, 0xb2, 0xa1, ..] => Some((FileFormat::PcapNsec, false)),
        [0xa1, 0xb2, 0x3c, 0x4d, ..] => Some((FileFormat::PcapNsec, true)),
        [0x0a, 0x0d, 0x0d, 0x0a, _, _, _, _, b0, b1, b2, b3, ..] => {
            match [*b0, *b1, *b2, *b3] {
                PCAPNG_BOM_LE => Some((FileFormat::PcapNg, false)),
                PCAPNG_BOM_BE => Some((FileFormat::PcapNg, true)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Classic pcap global header fields we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcapHeaderInfo {
    pub snaplen: u32,
    pub link_type: u32,
}

pub fn parse_classic_header(bytes: &[u8]) -> Result<PcapHeaderInfo, ReadError> {
    let (_, header) = parse_pcap_header(bytes)
        .map_err(|e| ReadError::bad_file(format!("invalid pcap header: {e:?}")))?;
    Ok(PcapHeaderInfo {
        snaplen: header.snaplen,
        link_type: header.network.0 as u32,
    })
}

/// Description of one capture interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub link_type: u32,
    pub snaplen: u32,
    /// Raw `if_tsresol` value: power of ten, or of two when the top bit is set
    pub tsresol: u8,
    pub name: Option<String>,
}

impl InterfaceInfo {
    pub fn new(link_type: u32, snaplen: u32, tsresol: u8) -> Self {
        Self {
            link_type,
            snaplen,
            tsresol,
            name: None,
        }
    }

    /// Convert a timestamp in this interface's units to nanoseconds.
    pub fn ticks_to_ns(&self, ticks: u64) -> i64 {
        let per_sec: i128 = if self.tsresol & 0x80 == 0 {
            10i128.pow(u32::from(self.tsresol.min(18)))
        } else {
            1i128 << u32::from((self.tsresol & 0x7f).min(62))
        };
        (i128::from(ticks) * 1_000_000_000 / per_sec) as i64
    }
}

/// A decoded block, detached from the buffer it was parsed from.
#[derive(Debug, Clone)]
pub enum ParsedBlock {
    Section { big_endian: bool },
    Interface(InterfaceInfo),
    Packet(RawPacket),
    /// Statistics, name resolution, custom blocks: skipped
    Other,
}

/// A packet record as stored, before timestamp conversion.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub interface_id: Option<u32>,
    /// Seconds/sub-second pair for classic pcap
    pub classic_ts: Option<(u32, u32)>,
    /// Interface ticks for pcapng
    pub ticks: Option<u64>,
    pub caplen: u32,
    pub orig_len: u32,
    pub data: Bytes,
    pub comments: Vec<String>,
}

/// Read `buf.len()` bytes unless the stream ends first; returns bytes read.
fn fill<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the stream was at a
/// clean end before the first byte; a partial read is a short read.
pub fn read_exact_or_eof<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<bool, ReadError> {
    let n = fill(reader, buf)?;
    if n == 0 && !buf.is_empty() {
        Ok(false)
    } else if n < buf.len() {
        Err(ReadError::short_read())
    } else {
        Ok(true)
    }
}

fn read_rest<R: Read + ?Sized>(reader: &mut R, block: &mut Vec<u8>, total: usize) -> Result<(), ReadError> {
    let have = block.len();
    block.resize(total, 0);
    if fill(reader, &mut block[have..])? < total - have {
        return Err(ReadError::short_read());
    }
    Ok(())
}

fn u32_at(bytes: &[u8], big_endian: bool) -> u32 {
    let arr = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if big_endian {
        u32::from_be_bytes(arr)
    } else {
        u32::from_le_bytes(arr)
    }
}

/// Read the raw bytes of the next classic pcap record.
pub fn read_classic_record<R: Read + ?Sized>(
    reader: &mut R,
    big_endian: bool,
) -> Result<Option<Vec<u8>>, ReadError> {
    let mut block = vec![0u8; PCAP_RECORD_HEADER_LEN];
    if !read_exact_or_eof(reader, &mut block)? {
        return Ok(None);
    }
    let caplen = u32_at(&block[8..12], big_endian);
    if caplen > MAX_BLOCK_LEN {
        return Err(ReadError::bad_file(format!(
            "record length {caplen} exceeds the maximum of {MAX_BLOCK_LEN}"
        )));
    }
    read_rest(reader, &mut block, PCAP_RECORD_HEADER_LEN + caplen as usize)?;
    Ok(Some(block))
}

/// Read the raw bytes of the next pcapng block.
///
/// A section header block carries its own byte order; `big_endian` is the
/// byte order of the current section for every other block type.
pub fn read_ng_block<R: Read + ?Sized>(
    reader: &mut R,
    big_endian: bool,
) -> Result<Option<Vec<u8>>, ReadError> {
    let mut block = vec![0u8; 8];
    if !read_exact_or_eof(reader, &mut block)? {
        return Ok(None);
    }

    let mut order = big_endian;
    if block[0..4] == PCAPNG_SHB_TYPE {
        read_rest(reader, &mut block, 12)?;
        order = match [block[8], block[9], block[10], block[11]] {
            PCAPNG_BOM_LE => false,
            PCAPNG_BOM_BE => true,
            _ => return Err(ReadError::bad_file("bad byte-order magic in section header")),
        };
    }

    let total = u32_at(&block[4..8], order);
    if total < 12 || total % 4 != 0 || total > MAX_BLOCK_LEN {
        return Err(ReadError::bad_file(format!("invalid block length {total}")));
    }
    read_rest(reader, &mut block, total as usize)?;
    Ok(Some(block))
}

/// Decode a complete classic pcap record.
pub fn parse_classic_record(bytes: &[u8], big_endian: bool) -> Result<RawPacket, ReadError> {
    let parsed = if big_endian {
        parse_pcap_frame_be(bytes)
    } else {
        parse_pcap_frame(bytes)
    };
    let (_, frame) =
        parsed.map_err(|e| ReadError::bad_file(format!("invalid pcap record: {e:?}")))?;

    Ok(RawPacket {
        interface_id: None,
        classic_ts: Some((frame.ts_sec, frame.ts_usec)),
        ticks: None,
        caplen: frame.caplen,
        orig_len: frame.origlen,
        data: Bytes::copy_from_slice(frame.data),
        comments: Vec::new(),
    })
}

fn option_text(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches('\0')
        .to_string()
}

/// Decode a complete pcapng block.
pub fn parse_ng_block(bytes: &[u8], big_endian: bool) -> Result<ParsedBlock, ReadError> {
    let parsed = if big_endian {
        parse_block_be(bytes)
    } else {
        parse_block_le(bytes)
    };
    let (_, block) =
        parsed.map_err(|e| ReadError::bad_file(format!("invalid pcapng block: {e:?}")))?;

    let parsed = match block {
        Block::SectionHeader(_) => {
            let big_endian = bytes.get(8..12) == Some(&PCAPNG_BOM_BE[..]);
            ParsedBlock::Section { big_endian }
        }
        Block::InterfaceDescription(idb) => {
            let mut info = InterfaceInfo::new(idb.linktype.0 as u32, idb.snaplen, 6);
            for opt in &idb.options {
                let value: &[u8] = &opt.value;
                match opt.code.0 {
                    OPT_IF_TSRESOL if !value.is_empty() => info.tsresol = value[0],
                    OPT_IF_NAME => info.name = Some(option_text(value)),
                    _ => {}
                }
            }
            ParsedBlock::Interface(info)
        }
        Block::EnhancedPacket(epb) => {
            let caplen = epb.caplen.min(epb.data.len() as u32);
            let comments = epb
                .options
                .iter()
                .filter(|opt| opt.code.0 == OPT_COMMENT)
                .map(|opt| {
                    let value: &[u8] = &opt.value;
                    option_text(value)
                })
                .collect();
            ParsedBlock::Packet(RawPacket {
                interface_id: Some(epb.if_id),
                classic_ts: None,
                ticks: Some((u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low)),
                caplen,
                orig_len: epb.origlen,
                data: Bytes::copy_from_slice(&epb.data[..caplen as usize]),
                comments,
            })
        }
        Block::SimplePacket(spb) => {
            let caplen = spb.origlen.min(spb.data.len() as u32);
            ParsedBlock::Packet(RawPacket {
                interface_id: Some(0),
                classic_ts: None,
                ticks: None,
                caplen,
                orig_len: spb.origlen,
                data: Bytes::copy_from_slice(&spb.data[..caplen as usize]),
                comments: Vec::new(),
            })
        }
        _ => ParsedBlock::Other,
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn classic_file() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&[0xd4, 0xc3, 0xb2, 0xa1]);
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&0i32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&65535u32.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());

        let payload = [0xffu8; 14];
        data.extend_from_slice(&1_000_000_000u32.to_le_bytes());
        data.extend_from_slice(&500_000u32.to_le_bytes());
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(&60u32.to_le_bytes());
        data.extend_from_slice(&payload);
        data
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(
            detect_format(&[0xd4, 0xc3, 0xb2, 0xa1]),
            Some((FileFormat::Pcap, false))
        );
        assert_eq!(
            detect_format(&[0xa1, 0xb2, 0xc3, 0xd4]),
            Some((FileFormat::Pcap, true))
        );
        assert_eq!(
            detect_format(&[0x4d, 0x3c, 0xb2, 0xa1]),
            Some((FileFormat::PcapNsec, false))
        );
        let ng = [0x0a, 0x0d, 0x0d, 0x0a, 0x1c, 0, 0, 0, 0x4d, 0x3c, 0x2b, 0x1a];
        assert_eq!(detect_format(&ng), Some((FileFormat::PcapNg, false)));
        assert_eq!(detect_format(&[0xde, 0xad, 0xbe, 0xef]), None);
    }

    #[test]
    fn test_classic_header_and_record() {
        let data = classic_file();
        let header = parse_classic_header(&data[..PCAP_HEADER_LEN]).unwrap();
        assert_eq!(header.snaplen, 65535);
        assert_eq!(header.link_type, linktype::ETHERNET);

        let mut cursor = Cursor::new(&data[PCAP_HEADER_LEN..]);
        let raw = read_classic_record(&mut cursor, false).unwrap().unwrap();
        let packet = parse_classic_record(&raw, false).unwrap();
        assert_eq!(packet.caplen, 14);
        assert_eq!(packet.orig_len, 60);
        assert_eq!(packet.classic_ts, Some((1_000_000_000, 500_000)));

        assert!(read_classic_record(&mut cursor, false).unwrap().is_none());
    }

    #[test]
    fn test_truncated_record_is_short_read() {
        let data = classic_file();
        let cut = &data[PCAP_HEADER_LEN..data.len() - 3];
        let err = read_classic_record(&mut Cursor::new(cut), false).unwrap_err();
        assert!(err.is_short_read());
    }

    #[test]
    fn test_bad_ng_block_length() {
        let block = [6u8, 0, 0, 0, 7, 0, 0, 0];
        let err = read_ng_block(&mut Cursor::new(&block[..]), false).unwrap_err();
        assert_eq!(err.kind, crate::error::ReadErrorKind::BadFile);
    }

    #[test]
    fn test_ticks_to_ns() {
        let micro = InterfaceInfo::new(1, 0, 6);
        assert_eq!(micro.ticks_to_ns(1_500_000), 1_500_000_000);
        let nano = InterfaceInfo::new(1, 0, 9);
        assert_eq!(nano.ticks_to_ns(42), 42);
        let binary = InterfaceInfo::new(1, 0, 0x80 | 10);
        assert_eq!(binary.ticks_to_ns(1024), 1_000_000_000);
    }

    #[test]
    fn test_format_names() {
        assert_eq!(FileFormat::from_name("PCAPNG"), Some(FileFormat::PcapNg));
        assert_eq!(FileFormat::from_name("pcap-ns"), Some(FileFormat::PcapNsec));
        assert_eq!(FileFormat::PcapNsec.to_string(), "pcap-ns");
        assert!(FileFormat::PcapNg.supports_comments());
        assert!(!FileFormat::Pcap.supports_per_packet_encap());
    }
}
