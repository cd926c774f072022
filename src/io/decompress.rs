//! Compression detection and transparent (de)compression of capture files.
//!
//! Reading supports every format compiled in; writing supports gzip always
//! and zstd/lz4 when their features are enabled. bzip2 and xz are
//! read-only.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// Detected compression format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// No compression
    None,
    /// Gzip (.gz)
    Gzip,
    /// Zstandard (.zst)
    #[cfg(feature = "compress-zstd")]
    Zstd,
    /// LZ4 frame format (.lz4)
    #[cfg(feature = "compress-lz4")]
    Lz4,
    /// Bzip2 (.bz2)
    #[cfg(feature = "compress-bzip2")]
    Bzip2,
    /// XZ/LZMA (.xz)
    #[cfg(feature = "compress-xz")]
    Xz,
}

impl Compression {
    /// Detect compression format from magic bytes.
    pub fn detect(data: &[u8]) -> Self {
        if data.len() < 6 {
            return Compression::None;
        }

        match data {
            [0x1f, 0x8b, ..] => Compression::Gzip,

            #[cfg(feature = "compress-zstd")]
            [0x28, 0xb5, 0x2f, 0xfd, ..] => Compression::Zstd,

            #[cfg(feature = "compress-lz4")]
            [0x04, 0x22, 0x4d, 0x18, ..] => Compression::Lz4,

            #[cfg(feature = "compress-bzip2")]
            [0x42, 0x5a, 0x68, ..] => Compression::Bzip2,

            #[cfg(feature = "compress-xz")]
            [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00, ..] => Compression::Xz,

            _ => Compression::None,
        }
    }

    /// Parse a name as accepted on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(Compression::None),
            "gzip" | "gz" => Some(Compression::Gzip),
            #[cfg(feature = "compress-zstd")]
            "zstd" | "zst" => Some(Compression::Zstd),
            #[cfg(feature = "compress-lz4")]
            "lz4" => Some(Compression::Lz4),
            #[cfg(feature = "compress-bzip2")]
            "bzip2" | "bz2" => Some(Compression::Bzip2),
            #[cfg(feature = "compress-xz")]
            "xz" => Some(Compression::Xz),
            _ => None,
        }
    }

    /// Get the typical file extension for this compression format.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gz"),
            #[cfg(feature = "compress-zstd")]
            Compression::Zstd => Some("zst"),
            #[cfg(feature = "compress-lz4")]
            Compression::Lz4 => Some("lz4"),
            #[cfg(feature = "compress-bzip2")]
            Compression::Bzip2 => Some("bz2"),
            #[cfg(feature = "compress-xz")]
            Compression::Xz => Some("xz"),
        }
    }

    pub fn is_compressed(&self) -> bool {
        !matches!(self, Compression::None)
    }

    /// Whether an encoder exists for this format.
    pub fn can_write(&self) -> bool {
        match self {
            Compression::None | Compression::Gzip => true,
            #[cfg(feature = "compress-zstd")]
            Compression::Zstd => true,
            #[cfg(feature = "compress-lz4")]
            Compression::Lz4 => true,
            #[cfg(feature = "compress-bzip2")]
            Compression::Bzip2 => false,
            #[cfg(feature = "compress-xz")]
            Compression::Xz => false,
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            #[cfg(feature = "compress-zstd")]
            Compression::Zstd => write!(f, "zstd"),
            #[cfg(feature = "compress-lz4")]
            Compression::Lz4 => write!(f, "lz4"),
            #[cfg(feature = "compress-bzip2")]
            Compression::Bzip2 => write!(f, "bzip2"),
            #[cfg(feature = "compress-xz")]
            Compression::Xz => write!(f, "xz"),
        }
    }
}

/// File-based decoder over every compiled-in compression format.
pub enum FileDecoder {
    /// No compression - direct file access
    None(File),

    Gzip(GzDecoder<File>),

    #[cfg(feature = "compress-zstd")]
    Zstd(zstd::Decoder<'static, io::BufReader<File>>),

    #[cfg(feature = "compress-lz4")]
    Lz4(lz4_flex::frame::FrameDecoder<File>),

    #[cfg(feature = "compress-bzip2")]
    Bzip2(bzip2::read::BzDecoder<File>),

    #[cfg(feature = "compress-xz")]
    Xz(xz2::read::XzDecoder<File>),
}

impl FileDecoder {
    /// Create a decoder for the given file with explicit compression format.
    pub fn new(file: File, compression: Compression) -> io::Result<Self> {
        match compression {
            Compression::None => Ok(FileDecoder::None(file)),

            Compression::Gzip => Ok(FileDecoder::Gzip(GzDecoder::new(file))),

            #[cfg(feature = "compress-zstd")]
            Compression::Zstd => Ok(FileDecoder::Zstd(zstd::Decoder::new(file)?)),

            #[cfg(feature = "compress-lz4")]
            Compression::Lz4 => Ok(FileDecoder::Lz4(lz4_flex::frame::FrameDecoder::new(file))),

            #[cfg(feature = "compress-bzip2")]
            Compression::Bzip2 => Ok(FileDecoder::Bzip2(bzip2::read::BzDecoder::new(file))),

            #[cfg(feature = "compress-xz")]
            Compression::Xz => Ok(FileDecoder::Xz(xz2::read::XzDecoder::new(file))),
        }
    }

    pub fn compression(&self) -> Compression {
        match self {
            FileDecoder::None(_) => Compression::None,
            FileDecoder::Gzip(_) => Compression::Gzip,
            #[cfg(feature = "compress-zstd")]
            FileDecoder::Zstd(_) => Compression::Zstd,
            #[cfg(feature = "compress-lz4")]
            FileDecoder::Lz4(_) => Compression::Lz4,
            #[cfg(feature = "compress-bzip2")]
            FileDecoder::Bzip2(_) => Compression::Bzip2,
            #[cfg(feature = "compress-xz")]
            FileDecoder::Xz(_) => Compression::Xz,
        }
    }
}

impl Read for FileDecoder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileDecoder::None(r) => r.read(buf),
            FileDecoder::Gzip(r) => r.read(buf),
            #[cfg(feature = "compress-zstd")]
            FileDecoder::Zstd(r) => r.read(buf),
            #[cfg(feature = "compress-lz4")]
            FileDecoder::Lz4(r) => r.read(buf),
            #[cfg(feature = "compress-bzip2")]
            FileDecoder::Bzip2(r) => r.read(buf),
            #[cfg(feature = "compress-xz")]
            FileDecoder::Xz(r) => r.read(buf),
        }
    }
}

/// File-based encoder for the writable compression formats.
pub enum FileEncoder {
    None(BufWriter<File>),

    Gzip(GzEncoder<BufWriter<File>>),

    #[cfg(feature = "compress-zstd")]
    Zstd(zstd::Encoder<'static, BufWriter<File>>),

    #[cfg(feature = "compress-lz4")]
    Lz4(lz4_flex::frame::FrameEncoder<BufWriter<File>>),
}

impl FileEncoder {
    /// Returns `None` when `compression` has no encoder.
    pub fn new(file: File, compression: Compression) -> Option<io::Result<Self>> {
        let out = BufWriter::new(file);
        match compression {
            Compression::None => Some(Ok(FileEncoder::None(out))),
            Compression::Gzip => Some(Ok(FileEncoder::Gzip(GzEncoder::new(
                out,
                flate2::Compression::default(),
            )))),
            #[cfg(feature = "compress-zstd")]
            Compression::Zstd => Some(zstd::Encoder::new(out, 0).map(FileEncoder::Zstd)),
            #[cfg(feature = "compress-lz4")]
            Compression::Lz4 => Some(Ok(FileEncoder::Lz4(
                lz4_flex::frame::FrameEncoder::new(out),
            ))),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Flush all buffered and compressed data to disk.
    pub fn finish(self) -> io::Result<()> {
        let mut out = match self {
            FileEncoder::None(w) => w,
            FileEncoder::Gzip(w) => w.finish()?,
            #[cfg(feature = "compress-zstd")]
            FileEncoder::Zstd(w) => w.finish()?,
            #[cfg(feature = "compress-lz4")]
            FileEncoder::Lz4(w) => w.finish().map_err(io::Error::other)?,
        };
        out.flush()?;
        out.get_ref().sync_all()
    }
}

impl Write for FileEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileEncoder::None(w) => w.write(buf),
            FileEncoder::Gzip(w) => w.write(buf),
            #[cfg(feature = "compress-zstd")]
            FileEncoder::Zstd(w) => w.write(buf),
            #[cfg(feature = "compress-lz4")]
            FileEncoder::Lz4(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileEncoder::None(w) => w.flush(),
            FileEncoder::Gzip(w) => w.flush(),
            #[cfg(feature = "compress-zstd")]
            FileEncoder::Zstd(w) => w.flush(),
            #[cfg(feature = "compress-lz4")]
            FileEncoder::Lz4(w) => w.flush(),
        }
    }
}
