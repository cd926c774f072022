//! Saving and exporting.
//!
//! A save picks one of three strategies. When nothing about the file would
//! change, a temporary file is moved into place and a permanent one is
//! copied. Anything else re-encodes every frame through a writer. Whenever
//! the destination already exists the new content goes to a sibling
//! `name~` first and is renamed over the destination only once complete.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::range::PacketRange;
use super::{CaptureFile, Outcome};
use crate::error::{Error, ReadError, RenameError, WriteError, WriteErrorKind};
use crate::events::CaptureEvent;
use crate::io::{copy_file, open_writer, CaptureReader, Compression, FileFormat, PcapFileReader, RecordHeader, WriteOptions};

/// Parameters of [`CaptureFile::save_records`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    pub format: FileFormat,
    pub compression: Compression,
    /// Drop every packet comment from the output and from memory
    pub discard_comments: bool,
    /// Switch the open file over to the saved one
    pub reopen: bool,
}

impl SaveOptions {
    pub fn new(format: FileFormat) -> Self {
        Self {
            format,
            compression: Compression::None,
            discard_comments: false,
            reopen: true,
        }
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn discard_comments(mut self, discard: bool) -> Self {
        self.discard_comments = discard;
        self
    }

    pub fn reopen(mut self, reopen: bool) -> Self {
        self.reopen = reopen;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveStrategy {
    Move,
    Copy,
    Reencode,
}

/// Sibling path a safe save writes to first.
fn tilde_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("~");
    PathBuf::from(name)
}

/// Whether the open file has to follow the saved one. The source of a move
/// is gone even when the move fell back to copy and delete, and a
/// rewritten source has new offsets.
fn must_reopen(options: &SaveOptions, overwriting_source: bool, chosen: SaveStrategy) -> bool {
    options.reopen || overwriting_source || chosen == SaveStrategy::Move
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn discard_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "could not remove partial output: {e}");
        }
    }
}

/// Copy `from` over `to`, going through `to~` when `to` exists.
fn safe_copy(from: &Path, to: &Path) -> Result<(), Error> {
    if !to.exists() {
        copy_file(from, to).map_err(|e| {
            discard_partial(to);
            WriteError::from_io(to, &e)
        })?;
        return Ok(());
    }
    let staging = tilde_path(to);
    copy_file(from, &staging).map_err(|e| {
        discard_partial(&staging);
        WriteError::from_io(&staging, &e)
    })?;
    fs::rename(&staging, to).map_err(|e| {
        discard_partial(&staging);
        RenameError::new(&staging, to, &e)
    })?;
    Ok(())
}

impl CaptureFile {
    /// Save every frame to `path`.
    pub fn save_records<P: AsRef<Path>>(&mut self, path: P, options: &SaveOptions) -> Result<Outcome, Error> {
        self.require_open()?;
        let dest = path.as_ref().to_path_buf();
        self.events.fire(CaptureEvent::SaveStarted { path: dest.clone() });

        let result = self.save_inner(&dest, options);
        match &result {
            Ok(Outcome::Completed) => {
                tracing::info!(path = %dest.display(), format = %options.format, "capture file saved");
                self.events.fire(CaptureEvent::SaveFinished { path: dest });
            }
            Ok(Outcome::Aborted) => {
                tracing::info!(path = %dest.display(), "save cancelled");
                self.events.fire(CaptureEvent::SaveFailed { path: dest });
            }
            Err(e) => {
                tracing::warn!(path = %dest.display(), "save failed: {e}");
                self.events.fire(CaptureEvent::SaveFailed { path: dest });
            }
        }
        result
    }

    fn save_strategy(&self, options: &SaveOptions) -> SaveStrategy {
        let unchanged = self.format == Some(options.format)
            && self.compression == options.compression
            && !options.discard_comments
            && !self.unsaved_changes;
        match (unchanged, self.is_tempfile) {
            (false, _) => SaveStrategy::Reencode,
            (true, true) => SaveStrategy::Move,
            (true, false) => SaveStrategy::Copy,
        }
    }

    fn save_inner(&mut self, dest: &Path, options: &SaveOptions) -> Result<Outcome, Error> {
        let source = self.path.clone().ok_or(Error::NoFileOpen)?;
        let overwriting_source = same_file(&source, dest);
        let chosen = self.save_strategy(options);
        let mut strategy = chosen;
        tracing::debug!(?strategy, overwriting_source, "saving capture file");

        match strategy {
            SaveStrategy::Move if !overwriting_source => match fs::rename(&source, dest) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                    tracing::debug!("rename crosses file systems, copying instead");
                    safe_copy(&source, dest)?;
                    discard_partial(&source);
                    strategy = SaveStrategy::Copy;
                }
                Err(e) => return Err(RenameError::new(&source, dest, &e).into()),
            },
            SaveStrategy::Copy if !overwriting_source => safe_copy(&source, dest)?,
            SaveStrategy::Move | SaveStrategy::Copy => {}
            SaveStrategy::Reencode => {
                let outcome = self.write_safely(
                    dest,
                    &PacketRange::all(),
                    options.format,
                    options.compression,
                    options.discard_comments,
                    "Saving",
                )?;
                if outcome.is_aborted() {
                    return Ok(outcome);
                }
            }
        }

        if options.discard_comments {
            self.frames.discard_comments();
        }

        if !must_reopen(options, overwriting_source, chosen) {
            return Ok(Outcome::Completed);
        }
        match strategy {
            SaveStrategy::Move | SaveStrategy::Copy => self.rebind_identical(dest)?,
            SaveStrategy::Reencode => {
                if self.rescan_file(dest, options.format)?.is_aborted() {
                    return Ok(Outcome::Aborted);
                }
                self.format = Some(options.format);
                self.compression = options.compression;
                self.frames.commit_user_comments();
            }
        }
        self.unsaved_changes = false;
        Ok(Outcome::Completed)
    }

    /// Write the frames of `range` to `dest` through `dest~` when `dest`
    /// exists. On failure or cancel nothing is left behind.
    fn write_safely(
        &mut self,
        dest: &Path,
        range: &PacketRange,
        format: FileFormat,
        compression: Compression,
        discard_comments: bool,
        task: &str,
    ) -> Result<Outcome, Error> {
        let target = if dest.exists() { tilde_path(dest) } else { dest.to_path_buf() };
        let outcome = match self.write_frames(&target, range, format, compression, discard_comments, task) {
            Ok(outcome) => outcome,
            Err(e) => {
                discard_partial(&target);
                return Err(e);
            }
        };
        if outcome.is_aborted() {
            discard_partial(&target);
            return Ok(outcome);
        }
        if target != dest {
            fs::rename(&target, dest).map_err(|e| {
                discard_partial(&target);
                RenameError::new(&target, dest, &e)
            })?;
        }
        Ok(Outcome::Completed)
    }

    /// Re-encode the frames of `range` into a new file at `path`.
    fn write_frames(
        &mut self,
        path: &Path,
        range: &PacketRange,
        format: FileFormat,
        compression: Compression,
        discard_comments: bool,
        task: &str,
    ) -> Result<Outcome, Error> {
        let options = WriteOptions {
            format,
            encapsulation: self.encapsulation,
            snaplen: self.snaplen,
            compression,
            max_packet_size: self.prefs.max_packet_size,
        };
        let mut writer = open_writer(path, &options)?;

        let outcome = self.process_specified_records(range, task, |cf, frame, record| {
            let comments = if discard_comments {
                Vec::new()
            } else {
                cf.frames.comments(frame.num).into_iter().map(str::to_string).collect()
            };
            let header = RecordHeader {
                timestamp_ns: frame.abs_ts,
                caplen: record.header.caplen,
                orig_len: frame.original_len,
                encap: frame.encap,
                interface_id: frame.interface_id,
                comments,
            };
            writer
                .write(&header, &record.data)
                .map(|_| ())
                .map_err(|mut e| {
                    // The writer counts its own records; report the frame.
                    if let WriteErrorKind::PacketTooLarge { len, .. } = e.kind {
                        e.kind = WriteErrorKind::PacketTooLarge {
                            frame: frame.num,
                            len,
                        };
                    }
                    Error::Write(e)
                })
        });

        let written = writer.records_written();
        // Always close the output so the file handle is released.
        let closed = writer.finish();
        let outcome = outcome?;
        closed?;
        tracing::debug!(path = %path.display(), written, "frames written");
        Ok(outcome)
    }

    /// Export the frames of `range`. The open file is not affected.
    pub fn export_specified_packets<P: AsRef<Path>>(
        &mut self,
        path: P,
        range: &PacketRange,
        format: FileFormat,
        compression: Compression,
    ) -> Result<Outcome, Error> {
        self.require_open()?;
        let dest = path.as_ref().to_path_buf();
        if self.path.as_deref().is_some_and(|p| same_file(p, &dest)) {
            // Exporting over the open file would pull the records out from
            // under it.
            return Err(WriteError::new(&dest, WriteErrorKind::CantCreate(io::ErrorKind::AlreadyExists)).into());
        }
        self.events.fire(CaptureEvent::ExportStarted { path: dest.clone() });

        let result = self.write_safely(&dest, range, format, compression, false, "Exporting");
        match &result {
            Ok(Outcome::Completed) => {
                tracing::info!(path = %dest.display(), %range, "frames exported");
                self.events.fire(CaptureEvent::ExportFinished { path: dest });
            }
            Ok(Outcome::Aborted) | Err(_) => {
                self.events.fire(CaptureEvent::ExportFailed { path: dest });
            }
        }
        result
    }

    /// Point the open file at a byte-identical copy of itself.
    fn rebind_identical(&mut self, path: &Path) -> Result<(), Error> {
        let mut reader = PcapFileReader::open(path, self.format)?;
        reader.close_sequential();
        self.reader = Some(Box::new(reader));
        self.path = Some(path.to_path_buf());
        self.is_tempfile = false;
        self.source = None;
        Ok(())
    }

    /// Switch to a freshly written copy of the frames, picking up the new
    /// record offsets without dissecting anything.
    ///
    /// A cancelled pass closes the file, since the frames would point at
    /// the wrong records.
    fn rescan_file(&mut self, path: &Path, format: FileFormat) -> Result<Outcome, Error> {
        let mut reader = PcapFileReader::open(path, Some(format))?;
        let count = self.frames.len();
        let file_size = reader.file_size().unwrap_or(0);
        let mut gate = self.progress_gate("Rescanning");
        let mut offsets = Vec::with_capacity(count as usize);

        for num in 1..=count {
            if self.stop.is_set() {
                self.stop.clear();
                gate.finish(self.reporter.as_mut());
                tracing::warn!("offset rescan cancelled, closing the capture file");
                self.close();
                return Ok(Outcome::Aborted);
            }
            if file_size > 0 {
                let position = reader.position();
                gate.tick(self.reporter.as_mut(), position as f32 / file_size as f32, || {
                    format!("{num} of {count} frames")
                });
            }
            let record = reader
                .read_next()
                .map_err(|e| e.at_frame(num))?
                .ok_or_else(|| ReadError::short_read().at_frame(num))?;
            offsets.push(record.offset);
        }
        gate.finish(self.reporter.as_mut());
        reader.close_sequential();

        // Only a complete pass may touch the index.
        for (num, offset) in (1..=count).zip(offsets) {
            if let Some(frame) = self.frames.get_mut(num) {
                frame.offset = offset;
            }
        }

        if self.is_tempfile {
            if let Some(old) = self.path.as_deref().filter(|old| *old != path) {
                discard_partial(old);
            }
        }
        self.reader = Some(Box::new(reader));
        self.path = Some(path.to_path_buf());
        self.is_tempfile = false;
        self.source = None;
        Ok(Outcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tilde_path() {
        assert_eq!(tilde_path(Path::new("/tmp/a.pcap")), PathBuf::from("/tmp/a.pcap~"));
    }

    #[test]
    fn test_safe_copy_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"new contents").unwrap();
        fs::write(&dst, b"old").unwrap();
        safe_copy(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"new contents");
        assert!(!tilde_path(&dst).exists());
    }

    #[test]
    fn test_move_always_reopens() {
        let keep_old = SaveOptions::new(FileFormat::Pcap).reopen(false);
        assert!(must_reopen(&keep_old, false, SaveStrategy::Move));
        assert!(must_reopen(&keep_old, true, SaveStrategy::Copy));
        assert!(!must_reopen(&keep_old, false, SaveStrategy::Copy));
        assert!(!must_reopen(&keep_old, false, SaveStrategy::Reencode));
        assert!(must_reopen(&SaveOptions::new(FileFormat::Pcap), false, SaveStrategy::Reencode));
    }

    fn write_records(path: &Path, format: FileFormat, count: u32) {
        let options = WriteOptions {
            format,
            encapsulation: crate::io::Encapsulation::Single(1),
            snaplen: 65535,
            compression: Compression::None,
            max_packet_size: 262_144,
        };
        let mut w = open_writer(path, &options).unwrap();
        for i in 0..count {
            let header = RecordHeader {
                timestamp_ns: i64::from(i) * 1_000_000_000,
                caplen: 20,
                orig_len: 20,
                encap: 1,
                interface_id: None,
                comments: Vec::new(),
            };
            w.write(&header, &[0u8; 20]).unwrap();
        }
        w.finish().unwrap();
    }

    #[test]
    fn test_short_rescan_keeps_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("a.pcap");
        let short = dir.path().join("b.pcapng");
        write_records(&original, FileFormat::Pcap, 3);
        write_records(&short, FileFormat::PcapNg, 2);

        let mut cf = CaptureFile::new(crate::config::Preferences::default());
        cf.open(&original, None).unwrap();
        cf.read(false).unwrap();
        let before: Vec<u64> = (1..=3).map(|n| cf.frames.get(n).unwrap().offset).collect();

        assert!(cf.rescan_file(&short, FileFormat::PcapNg).is_err());
        let after: Vec<u64> = (1..=3).map(|n| cf.frames.get(n).unwrap().offset).collect();
        assert_eq!(before, after);
        assert_eq!(cf.path(), Some(original.as_path()));
    }

    #[test]
    fn test_options_builder() {
        let opts = SaveOptions::new(FileFormat::PcapNg)
            .discard_comments(true)
            .reopen(false);
        assert_eq!(opts.compression, Compression::None);
        assert!(opts.discard_comments);
        assert!(!opts.reopen);
    }
}
