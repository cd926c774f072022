//! The capture-file pipeline.
//!
//! [`CaptureFile`] owns everything tied to one open file: the reader, the
//! frame index, the dissection session and the filters. Long operations
//! report through a [`ProgressReporter`] and poll a [`StopFlag`]; lifecycle
//! changes are announced through an [`EventDispatcher`].
//!
//! The operations are split by concern:
//! - `read`: sequential read and live tail
//! - `rescan`: filtering, redissection, retap and time references
//! - `walk`/`range`: the shared range walk
//! - `search`: frame search
//! - `save`, `merge`, `summary`: writing files
//! - `frames`: selection, marks, comments and other per-frame edits

mod frames;
mod merge;
mod range;
mod read;
mod rescan;
mod save;
mod search;
mod summary;
mod walk;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::config::Preferences;
use crate::dissect::{
    default_factory, Dissection, DissectionSession, DissectorFactory, FrameContext, TapRegistry,
};
use crate::error::{Error, ReadError};
use crate::events::{CaptureEvent, EventDispatcher};
use crate::filter::{DisplayFilter, FilterSubject};
use crate::frame::{FrameIndex, FrameRecord, FrameTimeline};
use crate::io::{CaptureReader, Compression, Encapsulation, FileFormat, PcapFileReader, Record};
use crate::progress::{Clock, NullReporter, ProgressGate, ProgressReporter, StopFlag, SystemClock};

pub use crate::progress::Outcome;
pub use range::{PacketRange, RangeDecision, RangeScope};
pub use save::SaveOptions;
pub use search::{ByteEncoding, ByteMatch, SearchDirection, SearchKind, SearchResult, TextPattern};
pub use summary::{format_text_line, SummaryFormat};

/// Lifecycle state of a [`CaptureFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Closed,
    /// Opened, frames are still being read
    ReadInProgress,
    ReadDone,
    /// Reading stopped early on request
    ReadAborted,
}

/// A capture file and the state of its processing pipeline.
pub struct CaptureFile {
    prefs: Preferences,
    state: FileState,
    /// Set only while a read loop runs
    reading: bool,
    /// Set while a redissecting rescan runs
    redissecting: bool,
    path: Option<PathBuf>,
    is_tempfile: bool,
    source: Option<String>,
    reader: Option<Box<dyn CaptureReader>>,
    format: Option<FileFormat>,
    compression: Compression,
    snaplen: u32,
    session: Option<DissectionSession>,
    dissector_factory: DissectorFactory,
    taps: TapRegistry,
    frames: FrameIndex,
    timeline: FrameTimeline,
    dfilter: Option<DisplayFilter>,
    rfilter: Option<DisplayFilter>,
    encap_types: BTreeSet<u32>,
    encapsulation: Encapsulation,
    current_frame: Option<u64>,
    unsaved_changes: bool,
    drops: Option<u64>,
    stop: StopFlag,
    events: EventDispatcher,
    reporter: Box<dyn ProgressReporter>,
    clock: Arc<dyn Clock>,
    search: search::SearchState,
}

impl std::fmt::Debug for CaptureFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureFile")
            .field("state", &self.state)
            .field("path", &self.path)
            .field("count", &self.count())
            .field("displayed", &self.displayed_count())
            .field("dfilter", &self.dfilter.as_ref().map(|f| f.text()))
            .finish()
    }
}

impl Default for CaptureFile {
    fn default() -> Self {
        Self::new(Preferences::default())
    }
}

impl CaptureFile {
    pub fn new(prefs: Preferences) -> Self {
        let events = EventDispatcher::new(prefs.require_listeners);
        Self {
            state: FileState::Closed,
            reading: false,
            redissecting: false,
            path: None,
            is_tempfile: false,
            source: None,
            reader: None,
            format: None,
            compression: Compression::None,
            snaplen: prefs.default_snaplen,
            session: None,
            dissector_factory: default_factory(),
            taps: TapRegistry::new(),
            frames: FrameIndex::new(),
            timeline: FrameTimeline::default(),
            dfilter: None,
            rfilter: None,
            encap_types: BTreeSet::new(),
            encapsulation: Encapsulation::Unknown,
            current_frame: None,
            unsaved_changes: false,
            drops: None,
            stop: StopFlag::new(),
            events,
            reporter: Box::new(NullReporter),
            clock: Arc::new(SystemClock::new()),
            search: search::SearchState::default(),
            prefs,
        }
    }

    // ---------------------------------------------------------------------
    // Collaborators
    // ---------------------------------------------------------------------

    pub fn set_progress_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        self.reporter = reporter;
    }

    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Replace the dissector used by sessions created from now on.
    pub fn set_dissector_factory(&mut self, factory: DissectorFactory) {
        self.dissector_factory = factory;
    }

    pub fn events_mut(&mut self) -> &mut EventDispatcher {
        &mut self.events
    }

    pub fn taps_mut(&mut self) -> &mut TapRegistry {
        &mut self.taps
    }

    pub fn taps(&self) -> &TapRegistry {
        &self.taps
    }

    /// Handle for cancelling long operations from elsewhere.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn prefs(&self) -> &Preferences {
        &self.prefs
    }

    pub fn prefs_mut(&mut self) -> &mut Preferences {
        &mut self.prefs
    }

    // ---------------------------------------------------------------------
    // State queries
    // ---------------------------------------------------------------------

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_tempfile(&self) -> bool {
        self.is_tempfile
    }

    pub fn format(&self) -> Option<FileFormat> {
        self.format
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn snaplen(&self) -> u32 {
        self.snaplen
    }

    pub fn count(&self) -> u64 {
        self.frames.len()
    }

    pub fn displayed_count(&self) -> u64 {
        self.frames.counts().displayed
    }

    pub fn marked_count(&self) -> u64 {
        self.frames.counts().marked
    }

    pub fn ignored_count(&self) -> u64 {
        self.frames.counts().ignored
    }

    pub fn ref_time_count(&self) -> u64 {
        self.frames.counts().ref_time
    }

    pub fn packet_comment_count(&self) -> u64 {
        self.frames.counts().commented
    }

    /// First displayed frame, 0 if none.
    pub fn first_displayed(&self) -> u64 {
        self.frames.first_displayed()
    }

    /// Last displayed frame, 0 if none.
    pub fn last_displayed(&self) -> u64 {
        self.frames.last_displayed()
    }

    pub fn current_frame(&self) -> Option<u64> {
        self.current_frame
    }

    pub fn unsaved_changes(&self) -> bool {
        self.unsaved_changes
    }

    pub fn frame(&self, num: u64) -> Option<&FrameRecord> {
        self.frames.get(num)
    }

    pub fn frames(&self) -> &FrameIndex {
        &self.frames
    }

    /// The file's link-layer type; [`Encapsulation::PerPacket`] once more
    /// than one type has been seen.
    pub fn encapsulation(&self) -> Encapsulation {
        self.encapsulation
    }

    pub fn encapsulation_types(&self) -> &BTreeSet<u32> {
        &self.encap_types
    }

    pub fn display_filter(&self) -> Option<&DisplayFilter> {
        self.dfilter.as_ref()
    }

    /// Text of the active display filter, empty when there is none.
    pub fn display_filter_text(&self) -> &str {
        self.dfilter.as_ref().map_or("", |f| f.text())
    }

    pub fn read_filter(&self) -> Option<&DisplayFilter> {
        self.rfilter.as_ref()
    }

    /// Whether a redissecting rescan is running.
    pub fn is_redissecting(&self) -> bool {
        self.redissecting
    }

    // ---------------------------------------------------------------------
    // Open and close
    // ---------------------------------------------------------------------

    /// Open `path` for reading. The previous file, if any, is closed only
    /// once the new one opened successfully.
    pub fn open<P: AsRef<Path>>(&mut self, path: P, type_hint: Option<FileFormat>) -> Result<(), Error> {
        let path = path.as_ref();
        let reader = PcapFileReader::open(path, type_hint)?;
        self.bind_reader(path, Box::new(reader), false, None);
        Ok(())
    }

    /// Open a temporary file (a live capture or a merge result). It is
    /// deleted on close; `source` describes where it came from.
    pub fn open_temp<P: AsRef<Path>>(&mut self, path: P, source: &str) -> Result<(), Error> {
        let path = path.as_ref();
        let reader = PcapFileReader::open(path, None)?;
        self.bind_reader(path, Box::new(reader), true, Some(source.to_string()));
        Ok(())
    }

    /// Open with an already constructed reader.
    pub fn open_with_reader<P: AsRef<Path>>(&mut self, path: P, reader: Box<dyn CaptureReader>) {
        self.bind_reader(path.as_ref(), reader, false, None);
    }

    fn bind_reader(
        &mut self,
        path: &Path,
        reader: Box<dyn CaptureReader>,
        is_tempfile: bool,
        source: Option<String>,
    ) {
        self.close();

        self.format = Some(reader.format());
        self.compression = reader.compression();
        self.snaplen = reader.snaplen().unwrap_or(self.prefs.default_snaplen);
        self.reader = Some(reader);
        self.path = Some(path.to_path_buf());
        self.is_tempfile = is_tempfile;
        self.source = source;
        self.frames = FrameIndex::new();
        self.timeline = FrameTimeline::default();
        self.session = Some(DissectionSession::new((self.dissector_factory)()));
        self.encap_types.clear();
        self.encapsulation = Encapsulation::Unknown;
        self.unsaved_changes = false;
        self.drops = None;
        self.stop.clear();
        self.state = FileState::ReadInProgress;

        tracing::info!(path = %path.display(), tempfile = is_tempfile, "capture file opened");
        self.events.fire(CaptureEvent::FileOpened {
            path: path.to_path_buf(),
        });
    }

    /// Close the file. Safe to call any number of times.
    ///
    /// # Panics
    ///
    /// If called from inside a read loop.
    pub fn close(&mut self) {
        if self.state == FileState::Closed {
            return;
        }
        assert!(!self.reading, "capture file closed while a read is in progress");

        self.events.fire(CaptureEvent::FileClosing);

        self.reader = None;
        if self.is_tempfile {
            if let Some(path) = self.path.as_deref() {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), "could not remove temporary file: {e}");
                }
            }
        }
        self.session = None;
        self.frames = FrameIndex::new();
        self.timeline = FrameTimeline::default();
        self.taps.reset_all();
        let had_selection = self.current_frame.take().is_some();
        self.path = None;
        self.is_tempfile = false;
        self.source = None;
        self.format = None;
        self.compression = Compression::None;
        self.encap_types.clear();
        self.encapsulation = Encapsulation::Unknown;
        self.unsaved_changes = false;
        self.drops = None;
        self.search = search::SearchState::default();
        self.state = FileState::Closed;

        if had_selection {
            self.events.fire(CaptureEvent::PacketUnselected);
        }
        tracing::debug!("capture file closed");
        self.events.fire(CaptureEvent::FileClosed);
    }

    /// Close and reopen the same file, keeping the display filter.
    pub fn reload(&mut self) -> Result<Outcome, Error> {
        let path = self.path.clone().ok_or(Error::NoFileOpen)?;
        let is_tempfile = self.is_tempfile;
        let source = self.source.clone();
        let hint = self.format;

        self.events.fire(CaptureEvent::ReloadStarted);
        // Keep a temporary file from being deleted by the close.
        self.is_tempfile = false;
        let reader = match PcapFileReader::open(&path, hint) {
            Ok(reader) => reader,
            Err(e) => {
                self.is_tempfile = is_tempfile;
                self.events.fire(CaptureEvent::ReloadFinished);
                return Err(e.into());
            }
        };
        self.bind_reader(&path, Box::new(reader), is_tempfile, source);
        let result = self.read(true);
        self.events.fire(CaptureEvent::ReloadFinished);
        result
    }

    // ---------------------------------------------------------------------
    // Shared helpers
    // ---------------------------------------------------------------------

    fn reader_mut(&mut self) -> Result<&mut (dyn CaptureReader + 'static), Error> {
        self.reader.as_deref_mut().ok_or(Error::NoFileOpen)
    }

    fn require_open(&self) -> Result<(), Error> {
        match self.state {
            FileState::Closed => Err(Error::NoFileOpen),
            _ => Ok(()),
        }
    }

    /// Re-read the bytes of frame `num` from the backing store.
    fn read_frame_record(&mut self, num: u64) -> Result<Record, Error> {
        let offset = self.frames.get(num).ok_or(Error::NoSuchFrame(num))?.offset;
        let reader = self.reader_mut()?;
        reader
            .seek_read(offset)
            .map_err(|e: ReadError| Error::Read(e.at_frame(num)))
    }

    /// Raw captured bytes of frame `num`.
    pub fn frame_bytes(&mut self, num: u64) -> Result<Bytes, Error> {
        self.require_open()?;
        Ok(self.read_frame_record(num)?.data)
    }

    fn frame_context(frame: &FrameRecord) -> FrameContext {
        FrameContext {
            num: frame.num,
            encap: frame.encap,
            abs_ts_ns: frame.abs_ts,
            rel_ts_ns: frame.rel_ts,
            capture_len: frame.capture_len,
            original_len: frame.original_len,
        }
    }

    fn session_mut(&mut self) -> &mut DissectionSession {
        let factory = &self.dissector_factory;
        self.session
            .get_or_insert_with(|| DissectionSession::new(factory()))
    }

    /// Dissect a frame for display purposes, without feeding taps.
    /// Ignored frames get an empty dissection.
    fn dissect_throwaway(
        &mut self,
        num: u64,
        data: &[u8],
        want_tree: bool,
        want_columns: bool,
    ) -> Result<Dissection, Error> {
        let frame = self.frames.get(num).ok_or(Error::NoSuchFrame(num))?;
        let ctx = Self::frame_context(frame);
        if frame.flags.ignored {
            return Ok(Dissection::ignored(&ctx, want_columns));
        }
        Ok(self.session_mut().dissect(&ctx, data, want_tree, want_columns))
    }

    /// Dissect a frame inside a pipeline pass, feeding the taps.
    fn dissect_with_taps(&mut self, ctx: &FrameContext, ignored: bool, data: &[u8], want_tree: bool) -> Dissection {
        if ignored {
            return Dissection::ignored(ctx, false);
        }
        let factory = &self.dissector_factory;
        let session = self
            .session
            .get_or_insert_with(|| DissectionSession::new(factory()));
        session.run(ctx, data, want_tree, false, &mut self.taps)
    }

    fn filter_subject<'a>(
        &self,
        num: u64,
        dissection: &'a Dissection,
        data: &'a [u8],
    ) -> Option<FilterSubject<'a>> {
        let frame = self.frames.get(num)?;
        Some(FilterSubject {
            dissection,
            data,
            frame_len: frame.original_len,
            flags: frame.flags,
            commented: !self.frames.comments(num).is_empty(),
        })
    }

    /// Dissect frame `num`, evaluate the display filter and update every
    /// derived field. The same step serves reads, tails and rescans.
    fn add_packet(&mut self, timeline: &mut FrameTimeline, num: u64, data: &[u8]) {
        let Some(frame) = self.frames.get_mut(num) else {
            return;
        };
        timeline.before_dissect(frame);
        let ctx = Self::frame_context(frame);
        let ignored = frame.flags.ignored;

        let want_tree = self.dfilter.is_some();
        let dissection = self.dissect_with_taps(&ctx, ignored, data, want_tree);
        let passed = match self.dfilter.as_ref() {
            None => true,
            Some(filter) => self
                .filter_subject(num, &dissection, data)
                .is_some_and(|subject| filter.matches(&subject)),
        };
        self.frames.set_passed(num, passed);
        self.frames.set_visited(num, true);
        if passed {
            for dep in &dissection.depends_on {
                self.frames.set_dependent(*dep, true);
            }
        }

        if let Some(frame) = self.frames.get_mut(num) {
            timeline.after_dissect(frame);
        }
    }

    /// Progress gate for an operation on this file.
    fn progress_gate(&self, task: &str) -> ProgressGate {
        ProgressGate::new(self.clock.clone(), &self.prefs, task, self.display_name())
    }

    fn note_encapsulation(&mut self, encap: u32) {
        if self.encap_types.insert(encap) {
            self.encapsulation = Encapsulation::from_types(self.encap_types.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_new_file_is_closed() {
        let cf = CaptureFile::default();
        assert_eq!(cf.state(), FileState::Closed);
        assert_eq!(cf.count(), 0);
        assert_eq!(cf.first_displayed(), 0);
        assert!(cf.path().is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut cf = CaptureFile::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        cf.events_mut().subscribe(move |e| sink.borrow_mut().push(e.name()));
        cf.close();
        cf.close();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_failed_open_leaves_file_closed() {
        let mut cf = CaptureFile::default();
        let dir = tempfile::tempdir().unwrap();
        let err = cf.open(dir.path().join("missing.pcap"), None).unwrap_err();
        assert!(matches!(err, Error::Open(_)));
        assert_eq!(cf.state(), FileState::Closed);
    }

    #[test]
    fn test_operations_need_open_file() {
        let mut cf = CaptureFile::default();
        assert!(matches!(cf.frame_bytes(1), Err(Error::NoFileOpen)));
        assert!(matches!(cf.reload(), Err(Error::NoFileOpen)));
    }
}
