//! Lifecycle notifications.
//!
//! A [`CaptureFile`](crate::capture::CaptureFile) announces what it is doing
//! through an [`EventDispatcher`]. Listeners run synchronously inside the
//! call that triggered the event, in the order they subscribed.

use std::fmt;
use std::path::PathBuf;

/// Something that happened to a capture file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    FileOpened { path: PathBuf },
    FileClosing,
    FileClosed,
    ReadStarted,
    ReadFinished,
    ReloadStarted,
    ReloadFinished,
    RescanStarted,
    RescanFinished,
    RetapStarted,
    RetapFinished,
    SaveStarted { path: PathBuf },
    SaveFinished { path: PathBuf },
    SaveFailed { path: PathBuf },
    ExportStarted { path: PathBuf },
    ExportFinished { path: PathBuf },
    ExportFailed { path: PathBuf },
    MergeStarted,
    MergeFinished,
    PacketSelected { frame: u64 },
    PacketUnselected,
    FieldUnselected,
    /// A tail pass appended frames to a live file
    TailFramesAdded { count: u64 },
}

impl CaptureEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            CaptureEvent::FileOpened { .. } => "file-opened",
            CaptureEvent::FileClosing => "file-closing",
            CaptureEvent::FileClosed => "file-closed",
            CaptureEvent::ReadStarted => "read-started",
            CaptureEvent::ReadFinished => "read-finished",
            CaptureEvent::ReloadStarted => "reload-started",
            CaptureEvent::ReloadFinished => "reload-finished",
            CaptureEvent::RescanStarted => "rescan-started",
            CaptureEvent::RescanFinished => "rescan-finished",
            CaptureEvent::RetapStarted => "retap-started",
            CaptureEvent::RetapFinished => "retap-finished",
            CaptureEvent::SaveStarted { .. } => "save-started",
            CaptureEvent::SaveFinished { .. } => "save-finished",
            CaptureEvent::SaveFailed { .. } => "save-failed",
            CaptureEvent::ExportStarted { .. } => "export-started",
            CaptureEvent::ExportFinished { .. } => "export-finished",
            CaptureEvent::ExportFailed { .. } => "export-failed",
            CaptureEvent::MergeStarted => "merge-started",
            CaptureEvent::MergeFinished => "merge-finished",
            CaptureEvent::PacketSelected { .. } => "packet-selected",
            CaptureEvent::PacketUnselected => "packet-unselected",
            CaptureEvent::FieldUnselected => "field-unselected",
            CaptureEvent::TailFramesAdded { .. } => "tail-frames-added",
        }
    }
}

impl fmt::Display for CaptureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle returned by [`EventDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&CaptureEvent)>;

/// Ordered list of event listeners.
pub struct EventDispatcher {
    listeners: Vec<(ListenerId, Listener)>,
    next_id: u64,
    require_listeners: bool,
}

impl EventDispatcher {
    /// `require_listeners` turns firing into nobody's ears into a panic.
    pub fn new(require_listeners: bool) -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
            require_listeners,
        }
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&CaptureEvent) + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn set_require_listeners(&mut self, require: bool) {
        self.require_listeners = require;
    }

    pub fn fire(&mut self, event: CaptureEvent) {
        tracing::trace!(event = event.name(), "dispatching");
        if self.listeners.is_empty() {
            assert!(
                !self.require_listeners,
                "event {event} fired with no listeners registered"
            );
            return;
        }
        for (_, listener) in self.listeners.iter_mut() {
            listener(&event);
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listeners.len())
            .field("require_listeners", &self.require_listeners)
            .finish()
    }
}
