//! Per-frame edits and queries: selection, marks, ignores, time
//! references and comments.

use super::CaptureFile;
use crate::dissect::{Columns, Dissection};
use crate::error::Error;
use crate::events::CaptureEvent;
use crate::frame::CommentChange;

impl CaptureFile {
    /// Select frame `num`.
    pub fn select_frame(&mut self, num: u64) -> Result<(), Error> {
        self.frames.get(num).ok_or(Error::NoSuchFrame(num))?;
        self.current_frame = Some(num);
        self.events.fire(CaptureEvent::PacketSelected { frame: num });
        Ok(())
    }

    /// Clear the selection, if there is one.
    pub fn unselect_frame(&mut self) {
        if self.current_frame.take().is_some() {
            self.events.fire(CaptureEvent::PacketUnselected);
            self.events.fire(CaptureEvent::FieldUnselected);
        }
    }

    /// Select frame `num`, which must be displayed.
    pub fn goto_frame(&mut self, num: u64) -> Result<(), Error> {
        let frame = self.frames.get(num).ok_or(Error::NoSuchFrame(num))?;
        if !frame.flags.is_displayed() {
            return Err(Error::FrameNotDisplayed(num));
        }
        self.select_frame(num)
    }

    /// Mark or unmark a frame. A change counts as an unsaved edit.
    pub fn set_marked(&mut self, num: u64, marked: bool) -> Result<(), Error> {
        self.frames.get(num).ok_or(Error::NoSuchFrame(num))?;
        if self.frames.set_marked(num, marked) {
            self.unsaved_changes = true;
        }
        Ok(())
    }

    /// Mark or unmark every displayed frame.
    pub fn mark_all_displayed(&mut self, marked: bool) {
        for num in self.displayed_frames() {
            if self.frames.set_marked(num, marked) {
                self.unsaved_changes = true;
            }
        }
    }

    /// Ignore or un-ignore a frame. Ignored frames dissect as empty, so
    /// follow with [`redissect_packets`](Self::redissect_packets).
    pub fn set_ignored(&mut self, num: u64, ignored: bool) -> Result<(), Error> {
        self.frames.get(num).ok_or(Error::NoSuchFrame(num))?;
        self.frames.set_ignored(num, ignored);
        Ok(())
    }

    pub fn ignore_all_displayed(&mut self, ignored: bool) {
        for num in self.displayed_frames() {
            self.frames.set_ignored(num, ignored);
        }
    }

    /// Make frame `num` a time reference (or not) and recompute times.
    pub fn set_ref_time(&mut self, num: u64, ref_time: bool) -> Result<(), Error> {
        self.frames.get(num).ok_or(Error::NoSuchFrame(num))?;
        if self.frames.set_ref_time(num, ref_time) {
            self.reftime_packets();
        }
        Ok(())
    }

    pub fn clear_ref_times(&mut self) {
        let refs: Vec<u64> = self
            .frames
            .iter()
            .filter(|f| f.flags.ref_time)
            .map(|f| f.num)
            .collect();
        if refs.is_empty() {
            return;
        }
        for num in refs {
            self.frames.set_ref_time(num, false);
        }
        self.reftime_packets();
    }

    /// Set or clear the user comment of frame `num`. A real change marks
    /// the file as having unsaved changes.
    pub fn set_user_comment(&mut self, num: u64, comment: Option<String>) -> Result<CommentChange, Error> {
        let change = self
            .frames
            .set_user_comment(num, comment)
            .ok_or(Error::NoSuchFrame(num))?;
        if change != CommentChange::Unchanged {
            tracing::debug!(frame = num, ?change, "packet comment edited");
            self.unsaved_changes = true;
        }
        Ok(change)
    }

    /// Effective comment of frame `num`; several stored comments are joined
    /// by newlines.
    pub fn comment(&self, num: u64) -> Option<String> {
        let comments = self.frames.comments(num);
        (!comments.is_empty()).then(|| comments.join("\n"))
    }

    /// Record how many packets the capture source dropped.
    pub fn set_drops(&mut self, drops: Option<u64>) {
        self.drops = drops;
    }

    pub fn drops(&self) -> Option<u64> {
        self.drops
    }

    /// Name to show for the file: its file name, or where a temporary
    /// file came from.
    pub fn display_name(&self) -> String {
        if self.is_tempfile {
            if let Some(source) = &self.source {
                return source.clone();
            }
        }
        match self.path.as_deref() {
            Some(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            None => "(No file)".to_string(),
        }
    }

    /// Full dissection of frame `num`, tree and columns, for display.
    pub fn dissect_frame(&mut self, num: u64) -> Result<Dissection, Error> {
        self.require_open()?;
        let record = self.read_frame_record(num)?;
        self.dissect_throwaway(num, &record.data, true, true)
    }

    /// Summary columns of frame `num`.
    pub fn frame_columns(&mut self, num: u64) -> Result<Columns, Error> {
        self.require_open()?;
        let record = self.read_frame_record(num)?;
        let dissection = self.dissect_throwaway(num, &record.data, false, true)?;
        let frame = self.frames.get(num).ok_or(Error::NoSuchFrame(num))?;
        Ok(dissection
            .columns
            .unwrap_or_else(|| Columns::for_frame(&Self::frame_context(frame))))
    }

    fn displayed_frames(&self) -> Vec<u64> {
        self.frames
            .iter()
            .filter(|f| f.flags.is_displayed())
            .map(|f| f.num)
            .collect()
    }
}
