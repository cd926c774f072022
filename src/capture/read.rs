//! Sequential reading: the initial read and the live-tail passes.

use super::{CaptureFile, FileState, Outcome};
use crate::dissect::FrameContext;
use crate::error::Error;
use crate::events::CaptureEvent;
use crate::filter::FilterSubject;
use crate::frame::FrameRecord;
use crate::io::{Encapsulation, Record};

/// What happened to one record pulled off the reader.
enum Pulled {
    Added,
    /// Rejected by the read filter
    Filtered,
    /// No more data for now
    Exhausted,
}

impl CaptureFile {
    /// Read every record of the open file, dissecting and filtering each.
    ///
    /// Frames read before a failure stay available; the error is returned
    /// once the loop stops. A raised stop flag ends the read early with
    /// [`Outcome::Aborted`] and the state `ReadAborted`.
    pub fn read(&mut self, reloading: bool) -> Result<Outcome, Error> {
        self.require_open()?;
        if self.reader.is_none() {
            return Err(Error::NoFileOpen);
        }
        tracing::debug!(reloading, "reading capture file");
        self.events.fire(CaptureEvent::ReadStarted);

        let task = if reloading { "Reloading" } else { "Loading" };
        let mut gate = self.progress_gate(task);
        let file_size = self.reader.as_ref().and_then(|r| r.file_size());

        self.reading = true;
        let mut result = Ok(Outcome::Completed);
        loop {
            if self.stop.is_set() {
                result = Ok(Outcome::Aborted);
                break;
            }
            if let (Some(size), Some(reader)) = (file_size, self.reader.as_ref()) {
                if size > 0 {
                    let position = reader.position();
                    let count = self.frames.len();
                    gate.tick(self.reporter.as_mut(), position as f32 / size as f32, || {
                        format!("{count} frames")
                    });
                }
            }
            match self.pull_record() {
                Ok(Pulled::Added | Pulled::Filtered) => {}
                Ok(Pulled::Exhausted) => break,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.reading = false;
        gate.finish(self.reporter.as_mut());

        if let Some(reader) = self.reader.as_mut() {
            reader.close_sequential();
        }
        self.finalize_encapsulation();
        self.state = match result {
            Ok(Outcome::Aborted) => FileState::ReadAborted,
            _ => FileState::ReadDone,
        };
        self.stop.clear();

        tracing::info!(
            frames = self.count(),
            displayed = self.displayed_count(),
            state = ?self.state,
            "read finished"
        );
        self.events.fire(CaptureEvent::ReadFinished);
        result
    }

    /// Read up to `max_records` records appended since the last pass.
    ///
    /// Running out of data, including a partially written record, is not
    /// an error: the next call picks up where this one stopped. Returns the
    /// number of frames added.
    pub fn continue_tail(&mut self, max_records: Option<u64>) -> Result<u64, Error> {
        if self.state != FileState::ReadInProgress {
            return Err(Error::NoFileOpen);
        }
        let before = self.frames.len();
        let mut pulled = 0u64;

        self.reading = true;
        let mut result = Ok(());
        while max_records.map_or(true, |max| pulled < max) {
            if self.stop.is_set() {
                self.stop.clear();
                self.state = FileState::ReadAborted;
                tracing::info!(frames = self.frames.len(), "tail stopped");
                break;
            }
            match self.pull_record() {
                Ok(Pulled::Added | Pulled::Filtered) => pulled += 1,
                Ok(Pulled::Exhausted) => break,
                Err(e) if matches!(&e, Error::Read(r) if r.is_short_read()) => break,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.reading = false;

        let added = self.frames.len() - before;
        if added > 0 {
            tracing::debug!(added, "tail pass added frames");
            self.events.fire(CaptureEvent::TailFramesAdded { count: added });
        }
        result.map(|()| added)
    }

    /// Read whatever is left after the writer finished, then switch to the
    /// normal read-done state. A tail that was stopped is closed down as
    /// it stands and reports [`Outcome::Aborted`].
    pub fn finish_tail(&mut self) -> Result<Outcome, Error> {
        match self.state {
            FileState::ReadInProgress => {
                self.continue_tail(None)?;
            }
            FileState::ReadAborted => {}
            _ => return Err(Error::NoFileOpen),
        }
        if let Some(reader) = self.reader.as_mut() {
            reader.close_sequential();
        }
        self.finalize_encapsulation();
        if self.state == FileState::ReadAborted {
            return Ok(Outcome::Aborted);
        }
        self.state = FileState::ReadDone;
        Ok(Outcome::Completed)
    }

    /// Pull one record, apply the read filter and append it as a frame.
    fn pull_record(&mut self) -> Result<Pulled, Error> {
        let next_num = self.frames.len() + 1;
        let record = match self.reader_mut()?.read_next() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(Pulled::Exhausted),
            Err(e) => return Err(Error::Read(e.at_frame(next_num))),
        };

        if !self.passes_read_filter(next_num, &record) {
            return Ok(Pulled::Filtered);
        }

        let Record {
            header,
            data,
            offset,
        } = record;
        let mut frame = FrameRecord::new(
            offset,
            header.caplen,
            header.orig_len,
            header.timestamp_ns,
            header.encap,
        );
        frame.interface_id = header.interface_id;
        let num = self.frames.push(frame, header.comments);
        self.note_encapsulation(header.encap);

        let mut timeline = self.timeline;
        self.add_packet(&mut timeline, num, &data);
        self.timeline = timeline;
        Ok(Pulled::Added)
    }

    /// Evaluate the read filter on a record that is not a frame yet.
    fn passes_read_filter(&mut self, num: u64, record: &Record) -> bool {
        if self.rfilter.is_none() {
            return true;
        }
        let ctx = FrameContext {
            num,
            encap: record.header.encap,
            abs_ts_ns: record.header.timestamp_ns,
            rel_ts_ns: 0,
            capture_len: record.header.caplen,
            original_len: record.header.orig_len,
        };
        // A fresh dissector keeps rejected records out of the session's
        // conversation state.
        let dissection = (self.dissector_factory)().dissect(&ctx, &record.data, true, false);
        let subject = FilterSubject {
            dissection: &dissection,
            data: &record.data,
            frame_len: record.header.orig_len,
            flags: Default::default(),
            commented: !record.header.comments.is_empty(),
        };
        self.rfilter
            .as_ref()
            .map_or(true, |filter| filter.matches(&subject))
    }

    fn finalize_encapsulation(&mut self) {
        if self.encap_types.is_empty() {
            self.encapsulation = self
                .reader
                .as_ref()
                .map_or(Encapsulation::Unknown, |r| r.encapsulation());
        } else {
            self.encapsulation = Encapsulation::from_types(self.encap_types.iter().copied());
        }
    }
}
