//! Filtering and the passes that revisit frames already read.

use super::range::PacketRange;
use super::{CaptureFile, Outcome};
use crate::dissect::DissectionSession;
use crate::error::Error;
use crate::events::CaptureEvent;
use crate::filter::DisplayFilter;
use crate::frame::FrameTimeline;

impl CaptureFile {
    /// Make `text` the display filter and rescan.
    ///
    /// Unchanged text is a no-op unless `force` is set. A filter that does
    /// not compile is reported and the previous filter stays active.
    pub fn filter_packets(&mut self, text: &str, force: bool) -> Result<Outcome, Error> {
        let text = text.trim();
        if !force && text == self.display_filter_text() {
            return Ok(Outcome::Completed);
        }
        let filter = DisplayFilter::compile(text)?;
        tracing::debug!(filter = text, "display filter changed");
        self.dfilter = filter;
        if self.reader.is_none() {
            return Ok(Outcome::Completed);
        }
        self.rescan_packets(false)
    }

    /// Set the filter applied to records as they are read. Takes effect on
    /// the next read or reload.
    pub fn set_read_filter(&mut self, text: &str) -> Result<(), Error> {
        self.rfilter = DisplayFilter::compile(text)?;
        Ok(())
    }

    /// Dissect every frame again from scratch, dropping all state the
    /// dissectors built up.
    pub fn redissect_packets(&mut self) -> Result<Outcome, Error> {
        self.rescan_packets(true)
    }

    /// Re-run the display filter over every frame and recompute derived
    /// fields, then resolve the selection.
    ///
    /// A selected frame that is no longer displayed hands the selection to
    /// the nearest displayed frame before it, or failing that, after it.
    pub fn rescan_packets(&mut self, redissect: bool) -> Result<Outcome, Error> {
        self.require_open()?;
        self.events.fire(CaptureEvent::RescanStarted);

        if redissect {
            self.redissecting = true;
            self.session = Some(DissectionSession::new((self.dissector_factory)()));
        }
        self.taps.reset_all();

        let selected = self.current_frame;
        let mut preceding: Option<u64> = None;
        let mut following: Option<u64> = None;
        let mut timeline = FrameTimeline::default();

        let count = self.frames.len();
        let task = if redissect { "Reprocessing" } else { "Filtering" };
        let mut gate = self.progress_gate(task);
        let mut result = Ok(Outcome::Completed);
        let mut resume_from = count + 1;

        for num in 1..=count {
            if self.stop.is_set() {
                self.stop.clear();
                result = Ok(Outcome::Aborted);
                resume_from = num;
                break;
            }
            gate.tick(self.reporter.as_mut(), num as f32 / count as f32, || {
                format!("{num} of {count} frames")
            });

            if redissect {
                self.frames.reset_dissection_flags(num);
            }
            self.frames.set_dependent(num, false);

            let record = match self.read_frame_record(num) {
                Ok(record) => record,
                Err(e) => {
                    result = Err(e);
                    resume_from = num;
                    break;
                }
            };
            self.add_packet(&mut timeline, num, &record.data);

            let displayed = self.frames.get(num).is_some_and(|f| f.flags.is_displayed());
            if displayed {
                match selected {
                    Some(sel) if num < sel => preceding = Some(num),
                    Some(_) if following.is_none() => following = Some(num),
                    _ => {}
                }
            }
        }
        gate.finish(self.reporter.as_mut());

        if redissect {
            // Frames the walk never reached must not keep results from the
            // previous session.
            for num in resume_from..=count {
                self.frames.reset_dissection_flags(num);
            }
            self.redissecting = false;
        }
        self.timeline = timeline;

        self.resolve_selection(selected, preceding, following);

        tracing::debug!(
            redissect,
            displayed = self.displayed_count(),
            selected = ?self.current_frame,
            "rescan finished"
        );
        self.events.fire(CaptureEvent::RescanFinished);
        result
    }

    fn resolve_selection(&mut self, selected: Option<u64>, preceding: Option<u64>, following: Option<u64>) {
        let Some(selected) = selected else {
            return;
        };
        if self.displayed_count() == 0 {
            self.current_frame = None;
            self.events.fire(CaptureEvent::PacketUnselected);
            return;
        }
        let still_shown = self
            .frames
            .get(selected)
            .is_some_and(|f| f.flags.is_displayed());
        let target = if still_shown {
            Some(selected)
        } else {
            preceding.or(following)
        };
        match target {
            Some(num) => {
                self.current_frame = Some(num);
                self.events.fire(CaptureEvent::PacketSelected { frame: num });
            }
            None => {
                self.current_frame = None;
                self.events.fire(CaptureEvent::PacketUnselected);
            }
        }
    }

    /// Recompute relative times, deltas and cumulative bytes after the
    /// time reference frames changed. Nothing is re-read or re-filtered.
    pub fn reftime_packets(&mut self) {
        self.timeline = self.frames.recompute_times();
    }

    /// Feed every displayed frame (and the frames they depend on) to the
    /// registered taps again. Filter results and selection are untouched.
    pub fn retap_packets(&mut self) -> Result<Outcome, Error> {
        self.require_open()?;
        self.events.fire(CaptureEvent::RetapStarted);
        self.taps.reset_all();

        // Taps see frames in order with fresh conversation state.
        if let Some(session) = self.session.as_mut() {
            session.reset();
        }
        let range = PacketRange::displayed();
        let result = self.process_specified_records(&range, "Recalculating statistics", |cf, frame, record| {
            let ctx = Self::frame_context(frame);
            cf.dissect_with_taps(&ctx, frame.flags.ignored, &record.data, false);
            Ok(())
        });

        tracing::debug!(taps = self.taps.len(), "retap finished");
        self.events.fire(CaptureEvent::RetapFinished);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_without_file_only_stores_filter() {
        let mut cf = CaptureFile::default();
        assert_eq!(cf.filter_packets("tcp", false).unwrap(), Outcome::Completed);
        assert_eq!(cf.display_filter_text(), "tcp");
        assert!(matches!(cf.rescan_packets(false), Err(Error::NoFileOpen)));
    }

    #[test]
    fn test_bad_filter_keeps_previous() {
        let mut cf = CaptureFile::default();
        cf.filter_packets("udp", false).unwrap();
        let err = cf.filter_packets("udp and (", false).unwrap_err();
        assert!(matches!(err, Error::Filter(_)));
        assert_eq!(cf.display_filter_text(), "udp");
        cf.filter_packets("", false).unwrap();
        assert!(cf.display_filter().is_none());
    }

    #[test]
    fn test_read_filter_compiles() {
        let mut cf = CaptureFile::default();
        cf.set_read_filter("port 53").unwrap();
        assert_eq!(cf.read_filter().map(|f| f.text()), Some("port 53"));
        assert!(cf.set_read_filter("port").is_err());
        assert!(cf.read_filter().is_some());
    }
}
