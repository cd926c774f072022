//! The range walk shared by retap, export, summary output and re-encoding
//! saves.

use super::range::{PacketRange, RangeDecision};
use super::{CaptureFile, Outcome};
use crate::error::Error;
use crate::frame::FrameRecord;
use crate::io::Record;

impl CaptureFile {
    /// Visit every frame selected by `range`, in frame order, re-reading
    /// its bytes and handing both to `visit`.
    ///
    /// A read failure or an error from `visit` ends the walk with that
    /// error. A raised stop flag ends it with [`Outcome::Aborted`].
    pub fn process_specified_records<F>(
        &mut self,
        range: &PacketRange,
        task: &str,
        mut visit: F,
    ) -> Result<Outcome, Error>
    where
        F: FnMut(&mut CaptureFile, &FrameRecord, &Record) -> Result<(), Error>,
    {
        self.require_open()?;
        let mut range = range.clone();
        range.prepare(&self.frames);

        let count = self.frames.len();
        let mut gate = self.progress_gate(task);
        let mut outcome = Ok(Outcome::Completed);
        let mut processed = 0u64;

        for num in 1..=count {
            if self.stop.is_set() {
                self.stop.clear();
                outcome = Ok(Outcome::Aborted);
                break;
            }
            gate.tick(self.reporter.as_mut(), num as f32 / count as f32, || {
                format!("{processed} of {count} frames")
            });

            let Some(frame) = self.frames.get(num).cloned() else {
                break;
            };
            match range.decide(&frame) {
                RangeDecision::Skip => continue,
                RangeDecision::Finished => break,
                RangeDecision::Process => {}
            }

            let record = match self.read_frame_record(num) {
                Ok(record) => record,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };
            if let Err(e) = visit(self, &frame, &record) {
                outcome = Err(e);
                break;
            }
            processed += 1;
        }
        gate.finish(self.reporter.as_mut());

        tracing::debug!(task, range = %range, processed, "range walk done");
        outcome
    }
}
