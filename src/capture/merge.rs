//! Merging several capture files with progress and cancellation.

use std::path::{Path, PathBuf};

use super::{CaptureFile, Outcome};
use crate::error::Error;
use crate::events::CaptureEvent;
use crate::io::{merge_captures, total_input_size, FileFormat, MergeMode};
use crate::progress::ProgressGate;

impl CaptureFile {
    /// Merge `inputs` into `output`.
    ///
    /// The open file, if any, is not affected; open the result with
    /// [`CaptureFile::open_temp`] to look at it. A cancelled merge leaves
    /// a partial output behind and reports [`Outcome::Aborted`].
    pub fn merge_files<P: AsRef<Path>>(
        &mut self,
        output: P,
        inputs: &[PathBuf],
        format: FileFormat,
        mode: MergeMode,
    ) -> Result<Outcome, Error> {
        let output = output.as_ref();
        self.events.fire(CaptureEvent::MergeStarted);

        let total = total_input_size(inputs);
        let item = format!("{} files", inputs.len());
        let mut gate = ProgressGate::new(self.clock.clone(), &self.prefs, "Merging", item);
        let stop = self.stop.clone();
        let reporter = self.reporter.as_mut();

        let result = merge_captures(
            output,
            inputs,
            format,
            mode,
            self.prefs.max_packet_size,
            |progress| {
                if stop.is_set() {
                    return false;
                }
                if total > 0 {
                    let fraction = progress.combined_offset as f32 / total as f32;
                    gate.tick(&mut *reporter, fraction, || {
                        format!("{} packets", progress.records_written)
                    });
                }
                true
            },
        );
        gate.finish(self.reporter.as_mut());
        if result.as_ref().is_ok_and(|o| o.is_aborted()) {
            self.stop.clear();
        }

        match &result {
            Ok(outcome) => tracing::info!(output = %output.display(), inputs = inputs.len(), ?outcome, "merge done"),
            Err(e) => tracing::warn!(output = %output.display(), "merge failed: {e}"),
        }
        self.events.fire(CaptureEvent::MergeFinished);
        result.map_err(Error::from)
    }
}
