//! Per-frame metadata and the index that owns it.
//!
//! Frame numbers are 1-based and assigned at append time. Flags that feed
//! a counter are only changed through [`FrameIndex`] setters so the
//! counters always agree with the flags.

use std::collections::HashMap;

/// Per-frame flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags {
    pub passed_dfilter: bool,
    pub ref_time: bool,
    pub marked: bool,
    pub ignored: bool,
    /// A user comment override exists (it may delete the stored comment)
    pub has_user_comment: bool,
    pub has_stored_comment: bool,
    /// Needed by a displayed frame (reassembly and the like)
    pub dependent_of_displayed: bool,
    /// Dissected at least once in the current session
    pub visited: bool,
}

impl FrameFlags {
    /// Time reference frames are always displayed.
    pub fn is_displayed(&self) -> bool {
        self.passed_dfilter || self.ref_time
    }
}

/// Metadata of one frame. Times are in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameRecord {
    pub num: u64,
    /// Location token for random access into the backing store
    pub offset: u64,
    pub capture_len: u32,
    pub original_len: u32,
    pub abs_ts: i64,
    pub rel_ts: i64,
    pub delta_captured: i64,
    pub delta_displayed: i64,
    pub cumulative_bytes: u64,
    pub encap: u32,
    pub interface_id: Option<u32>,
    pub flags: FrameFlags,
}

impl FrameRecord {
    pub fn new(offset: u64, capture_len: u32, original_len: u32, abs_ts: i64, encap: u32) -> Self {
        Self {
            offset,
            capture_len,
            original_len,
            abs_ts,
            encap,
            ..Default::default()
        }
    }
}

/// Counters kept in step with the frame flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounts {
    pub displayed: u64,
    pub marked: u64,
    pub ignored: u64,
    pub ref_time: u64,
    /// Frames whose effective comment is present
    pub commented: u64,
}

/// Result of changing a frame's user comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentChange {
    Unchanged,
    Added,
    Modified,
    Removed,
}

/// Append-only, 1-based sequence of frames.
#[derive(Debug, Default)]
pub struct FrameIndex {
    frames: Vec<FrameRecord>,
    counts: FrameCounts,
    /// `None` deletes the stored comment
    user_comments: HashMap<u64, Option<String>>,
    stored_comments: HashMap<u64, Vec<String>>,
}

impl FrameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> u64 {
        self.frames.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn counts(&self) -> FrameCounts {
        self.counts
    }

    /// Append a frame, assigning its number. Comments stored in the
    /// record itself are attached here.
    pub fn push(&mut self, mut record: FrameRecord, stored_comments: Vec<String>) -> u64 {
        let num = self.len() + 1;
        record.num = num;
        record.flags.has_stored_comment = !stored_comments.is_empty();
        let flags = record.flags;
        if flags.is_displayed() {
            self.counts.displayed += 1;
        }
        if flags.marked {
            self.counts.marked += 1;
        }
        if flags.ignored {
            self.counts.ignored += 1;
        }
        if flags.ref_time {
            self.counts.ref_time += 1;
        }
        if flags.has_stored_comment {
            self.counts.commented += 1;
            self.stored_comments.insert(num, stored_comments);
        }
        self.frames.push(record);
        num
    }

    pub fn get(&self, num: u64) -> Option<&FrameRecord> {
        let idx = usize::try_from(num.checked_sub(1)?).ok()?;
        self.frames.get(idx)
    }

    /// Mutable access for derived fields. Counted flags must go through
    /// the setters below.
    pub fn get_mut(&mut self, num: u64) -> Option<&mut FrameRecord> {
        let idx = usize::try_from(num.checked_sub(1)?).ok()?;
        self.frames.get_mut(idx)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &FrameRecord> {
        self.frames.iter()
    }

    /// Apply `change` to a frame's flags, keeping the counters in step.
    /// Returns whether anything changed.
    fn update_flags<F>(&mut self, num: u64, change: F) -> bool
    where
        F: FnOnce(&mut FrameFlags),
    {
        let Some(frame) = self.get_mut(num) else {
            return false;
        };
        let before = frame.flags;
        change(&mut frame.flags);
        let after = frame.flags;
        if before == after {
            return false;
        }
        fn adjust(counter: &mut u64, was: bool, now: bool) {
            match (was, now) {
                (false, true) => *counter += 1,
                (true, false) => *counter = counter.saturating_sub(1),
                _ => {}
            }
        }
        adjust(&mut self.counts.displayed, before.is_displayed(), after.is_displayed());
        adjust(&mut self.counts.marked, before.marked, after.marked);
        adjust(&mut self.counts.ignored, before.ignored, after.ignored);
        adjust(&mut self.counts.ref_time, before.ref_time, after.ref_time);
        true
    }

    pub fn set_passed(&mut self, num: u64, passed: bool) -> bool {
        self.update_flags(num, |f| f.passed_dfilter = passed)
    }

    pub fn set_marked(&mut self, num: u64, marked: bool) -> bool {
        self.update_flags(num, |f| f.marked = marked)
    }

    pub fn set_ignored(&mut self, num: u64, ignored: bool) -> bool {
        self.update_flags(num, |f| f.ignored = ignored)
    }

    pub fn set_ref_time(&mut self, num: u64, ref_time: bool) -> bool {
        self.update_flags(num, |f| f.ref_time = ref_time)
    }

    pub fn set_visited(&mut self, num: u64, visited: bool) -> bool {
        self.update_flags(num, |f| f.visited = visited)
    }

    pub fn set_dependent(&mut self, num: u64, dependent: bool) -> bool {
        self.update_flags(num, |f| f.dependent_of_displayed = dependent)
    }

    /// Clear everything a dissection pass derives: filter result,
    /// visited and dependency marks.
    pub fn reset_dissection_flags(&mut self, num: u64) {
        self.update_flags(num, |f| {
            f.passed_dfilter = false;
            f.visited = false;
            f.dependent_of_displayed = false;
        });
    }

    pub fn first_displayed(&self) -> u64 {
        self.frames
            .iter()
            .find(|f| f.flags.is_displayed())
            .map_or(0, |f| f.num)
    }

    pub fn last_displayed(&self) -> u64 {
        self.frames
            .iter()
            .rev()
            .find(|f| f.flags.is_displayed())
            .map_or(0, |f| f.num)
    }

    /// Effective comments of a frame: the user override if one exists,
    /// otherwise whatever the record carried.
    pub fn comments(&self, num: u64) -> Vec<&str> {
        match self.user_comments.get(&num) {
            Some(Some(text)) => vec![text.as_str()],
            Some(None) => Vec::new(),
            None => self
                .stored_comments
                .get(&num)
                .map(|c| c.iter().map(String::as_str).collect())
                .unwrap_or_default(),
        }
    }

    fn effective_comment(&self, num: u64) -> Option<String> {
        let comments = self.comments(num);
        (!comments.is_empty()).then(|| comments.join("\n"))
    }

    /// Set or clear (`None` or empty) the user comment of a frame.
    /// Returns `None` if the frame doesn't exist.
    pub fn set_user_comment(&mut self, num: u64, comment: Option<String>) -> Option<CommentChange> {
        self.get(num)?;
        let comment = comment.filter(|c| !c.is_empty());
        let current = self.effective_comment(num);
        if current == comment {
            return Some(CommentChange::Unchanged);
        }
        let change = match (&current, &comment) {
            (None, Some(_)) => {
                self.counts.commented += 1;
                CommentChange::Added
            }
            (Some(_), None) => {
                self.counts.commented = self.counts.commented.saturating_sub(1);
                CommentChange::Removed
            }
            _ => CommentChange::Modified,
        };
        self.user_comments.insert(num, comment);
        self.update_flags(num, |f| f.has_user_comment = true);
        Some(change)
    }

    /// Whether any user comment override exists.
    pub fn has_user_comments(&self) -> bool {
        !self.user_comments.is_empty()
    }

    /// Drop every comment, user and stored.
    pub fn discard_comments(&mut self) {
        self.user_comments.clear();
        self.stored_comments.clear();
        for frame in &mut self.frames {
            frame.flags.has_user_comment = false;
            frame.flags.has_stored_comment = false;
        }
        self.counts.commented = 0;
    }

    /// Forget user overrides after they were written out as stored
    /// comments; the stored text becomes whatever was effective.
    pub fn commit_user_comments(&mut self) {
        for (num, comment) in std::mem::take(&mut self.user_comments) {
            match comment {
                Some(text) => {
                    self.stored_comments.insert(num, vec![text]);
                }
                None => {
                    self.stored_comments.remove(&num);
                }
            }
            let present = comment_present(&self.stored_comments, num);
            if let Some(frame) = self.get_mut(num) {
                frame.flags.has_user_comment = false;
                frame.flags.has_stored_comment = present;
            }
        }
    }

    /// Recompute relative times, deltas and cumulative bytes for every
    /// frame, without dissecting. Returns the running state after the last
    /// frame, for appending more.
    pub fn recompute_times(&mut self) -> FrameTimeline {
        let mut timeline = FrameTimeline::default();
        for frame in &mut self.frames {
            timeline.before_dissect(frame);
            timeline.after_dissect(frame);
        }
        timeline
    }
}

fn comment_present(stored: &HashMap<u64, Vec<String>>, num: u64) -> bool {
    stored.get(&num).is_some_and(|c| !c.is_empty())
}

/// Running state for derived time and byte fields, carried across a pass
/// over the frames in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTimeline {
    reference_ts: Option<i64>,
    prev_displayed_ts: Option<i64>,
    prev_captured_ts: Option<i64>,
    cumulative_bytes: u64,
}

impl FrameTimeline {
    /// Fields computable before the display decision is known.
    pub fn before_dissect(&mut self, frame: &mut FrameRecord) {
        if self.reference_ts.is_none() || frame.flags.ref_time {
            self.reference_ts = Some(frame.abs_ts);
        }
        let reference = self.reference_ts.unwrap_or(frame.abs_ts);
        frame.rel_ts = frame.abs_ts - reference;
        frame.delta_captured = frame.abs_ts - self.prev_captured_ts.unwrap_or(frame.abs_ts);
        self.prev_captured_ts = Some(frame.abs_ts);
        // Provisional until we know whether the frame is displayed.
        frame.cumulative_bytes = self.cumulative_bytes + u64::from(frame.original_len);
    }

    /// Fields that depend on the frame being displayed.
    pub fn after_dissect(&mut self, frame: &mut FrameRecord) {
        if !frame.flags.is_displayed() {
            return;
        }
        if frame.flags.ref_time {
            self.cumulative_bytes = u64::from(frame.original_len);
        } else {
            self.cumulative_bytes += u64::from(frame.original_len);
        }
        frame.cumulative_bytes = self.cumulative_bytes;
        frame.delta_displayed = frame.abs_ts - self.prev_displayed_ts.unwrap_or(frame.abs_ts);
        self.prev_displayed_ts = Some(frame.abs_ts);
    }
}
