//! Packet ranges: which frames an export, retap or summary covers.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::frame::{FrameIndex, FrameRecord};

/// The base set of frames a range starts from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RangeScope {
    #[default]
    All,
    /// Only the selected frame
    Selected(u64),
    Marked,
    /// First marked frame through last marked frame, marked or not
    MarkedRange,
    /// Explicit `(first, last)` pairs; `None` as `last` means "to the end"
    Explicit(Vec<(u64, Option<u64>)>),
}

/// Per-frame verdict of a [`PacketRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeDecision {
    Process,
    Skip,
    /// No later frame can be in range
    Finished,
}

/// A selection of frames.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PacketRange {
    pub scope: RangeScope,
    /// Restrict to frames passing the display filter
    pub displayed_only: bool,
    pub exclude_ignored: bool,
    /// With `displayed_only`, also take frames a displayed frame depends on
    pub include_dependents: bool,
    marked_bounds: Option<(u64, u64)>,
}

impl PacketRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn displayed() -> Self {
        Self {
            displayed_only: true,
            include_dependents: true,
            ..Self::default()
        }
    }

    pub fn with_scope(scope: RangeScope) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }

    /// Parse a range list such as `1-5,9,12-`.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidRange(text.to_string());
        let mut ranges = Vec::new();
        for part in text.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid());
            }
            let range = match part.split_once('-') {
                None => {
                    let n = parse_frame_number(part).ok_or_else(invalid)?;
                    (n, Some(n))
                }
                Some((first, last)) => {
                    let first = first.trim();
                    let last = last.trim();
                    let first = if first.is_empty() {
                        1
                    } else {
                        parse_frame_number(first).ok_or_else(invalid)?
                    };
                    let last = if last.is_empty() {
                        None
                    } else {
                        Some(parse_frame_number(last).ok_or_else(invalid)?)
                    };
                    if last.is_some_and(|l| l < first) {
                        return Err(invalid());
                    }
                    (first, last)
                }
            };
            ranges.push(range);
        }
        Ok(Self::with_scope(RangeScope::Explicit(ranges)))
    }

    /// Compute anything that depends on the current frames. Must be called
    /// before [`decide`](Self::decide) is used on a walk.
    pub fn prepare(&mut self, frames: &FrameIndex) {
        self.marked_bounds = None;
        if matches!(self.scope, RangeScope::MarkedRange) {
            let mut marked = frames.iter().filter(|f| f.flags.marked).map(|f| f.num);
            if let Some(first) = marked.next() {
                let last = marked.last().unwrap_or(first);
                self.marked_bounds = Some((first, last));
            }
        }
    }

    pub fn decide(&self, frame: &FrameRecord) -> RangeDecision {
        let num = frame.num;
        let in_scope = match &self.scope {
            RangeScope::All => true,
            RangeScope::Selected(selected) => {
                if num > *selected {
                    return RangeDecision::Finished;
                }
                num == *selected
            }
            RangeScope::Marked => frame.flags.marked,
            RangeScope::MarkedRange => match self.marked_bounds {
                None => return RangeDecision::Finished,
                Some((_, last)) if num > last => return RangeDecision::Finished,
                Some((first, _)) => num >= first,
            },
            RangeScope::Explicit(ranges) => {
                let open_ended = ranges.iter().any(|(_, last)| last.is_none());
                let max = ranges.iter().filter_map(|(_, last)| *last).max().unwrap_or(0);
                if !open_ended && num > max {
                    return RangeDecision::Finished;
                }
                ranges
                    .iter()
                    .any(|(first, last)| num >= *first && last.map_or(true, |l| num <= l))
            }
        };
        if !in_scope {
            return RangeDecision::Skip;
        }
        if self.exclude_ignored && frame.flags.ignored {
            return RangeDecision::Skip;
        }
        if self.displayed_only {
            let shown = frame.flags.is_displayed()
                || (self.include_dependents && frame.flags.dependent_of_displayed);
            if !shown {
                return RangeDecision::Skip;
            }
        }
        RangeDecision::Process
    }
}

fn parse_frame_number(text: &str) -> Option<u64> {
    text.parse::<u64>().ok().filter(|n| *n > 0)
}

impl FromStr for PacketRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(Self::all()),
            "displayed" => Ok(Self::displayed()),
            "marked" => Ok(Self::with_scope(RangeScope::Marked)),
            "marked-range" => Ok(Self::with_scope(RangeScope::MarkedRange)),
            other => Self::parse(other),
        }
    }
}

impl fmt::Display for PacketRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            RangeScope::All => f.write_str("all")?,
            RangeScope::Selected(n) => write!(f, "selected ({n})")?,
            RangeScope::Marked => f.write_str("marked")?,
            RangeScope::MarkedRange => f.write_str("marked-range")?,
            RangeScope::Explicit(ranges) => {
                for (i, (first, last)) in ranges.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    match last {
                        Some(l) if l == first => write!(f, "{first}")?,
                        Some(l) => write!(f, "{first}-{l}")?,
                        None => write!(f, "{first}-")?,
                    }
                }
            }
        }
        if self.displayed_only {
            f.write_str(" (displayed)")?;
        }
        Ok(())
    }
}
