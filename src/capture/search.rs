//! Frame search.
//!
//! A search steps from the selected frame one frame at a time in the
//! requested direction, skipping frames that are not displayed, until a
//! predicate matches or it arrives back at the start.

use regex::{bytes, RegexBuilder};

use super::CaptureFile;
use crate::error::Error;
use crate::events::CaptureEvent;
use crate::filter::DisplayFilter;

/// Text to look for in rendered dissection output.
#[derive(Debug, Clone)]
pub enum TextPattern {
    /// Substring; case folding follows the search preference
    Plain(String),
    Regex(regex::Regex),
}

impl TextPattern {
    pub fn plain(text: impl Into<String>) -> Self {
        TextPattern::Plain(text.into())
    }

    pub fn regex(pattern: &str, case_sensitive: bool) -> Result<Self, Error> {
        RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()
            .map(TextPattern::Regex)
            .map_err(|e| Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    fn matches(&self, haystack: &str, case_sensitive: bool) -> bool {
        match self {
            TextPattern::Plain(needle) if case_sensitive => haystack.contains(needle.as_str()),
            TextPattern::Plain(needle) => haystack
                .to_ascii_uppercase()
                .contains(&needle.to_ascii_uppercase()),
            TextPattern::Regex(re) => re.is_match(haystack),
        }
    }
}

/// How a byte search interprets its needle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteEncoding {
    /// One byte per character
    #[default]
    Narrow,
    /// Two bytes per character, the needle byte followed by any byte
    Wide,
    /// Narrow, ignoring NUL bytes in the data
    NarrowAndWide,
    /// Raw bytes, never case folded
    Binary,
}

/// What to search for.
#[derive(Debug, Clone)]
pub enum SearchKind {
    /// A visible node of the protocol tree
    Tree(TextPattern),
    /// The Info column of the summary line
    Summary(TextPattern),
    Bytes {
        needle: Vec<u8>,
        encoding: ByteEncoding,
    },
    /// Regex over the raw captured bytes
    Regex(bytes::Regex),
    Filter(DisplayFilter),
    Marked,
    TimeRef,
}

impl SearchKind {
    pub fn string(text: &str, encoding: ByteEncoding) -> Self {
        SearchKind::Bytes {
            needle: text.as_bytes().to_vec(),
            encoding,
        }
    }

    /// Bytes given as hex, with optional `:`, `-` or space separators.
    pub fn hex(text: &str) -> Result<Self, Error> {
        let invalid = |reason: &str| Error::InvalidPattern {
            pattern: text.to_string(),
            reason: reason.to_string(),
        };
        let digits: Vec<u8> = text
            .bytes()
            .filter(|b| !matches!(b, b':' | b'-' | b' '))
            .collect();
        if digits.is_empty() {
            return Err(invalid("no bytes given"));
        }
        if digits.len() % 2 != 0 {
            return Err(invalid("odd number of hex digits"));
        }
        let needle = digits
            .chunks(2)
            .map(|pair| {
                std::str::from_utf8(pair)
                    .ok()
                    .and_then(|s| u8::from_str_radix(s, 16).ok())
                    .ok_or_else(|| invalid("not a hex digit"))
            })
            .collect::<Result<Vec<u8>, Error>>()?;
        Ok(SearchKind::Bytes {
            needle,
            encoding: ByteEncoding::Binary,
        })
    }

    pub fn bytes_regex(pattern: &str) -> Result<Self, Error> {
        bytes::Regex::new(pattern)
            .map(SearchKind::Regex)
            .map_err(|e| Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn filter(text: &str) -> Result<Self, Error> {
        match DisplayFilter::compile(text)? {
            Some(filter) => Ok(SearchKind::Filter(filter)),
            None => Err(Error::InvalidPattern {
                pattern: text.to_string(),
                reason: "empty filter".to_string(),
            }),
        }
    }

    /// Whether the predicate looks at frame contents at all.
    fn needs_bytes(&self) -> bool {
        !matches!(self, SearchKind::Marked | SearchKind::TimeRef)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchDirection {
    #[default]
    Forward,
    Backward,
}

/// Where a byte search matched. `pos` is the offset of the last matched
/// byte, for highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteMatch {
    pub pos: usize,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// The frame was found and is now selected
    Found(u64),
    NotFound,
    /// Hit the last frame with wrapping off; selection unchanged
    ReachedEnd,
    /// Hit the first frame with wrapping off; selection unchanged
    ReachedBeginning,
    Aborted,
}

#[derive(Debug, Clone, Default)]
pub(super) struct SearchState {
    last: Option<SearchKind>,
    last_match: Option<ByteMatch>,
}

/// Narrow, narrow-and-wide and binary scans. On a mismatch the scan
/// restarts one byte after where the partial match began.
fn match_narrow(data: &[u8], needle: &[u8], fold: bool, skip_nul: bool) -> Option<ByteMatch> {
    if needle.is_empty() {
        return None;
    }
    let mut c_match = 0usize;
    let mut i = 0usize;
    while i < data.len() {
        let mut c = data[i];
        if fold {
            c = c.to_ascii_uppercase();
        }
        if !(skip_nul && c == 0) {
            if c == needle[c_match] {
                c_match += 1;
                if c_match == needle.len() {
                    return Some(ByteMatch {
                        pos: i,
                        len: needle.len(),
                    });
                }
            } else {
                i -= c_match;
                c_match = 0;
            }
        }
        i += 1;
    }
    None
}

/// Scan where every matched character occupies two bytes.
fn match_wide(data: &[u8], needle: &[u8], fold: bool) -> Option<ByteMatch> {
    if needle.is_empty() {
        return None;
    }
    let mut c_match = 0usize;
    let mut i = 0usize;
    while i < data.len() {
        let mut c = data[i];
        if fold {
            c = c.to_ascii_uppercase();
        }
        if c == needle[c_match] {
            c_match += 1;
            if c_match == needle.len() {
                return Some(ByteMatch {
                    pos: i,
                    len: needle.len(),
                });
            }
            i += 1;
        } else {
            i -= c_match * 2;
            c_match = 0;
        }
        i += 1;
    }
    None
}

/// Match `needle` in `data` per `encoding`.
pub fn match_bytes(data: &[u8], needle: &[u8], encoding: ByteEncoding, case_sensitive: bool) -> Option<ByteMatch> {
    let fold = !case_sensitive && encoding != ByteEncoding::Binary;
    let folded;
    let needle = if fold {
        folded = needle.to_ascii_uppercase();
        folded.as_slice()
    } else {
        needle
    };
    match encoding {
        ByteEncoding::Narrow | ByteEncoding::Binary => match_narrow(data, needle, fold, false),
        ByteEncoding::NarrowAndWide => match_narrow(data, needle, fold, true),
        ByteEncoding::Wide => match_wide(data, needle, fold),
    }
}

fn match_regex(data: &[u8], re: &bytes::Regex) -> Option<ByteMatch> {
    re.find_iter(data)
        .find(|m| m.end() > m.start())
        .map(|m| ByteMatch {
            pos: m.end() - 1,
            len: m.end() - m.start(),
        })
}

impl CaptureFile {
    /// Search from the selected frame and select the first match.
    pub fn find_packet(&mut self, kind: SearchKind, direction: SearchDirection) -> Result<SearchResult, Error> {
        self.require_open()?;
        let result = self.scan(&kind, direction);
        self.search.last = Some(kind);
        let result = result?;
        if let SearchResult::Found(num) = result {
            self.current_frame = Some(num);
            self.events.fire(CaptureEvent::PacketSelected { frame: num });
        }
        tracing::debug!(?direction, ?result, "search finished");
        Ok(result)
    }

    /// Repeat the last search forward.
    pub fn find_next(&mut self) -> Result<SearchResult, Error> {
        self.repeat_search(SearchDirection::Forward)
    }

    /// Repeat the last search backward.
    pub fn find_previous(&mut self) -> Result<SearchResult, Error> {
        self.repeat_search(SearchDirection::Backward)
    }

    fn repeat_search(&mut self, direction: SearchDirection) -> Result<SearchResult, Error> {
        match self.search.last.clone() {
            Some(kind) => self.find_packet(kind, direction),
            None => Ok(SearchResult::NotFound),
        }
    }

    /// Location of the last byte or regex match.
    pub fn last_byte_match(&self) -> Option<ByteMatch> {
        self.search.last_match
    }

    fn scan(&mut self, kind: &SearchKind, direction: SearchDirection) -> Result<SearchResult, Error> {
        let count = self.frames.len();
        if count == 0 {
            return Ok(SearchResult::NotFound);
        }
        let wrap = self.prefs.wrap_search;
        let start = self.current_frame;
        // Without a selection, start just outside the end we move away from.
        let mut framenum = match (start, direction) {
            (Some(num), _) => num,
            (None, SearchDirection::Forward) => 0,
            (None, SearchDirection::Backward) => count + 1,
        };

        let mut gate = self.progress_gate("Searching");
        let mut visited = 0u64;
        let result = loop {
            if self.stop.is_set() {
                self.stop.clear();
                break SearchResult::Aborted;
            }
            gate.tick(self.reporter.as_mut(), visited as f32 / count as f32, || {
                format!("{visited} of {count} frames")
            });

            match direction {
                SearchDirection::Forward if framenum >= count => {
                    if !wrap {
                        break SearchResult::ReachedEnd;
                    }
                    tracing::debug!("search reached the end, continuing at the beginning");
                    framenum = 1;
                }
                SearchDirection::Backward if framenum <= 1 => {
                    if !wrap {
                        break SearchResult::ReachedBeginning;
                    }
                    tracing::debug!("search reached the beginning, continuing at the end");
                    framenum = count;
                }
                SearchDirection::Forward => framenum += 1,
                SearchDirection::Backward => framenum -= 1,
            }
            visited += 1;

            let displayed = self
                .frames
                .get(framenum)
                .is_some_and(|f| f.flags.is_displayed());
            if displayed && self.matches(framenum, kind)? {
                break SearchResult::Found(framenum);
            }
            // Back at the start without a match, or every frame seen once
            // when there was no selection.
            if Some(framenum) == start || (start.is_none() && visited >= count) {
                break SearchResult::NotFound;
            }
        };
        gate.finish(self.reporter.as_mut());
        Ok(result)
    }

    /// Evaluate one predicate on frame `num`.
    fn matches(&mut self, num: u64, kind: &SearchKind) -> Result<bool, Error> {
        let flags = self.frames.get(num).ok_or(Error::NoSuchFrame(num))?.flags;
        if !kind.needs_bytes() {
            return Ok(match kind {
                SearchKind::Marked => flags.marked,
                _ => flags.ref_time,
            });
        }
        let record = self.read_frame_record(num)?;
        let data = &record.data[..];
        let case_sensitive = self.prefs.case_sensitive_search;

        let matched = match kind {
            SearchKind::Tree(pattern) => {
                let dissection = self.dissect_throwaway(num, data, true, false)?;
                dissection.tree.as_ref().is_some_and(|tree| {
                    tree.find_visible(|node| pattern.matches(&node.label, case_sensitive))
                        .is_some()
                })
            }
            SearchKind::Summary(pattern) => {
                let dissection = self.dissect_throwaway(num, data, false, true)?;
                dissection
                    .info()
                    .is_some_and(|info| pattern.matches(info, case_sensitive))
            }
            SearchKind::Bytes { needle, encoding } => {
                let found = match_bytes(data, needle, *encoding, case_sensitive);
                self.search.last_match = found.or(self.search.last_match);
                found.is_some()
            }
            SearchKind::Regex(re) => {
                let found = match_regex(data, re);
                self.search.last_match = found.or(self.search.last_match);
                found.is_some()
            }
            SearchKind::Filter(filter) => {
                let dissection = self.dissect_throwaway(num, data, true, false)?;
                self.filter_subject(num, &dissection, data)
                    .is_some_and(|subject| filter.matches(&subject))
            }
            SearchKind::Marked | SearchKind::TimeRef => false,
        };
        Ok(matched)
    }
}
