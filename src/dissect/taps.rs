//! Statistics listeners fed with every dissection.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::{Dissection, FrameContext};

/// A listener that sees every dissected frame during a read or retap.
pub trait Tap {
    fn name(&self) -> &'static str;

    /// Whether this tap needs the protocol tree built.
    fn wants_tree(&self) -> bool {
        false
    }

    /// Called before a retap replays the file.
    fn reset(&mut self);

    fn packet(&mut self, frame: &FrameContext, dissection: &Dissection);
}

/// Shared handle so the owner can read results while the registry feeds it.
impl<T: Tap> Tap for Rc<RefCell<T>> {
    fn name(&self) -> &'static str {
        self.borrow().name()
    }

    fn wants_tree(&self) -> bool {
        self.borrow().wants_tree()
    }

    fn reset(&mut self) {
        self.borrow_mut().reset();
    }

    fn packet(&mut self, frame: &FrameContext, dissection: &Dissection) {
        self.borrow_mut().packet(frame, dissection);
    }
}

/// Handle returned when a tap is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TapId(u64);

/// The set of registered taps. Survives redissection.
#[derive(Default)]
pub struct TapRegistry {
    taps: Vec<(TapId, Box<dyn Tap>)>,
    next_id: u64,
}

impl TapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tap: Box<dyn Tap>) -> TapId {
        let id = TapId(self.next_id);
        self.next_id += 1;
        tracing::debug!(tap = tap.name(), "registered tap");
        self.taps.push((id, tap));
        id
    }

    pub fn remove(&mut self, id: TapId) -> Option<Box<dyn Tap>> {
        let pos = self.taps.iter().position(|(t, _)| *t == id)?;
        Some(self.taps.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn wants_tree(&self) -> bool {
        self.taps.iter().any(|(_, t)| t.wants_tree())
    }

    pub fn reset_all(&mut self) {
        for (_, tap) in &mut self.taps {
            tap.reset();
        }
    }

    pub fn feed(&mut self, frame: &FrameContext, dissection: &Dissection) {
        for (_, tap) in &mut self.taps {
            tap.packet(frame, dissection);
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.taps.iter().map(|(_, t)| t.name()).collect()
    }
}

impl std::fmt::Debug for TapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Per-protocol frame and byte counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolCount {
    pub frames: u64,
    pub bytes: u64,
}

/// Counts frames and bytes per protocol, a flat protocol hierarchy.
#[derive(Debug, Default)]
pub struct ProtocolStats {
    counts: BTreeMap<&'static str, ProtocolCount>,
    frames: u64,
}

impl ProtocolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn get(&self, protocol: &str) -> Option<&ProtocolCount> {
        self.counts.get(protocol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ProtocolCount)> {
        self.counts.iter().map(|(k, v)| (*k, v))
    }
}

impl Tap for ProtocolStats {
    fn name(&self) -> &'static str {
        "protocol-stats"
    }

    fn reset(&mut self) {
        self.counts.clear();
        self.frames = 0;
    }

    fn packet(&mut self, frame: &FrameContext, dissection: &Dissection) {
        self.frames += 1;
        for proto in &dissection.protocols {
            let entry = self.counts.entry(proto).or_default();
            entry.frames += 1;
            entry.bytes += u64::from(frame.original_len);
        }
    }
}
