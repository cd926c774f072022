//! Dissection: turning record bytes into protocol summaries, columns and a
//! tree of labelled fields.
//!
//! The pipeline talks to protocol code only through the [`Dissector`]
//! trait. A [`DissectionSession`] wraps one dissector instance for the
//! lifetime of a file (or until a redissect), and a [`TapRegistry`] holds
//! the statistics listeners fed with every dissection.

mod builtin;
mod taps;

use std::fmt;
use std::net::IpAddr;

use smallvec::SmallVec;

pub use builtin::EtherDissector;
pub use taps::{ProtocolStats, Tap, TapId, TapRegistry};

/// What a dissector knows about the frame it is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    pub num: u64,
    /// Link-layer type of the record
    pub encap: u32,
    pub abs_ts_ns: i64,
    /// Time relative to the reference frame
    pub rel_ts_ns: i64,
    pub capture_len: u32,
    pub original_len: u32,
}

/// Column identifiers, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnId {
    Number,
    Time,
    Source,
    Destination,
    Protocol,
    Length,
    Info,
}

impl ColumnId {
    pub const ALL: [ColumnId; 7] = [
        ColumnId::Number,
        ColumnId::Time,
        ColumnId::Source,
        ColumnId::Destination,
        ColumnId::Protocol,
        ColumnId::Length,
        ColumnId::Info,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            ColumnId::Number => "No.",
            ColumnId::Time => "Time",
            ColumnId::Source => "Source",
            ColumnId::Destination => "Destination",
            ColumnId::Protocol => "Protocol",
            ColumnId::Length => "Length",
            ColumnId::Info => "Info",
        }
    }
}

/// Rendered summary columns of one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Columns {
    pub number: String,
    pub time: String,
    pub source: String,
    pub destination: String,
    pub protocol: String,
    pub length: String,
    pub info: String,
}

impl Columns {
    pub fn get(&self, id: ColumnId) -> &str {
        match id {
            ColumnId::Number => &self.number,
            ColumnId::Time => &self.time,
            ColumnId::Source => &self.source,
            ColumnId::Destination => &self.destination,
            ColumnId::Protocol => &self.protocol,
            ColumnId::Length => &self.length,
            ColumnId::Info => &self.info,
        }
    }

    /// Fill the columns that don't depend on protocol content.
    pub fn for_frame(ctx: &FrameContext) -> Self {
        Self {
            number: ctx.num.to_string(),
            time: format_seconds(ctx.rel_ts_ns),
            length: ctx.original_len.to_string(),
            ..Default::default()
        }
    }
}

/// Format nanoseconds as seconds with microsecond precision.
pub fn format_seconds(ns: i64) -> String {
    let sign = if ns < 0 { "-" } else { "" };
    let abs = ns.unsigned_abs();
    format!("{sign}{}.{:06}", abs / 1_000_000_000, (abs % 1_000_000_000) / 1_000)
}

/// One labelled node of a protocol tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoNode {
    pub label: String,
    /// Hidden nodes exist for filtering but are never shown or searched
    pub hidden: bool,
    pub children: Vec<ProtoNode>,
}

impl ProtoNode {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            hidden: false,
            children: Vec::new(),
        }
    }

    pub fn hidden(label: impl Into<String>) -> Self {
        Self {
            hidden: true,
            ..Self::new(label)
        }
    }

    pub fn child(mut self, node: ProtoNode) -> Self {
        self.children.push(node);
        self
    }

    pub fn push(&mut self, node: ProtoNode) {
        self.children.push(node);
    }
}

/// The field tree of one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtoTree {
    pub roots: Vec<ProtoNode>,
}

impl ProtoTree {
    /// Depth-first search over visible nodes, parents before children.
    /// Hidden nodes and everything below them are skipped.
    pub fn find_visible<F>(&self, mut pred: F) -> Option<&ProtoNode>
    where
        F: FnMut(&ProtoNode) -> bool,
    {
        let mut stack: Vec<&ProtoNode> = self.roots.iter().rev().collect();
        while let Some(node) = stack.pop() {
            if node.hidden {
                continue;
            }
            if pred(node) {
                return Some(node);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    /// Render the visible tree, indented two spaces per level.
    pub fn render(&self) -> String {
        fn walk(node: &ProtoNode, depth: usize, out: &mut String) {
            if node.hidden {
                return;
            }
            out.push_str(&"  ".repeat(depth));
            out.push_str(&node.label);
            out.push('\n');
            for child in &node.children {
                walk(child, depth + 1, out);
            }
        }
        let mut out = String::new();
        for root in &self.roots {
            walk(root, 0, &mut out);
        }
        out
    }
}

/// Result of dissecting one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dissection {
    /// Protocol stack, outermost first (e.g. `eth`, `ip`, `tcp`)
    pub protocols: SmallVec<[&'static str; 6]>,
    pub src_addr: Option<IpAddr>,
    pub dst_addr: Option<IpAddr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub ip_proto: Option<u8>,
    /// Present when columns were requested
    pub columns: Option<Columns>,
    /// Present when a tree was requested
    pub tree: Option<ProtoTree>,
    /// Earlier frames this one was built from
    pub depends_on: SmallVec<[u64; 2]>,
}

impl Dissection {
    pub fn has_protocol(&self, name: &str) -> bool {
        self.protocols.iter().any(|p| *p == name)
    }

    /// Placeholder for frames excluded from dissection.
    pub fn ignored(ctx: &FrameContext, want_columns: bool) -> Self {
        let columns = want_columns.then(|| Columns {
            info: "<Ignored>".into(),
            ..Columns::for_frame(ctx)
        });
        Self {
            columns,
            ..Default::default()
        }
    }

    pub fn info(&self) -> Option<&str> {
        self.columns.as_ref().map(|c| c.info.as_str())
    }
}

/// Protocol decoding engine.
pub trait Dissector {
    /// Decode `data`. Building the tree and the columns is optional work the
    /// caller asks for only when it needs them.
    fn dissect(
        &mut self,
        ctx: &FrameContext,
        data: &[u8],
        want_tree: bool,
        want_columns: bool,
    ) -> Dissection;

    /// Forget all state accumulated across frames.
    fn reset(&mut self);
}

/// Builds a fresh dissector for a new session.
pub type DissectorFactory = Box<dyn Fn() -> Box<dyn Dissector>>;

/// The default factory: an [`EtherDissector`].
pub fn default_factory() -> DissectorFactory {
    Box::new(|| Box::new(EtherDissector::new()))
}

/// One dissector instance and the bookkeeping around it.
pub struct DissectionSession {
    dissector: Box<dyn Dissector>,
    dissected: u64,
}

impl DissectionSession {
    pub fn new(dissector: Box<dyn Dissector>) -> Self {
        Self {
            dissector,
            dissected: 0,
        }
    }

    /// Dissect one frame and feed the result to the taps.
    pub fn run(
        &mut self,
        ctx: &FrameContext,
        data: &[u8],
        want_tree: bool,
        want_columns: bool,
        taps: &mut TapRegistry,
    ) -> Dissection {
        let dissection = self.dissect(ctx, data, want_tree || taps.wants_tree(), want_columns);
        taps.feed(ctx, &dissection);
        dissection
    }

    /// Dissect one frame without involving taps.
    pub fn dissect(
        &mut self,
        ctx: &FrameContext,
        data: &[u8],
        want_tree: bool,
        want_columns: bool,
    ) -> Dissection {
        self.dissected += 1;
        self.dissector.dissect(ctx, data, want_tree, want_columns)
    }

    /// Number of dissections run in this session.
    pub fn dissected(&self) -> u64 {
        self.dissected
    }

    pub fn reset(&mut self) {
        self.dissector.reset();
        self.dissected = 0;
    }
}

impl fmt::Debug for DissectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DissectionSession")
            .field("dissected", &self.dissected)
            .finish()
    }
}
