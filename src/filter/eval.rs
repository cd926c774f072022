//! Evaluation of filter expressions against a dissected frame.

use std::net::IpAddr;

use super::ast::{Direction, FilterExpr, Primitive, Protocol};
use crate::dissect::Dissection;
use crate::frame::FrameFlags;

/// Everything a filter can look at for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FilterSubject<'a> {
    pub dissection: &'a Dissection,
    /// Captured bytes
    pub data: &'a [u8],
    /// Length on the wire
    pub frame_len: u32,
    pub flags: FrameFlags,
    /// Whether the frame's effective comment is present
    pub commented: bool,
}

impl FilterExpr {
    pub fn eval(&self, subject: &FilterSubject<'_>) -> bool {
        match self {
            FilterExpr::Primitive(p) => p.eval(subject),
            FilterExpr::Not(e) => !e.eval(subject),
            FilterExpr::And(a, b) => a.eval(subject) && b.eval(subject),
            FilterExpr::Or(a, b) => a.eval(subject) || b.eval(subject),
        }
    }
}

fn by_direction<T, F>(direction: Direction, src: Option<T>, dst: Option<T>, test: F) -> bool
where
    F: Fn(T) -> bool,
{
    match direction {
        Direction::Src => src.is_some_and(&test),
        Direction::Dst => dst.is_some_and(&test),
        Direction::SrcOrDst => src.is_some_and(&test) || dst.is_some_and(&test),
    }
}

fn transport_matches(protocol: Option<Protocol>, d: &Dissection) -> bool {
    match protocol {
        Some(p) => d.ip_proto == p.ip_proto(),
        None => d.has_protocol("tcp") || d.has_protocol("udp"),
    }
}

impl Primitive {
    fn eval(&self, s: &FilterSubject<'_>) -> bool {
        let d = s.dissection;
        match self {
            Primitive::Protocol(p) => d.has_protocol(p.dissector_name()),
            Primitive::Host { direction, address } => {
                by_direction(*direction, d.src_addr, d.dst_addr, |a: IpAddr| a == *address)
            }
            Primitive::Port {
                direction,
                protocol,
                port,
            } => {
                transport_matches(*protocol, d)
                    && by_direction(*direction, d.src_port, d.dst_port, |p| p == *port)
            }
            Primitive::PortRange {
                direction,
                protocol,
                start,
                end,
            } => {
                transport_matches(*protocol, d)
                    && by_direction(*direction, d.src_port, d.dst_port, |p| {
                        (*start..=*end).contains(&p)
                    })
            }
            Primitive::Net { direction, cidr } => {
                by_direction(*direction, d.src_addr, d.dst_addr, |a: IpAddr| cidr.contains(&a))
            }
            Primitive::Proto(n) => d.ip_proto == Some(*n),
            Primitive::Greater(n) => s.frame_len >= *n,
            Primitive::Less(n) => s.frame_len <= *n,
            Primitive::Contains(needle) => {
                !needle.is_empty() && s.data.windows(needle.len()).any(|w| w == needle.as_slice())
            }
            Primitive::Marked => s.flags.marked,
            Primitive::Ignored => s.flags.ignored,
            Primitive::Commented => s.commented,
        }
    }
}
