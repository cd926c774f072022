//! AST types for filter expressions.

use std::net::IpAddr;

/// Direction qualifier for host/port/net primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Src,
    Dst,
    /// Either source or destination
    #[default]
    SrcOrDst,
}

/// Protocol keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Eth,
    Arp,
    /// IPv4
    Ip,
    /// IPv6
    Ip6,
    Tcp,
    Udp,
    Icmp,
    Icmp6,
}

impl Protocol {
    /// Name as it appears in a dissection's protocol stack.
    pub fn dissector_name(&self) -> &'static str {
        match self {
            Protocol::Eth => "eth",
            Protocol::Arp => "arp",
            Protocol::Ip => "ip",
            Protocol::Ip6 => "ip6",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Icmp6 => "icmp6",
        }
    }

    /// IP protocol number of a transport protocol.
    pub fn ip_proto(&self) -> Option<u8> {
        match self {
            Protocol::Tcp => Some(6),
            Protocol::Udp => Some(17),
            _ => None,
        }
    }
}

/// CIDR network specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    pub address: IpAddr,
    pub prefix_len: u8,
}

impl Cidr {
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.address, addr) {
            (IpAddr::V4(net), IpAddr::V4(a)) => {
                let mask = prefix_mask_u32(self.prefix_len);
                u32::from(net) & mask == u32::from(*a) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(a)) => {
                let mask = prefix_mask_u128(self.prefix_len);
                u128::from(net) & mask == u128::from(*a) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_u32(len: u8) -> u32 {
    match len {
        0 => 0,
        n => u32::MAX << (32 - u32::from(n.min(32))),
    }
}

fn prefix_mask_u128(len: u8) -> u128 {
    match len {
        0 => 0,
        n => u128::MAX << (128 - u32::from(n.min(128))),
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// Primitive filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primitive {
    /// tcp, udp, eth, ...
    Protocol(Protocol),

    /// host 1.2.3.4, src host ::1
    Host { direction: Direction, address: IpAddr },

    /// port 80, dst tcp port 443
    Port {
        direction: Direction,
        protocol: Option<Protocol>,
        port: u16,
    },

    /// portrange 80-90
    PortRange {
        direction: Direction,
        protocol: Option<Protocol>,
        start: u16,
        end: u16,
    },

    /// net 10.0.0.0/8
    Net { direction: Direction, cidr: Cidr },

    /// proto 6
    Proto(u8),

    /// greater N: frame length at least N
    Greater(u32),

    /// less N: frame length at most N
    Less(u32),

    /// contains "text": raw bytes include the text
    Contains(Vec<u8>),

    Marked,
    Ignored,
    Commented,
}

/// Boolean expression combining primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    Primitive(Primitive),
    Not(Box<FilterExpr>),
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
}

impl FilterExpr {
    pub fn negate(expr: FilterExpr) -> Self {
        FilterExpr::Not(Box::new(expr))
    }

    pub fn and(left: FilterExpr, right: FilterExpr) -> Self {
        FilterExpr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: FilterExpr, right: FilterExpr) -> Self {
        FilterExpr::Or(Box::new(left), Box::new(right))
    }
}
