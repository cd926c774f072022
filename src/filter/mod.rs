//! Display and read filters.
//!
//! tcpdump-style expressions over the dissection summary, the raw bytes
//! and the frame's own state.
//!
//! # Supported syntax
//!
//! - protocols: `eth`, `arp`, `ip`, `ip6`, `tcp`, `udp`, `icmp`, `icmp6`
//! - `[src|dst] host ADDR`, `[src|dst] net CIDR`
//! - `[src|dst] [tcp|udp] port N`, `[src|dst] [tcp|udp] portrange A-B`
//! - `proto N`, `greater N`, `less N`, `contains "text"`
//! - frame state: `marked`, `ignored`, `commented`
//! - `and`/`&&`, `or`/`||`, `not`/`!`, parentheses

mod ast;
mod eval;
mod parser;

use std::fmt;

pub use ast::{Cidr, Direction, FilterExpr, Primitive, Protocol};
pub use eval::FilterSubject;
pub use parser::parse_filter;

use crate::error::FilterError;

/// A compiled filter together with its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFilter {
    text: String,
    expr: FilterExpr,
}

impl DisplayFilter {
    /// Compile `text`. Empty (or blank) text means "no filter".
    pub fn compile(text: &str) -> Result<Option<Self>, FilterError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let expr = parse_filter(text).map_err(|diag| FilterError::new(text, Some(diag)))?;
        Ok(Some(Self {
            text: text.to_string(),
            expr,
        }))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn expr(&self) -> &FilterExpr {
        &self.expr
    }

    pub fn matches(&self, subject: &FilterSubject<'_>) -> bool {
        self.expr.eval(subject)
    }
}

impl fmt::Display for DisplayFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissect::Dissection;
    use crate::frame::FrameFlags;
    use smallvec::smallvec;

    fn dissection() -> Dissection {
        Dissection {
            protocols: smallvec!["eth", "ip", "tcp"],
            src_addr: Some("10.0.0.1".parse().unwrap()),
            dst_addr: Some("192.168.1.9".parse().unwrap()),
            src_port: Some(40000),
            dst_port: Some(80),
            ip_proto: Some(6),
            ..Default::default()
        }
    }

    fn check(text: &str, flags: FrameFlags) -> bool {
        let d = dissection();
        let subject = FilterSubject {
            dissection: &d,
            data: b"....GET / HTTP/1.1",
            frame_len: 74,
            flags,
            commented: false,
        };
        DisplayFilter::compile(text)
            .unwrap()
            .unwrap()
            .matches(&subject)
    }

    #[test]
    fn test_empty_is_no_filter() {
        assert_eq!(DisplayFilter::compile("").unwrap(), None);
        assert_eq!(DisplayFilter::compile("  ").unwrap(), None);
    }

    #[test]
    fn test_malformed_reports_text_and_diagnostic() {
        let err = DisplayFilter::compile("tcp and").unwrap_err();
        assert_eq!(err.text, "tcp and");
        assert!(err.diagnostic.is_some());
        assert!(err.to_string().starts_with("\"tcp and\" isn't a valid display filter"));
    }

    #[test]
    fn test_protocol_and_address_primitives() {
        let none = FrameFlags::default();
        assert!(check("tcp", none));
        assert!(!check("udp", none));
        assert!(check("ip and not ip6", none));
        assert!(check("src host 10.0.0.1", none));
        assert!(!check("dst host 10.0.0.1", none));
        assert!(check("net 192.168.0.0/16", none));
        assert!(!check("src net 192.168.0.0/16", none));
        assert!(check("proto 6", none));
    }

    #[test]
    fn test_port_primitives() {
        let none = FrameFlags::default();
        assert!(check("port 80", none));
        assert!(check("dst tcp port 80", none));
        assert!(!check("udp port 80", none));
        assert!(!check("src port 80", none));
        assert!(check("portrange 39000-41000", none));
    }

    #[test]
    fn test_frame_primitives() {
        let none = FrameFlags::default();
        assert!(check("greater 74", none));
        assert!(!check("greater 75", none));
        assert!(check("less 74", none));
        assert!(check("contains \"HTTP\"", none));
        assert!(!check("contains \"SSH\"", none));
        assert!(!check("marked", none));
        let marked = FrameFlags {
            marked: true,
            ..Default::default()
        };
        assert!(check("marked && !ignored", marked));
        assert!(!check("commented", marked));
    }
}
