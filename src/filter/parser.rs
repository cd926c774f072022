//! Filter parser using nom.
//!
//! Grammar (operator precedence: NOT > AND > OR):
//! ```text
//! filter     = expr
//! expr       = term (("or" | "||") term)*
//! term       = factor (("and" | "&&") factor)*
//! factor     = ("not" | "!") factor | "(" expr ")" | primitive
//! primitive  = proto | net | portrange | port | host | greater | less
//!            | contains | marked | ignored | commented | protocol
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, peek, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

use super::ast::{Cidr, Direction, FilterExpr, Primitive, Protocol};

/// Parse a complete filter expression. The error is a diagnostic for the
/// user; callers wrap it with the filter text.
pub fn parse_filter(input: &str) -> Result<FilterExpr, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty filter expression".into());
    }

    match all_consuming(delimited(multispace0, expr, multispace0))(input) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
            let at = e.input.trim();
            if at.is_empty() {
                Err("unexpected end of filter".into())
            } else {
                Err(format!("unexpected input at \"{at}\""))
            }
        }
        Err(nom::Err::Incomplete(_)) => Err("unexpected end of filter".into()),
    }
}

/// A keyword that is not the prefix of a longer word.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(
        tag_no_case(kw),
        not(peek(satisfy(|c: char| c.is_ascii_alphanumeric() || c == '_'))),
    )
}

// =============================================================================
// Expression parsers
// =============================================================================

fn or_op(input: &str) -> IResult<&str, &str> {
    delimited(multispace0, alt((keyword("or"), tag("||"))), multispace0)(input)
}

fn and_op(input: &str) -> IResult<&str, &str> {
    delimited(multispace0, alt((keyword("and"), tag("&&"))), multispace0)(input)
}

/// OR level, lowest precedence.
fn expr(input: &str) -> IResult<&str, FilterExpr> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(preceded(or_op, term))(input)?;
    Ok((input, rest.into_iter().fold(first, FilterExpr::or)))
}

/// AND level.
fn term(input: &str) -> IResult<&str, FilterExpr> {
    let (input, first) = factor(input)?;
    let (input, rest) = many0(preceded(and_op, factor))(input)?;
    Ok((input, rest.into_iter().fold(first, FilterExpr::and)))
}

fn factor(input: &str) -> IResult<&str, FilterExpr> {
    alt((not_expr, paren_expr, primitive_expr))(input)
}

fn not_expr(input: &str) -> IResult<&str, FilterExpr> {
    let (input, _) = terminated(alt((keyword("not"), tag("!"))), multispace0)(input)?;
    let (input, expr) = factor(input)?;
    Ok((input, FilterExpr::negate(expr)))
}

fn paren_expr(input: &str) -> IResult<&str, FilterExpr> {
    delimited(
        pair(char('('), multispace0),
        expr,
        pair(multispace0, char(')')),
    )(input)
}

fn primitive_expr(input: &str) -> IResult<&str, FilterExpr> {
    map(primitive, FilterExpr::Primitive)(input)
}

// =============================================================================
// Primitive parsers
// =============================================================================

fn primitive(input: &str) -> IResult<&str, Primitive> {
    alt((
        proto_filter,
        net_filter,
        portrange_filter,
        port_filter,
        host_filter,
        length_filter,
        contains_filter,
        value(Primitive::Marked, keyword("marked")),
        value(Primitive::Ignored, keyword("ignored")),
        value(Primitive::Commented, keyword("commented")),
        map(protocol, Primitive::Protocol),
    ))(input)
}

fn protocol(input: &str) -> IResult<&str, Protocol> {
    alt((
        value(Protocol::Eth, keyword("eth")),
        value(Protocol::Arp, keyword("arp")),
        value(Protocol::Ip6, keyword("ip6")),
        value(Protocol::Ip, keyword("ip")),
        value(Protocol::Tcp, keyword("tcp")),
        value(Protocol::Udp, keyword("udp")),
        value(Protocol::Icmp6, keyword("icmp6")),
        value(Protocol::Icmp, keyword("icmp")),
    ))(input)
}

/// [src|dst] host ADDR
fn host_filter(input: &str) -> IResult<&str, Primitive> {
    let (input, dir) = opt(terminated(direction, multispace1))(input)?;
    let (input, _) = pair(keyword("host"), multispace1)(input)?;
    let (input, address) = ip_address(input)?;
    Ok((
        input,
        Primitive::Host {
            direction: dir.unwrap_or_default(),
            address,
        },
    ))
}

/// [src|dst] [tcp|udp] port N
fn port_filter(input: &str) -> IResult<&str, Primitive> {
    let (input, dir) = opt(terminated(direction, multispace1))(input)?;
    let (input, protocol) = opt(terminated(transport_protocol, multispace1))(input)?;
    let (input, _) = pair(keyword("port"), multispace1)(input)?;
    let (input, port) = port_number(input)?;
    Ok((
        input,
        Primitive::Port {
            direction: dir.unwrap_or_default(),
            protocol,
            port,
        },
    ))
}

/// [src|dst] [tcp|udp] portrange A-B
fn portrange_filter(input: &str) -> IResult<&str, Primitive> {
    let (input, dir) = opt(terminated(direction, multispace1))(input)?;
    let (input, protocol) = opt(terminated(transport_protocol, multispace1))(input)?;
    let (input, _) = pair(keyword("portrange"), multispace1)(input)?;
    let (input, (start, end)) = separated_pair(port_number, char('-'), port_number)(input)?;
    if start > end {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    Ok((
        input,
        Primitive::PortRange {
            direction: dir.unwrap_or_default(),
            protocol,
            start,
            end,
        },
    ))
}

/// [src|dst] net CIDR
fn net_filter(input: &str) -> IResult<&str, Primitive> {
    let (input, dir) = opt(terminated(direction, multispace1))(input)?;
    let (input, _) = pair(keyword("net"), multispace1)(input)?;
    let (input, cidr) = cidr(input)?;
    Ok((
        input,
        Primitive::Net {
            direction: dir.unwrap_or_default(),
            cidr,
        },
    ))
}

/// proto N
fn proto_filter(input: &str) -> IResult<&str, Primitive> {
    let (input, _) = pair(keyword("proto"), multispace1)(input)?;
    let (input, num) = map_res(digit1, |s: &str| s.parse::<u8>())(input)?;
    Ok((input, Primitive::Proto(num)))
}

/// greater N | less N
fn length_filter(input: &str) -> IResult<&str, Primitive> {
    let length = || map_res(digit1, |s: &str| s.parse::<u32>());
    alt((
        map(preceded(pair(keyword("greater"), multispace1), length()), Primitive::Greater),
        map(preceded(pair(keyword("less"), multispace1), length()), Primitive::Less),
    ))(input)
}

/// contains "text"
fn contains_filter(input: &str) -> IResult<&str, Primitive> {
    let (input, _) = pair(keyword("contains"), multispace1)(input)?;
    let (input, text) = delimited(char('"'), is_not("\""), char('"'))(input)?;
    Ok((input, Primitive::Contains(text.as_bytes().to_vec())))
}

// =============================================================================
// Helpers
// =============================================================================

fn direction(input: &str) -> IResult<&str, Direction> {
    alt((
        value(Direction::Src, keyword("src")),
        value(Direction::Dst, keyword("dst")),
    ))(input)
}

fn transport_protocol(input: &str) -> IResult<&str, Protocol> {
    alt((
        value(Protocol::Tcp, keyword("tcp")),
        value(Protocol::Udp, keyword("udp")),
    ))(input)
}

fn ip_address(input: &str) -> IResult<&str, IpAddr> {
    alt((map(ipv6_addr, IpAddr::V6), map(ipv4_addr, IpAddr::V4)))(input)
}

fn ipv4_addr(input: &str) -> IResult<&str, Ipv4Addr> {
    map_res(
        recognize(tuple((
            digit1,
            char('.'),
            digit1,
            char('.'),
            digit1,
            char('.'),
            digit1,
        ))),
        |s: &str| s.parse::<Ipv4Addr>(),
    )(input)
}

fn ipv6_addr(input: &str) -> IResult<&str, Ipv6Addr> {
    let (rest, text) =
        take_while1(|c: char| c.is_ascii_hexdigit() || c == ':' || c == '.')(input)?;
    if !text.contains(':') {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    match text.parse::<Ipv6Addr>() {
        Ok(addr) => Ok((rest, addr)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::MapRes,
        ))),
    }
}

fn cidr(input: &str) -> IResult<&str, Cidr> {
    let (input, address) = ip_address(input)?;
    let (input, _) = char('/')(input)?;
    let (rest, prefix_len) = map_res(digit1, |s: &str| s.parse::<u8>())(input)?;
    let max_prefix = if address.is_ipv4() { 32 } else { 128 };
    if prefix_len > max_prefix {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    Ok((rest, Cidr { address, prefix_len }))
}

fn port_number(input: &str) -> IResult<&str, u16> {
    map_res(digit1, |s: &str| s.parse::<u16>())(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prim(p: Primitive) -> FilterExpr {
        FilterExpr::Primitive(p)
    }

    #[test]
    fn test_parse_protocols() {
        assert_eq!(parse_filter("tcp").unwrap(), prim(Primitive::Protocol(Protocol::Tcp)));
        assert_eq!(parse_filter("IP6").unwrap(), prim(Primitive::Protocol(Protocol::Ip6)));
        assert_eq!(parse_filter("eth").unwrap(), prim(Primitive::Protocol(Protocol::Eth)));
        assert_eq!(
            parse_filter("icmp6").unwrap(),
            prim(Primitive::Protocol(Protocol::Icmp6))
        );
    }

    #[test]
    fn test_keyword_needs_boundary() {
        assert!(parse_filter("ipx").is_err());
        assert!(parse_filter("tcpdump").is_err());
    }

    #[test]
    fn test_parse_host_and_port() {
        assert_eq!(
            parse_filter("src host 10.0.0.1").unwrap(),
            prim(Primitive::Host {
                direction: Direction::Src,
                address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            })
        );
        assert_eq!(
            parse_filter("dst tcp port 443").unwrap(),
            prim(Primitive::Port {
                direction: Direction::Dst,
                protocol: Some(Protocol::Tcp),
                port: 443,
            })
        );
        assert_eq!(
            parse_filter("host ::1").unwrap(),
            prim(Primitive::Host {
                direction: Direction::SrcOrDst,
                address: IpAddr::V6(Ipv6Addr::LOCALHOST),
            })
        );
    }

    #[test]
    fn test_parse_portrange_and_net() {
        assert_eq!(
            parse_filter("udp portrange 1000-2000").unwrap(),
            prim(Primitive::PortRange {
                direction: Direction::SrcOrDst,
                protocol: Some(Protocol::Udp),
                start: 1000,
                end: 2000,
            })
        );
        assert!(parse_filter("portrange 90-80").is_err());
        assert!(parse_filter("net 10.0.0.0/33").is_err());
        assert!(matches!(
            parse_filter("src net 2001:db8::/32").unwrap(),
            FilterExpr::Primitive(Primitive::Net {
                direction: Direction::Src,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_frame_primitives() {
        assert_eq!(parse_filter("greater 100").unwrap(), prim(Primitive::Greater(100)));
        assert_eq!(parse_filter("less 64").unwrap(), prim(Primitive::Less(64)));
        assert_eq!(
            parse_filter("contains \"GET /\"").unwrap(),
            prim(Primitive::Contains(b"GET /".to_vec()))
        );
        assert_eq!(parse_filter("marked").unwrap(), prim(Primitive::Marked));
        assert_eq!(parse_filter("commented").unwrap(), prim(Primitive::Commented));
    }

    #[test]
    fn test_precedence() {
        let tcp = prim(Primitive::Protocol(Protocol::Tcp));
        let udp = prim(Primitive::Protocol(Protocol::Udp));
        let arp = prim(Primitive::Protocol(Protocol::Arp));

        // NOT > AND > OR
        assert_eq!(
            parse_filter("tcp or udp and not arp").unwrap(),
            FilterExpr::or(
                tcp.clone(),
                FilterExpr::and(udp.clone(), FilterExpr::negate(arp.clone()))
            )
        );
        assert_eq!(
            parse_filter("(tcp || udp) && !arp").unwrap(),
            FilterExpr::and(FilterExpr::or(tcp, udp), FilterExpr::negate(arp))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_filter("   ").unwrap_err(), "empty filter expression");
        assert!(parse_filter("tcp and").is_err());
        assert!(parse_filter("port 99999").is_err());
        assert!(parse_filter("(tcp").is_err());
        let diag = parse_filter("tcp bogus").unwrap_err();
        assert!(diag.contains("bogus"), "{diag}");
    }
}
