//! Built-in dissector for Ethernet, raw IP and loopback captures.
//!
//! Decodes link, network and transport headers with `etherparse` header
//! slices. Anything above the transport layer is shown as opaque data.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use etherparse::{
    Ethernet2HeaderSlice, Ipv4HeaderSlice, Ipv6HeaderSlice, TcpHeaderSlice, UdpHeaderSlice,
};

use super::{Columns, Dissection, Dissector, FrameContext, ProtoNode, ProtoTree};
use crate::io::linktype;

/// Well-known EtherTypes.
pub mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const VLAN: u16 = 0x8100;
    pub const QINQ: u16 = 0x88A8;
    pub const IPV6: u16 = 0x86DD;
}

/// IP protocol numbers.
pub mod ip_proto {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const ICMPV6: u8 = 58;
}

/// Undirected transport conversation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ConversationKey {
    proto: u8,
    a: (IpAddr, u16),
    b: (IpAddr, u16),
}

impl ConversationKey {
    fn new(proto: u8, src: (IpAddr, u16), dst: (IpAddr, u16)) -> Self {
        let (a, b) = if src <= dst { (src, dst) } else { (dst, src) };
        Self { proto, a, b }
    }
}

#[derive(Debug, Default)]
struct Conversation {
    index: u32,
    /// Per direction: last frame that carried an unfinished TCP segment,
    /// with the sequence number its successor must start at.
    pending_segment: [Option<(u64, u32)>; 2],
}

/// Dissector for the link types this crate knows.
#[derive(Debug, Default)]
pub struct EtherDissector {
    conversations: HashMap<ConversationKey, Conversation>,
}

impl EtherDissector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transport conversations seen since the last reset.
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}

/// Accumulates the dissection of one frame.
struct Builder<'c> {
    ctx: &'c FrameContext,
    out: Dissection,
    tree: Option<Vec<ProtoNode>>,
    protocol_col: &'static str,
    source_col: String,
    dest_col: String,
    info: String,
}

impl<'c> Builder<'c> {
    fn new(ctx: &'c FrameContext, want_tree: bool) -> Self {
        Self {
            ctx,
            out: Dissection::default(),
            tree: want_tree.then(Vec::new),
            protocol_col: "",
            source_col: String::new(),
            dest_col: String::new(),
            info: String::new(),
        }
    }

    fn layer(&mut self, proto: &'static str, column: &'static str) {
        self.out.protocols.push(proto);
        self.protocol_col = column;
    }

    /// Add a tree node, building it only when a tree was requested.
    fn node<F: FnOnce() -> ProtoNode>(&mut self, build: F) {
        if let Some(tree) = self.tree.as_mut() {
            tree.push(build());
        }
    }

    fn finish(mut self, want_columns: bool) -> Dissection {
        if let Some(roots) = self.tree.take() {
            self.out.tree = Some(ProtoTree { roots });
        }
        if want_columns {
            self.out.columns = Some(Columns {
                source: self.source_col,
                destination: self.dest_col,
                protocol: self.protocol_col.to_string(),
                info: self.info,
                ..Columns::for_frame(self.ctx)
            });
        }
        self.out
    }
}

fn format_mac(mac: &[u8]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn payload_node(data: &[u8]) -> ProtoNode {
    ProtoNode::new(format!("Data ({} bytes)", data.len()))
}

fn malformed(b: &mut Builder<'_>, what: &str, err: impl std::fmt::Display) {
    tracing::trace!(frame = b.ctx.num, "{what} parse error: {err}");
    let label = format!("[Malformed {what}: {err}]");
    b.node(|| ProtoNode::new(label.clone()));
    if b.info.is_empty() {
        b.info = label;
    }
}

impl EtherDissector {
    fn link_layer(&mut self, b: &mut Builder<'_>, data: &[u8]) {
        match b.ctx.encap {
            linktype::ETHERNET => self.ethernet(b, data),
            linktype::RAW => match data.first().map(|v| v >> 4) {
                Some(4) => self.ipv4(b, data),
                Some(6) => self.ipv6(b, data),
                _ => self.opaque(b, data),
            },
            linktype::IPV4 => self.ipv4(b, data),
            linktype::IPV6 => self.ipv6(b, data),
            linktype::NULL => self.loopback(b, data),
            _ => self.opaque(b, data),
        }
    }

    fn opaque(&mut self, b: &mut Builder<'_>, data: &[u8]) {
        if !data.is_empty() {
            b.layer("data", "DATA");
            b.node(|| payload_node(data));
        }
    }

    fn loopback(&mut self, b: &mut Builder<'_>, data: &[u8]) {
        if data.len() < 4 {
            return malformed(b, "Null/Loopback", "header too short");
        }
        // Host byte order of the capturing machine; try both.
        let le = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let be = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let family = if le < 0x100 { le } else { be };
        b.layer("null", "NULL");
        b.node(|| ProtoNode::new(format!("Null/Loopback, Family: {family}")));
        let rest = &data[4..];
        match family {
            2 => self.ipv4(b, rest),
            24 | 28 | 30 => self.ipv6(b, rest),
            _ => self.opaque(b, rest),
        }
    }

    fn ethernet(&mut self, b: &mut Builder<'_>, data: &[u8]) {
        let eth = match Ethernet2HeaderSlice::from_slice(data) {
            Ok(eth) => eth,
            Err(e) => return malformed(b, "Ethernet", e),
        };
        let src = format_mac(&eth.source());
        let dst = format_mac(&eth.destination());
        let ether_type = eth.ether_type().0;
        b.layer("eth", "Ethernet");
        b.node(|| {
            ProtoNode::new(format!("Ethernet II, Src: {src}, Dst: {dst}"))
                .child(ProtoNode::new(format!("Destination: {dst}")))
                .child(ProtoNode::new(format!("Source: {src}")))
                .child(ProtoNode::new(format!("Type: 0x{ether_type:04x}")))
        });
        b.source_col = src;
        b.dest_col = dst;
        b.info = format!("Ethertype 0x{ether_type:04x}");

        let header_len = eth.slice().len();
        self.ethertype(b, ether_type, &data[header_len..]);
    }

    fn ethertype(&mut self, b: &mut Builder<'_>, ether_type: u16, data: &[u8]) {
        match ether_type {
            ethertype::IPV4 => self.ipv4(b, data),
            ethertype::IPV6 => self.ipv6(b, data),
            ethertype::ARP => self.arp(b, data),
            ethertype::VLAN | ethertype::QINQ => self.vlan(b, data),
            _ => self.opaque(b, data),
        }
    }

    fn vlan(&mut self, b: &mut Builder<'_>, data: &[u8]) {
        // TPID was consumed with the Ethernet header; TCI then inner type.
        if data.len() < 4 {
            return malformed(b, "802.1Q", "tag too short");
        }
        let tci = u16::from_be_bytes([data[0], data[1]]);
        let inner = u16::from_be_bytes([data[2], data[3]]);
        let vlan_id = tci & 0x0FFF;
        let priority = (tci >> 13) & 0x07;
        b.layer("vlan", "802.1Q");
        b.node(|| {
            ProtoNode::new(format!("802.1Q Virtual LAN, PRI: {priority}, ID: {vlan_id}"))
                .child(ProtoNode::new(format!("Type: 0x{inner:04x}")))
        });
        self.ethertype(b, inner, &data[4..]);
    }

    fn arp(&mut self, b: &mut Builder<'_>, data: &[u8]) {
        // Only Ethernet/IPv4 ARP: 28 bytes.
        if data.len() < 28 {
            return malformed(b, "ARP", "packet too short");
        }
        let op = u16::from_be_bytes([data[6], data[7]]);
        let sender_mac = format_mac(&data[8..14]);
        let sender_ip = Ipv4Addr::new(data[14], data[15], data[16], data[17]);
        let target_ip = Ipv4Addr::new(data[24], data[25], data[26], data[27]);
        b.layer("arp", "ARP");
        b.info = match op {
            1 => format!("Who has {target_ip}? Tell {sender_ip}"),
            2 => format!("{sender_ip} is at {sender_mac}"),
            other => format!("Opcode {other}"),
        };
        let summary = b.info.clone();
        b.node(|| {
            ProtoNode::new(format!("Address Resolution Protocol ({summary})"))
                .child(ProtoNode::new(format!("Opcode: {op}")))
                .child(ProtoNode::new(format!("Sender MAC address: {sender_mac}")))
                .child(ProtoNode::new(format!("Sender IP address: {sender_ip}")))
                .child(ProtoNode::new(format!("Target IP address: {target_ip}")))
        });
    }

    fn ipv4(&mut self, b: &mut Builder<'_>, data: &[u8]) {
        let ip = match Ipv4HeaderSlice::from_slice(data) {
            Ok(ip) => ip,
            Err(e) => return malformed(b, "IPv4", e),
        };
        let src = ip.source_addr();
        let dst = ip.destination_addr();
        let proto = ip.protocol().0;
        let ttl = ip.ttl();
        let header_len = ip.slice().len();
        let total_len = usize::from(ip.total_len());
        // Honor the total length but never read past the captured bytes.
        let end = total_len.clamp(header_len, data.len());

        b.layer("ip", "IPv4");
        b.node(|| {
            ProtoNode::new(format!("Internet Protocol Version 4, Src: {src}, Dst: {dst}"))
                .child(ProtoNode::new(format!("Total Length: {total_len}")))
                .child(ProtoNode::new(format!("Time to Live: {ttl}")))
                .child(ProtoNode::new(format!("Protocol: {proto}")))
                .child(ProtoNode::new(format!("Source Address: {src}")))
                .child(ProtoNode::new(format!("Destination Address: {dst}")))
        });
        self.network_done(b, IpAddr::V4(src), IpAddr::V4(dst), proto);
        self.transport(b, proto, &data[header_len..end]);
    }

    fn ipv6(&mut self, b: &mut Builder<'_>, data: &[u8]) {
        let ip = match Ipv6HeaderSlice::from_slice(data) {
            Ok(ip) => ip,
            Err(e) => return malformed(b, "IPv6", e),
        };
        let src: Ipv6Addr = ip.source_addr();
        let dst: Ipv6Addr = ip.destination_addr();
        let next = ip.next_header().0;
        let hop_limit = ip.hop_limit();
        let header_len = ip.slice().len();
        let payload_len = usize::from(ip.payload_length());
        let end = (header_len + payload_len).clamp(header_len, data.len());

        b.layer("ip6", "IPv6");
        b.node(|| {
            ProtoNode::new(format!("Internet Protocol Version 6, Src: {src}, Dst: {dst}"))
                .child(ProtoNode::new(format!("Payload Length: {payload_len}")))
                .child(ProtoNode::new(format!("Next Header: {next}")))
                .child(ProtoNode::new(format!("Hop Limit: {hop_limit}")))
        });
        self.network_done(b, IpAddr::V6(src), IpAddr::V6(dst), next);
        self.transport(b, next, &data[header_len..end]);
    }

    fn network_done(&mut self, b: &mut Builder<'_>, src: IpAddr, dst: IpAddr, proto: u8) {
        b.out.src_addr = Some(src);
        b.out.dst_addr = Some(dst);
        b.out.ip_proto = Some(proto);
        b.source_col = src.to_string();
        b.dest_col = dst.to_string();
        b.info = format!("IP protocol {proto}");
    }

    fn transport(&mut self, b: &mut Builder<'_>, proto: u8, data: &[u8]) {
        match proto {
            ip_proto::TCP => self.tcp(b, data),
            ip_proto::UDP => self.udp(b, data),
            ip_proto::ICMP => self.icmp(b, data, false),
            ip_proto::ICMPV6 => self.icmp(b, data, true),
            _ => self.opaque(b, data),
        }
    }

    /// Look up (or create) the conversation for a transport flow and
    /// return its index and the direction of this frame within it.
    fn conversation(&mut self, b: &Builder<'_>, proto: u8, sport: u16, dport: u16) -> (u32, usize) {
        let (Some(src), Some(dst)) = (b.out.src_addr, b.out.dst_addr) else {
            return (0, 0);
        };
        let key = ConversationKey::new(proto, (src, sport), (dst, dport));
        let direction = usize::from(key.a != (src, sport));
        let next_index = self.conversations.len() as u32;
        let conv = self.conversations.entry(key).or_insert_with(|| Conversation {
            index: next_index,
            ..Default::default()
        });
        (conv.index, direction)
    }

    fn tcp(&mut self, b: &mut Builder<'_>, data: &[u8]) {
        let tcp = match TcpHeaderSlice::from_slice(data) {
            Ok(tcp) => tcp,
            Err(e) => return malformed(b, "TCP", e),
        };
        let sport = tcp.source_port();
        let dport = tcp.destination_port();
        let seq = tcp.sequence_number();
        let ack = tcp.acknowledgment_number();
        let window = tcp.window_size();
        let header_len = tcp.slice().len();
        let payload = &data[header_len..];
        let len = payload.len() as u32;

        let mut flags = Vec::new();
        for (set, name) in [
            (tcp.fin(), "FIN"),
            (tcp.syn(), "SYN"),
            (tcp.rst(), "RST"),
            (tcp.psh(), "PSH"),
            (tcp.ack(), "ACK"),
            (tcp.urg(), "URG"),
        ] {
            if set {
                flags.push(name);
            }
        }
        let flags = flags.join(", ");

        let (stream, direction) = self.conversation(b, ip_proto::TCP, sport, dport);
        // A segment continuing an unfinished one depends on its predecessor.
        if let Some((key_src, key_dst)) = b.out.src_addr.zip(b.out.dst_addr) {
            let key = ConversationKey::new(ip_proto::TCP, (key_src, sport), (key_dst, dport));
            if let Some(conv) = self.conversations.get_mut(&key) {
                if len > 0 {
                    if let Some((prev, next_seq)) = conv.pending_segment[direction] {
                        if next_seq == seq && prev < b.ctx.num {
                            b.out.depends_on.push(prev);
                        }
                    }
                    conv.pending_segment[direction] = (!tcp.psh() && !tcp.fin())
                        .then(|| (b.ctx.num, seq.wrapping_add(len)));
                }
            }
        }

        b.out.src_port = Some(sport);
        b.out.dst_port = Some(dport);
        b.layer("tcp", "TCP");
        b.info = format!("{sport} → {dport} [{flags}] Seq={seq} Ack={ack} Win={window} Len={len}");
        b.node(|| {
            ProtoNode::new(format!(
                "Transmission Control Protocol, Src Port: {sport}, Dst Port: {dport}, Seq: {seq}, Len: {len}"
            ))
            .child(ProtoNode::new(format!("Source Port: {sport}")))
            .child(ProtoNode::new(format!("Destination Port: {dport}")))
            .child(ProtoNode::hidden(format!("Stream index: {stream}")))
            .child(ProtoNode::new(format!("Sequence Number: {seq}")))
            .child(ProtoNode::new(format!("Acknowledgment Number: {ack}")))
            .child(ProtoNode::new(format!("Flags: [{flags}]")))
            .child(ProtoNode::new(format!("Window: {window}")))
        });
        if !payload.is_empty() {
            b.node(|| payload_node(payload));
        }
    }

    fn udp(&mut self, b: &mut Builder<'_>, data: &[u8]) {
        let udp = match UdpHeaderSlice::from_slice(data) {
            Ok(udp) => udp,
            Err(e) => return malformed(b, "UDP", e),
        };
        let sport = udp.source_port();
        let dport = udp.destination_port();
        let length = udp.length();
        // UDP header is always 8 bytes
        let payload = &data[8..];
        let (stream, _) = self.conversation(b, ip_proto::UDP, sport, dport);

        b.out.src_port = Some(sport);
        b.out.dst_port = Some(dport);
        b.layer("udp", "UDP");
        b.info = format!("{sport} → {dport} Len={}", payload.len());
        b.node(|| {
            ProtoNode::new(format!(
                "User Datagram Protocol, Src Port: {sport}, Dst Port: {dport}"
            ))
            .child(ProtoNode::new(format!("Source Port: {sport}")))
            .child(ProtoNode::new(format!("Destination Port: {dport}")))
            .child(ProtoNode::new(format!("Length: {length}")))
            .child(ProtoNode::hidden(format!("Stream index: {stream}")))
        });
        if !payload.is_empty() {
            b.node(|| payload_node(payload));
        }
    }

    fn icmp(&mut self, b: &mut Builder<'_>, data: &[u8], v6: bool) {
        if data.len() < 4 {
            return malformed(b, if v6 { "ICMPv6" } else { "ICMP" }, "header too short");
        }
        let (icmp_type, code) = (data[0], data[1]);
        let description = match (v6, icmp_type) {
            (false, 0) | (true, 129) => "Echo (ping) reply".to_string(),
            (false, 8) | (true, 128) => "Echo (ping) request".to_string(),
            (false, 3) | (true, 1) => "Destination unreachable".to_string(),
            (false, 11) | (true, 3) => "Time-to-live exceeded".to_string(),
            (true, 135) => "Neighbor Solicitation".to_string(),
            (true, 136) => "Neighbor Advertisement".to_string(),
            _ => format!("Type {icmp_type}"),
        };
        let (proto, column, title) = if v6 {
            ("icmp6", "ICMPv6", "Internet Control Message Protocol v6")
        } else {
            ("icmp", "ICMP", "Internet Control Message Protocol")
        };
        b.layer(proto, column);
        b.info = description.clone();
        b.node(|| {
            ProtoNode::new(title)
                .child(ProtoNode::new(format!("Type: {icmp_type} ({description})")))
                .child(ProtoNode::new(format!("Code: {code}")))
        });
    }
}

impl Dissector for EtherDissector {
    fn dissect(
        &mut self,
        ctx: &FrameContext,
        data: &[u8],
        want_tree: bool,
        want_columns: bool,
    ) -> Dissection {
        let mut b = Builder::new(ctx, want_tree);
        let (num, caplen, origlen) = (ctx.num, ctx.capture_len, ctx.original_len);
        let arrival = super::format_seconds(ctx.abs_ts_ns);
        let relative = super::format_seconds(ctx.rel_ts_ns);
        b.node(|| {
            ProtoNode::new(format!(
                "Frame {num}: {origlen} bytes on wire, {caplen} bytes captured"
            ))
            .child(ProtoNode::new(format!("Epoch Time: {arrival} seconds")))
            .child(ProtoNode::new(format!("Time since reference or first frame: {relative} seconds")))
            .child(ProtoNode::new(format!("Frame Number: {num}")))
        });
        self.link_layer(&mut b, data);
        b.finish(want_columns)
    }

    fn reset(&mut self) {
        self.conversations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(num: u64, encap: u32, len: usize) -> FrameContext {
        FrameContext {
            num,
            encap,
            abs_ts_ns: 0,
            rel_ts_ns: 0,
            capture_len: len as u32,
            original_len: len as u32,
        }
    }

    fn ipv4_header(proto: u8, payload_len: usize, src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let total = (20 + payload_len) as u16;
        let mut h = vec![0x45, 0, 0, 0, 0, 0, 0x40, 0, 64, proto, 0, 0];
        h[2..4].copy_from_slice(&total.to_be_bytes());
        h.extend_from_slice(&src);
        h.extend_from_slice(&dst);
        h
    }

    fn eth_frame(ether_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut f = vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb];
        f.extend_from_slice(&ether_type.to_be_bytes());
        f.extend_from_slice(payload);
        f
    }

    fn udp_packet(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
        let mut udp = Vec::new();
        udp.extend_from_slice(&sport.to_be_bytes());
        udp.extend_from_slice(&dport.to_be_bytes());
        udp.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
        udp.extend_from_slice(&[0, 0]);
        udp.extend_from_slice(payload);
        let mut ip = ipv4_header(ip_proto::UDP, udp.len(), [10, 0, 0, 1], [10, 0, 0, 2]);
        ip.extend_from_slice(&udp);
        eth_frame(ethertype::IPV4, &ip)
    }

    fn tcp_packet(sport: u16, dport: u16, seq: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut tcp = Vec::new();
        tcp.extend_from_slice(&sport.to_be_bytes());
        tcp.extend_from_slice(&dport.to_be_bytes());
        tcp.extend_from_slice(&seq.to_be_bytes());
        tcp.extend_from_slice(&0u32.to_be_bytes());
        tcp.extend_from_slice(&[0x50, flags, 0xff, 0xff, 0, 0, 0, 0]);
        tcp.extend_from_slice(payload);
        let mut ip = ipv4_header(ip_proto::TCP, tcp.len(), [10, 0, 0, 1], [10, 0, 0, 2]);
        ip.extend_from_slice(&tcp);
        eth_frame(ethertype::IPV4, &ip)
    }

    #[test]
    fn test_udp_over_ethernet() {
        let data = udp_packet(5353, 53, b"hello");
        let mut d = EtherDissector::new();
        let out = d.dissect(&ctx(1, linktype::ETHERNET, data.len()), &data, true, true);

        assert_eq!(out.protocols.as_slice(), &["eth", "ip", "udp"]);
        assert_eq!(out.src_port, Some(5353));
        assert_eq!(out.dst_port, Some(53));
        assert_eq!(out.ip_proto, Some(ip_proto::UDP));
        let cols = out.columns.as_ref().unwrap();
        assert_eq!(cols.protocol, "UDP");
        assert_eq!(cols.source, "10.0.0.1");
        assert_eq!(cols.info, "5353 → 53 Len=5");

        let tree = out.tree.unwrap();
        assert!(tree.find_visible(|n| n.label == "Data (5 bytes)").is_some());
        assert!(tree.find_visible(|n| n.label.starts_with("Stream index")).is_none());
    }

    #[test]
    fn test_tree_and_columns_are_optional() {
        let data = udp_packet(1, 2, b"");
        let mut d = EtherDissector::new();
        let out = d.dissect(&ctx(1, linktype::ETHERNET, data.len()), &data, false, false);
        assert!(out.tree.is_none());
        assert!(out.columns.is_none());
        assert!(out.has_protocol("udp"));
    }

    #[test]
    fn test_tcp_flags_and_continuation() {
        let mut d = EtherDissector::new();
        let first = tcp_packet(40000, 80, 100, 0x10, b"GET / HT");
        let second = tcp_packet(40000, 80, 108, 0x18, b"TP/1.1\r\n");

        let a = d.dissect(&ctx(1, linktype::ETHERNET, first.len()), &first, false, true);
        assert!(a.depends_on.is_empty());
        assert_eq!(a.info().unwrap(), "40000 → 80 [ACK] Seq=100 Ack=0 Win=65535 Len=8");

        let b = d.dissect(&ctx(2, linktype::ETHERNET, second.len()), &second, false, true);
        assert_eq!(b.depends_on.as_slice(), &[1]);
        assert!(b.info().unwrap().contains("[PSH, ACK]"));
        assert_eq!(d.conversation_count(), 1);

        d.reset();
        assert_eq!(d.conversation_count(), 0);
    }

    #[test]
    fn test_arp_request() {
        let mut arp = vec![0, 1, 8, 0, 6, 4, 0, 1];
        arp.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 192, 168, 1, 1]);
        arp.extend_from_slice(&[0, 0, 0, 0, 0, 0, 192, 168, 1, 2]);
        let data = eth_frame(ethertype::ARP, &arp);
        let mut d = EtherDissector::new();
        let out = d.dissect(&ctx(1, linktype::ETHERNET, data.len()), &data, false, true);
        assert_eq!(out.info(), Some("Who has 192.168.1.2? Tell 192.168.1.1"));
        assert_eq!(out.columns.unwrap().protocol, "ARP");
    }

    #[test]
    fn test_raw_ip_icmp() {
        let mut data = ipv4_header(ip_proto::ICMP, 8, [1, 1, 1, 1], [2, 2, 2, 2]);
        data.extend_from_slice(&[8, 0, 0, 0, 0, 1, 0, 1]);
        let mut d = EtherDissector::new();
        let out = d.dissect(&ctx(1, linktype::RAW, data.len()), &data, false, true);
        assert_eq!(out.protocols.as_slice(), &["ip", "icmp"]);
        assert_eq!(out.info(), Some("Echo (ping) request"));
    }

    #[test]
    fn test_truncated_frame_is_malformed() {
        let data = [0u8; 6];
        let mut d = EtherDissector::new();
        let out = d.dissect(&ctx(1, linktype::ETHERNET, 6), &data, true, true);
        assert!(out.protocols.is_empty());
        assert!(out.info().unwrap().starts_with("[Malformed Ethernet"));
    }
}
