//! Synthetic packets and classic pcap files for the integration tests.

#![allow(dead_code)]

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use capfile::capture::CaptureFile;
use capfile::config::Preferences;

pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;

fn ipv4_header(proto: u8, payload_len: usize, src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
    let total = (20 + payload_len) as u16;
    let mut h = vec![0x45, 0, 0, 0, 0, 0, 0x40, 0, 64, proto, 0, 0];
    h[2..4].copy_from_slice(&total.to_be_bytes());
    h.extend_from_slice(&src);
    h.extend_from_slice(&dst);
    h
}

fn eth_frame(payload: &[u8]) -> Vec<u8> {
    let mut f = vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb];
    f.extend_from_slice(&0x0800u16.to_be_bytes());
    f.extend_from_slice(payload);
    f
}

/// Ethernet/IPv4/UDP from 10.0.0.1 to 10.0.0.2. The payload starts at byte 42.
pub fn udp_packet(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let mut udp = Vec::new();
    udp.extend_from_slice(&sport.to_be_bytes());
    udp.extend_from_slice(&dport.to_be_bytes());
    udp.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    udp.extend_from_slice(&[0, 0]);
    udp.extend_from_slice(payload);
    let mut ip = ipv4_header(IP_PROTO_UDP, udp.len(), [10, 0, 0, 1], [10, 0, 0, 2]);
    ip.extend_from_slice(&udp);
    eth_frame(&ip)
}

/// Ethernet/IPv4/TCP with PSH+ACK. The payload starts at byte 54.
pub fn tcp_packet(sport: u16, dport: u16, seq: u32, payload: &[u8]) -> Vec<u8> {
    let mut tcp = Vec::new();
    tcp.extend_from_slice(&sport.to_be_bytes());
    tcp.extend_from_slice(&dport.to_be_bytes());
    tcp.extend_from_slice(&seq.to_be_bytes());
    tcp.extend_from_slice(&0u32.to_be_bytes());
    tcp.extend_from_slice(&[0x50, 0x18, 0xff, 0xff, 0, 0, 0, 0]);
    tcp.extend_from_slice(payload);
    let mut ip = ipv4_header(IP_PROTO_TCP, tcp.len(), [10, 0, 0, 1], [10, 0, 0, 2]);
    ip.extend_from_slice(&tcp);
    eth_frame(&ip)
}

/// A packet with its capture time in microseconds since the epoch.
#[derive(Debug, Clone)]
pub struct TestPacket {
    pub ts_us: u64,
    pub data: Vec<u8>,
}

impl TestPacket {
    pub fn new(ts_us: u64, data: Vec<u8>) -> Self {
        Self { ts_us, data }
    }
}

fn pcap_global_header() -> Vec<u8> {
    let mut h = Vec::with_capacity(24);
    h.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
    h.extend_from_slice(&2u16.to_le_bytes());
    h.extend_from_slice(&4u16.to_le_bytes());
    h.extend_from_slice(&0i32.to_le_bytes());
    h.extend_from_slice(&0u32.to_le_bytes());
    h.extend_from_slice(&65535u32.to_le_bytes());
    // LINKTYPE_ETHERNET
    h.extend_from_slice(&1u32.to_le_bytes());
    h
}

fn pcap_record(packet: &TestPacket) -> Vec<u8> {
    let len = packet.data.len() as u32;
    let mut r = Vec::with_capacity(16 + packet.data.len());
    r.extend_from_slice(&((packet.ts_us / 1_000_000) as u32).to_le_bytes());
    r.extend_from_slice(&((packet.ts_us % 1_000_000) as u32).to_le_bytes());
    r.extend_from_slice(&len.to_le_bytes());
    r.extend_from_slice(&len.to_le_bytes());
    r.extend_from_slice(&packet.data);
    r
}

/// Write a little-endian classic pcap file.
pub fn write_pcap(path: &Path, packets: &[TestPacket]) {
    let mut file = File::create(path).unwrap();
    file.write_all(&pcap_global_header()).unwrap();
    for p in packets {
        file.write_all(&pcap_record(p)).unwrap();
    }
}

/// Append records to an existing classic pcap file.
pub fn append_pcap(path: &Path, packets: &[TestPacket]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    for p in packets {
        file.write_all(&pcap_record(p)).unwrap();
    }
}

/// Five frames one second apart: UDP, TCP, UDP, TCP, UDP.
pub fn mixed_packets() -> Vec<TestPacket> {
    (0..5u64)
        .map(|i| {
            let data = if i % 2 == 0 {
                udp_packet(5000 + i as u16, 53, format!("query-{i}").as_bytes())
            } else {
                tcp_packet(40000, 80, 1000 * i as u32, b"GET / HTTP/1.1\r\n")
            };
            TestPacket::new(1_700_000_000_000_000 + i * 1_000_000, data)
        })
        .collect()
}

/// Write `packets` into `dir` and return the path.
pub fn pcap_in(dir: &Path, name: &str, packets: &[TestPacket]) -> PathBuf {
    let path = dir.join(name);
    write_pcap(&path, packets);
    path
}

/// Open and fully read `path`.
pub fn read_file(path: &Path) -> CaptureFile {
    let mut cf = CaptureFile::new(Preferences::default());
    cf.open(path, None).unwrap();
    cf.read(false).unwrap();
    cf
}
