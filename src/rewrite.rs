//! In-place address substitution for captured frames.
//!
//! Walks Ethernet (with 802.1Q / 802.1ad tags), ARP, IPv4 and IPv6 headers,
//! swaps every address for its synthetic counterpart and repairs the
//! checksums that cover those addresses.

use crate::anonymizer::AnonymizerSet;
use crate::codec;
use crate::error::Result;
use crate::family::AddressFamily;
use pcap_parser::Linktype;
use serde::Serialize;
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_ARP:  u16 = 0x0806;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;
const ETHERTYPE_IPV6: u16 = 0x86dd;

const PROTO_TCP:    u8 = 6;
const PROTO_UDP:    u8 = 17;
const PROTO_ICMPV6: u8 = 58;

// ─── Stats ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Serialize)]
pub struct RewriteStats {
    pub total_packets:            u64,
    pub packets_modified:         u64,
    pub mac_addresses_rewritten:  u64,
    pub ipv4_addresses_rewritten: u64,
    pub ipv6_addresses_rewritten: u64,
    pub arp_fields_rewritten:     u64,
    pub checksums_fixed:          u64,
    /// Fields left untouched after a recoverable allocation failure.
    pub fields_skipped:           u64,
    pub unsupported_packets:      u64,
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn be16(data: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([data[off], data[off + 1]])
}

fn address_text(family: AddressFamily, bytes: &[u8]) -> String {
    match family {
        AddressFamily::Mac => {
            let mut b = [0u8; 6];
            b.copy_from_slice(bytes);
            codec::fmt_mac(&b)
        }
        AddressFamily::Ipv4 => {
            let mut b = [0u8; 4];
            b.copy_from_slice(bytes);
            Ipv4Addr::from(b).to_string()
        }
        AddressFamily::Ipv6 => {
            let mut b = [0u8; 16];
            b.copy_from_slice(bytes);
            Ipv6Addr::from(b).to_string()
        }
    }
}

fn field_len(family: AddressFamily) -> usize {
    (family.width() / 8) as usize
}

/// Sum 16-bit big-endian words into `acc`; an odd trailing byte is padded with zero.
fn sum_words(mut acc: u64, bytes: &[u8]) -> u64 {
    let mut chunks = bytes.chunks_exact(2);
    for w in &mut chunks {
        acc += u64::from(u16::from_be_bytes([w[0], w[1]]));
    }
    if let [last] = chunks.remainder() {
        acc += u64::from(*last) << 8;
    }
    acc
}

fn fold(mut acc: u64) -> u16 {
    while acc > 0xffff {
        acc = (acc & 0xffff) + (acc >> 16);
    }
    !(acc as u16)
}

/// RFC 1071 internet checksum of `bytes`.
pub fn internet_checksum(bytes: &[u8]) -> u16 {
    fold(sum_words(0, bytes))
}

// ─── Rewriter ─────────────────────────────────────────────────────────────────

pub struct PacketRewriter {
    anonymizers: AnonymizerSet,
    fix_checksums: bool,
    stats: RewriteStats,
    warned_linktypes: HashSet<i32>,
}

impl PacketRewriter {
    pub fn new(anonymizers: AnonymizerSet, fix_checksums: bool) -> Self {
        Self { anonymizers, fix_checksums, stats: RewriteStats::default(), warned_linktypes: HashSet::new() }
    }

    pub fn stats(&self) -> &RewriteStats {
        &self.stats
    }

    pub fn anonymizers(&self) -> &AnonymizerSet {
        &self.anonymizers
    }

    /// Rewrite one captured frame in place, returning whether any byte changed.
    /// Only fatal engine errors are returned; per-field failures are counted and skipped.
    pub fn rewrite_packet(&mut self, data: &mut [u8], linktype: Linktype) -> Result<bool> {
        self.stats.total_packets += 1;
        let before = data.to_vec();

        match linktype {
            Linktype::ETHERNET => self.rewrite_ethernet(data)?,
            Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => self.rewrite_ip(data, 0)?,
            other => {
                self.stats.unsupported_packets += 1;
                if self.warned_linktypes.insert(other.0) {
                    warn!("link type {} not supported, frames copied unchanged", other.0);
                }
            }
        }

        let modified = data[..] != before[..];
        if modified { self.stats.packets_modified += 1; }
        Ok(modified)
    }

    /// Swap the address stored in `data[off..]`. Returns true when the bytes changed.
    fn substitute(&mut self, data: &mut [u8], off: usize, family: AddressFamily) -> Result<bool> {
        let len = field_len(family);
        if data.len() < off + len { return Ok(false); }
        let original = address_text(family, &data[off..off + len]);

        let synthetic = match self.anonymizers.get(family, &original) {
            Ok(s) => s,
            Err(e) if !e.is_fatal() => {
                warn!(%family, %original, "left unchanged: {e}");
                self.stats.fields_skipped += 1;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let value = codec::encode(&synthetic, family)?;
        let bytes = value.to_be_bytes();
        let replacement = &bytes[16 - len..];
        if &data[off..off + len] == replacement { return Ok(false); }
        data[off..off + len].copy_from_slice(replacement);
        Ok(true)
    }

    // ─── Ethernet / ARP ───────────────────────────────────────────────────────

    fn rewrite_ethernet(&mut self, data: &mut [u8]) -> Result<()> {
        if data.len() < 14 { return Ok(()); }
        for off in [0, 6] {
            if self.substitute(data, off, AddressFamily::Mac)? {
                self.stats.mac_addresses_rewritten += 1;
            }
        }

        let mut type_off = 12;
        let mut ethertype = be16(data, type_off);
        while matches!(ethertype, ETHERTYPE_VLAN | ETHERTYPE_QINQ) && data.len() >= type_off + 6 {
            type_off += 4;
            ethertype = be16(data, type_off);
        }
        let l3 = type_off + 2;

        match ethertype {
            ETHERTYPE_ARP  => self.rewrite_arp(data, l3),
            ETHERTYPE_IPV4 => self.rewrite_ipv4(data, l3),
            ETHERTYPE_IPV6 => self.rewrite_ipv6(data, l3),
            _ => Ok(()),
        }
    }

    fn rewrite_arp(&mut self, data: &mut [u8], base: usize) -> Result<()> {
        if data.len() < base + 28 { return Ok(()); }
        // Ethernet hardware, IPv4 protocol, 6/4 byte addresses
        if be16(data, base) != 1 || be16(data, base + 2) != ETHERTYPE_IPV4
            || data[base + 4] != 6 || data[base + 5] != 4
        {
            debug!("ARP with unexpected hardware/protocol types left unchanged");
            return Ok(());
        }
        let fields = [
            (base + 8,  AddressFamily::Mac),  // sender hardware
            (base + 14, AddressFamily::Ipv4), // sender protocol
            (base + 18, AddressFamily::Mac),  // target hardware
            (base + 24, AddressFamily::Ipv4), // target protocol
        ];
        for (off, family) in fields {
            if self.substitute(data, off, family)? {
                self.stats.arp_fields_rewritten += 1;
            }
        }
        Ok(())
    }

    // ─── IP ───────────────────────────────────────────────────────────────────

    fn rewrite_ip(&mut self, data: &mut [u8], off: usize) -> Result<()> {
        match data.get(off).map(|b| b >> 4) {
            Some(4) => self.rewrite_ipv4(data, off),
            Some(6) => self.rewrite_ipv6(data, off),
            _ => Ok(()),
        }
    }

    fn rewrite_ipv4(&mut self, data: &mut [u8], ip_off: usize) -> Result<()> {
        if data.len() < ip_off + 20 || data[ip_off] >> 4 != 4 { return Ok(()); }
        let ihl = ((data[ip_off] & 0x0f) as usize) * 4;
        if ihl < 20 || data.len() < ip_off + ihl { return Ok(()); }

        let mut changed = false;
        for off in [ip_off + 12, ip_off + 16] {
            if self.substitute(data, off, AddressFamily::Ipv4)? {
                self.stats.ipv4_addresses_rewritten += 1;
                changed = true;
            }
        }
        if !changed || !self.fix_checksums { return Ok(()); }

        let old = be16(data, ip_off + 10);
        data[ip_off + 10..ip_off + 12].fill(0);
        let sum = internet_checksum(&data[ip_off..ip_off + ihl]);
        data[ip_off + 10..ip_off + 12].copy_from_slice(&sum.to_be_bytes());
        if sum != old { self.stats.checksums_fixed += 1; }

        // fragments other than a complete datagram cannot be re-summed
        let frag = be16(data, ip_off + 6);
        if frag & 0x2000 != 0 || frag & 0x1fff != 0 { return Ok(()); }
        let total_len = be16(data, ip_off + 2) as usize;
        if total_len < ihl || data.len() < ip_off + total_len { return Ok(()); }

        let proto = data[ip_off + 9];
        let mut pseudo = [0u8; 12];
        pseudo[..8].copy_from_slice(&data[ip_off + 12..ip_off + 20]);
        pseudo[9] = proto;
        pseudo[10..].copy_from_slice(&((total_len - ihl) as u16).to_be_bytes());
        self.fix_transport(data, ip_off + ihl, ip_off + total_len, proto, &pseudo, false);
        Ok(())
    }

    fn rewrite_ipv6(&mut self, data: &mut [u8], ip_off: usize) -> Result<()> {
        if data.len() < ip_off + 40 || data[ip_off] >> 4 != 6 { return Ok(()); }

        let mut changed = false;
        for off in [ip_off + 8, ip_off + 24] {
            if self.substitute(data, off, AddressFamily::Ipv6)? {
                self.stats.ipv6_addresses_rewritten += 1;
                changed = true;
            }
        }
        if !changed || !self.fix_checksums { return Ok(()); }

        let payload_len = be16(data, ip_off + 4) as usize;
        let start = ip_off + 40;
        if data.len() < start + payload_len { return Ok(()); }

        let next = data[ip_off + 6];
        let mut pseudo = [0u8; 40];
        pseudo[..32].copy_from_slice(&data[ip_off + 8..ip_off + 40]);
        pseudo[32..36].copy_from_slice(&(payload_len as u32).to_be_bytes());
        pseudo[39] = next;
        self.fix_transport(data, start, start + payload_len, next, &pseudo, true);
        Ok(())
    }

    /// Recompute the TCP/UDP/ICMPv6 checksum of `data[start..end]`.
    fn fix_transport(&mut self, data: &mut [u8], start: usize, end: usize, proto: u8, pseudo: &[u8], v6: bool) {
        let (field, min_len) = match proto {
            PROTO_TCP => (16, 20),
            PROTO_UDP => (6, 8),
            PROTO_ICMPV6 if v6 => (2, 4),
            _ => return,
        };
        if end < start + min_len { return; }
        let at = start + field;
        let old = be16(data, at);
        // zero means "no checksum" for UDP over IPv4
        if proto == PROTO_UDP && !v6 && old == 0 { return; }

        data[at..at + 2].fill(0);
        let mut sum = fold(sum_words(sum_words(0, pseudo), &data[start..end]));
        if proto == PROTO_UDP && sum == 0 { sum = 0xffff; }
        data[at..at + 2].copy_from_slice(&sum.to_be_bytes());
        if sum != old { self.stats.checksums_fixed += 1; }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anonymizer::AnonymizerConfig;
    use crate::error::AnonymizeError;

    fn rewriter() -> PacketRewriter {
        let set = AnonymizerSet::new(
            &AnonymizerConfig::new(AddressFamily::Mac),
            &AnonymizerConfig::new(AddressFamily::Ipv4),
            &AnonymizerConfig::new(AddressFamily::Ipv6),
        ).unwrap();
        PacketRewriter::new(set, true)
    }

    fn eth(dst: [u8; 6], src: [u8; 6], ethertype: u16) -> Vec<u8> {
        let mut f = Vec::new();
        f.extend_from_slice(&dst);
        f.extend_from_slice(&src);
        f.extend_from_slice(&ethertype.to_be_bytes());
        f
    }

    const HOST_A: [u8; 6] = [0x76, 0x9b, 0xe8, 0xe1, 0xde, 0x43];
    const HOST_B: [u8; 6] = [0x3c, 0x22, 0xfb, 0x10, 0x00, 0x07];

    fn udp_v4_frame() -> Vec<u8> {
        let mut f = eth(HOST_B, HOST_A, ETHERTYPE_IPV4);
        let mut ip = vec![0x45, 0, 0, 32, 0, 0, 0, 0, 64, PROTO_UDP, 0, 0, 192, 168, 1, 10, 192, 168, 1, 20];
        let sum = internet_checksum(&ip);
        ip[10..12].copy_from_slice(&sum.to_be_bytes());
        f.extend_from_slice(&ip);
        f.extend_from_slice(&[0x13, 0x88, 0x17, 0x70, 0, 12, 0x12, 0x34]);
        f.extend_from_slice(b"ping");
        f
    }

    fn udp_v4_checksum_ok(f: &[u8], ip_off: usize) -> bool {
        let mut pseudo = [0u8; 12];
        pseudo[..8].copy_from_slice(&f[ip_off + 12..ip_off + 20]);
        pseudo[9] = PROTO_UDP;
        let udp = &f[ip_off + 20..];
        pseudo[10..].copy_from_slice(&(udp.len() as u16).to_be_bytes());
        fold(sum_words(sum_words(0, &pseudo), udp)) == 0
    }

    #[test]
    fn checksum_reference_vector() {
        // RFC 1071 example words
        assert_eq!(internet_checksum(&[0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7]), !0xddf2);
        assert_eq!(internet_checksum(&[0xff]), !0xff00);
    }

    #[test]
    fn udp_over_ipv4() {
        let mut rw = rewriter();
        let mut f = udp_v4_frame();
        assert!(rw.rewrite_packet(&mut f, Linktype::ETHERNET).unwrap());

        assert_eq!(&f[0..6],  &[0x00, 0xaa, 0, 0, 0, 0]);
        assert_eq!(&f[6..12], &[0x00, 0xaa, 0, 0, 0, 1]);
        assert_eq!(&f[26..30], &[10, 0, 0, 1]);
        assert_eq!(&f[30..34], &[10, 0, 0, 2]);
        assert_eq!(internet_checksum(&f[14..34]), 0);
        assert!(udp_v4_checksum_ok(&f, 14));
        assert_eq!(&f[42..], b"ping");

        let s = rw.stats();
        assert_eq!((s.mac_addresses_rewritten, s.ipv4_addresses_rewritten), (2, 2));
        assert_eq!(s.checksums_fixed, 2);
        assert_eq!(rw.anonymizers().summary().ipv4, 2);
    }

    #[test]
    fn same_hosts_same_output() {
        let mut rw = rewriter();
        let mut a = udp_v4_frame();
        let mut b = udp_v4_frame();
        rw.rewrite_packet(&mut a, Linktype::ETHERNET).unwrap();
        rw.rewrite_packet(&mut b, Linktype::ETHERNET).unwrap();
        assert_eq!(a, b);
        assert_eq!(rw.anonymizers().summary().mac, 2);
        assert_eq!(rw.stats().packets_modified, 2);
    }

    #[test]
    fn udp_without_checksum_stays_zero() {
        let mut rw = rewriter();
        let mut f = udp_v4_frame();
        f[40] = 0; f[41] = 0;
        rw.rewrite_packet(&mut f, Linktype::ETHERNET).unwrap();
        assert_eq!(&f[40..42], &[0, 0]);
        assert_eq!(internet_checksum(&f[14..34]), 0);
    }

    #[test]
    fn checksums_left_alone_when_disabled() {
        let set = AnonymizerSet::new(
            &AnonymizerConfig::new(AddressFamily::Mac),
            &AnonymizerConfig::new(AddressFamily::Ipv4),
            &AnonymizerConfig::new(AddressFamily::Ipv6),
        ).unwrap();
        let mut rw = PacketRewriter::new(set, false);
        let mut f = udp_v4_frame();
        let ip_sum = [f[24], f[25]];
        rw.rewrite_packet(&mut f, Linktype::ETHERNET).unwrap();
        assert_eq!([f[24], f[25]], ip_sum);
        assert_eq!(&f[40..42], &[0x12, 0x34]);
        assert_eq!(rw.stats().checksums_fixed, 0);
    }

    #[test]
    fn broadcast_arp_request() {
        let mut rw = rewriter();
        let mut f = eth([0xff; 6], HOST_A, ETHERTYPE_ARP);
        f.extend_from_slice(&[0, 1, 0x08, 0x00, 6, 4, 0, 1]);
        f.extend_from_slice(&HOST_A);
        f.extend_from_slice(&[192, 168, 1, 10]);
        f.extend_from_slice(&[0; 6]);
        f.extend_from_slice(&[192, 168, 1, 1]);

        rw.rewrite_packet(&mut f, Linktype::ETHERNET).unwrap();
        assert_eq!(&f[0..6], &[0xff; 6]);
        assert_eq!(&f[6..12], &[0x00, 0xaa, 0, 0, 0, 0]);
        // sender MAC in the ARP body matches the Ethernet source
        assert_eq!(f[22..28], f[6..12]);
        assert_eq!(&f[28..32], &[10, 0, 0, 1]);
        assert_eq!(&f[32..38], &[0; 6]);
        assert_eq!(&f[38..42], &[10, 0, 0, 2]);
        assert_eq!(rw.stats().arp_fields_rewritten, 3);
        assert_eq!(rw.anonymizers().summary().mac, 1);
    }

    #[test]
    fn vlan_tagged_ipv4() {
        let mut rw = rewriter();
        let plain = udp_v4_frame();
        let mut f = plain[..12].to_vec();
        f.extend_from_slice(&[0x81, 0x00, 0x00, 0x64]);
        f.extend_from_slice(&plain[12..]);

        rw.rewrite_packet(&mut f, Linktype::ETHERNET).unwrap();
        assert_eq!(&f[14..16], &[0x00, 0x64]);
        assert_eq!(&f[30..34], &[10, 0, 0, 1]);
        assert_eq!(internet_checksum(&f[18..38]), 0);
        assert!(udp_v4_checksum_ok(&f, 18));
    }

    #[test]
    fn icmpv6_to_all_nodes() {
        let mut rw = rewriter();
        let mut f = eth([0x33, 0x33, 0, 0, 0, 1], HOST_A, ETHERTYPE_IPV6);
        let src: Ipv6Addr = "fe80::749b:e8ff:fee1:de43".parse().unwrap();
        let dst: Ipv6Addr = "ff02::1".parse().unwrap();
        f.extend_from_slice(&[0x60, 0, 0, 0, 0, 8, PROTO_ICMPV6, 255]);
        f.extend_from_slice(&src.octets());
        f.extend_from_slice(&dst.octets());
        f.extend_from_slice(&[128, 0, 0, 0, 0, 1, 0, 1]);

        assert!(rw.rewrite_packet(&mut f, Linktype::ETHERNET).unwrap());
        let new_src: Ipv6Addr = "2001:aa::1".parse().unwrap();
        assert_eq!(&f[22..38], &new_src.octets());
        assert_eq!(&f[38..54], &dst.octets());
        assert_eq!(rw.stats().ipv6_addresses_rewritten, 1);
        assert_eq!(rw.anonymizers().summary().ipv6, 1);

        let mut pseudo = [0u8; 40];
        pseudo[..32].copy_from_slice(&f[22..54]);
        pseudo[35] = 8;
        pseudo[39] = PROTO_ICMPV6;
        assert_eq!(fold(sum_words(sum_words(0, &pseudo), &f[54..])), 0);
    }

    #[test]
    fn raw_ip_linktype() {
        let mut rw = rewriter();
        let mut f = udp_v4_frame()[14..].to_vec();
        assert!(rw.rewrite_packet(&mut f, Linktype::RAW).unwrap());
        assert_eq!(&f[12..16], &[10, 0, 0, 1]);
        assert!(udp_v4_checksum_ok(&f, 0));
        assert_eq!(rw.anonymizers().summary().mac, 0);
    }

    #[test]
    fn unknown_linktype_untouched() {
        let mut rw = rewriter();
        let mut f = udp_v4_frame();
        let orig = f.clone();
        assert!(!rw.rewrite_packet(&mut f, Linktype(147)).unwrap());
        assert_eq!(f, orig);
        assert_eq!(rw.stats().unsupported_packets, 1);
    }

    #[test]
    fn truncated_frames_do_not_panic() {
        let mut rw = rewriter();
        let full = udp_v4_frame();
        for n in 0..full.len() {
            let mut f = full[..n].to_vec();
            rw.rewrite_packet(&mut f, Linktype::ETHERNET).unwrap();
        }
    }

    #[test]
    fn exhaustion_aborts() {
        let set = AnonymizerSet::new(
            &AnonymizerConfig::new(AddressFamily::Mac).mask(40).start_value("00:aa:00:00:00:ff"),
            &AnonymizerConfig::new(AddressFamily::Ipv4),
            &AnonymizerConfig::new(AddressFamily::Ipv6),
        ).unwrap();
        let mut rw = PacketRewriter::new(set, true);
        let mut f = udp_v4_frame();
        let err = rw.rewrite_packet(&mut f, Linktype::ETHERNET).unwrap_err();
        assert!(matches!(err, AnonymizeError::AddressSpaceExhausted { .. }));
    }
}
