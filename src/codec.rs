//! Fixed-width codec: textual address <-> unsigned integer of the family's width.
//!
//! Every family fits in a `u128`. Values handed to [`decode`] must already be
//! below `2^W`; nothing is truncated silently.

use crate::error::{AnonymizeError, Result};
use crate::family::AddressFamily;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Low `width` bits set.
pub fn bit_mask(width: u32) -> u128 {
    if width >= 128 { u128::MAX } else { (1u128 << width) - 1 }
}

/// The leading `mask` bits of a `width`-bit value set, everything else clear.
pub fn prefix_mask(mask: u32, width: u32) -> u128 {
    bit_mask(width) & !bit_mask(width - mask.min(width))
}

pub fn encode(text: &str, family: AddressFamily) -> Result<u128> {
    let bad = || AnonymizeError::Format { family, text: text.to_string() };
    match family {
        AddressFamily::Mac => parse_mac(text).map(|b| u128::from(mac_to_u64(&b))).ok_or_else(bad),
        AddressFamily::Ipv4 => text.parse::<Ipv4Addr>().map(|a| u128::from(u32::from(a))).map_err(|_| bad()),
        AddressFamily::Ipv6 => text.parse::<Ipv6Addr>().map(u128::from).map_err(|_| bad()),
    }
}

pub fn decode(value: u128, family: AddressFamily) -> String {
    debug_assert!(value <= bit_mask(family.width()), "{value:#x} wider than {family}");
    match family {
        AddressFamily::Mac => fmt_mac(&u64_to_mac(value as u64)),
        AddressFamily::Ipv4 => Ipv4Addr::from(value as u32).to_string(),
        AddressFamily::Ipv6 => Ipv6Addr::from(value).to_string(),
    }
}

/// `decode(encode(text))`: the form the engine stores and emits.
pub fn canonicalize(text: &str, family: AddressFamily) -> Result<String> {
    encode(text, family).map(|v| decode(v, family))
}

fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = text.split(':');
    for slot in out.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        *slot = u8::from_str_radix(part, 16).ok()?;
    }
    parts.next().is_none().then_some(out)
}

pub fn fmt_mac(b: &[u8; 6]) -> String {
    format!("{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        b[0], b[1], b[2], b[3], b[4], b[5])
}

fn mac_to_u64(b: &[u8; 6]) -> u64 {
    let mut wide = [0u8; 8];
    wide[2..].copy_from_slice(b);
    u64::from_be_bytes(wide)
}

fn u64_to_mac(v: u64) -> [u8; 6] {
    let wide = v.to_be_bytes();
    let mut out = [0u8; 6];
    out.copy_from_slice(&wide[2..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test] fn mask_helpers() { assert_eq!(bit_mask(8), 0xff); assert_eq!(bit_mask(128), u128::MAX); assert_eq!(prefix_mask(8, 32), 0xff00_0000); assert_eq!(prefix_mask(0, 48), 0); assert_eq!(prefix_mask(48, 48), bit_mask(48)); }

    #[test]
    fn mac_values() {
        assert_eq!(encode("00:aa:00:00:00:01", AddressFamily::Mac).unwrap(), 0x00aa_0000_0001);
        assert_eq!(encode("FF:FF:FF:FF:FF:FF", AddressFamily::Mac).unwrap(), bit_mask(48));
        assert_eq!(decode(0x76_9be8_e1de43, AddressFamily::Mac), "76:9b:e8:e1:de:43");
        assert_eq!(canonicalize("76:9B:E8:E1:DE:43", AddressFamily::Mac).unwrap(), "76:9b:e8:e1:de:43");
    }

    #[test]
    fn mac_rejects_malformed() {
        for bad in ["00:aa:00:00:00", "00:aa:00:00:00:01:02", "0:aa:00:00:00:01", "00-aa-00-00-00-01", "+0:aa:00:00:00:01", "zz:aa:00:00:00:01", ""] {
            assert!(matches!(encode(bad, AddressFamily::Mac), Err(AnonymizeError::Format { .. })), "{bad}");
        }
    }

    #[test]
    fn ipv4_values() {
        assert_eq!(encode("10.0.0.1", AddressFamily::Ipv4).unwrap(), 0x0a00_0001);
        assert_eq!(decode(0xc0a8_0164, AddressFamily::Ipv4), "192.168.1.100");
        assert!(encode("10.0.0.256", AddressFamily::Ipv4).is_err());
        assert!(encode("2001:db8::1", AddressFamily::Ipv4).is_err());
    }

    #[test]
    fn ipv6_canonical_form() {
        assert_eq!(canonicalize("2001:0DB8:0000:0000:0000:0000:0000:0001", AddressFamily::Ipv6).unwrap(), "2001:db8::1");
        assert_eq!(canonicalize("2001:aa::1", AddressFamily::Ipv6).unwrap(), "2001:aa::1");
        assert_eq!(decode(1, AddressFamily::Ipv6), "::1");
        assert!(encode("2001:db8:::1", AddressFamily::Ipv6).is_err());
    }
}
