//! Address families handled by the engine and the values each one leaves alone.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Mac,
    Ipv4,
    Ipv6,
}

const MAC_PASSTHROUGH: &[&str] = &["00:00:00:00:00:00", "ff:ff:ff:ff:ff:ff"];
const IPV4_PASSTHROUGH: &[&str] = &["0.0.0.0", "255.255.255.255"];
const IPV6_PASSTHROUGH: &[&str] = &["::"];
/// Leading group of the link-local multicast range ff02::/16.
const IPV6_MULTICAST_GROUP: &str = "ff02:";

impl AddressFamily {
    pub const ALL: [AddressFamily; 3] = [AddressFamily::Mac, AddressFamily::Ipv4, AddressFamily::Ipv6];

    /// Bit width `W` of the family's fixed-width encoding.
    pub fn width(self) -> u32 {
        match self {
            AddressFamily::Mac => 48,
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        }
    }

    /// True when `text` names a broadcast, zero or reserved value that must
    /// never be remapped. Checked on the raw input text; hex families compare
    /// case-insensitively.
    pub fn is_passthrough(self, text: &str) -> bool {
        match self {
            AddressFamily::Mac => MAC_PASSTHROUGH.iter().any(|p| p.eq_ignore_ascii_case(text)),
            AddressFamily::Ipv4 => IPV4_PASSTHROUGH.contains(&text),
            AddressFamily::Ipv6 => {
                IPV6_PASSTHROUGH.contains(&text)
                    || text
                        .get(..IPV6_MULTICAST_GROUP.len())
                        .is_some_and(|g| g.eq_ignore_ascii_case(IPV6_MULTICAST_GROUP))
            }
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressFamily::Mac => "MAC",
            AddressFamily::Ipv4 => "IPv4",
            AddressFamily::Ipv6 => "IPv6",
        })
    }
}
