//! Prefix-preserving, collision-free anonymization of MAC, IPv4 and IPv6
//! addresses in packet captures.
//!
//! The engine ([`Anonymizer`]) maps each original address of a family to a
//! synthetic one that keeps a configurable number of leading bits, never
//! reuses a synthetic value, and reports exhaustion instead of wrapping.
//! [`PacketRewriter`] and [`pcap_io`] apply it to legacy pcap files.

pub mod allocator;
pub mod anonymizer;
pub mod codec;
pub mod error;
pub mod family;
pub mod pcap_io;
pub mod rewrite;
pub mod table;

pub use anonymizer::{
    configure, AllocationMode, Anonymizer, AnonymizerConfig, AnonymizerSet, EndpointSummary, MappingSnapshot, Phase,
};
pub use error::{AnonymizeError, Result};
pub use family::AddressFamily;
pub use rewrite::{PacketRewriter, RewriteStats};
