//! Per-family anonymizer facade and the three-family session wrapper.

use crate::allocator::{Allocator, AllocatorState, RandomState};
use crate::codec;
use crate::error::{AnonymizeError, Result};
use crate::family::AddressFamily;
use crate::table::MappingTable;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Default ceiling on colliding draws in random mode.
pub const DEFAULT_MAX_RETRIES: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationMode {
    Sequential,
    Random { seed: Option<u64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    Active,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct AnonymizerConfig {
    pub family: AddressFamily,
    pub mode: AllocationMode,
    pub mask: u32,
    pub start_value: String,
    pub max_retries: u32,
}

impl AnonymizerConfig {
    /// Sequential, unmasked, counting from the family's default start address.
    pub fn new(family: AddressFamily) -> Self {
        let start_value = match family {
            AddressFamily::Mac => "00:aa:00:00:00:00",
            AddressFamily::Ipv4 => "10.0.0.1",
            AddressFamily::Ipv6 => "2001:aa::1",
        };
        Self {
            family,
            mode: AllocationMode::Sequential,
            mask: 0,
            start_value: start_value.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn mode(mut self, mode: AllocationMode) -> Self { self.mode = mode; self }
    pub fn mask(mut self, mask: u32) -> Self { self.mask = mask; self }
    pub fn start_value(mut self, start: impl Into<String>) -> Self { self.start_value = start.into(); self }
    pub fn max_retries(mut self, n: u32) -> Self { self.max_retries = n; self }

    pub fn build(&self) -> Result<Anonymizer> {
        let family = self.family;
        let width = family.width();
        if self.mask > width {
            return Err(AnonymizeError::Config(format!(
                "{family} mask {} is outside 0..={width}", self.mask
            )));
        }
        if self.max_retries == 0 {
            return Err(AnonymizeError::Config("retry ceiling must be at least 1".into()));
        }
        let start = codec::encode(&self.start_value, family).map_err(|_| {
            AnonymizeError::Config(format!("start value '{}' is not a valid {family} address", self.start_value))
        })?;

        let allocator = match self.mode {
            AllocationMode::Sequential => Allocator::Sequential(AllocatorState::new(family, self.mask, start)),
            AllocationMode::Random { seed } => Allocator::Random(RandomState::new(family, self.mask, seed)),
        };
        Ok(Anonymizer {
            family,
            table: MappingTable::new(family),
            allocator,
            max_retries: self.max_retries,
            phase: Phase::Uninitialized,
        })
    }
}

/// Shorthand for `AnonymizerConfig::new(family)` with the given mode, mask and start.
pub fn configure(family: AddressFamily, mode: AllocationMode, mask: u32, start_value: &str) -> Result<Anonymizer> {
    AnonymizerConfig::new(family).mode(mode).mask(mask).start_value(start_value).build()
}

/// Consistent, collision-free replacement of addresses of one family.
#[derive(Debug)]
pub struct Anonymizer {
    family: AddressFamily,
    table: MappingTable,
    allocator: Allocator,
    max_retries: u32,
    phase: Phase,
}

impl Anonymizer {
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Distinct non-pass-through originals mapped so far.
    pub fn endpoint_count(&self) -> usize {
        self.table.len()
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    /// Synthetic replacement for `original`. Pass-through values come back
    /// unchanged; anything else is canonicalised, looked up, and allocated on
    /// first sight.
    pub fn get(&mut self, original: &str) -> Result<String> {
        let family = self.family;
        if family.is_passthrough(original) {
            return Ok(original.to_string());
        }

        let value = codec::encode(original, family)?;
        let key = codec::decode(value, family);
        // non-canonical spellings such as "0::0"
        if family.is_passthrough(&key) {
            return Ok(original.to_string());
        }
        if let Some(hit) = self.table.lookup(&key) {
            return Ok(hit.to_string());
        }

        // sequential candidates never collide, so only random draws reach the ceiling
        let mut attempts = 0u32;
        loop {
            if attempts >= self.max_retries {
                return Err(AnonymizeError::AllocationRetryExceeded { family, attempts });
            }
            attempts += 1;

            let raw = match self.allocator.propose(value) {
                Ok(raw) => raw,
                Err(e) => {
                    if matches!(e, AnonymizeError::AddressSpaceExhausted { .. }) {
                        self.phase = Phase::Exhausted;
                    }
                    return Err(e);
                }
            };
            self.phase = Phase::Active;

            let candidate = codec::decode(raw, family);
            if self.table.contains_value(&candidate) {
                debug!(%family, original = %key, %candidate, attempts, "candidate rejected");
                continue;
            }

            self.table.insert(&key, &candidate)?;
            debug!(%family, original = %key, synthetic = %candidate, "new mapping");
            return Ok(candidate);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EndpointSummary {
    pub mac: usize,
    pub ipv4: usize,
    pub ipv6: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct MappingSnapshot {
    pub mac: BTreeMap<String, String>,
    pub ipv4: BTreeMap<String, String>,
    pub ipv6: BTreeMap<String, String>,
}

/// One anonymizer per family for a single capture run.
#[derive(Debug)]
pub struct AnonymizerSet {
    mac: Anonymizer,
    ipv4: Anonymizer,
    ipv6: Anonymizer,
}

impl AnonymizerSet {
    pub fn new(mac: &AnonymizerConfig, ipv4: &AnonymizerConfig, ipv6: &AnonymizerConfig) -> Result<Self> {
        for (cfg, family) in [(mac, AddressFamily::Mac), (ipv4, AddressFamily::Ipv4), (ipv6, AddressFamily::Ipv6)] {
            if cfg.family != family {
                return Err(AnonymizeError::Config(format!(
                    "{} configuration supplied in the {family} slot", cfg.family
                )));
            }
        }
        Ok(Self { mac: mac.build()?, ipv4: ipv4.build()?, ipv6: ipv6.build()? })
    }

    pub fn get(&mut self, family: AddressFamily, original: &str) -> Result<String> {
        self.anonymizer_mut(family).get(original)
    }

    pub fn anonymizer(&self, family: AddressFamily) -> &Anonymizer {
        match family {
            AddressFamily::Mac => &self.mac,
            AddressFamily::Ipv4 => &self.ipv4,
            AddressFamily::Ipv6 => &self.ipv6,
        }
    }

    pub fn anonymizer_mut(&mut self, family: AddressFamily) -> &mut Anonymizer {
        match family {
            AddressFamily::Mac => &mut self.mac,
            AddressFamily::Ipv4 => &mut self.ipv4,
            AddressFamily::Ipv6 => &mut self.ipv6,
        }
    }

    pub fn summary(&self) -> EndpointSummary {
        EndpointSummary {
            mac: self.mac.endpoint_count(),
            ipv4: self.ipv4.endpoint_count(),
            ipv6: self.ipv6.endpoint_count(),
        }
    }

    pub fn mappings(&self) -> MappingSnapshot {
        let collect = |a: &Anonymizer| {
            a.table().iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>()
        };
        MappingSnapshot { mac: collect(&self.mac), ipv4: collect(&self.ipv4), ipv6: collect(&self.ipv6) }
    }
}
