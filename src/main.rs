use anyhow::{Context, Result};
use clap::Parser;
use sanicap::anonymizer::DEFAULT_MAX_RETRIES;
use sanicap::pcap_io::sanitize_file;
use sanicap::{AddressFamily, AllocationMode, AnonymizerConfig, AnonymizerSet, EndpointSummary, PacketRewriter, RewriteStats};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::info;

// ─── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about = "Replace MAC, IPv4 and IPv6 addresses in legacy .pcap captures with consistent synthetic ones, optionally keeping leading prefix bits.")]
struct Args {
    /// Input .pcap file
    #[arg(short, long)]
    input: PathBuf,

    /// Output (anonymized) .pcap file
    #[arg(short, long)]
    output: PathBuf,

    /// Draw random address suffixes instead of counting up from the start addresses
    #[arg(long, default_value_t = false)]
    random: bool,

    /// Seed for --random, for reproducible output
    #[arg(long, requires = "random")]
    seed: Option<u64>,

    /// Leading MAC bits kept from the original address (24 keeps the vendor OUI)
    #[arg(long, default_value_t = 0)]
    mac_mask: u32,

    /// Leading IPv4 bits kept from the original address
    #[arg(long, default_value_t = 0)]
    ipv4_mask: u32,

    /// Leading IPv6 bits kept from the original address
    #[arg(long, default_value_t = 0)]
    ipv6_mask: u32,

    /// First synthetic MAC address in sequential mode
    #[arg(long, default_value = "00:aa:00:00:00:00")]
    start_mac: String,

    /// First synthetic IPv4 address in sequential mode
    #[arg(long, default_value = "10.0.0.1")]
    start_ipv4: String,

    /// First synthetic IPv6 address in sequential mode
    #[arg(long, default_value = "2001:aa::1")]
    start_ipv6: String,

    /// Colliding random draws tolerated per address before it is left unchanged
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Leave IPv4 header and TCP/UDP/ICMPv6 checksums as captured
    #[arg(long, default_value_t = false)]
    no_fix_checksums: bool,

    /// Write the original -> synthetic mapping as JSON (keep it private)
    #[arg(long)]
    mapping_out: Option<PathBuf>,

    /// Print run summary as JSON to stdout
    #[arg(long, default_value_t = false)]
    report: bool,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn family_config(&self, family: AddressFamily) -> AnonymizerConfig {
        let (mask, start) = match family {
            AddressFamily::Mac  => (self.mac_mask, &self.start_mac),
            AddressFamily::Ipv4 => (self.ipv4_mask, &self.start_ipv4),
            AddressFamily::Ipv6 => (self.ipv6_mask, &self.start_ipv6),
        };
        let mode = if self.random {
            AllocationMode::Random { seed: self.seed }
        } else {
            AllocationMode::Sequential
        };
        AnonymizerConfig::new(family)
            .mode(mode)
            .mask(mask)
            .start_value(start.as_str())
            .max_retries(self.max_retries)
    }
}

// ─── Report ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    stats:     &'a RewriteStats,
    endpoints: EndpointSummary,
}

// ─── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(log_level).with_target(false).with_writer(std::io::stderr).init();

    let anonymizers = AnonymizerSet::new(
        &args.family_config(AddressFamily::Mac),
        &args.family_config(AddressFamily::Ipv4),
        &args.family_config(AddressFamily::Ipv6),
    )
    .context("Invalid anonymization settings")?;
    let mut rewriter = PacketRewriter::new(anonymizers, !args.no_fix_checksums);

    sanitize_file(&args.input, &args.output, &mut rewriter)?;

    if let Some(ref path) = args.mapping_out {
        let mappings = rewriter.anonymizers().mappings();
        fs::write(path, serde_json::to_string_pretty(&mappings)?)
            .with_context(|| format!("Cannot write mapping file {:?}", path))?;
        info!("Wrote address mapping → {:?}", path);
    }

    let stats = rewriter.stats();
    let endpoints = rewriter.anonymizers().summary();
    if args.report {
        println!("{}", serde_json::to_string_pretty(&RunReport { stats, endpoints })?);
    } else {
        println!("=== Anonymization Summary ===");
        println!("Total packets:               {}", stats.total_packets);
        println!("Packets modified:            {}", stats.packets_modified);
        println!("MAC addresses rewritten:     {}", stats.mac_addresses_rewritten);
        println!("IPv4 addresses rewritten:    {}", stats.ipv4_addresses_rewritten);
        println!("IPv6 addresses rewritten:    {}", stats.ipv6_addresses_rewritten);
        println!("ARP fields rewritten:        {}", stats.arp_fields_rewritten);
        println!("Checksums fixed:             {}", stats.checksums_fixed);
        println!("Fields skipped:              {}", stats.fields_skipped);
        println!("Unsupported packets:         {}", stats.unsupported_packets);
        println!("─────────────────────────────────────────");
        println!("MAC endpoints:               {}", endpoints.mac);
        println!("IPv4 endpoints:              {}", endpoints.ipv4);
        println!("IPv6 endpoints:              {}", endpoints.ipv6);
    }

    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
