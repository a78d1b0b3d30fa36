//! Legacy pcap reading and writing around the packet rewriter.

use crate::rewrite::PacketRewriter;
use anyhow::{Context, Result};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::*;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

const MAGIC_USEC: u32 = 0xa1b2_c3d4;
const MAGIC_NSEC: u32 = 0xa1b2_3c4d;

/// File header fields carried from the input capture to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHeader {
    pub nanosecond:    bool,
    pub version_major: u16,
    pub version_minor: u16,
    pub thiszone:      i32,
    pub sigfigs:       u32,
    pub snaplen:       u32,
    pub linktype:      Linktype,
}

impl GlobalHeader {
    pub fn new(linktype: Linktype) -> Self {
        Self { nanosecond: false, version_major: 2, version_minor: 4, thiszone: 0, sigfigs: 0, snaplen: 65535, linktype }
    }
}

impl From<&PcapHeader> for GlobalHeader {
    fn from(hdr: &PcapHeader) -> Self {
        Self {
            nanosecond:    hdr.magic_number == MAGIC_NSEC || hdr.magic_number == MAGIC_NSEC.swap_bytes(),
            version_major: hdr.version_major,
            version_minor: hdr.version_minor,
            thiszone:      hdr.thiszone,
            sigfigs:       hdr.sigfigs,
            snaplen:       hdr.snaplen,
            linktype:      hdr.network,
        }
    }
}

pub fn write_global_header(w: &mut impl Write, hdr: &GlobalHeader) -> Result<()> {
    let magic = if hdr.nanosecond { MAGIC_NSEC } else { MAGIC_USEC };
    w.write_all(&magic.to_le_bytes())?;
    w.write_all(&hdr.version_major.to_le_bytes())?;
    w.write_all(&hdr.version_minor.to_le_bytes())?;
    w.write_all(&hdr.thiszone.to_le_bytes())?;
    w.write_all(&hdr.sigfigs.to_le_bytes())?;
    w.write_all(&hdr.snaplen.to_le_bytes())?;
    w.write_all(&(hdr.linktype.0 as u32).to_le_bytes())?;
    Ok(())
}

/// `ts_frac` is micro- or nanoseconds depending on the header magic.
pub fn write_packet(w: &mut impl Write, ts_sec: u32, ts_frac: u32, orig_len: u32, data: &[u8]) -> Result<()> {
    let len = data.len() as u32;
    w.write_all(&ts_sec.to_le_bytes())?;
    w.write_all(&ts_frac.to_le_bytes())?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&orig_len.max(len).to_le_bytes())?;
    w.write_all(data)?;
    Ok(())
}

/// Stream every frame of `input` through `rewriter` into `output`. A failed
/// run removes `output` so no half-anonymized capture is left behind.
pub fn sanitize_file(input: &Path, output: &Path, rewriter: &mut PacketRewriter) -> Result<()> {
    info!("Opening {:?}", input);
    let file = File::open(input).with_context(|| format!("Cannot open {:?}", input))?;
    let out_file = File::create(output).with_context(|| format!("Cannot create {:?}", output))?;
    let mut writer = BufWriter::new(out_file);
    let result = sanitize_stream(BufReader::new(file), &mut writer, rewriter)
        .and_then(|()| writer.flush().with_context(|| format!("Cannot write {:?}", output)));
    if result.is_err() {
        drop(writer);
        if let Err(e) = std::fs::remove_file(output) {
            warn!("Could not remove partial output {:?}: {}", output, e);
        }
    }
    result
}

pub fn sanitize_stream<R: Read, W: Write>(input: R, writer: &mut W, rewriter: &mut PacketRewriter) -> Result<()> {
    let mut reader = LegacyPcapReader::new(65536, input).context("Not a valid legacy pcap file")?;
    let mut linktype = None;
    let mut frame_num: u64 = 0;

    loop {
        match reader.next() {
            Ok((offset, block)) => {
                let pkt: Option<(u32, u32, u32, Vec<u8>)> = match block {
                    PcapBlockOwned::LegacyHeader(ref hdr) => {
                        if linktype.is_none() {
                            let header = GlobalHeader::from(hdr);
                            debug!(?header, "capture header");
                            write_global_header(writer, &header)?;
                            linktype = Some(header.linktype);
                        }
                        None
                    }
                    PcapBlockOwned::Legacy(ref pkt) => {
                        frame_num += 1;
                        Some((pkt.ts_sec, pkt.ts_usec, pkt.origlen, pkt.data.to_vec()))
                    }
                    PcapBlockOwned::NG(_) => {
                        warn!("pcapng block encountered – only legacy pcap supported");
                        None
                    }
                };
                drop(block);
                reader.consume(offset);

                if let Some((ts_sec, ts_frac, orig_len, mut raw)) = pkt {
                    let lt = linktype.context("packet record before capture header")?;
                    rewriter
                        .rewrite_packet(&mut raw, lt)
                        .with_context(|| format!("frame {frame_num}"))?;
                    write_packet(writer, ts_sec, ts_frac, orig_len, &raw)?;
                }
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete) => {
                if let Err(e) = reader.refill() {
                    return Err(anyhow::anyhow!("refill error: {:?}", e));
                }
            }
            Err(e) => return Err(anyhow::anyhow!("pcap parse error: {:?}", e)),
        }
    }

    info!("Processed {} frames", frame_num);
    Ok(())
}
