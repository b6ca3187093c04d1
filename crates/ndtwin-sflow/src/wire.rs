//! sFlow v5 wire parsing: datagram header, counter samples and flow
//! samples, restricted to the fields the collector consumes. Only sFlow
//! v5 is accepted; anything else is a parse failure, not a panic.
//!
//! Vendor offsets for counter samples are opaque named profiles rather
//! than something derived from a canonical sFlow layout: the byte
//! offsets are empirical and must not be guessed for vendors beyond the
//! two observed in the field.

use std::net::Ipv4Addr;

const SFLOW_VERSION_5: u32 = 5;

/// Which vendor profile a sample was produced by. The profile only
/// changes the base word offset counter fields are read from; the field
/// order itself (`ifIndex, ifSpeed, ifInOctets, ifOutOctets`) is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorProfile {
    /// "Brocade type 2" counter sample, base offset 4.
    Brocade,
    /// "HPE type 4" counter sample, base offset 5.
    Hpe,
}

impl VendorProfile {
    fn counter_base_offset_words(self) -> usize {
        match self {
            VendorProfile::Brocade => 4,
            VendorProfile::Hpe => 5,
        }
    }
}

/// Discriminates the two sample families this collector understands.
/// The wire format word is `(enterprise << 12) | format`; only the low
/// `format` nibble is inspected, which is where the "Brocade type N /
/// HPE type N" exporters put their sample tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleFormat {
    FlowBrocade,
    FlowHpe,
    CounterBrocade,
    CounterHpe,
}

fn classify(format_id: u32) -> Option<SampleFormat> {
    match format_id {
        1 => Some(SampleFormat::FlowBrocade),
        3 => Some(SampleFormat::FlowHpe),
        2 => Some(SampleFormat::CounterBrocade),
        4 => Some(SampleFormat::CounterHpe),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DatagramHeader {
    pub version: u32,
    pub agent_ip: Ipv4Addr,
    pub sub_agent_id: u32,
    pub sequence_number: u32,
    pub uptime: u32,
    pub sample_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct CounterSampleData {
    pub if_index: u32,
    pub if_speed: u64,
    pub if_in_octets: u64,
    pub if_out_octets: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct FlowSampleData {
    pub sampling_rate: u32,
    pub input_port: u32,
    pub output_port: u32,
    pub frame_length: u32,
    pub protocol: u8,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub icmp_type: u8,
    pub icmp_code: u8,
    pub tcp_flags: u8,
}

/// One parsed sample out of a datagram.
#[derive(Debug, Clone, Copy)]
pub enum Sample {
    Counter(CounterSampleData),
    Flow(FlowSampleData),
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    buf.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes(b.try_into().unwrap()))
}

fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

/// Parses the fixed datagram header. Returns `None` (rather than
/// erroring) for anything but sFlow v5; the caller drops the datagram
/// and continues the ingest loop.
pub fn parse_header(buf: &[u8]) -> Option<DatagramHeader> {
    let version = read_u32(buf, 0)?;
    if version != SFLOW_VERSION_5 {
        return None;
    }
    let _address_type = read_u32(buf, 4)?;
    let agent_ip = Ipv4Addr::from(read_u32(buf, 8)?);
    let sub_agent_id = read_u32(buf, 12)?;
    let sequence_number = read_u32(buf, 16)?;
    let uptime = read_u32(buf, 20)?;
    let sample_count = read_u32(buf, 24)?;
    Some(DatagramHeader {
        version,
        agent_ip,
        sub_agent_id,
        sequence_number,
        uptime,
        sample_count,
    })
}

/// Parses one counter sample at `offset`, returning the sample and the
/// next offset to resume from.
fn parse_counter_sample(buf: &[u8], offset: usize, profile: VendorProfile) -> Option<(CounterSampleData, usize)> {
    let base_word = offset + profile.counter_base_offset_words() * 4;
    let if_index = read_u32(buf, base_word)?;
    let if_speed = ((read_u32(buf, base_word + 4)? as u64) << 32) | read_u32(buf, base_word + 8)? as u64;
    let if_in_octets =
        ((read_u32(buf, base_word + 12)? as u64) << 32) | read_u32(buf, base_word + 16)? as u64;
    let if_out_octets =
        ((read_u32(buf, base_word + 20)? as u64) << 32) | read_u32(buf, base_word + 24)? as u64;

    Some((
        CounterSampleData {
            if_index,
            if_speed,
            if_in_octets,
            if_out_octets,
        },
        base_word + 28,
    ))
}

/// Parses one flow sample at `offset`. IPv4 addresses in the raw packet
/// record arrive as two half-words, front and back, and are reassembled
/// here.
fn parse_flow_sample(buf: &[u8], offset: usize) -> Option<(FlowSampleData, usize)> {
    let sampling_rate = read_u32(buf, offset)?;
    let input_port = read_u32(buf, offset + 4)?;
    let output_port = read_u32(buf, offset + 8)?;
    let frame_length = read_u32(buf, offset + 12)?;
    let protocol = read_u8(buf, offset + 16)?;

    let src_hi = read_u16(buf, offset + 17)? as u32;
    let src_lo = read_u16(buf, offset + 19)? as u32;
    let dst_hi = read_u16(buf, offset + 21)? as u32;
    let dst_lo = read_u16(buf, offset + 23)? as u32;
    let src_ip = Ipv4Addr::from((src_hi << 16) | src_lo);
    let dst_ip = Ipv4Addr::from((dst_hi << 16) | dst_lo);

    let mut next = offset + 25;
    let (src_port, dst_port, icmp_type, icmp_code, tcp_flags) = if protocol == 1 {
        let t = read_u8(buf, next)?;
        let c = read_u8(buf, next + 1)?;
        next += 2;
        (0, 0, t, c, 0)
    } else {
        let sp = read_u16(buf, next)?;
        let dp = read_u16(buf, next + 2)?;
        next += 4;
        let flags = if protocol == 6 {
            let f = read_u8(buf, next)?;
            next += 1;
            f
        } else {
            0
        };
        (sp, dp, 0, 0, flags)
    };

    Some((
        FlowSampleData {
            sampling_rate,
            input_port,
            output_port,
            frame_length,
            protocol,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            icmp_type,
            icmp_code,
            tcp_flags,
        },
        next,
    ))
}

/// Parses every sample in a datagram body (after the fixed header),
/// skipping samples whose format tag is unrecognised.
pub fn parse_samples(buf: &[u8], mut offset: usize, sample_count: u32) -> Vec<Sample> {
    let mut out = Vec::new();
    for _ in 0..sample_count {
        let Some(format_word) = read_u32(buf, offset) else {
            break;
        };
        let Some(sample_length) = read_u32(buf, offset + 4) else {
            break;
        };
        let body_offset = offset + 8;
        let next_sample = body_offset + sample_length as usize;

        match classify(format_word) {
            Some(SampleFormat::CounterBrocade) => {
                if let Some((s, _)) = parse_counter_sample(buf, body_offset, VendorProfile::Brocade) {
                    out.push(Sample::Counter(s));
                }
            }
            Some(SampleFormat::CounterHpe) => {
                if let Some((s, _)) = parse_counter_sample(buf, body_offset, VendorProfile::Hpe) {
                    out.push(Sample::Counter(s));
                }
            }
            Some(SampleFormat::FlowBrocade) | Some(SampleFormat::FlowHpe) => {
                if let Some((s, _)) = parse_flow_sample(buf, body_offset) {
                    out.push(Sample::Flow(s));
                }
            }
            None => {}
        }

        if next_sample <= offset {
            break;
        }
        offset = next_sample;
    }
    out
}
