//! mDNS responder answering `A` queries for `<hostname>.local`

use core::net::Ipv4Addr;

use heapless::Vec;
use thiserror_no_std::Error;

pub const MDNS_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_PORT: u16 = 5353;

pub const TTL_SECS: u32 = 120;
/// Answers to one-shot (legacy) resolvers must not be cached for long
pub const LEGACY_TTL_SECS: u32 = 10;

const HEADER_LEN: usize = 12;
const FLAG_RESPONSE: u16 = 0x8000;
const OPCODE_MASK: u16 = 0x7800;
const FLAGS_AUTHORITATIVE_RESPONSE: u16 = 0x8400;

const TYPE_A: u16 = 1;
const TYPE_ANY: u16 = 255;
const CLASS_IN: u16 = 1;
const CLASS_ANY: u16 = 255;
/// Top bit of the class: unicast response requested in a question,
/// cache flush in an answer
const CLASS_TOP_BIT: u16 = 0x8000;

const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_JUMPS: usize = 16;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdnsError {
    #[error("packet truncated")]
    Truncated,
    #[error("malformed name")]
    BadName,
    #[error("response buffer too small")]
    BufferTooSmall,
}

/// How the answer must be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub len: usize,
    /// Send to the querier instead of the multicast group
    pub unicast: bool,
}

pub struct MdnsResponder<'a> {
    hostname: &'a str,
    address: Ipv4Addr,
}

impl<'a> MdnsResponder<'a> {
    /// `hostname` is the bare label, without `.local`
    pub fn new(hostname: &'a str, address: Ipv4Addr) -> Self {
        Self { hostname, address }
    }

    pub fn set_address(&mut self, address: Ipv4Addr) {
        self.address = address;
    }

    fn is_our_name(&self, name: &[u8]) -> bool {
        let host = self.hostname.as_bytes();
        name.len() == host.len() + ".local".len()
            && name[..host.len()].eq_ignore_ascii_case(host)
            && name[host.len()..].eq_ignore_ascii_case(b".local")
    }

    /// Answer `packet`, received from UDP port `source_port`
    ///
    /// Queries from a port other than 5353 come from legacy resolvers: their
    /// id and question are echoed and the answer goes back by unicast.
    pub fn handle_query(
        &self,
        packet: &[u8],
        source_port: u16,
        out: &mut [u8],
    ) -> Result<Option<Response>, MdnsError> {
        if packet.len() < HEADER_LEN {
            return Err(MdnsError::Truncated);
        }
        let flags = be16(packet, 2)?;
        if flags & FLAG_RESPONSE != 0 || flags & OPCODE_MASK != 0 {
            return Ok(None);
        }

        let id = be16(packet, 0)?;
        let questions = be16(packet, 4)?;
        let legacy = source_port != MDNS_PORT;

        let mut pos = HEADER_LEN;
        for _ in 0..questions {
            let (name, next) = read_name(packet, pos)?;
            let qtype = be16(packet, next)?;
            let qclass = be16(packet, next + 2)?;
            pos = next + 4;

            let class = qclass & !CLASS_TOP_BIT;
            if !self.is_our_name(&name)
                || !matches!(qtype, TYPE_A | TYPE_ANY)
                || !matches!(class, CLASS_IN | CLASS_ANY)
            {
                continue;
            }

            let unicast = legacy || qclass & CLASS_TOP_BIT != 0;
            let len = self.write_answer(id, legacy, qtype, out)?;
            return Ok(Some(Response { len, unicast }));
        }

        Ok(None)
    }

    fn write_answer(
        &self,
        id: u16,
        legacy: bool,
        qtype: u16,
        out: &mut [u8],
    ) -> Result<usize, MdnsError> {
        let mut w = Writer { out, pos: 0 };

        w.u16(if legacy { id } else { 0 })?;
        w.u16(FLAGS_AUTHORITATIVE_RESPONSE)?;
        w.u16(legacy as u16)?;
        w.u16(1)?;
        w.u16(0)?;
        w.u16(0)?;

        if legacy {
            self.write_name(&mut w)?;
            w.u16(qtype)?;
            w.u16(CLASS_IN)?;
        }

        self.write_name(&mut w)?;
        w.u16(TYPE_A)?;
        // Legacy resolvers do not understand the cache flush bit
        w.u16(if legacy { CLASS_IN } else { CLASS_IN | CLASS_TOP_BIT })?;
        w.u32(if legacy { LEGACY_TTL_SECS } else { TTL_SECS })?;
        w.u16(4)?;
        w.bytes(&self.address.octets())?;

        Ok(w.pos)
    }

    fn write_name(&self, w: &mut Writer<'_>) -> Result<(), MdnsError> {
        for label in [self.hostname, "local"] {
            if label.is_empty() || label.len() > 63 {
                return Err(MdnsError::BadName);
            }
            w.bytes(&[label.len() as u8])?;
            w.bytes(label.as_bytes())?;
        }
        w.bytes(&[0])
    }
}

struct Writer<'a> {
    out: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn bytes(&mut self, data: &[u8]) -> Result<(), MdnsError> {
        let end = self.pos + data.len();
        self.out
            .get_mut(self.pos..end)
            .ok_or(MdnsError::BufferTooSmall)?
            .copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    fn u16(&mut self, value: u16) -> Result<(), MdnsError> {
        self.bytes(&value.to_be_bytes())
    }

    fn u32(&mut self, value: u32) -> Result<(), MdnsError> {
        self.bytes(&value.to_be_bytes())
    }
}

fn be16(packet: &[u8], pos: usize) -> Result<u16, MdnsError> {
    match packet.get(pos..pos + 2) {
        Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
        None => Err(MdnsError::Truncated),
    }
}

/// Read a possibly compressed name as dotted text
///
/// Returns the name and the position just past it in the original record.
fn read_name(packet: &[u8], start: usize) -> Result<(Vec<u8, MAX_NAME_LEN>, usize), MdnsError> {
    let mut name = Vec::new();
    let mut pos = start;
    let mut end = None;
    let mut jumps = 0;

    loop {
        let len = *packet.get(pos).ok_or(MdnsError::Truncated)?;
        match len & 0xC0 {
            0x00 if len == 0 => {
                return Ok((name, end.unwrap_or(pos + 1)));
            }
            0x00 => {
                let label = packet
                    .get(pos + 1..pos + 1 + len as usize)
                    .ok_or(MdnsError::Truncated)?;
                if !name.is_empty() {
                    name.push(b'.').map_err(|_| MdnsError::BadName)?;
                }
                name.extend_from_slice(label)
                    .map_err(|_| MdnsError::BadName)?;
                pos += 1 + len as usize;
            }
            0xC0 => {
                let low = *packet.get(pos + 1).ok_or(MdnsError::Truncated)?;
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(MdnsError::BadName);
                }
                end.get_or_insert(pos + 2);
                pos = (((len & 0x3F) as usize) << 8) | low as usize;
            }
            _ => return Err(MdnsError::BadName),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    const ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

    fn encode_name(out: &mut Vec<u8>, name: &str) {
        for label in name.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
    }

    fn query(id: u16, questions: &[(&str, u16, u16)]) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&id.to_be_bytes());
        p.extend_from_slice(&[0, 0]);
        p.extend_from_slice(&(questions.len() as u16).to_be_bytes());
        p.extend_from_slice(&[0; 6]);
        for (name, qtype, qclass) in questions {
            encode_name(&mut p, name);
            p.extend_from_slice(&qtype.to_be_bytes());
            p.extend_from_slice(&qclass.to_be_bytes());
        }
        p
    }

    fn answer(packet: &[u8], port: u16) -> Option<(Response, [u8; 512])> {
        let responder = MdnsResponder::new("esp32-acc", ADDR);
        let mut out = [0u8; 512];
        let response = responder.handle_query(packet, port, &mut out).unwrap()?;
        Some((response, out))
    }

    /// Offset of the A record's class field in a multicast answer
    fn answer_tail(out: &[u8], len: usize) -> (u16, u16, u32, [u8; 4]) {
        let tail = &out[len - 14..len];
        (
            u16::from_be_bytes([tail[0], tail[1]]),
            u16::from_be_bytes([tail[2], tail[3]]),
            u32::from_be_bytes([tail[4], tail[5], tail[6], tail[7]]),
            [tail[10], tail[11], tail[12], tail[13]],
        )
    }

    #[test]
    fn answers_a_query_for_our_name() {
        let q = query(0, &[("esp32-acc.local", TYPE_A, CLASS_IN)]);
        let (response, out) = answer(&q, MDNS_PORT).unwrap();

        assert!(!response.unicast);
        assert_eq!(&out[..12], &[0, 0, 0x84, 0, 0, 0, 0, 1, 0, 0, 0, 0]);

        let (name, next) = read_name(&out, 12).unwrap();
        assert_eq!(name.as_slice(), b"esp32-acc.local");
        assert_eq!(next + 14, response.len);

        let (rtype, class, ttl, rdata) = answer_tail(&out, response.len);
        assert_eq!(rtype, TYPE_A);
        assert_eq!(class, 0x8001);
        assert_eq!(ttl, TTL_SECS);
        assert_eq!(rdata, ADDR.octets());
    }

    #[test]
    fn name_match_ignores_case_and_any_type() {
        let q = query(0, &[("ESP32-ACC.Local", TYPE_ANY, CLASS_IN)]);
        assert!(answer(&q, MDNS_PORT).is_some());
    }

    #[test]
    fn ignores_other_names_and_types() {
        let other = query(0, &[("printer.local", TYPE_A, CLASS_IN)]);
        assert!(answer(&other, MDNS_PORT).is_none());

        let aaaa = query(0, &[("esp32-acc.local", 28, CLASS_IN)]);
        assert!(answer(&aaaa, MDNS_PORT).is_none());

        let prefix = query(0, &[("esp32-acc.localdomain", TYPE_A, CLASS_IN)]);
        assert!(answer(&prefix, MDNS_PORT).is_none());
    }

    #[test]
    fn ignores_responses() {
        let mut q = query(0, &[("esp32-acc.local", TYPE_A, CLASS_IN)]);
        q[2] = 0x84;
        assert!(answer(&q, MDNS_PORT).is_none());
    }

    #[test]
    fn matches_later_compressed_question() {
        let mut q = query(0, &[("other.local", TYPE_A, CLASS_IN)]);
        q[5] = 2;
        // "esp32-acc" followed by a pointer to "local" inside the first name
        q.push(9);
        q.extend_from_slice(b"esp32-acc");
        q.extend_from_slice(&[0xC0, 18]);
        q.extend_from_slice(&TYPE_A.to_be_bytes());
        q.extend_from_slice(&CLASS_IN.to_be_bytes());

        assert!(answer(&q, MDNS_PORT).is_some());
    }

    #[test]
    fn unicast_bit_requests_direct_reply() {
        let q = query(0, &[("esp32-acc.local", TYPE_A, CLASS_IN | CLASS_TOP_BIT)]);
        let (response, _) = answer(&q, MDNS_PORT).unwrap();
        assert!(response.unicast);
    }

    #[test]
    fn legacy_query_echoes_id_and_question() {
        let q = query(0x1234, &[("esp32-acc.local", TYPE_A, CLASS_IN)]);
        let (response, out) = answer(&q, 49152).unwrap();

        assert!(response.unicast);
        assert_eq!(&out[..6], &[0x12, 0x34, 0x84, 0, 0, 1]);

        let (name, next) = read_name(&out, 12).unwrap();
        assert_eq!(name.as_slice(), b"esp32-acc.local");
        assert_eq!(&out[next..next + 4], &[0, 1, 0, 1]);

        let (_, class, ttl, _) = answer_tail(&out, response.len);
        assert_eq!(class, CLASS_IN);
        assert_eq!(ttl, LEGACY_TTL_SECS);
    }

    #[test]
    fn malformed_packets_are_errors() {
        let responder = MdnsResponder::new("esp32-acc", ADDR);
        let mut out = [0u8; 512];

        assert_eq!(
            responder.handle_query(&[0; 4], MDNS_PORT, &mut out),
            Err(MdnsError::Truncated)
        );

        let mut q = query(0, &[("esp32-acc.local", TYPE_A, CLASS_IN)]);
        q.truncate(q.len() - 3);
        assert_eq!(
            responder.handle_query(&q, MDNS_PORT, &mut out),
            Err(MdnsError::Truncated)
        );

        let mut looped = query(0, &[]);
        looped[5] = 1;
        looped.extend_from_slice(&[0xC0, 12]);
        assert_eq!(
            responder.handle_query(&looped, MDNS_PORT, &mut out),
            Err(MdnsError::BadName)
        );
    }

    #[test]
    fn small_buffer_is_reported() {
        let responder = MdnsResponder::new("esp32-acc", ADDR);
        let q = query(0, &[("esp32-acc.local", TYPE_A, CLASS_IN)]);
        let mut out = [0u8; 20];
        assert_eq!(
            responder.handle_query(&q, MDNS_PORT, &mut out),
            Err(MdnsError::BufferTooSmall)
        );
    }
}
