//! Minimal DHCP server for access-point mode
//!
//! Hands out addresses from a small fixed pool on the access point subnet.
//! Leases are keyed by client MAC and expire after [`LEASE_SECS`]. Replies
//! are always broadcast because clients on a fresh access point have no
//! address yet.

use core::net::Ipv4Addr;

use log::{debug, info, warn};
use thiserror_no_std::Error;

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

pub const POOL_START: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 2);
pub const POOL_SIZE: usize = 10;
pub const LEASE_SECS: u32 = 2 * 60 * 60;
/// How long an offered address is held for the client that was offered it
const OFFER_HOLD_SECS: u64 = 60;

/// BOOTP replies are padded to at least this size
pub const MIN_REPLY_LEN: usize = 300;

const OP_BOOTREQUEST: u8 = 1;
const OP_BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const HEADER_LEN: usize = 236;
const OPTIONS_START: usize = HEADER_LEN + MAGIC_COOKIE.len();

const OPT_PAD: u8 = 0;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_END: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl MessageType {
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            _ => return None,
        })
    }

    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Inform => 8,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpError {
    #[error("packet too short")]
    TooShort,
    #[error("not a BOOTREQUEST")]
    NotRequest,
    #[error("only Ethernet hardware addresses are supported")]
    UnsupportedHardware,
    #[error("missing DHCP magic cookie")]
    BadCookie,
    #[error("malformed options")]
    MalformedOptions,
    #[error("missing or unknown message type")]
    MissingMessageType,
    #[error("reply buffer too small")]
    BufferTooSmall,
}

/// The fields of a client message the server acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpRequest {
    pub message_type: MessageType,
    pub xid: [u8; 4],
    pub flags: [u8; 2],
    pub ciaddr: Ipv4Addr,
    pub mac: [u8; 6],
    pub requested_ip: Option<Ipv4Addr>,
    pub server_id: Option<Ipv4Addr>,
}

impl DhcpRequest {
    pub fn parse(packet: &[u8]) -> Result<Self, DhcpError> {
        if packet.len() < OPTIONS_START {
            return Err(DhcpError::TooShort);
        }
        if packet[0] != OP_BOOTREQUEST {
            return Err(DhcpError::NotRequest);
        }
        if packet[1] != HTYPE_ETHERNET || packet[2] != 6 {
            return Err(DhcpError::UnsupportedHardware);
        }
        if packet[HEADER_LEN..OPTIONS_START] != MAGIC_COOKIE {
            return Err(DhcpError::BadCookie);
        }

        let mut message_type = None;
        let mut requested_ip = None;
        let mut server_id = None;

        for option in Options::new(&packet[OPTIONS_START..]) {
            let (code, data) = option?;
            match (code, data.len()) {
                (OPT_MESSAGE_TYPE, 1) => message_type = MessageType::from_u8(data[0]),
                (OPT_REQUESTED_IP, 4) => requested_ip = Some(ipv4(data)),
                (OPT_SERVER_ID, 4) => server_id = Some(ipv4(data)),
                _ => {}
            }
        }

        let mut mac = [0u8; 6];
        mac.copy_from_slice(&packet[28..34]);

        Ok(Self {
            message_type: message_type.ok_or(DhcpError::MissingMessageType)?,
            xid: [packet[4], packet[5], packet[6], packet[7]],
            flags: [packet[10], packet[11]],
            ciaddr: ipv4(&packet[12..16]),
            mac,
            requested_ip,
            server_id,
        })
    }
}

fn ipv4(bytes: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])
}

/// Iterator over `(code, data)` pairs of a DHCP options field
pub struct Options<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Options<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for Options<'a> {
    type Item = Result<(u8, &'a [u8]), DhcpError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let code = *self.data.get(self.pos)?;
            match code {
                OPT_PAD => self.pos += 1,
                OPT_END => {
                    self.pos = self.data.len();
                    return None;
                }
                _ => {
                    let Some(&len) = self.data.get(self.pos + 1) else {
                        self.pos = self.data.len();
                        return Some(Err(DhcpError::MalformedOptions));
                    };
                    let start = self.pos + 2;
                    let end = start + len as usize;
                    if end > self.data.len() {
                        self.pos = self.data.len();
                        return Some(Err(DhcpError::MalformedOptions));
                    }
                    self.pos = end;
                    return Some(Ok((code, &self.data[start..end])));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Lease {
    mac: [u8; 6],
    expires_at: u64,
}

/// Address pool and lease table
pub struct DhcpServer {
    server: Ipv4Addr,
    netmask: Ipv4Addr,
    pool_start: Ipv4Addr,
    lease_secs: u32,
    leases: [Option<Lease>; POOL_SIZE],
}

impl DhcpServer {
    pub fn new(server: Ipv4Addr, prefix_len: u8) -> Self {
        let mask = u32::MAX.checked_shl(32 - prefix_len.min(32) as u32).unwrap_or(0);
        Self {
            server,
            netmask: Ipv4Addr::from(mask),
            pool_start: POOL_START,
            lease_secs: LEASE_SECS,
            leases: [None; POOL_SIZE],
        }
    }

    fn slot_of(&self, addr: Ipv4Addr) -> Option<usize> {
        let offset = u32::from(addr).checked_sub(u32::from(self.pool_start))? as usize;
        (offset < POOL_SIZE).then_some(offset)
    }

    fn address_of(&self, slot: usize) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.pool_start) + slot as u32)
    }

    fn is_available(&self, slot: usize, mac: &[u8; 6], now: u64) -> bool {
        match self.leases[slot] {
            None => true,
            Some(lease) => lease.mac == *mac || lease.expires_at <= now,
        }
    }

    fn slot_for_mac(&self, mac: &[u8; 6]) -> Option<usize> {
        self.leases
            .iter()
            .position(|lease| lease.is_some_and(|l| l.mac == *mac))
    }

    /// Address currently leased to `mac`, if any
    pub fn lease_of(&self, mac: &[u8; 6], now: u64) -> Option<Ipv4Addr> {
        let slot = self.slot_for_mac(mac)?;
        let lease = self.leases[slot]?;
        (lease.expires_at > now).then(|| self.address_of(slot))
    }

    pub fn active_leases(&self, now: u64) -> usize {
        self.leases
            .iter()
            .filter(|lease| lease.is_some_and(|l| l.expires_at > now))
            .count()
    }

    fn choose_slot(&self, request: &DhcpRequest, now: u64) -> Option<usize> {
        if let Some(slot) = self.slot_for_mac(&request.mac) {
            return Some(slot);
        }
        if let Some(slot) = request.requested_ip.and_then(|ip| self.slot_of(ip)) {
            if self.is_available(slot, &request.mac, now) {
                return Some(slot);
            }
        }
        (0..POOL_SIZE).find(|&slot| self.is_available(slot, &request.mac, now))
    }

    /// Process one client packet received at `now` (seconds)
    ///
    /// Returns the length of the reply written to `out`, or `None` when the
    /// packet needs no answer.
    pub fn handle(
        &mut self,
        packet: &[u8],
        now: u64,
        out: &mut [u8],
    ) -> Result<Option<usize>, DhcpError> {
        let request = DhcpRequest::parse(packet)?;
        if out.len() < MIN_REPLY_LEN {
            return Err(DhcpError::BufferTooSmall);
        }

        match request.message_type {
            MessageType::Discover => {
                let Some(slot) = self.choose_slot(&request, now) else {
                    warn!("DHCP pool exhausted");
                    return Ok(None);
                };
                if self.leases[slot].is_none_or(|l| l.mac != request.mac) {
                    self.leases[slot] = Some(Lease {
                        mac: request.mac,
                        expires_at: now + OFFER_HOLD_SECS,
                    });
                }
                let addr = self.address_of(slot);
                debug!("DHCP offer {} to {:02x?}", addr, request.mac);
                Ok(Some(self.reply(&request, MessageType::Offer, addr, out)))
            }
            MessageType::Request => {
                if request.server_id.is_some_and(|id| id != self.server) {
                    // Client picked another server
                    if let Some(slot) = self.slot_for_mac(&request.mac) {
                        self.leases[slot] = None;
                    }
                    return Ok(None);
                }

                let wanted = request
                    .requested_ip
                    .or((!request.ciaddr.is_unspecified()).then_some(request.ciaddr));
                let slot = wanted
                    .and_then(|ip| self.slot_of(ip))
                    .filter(|&slot| self.is_available(slot, &request.mac, now));

                match slot {
                    Some(slot) => {
                        if let Some(old) = self.slot_for_mac(&request.mac) {
                            self.leases[old] = None;
                        }
                        self.leases[slot] = Some(Lease {
                            mac: request.mac,
                            expires_at: now + self.lease_secs as u64,
                        });
                        let addr = self.address_of(slot);
                        info!("DHCP lease {} to {:02x?}", addr, request.mac);
                        Ok(Some(self.reply(&request, MessageType::Ack, addr, out)))
                    }
                    None => {
                        debug!("DHCP NAK for {:?}", wanted);
                        Ok(Some(self.reply(
                            &request,
                            MessageType::Nak,
                            Ipv4Addr::UNSPECIFIED,
                            out,
                        )))
                    }
                }
            }
            MessageType::Release => {
                if let Some(slot) = self.slot_of(request.ciaddr) {
                    if self.leases[slot].is_some_and(|l| l.mac == request.mac) {
                        self.leases[slot] = None;
                        debug!("DHCP release {}", request.ciaddr);
                    }
                }
                Ok(None)
            }
            MessageType::Decline => {
                // Someone else answers on that address; keep it out of the pool
                if let Some(slot) = request.requested_ip.and_then(|ip| self.slot_of(ip)) {
                    self.leases[slot] = Some(Lease {
                        mac: [0; 6],
                        expires_at: now + self.lease_secs as u64,
                    });
                }
                Ok(None)
            }
            MessageType::Inform | MessageType::Offer | MessageType::Ack | MessageType::Nak => {
                Ok(None)
            }
        }
    }

    fn reply(
        &self,
        request: &DhcpRequest,
        kind: MessageType,
        yiaddr: Ipv4Addr,
        out: &mut [u8],
    ) -> usize {
        out[..MIN_REPLY_LEN].fill(0);

        out[0] = OP_BOOTREPLY;
        out[1] = HTYPE_ETHERNET;
        out[2] = 6;
        out[4..8].copy_from_slice(&request.xid);
        out[10..12].copy_from_slice(&request.flags);
        out[12..16].copy_from_slice(&request.ciaddr.octets());
        out[16..20].copy_from_slice(&yiaddr.octets());
        if kind != MessageType::Nak {
            out[20..24].copy_from_slice(&self.server.octets());
        }
        out[28..34].copy_from_slice(&request.mac);
        out[HEADER_LEN..OPTIONS_START].copy_from_slice(&MAGIC_COOKIE);

        let mut pos = OPTIONS_START;
        let mut put = |code: u8, data: &[u8]| {
            out[pos] = code;
            out[pos + 1] = data.len() as u8;
            out[pos + 2..pos + 2 + data.len()].copy_from_slice(data);
            pos += 2 + data.len();
        };

        put(OPT_MESSAGE_TYPE, &[kind.to_u8()]);
        put(OPT_SERVER_ID, &self.server.octets());
        if kind != MessageType::Nak {
            put(OPT_LEASE_TIME, &self.lease_secs.to_be_bytes());
            put(OPT_SUBNET_MASK, &self.netmask.octets());
            put(OPT_ROUTER, &self.server.octets());
            put(OPT_DNS, &self.server.octets());
        }
        out[pos] = OPT_END;

        (pos + 1).max(MIN_REPLY_LEN)
    }
}
