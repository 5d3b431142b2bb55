//! DHCP message parsing and encoding.
//!
//! A message is a fixed 236-byte header directly followed by a 312-byte
//! options region, 548 bytes on the wire. The options region is a TLV
//! stream terminated by the End marker (255); unused trailing bytes are
//! zero-filled.
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     op (1)    |   htype (1)   |   hlen (1)    |   hops (1)    |
//! +---------------+---------------+---------------+---------------+
//! |                            xid (4)                            |
//! +-------------------------------+-------------------------------+
//! |           secs (2)            |           flags (2)           |
//! +-------------------------------+-------------------------------+
//! |                          ciaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          yiaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          siaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          giaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          chaddr (16)                          |
//! +---------------------------------------------------------------+
//! |                          sname (64)                           |
//! +---------------------------------------------------------------+
//! |                          file (128)                           |
//! +---------------------------------------------------------------+
//! |                          options (312)                        |
//! +---------------------------------------------------------------+
//! ```

use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::options::{DhcpOption, MessageType, OptionCode};

const CHADDR_SIZE: usize = 16;
const SNAME_SIZE: usize = 64;
const FILE_SIZE: usize = 128;

const SNAME_OFFSET: usize = 44;
const FILE_OFFSET: usize = SNAME_OFFSET + SNAME_SIZE;

/// Size of the fixed header preceding the options region.
pub const DHCP_HEADER_SIZE: usize = FILE_OFFSET + FILE_SIZE;

/// Size of the options region.
pub const OPTIONS_REGION_SIZE: usize = 312;

/// Total on-wire size of an encoded message.
pub const DHCP_PACKET_SIZE: usize = DHCP_HEADER_SIZE + OPTIONS_REGION_SIZE;

/// Maximum hop count before dropping the packet.
///
/// Relay agents increment hops; an excessive count indicates a relay loop.
const MAX_HOPS: u8 = 16;

/// BOOTP/DHCP operation code for client requests.
pub const BOOTREQUEST: u8 = 1;

/// BOOTP/DHCP operation code for server replies.
pub const BOOTREPLY: u8 = 2;

/// Hardware type for Ethernet.
pub const HTYPE_ETHERNET: u8 = 1;

/// Hardware address length for Ethernet.
pub const HLEN_ETHERNET: u8 = 6;

/// A parsed DHCP message.
///
/// Represents both client requests and server replies. Use
/// [`parse`](Self::parse) for incoming datagrams and
/// [`create_reply`](Self::create_reply) to construct responses.
#[derive(Debug, Clone)]
pub struct DhcpPacket {
    /// Operation code: [`BOOTREQUEST`] (1) or [`BOOTREPLY`] (2).
    pub op: u8,

    /// Hardware address type. [`HTYPE_ETHERNET`] (1) for Ethernet.
    pub htype: u8,

    /// Hardware address length. [`HLEN_ETHERNET`] (6) for Ethernet.
    pub hlen: u8,

    /// Hop count, incremented by relay agents.
    pub hops: u8,

    /// Transaction ID chosen by the client, echoed in replies.
    pub xid: u32,

    /// Seconds elapsed since the client began address acquisition.
    pub secs: u16,

    /// Flags. Bit 15 (0x8000) = broadcast flag.
    pub flags: u16,

    /// Client address (set by the client when renewing).
    pub ciaddr: Ipv4Addr,

    /// "Your" address - the address being assigned to the client.
    pub yiaddr: Ipv4Addr,

    /// Server address.
    pub siaddr: Ipv4Addr,

    /// Gateway address - set by relay agents.
    pub giaddr: Ipv4Addr,

    /// Client hardware address (MAC for Ethernet).
    pub chaddr: [u8; 16],

    /// Server host name.
    pub sname: [u8; 64],

    /// Boot file name.
    pub file: [u8; 128],

    /// Options parsed from the options region.
    pub options: Vec<DhcpOption>,
}

impl DhcpPacket {
    /// Parses a DHCP message from raw datagram bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPacket`] if:
    /// - the datagram is shorter than the 236-byte header
    /// - the hop count exceeds 16 (relay loop protection)
    /// - the hardware length doesn't match the type (Ethernet must be 6)
    /// - an option's declared length runs past the region
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < DHCP_HEADER_SIZE {
            return Err(Error::MalformedPacket(format!(
                "datagram too short: {} bytes (minimum {})",
                data.len(),
                DHCP_HEADER_SIZE
            )));
        }

        let op = data[0];
        let htype = data[1];
        let hlen = data[2];
        let hops = data[3];

        if hops > MAX_HOPS {
            return Err(Error::MalformedPacket(format!(
                "hop count {hops} exceeds maximum {MAX_HOPS}"
            )));
        }

        if htype == HTYPE_ETHERNET && hlen != HLEN_ETHERNET {
            return Err(Error::MalformedPacket(format!(
                "invalid hlen {hlen} for Ethernet (expected {HLEN_ETHERNET})"
            )));
        }

        let xid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let secs = u16::from_be_bytes([data[8], data[9]]);
        let flags = u16::from_be_bytes([data[10], data[11]]);

        let ciaddr = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
        let yiaddr = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
        let siaddr = Ipv4Addr::new(data[20], data[21], data[22], data[23]);
        let giaddr = Ipv4Addr::new(data[24], data[25], data[26], data[27]);

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..28 + CHADDR_SIZE]);

        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[SNAME_OFFSET..SNAME_OFFSET + SNAME_SIZE]);

        let mut file = [0u8; 128];
        file.copy_from_slice(&data[FILE_OFFSET..FILE_OFFSET + FILE_SIZE]);

        let region_end = data.len().min(DHCP_HEADER_SIZE + OPTIONS_REGION_SIZE);
        let options = Self::parse_options(&data[DHCP_HEADER_SIZE..region_end])?;

        Ok(Self {
            op,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options,
        })
    }

    /// Length-aware TLV walk over the options region.
    ///
    /// Pad bytes are skipped, the scan stops at the End marker or the region
    /// boundary, and each option's declared length is honored when advancing.
    fn parse_options(data: &[u8]) -> Result<Vec<DhcpOption>> {
        let mut options = Vec::new();
        let mut index = 0;

        while index < data.len() {
            let code = data[index];

            if code == OptionCode::Pad as u8 {
                index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                break;
            }

            if index + 1 >= data.len() {
                return Err(Error::MalformedPacket("option length missing".to_string()));
            }

            let length = data[index + 1] as usize;

            if index + 2 + length > data.len() {
                return Err(Error::MalformedPacket("option data truncated".to_string()));
            }

            let option = DhcpOption::parse(code, &data[index + 2..index + 2 + length])?;
            options.push(option);

            index += 2 + length;
        }

        Ok(options)
    }

    /// Encodes the message to its fixed 548-byte wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OptionsOverflow`] if the options plus the End marker
    /// do not fit in the 312-byte options region.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut packet = Vec::with_capacity(DHCP_PACKET_SIZE);

        packet.push(self.op);
        packet.push(self.htype);
        packet.push(self.hlen);
        packet.push(self.hops);

        packet.extend_from_slice(&self.xid.to_be_bytes());
        packet.extend_from_slice(&self.secs.to_be_bytes());
        packet.extend_from_slice(&self.flags.to_be_bytes());

        packet.extend_from_slice(&self.ciaddr.octets());
        packet.extend_from_slice(&self.yiaddr.octets());
        packet.extend_from_slice(&self.siaddr.octets());
        packet.extend_from_slice(&self.giaddr.octets());

        packet.extend_from_slice(&self.chaddr);
        packet.extend_from_slice(&self.sname);
        packet.extend_from_slice(&self.file);

        let mut region_used = 0;
        for option in &self.options {
            let encoded = option.encode();
            region_used += encoded.len();
            if region_used + 1 > OPTIONS_REGION_SIZE {
                return Err(Error::OptionsOverflow(OPTIONS_REGION_SIZE));
            }
            packet.extend_from_slice(&encoded);
        }

        packet.push(OptionCode::End as u8);

        packet.resize(DHCP_PACKET_SIZE, 0);

        Ok(packet)
    }

    /// Returns the DHCP message type (Option 53) if present.
    pub fn message_type(&self) -> Option<MessageType> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::MessageType(kind) => Some(*kind),
            _ => None,
        })
    }

    /// Returns the requested address (Option 50) if present.
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::RequestedIp(ip) => Some(*ip),
            _ => None,
        })
    }

    /// Returns the 6-byte client hardware address.
    pub fn hardware_addr(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.chaddr[..6]);
        mac
    }

    /// Formats the client hardware address as lowercase colon-separated hex.
    ///
    /// For Ethernet, returns format like "aa:bb:cc:dd:ee:ff".
    pub fn format_mac(&self) -> String {
        crate::lease::format_mac(&self.hardware_addr())
    }

    /// Returns true if the broadcast flag (bit 15) is set.
    pub fn is_broadcast(&self) -> bool {
        (self.flags & 0x8000) != 0
    }

    /// Creates a reply message from a request.
    ///
    /// The message type is added as the first option. The following fields
    /// are carried over from the request: `xid`, `flags`, `giaddr` (so
    /// relayed replies route back through the relay), `chaddr`, `htype`,
    /// and `hlen`.
    pub fn create_reply(
        request: &DhcpPacket,
        message_type: MessageType,
        your_ip: Ipv4Addr,
        server_ip: Ipv4Addr,
        options: Vec<DhcpOption>,
    ) -> Self {
        let mut all_options = vec![DhcpOption::MessageType(message_type)];
        all_options.extend(options);

        Self {
            op: BOOTREPLY,
            htype: request.htype,
            hlen: request.hlen,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: your_ip,
            siaddr: server_ip,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: all_options,
        }
    }
}
