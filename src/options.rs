//! DHCP option TLV codec.
//!
//! Options carry configuration data inside the fixed 312-byte options
//! region of a DHCP message. Each option is a (code, length, value)
//! triplet; the stream is terminated by the End marker (255) and padded
//! with zeros.
//!
//! This server advertises a fixed option set: Subnet Mask (1), Router (3),
//! DNS Server (6), Lease Time (51), Message Type (53), and Server
//! Identifier (54). Requested Address (50) is understood on the receive
//! side. Anything else is preserved as [`DhcpOption::Unknown`] and ignored.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Option codes understood by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    /// Padding (no operation).
    Pad = 0,
    /// Subnet mask.
    SubnetMask = 1,
    /// Default gateway.
    Router = 3,
    /// DNS server address.
    DnsServer = 6,
    /// Address the client is asking for.
    RequestedIp = 50,
    /// Lease time in seconds (32-bit, network byte order).
    LeaseTime = 51,
    /// DHCP message type.
    MessageType = 53,
    /// Identifier (address) of the responding server.
    ServerIdentifier = 54,
    /// End of options marker.
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            1 => Ok(Self::SubnetMask),
            3 => Ok(Self::Router),
            6 => Ok(Self::DnsServer),
            50 => Ok(Self::RequestedIp),
            51 => Ok(Self::LeaseTime),
            53 => Ok(Self::MessageType),
            54 => Ok(Self::ServerIdentifier),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

/// DHCP message types (Option 53).
///
/// Offer, Ack, and Nak are reply-only codes; the server sends Offer and Ack
/// and never sends Nak (failed requests are logged and dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate servers.
    Discover = 1,
    /// Server response to DISCOVER with an address offer.
    Offer = 2,
    /// Client request confirming an offered or held address.
    Request = 3,
    /// Client indicates the address is already in use.
    Decline = 4,
    /// Server acknowledgement with configuration.
    Ack = 5,
    /// Server negative acknowledgement.
    Nak = 6,
    /// Client releases its address.
    Release = 7,
    /// Client requests configuration without an address.
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// A parsed DHCP option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    /// Subnet mask (Option 1).
    SubnetMask(Ipv4Addr),
    /// Default gateway (Option 3).
    Router(Ipv4Addr),
    /// DNS server (Option 6).
    DnsServer(Ipv4Addr),
    /// Client's requested address (Option 50).
    RequestedIp(Ipv4Addr),
    /// Lease time in seconds (Option 51).
    LeaseTime(u32),
    /// DHCP message type (Option 53).
    MessageType(MessageType),
    /// Address of the responding server (Option 54).
    ServerIdentifier(Ipv4Addr),
    /// Unrecognized option, preserved with its raw code and data.
    Unknown(u8, Vec<u8>),
}

impl DhcpOption {
    /// Returns the wire code for this option.
    pub fn option_code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask as u8,
            Self::Router(_) => OptionCode::Router as u8,
            Self::DnsServer(_) => OptionCode::DnsServer as u8,
            Self::RequestedIp(_) => OptionCode::RequestedIp as u8,
            Self::LeaseTime(_) => OptionCode::LeaseTime as u8,
            Self::MessageType(_) => OptionCode::MessageType as u8,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier as u8,
            Self::Unknown(code, _) => *code,
        }
    }

    /// Parses an option from its code and raw data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPacket`] if the data length does not match
    /// the option code (e.g. a subnet mask must be exactly 4 bytes).
    pub fn parse(code: u8, data: &[u8]) -> Result<Self> {
        match OptionCode::try_from(code) {
            Ok(OptionCode::SubnetMask) => Ok(Self::SubnetMask(ip_payload("subnet mask", data)?)),
            Ok(OptionCode::Router) => Ok(Self::Router(ip_payload("router", data)?)),
            Ok(OptionCode::DnsServer) => Ok(Self::DnsServer(ip_payload("DNS server", data)?)),
            Ok(OptionCode::RequestedIp) => {
                Ok(Self::RequestedIp(ip_payload("requested address", data)?))
            }
            Ok(OptionCode::LeaseTime) => {
                if data.len() != 4 {
                    return Err(Error::MalformedPacket(
                        "invalid lease time length".to_string(),
                    ));
                }
                Ok(Self::LeaseTime(u32::from_be_bytes([
                    data[0], data[1], data[2], data[3],
                ])))
            }
            Ok(OptionCode::MessageType) => {
                if data.len() != 1 {
                    return Err(Error::MalformedPacket(
                        "invalid message type length".to_string(),
                    ));
                }
                let kind = MessageType::try_from(data[0]).map_err(|value| {
                    Error::MalformedPacket(format!("unknown message type {value}"))
                })?;
                Ok(Self::MessageType(kind))
            }
            Ok(OptionCode::ServerIdentifier) => {
                Ok(Self::ServerIdentifier(ip_payload("server identifier", data)?))
            }
            Ok(OptionCode::Pad) | Ok(OptionCode::End) => Err(Error::MalformedPacket(
                "Pad/End should not be parsed as options".to_string(),
            )),
            Err(unknown_code) => Ok(Self::Unknown(unknown_code, data.to_vec())),
        }
    }

    /// Encodes the option to its wire format (code + length + data).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::SubnetMask(addr) => encode_ip(OptionCode::SubnetMask, *addr),
            Self::Router(addr) => encode_ip(OptionCode::Router, *addr),
            Self::DnsServer(addr) => encode_ip(OptionCode::DnsServer, *addr),
            Self::RequestedIp(addr) => encode_ip(OptionCode::RequestedIp, *addr),
            Self::LeaseTime(seconds) => {
                let mut result = vec![OptionCode::LeaseTime as u8, 4];
                result.extend_from_slice(&seconds.to_be_bytes());
                result
            }
            Self::MessageType(kind) => {
                vec![OptionCode::MessageType as u8, 1, *kind as u8]
            }
            Self::ServerIdentifier(addr) => encode_ip(OptionCode::ServerIdentifier, *addr),
            Self::Unknown(code, data) => {
                let len = data.len().min(255);
                let mut result = vec![*code, len as u8];
                result.extend_from_slice(&data[..len]);
                result
            }
        }
    }
}

fn ip_payload(what: &str, data: &[u8]) -> Result<Ipv4Addr> {
    if data.len() != 4 {
        return Err(Error::MalformedPacket(format!("invalid {what} length")));
    }
    Ok(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
}

fn encode_ip(code: OptionCode, addr: Ipv4Addr) -> Vec<u8> {
    let mut result = vec![code as u8, 4];
    result.extend_from_slice(&addr.octets());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversions() {
        for value in 1..=8u8 {
            let kind = MessageType::try_from(value).unwrap();
            assert_eq!(kind as u8, value);
        }
        assert!(MessageType::try_from(0).is_err());
        assert!(MessageType::try_from(9).is_err());
    }

    #[test]
    fn test_option_encode_decode_roundtrip() {
        let options: Vec<DhcpOption> = vec![
            DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 255, 0)),
            DhcpOption::Router(Ipv4Addr::new(192, 168, 1, 1)),
            DhcpOption::DnsServer(Ipv4Addr::new(8, 8, 8, 8)),
            DhcpOption::RequestedIp(Ipv4Addr::new(192, 168, 1, 100)),
            DhcpOption::LeaseTime(86400),
            DhcpOption::MessageType(MessageType::Offer),
            DhcpOption::ServerIdentifier(Ipv4Addr::new(192, 168, 1, 1)),
        ];

        for original in options {
            let encoded = original.encode();
            let decoded = DhcpOption::parse(encoded[0], &encoded[2..]).unwrap();
            assert_eq!(original, decoded);
        }
    }

    #[test]
    fn test_offer_message_type_value_roundtrip() {
        let encoded = DhcpOption::MessageType(MessageType::Offer).encode();
        assert_eq!(encoded, vec![53, 1, 2]);
        let decoded = DhcpOption::parse(53, &encoded[2..]).unwrap();
        assert_eq!(decoded, DhcpOption::MessageType(MessageType::Offer));
    }

    #[test]
    fn test_lease_time_network_byte_order() {
        let encoded = DhcpOption::LeaseTime(86400).encode();
        assert_eq!(&encoded[2..], &86400u32.to_be_bytes());
        let decoded = DhcpOption::parse(51, &encoded[2..]).unwrap();
        assert_eq!(decoded, DhcpOption::LeaseTime(86400));
    }

    #[test]
    fn test_option_invalid_lengths() {
        assert!(DhcpOption::parse(1, &[255, 255, 255]).is_err());
        assert!(DhcpOption::parse(3, &[]).is_err());
        assert!(DhcpOption::parse(51, &[0, 0, 0]).is_err());
        assert!(DhcpOption::parse(53, &[1, 2]).is_err());
    }

    #[test]
    fn test_unknown_option_preserved() {
        let decoded = DhcpOption::parse(100, &[1, 2, 3, 4]).unwrap();
        assert_eq!(decoded, DhcpOption::Unknown(100, vec![1, 2, 3, 4]));
        assert_eq!(decoded.encode(), vec![100, 4, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pad_and_end_not_parseable() {
        assert!(DhcpOption::parse(0, &[]).is_err());
        assert!(DhcpOption::parse(255, &[]).is_err());
    }

    #[test]
    fn test_message_type_display() {
        assert_eq!(format!("{}", MessageType::Discover), "DISCOVER");
        assert_eq!(format!("{}", MessageType::Offer), "OFFER");
        assert_eq!(format!("{}", MessageType::Request), "REQUEST");
        assert_eq!(format!("{}", MessageType::Ack), "ACK");
        assert_eq!(format!("{}", MessageType::Release), "RELEASE");
        assert_eq!(format!("{}", MessageType::Inform), "INFORM");
    }
}
