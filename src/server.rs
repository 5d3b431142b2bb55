//! The UDP server: transport, message dispatch, and phase handlers.
//!
//! One task is spawned per inbound datagram. All reply traffic goes out
//! through the single server socket; replies to relayed messages are routed
//! to the relay agent, everything else is broadcast or unicast to the
//! client. Two periodic tasks share the lease table with the handlers: the
//! expiration sweeper and the statistics reporter. A watch channel carries
//! the shutdown flag, observed between ticks and between receives.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lease::LeaseTable;
use crate::options::{DhcpOption, MessageType};
use crate::packet::{BOOTREQUEST, DhcpPacket};

/// Period of the expiration sweep.
const SWEEP_INTERVAL_SECS: u64 = 60;

/// Period of the statistics report.
const STATS_INTERVAL_SECS: u64 = 60;

/// Table usage fraction above which the statistics task warns.
const LEASE_USAGE_WARN_THRESHOLD: f64 = 0.8;

const RECV_BUFFER_SIZE: usize = 1500;

/// The DHCP lease server.
///
/// Owns the configuration, the lease table, and the one UDP socket used
/// for both receiving and replying.
pub struct DhcpServer {
    config: Arc<Config>,
    leases: Arc<LeaseTable>,
    socket: Arc<UdpSocket>,
    shutdown: watch::Sender<bool>,
}

impl DhcpServer {
    /// Creates the server and binds its listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Socket`] if the socket cannot be created or bound;
    /// this is the one fatal startup error.
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let leases = Arc::new(LeaseTable::new(config.max_leases));
        let socket = Arc::new(Self::create_socket(&config)?);
        let (shutdown, _) = watch::channel(false);

        info!(
            "DHCP server starting on {}:{}",
            config.server_ip, config.dhcp_server_port
        );
        info!(
            "address pool: {} ({} addresses), lease table capacity {}",
            config.pool(),
            config.pool_size(),
            config.max_leases
        );

        Ok(Self {
            config,
            leases,
            socket,
            shutdown,
        })
    }

    fn create_socket(config: &Config) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.dhcp_server_port);
        socket
            .bind(&bind_addr.into())
            .map_err(|error| Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error)))?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(tokio_socket)
    }

    /// Runs the receive loop plus the sweeper and statistics tasks until
    /// [`shutdown`](Self::shutdown) is signalled.
    pub async fn run(&self) -> Result<()> {
        let sweeper = spawn_sweeper(Arc::clone(&self.leases), self.shutdown.subscribe());
        let stats = spawn_stats_reporter(Arc::clone(&self.leases), self.shutdown.subscribe());

        let mut shutdown = self.shutdown.subscribe();
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        info!("DHCP server ready and listening");

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => {
                    match received {
                        Ok((size, source)) => {
                            let data = buffer[..size].to_vec();
                            let handler = PacketHandler {
                                config: Arc::clone(&self.config),
                                leases: Arc::clone(&self.leases),
                                socket: Arc::clone(&self.socket),
                            };

                            tokio::spawn(async move {
                                if let Err(error) = handler.handle_datagram(&data, source).await {
                                    warn!("Error handling packet from {}: {}", source, error);
                                }
                            });
                        }
                        Err(error) => {
                            error!("Error receiving packet: {}", error);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Shutdown requested, stopping receive loop");
                    break;
                }
            }
        }

        let _ = sweeper.await;
        let _ = stats.await;

        Ok(())
    }

    /// Signals every loop (receive, sweeper, statistics) to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn leases(&self) -> &Arc<LeaseTable> {
        &self.leases
    }
}

fn spawn_sweeper(leases: Arc<LeaseTable>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let freed = leases.sweep_expired(Utc::now()).await;
                    if freed > 0 {
                        info!("expiration sweep freed {} lease(s)", freed);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

fn spawn_stats_reporter(
    leases: Arc<LeaseTable>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(STATS_INTERVAL_SECS));
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = leases.stats().await;
                    info!(
                        "leases: {} active, {} offered, {} slots available of {}",
                        stats.active,
                        stats.offered,
                        stats.available(),
                        stats.capacity
                    );
                    if stats.usage() > LEASE_USAGE_WARN_THRESHOLD {
                        warn!(
                            "lease usage is high ({:.0}%)",
                            stats.usage() * 100.0
                        );
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Where a reply to `request` must be sent.
///
/// A relayed message (`giaddr != 0`) is answered through the relay agent on
/// the server port. Direct replies go to the limited-broadcast address when
/// the client asked for broadcast or has no address yet, otherwise unicast
/// to `ciaddr`; both on the client port.
fn reply_destination(request: &DhcpPacket, config: &Config) -> SocketAddr {
    if request.giaddr != Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(IpAddr::V4(request.giaddr), config.dhcp_server_port)
    } else if request.is_broadcast() || request.ciaddr == Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), config.dhcp_client_port)
    } else {
        SocketAddr::new(IpAddr::V4(request.ciaddr), config.dhcp_client_port)
    }
}

fn nonzero(addr: Ipv4Addr) -> Option<Ipv4Addr> {
    (addr != Ipv4Addr::UNSPECIFIED).then_some(addr)
}

/// Per-datagram handler state.
struct PacketHandler {
    config: Arc<Config>,
    leases: Arc<LeaseTable>,
    socket: Arc<UdpSocket>,
}

impl PacketHandler {
    async fn handle_datagram(&self, data: &[u8], source: SocketAddr) -> Result<()> {
        let packet = DhcpPacket::parse(data)?;

        if packet.op != BOOTREQUEST {
            debug!("Ignoring non-request datagram from {}", source);
            return Ok(());
        }

        let mac = packet.format_mac();

        let Some(kind) = packet.message_type() else {
            info!("Dropping message without a type from {} ({})", mac, source);
            return Ok(());
        };

        info!("{} from {} ({})", kind, mac, source);

        if packet.giaddr != Ipv4Addr::UNSPECIFIED {
            debug!("relayed via gateway {}", packet.giaddr);
        }

        match kind {
            MessageType::Discover => self.handle_discover(&packet).await,
            MessageType::Request => self.handle_request(&packet).await,
            MessageType::Release => self.handle_release(&packet).await,
            MessageType::Decline => self.handle_decline(&packet).await,
            MessageType::Inform => self.handle_inform(&packet).await,
            MessageType::Offer | MessageType::Ack | MessageType::Nak => {
                warn!("Ignoring reply-only {} message from {}", kind, mac);
                Ok(())
            }
        }
    }

    async fn handle_discover(&self, packet: &DhcpPacket) -> Result<()> {
        let mac = packet.format_mac();
        let pool = self.config.pool();

        let offered_ip = match self
            .leases
            .offer_next(&pool, packet.hardware_addr(), self.config.default_lease_time)
            .await
        {
            Ok(ip) => ip,
            Err(Error::PoolExhausted) => {
                warn!("Pool exhausted, cannot offer an address to {}", mac);
                return Ok(());
            }
            Err(Error::TableFull) => {
                warn!("Lease table full, cannot offer an address to {}", mac);
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        let offer = DhcpPacket::create_reply(
            packet,
            MessageType::Offer,
            offered_ip,
            self.config.server_ip,
            self.lease_options(self.config.default_lease_time),
        );

        self.send_reply(&offer, packet).await?;

        info!("OFFER {} to {}", offered_ip, mac);

        Ok(())
    }

    async fn handle_request(&self, packet: &DhcpPacket) -> Result<()> {
        let mac = packet.format_mac();
        let hardware_addr = packet.hardware_addr();

        // A client that already owns an active lease is renewing, not
        // asking for a fresh allocation.
        match self.leases.renew(hardware_addr).await {
            Ok(lease) => {
                let ack = DhcpPacket::create_reply(
                    packet,
                    MessageType::Ack,
                    lease.address,
                    self.config.server_ip,
                    self.lease_options(lease.duration_secs),
                );

                self.send_reply(&ack, packet).await?;

                info!("ACK {} to {} (lease renewed)", lease.address, mac);
                return Ok(());
            }
            Err(Error::LeaseNotFound(_)) => {}
            Err(error) => return Err(error),
        }

        let requested_ip = packet
            .requested_ip()
            .or(nonzero(packet.yiaddr))
            .or(nonzero(packet.ciaddr));

        let address = match requested_ip {
            Some(ip) => ip,
            None => {
                let pool = self.config.pool();
                match self
                    .leases
                    .offer_next(&pool, hardware_addr, self.config.default_lease_time)
                    .await
                {
                    Ok(ip) => ip,
                    Err(Error::PoolExhausted) => {
                        warn!("Pool exhausted, dropping REQUEST from {}", mac);
                        return Ok(());
                    }
                    Err(Error::TableFull) => {
                        warn!("Lease table full, dropping REQUEST from {}", mac);
                        return Ok(());
                    }
                    Err(error) => return Err(error),
                }
            }
        };

        let lease = match self
            .leases
            .allocate(address, hardware_addr, self.config.default_lease_time)
            .await
        {
            Ok(lease) => lease,
            Err(Error::TableFull) => {
                warn!("Lease table full, dropping REQUEST from {}", mac);
                return Ok(());
            }
            Err(Error::AddressInUse(ip)) => {
                warn!(
                    "REQUEST from {} for {} dropped: address held by another client",
                    mac, ip
                );
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        let ack = DhcpPacket::create_reply(
            packet,
            MessageType::Ack,
            lease.address,
            self.config.server_ip,
            self.lease_options(lease.duration_secs),
        );

        self.send_reply(&ack, packet).await?;

        info!(
            "ACK {} to {} (lease: {} seconds)",
            lease.address, mac, lease.duration_secs
        );

        Ok(())
    }

    async fn handle_release(&self, packet: &DhcpPacket) -> Result<()> {
        let mac = packet.format_mac();

        if packet.ciaddr == Ipv4Addr::UNSPECIFIED {
            warn!("RELEASE from {} with no ciaddr", mac);
            return Ok(());
        }

        // Fire-and-forget per protocol: no reply either way.
        match self.leases.release(packet.ciaddr).await {
            Some(_) => info!("RELEASE from {}: freed {}", mac, packet.ciaddr),
            None => debug!("RELEASE from {} for {} (already free)", mac, packet.ciaddr),
        }

        Ok(())
    }

    async fn handle_decline(&self, packet: &DhcpPacket) -> Result<()> {
        let mac = packet.format_mac();

        if packet.ciaddr == Ipv4Addr::UNSPECIFIED {
            warn!("DECLINE from {} with no ciaddr", mac);
            return Ok(());
        }

        match self.leases.decline(packet.ciaddr).await {
            Some(_) => warn!("DECLINE from {}: freed {}", mac, packet.ciaddr),
            None => debug!("DECLINE from {} for {} (already free)", mac, packet.ciaddr),
        }

        Ok(())
    }

    async fn handle_inform(&self, packet: &DhcpPacket) -> Result<()> {
        let mac = packet.format_mac();

        // Configuration only: the client already has an address, so no
        // yiaddr assignment and no lease time.
        let ack = DhcpPacket::create_reply(
            packet,
            MessageType::Ack,
            packet.ciaddr,
            self.config.server_ip,
            self.config_options(),
        );

        self.send_reply(&ack, packet).await?;

        info!("ACK (INFORM) to {}", mac);

        Ok(())
    }

    async fn send_reply(&self, reply: &DhcpPacket, request: &DhcpPacket) -> Result<()> {
        let encoded = reply.encode()?;
        let destination = reply_destination(request, &self.config);

        self.socket.send_to(&encoded, destination).await?;

        Ok(())
    }

    /// Options advertised on Offer and Ack.
    fn lease_options(&self, duration_secs: u32) -> Vec<DhcpOption> {
        let mut options = vec![
            DhcpOption::LeaseTime(duration_secs),
            DhcpOption::ServerIdentifier(self.config.server_ip),
        ];
        options.extend(self.config_options_tail());
        options
    }

    /// Options advertised on an Inform Ack (no lease time).
    fn config_options(&self) -> Vec<DhcpOption> {
        let mut options = vec![DhcpOption::ServerIdentifier(self.config.server_ip)];
        options.extend(self.config_options_tail());
        options
    }

    fn config_options_tail(&self) -> Vec<DhcpOption> {
        vec![
            DhcpOption::SubnetMask(self.config.subnet_mask),
            DhcpOption::Router(self.config.router),
            DhcpOption::DnsServer(self.config.dns_server),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::LeaseState;
    use crate::options::OptionCode;
    use crate::packet::{DHCP_HEADER_SIZE, DHCP_PACKET_SIZE, HLEN_ETHERNET, HTYPE_ETHERNET};

    fn test_config() -> Config {
        Config {
            server_ip: Ipv4Addr::new(192, 168, 1, 1),
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            ip_pool_start: Ipv4Addr::new(192, 168, 1, 100),
            ip_pool_end: Ipv4Addr::new(192, 168, 1, 200),
            router: Ipv4Addr::new(192, 168, 1, 1),
            dns_server: Ipv4Addr::new(192, 168, 1, 1),
            dhcp_server_port: 67,
            dhcp_client_port: 68,
            default_lease_time: 3600,
            max_leases: 100,
        }
    }

    async fn create_test_handler(config: Config) -> PacketHandler {
        let config = Arc::new(config);
        let leases = Arc::new(LeaseTable::new(config.max_leases));
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());

        PacketHandler {
            config,
            leases,
            socket,
        }
    }

    fn create_dhcp_packet(
        message_type: MessageType,
        mac: [u8; 6],
        xid: u32,
        options: Vec<DhcpOption>,
    ) -> Vec<u8> {
        let mut packet = vec![0u8; DHCP_PACKET_SIZE];

        packet[0] = BOOTREQUEST;
        packet[1] = HTYPE_ETHERNET;
        packet[2] = HLEN_ETHERNET;
        packet[4..8].copy_from_slice(&xid.to_be_bytes());
        packet[10..12].copy_from_slice(&0x8000u16.to_be_bytes());
        packet[28..34].copy_from_slice(&mac);

        let mut index = DHCP_HEADER_SIZE;
        packet[index] = OptionCode::MessageType as u8;
        packet[index + 1] = 1;
        packet[index + 2] = message_type as u8;
        index += 3;

        for option in options {
            let encoded = option.encode();
            packet[index..index + encoded.len()].copy_from_slice(&encoded);
            index += encoded.len();
        }

        packet[index] = OptionCode::End as u8;
        packet
    }

    fn with_ciaddr(mut packet: Vec<u8>, ciaddr: Ipv4Addr) -> Vec<u8> {
        packet[12..16].copy_from_slice(&ciaddr.octets());
        packet
    }

    fn with_yiaddr(mut packet: Vec<u8>, yiaddr: Ipv4Addr) -> Vec<u8> {
        packet[16..20].copy_from_slice(&yiaddr.octets());
        packet
    }

    fn with_giaddr(mut packet: Vec<u8>, giaddr: Ipv4Addr) -> Vec<u8> {
        packet[24..28].copy_from_slice(&giaddr.octets());
        packet
    }

    fn is_network_error(error: &Error) -> bool {
        matches!(error, Error::Io(_))
    }

    fn accept_send_failure(result: Result<()>) {
        assert!(result.is_ok() || result.as_ref().err().map(is_network_error).unwrap_or(false));
    }

    #[test]
    fn test_reply_destination_relay() {
        let config = test_config();
        let giaddr = Ipv4Addr::new(10, 0, 0, 1);
        let data = with_giaddr(
            create_dhcp_packet(MessageType::Request, [0; 6], 1, vec![]),
            giaddr,
        );
        let request = DhcpPacket::parse(&data).unwrap();

        let destination = reply_destination(&request, &config);
        assert_eq!(
            destination,
            SocketAddr::new(IpAddr::V4(giaddr), config.dhcp_server_port)
        );
    }

    #[test]
    fn test_reply_destination_broadcast() {
        let config = test_config();
        let data = create_dhcp_packet(MessageType::Discover, [0; 6], 1, vec![]);
        let request = DhcpPacket::parse(&data).unwrap();

        let destination = reply_destination(&request, &config);
        assert_eq!(
            destination,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), config.dhcp_client_port)
        );
    }

    #[test]
    fn test_reply_destination_unicast() {
        let config = test_config();
        let ciaddr = Ipv4Addr::new(192, 168, 1, 100);
        let mut data = with_ciaddr(
            create_dhcp_packet(MessageType::Request, [0; 6], 1, vec![]),
            ciaddr,
        );
        // clear the broadcast flag
        data[10..12].copy_from_slice(&0u16.to_be_bytes());
        let request = DhcpPacket::parse(&data).unwrap();

        let destination = reply_destination(&request, &config);
        assert_eq!(
            destination,
            SocketAddr::new(IpAddr::V4(ciaddr), config.dhcp_client_port)
        );
    }

    #[tokio::test]
    async fn test_handle_discover_reserves_offer() {
        let handler = create_test_handler(test_config()).await;

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];
        let data = create_dhcp_packet(MessageType::Discover, mac, 0x12345678, vec![]);
        let packet = DhcpPacket::parse(&data).unwrap();

        accept_send_failure(handler.handle_discover(&packet).await);

        let snapshot = handler.leases.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, LeaseState::Offered);
        assert_eq!(snapshot[0].hardware_addr, mac);
        assert_eq!(snapshot[0].address, Ipv4Addr::new(192, 168, 1, 100));
    }

    #[tokio::test]
    async fn test_handle_request_creates_lease() {
        let handler = create_test_handler(test_config()).await;

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02];
        let requested = Ipv4Addr::new(192, 168, 1, 150);
        let data = create_dhcp_packet(
            MessageType::Request,
            mac,
            0x12345678,
            vec![DhcpOption::RequestedIp(requested)],
        );
        let packet = DhcpPacket::parse(&data).unwrap();

        accept_send_failure(handler.handle_request(&packet).await);

        let lease = handler.leases.active_lease(mac).await.unwrap();
        assert_eq!(lease.address, requested);
        assert_eq!(lease.duration_secs, 3600);
    }

    #[tokio::test]
    async fn test_handle_request_uses_yiaddr() {
        let handler = create_test_handler(test_config()).await;

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x03];
        let yiaddr = Ipv4Addr::new(192, 168, 1, 120);
        let data = with_yiaddr(
            create_dhcp_packet(MessageType::Request, mac, 0x12345678, vec![]),
            yiaddr,
        );
        let packet = DhcpPacket::parse(&data).unwrap();

        accept_send_failure(handler.handle_request(&packet).await);

        let lease = handler.leases.active_lease(mac).await.unwrap();
        assert_eq!(lease.address, yiaddr);
    }

    #[tokio::test]
    async fn test_handle_request_without_address_allocates() {
        let handler = create_test_handler(test_config()).await;

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x04];
        let data = create_dhcp_packet(MessageType::Request, mac, 0x12345678, vec![]);
        let packet = DhcpPacket::parse(&data).unwrap();

        accept_send_failure(handler.handle_request(&packet).await);

        let lease = handler.leases.active_lease(mac).await.unwrap();
        assert_eq!(lease.address, Ipv4Addr::new(192, 168, 1, 100));
    }

    #[tokio::test]
    async fn test_request_from_active_client_renews() {
        let handler = create_test_handler(test_config()).await;

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x05];
        let address = Ipv4Addr::new(192, 168, 1, 100);
        handler.leases.allocate(address, mac, 3600).await.unwrap();
        let granted_at = handler.leases.active_lease(mac).await.unwrap().lease_start;

        tokio::time::sleep(Duration::from_millis(10)).await;

        let data = with_ciaddr(
            create_dhcp_packet(MessageType::Request, mac, 0x12345678, vec![]),
            address,
        );
        let packet = DhcpPacket::parse(&data).unwrap();

        accept_send_failure(handler.handle_request(&packet).await);

        let lease = handler.leases.active_lease(mac).await.unwrap();
        assert_eq!(lease.address, address);
        assert!(lease.lease_start > granted_at);
    }

    #[tokio::test]
    async fn test_request_dropped_when_table_full() {
        let config = Config {
            max_leases: 1,
            ..test_config()
        };
        let handler = create_test_handler(config).await;

        let mac_a = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x06];
        handler
            .leases
            .allocate(Ipv4Addr::new(192, 168, 1, 100), mac_a, 3600)
            .await
            .unwrap();

        let mac_b = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x07];
        let data = create_dhcp_packet(
            MessageType::Request,
            mac_b,
            0x12345678,
            vec![DhcpOption::RequestedIp(Ipv4Addr::new(192, 168, 1, 101))],
        );
        let packet = DhcpPacket::parse(&data).unwrap();

        // Refused without a reply: the handler reports success.
        assert!(handler.handle_request(&packet).await.is_ok());
        assert!(handler.leases.active_lease(mac_b).await.is_none());
    }

    #[tokio::test]
    async fn test_request_for_held_address_dropped() {
        let handler = create_test_handler(test_config()).await;

        let address = Ipv4Addr::new(192, 168, 1, 100);
        let mac_a = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x08];
        handler.leases.allocate(address, mac_a, 3600).await.unwrap();

        let mac_b = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x09];
        let data = create_dhcp_packet(
            MessageType::Request,
            mac_b,
            0x12345678,
            vec![DhcpOption::RequestedIp(address)],
        );
        let packet = DhcpPacket::parse(&data).unwrap();

        assert!(handler.handle_request(&packet).await.is_ok());
        assert!(handler.leases.active_lease(mac_b).await.is_none());

        // The original holder is untouched.
        let lease = handler.leases.active_lease(mac_a).await.unwrap();
        assert_eq!(lease.address, address);
    }

    #[tokio::test]
    async fn test_discover_dropped_when_pool_exhausted() {
        let config = Config {
            ip_pool_start: Ipv4Addr::new(192, 168, 1, 100),
            ip_pool_end: Ipv4Addr::new(192, 168, 1, 101),
            ..test_config()
        };
        let handler = create_test_handler(config).await;

        for index in 0..2u8 {
            let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, index];
            let address = Ipv4Addr::new(192, 168, 1, 100 + index);
            handler.leases.allocate(address, mac, 3600).await.unwrap();
        }

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x99];
        let data = create_dhcp_packet(MessageType::Discover, mac, 0x12345678, vec![]);
        let packet = DhcpPacket::parse(&data).unwrap();

        // Dropped without a reply: no offer is recorded for the client.
        assert!(handler.handle_discover(&packet).await.is_ok());
        let snapshot = handler.leases.snapshot().await;
        assert!(!snapshot.iter().any(|lease| lease.hardware_addr == mac));
    }

    #[tokio::test]
    async fn test_handle_release_frees_lease() {
        let handler = create_test_handler(test_config()).await;

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x0a];
        let address = Ipv4Addr::new(192, 168, 1, 100);
        handler.leases.allocate(address, mac, 3600).await.unwrap();

        let data = with_ciaddr(
            create_dhcp_packet(MessageType::Release, mac, 0x12345678, vec![]),
            address,
        );
        let packet = DhcpPacket::parse(&data).unwrap();

        assert!(handler.handle_release(&packet).await.is_ok());
        assert!(handler.leases.active_lease(mac).await.is_none());
    }

    #[tokio::test]
    async fn test_handle_release_without_ciaddr() {
        let handler = create_test_handler(test_config()).await;

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x0b];
        let data = create_dhcp_packet(MessageType::Release, mac, 0x12345678, vec![]);
        let packet = DhcpPacket::parse(&data).unwrap();

        assert!(handler.handle_release(&packet).await.is_ok());
    }

    #[tokio::test]
    async fn test_handle_decline_frees_lease() {
        let handler = create_test_handler(test_config()).await;

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x0c];
        let address = Ipv4Addr::new(192, 168, 1, 100);
        handler.leases.allocate(address, mac, 3600).await.unwrap();

        let data = with_ciaddr(
            create_dhcp_packet(MessageType::Decline, mac, 0x12345678, vec![]),
            address,
        );
        let packet = DhcpPacket::parse(&data).unwrap();

        assert!(handler.handle_decline(&packet).await.is_ok());
        assert!(handler.leases.active_lease(mac).await.is_none());

        // Freed by decline means offerable again.
        let pool = handler.config.pool();
        let mac_b = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x0d];
        let reoffered = handler.leases.offer_next(&pool, mac_b, 3600).await.unwrap();
        assert_eq!(reoffered, address);
    }

    #[tokio::test]
    async fn test_handle_inform_replies_without_lease() {
        let handler = create_test_handler(test_config()).await;

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x0e];
        let ciaddr = Ipv4Addr::new(192, 168, 1, 50);
        let data = with_ciaddr(
            create_dhcp_packet(MessageType::Inform, mac, 0x12345678, vec![]),
            ciaddr,
        );
        let packet = DhcpPacket::parse(&data).unwrap();

        accept_send_failure(handler.handle_inform(&packet).await);

        // Inform never touches the table.
        assert!(handler.leases.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_handle_datagram_ignores_bootreply() {
        let handler = create_test_handler(test_config()).await;

        let mut data = create_dhcp_packet(
            MessageType::Discover,
            [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x0f],
            0x12345678,
            vec![],
        );
        data[0] = 2;

        let source: SocketAddr = "127.0.0.1:68".parse().unwrap();
        assert!(handler.handle_datagram(&data, source).await.is_ok());
        assert!(handler.leases.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_handle_datagram_drops_missing_message_type() {
        let handler = create_test_handler(test_config()).await;

        let mut data = vec![0u8; DHCP_PACKET_SIZE];
        data[0] = BOOTREQUEST;
        data[1] = HTYPE_ETHERNET;
        data[2] = HLEN_ETHERNET;
        data[DHCP_HEADER_SIZE] = OptionCode::End as u8;

        let source: SocketAddr = "127.0.0.1:68".parse().unwrap();
        assert!(handler.handle_datagram(&data, source).await.is_ok());
        assert!(handler.leases.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_handle_datagram_rejects_malformed() {
        let handler = create_test_handler(test_config()).await;

        let source: SocketAddr = "127.0.0.1:68".parse().unwrap();
        assert!(handler.handle_datagram(&[0u8; 50], source).await.is_err());
    }

    #[tokio::test]
    async fn test_handle_datagram_ignores_reply_only_kinds() {
        let handler = create_test_handler(test_config()).await;

        let data = create_dhcp_packet(
            MessageType::Ack,
            [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x10],
            0x12345678,
            vec![],
        );

        let source: SocketAddr = "127.0.0.1:68".parse().unwrap();
        assert!(handler.handle_datagram(&data, source).await.is_ok());
        assert!(handler.leases.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_relayed_request_keeps_giaddr_in_reply() {
        let handler = create_test_handler(test_config()).await;

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x11];
        let giaddr = Ipv4Addr::new(10, 0, 0, 1);
        let data = with_giaddr(
            create_dhcp_packet(
                MessageType::Request,
                mac,
                0x12345678,
                vec![DhcpOption::RequestedIp(Ipv4Addr::new(192, 168, 1, 100))],
            ),
            giaddr,
        );
        let request = DhcpPacket::parse(&data).unwrap();

        let ack = DhcpPacket::create_reply(
            &request,
            MessageType::Ack,
            Ipv4Addr::new(192, 168, 1, 100),
            handler.config.server_ip,
            handler.lease_options(3600),
        );

        assert_eq!(ack.giaddr, giaddr);
        assert_eq!(
            reply_destination(&request, &handler.config),
            SocketAddr::new(IpAddr::V4(giaddr), handler.config.dhcp_server_port)
        );
    }

    #[tokio::test]
    async fn test_lease_options_contents() {
        let handler = create_test_handler(test_config()).await;

        let options = handler.lease_options(3600);
        assert!(options.iter().any(|opt| matches!(
            opt,
            DhcpOption::LeaseTime(seconds) if *seconds == 3600
        )));
        assert!(options.iter().any(|opt| matches!(
            opt,
            DhcpOption::ServerIdentifier(ip) if *ip == handler.config.server_ip
        )));
        assert!(options.iter().any(|opt| matches!(opt, DhcpOption::SubnetMask(_))));
        assert!(options.iter().any(|opt| matches!(opt, DhcpOption::Router(_))));
        assert!(options.iter().any(|opt| matches!(opt, DhcpOption::DnsServer(_))));
    }

    #[tokio::test]
    async fn test_inform_options_have_no_lease_time() {
        let handler = create_test_handler(test_config()).await;

        let options = handler.config_options();
        assert!(!options.iter().any(|opt| matches!(opt, DhcpOption::LeaseTime(_))));
        assert!(options.iter().any(|opt| matches!(opt, DhcpOption::ServerIdentifier(_))));
        assert!(options.iter().any(|opt| matches!(opt, DhcpOption::SubnetMask(_))));
    }

    #[tokio::test]
    async fn test_full_dora_flow() {
        let handler = create_test_handler(test_config()).await;

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x12];
        let xid = 0xDEADBEEF;

        let discover_data = create_dhcp_packet(MessageType::Discover, mac, xid, vec![]);
        let discover = DhcpPacket::parse(&discover_data).unwrap();
        accept_send_failure(handler.handle_discover(&discover).await);

        let offered = handler.leases.snapshot().await[0].address;

        let request_data = create_dhcp_packet(
            MessageType::Request,
            mac,
            xid,
            vec![DhcpOption::RequestedIp(offered)],
        );
        let request = DhcpPacket::parse(&request_data).unwrap();
        accept_send_failure(handler.handle_request(&request).await);

        let lease = handler.leases.active_lease(mac).await.unwrap();
        assert_eq!(lease.address, offered);
        assert_eq!(lease.state, LeaseState::Active);
    }
}
