//! DHCP server for clients of the access point

use core::net::Ipv4Addr;

use acclog_core::config::{AP_ADDRESS, AP_PREFIX_LEN};
use acclog_core::network::dhcp_server::{CLIENT_PORT, DhcpServer, SERVER_PORT};
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint, Stack};
use log::{debug, info, warn};

use super::now_ms;

const PACKET_SIZE: usize = 600;

#[embassy_executor::task]
pub async fn dhcp_task(stack: Stack<'static>) {
    let mut rx_meta = [PacketMetadata::EMPTY; 4];
    let mut rx_buffer = [0u8; PACKET_SIZE * 2];
    let mut tx_meta = [PacketMetadata::EMPTY; 4];
    let mut tx_buffer = [0u8; PACKET_SIZE * 2];

    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    if let Err(e) = socket.bind(SERVER_PORT) {
        warn!("DHCP bind failed: {:?}", e);
        return;
    }

    let mut server = DhcpServer::new(AP_ADDRESS, AP_PREFIX_LEN);
    let broadcast = IpEndpoint::new(IpAddress::Ipv4(Ipv4Addr::BROADCAST), CLIENT_PORT);
    info!("DHCP server running on {}", AP_ADDRESS);

    let mut packet = [0u8; PACKET_SIZE];
    let mut reply = [0u8; PACKET_SIZE];

    loop {
        let len = match socket.recv_from(&mut packet).await {
            Ok((len, _)) => len,
            Err(e) => {
                debug!("DHCP receive error: {:?}", e);
                continue;
            }
        };

        let now_secs = now_ms() / 1000;
        match server.handle(&packet[..len], now_secs, &mut reply) {
            Ok(Some(reply_len)) => {
                if let Err(e) = socket.send_to(&reply[..reply_len], broadcast).await {
                    warn!("DHCP send failed: {:?}", e);
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Ignoring DHCP packet: {}", e),
        }
    }
}
