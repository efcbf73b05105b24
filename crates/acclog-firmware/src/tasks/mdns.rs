//! Answers `<MDNS_NAME>.local` A queries so the logger can be found by name

use acclog_core::config::MDNS_NAME;
use acclog_core::network::mdns::{MDNS_ADDR, MDNS_PORT, MdnsResponder};
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint, Stack};
use log::{debug, info, warn};

const PACKET_SIZE: usize = 512;

#[embassy_executor::task]
pub async fn mdns_task(stack: Stack<'static>) {
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
    if let Err(e) = socket.bind(MDNS_PORT) {
        warn!("mDNS bind failed: {:?}", e);
        return;
    }
    if let Err(e) = stack.join_multicast_group(IpAddress::Ipv4(MDNS_ADDR)) {
        warn!("Joining the mDNS group failed: {:?}", e);
    }

    stack.wait_config_up().await;
    let Some(config) = stack.config_v4() else {
        warn!("mDNS has no IPv4 address to announce");
        return;
    };
    let mut responder = MdnsResponder::new(MDNS_NAME, config.address.address());
    info!("mDNS responding as {}.local", MDNS_NAME);

    let mut packet = [0u8; PACKET_SIZE];
    let mut reply = [0u8; PACKET_SIZE];
    let group = IpEndpoint::new(IpAddress::Ipv4(MDNS_ADDR), MDNS_PORT);

    loop {
        let (len, meta) = match socket.recv_from(&mut packet).await {
            Ok(received) => received,
            Err(e) => {
                debug!("mDNS receive error: {:?}", e);
                continue;
            }
        };

        // station leases can change on renewal
        if let Some(config) = stack.config_v4() {
            responder.set_address(config.address.address());
        }

        let response = match responder.handle_query(&packet[..len], meta.endpoint.port, &mut reply) {
            Ok(Some(response)) => response,
            Ok(None) => continue,
            Err(e) => {
                debug!("Ignoring mDNS packet: {}", e);
                continue;
            }
        };

        let destination = if response.unicast { meta.endpoint } else { group };
        if let Err(e) = socket.send_to(&reply[..response.len], destination).await {
            warn!("mDNS send failed: {:?}", e);
        }
    }
}
