//! Network plumbing: public-IP echo, reachability probes, port inventory.

use std::net::Ipv4Addr;
use std::time::Duration;

use netstat2::{AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

const IP_ECHO_URL: &str = "https://api.ipify.org?format=json";
const SERVER_CHECK_URL: &str = "https://servercheck.spycibot.com/api";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const CLIENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Grace before the loopback client fires, so the listener is up first.
const CLIENT_SEND_DELAY: Duration = Duration::from_secs(2);

/// Fixed payload the external server-check service sends to the game port.
const EXTERNAL_PROBE_PACKET: [u8; 25] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08,
];
const EXTERNAL_PROBE_REPLY: &[u8] = b"Hello from AstroTux";

#[derive(Debug, Error)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed response from {service}: {detail}")]
    Decode {
        service: &'static str,
        detail: String,
    },
}

/// Fetches this host's public IPv4 address from the external echo service.
pub async fn public_ip() -> Result<String, NetError> {
    #[derive(Deserialize)]
    struct IpEcho {
        ip: String,
    }

    debug!("Getting public IP from remote service");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let echo: IpEcho = client
        .get(IP_ECHO_URL)
        .send()
        .await?
        .json()
        .await
        .map_err(|e| NetError::Decode {
            service: "ip echo",
            detail: e.to_string(),
        })?;
    debug!("Public IP reported as {}", echo.ip);
    Ok(echo.ip)
}

pub fn is_ipv4_literal(address: &str) -> bool {
    address.parse::<Ipv4Addr>().is_ok()
}

/// Whether `address` is an IPv4 literal outside every non-routable range.
pub fn is_global_ipv4(address: &str) -> bool {
    let Ok(ip) = address.parse::<Ipv4Addr>() else {
        return false;
    };
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_documentation())
}

/// Whether any local process already listens on `port` for the given
/// protocol, consulting the OS's network-connections inventory.
pub fn is_port_in_use(port: u16, tcp: bool) -> bool {
    let af = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
    let proto = if tcp {
        ProtocolFlags::TCP
    } else {
        ProtocolFlags::UDP
    };
    match netstat2::get_sockets_info(af, proto) {
        Ok(sockets) => sockets.iter().any(|si| match &si.protocol_socket_info {
            ProtocolSocketInfo::Tcp(info) => info.local_port == port,
            ProtocolSocketInfo::Udp(info) => info.local_port == port,
        }),
        Err(e) => {
            warn!("Could not enumerate local sockets: {e}");
            false
        }
    }
}

fn random_nonce() -> Vec<u8> {
    // 16 random bytes, hex-encoded: 32 bytes on the wire.
    let mut nonce = String::with_capacity(32);
    for _ in 0..16 {
        nonce.push_str(&format!("{:02x}", fastrand::u8(..)));
    }
    nonce.into_bytes()
}

/// Tests whether this host is reachable on `port` from the local network by
/// sending itself a random nonce addressed to the *public* IP and waiting
/// for it to arrive. `tcp` selects the transport. The listener is bound
/// before the client task fires.
pub async fn net_test_local(public_ip: &str, port: u16, tcp: bool) -> bool {
    let nonce = random_nonce();
    let target = format!("{public_ip}:{port}");

    if tcp {
        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("Could not bind TCP port {port} for reachability probe: {e}");
                return false;
            }
        };
        let client_nonce = nonce.clone();
        let client = tokio::spawn(async move {
            if let Ok(Ok(mut stream)) =
                timeout(CLIENT_CONNECT_TIMEOUT, TcpStream::connect(&target)).await
            {
                let _ = stream.write_all(&client_nonce).await;
            }
        });
        let received = recv_nonce_tcp(&listener, &nonce).await;
        client.abort();
        received
    } else {
        let socket = match UdpSocket::bind(("0.0.0.0", port)).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!("Could not bind UDP port {port} for reachability probe: {e}");
                return false;
            }
        };
        let client_nonce = nonce.clone();
        let client = tokio::spawn(async move {
            tokio::time::sleep(CLIENT_SEND_DELAY).await;
            if let Ok(sender) = UdpSocket::bind("0.0.0.0:0").await {
                let _ = sender.send_to(&client_nonce, &target).await;
            }
        });
        let received = recv_nonce_udp(&socket, &nonce).await;
        client.abort();
        received
    }
}

async fn recv_nonce_udp(socket: &UdpSocket, nonce: &[u8]) -> bool {
    let mut buf = [0u8; 32];
    match timeout(PROBE_TIMEOUT, socket.recv_from(&mut buf)).await {
        Ok(Ok((n, _))) => {
            let matched = &buf[..n] == nonce;
            if !matched {
                debug!("Received data does not match the expected nonce");
            }
            matched
        }
        Ok(Err(e)) => {
            debug!("Error while receiving probe: {e}");
            false
        }
        Err(_) => false,
    }
}

async fn recv_nonce_tcp(listener: &TcpListener, nonce: &[u8]) -> bool {
    match timeout(PROBE_TIMEOUT, listener.accept()).await {
        Ok(Ok((mut stream, _))) => {
            let mut buf = [0u8; 32];
            match timeout(PROBE_TIMEOUT, stream.read(&mut buf)).await {
                Ok(Ok(n)) => {
                    let matched = &buf[..n] == nonce;
                    if !matched {
                        debug!("Received data does not match the expected nonce");
                    }
                    matched
                }
                _ => false,
            }
        }
        _ => false,
    }
}

/// Tests whether `public_ip:port` is reachable over UDP from outside the
/// local network, by asking the external server-check service to fire its
/// probe packet at the port while we answer it.
pub async fn net_test_nonlocal(public_ip: &str, port: u16) -> bool {
    // Bind before asking the service to probe, so the packet finds a listener.
    let responder = match UdpSocket::bind(("0.0.0.0", port)).await {
        Ok(socket) => Some(tokio::spawn(respond_to_external_probe(socket))),
        Err(e) => {
            warn!("Could not bind UDP port {port} for external probe: {e}");
            None
        }
    };

    #[derive(Deserialize)]
    struct CheckResponse {
        #[serde(rename = "Server")]
        server: bool,
    }

    let result = async {
        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        let response: CheckResponse = client
            .post(format!("{SERVER_CHECK_URL}?ip_port={public_ip}:{port}"))
            .send()
            .await?
            .json()
            .await?;
        Ok::<bool, reqwest::Error>(response.server)
    }
    .await;

    if let Some(responder) = responder {
        responder.abort();
    }

    match result {
        Ok(reachable) => reachable,
        Err(e) => {
            warn!("Connection to external server-check service failed: {e}");
            warn!("Unable to verify connectivity from outside the local network");
            false
        }
    }
}

async fn respond_to_external_probe(socket: UdpSocket) {
    let mut buf = [0u8; 32];
    if let Ok(Ok((n, addr))) = timeout(PROBE_TIMEOUT, socket.recv_from(&mut buf)).await {
        if buf[..n] == EXTERNAL_PROBE_PACKET {
            let _ = socket.send_to(EXTERNAL_PROBE_REPLY, addr).await;
        } else {
            debug!("External probe payload mismatch ({n} bytes)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_literal_detection() {
        assert!(is_ipv4_literal("203.0.114.7"));
        assert!(!is_ipv4_literal("example.com"));
        assert!(!is_ipv4_literal("::1"));
    }

    #[test]
    fn global_ipv4_rejects_non_routable_ranges() {
        assert!(is_global_ipv4("8.8.8.8"));
        for addr in [
            "10.0.0.1",
            "192.168.1.1",
            "172.16.0.1",
            "127.0.0.1",
            "169.254.0.1",
            "0.0.0.0",
            "255.255.255.255",
            "224.0.0.1",
            "192.0.2.1",
        ] {
            assert!(!is_global_ipv4(addr), "{addr} should not be global");
        }
    }

    #[test]
    fn nonce_is_hex_and_32_bytes() {
        let nonce = random_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.iter().all(u8::is_ascii_hexdigit));
    }

    #[tokio::test]
    async fn local_udp_loopback_probe_succeeds() {
        // The "public" IP is loopback here, so the nonce comes straight back.
        assert!(net_test_local("127.0.0.1", 39741, false).await);
    }

    #[tokio::test]
    async fn local_tcp_loopback_probe_succeeds() {
        assert!(net_test_local("127.0.0.1", 39742, true).await);
    }
}
