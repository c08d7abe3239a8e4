//! CONNECT tunnel relay.
//!
//! HTTPS traffic is never decrypted: the relay dials the requested origin,
//! acknowledges the CONNECT, then splices bytes both ways until either side
//! closes. Intentionally dumb: no retries, no timeouts beyond the transport's.

use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error};

/// Cap on the CONNECT request head. Anything larger is malformed.
const MAX_CONNECT_HEAD: usize = 8 * 1024;

/// Handle one CONNECT client from the raw socket. `sniffed` holds any bytes
/// the listener already consumed while detecting the method. Errors on the
/// inbound side terminate the connection silently; upstream failures are
/// logged.
pub async fn handle_connect(mut client: TcpStream, sniffed: Vec<u8>) {
    let (head, head_len) = match read_head(&mut client, sniffed).await {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Dropping CONNECT client before handshake: {}", e);
            return;
        }
    };

    let authority = match parse_connect_line(&head[..head_len]) {
        Some(authority) => authority,
        None => {
            debug!("Dropping CONNECT client with malformed request line");
            return;
        }
    };

    let mut upstream = match TcpStream::connect((authority.host.as_str(), authority.port)).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(
                host = %authority.host,
                port = authority.port,
                "Failed proxying HTTPS request: {}",
                e
            );
            return;
        }
    };

    // Acknowledge only once the upstream connection exists.
    if let Err(e) = client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await
    {
        debug!("Client went away before CONNECT handshake completed: {}", e);
        return;
    }

    // Bytes the client sent past the request head belong to the tunnel.
    let buffered = &head[head_len..];
    if !buffered.is_empty() {
        if let Err(e) = upstream.write_all(buffered).await {
            error!(host = %authority.host, "Failed proxying HTTPS request: {}", e);
            return;
        }
    }

    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((from_client, from_upstream)) => {
            debug!(
                host = %authority.host,
                from_client,
                from_upstream,
                "Tunnel closed"
            );
        }
        Err(e) => {
            error!(host = %authority.host, "Failed proxying HTTPS request: {}", e);
        }
    }
}

struct ConnectAuthority {
    host: String,
    port: u16,
}

/// Read until the end of the request head (blank line). Returns the buffered
/// bytes and the offset just past the head terminator.
async fn read_head(client: &mut TcpStream, sniffed: Vec<u8>) -> io::Result<(Vec<u8>, usize)> {
    let mut buf = sniffed;
    let mut chunk = [0u8; 1024];

    if let Some(pos) = find_head_end(&buf) {
        return Ok((buf, pos));
    }

    loop {
        let n = client.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find_head_end(&buf) {
            return Ok((buf, pos));
        }

        if buf.len() > MAX_CONNECT_HEAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "CONNECT request head too large",
            ));
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Parse `CONNECT host:port HTTP/1.1` from the head. The port defaults to 80
/// when the authority carries none; real TLS targets always name 443, so the
/// default only matters for malformed input.
fn parse_connect_line(head: &[u8]) -> Option<ConnectAuthority> {
    let head = std::str::from_utf8(head).ok()?;
    let line = head.split("\r\n").next()?;
    let mut parts = line.split_whitespace();

    if parts.next()? != "CONNECT" {
        return None;
    }
    let authority = parts.next()?;

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (authority, 80),
    };

    if host.is_empty() {
        return None;
    }

    Some(ConnectAuthority {
        host: host.to_string(),
        port,
    })
}
