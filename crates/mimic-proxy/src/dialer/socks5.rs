//! SOCKS5 CONNECT (RFC 1928) with optional username/password auth (RFC 1929).

use std::net::IpAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::Credentials;
use crate::error::{ConnectError, DialPhase};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

fn socks_error(detail: impl Into<String>) -> ConnectError {
    ConnectError::dial(DialPhase::Socks5, detail)
}

fn io_error(stage: &str, e: std::io::Error) -> ConnectError {
    socks_error(format!("{}: {}", stage, e))
}

fn reply_reason(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown failure",
    }
}

/// Negotiates a SOCKS5 tunnel to `host:port` over `stream`.
pub async fn connect_via<S>(
    stream: &mut S,
    host: &str,
    port: u16,
    credentials: Option<&Credentials>,
) -> Result<(), ConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Method negotiation
    let greeting: &[u8] = if credentials.is_some() {
        &[VERSION, 0x02, METHOD_NO_AUTH, METHOD_USER_PASS]
    } else {
        &[VERSION, 0x01, METHOD_NO_AUTH]
    };
    stream
        .write_all(greeting)
        .await
        .map_err(|e| io_error("greeting", e))?;

    let mut choice = [0u8; 2];
    stream
        .read_exact(&mut choice)
        .await
        .map_err(|e| io_error("greeting", e))?;
    if choice[0] != VERSION {
        return Err(socks_error(format!("bad version {:#04x}", choice[0])));
    }

    match (choice[1], credentials) {
        (METHOD_NO_AUTH, _) => {}
        (METHOD_USER_PASS, Some(creds)) => authenticate(stream, creds).await?,
        (METHOD_NONE_ACCEPTABLE, _) => {
            return Err(socks_error("no acceptable authentication methods"))
        }
        (method, _) => {
            return Err(socks_error(format!(
                "proxy selected unsupported method {:#04x}",
                method
            )))
        }
    }

    // CONNECT
    let request = connect_request(host, port)?;
    stream
        .write_all(&request)
        .await
        .map_err(|e| io_error("connect", e))?;

    let mut head = [0u8; 4];
    stream
        .read_exact(&mut head)
        .await
        .map_err(|e| io_error("connect reply", e))?;
    if head[0] != VERSION {
        return Err(socks_error(format!("bad version {:#04x}", head[0])));
    }
    if head[1] != 0x00 {
        return Err(socks_error(format!(
            "connect to {}:{} failed: {} ({:#04x})",
            host,
            port,
            reply_reason(head[1]),
            head[1]
        )));
    }

    // BND.ADDR and BND.PORT
    let bound_len = match head[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let len = stream
                .read_u8()
                .await
                .map_err(|e| io_error("connect reply", e))?;
            len as usize
        }
        other => return Err(socks_error(format!("bad address type {:#04x}", other))),
    };
    let mut bound = vec![0u8; bound_len + 2];
    stream
        .read_exact(&mut bound)
        .await
        .map_err(|e| io_error("connect reply", e))?;

    debug!("SOCKS5 tunnel to {}:{} established", host, port);
    Ok(())
}

async fn authenticate<S>(stream: &mut S, creds: &Credentials) -> Result<(), ConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user = creds.username.as_bytes();
    let pass = creds.password.as_bytes();
    if user.len() > 255 || pass.len() > 255 {
        return Err(socks_error("username or password too long"));
    }

    let mut buf = Vec::with_capacity(3 + user.len() + pass.len());
    buf.extend_from_slice(&[0x01, user.len() as u8]);
    buf.extend_from_slice(user);
    buf.push(pass.len() as u8);
    buf.extend_from_slice(pass);
    stream
        .write_all(&buf)
        .await
        .map_err(|e| io_error("auth", e))?;

    let mut status = [0u8; 2];
    stream
        .read_exact(&mut status)
        .await
        .map_err(|e| io_error("auth", e))?;
    if status[1] != 0x00 {
        return Err(socks_error("username/password authentication rejected"));
    }
    Ok(())
}

fn connect_request(host: &str, port: u16) -> Result<Vec<u8>, ConnectError> {
    let mut msg = Vec::with_capacity(22);
    msg.extend_from_slice(&[VERSION, CMD_CONNECT, 0x00]);
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            msg.push(ATYP_IPV4);
            msg.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            msg.push(ATYP_IPV6);
            msg.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if host.is_empty() || host.len() > 255 {
                return Err(socks_error(format!("invalid target host {:?}", host)));
            }
            msg.push(ATYP_DOMAIN);
            msg.push(host.len() as u8);
            msg.extend_from_slice(host.as_bytes());
        }
    }
    msg.extend_from_slice(&port.to_be_bytes());
    Ok(msg)
}
