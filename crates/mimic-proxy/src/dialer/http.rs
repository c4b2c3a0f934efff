//! HTTP CONNECT tunnelling through an HTTP(S) proxy.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::Credentials;
use crate::error::{ConnectError, DialPhase};

/// Largest response header block accepted from a proxy.
const MAX_HEADER_BYTES: usize = 8 * 1024;
/// Bytes of an error response body carried into the error detail.
pub const MAX_ERROR_BODY: usize = 500;
const ERROR_BODY_TIMEOUT: Duration = Duration::from_secs(2);

fn proxy_error(detail: impl Into<String>) -> ConnectError {
    ConnectError::dial(DialPhase::HttpProxy, detail)
}

/// Builds the CONNECT request for `authority` (`host:port`).
pub fn connect_request(
    authority: &str,
    credentials: Option<&Credentials>,
    user_agent: Option<&str>,
) -> String {
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(creds) = credentials {
        let token = BASE64.encode(format!("{}:{}", creds.username, creds.password));
        request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }
    if let Some(ua) = user_agent.filter(|ua| !ua.is_empty()) {
        request.push_str(&format!("User-Agent: {ua}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// Sends CONNECT over `stream` and waits for a `200` answer.
///
/// On success the stream is positioned right after the response headers, so
/// it can carry the tunnelled bytes directly.
pub async fn connect_via<S>(
    stream: &mut S,
    authority: &str,
    credentials: Option<&Credentials>,
    user_agent: Option<&str>,
) -> Result<(), ConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = connect_request(authority, credentials, user_agent);
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| proxy_error(format!("failed to send CONNECT: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| proxy_error(format!("failed to send CONNECT: {}", e)))?;

    let head = read_head(stream).await?;
    let status_line = head.lines().next().unwrap_or_default();
    let status = parse_status_code(status_line)?;
    debug!("Proxy answered CONNECT {} with {}", authority, status);

    if status == 200 {
        return Ok(());
    }

    let body = read_error_body(stream, content_length(&head)).await;
    Err(proxy_error(format!(
        "proxy responded with status {}: {}",
        status,
        body.trim()
    )))
}

/// Reads up to and including the blank line ending the headers.
///
/// Reads byte by byte so nothing past the headers is consumed.
async fn read_head<S>(stream: &mut S) -> Result<String, ConnectError>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(256);
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_HEADER_BYTES {
            return Err(proxy_error("proxy response headers too large"));
        }
        let byte = stream
            .read_u8()
            .await
            .map_err(|e| proxy_error(format!("failed to read proxy response: {}", e)))?;
        head.push(byte);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn parse_status_code(line: &str) -> Result<u16, ConnectError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| proxy_error(format!("invalid status code in response: {}", line))),
        _ => Err(proxy_error(format!("malformed proxy response: {}", line))),
    }
}

fn content_length(head: &str) -> Option<usize> {
    head.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Best-effort read of at most [`MAX_ERROR_BODY`] bytes of the body.
async fn read_error_body<S>(stream: &mut S, length: Option<usize>) -> String
where
    S: AsyncRead + Unpin,
{
    let limit = length.map_or(MAX_ERROR_BODY, |len| len.min(MAX_ERROR_BODY));
    let mut body = vec![0u8; limit];
    let mut filled = 0;

    let read = async {
        while filled < limit {
            match stream.read(&mut body[filled..]).await {
                Ok(0) | Err(_) => break,
                Ok(n) => filled += n,
            }
        }
    };
    let _ = tokio::time::timeout(ERROR_BODY_TIMEOUT, read).await;

    String::from_utf8_lossy(&body[..filled]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn request_with_auth_and_user_agent() {
        let creds = Credentials::new("foo", "bar");
        let request = connect_request("example.com:443", Some(&creds), Some("Mozilla/5.0"));
        assert_eq!(
            request,
            "CONNECT example.com:443 HTTP/1.1\r\n\
             Host: example.com:443\r\n\
             Proxy-Authorization: Basic Zm9vOmJhcg==\r\n\
             User-Agent: Mozilla/5.0\r\n\
             \r\n"
        );
    }

    #[tokio::test]
    async fn established_tunnel() {
        let request = connect_request("example.com:443", None, None);
        let mut mock = Builder::new()
            .write(request.as_bytes())
            .read(b"HTTP/1.1 200 Connection Established\r\nVia: test\r\n\r\n")
            .build();

        connect_via(&mut mock, "example.com:443", None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tunnel_bytes_after_headers_are_not_consumed() {
        let request = connect_request("example.com:443", None, None);
        let mut mock = Builder::new()
            .write(request.as_bytes())
            .read(b"HTTP/1.1 200 OK\r\n\r\n\x16\x03\x01")
            .build();

        connect_via(&mut mock, "example.com:443", None, None)
            .await
            .unwrap();

        let mut rest = [0u8; 3];
        mock.read_exact(&mut rest).await.unwrap();
        assert_eq!(rest, [0x16, 0x03, 0x01]);
    }

    #[tokio::test]
    async fn auth_required_carries_body() {
        let creds = Credentials::new("foo", "wrong");
        let request = connect_request("example.com:443", Some(&creds), None);
        let mut mock = Builder::new()
            .write(request.as_bytes())
            .read(b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 13\r\n\r\n")
            .read(b"auth required")
            .build();

        let err = connect_via(&mut mock, "example.com:443", Some(&creds), None)
            .await
            .unwrap_err();

        match &err {
            ConnectError::Dial { phase, detail } => {
                assert_eq!(*phase, DialPhase::HttpProxy);
                assert!(detail.contains("407"), "{}", detail);
                assert!(detail.contains("auth required"), "{}", detail);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().starts_with("HTTP_PROXY_ERR"));
    }

    #[tokio::test]
    async fn error_body_is_truncated() {
        let request = connect_request("example.com:443", None, None);
        let body = "x".repeat(2000);
        let mut mock = Builder::new()
            .write(request.as_bytes())
            .read(b"HTTP/1.1 502 Bad Gateway\r\n\r\n")
            .read(&body.as_bytes()[..MAX_ERROR_BODY])
            .build();

        let err = connect_via(&mut mock, "example.com:443", None, None)
            .await
            .unwrap_err();
        let ConnectError::Dial { detail, .. } = err else {
            panic!("expected dial error");
        };
        assert_eq!(detail.matches('x').count(), MAX_ERROR_BODY);
    }

    #[tokio::test]
    async fn non_200_success_codes_are_rejected() {
        let request = connect_request("example.com:443", None, None);
        let mut mock = Builder::new()
            .write(request.as_bytes())
            .read(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n")
            .build();

        let err = connect_via(&mut mock, "example.com:443", None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("204"));
    }

    #[tokio::test]
    async fn garbage_response_is_rejected() {
        let request = connect_request("example.com:443", None, None);
        let mut mock = Builder::new()
            .write(request.as_bytes())
            .read(b"SSH-2.0-OpenSSH\r\n\r\n")
            .build();

        let err = connect_via(&mut mock, "example.com:443", None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn status_and_length_parsing() {
        assert_eq!(parse_status_code("HTTP/1.0 200 OK").unwrap(), 200);
        assert!(parse_status_code("garbage").is_err());
        assert_eq!(
            content_length("HTTP/1.1 407 x\r\ncontent-length: 42\r\n\r\n"),
            Some(42)
        );
        assert_eq!(content_length("HTTP/1.1 407 x\r\n\r\n"), None);
    }
}
