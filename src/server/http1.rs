//! HTTP/1.x request reading for the one-request-per-connection transport.
//!
//! The head is parsed with `httparse` as soon as it is complete; the body is
//! read separately so a handler can resolve and sleep before consuming it.
//! Bodies are framed by `Content-Length` or `Transfer-Encoding: chunked`.

use std::fmt;
use std::io::{self, Read, Write};

use crate::headers::HeaderStorage;

/// Upper bound on header lines in one request.
pub const MAX_HEADERS: usize = 64;

/// Upper bound on the request line plus header block.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Failure to read a request off the socket.
#[derive(Debug)]
pub enum WireError {
    /// The peer closed the connection before sending anything.
    Closed,
    Io(io::Error),
    Malformed(String),
    HeadTooLarge { limit: usize },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Closed => write!(f, "Connection closed before a request was sent"),
            WireError::Io(e) => write!(f, "I/O error: {e}"),
            WireError::Malformed(reason) => write!(f, "Malformed request: {reason}"),
            WireError::HeadTooLarge { limit } => {
                write!(f, "Request head exceeds {limit} bytes")
            }
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        WireError::Io(e)
    }
}

/// Request line and headers, plus any body bytes read along with them.
#[derive(Debug)]
pub struct RequestHead {
    pub method: String,
    /// Request target as sent, path plus query.
    pub target: String,
    pub minor_version: u8,
    pub headers: HeaderStorage,
    leftover: Vec<u8>,
}

/// Read until the request head is complete.
///
/// # Errors
///
/// [`WireError::Closed`] when the peer sends nothing, otherwise a parse or
/// I/O failure.
pub fn read_head<R: Read>(reader: &mut R) -> Result<RequestHead, WireError> {
    let mut buf = Vec::with_capacity(READ_CHUNK);
    loop {
        if read_more(reader, &mut buf)? == 0 {
            return Err(if buf.is_empty() {
                WireError::Closed
            } else {
                WireError::Malformed("connection closed inside request head".into())
            });
        }

        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut slots);
        match parsed
            .parse(&buf)
            .map_err(|e| WireError::Malformed(e.to_string()))?
        {
            httparse::Status::Complete(head_len) => {
                let headers = parsed
                    .headers
                    .iter()
                    .map(|h| {
                        (
                            h.name.to_string(),
                            String::from_utf8_lossy(h.value).into_owned(),
                        )
                    })
                    .collect();
                return Ok(RequestHead {
                    method: parsed.method.unwrap_or_default().to_string(),
                    target: parsed.path.unwrap_or("/").to_string(),
                    minor_version: parsed.version.unwrap_or(0),
                    headers,
                    leftover: buf[head_len..].to_vec(),
                });
            }
            httparse::Status::Partial if buf.len() > MAX_HEAD_SIZE => {
                return Err(WireError::HeadTooLarge {
                    limit: MAX_HEAD_SIZE,
                });
            }
            httparse::Status::Partial => {}
        }
    }
}

impl RequestHead {
    fn is_chunked(&self) -> bool {
        self.headers
            .get_list("transfer-encoding")
            .iter()
            .any(|v| v.to_ascii_lowercase().contains("chunked"))
    }

    fn content_length(&self) -> Result<usize, WireError> {
        match self.headers.get("content-length") {
            None => Ok(0),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| WireError::Malformed(format!("invalid Content-Length: {v}"))),
        }
    }

    fn expects_continue(&self) -> bool {
        self.headers
            .get("expect")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    }

    /// Read the request body, answering `Expect: 100-continue` first.
    ///
    /// # Errors
    ///
    /// Bad framing headers, a truncated body or an I/O failure.
    pub fn read_body<S: Read + Write>(&mut self, stream: &mut S) -> Result<Vec<u8>, WireError> {
        if self.expects_continue() {
            stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
            stream.flush()?;
        }
        let mut buf = std::mem::take(&mut self.leftover);
        if self.is_chunked() {
            return read_chunked(stream, buf);
        }

        let len = self.content_length()?;
        if buf.len() < len {
            let missing = (len - buf.len()) as u64;
            Read::by_ref(stream).take(missing).read_to_end(&mut buf)?;
            if buf.len() < len {
                return Err(WireError::Malformed(
                    "connection closed inside request body".into(),
                ));
            }
        }
        buf.truncate(len);
        Ok(buf)
    }
}

fn read_more<R: Read>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<usize> {
    let mut chunk = [0u8; READ_CHUNK];
    let n = reader.read(&mut chunk)?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}

/// Grow `buf` until it holds at least `target` bytes.
fn fill<R: Read>(reader: &mut R, buf: &mut Vec<u8>, target: usize) -> Result<(), WireError> {
    while buf.len() < target {
        if read_more(reader, buf)? == 0 {
            return Err(WireError::Malformed(
                "connection closed inside chunked body".into(),
            ));
        }
    }
    Ok(())
}

fn read_chunked<R: Read>(reader: &mut R, mut buf: Vec<u8>) -> Result<Vec<u8>, WireError> {
    let mut body = Vec::new();
    let mut pos = 0;
    loop {
        match httparse::parse_chunk_size(&buf[pos..]) {
            Ok(httparse::Status::Complete((consumed, 0))) => {
                // Trailer section ends with an empty line
                let trailers = pos + consumed;
                while !(buf[trailers..].starts_with(b"\r\n")
                    || buf[trailers..].windows(4).any(|w| w == b"\r\n\r\n"))
                {
                    let want = buf.len() + 1;
                    fill(reader, &mut buf, want)?;
                }
                return Ok(body);
            }
            Ok(httparse::Status::Complete((consumed, size))) => {
                let size = usize::try_from(size)
                    .map_err(|_| WireError::Malformed(format!("chunk too large: {size}")))?;
                let start = pos + consumed;
                let end = start + size + 2;
                fill(reader, &mut buf, end)?;
                if &buf[start + size..end] != b"\r\n" {
                    return Err(WireError::Malformed("chunk not terminated by CRLF".into()));
                }
                body.extend_from_slice(&buf[start..start + size]);
                pos = end;
            }
            Ok(httparse::Status::Partial) => {
                let want = buf.len() + 1;
                fill(reader, &mut buf, want)?;
            }
            Err(_) => return Err(WireError::Malformed("invalid chunk size line".into())),
        }
    }
}
