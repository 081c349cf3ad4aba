//! Request line framing and tokenisation.

use std::fmt;
use std::io::{self, Read};

use thiserror::Error;

const MAX_REQUEST_BYTES: usize = 64 * 1024;
/// One byte past the limit, so a single read can hold a whole record from a
/// packet socket and still detect an oversized one.
const READ_BUFFER_BYTES: usize = MAX_REQUEST_BYTES + 1;

/// Errors raised while reading a request line.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The peer closed the connection before sending a newline.
    #[error("connection closed before a complete request line ({received} bytes received)")]
    Unterminated {
        /// Bytes received before end of stream.
        received: usize,
    },
    /// The request line exceeded the size limit.
    #[error("request exceeds {limit} bytes")]
    TooLarge {
        /// Maximum accepted request size.
        limit: usize,
    },
    /// The request line was not valid UTF-8.
    #[error("request is not valid UTF-8: {source}")]
    Encoding {
        /// Underlying conversion error.
        #[source]
        source: std::string::FromUtf8Error,
    },
    /// Reading from the connection failed.
    #[error("failed to read request: {source}")]
    Read {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Command name followed by its arguments, as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    tokens: Vec<String>,
}

impl Request {
    /// Splits `line` on single spaces. A trailing newline is dropped first.
    ///
    /// Consecutive spaces produce empty tokens, which are kept.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let body = line.strip_suffix('\n').unwrap_or(line);
        Self {
            tokens: body.split(' ').map(str::to_owned).collect(),
        }
    }

    /// All tokens, command first.
    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// The command name, if any.
    #[must_use]
    pub fn program(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }

    /// Tokens after the command name.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        self.tokens.get(1..).unwrap_or_default()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.tokens.join(" "))
    }
}

/// Reads bytes up to and including the first newline and parses them.
///
/// Bytes after the newline are discarded; each connection carries a single
/// request.
pub fn read_request(stream: &mut impl Read) -> Result<Request, RequestError> {
    let line = read_request_line(stream)?;
    let text = String::from_utf8(line).map_err(|source| RequestError::Encoding { source })?;
    Ok(Request::parse(&text))
}

fn read_request_line(stream: &mut impl Read) -> Result<Vec<u8>, RequestError> {
    let mut buffer = Vec::new();
    let mut chunk = vec![0_u8; READ_BUFFER_BYTES];
    loop {
        let bytes_read = read_chunk_with_retry(stream, &mut chunk)?;
        if bytes_read == 0 {
            return Err(RequestError::Unterminated {
                received: buffer.len(),
            });
        }
        let received = chunk.get(..bytes_read).unwrap_or_default();
        if let Some(pos) = received.iter().position(|byte| *byte == b'\n') {
            buffer.extend_from_slice(received.get(..=pos).unwrap_or_default());
            enforce_request_limit(buffer.len())?;
            return Ok(buffer);
        }
        buffer.extend_from_slice(received);
        enforce_request_limit(buffer.len())?;
    }
}

fn read_chunk_with_retry(stream: &mut impl Read, chunk: &mut [u8]) -> Result<usize, RequestError> {
    loop {
        match stream.read(chunk) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(RequestError::Read { source }),
        }
    }
}

const fn enforce_request_limit(size: usize) -> Result<(), RequestError> {
    if size > MAX_REQUEST_BYTES {
        return Err(RequestError::TooLarge {
            limit: MAX_REQUEST_BYTES,
        });
    }
    Ok(())
}
