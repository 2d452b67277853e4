//! Reader for the header blocks of a `message/cpim` body (RFC 3862).
//!
//! ```text
//! From: Alice <im:alice@example.com>
//! To: Bob <im:bob@example.com>
//! DateTime: 2024-01-15T10:30:00Z
//!
//! Content-Type: text/plain
//!
//! Hello, Bob!
//! ```
//!
//! Only the headers are read. The first chunk of a message may end in the
//! middle of the content headers, in which case whatever is complete is
//! returned.

use crate::error::{MsrpError, Result};

/// Message and content headers of a CPIM wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpimHeaders {
    message: Vec<(String, String)>,
    content: Vec<(String, String)>,
    body_offset: Option<usize>,
}

impl CpimHeaders {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (message_block, rest) = split_block(data);
        let message_block = message_block.ok_or_else(|| MsrpError::cpim("message headers are not terminated"))?;
        let message = parse_block(message_block)?;

        let mut content = Vec::new();
        let mut body_offset = None;
        let rest_start = data.len() - rest.len();
        match split_block(rest) {
            (Some(block), body) => {
                content = parse_block(block)?;
                body_offset = Some(data.len() - body.len());
            }
            (None, partial) => {
                // Keep complete lines only.
                if let Some(end) = partial.iter().rposition(|b| *b == b'\n') {
                    content = parse_block(&data[rest_start..rest_start + end])?;
                }
            }
        }

        Ok(Self {
            message,
            content,
            body_offset,
        })
    }

    /// First message header called `name`.
    pub fn get<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.get_all(name).next()
    }

    /// Every message header called `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.message
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Content header (`Content-Type`, `Content-Disposition`, ...).
    pub fn content_header(&self, name: &str) -> Option<&str> {
        self.content
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Where the wrapped content starts, once both header blocks are complete.
    pub fn body_offset(&self) -> Option<usize> {
        self.body_offset
    }
}

/// Split at the first empty line. Returns the block before it (without the
/// line terminators) and everything after it.
fn split_block(data: &[u8]) -> (Option<&[u8]>, &[u8]) {
    let mut line_start = 0;
    while line_start <= data.len() {
        let Some(nl) = data[line_start..].iter().position(|b| *b == b'\n') else {
            break;
        };
        let line = &data[line_start..line_start + nl];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            return (Some(&data[..line_start]), &data[line_start + nl + 1..]);
        }
        line_start += nl + 1;
    }
    (None, data)
}

fn parse_block(block: &[u8]) -> Result<Vec<(String, String)>> {
    let text = std::str::from_utf8(block).map_err(|_| MsrpError::cpim("headers are not UTF-8"))?;
    let mut headers = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| MsrpError::cpim(format!("header line without colon: {}", line)))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(MsrpError::cpim("empty header name"));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }
    Ok(headers)
}
