//! Wire codec for the supply's ASCII frame protocol.
//!
//! Every frame, in either direction, is a single line:
//!
//! ```text
//! ':' <body> ' ' <checksum> '\n'
//! ```
//!
//! where `<body>` is the command code with its argument appended directly
//! (no separator) and `<checksum>` is two uppercase hex digits covering the
//! body only. The checksum is `0x1E0` minus the byte sum of the body, masked
//! to seven bits and forced into the printable `0x40..=0x7F` range.

use heapless::{String, Vec};
use thiserror::Error;

/// Longest line the device produces; status responses are the widest at
/// around 16 bytes, so this leaves plenty of slack.
pub const MAX_FRAME: usize = 64;

const START: u8 = b':';
const TERMINATOR: u8 = b'\n';
const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Frame level decode/encode failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Line did not begin with `':'`.
    #[error("missing ':' start byte")]
    MissingStart,
    /// Line too short to carry a checksum field.
    #[error("missing checksum field")]
    MissingChecksum,
    /// Checksum field was not two hex digits.
    #[error("unreadable checksum field")]
    BadChecksumField,
    /// Recomputed checksum disagrees with the one on the wire.
    #[error("checksum mismatch")]
    Checksum,
    /// Body contained non-ASCII bytes.
    #[error("non-ASCII body")]
    Encoding,
    /// Body would not fit a [MAX_FRAME] sized line.
    #[error("frame too long")]
    Overflow,
}

/// Compute the checksum byte for a frame body (the part between the colon
/// and the trailing space).
///
/// Signed arithmetic matters here: for long bodies the subtraction goes
/// negative and the mask must operate on the two's complement value.
pub fn checksum(body: &str) -> u8 {
    let sum: i32 = body.bytes().map(i32::from).sum();
    (((0x1E0 - sum) & 0x7F) | 0x40) as u8
}

/// Build the full wire line for a frame body.
pub fn encode(body: &str) -> Result<Vec<u8, MAX_FRAME>, FrameError> {
    if !body.is_ascii() {
        return Err(FrameError::Encoding);
    }
    let ck = checksum(body);
    let mut line = Vec::new();
    line.push(START).map_err(|_| FrameError::Overflow)?;
    line.extend_from_slice(body.as_bytes())
        .map_err(|_| FrameError::Overflow)?;
    line.push(b' ').map_err(|_| FrameError::Overflow)?;
    line.push(HEX[usize::from(ck >> 4)])
        .map_err(|_| FrameError::Overflow)?;
    line.push(HEX[usize::from(ck & 0x0F)])
        .map_err(|_| FrameError::Overflow)?;
    line.push(TERMINATOR).map_err(|_| FrameError::Overflow)?;
    Ok(line)
}

/// A verified response line with its checksum stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    body: String<MAX_FRAME>,
}

impl Response {
    /// The raw body, command code included.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Extract the payload of a response to the given command code.
    ///
    /// The device is inconsistent about this: some firmware revisions echo
    /// `":0E123.45"` with the value fused to the code, others answer
    /// `":08 12345.6"` with a separating space. Both forms are accepted.
    pub fn value(&self, code: &str) -> Option<&str> {
        if let Some((head, rest)) = self.body.split_once(' ') {
            if head.starts_with(code) && !rest.is_empty() {
                return Some(rest.trim());
            }
        }
        match self.body.strip_prefix(code) {
            Some(rest) if !rest.is_empty() => Some(rest.trim()),
            _ => None,
        }
    }
}

/// Parse and verify one received line. Trailing CR/LF is tolerated.
pub fn decode(line: &[u8]) -> Result<Response, FrameError> {
    let mut line = line;
    while let [rest @ .., last] = line {
        if *last == b'\n' || *last == b'\r' {
            line = rest;
        } else {
            break;
        }
    }

    let Some((&first, content)) = line.split_first() else {
        return Err(FrameError::MissingStart);
    };
    if first != START {
        return Err(FrameError::MissingStart);
    }
    if content.len() < 3 {
        return Err(FrameError::MissingChecksum);
    }

    // Checksum field is everything after the last space, or the final two
    // bytes when the device omits the separator.
    let (body, field) = match content.iter().rposition(|&b| b == b' ') {
        Some(pos) => (&content[..pos], &content[pos + 1..]),
        None => content.split_at(content.len() - 2),
    };
    if field.len() != 2 {
        return Err(FrameError::BadChecksumField);
    }
    let hi = hex_digit(field[0]).ok_or(FrameError::BadChecksumField)?;
    let lo = hex_digit(field[1]).ok_or(FrameError::BadChecksumField)?;
    let received = (hi << 4) | lo;

    let body = core::str::from_utf8(body).map_err(|_| FrameError::Encoding)?;
    if !body.is_ascii() {
        return Err(FrameError::Encoding);
    }
    if checksum(body) != received {
        return Err(FrameError::Checksum);
    }

    let mut owned = String::new();
    owned
        .push_str(body.trim())
        .map_err(|_| FrameError::Overflow)?;
    Ok(Response { body: owned })
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}
