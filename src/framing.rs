use crate::errors::ConfigError;

use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::str::FromStr;

/// Largest frame accepted by [`FrameReader`] in length-prefixed mode.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// How server-to-client messages are delimited on the stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Framing {
    /// Each message is terminated by `\n`. Embedded CR/LF bytes are
    /// replaced by spaces, which is lossless for JSON payloads.
    #[default]
    Newline,
    /// Each message is preceded by its length as a big-endian `u32`.
    LengthPrefixed,
    /// Messages are written back to back with no delimiter.
    Raw,
}

impl FromStr for Framing {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "newline" | "line" => Ok(Framing::Newline),
            "length" | "length-prefixed" => Ok(Framing::LengthPrefixed),
            "raw" => Ok(Framing::Raw),
            other => Err(ConfigError::Invalid {
                key: "framing".into(),
                value: other.into(),
            }),
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Framing::Newline => "newline",
            Framing::LengthPrefixed => "length",
            Framing::Raw => "raw",
        };
        f.write_str(name)
    }
}

/// Wraps `payload` into a single frame.
pub fn encode_frame(framing: Framing, payload: &[u8]) -> Vec<u8> {
    match framing {
        Framing::Newline => {
            let body = trim_trailing_newlines(payload);
            let mut frame = Vec::with_capacity(body.len() + 1);
            frame.extend(body.iter().map(|&b| match b {
                b'\n' | b'\r' => b' ',
                other => other,
            }));
            frame.push(b'\n');
            frame
        }
        Framing::LengthPrefixed => {
            let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
            let body = &payload[..len as usize];
            let mut frame = Vec::with_capacity(body.len() + 4);
            frame.extend_from_slice(&len.to_be_bytes());
            frame.extend_from_slice(body);
            frame
        }
        Framing::Raw => payload.to_vec(),
    }
}

fn trim_trailing_newlines(payload: &[u8]) -> &[u8] {
    let end = payload
        .iter()
        .rposition(|&b| b != b'\n' && b != b'\r')
        .map_or(0, |i| i + 1);
    &payload[..end]
}

/// Reads frames written with [`encode_frame`] from a byte stream.
///
/// In [`Framing::Raw`] mode there are no boundaries, so each call returns
/// whatever bytes are currently available.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    framing: Framing,
}

impl<R: Read> FrameReader<R> {
    /// Creates a reader decoding `framing` from `inner`.
    pub fn new(inner: R, framing: Framing) -> Self {
        Self {
            reader: BufReader::new(inner),
            framing,
        }
    }

    /// Reads the next frame; `Ok(None)` on a clean end of stream.
    pub fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.framing {
            Framing::Newline => {
                let mut frame = Vec::new();
                let n = self.reader.read_until(b'\n', &mut frame)?;
                if n == 0 {
                    return Ok(None);
                }
                if frame.last() == Some(&b'\n') {
                    frame.pop();
                }
                Ok(Some(frame))
            }
            Framing::LengthPrefixed => {
                let mut len_buf = [0u8; 4];
                match self.reader.read_exact(&mut len_buf) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                    Err(e) => return Err(e),
                }
                let len = u32::from_be_bytes(len_buf) as usize;
                if len > MAX_FRAME_LEN {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("frame of {} bytes exceeds limit", len),
                    ));
                }
                let mut frame = vec![0u8; len];
                self.reader.read_exact(&mut frame)?;
                Ok(Some(frame))
            }
            Framing::Raw => {
                let available = self.reader.fill_buf()?;
                if available.is_empty() {
                    return Ok(None);
                }
                let frame = available.to_vec();
                self.reader.consume(frame.len());
                Ok(Some(frame))
            }
        }
    }
}
