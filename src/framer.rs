//! Line framing over an inbound byte buffer.
//!
//! Peels one complete line off the head of a [`ByteBuffer`] according to an
//! end-of-line policy. Framing never blocks: if no terminator is buffered yet
//! the buffer is left untouched and [`ReadLine::Incomplete`] is returned.
//!
//! ## EOL styles
//!
//! ```text
//! any          first run of CR/LF bytes, collapsed ("a\r\n\r\nb" -> "a", "b")
//! crlf         LF, optionally preceded by CR
//! crlf-strict  CR immediately followed by LF
//! lf           bare LF
//! ```

use crate::buffer::ByteBuffer;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// End-of-line policy used to find where a line ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EolStyle {
    /// Any run of CR and LF bytes.
    Any,
    /// LF, optionally preceded by CR.
    Crlf,
    /// Exactly CR followed by LF.
    CrlfStrict,
    /// Bare LF.
    #[default]
    Lf,
}

impl EolStyle {
    /// Locate the first terminator in `data`.
    ///
    /// Returns `(start_of_eol, end_of_eol)`: the line content is
    /// `data[..start_of_eol]` and `end_of_eol` bytes must be drained.
    pub fn find(self, data: &[u8]) -> Option<(usize, usize)> {
        match self {
            EolStyle::Any => {
                let start = data.iter().position(|&b| is_eol_byte(b))?;
                let end = data[start..]
                    .iter()
                    .position(|&b| !is_eol_byte(b))
                    .map_or(data.len(), |run| start + run);
                Some((start, end))
            }
            EolStyle::Crlf => {
                let lf = data.iter().position(|&b| b == LF)?;
                let start = if lf > 0 && data[lf - 1] == CR {
                    lf - 1
                } else {
                    lf
                };
                Some((start, lf + 1))
            }
            EolStyle::CrlfStrict => {
                // A trailing CR with nothing after it never matches
                let cr = data.windows(2).position(|w| w == [CR, LF])?;
                Some((cr, cr + 2))
            }
            EolStyle::Lf => {
                let lf = data.iter().position(|&b| b == LF)?;
                Some((lf, lf + 1))
            }
        }
    }
}

fn is_eol_byte(b: u8) -> bool {
    b == CR || b == LF
}

impl fmt::Display for EolStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EolStyle::Any => "any",
            EolStyle::Crlf => "crlf",
            EolStyle::CrlfStrict => "crlf-strict",
            EolStyle::Lf => "lf",
        })
    }
}

/// Unrecognised EOL style name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown eol style '{0}' (expected any, crlf, crlf-strict or lf)")]
pub struct UnknownEolStyle(pub String);

impl FromStr for EolStyle {
    type Err = UnknownEolStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(EolStyle::Any),
            "crlf" => Ok(EolStyle::Crlf),
            "crlf-strict" | "crlf_strict" => Ok(EolStyle::CrlfStrict),
            "lf" => Ok(EolStyle::Lf),
            _ => Err(UnknownEolStyle(s.to_string())),
        }
    }
}

/// A framed line, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    text: String,
    len: usize,
}

impl Line {
    /// Decoded text of the line.
    ///
    /// Stops at the first NUL byte, if any. Invalid UTF-8 is replaced.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Number of content bytes framed, excluding the terminator.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a line with no text.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Why a complete line was dropped instead of returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Could not allocate storage for the line content.
    #[error("out of memory materializing {len}-byte line")]
    OutOfMemory { len: usize },
    /// Line content is longer than the configured maximum.
    #[error("line of {len} bytes exceeds maximum of {max}")]
    LineTooLong { len: usize, max: usize },
}

/// Outcome of one framing attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadLine {
    /// A complete line was framed and drained.
    Line(Line),
    /// No terminator buffered yet; the buffer is unchanged.
    Incomplete,
    /// A complete line was drained but could not be returned.
    Discarded { drained: usize, error: FrameError },
}

/// Frame one line from the head of `buffer`.
pub fn read_line(buffer: &mut ByteBuffer, style: EolStyle) -> ReadLine {
    read_line_bounded(buffer, style, usize::MAX)
}

/// Frame one line, discarding any whose content exceeds `max_len` bytes.
pub fn read_line_bounded(buffer: &mut ByteBuffer, style: EolStyle, max_len: usize) -> ReadLine {
    let Some((start_of_eol, end_of_eol)) = style.find(buffer.peek()) else {
        return ReadLine::Incomplete;
    };

    let result = if start_of_eol > max_len {
        Err(FrameError::LineTooLong {
            len: start_of_eol,
            max: max_len,
        })
    } else {
        materialize(&buffer.peek()[..start_of_eol])
    };

    // Terminator is consumed even when the line is dropped
    buffer.drain(end_of_eol);

    match result {
        Ok(text) => ReadLine::Line(Line {
            text,
            len: start_of_eol,
        }),
        Err(error) => ReadLine::Discarded {
            drained: end_of_eol,
            error,
        },
    }
}

/// Copy line content into an owned string.
fn materialize(content: &[u8]) -> Result<String, FrameError> {
    let content = match content.iter().position(|&b| b == 0) {
        Some(nul) => &content[..nul],
        None => content,
    };

    let mut raw = Vec::new();
    raw.try_reserve_exact(content.len())
        .map_err(|_| FrameError::OutOfMemory { len: content.len() })?;
    raw.extend_from_slice(content);

    Ok(match String::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}
