//! JPEG comment (COM) segment injection.
//!
//! The stream is rewritten marker by marker without decoding any image data:
//! existing COM segments are dropped, a single new one is placed right before
//! the first frame header, and everything else is copied as-is up to and
//! including EOI.

use thiserror::Error;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const COM: u8 = 0xFE;
const TEM: u8 = 0x01;

const DHT: u8 = 0xC4;
const JPG: u8 = 0xC8;
const DAC: u8 = 0xCC;

/// Largest COM payload: the 16-bit length field also counts itself.
pub const MAX_COMMENT_LEN: usize = u16::MAX as usize - 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JpegError {
    #[error("missing SOI marker")]
    MissingSoi,

    #[error("truncated segment at offset {offset}")]
    Truncated { offset: usize },

    #[error("expected marker at offset {offset}, found byte {found:#04x}")]
    InvalidMarker { offset: usize, found: u8 },

    #[error("missing EOI marker")]
    MissingEoi,

    #[error("no frame header before scan data")]
    NoFrameHeader,

    #[error("comment of {len} bytes exceeds the {MAX_COMMENT_LEN} byte segment limit")]
    PayloadTooLarge { len: usize },
}

fn is_frame_header(marker: u8) -> bool {
    (0xC0..=0xCF).contains(&marker) && !matches!(marker, DHT | JPG | DAC)
}

fn is_standalone(marker: u8) -> bool {
    matches!(marker, TEM | SOI | EOI | 0xD0..=0xD7)
}

/// One marker segment. For SOS, `raw` also spans the entropy-coded data that
/// follows the header.
#[derive(Debug, Clone, Copy)]
struct Segment<'a> {
    marker: u8,
    raw: &'a [u8],
    payload: &'a [u8],
}

/// Walks the marker segments after SOI, ending with EOI.
struct Segments<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Segments<'a> {
    fn new(data: &'a [u8]) -> Result<Self, JpegError> {
        if data.len() < 2 || data[0] != 0xFF || data[1] != SOI {
            return Err(JpegError::MissingSoi);
        }
        Ok(Self {
            data,
            pos: 2,
            done: false,
        })
    }

    fn next_segment(&mut self) -> Result<Option<Segment<'a>>, JpegError> {
        let data = self.data;

        if self.pos >= data.len() {
            return Err(JpegError::MissingEoi);
        }
        if data[self.pos] != 0xFF {
            return Err(JpegError::InvalidMarker {
                offset: self.pos,
                found: data[self.pos],
            });
        }

        // fill bytes: any run of 0xFF before the marker code
        let mut code_at = self.pos + 1;
        while code_at < data.len() && data[code_at] == 0xFF {
            code_at += 1;
        }
        let Some(&marker) = data.get(code_at) else {
            return Err(JpegError::MissingEoi);
        };
        let start = code_at - 1;

        if is_standalone(marker) {
            self.pos = code_at + 1;
            if marker == EOI {
                self.done = true;
            }
            return Ok(Some(Segment {
                marker,
                raw: &data[start..self.pos],
                payload: &[],
            }));
        }

        let header = data
            .get(code_at + 1..code_at + 3)
            .ok_or(JpegError::Truncated { offset: start })?;
        let len = u16::from_be_bytes([header[0], header[1]]) as usize;
        let end = code_at + 1 + len;
        if len < 2 || end > data.len() {
            return Err(JpegError::Truncated { offset: start });
        }
        let payload = &data[code_at + 3..end];

        let end = if marker == SOS {
            self.scan_entropy(end)?
        } else {
            end
        };
        self.pos = end;

        Ok(Some(Segment {
            marker,
            raw: &data[start..end],
            payload,
        }))
    }

    /// Offset of the first marker after entropy-coded data starting at `from`.
    /// Stuffed zeros and restart markers belong to the scan.
    fn scan_entropy(&self, from: usize) -> Result<usize, JpegError> {
        let data = self.data;
        let mut i = from;
        while i + 1 < data.len() {
            if data[i] != 0xFF {
                i += 1;
                continue;
            }
            match data[i + 1] {
                0x00 | 0xD0..=0xD7 => i += 2,
                0xFF => i += 1,
                _ => return Ok(i),
            }
        }
        Err(JpegError::MissingEoi)
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Result<Segment<'a>, JpegError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.next_segment().transpose();
        if matches!(next, Some(Err(_))) {
            self.done = true;
        }
        next
    }
}

fn comment_segment(comment: &[u8]) -> Vec<u8> {
    let len = (comment.len() + 2) as u16;
    let mut segment = Vec::with_capacity(comment.len() + 4);
    segment.extend_from_slice(&[0xFF, COM]);
    segment.extend_from_slice(&len.to_be_bytes());
    segment.extend_from_slice(comment);
    segment
}

/// Returns a copy of `input` carrying `comment` as its only COM segment.
///
/// The new segment sits immediately before the first SOFn marker. Bytes
/// after EOI are not copied.
///
/// A stream that reaches SOS or EOI before any frame header fails with
/// [`JpegError::NoFrameHeader`]. This includes tables-only streams (SOI,
/// DQT/DHT, EOI), which are well formed but have nowhere to hold the comment;
/// they are rejected instead of being passed through without one.
pub fn add_comment(input: &[u8], comment: &[u8]) -> Result<Vec<u8>, JpegError> {
    if comment.len() > MAX_COMMENT_LEN {
        return Err(JpegError::PayloadTooLarge { len: comment.len() });
    }

    let segments = Segments::new(input)?;
    let mut output = Vec::with_capacity(input.len() + comment.len() + 4);
    output.extend_from_slice(&[0xFF, SOI]);

    let mut injected = false;
    for segment in segments {
        let segment = segment?;
        match segment.marker {
            COM => continue,
            SOS | EOI if !injected => return Err(JpegError::NoFrameHeader),
            marker if is_frame_header(marker) && !injected => {
                output.extend_from_slice(&comment_segment(comment));
                injected = true;
            }
            _ => {}
        }
        output.extend_from_slice(segment.raw);
    }

    Ok(output)
}

/// Payloads of every COM segment in stream order.
pub fn comments(input: &[u8]) -> Result<Vec<Vec<u8>>, JpegError> {
    let mut found = Vec::new();
    for segment in Segments::new(input)? {
        let segment = segment?;
        if segment.marker == COM {
            found.push(segment.payload.to_vec());
        }
    }
    Ok(found)
}
