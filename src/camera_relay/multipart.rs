//! Incremental `multipart/x-mixed-replace` frame extraction

use bytes::{Buf, Bytes, BytesMut};

pub const DEFAULT_BOUNDARY: &str = "frame";

/// Parts above this size are discarded
pub const MAX_PART_SIZE: usize = 4 * 1024 * 1024;

/// Header blocks above this size mean the stream is out of sync
const MAX_HEADER_SIZE: usize = 8 * 1024;

/// Boundary token from a Content-Type header, `frame` if absent
pub fn boundary_from_content_type(content_type: Option<&str>) -> String {
    content_type
        .into_iter()
        .flat_map(|ct| ct.split(';'))
        .filter_map(|param| {
            let (key, value) = param.trim().split_once('=')?;
            key.trim().eq_ignore_ascii_case("boundary").then_some(value)
        })
        .map(|value| {
            let value = value.trim().trim_matches('"');
            value.strip_prefix("--").unwrap_or(value).to_string()
        })
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string())
}

enum State {
    /// Looking for the next `--boundary`
    Seek,
    /// Reading part headers up to the blank line
    Headers,
    /// Reading a part body
    Body { length: Option<usize> },
}

pub struct MultipartParser {
    delimiter: Vec<u8>,
    /// CRLF followed by the delimiter; ends a body without Content-Length
    body_end: Vec<u8>,
    buf: BytesMut,
    state: State,
    /// Bytes of an unframed body already searched for `body_end`
    scanned: usize,
    max_part: usize,
    discarded: u64,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        let delimiter = format!("--{}", boundary).into_bytes();
        let mut body_end = b"\r\n".to_vec();
        body_end.extend_from_slice(&delimiter);
        Self {
            delimiter,
            body_end,
            buf: BytesMut::new(),
            state: State::Seek,
            scanned: 0,
            max_part: MAX_PART_SIZE,
            discarded: 0,
        }
    }

    pub fn with_max_part_size(mut self, max_part: usize) -> Self {
        self.max_part = max_part;
        self
    }

    /// Parts dropped for being oversized or malformed
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Feed one body chunk; returns every part it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.step() {
            if let Some(frame) = frame {
                frames.push(frame);
            }
        }
        frames
    }

    /// One state transition; `None` means more input is needed
    fn step(&mut self) -> Option<Option<Bytes>> {
        match self.state {
            State::Seek => {
                match find(&self.buf, &self.delimiter) {
                    Some(pos) => {
                        self.buf.advance(pos + self.delimiter.len());
                        self.state = State::Headers;
                        Some(None)
                    }
                    None => {
                        // Keep a tail that may hold the start of a delimiter
                        let keep = self.delimiter.len().saturating_sub(1);
                        if self.buf.len() > keep {
                            let drop = self.buf.len() - keep;
                            self.buf.advance(drop);
                        }
                        None
                    }
                }
            }
            State::Headers => {
                if self.buf.len() < 2 {
                    return None;
                }
                if self.buf.starts_with(b"--") {
                    // Closing delimiter
                    self.buf.advance(2);
                    self.state = State::Seek;
                    return Some(None);
                }
                match find_header_end(&self.buf) {
                    Some((end, skip)) => {
                        let length = content_length(&self.buf[..end]);
                        self.buf.advance(end + skip);
                        self.scanned = 0;
                        self.state = State::Body { length };
                        Some(None)
                    }
                    None if self.buf.len() > MAX_HEADER_SIZE => {
                        self.resync("oversized part headers");
                        Some(None)
                    }
                    None => None,
                }
            }
            State::Body { length: Some(length) } => {
                if length > self.max_part {
                    self.resync("part exceeds size limit");
                    return Some(None);
                }
                if self.buf.len() < length {
                    return None;
                }
                let frame = self.buf.split_to(length).freeze();
                self.state = State::Seek;
                Some(Some(frame))
            }
            State::Body { length: None } => match find_from(&self.buf, &self.body_end, self.scanned) {
                Some(pos) if pos > self.max_part => {
                    self.buf.advance(pos);
                    self.resync("part exceeds size limit");
                    Some(None)
                }
                Some(pos) => {
                    let frame = self.buf.split_to(pos).freeze();
                    self.state = State::Seek;
                    Some(Some(frame))
                }
                None if self.buf.len() > self.max_part + self.body_end.len() => {
                    let keep = self.body_end.len();
                    let drop = self.buf.len() - keep;
                    self.buf.advance(drop);
                    self.resync("part exceeds size limit");
                    Some(None)
                }
                None => {
                    // A delimiter may straddle the next chunk
                    self.scanned = self.buf.len().saturating_sub(self.body_end.len() - 1);
                    None
                }
            },
        }
    }

    fn resync(&mut self, reason: &str) {
        self.discarded += 1;
        self.state = State::Seek;
        tracing::warn!(reason = reason, buffered = self.buf.len(), "Multipart part discarded");
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    find_from(haystack, needle, 0)
}

/// Like `find`, skipping the first `start` bytes of the haystack
fn find_from(haystack: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < start + needle.len() {
        return None;
    }
    haystack[start..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| start + pos)
}

/// End of the header block and the length of its terminator
///
/// Headers begin right after the delimiter, so the first line break
/// belongs to the delimiter line.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = find(buf, b"\r\n\r\n").map(|p| (p, 4));
    let lf = find(buf, b"\n\n").map(|p| (p, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn content_length(headers: &[u8]) -> Option<usize> {
    String::from_utf8_lossy(headers).lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(boundary: &str, body: &[u8], with_length: bool) -> Vec<u8> {
        let mut out = format!("--{}\r\nContent-Type: image/jpeg\r\n", boundary).into_bytes();
        if with_length {
            out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type(Some("multipart/x-mixed-replace; boundary=abc")),
            "abc"
        );
        assert_eq!(
            boundary_from_content_type(Some("multipart/x-mixed-replace;boundary=\"--xyz\"")),
            "xyz"
        );
        assert_eq!(boundary_from_content_type(Some("multipart/x-mixed-replace")), "frame");
        assert_eq!(boundary_from_content_type(Some("multipart/x-mixed-replace; boundary=")), "frame");
        assert_eq!(boundary_from_content_type(None), "frame");
    }

    #[test]
    fn test_parts_with_content_length() {
        let mut stream = part("frame", b"\xff\xd8one\xff\xd9", true);
        stream.extend(part("frame", b"two", true));
        let mut parser = MultipartParser::new("frame");

        let frames = parser.push(&stream);
        assert_eq!(frames, vec![Bytes::from_static(b"\xff\xd8one\xff\xd9"), Bytes::from_static(b"two")]);
    }

    #[test]
    fn test_parts_without_content_length() {
        let mut stream = part("b", b"alpha", false);
        stream.extend(part("b", b"beta\r\n--not-it", false));
        stream.extend_from_slice(b"--b--\r\n");
        let mut parser = MultipartParser::new("b");

        let frames = parser.push(&stream);
        assert_eq!(frames, vec![Bytes::from_static(b"alpha"), Bytes::from_static(b"beta\r\n--not-it")]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut stream = b"preamble junk\r\n".to_vec();
        stream.extend(part("frame", b"first", true));
        stream.extend(part("frame", b"second", false));
        stream.extend(part("frame", b"third", true));
        let mut parser = MultipartParser::new("frame");

        let frames: Vec<Bytes> = stream.iter().flat_map(|b| parser.push(&[*b])).collect();
        assert_eq!(
            frames,
            vec![
                Bytes::from_static(b"first"),
                Bytes::from_static(b"second"),
                Bytes::from_static(b"third"),
            ]
        );
    }

    #[test]
    fn test_unframed_body_scan_resumes() {
        let mut parser = MultipartParser::new("frame");
        assert!(parser.push(b"--frame\r\n\r\n").is_empty());
        for _ in 0..100 {
            assert!(parser.push(&[7u8; 64]).is_empty());
        }
        // Only the possible delimiter prefix is searched again
        assert_eq!(parser.scanned, 6400 - (parser.body_end.len() - 1));

        let mut frames = parser.push(b"\r\n--fr");
        frames.extend(parser.push(b"ame\r\n\r\nx"));
        assert_eq!(frames, vec![Bytes::from(vec![7u8; 6400])]);
    }

    #[test]
    fn test_oversized_part_is_discarded() {
        let mut stream = part("frame", &[0u8; 64], true);
        stream.extend(part("frame", b"ok", true));
        let mut parser = MultipartParser::new("frame").with_max_part_size(16);

        let frames = parser.push(&stream);
        assert_eq!(frames, vec![Bytes::from_static(b"ok")]);
        assert_eq!(parser.discarded(), 1);
    }

    #[test]
    fn test_oversized_part_without_length_resyncs() {
        let mut parser = MultipartParser::new("frame").with_max_part_size(16);
        let mut frames = parser.push(b"--frame\r\n\r\n");
        frames.extend(parser.push(&[7u8; 100]));
        frames.extend(parser.push(&part("frame", b"next", false)));
        frames.extend(parser.push(b"--frame"));

        assert_eq!(frames, vec![Bytes::from_static(b"next")]);
        assert_eq!(parser.discarded(), 1);
    }
}
