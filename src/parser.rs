// Slice-based STOMP frame parser (produces owned frames from input slices)
use crate::frame::Frame;

/// Byte offsets of the sections of a frame head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sections {
    command_end: usize,
    headers_start: usize,
    headers_end: usize,
    body_start: usize,
}

/// Locate the command line, header block and start of body in `raw`.
///
/// Returns `None` while the head (command line, headers and the blank line
/// that terminates them) is not yet complete.
fn locate_sections(raw: &[u8]) -> Option<Sections> {
    let command_end = raw.iter().position(|&b| b == b'\n')?;
    let headers_start = command_end + 1;

    // A blank line right after the command: no headers at all.
    if raw.get(headers_start) == Some(&b'\n') {
        return Some(Sections {
            command_end,
            headers_start,
            headers_end: headers_start,
            body_start: headers_start + 1,
        });
    }

    let rel = raw[headers_start..].windows(2).position(|w| w == b"\n\n")?;
    let headers_end = headers_start + rel;
    Some(Sections {
        command_end,
        headers_start,
        headers_end,
        body_start: headers_end + 2,
    })
}

/// Parse a header block into ordered, de-duplicated key/value pairs.
///
/// Each line is split on its first colon and both sides are trimmed. A line
/// without a colon becomes a key with an empty value. When a key repeats the
/// later value wins, keeping the position of the first occurrence.
pub fn parse_headers(block: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in block.split('\n') {
        if line.trim().is_empty() {
            continue;
        }
        let (key, value) = match line.split_once(':') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (line.trim(), ""),
        };
        match headers.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => headers.push((key.to_string(), value.to_string())),
        }
    }
    headers
}

/// Parse one complete frame (terminating NUL already stripped).
///
/// Never fails: input that does not look like a frame yields a `Frame`
/// whose command falls outside the known vocabulary.
pub fn parse_frame(raw: &[u8]) -> Frame {
    let (command_bytes, header_bytes, body) = match locate_sections(raw) {
        Some(s) => (
            &raw[..s.command_end],
            &raw[s.headers_start..s.headers_end],
            &raw[s.body_start..],
        ),
        None => match raw.iter().position(|&b| b == b'\n') {
            Some(i) => (&raw[..i], &raw[i + 1..], &[][..]),
            None => (raw, &[][..], &[][..]),
        },
    };

    let mut command = String::from_utf8_lossy(command_bytes).into_owned();
    if command.ends_with('\r') {
        command.pop();
    }

    let headers = parse_headers(&String::from_utf8_lossy(header_bytes));
    let bytes_message = headers.iter().any(|(k, _)| k == "content-length");

    Frame {
        command,
        headers,
        body: body.to_vec(),
        bytes_message,
    }
}

/// Extract a usable `content-length` value from parsed headers.
fn content_length(headers: &[(String, String)]) -> Option<usize> {
    headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
}

/// Parse a single STOMP frame from the front of a raw byte slice.
///
/// Leading LF bytes must already have been skipped by the caller.
///
/// Returns `Some((frame, consumed_bytes))` when a full frame is available,
/// where `consumed_bytes` covers the terminating NUL and an optional LF
/// right after it. Returns `None` when more bytes are required.
///
/// A `content-length` body may contain NUL bytes, but only while no NUL has
/// been buffered yet or the whole declared body is already in `input`. Once
/// a NUL is buffered and the declared body reaches past the buffer, or would
/// swallow the head of the next frame, NUL framing applies.
pub fn parse_frame_slice(input: &[u8]) -> Option<(Frame, usize)> {
    let nul = input.iter().position(|&b| b == 0);

    if let Some(s) = locate_sections(input).filter(|s| nul.is_none_or(|n| s.body_start <= n)) {
        let head = parse_headers(&String::from_utf8_lossy(
            &input[s.headers_start..s.headers_end],
        ));
        if let Some(len) = content_length(&head) {
            match length_framed_end(input, s.body_start, len, nul) {
                LengthFraming::Complete(end) => {
                    return Some((parse_frame(&input[..end]), consumed_after(input, end)));
                }
                LengthFraming::Incomplete => return None,
                LengthFraming::Rejected => {
                    tracing::warn!(
                        content_length = len,
                        "content-length does not end on a frame boundary, falling back to NUL framing"
                    );
                }
            }
        }
    }

    let nul = nul?;
    Some((parse_frame(&input[..nul]), consumed_after(input, nul)))
}

/// Outcome of applying a declared `content-length` to the buffered input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LengthFraming {
    /// The body ends on the NUL at this offset.
    Complete(usize),
    /// No NUL is buffered yet and the declared body is not complete.
    Incomplete,
    Rejected,
}

fn length_framed_end(input: &[u8], body_start: usize, len: usize, nul: Option<usize>) -> LengthFraming {
    let Some(end) = body_start.checked_add(len) else {
        return LengthFraming::Rejected;
    };
    let Some(first_nul) = nul else {
        return LengthFraming::Incomplete;
    };
    if input.get(end) != Some(&0) {
        return LengthFraming::Rejected;
    }
    // Every NUL inside the declared body must not be followed by a frame head.
    let starts_frame = input[first_nul..end]
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == 0)
        .any(|(i, _)| begins_frame(&input[first_nul + i + 1..]));
    if starts_frame {
        LengthFraming::Rejected
    } else {
        LengthFraming::Complete(end)
    }
}

/// True when `rest`, after optional LFs, opens with a known command line.
fn begins_frame(rest: &[u8]) -> bool {
    let skip = rest.iter().take_while(|&&b| b == b'\n').count();
    let rest = &rest[skip..];
    let Some(eol) = rest.iter().position(|&b| b == b'\n') else {
        return false;
    };
    let line = rest[..eol].strip_suffix(b"\r").unwrap_or(&rest[..eol]);
    std::str::from_utf8(line).is_ok_and(crate::frame::commands::is_known)
}

/// Bytes consumed by a frame whose NUL terminator sits at `nul`.
fn consumed_after(input: &[u8], nul: usize) -> usize {
    let mut pos = nul + 1;
    if input.get(pos) == Some(&b'\n') {
        pos += 1;
    }
    pos
}
