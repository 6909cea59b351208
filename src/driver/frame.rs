//! Parser for the container engine's multiplexed exec stream format.
//!
//! Each frame is an 8-byte header followed by its payload: byte 0 is the
//! stream tag (1 = stdout, 2 = stderr), bytes 4..8 are a big-endian u32
//! payload length. A short or truncated frame ends parsing without error,
//! since it means the stream was cut off mid-frame rather than malformed.

const HEADER_LEN: usize = 8;
const TAG_STDOUT: u8 = 1;
const TAG_STDERR: u8 = 2;

/// Stdout/stderr bytes recovered from a multiplexed stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DemuxedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Walks `data` frame by frame, appending each payload to the stream its
/// tag names. Unknown tags are skipped (their payload bytes are consumed
/// but dropped) so that a single unrecognized frame doesn't desync the
/// rest of the stream.
pub fn parse_frames(data: &[u8]) -> DemuxedOutput {
    let mut out = DemuxedOutput::default();
    let mut offset = 0;

    while offset + HEADER_LEN <= data.len() {
        let header = &data[offset..offset + HEADER_LEN];
        let tag = header[0];
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let payload_start = offset + HEADER_LEN;
        let payload_end = payload_start + len;

        if payload_end > data.len() {
            break;
        }

        let payload = &data[payload_start..payload_end];
        match tag {
            TAG_STDOUT => out.stdout.extend_from_slice(payload),
            TAG_STDERR => out.stderr.extend_from_slice(payload),
            _ => {}
        }

        offset = payload_end;
    }

    out
}

fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(tag);
    buf.extend_from_slice(&[0, 0, 0]);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demultiplexes_two_frames() {
        let mut data = frame(TAG_STDOUT, b"hello\n");
        data.extend(frame(TAG_STDERR, b"warn\n"));

        let out = parse_frames(&data);
        assert_eq!(out.stdout, b"hello\n");
        assert_eq!(out.stderr, b"warn\n");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let out = parse_frames(&[]);
        assert!(out.stdout.is_empty());
        assert!(out.stderr.is_empty());
    }

    #[test]
    fn truncated_header_stops_without_error() {
        let data = [1u8, 0, 0, 0, 0]; // only 5 of 8 header bytes
        let out = parse_frames(&data);
        assert!(out.stdout.is_empty());
        assert!(out.stderr.is_empty());
    }

    #[test]
    fn truncated_payload_stops_without_error() {
        let mut data = frame(TAG_STDOUT, b"hello");
        data.truncate(data.len() - 2); // cut the payload short
        let out = parse_frames(&data);
        assert!(out.stdout.is_empty());
    }

    #[test]
    fn unknown_tag_is_skipped_but_stream_continues() {
        let mut data = frame(9, b"garbage");
        data.extend(frame(TAG_STDOUT, b"ok\n"));
        let out = parse_frames(&data);
        assert_eq!(out.stdout, b"ok\n");
        assert!(out.stderr.is_empty());
    }

    #[test]
    fn interleaved_frames_accumulate_in_order() {
        let mut data = frame(TAG_STDOUT, b"a");
        data.extend(frame(TAG_STDOUT, b"b"));
        data.extend(frame(TAG_STDERR, b"x"));
        data.extend(frame(TAG_STDOUT, b"c"));
        let out = parse_frames(&data);
        assert_eq!(out.stdout, b"abc");
        assert_eq!(out.stderr, b"x");
    }
}
