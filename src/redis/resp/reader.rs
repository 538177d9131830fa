use anyhow::{bail, ensure, Context};
use bytes::{Bytes, BytesMut};

use super::RespValue;

/// Accumulates bytes read off a socket and peels complete RESP frames off
/// the front as they become available, leaving any trailing partial frame
/// in the buffer for the next read.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Decodes the next complete RESP value, if the buffer holds one.
    pub fn next_value(&mut self) -> anyhow::Result<Option<RespValue>> {
        match decode_value(&self.buf)? {
            Some((value, consumed)) => {
                self.buf.split_to(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Decodes the next complete request frame: a RESP array of bulk
    /// strings. Any other well-formed RESP value (or a non-RESP byte) at
    /// the front of the buffer is a framing violation.
    pub fn next_request(&mut self) -> anyhow::Result<Option<Vec<Bytes>>> {
        let Some(value) = self.next_value()? else {
            return Ok(None);
        };

        match value {
            RespValue::Array(items) => {
                let mut args = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        RespValue::BulkString(bytes) => args.push(bytes),
                        other => bail!("request arrays must contain only bulk strings, found {other:?}"),
                    }
                }
                Ok(Some(args))
            }
            other => bail!("request frames must be RESP arrays, found {other:?}"),
        }
    }

    /// Decodes the snapshot-bulk framing used for the RDB payload that
    /// follows a `+FULLRESYNC` reply: `$<len>\r\n` followed by exactly
    /// `<len>` raw bytes, with no trailing CRLF.
    pub fn next_snapshot(&mut self) -> anyhow::Result<Option<Bytes>> {
        match decode_snapshot(&self.buf)? {
            Some((bytes, consumed)) => {
                self.buf.split_to(consumed);
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }
}

fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    buf[start..].windows(2).position(|w| w == b"\r\n").map(|p| start + p)
}

fn decode_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    find_crlf(buf, start).map(|end| (&buf[start..end], end + 2))
}

fn decode_length(buf: &[u8], start: usize) -> anyhow::Result<Option<(i64, usize)>> {
    match decode_line(buf, start) {
        Some((digits, pos)) => {
            let text = std::str::from_utf8(digits).context("RESP length is not valid UTF-8")?;
            let n: i64 = text.parse().with_context(|| format!("RESP length '{text}' is not a valid integer"))?;
            Ok(Some((n, pos)))
        }
        None => Ok(None),
    }
}

fn decode_value(buf: &[u8]) -> anyhow::Result<Option<(RespValue, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    match buf[0] {
        b'+' => Ok(decode_line(buf, 1).map(|(line, pos)| (RespValue::SimpleString(Bytes::copy_from_slice(line)), pos))),
        b'-' => Ok(decode_line(buf, 1).map(|(line, pos)| (RespValue::SimpleError(Bytes::copy_from_slice(line)), pos))),
        b'$' => decode_bulk_string(buf),
        b'*' => decode_array(buf),
        other => bail!("unexpected RESP type tag '{}'", other as char),
    }
}

fn decode_bulk_string(buf: &[u8]) -> anyhow::Result<Option<(RespValue, usize)>> {
    let Some((len, pos)) = decode_length(buf, 1)? else {
        return Ok(None);
    };
    ensure!(len >= -1, "bulk string length must be >= -1, got {len}");

    if len == -1 {
        return Ok(Some((RespValue::NullBulkString, pos)));
    }

    let len = len as usize;
    let end = pos + len;
    if buf.len() < end + 2 {
        return Ok(None);
    }

    let data = Bytes::copy_from_slice(&buf[pos..end]);
    ensure!(&buf[end..end + 2] == b"\r\n", "bulk string is missing its trailing CRLF");
    Ok(Some((RespValue::BulkString(data), end + 2)))
}

fn decode_array(buf: &[u8]) -> anyhow::Result<Option<(RespValue, usize)>> {
    let Some((len, mut pos)) = decode_length(buf, 1)? else {
        return Ok(None);
    };
    ensure!(len >= 0, "array length must be non-negative, got {len}");

    let mut values = Vec::with_capacity(len as usize);
    for _ in 0..len {
        let Some((value, consumed)) = decode_value(&buf[pos..])? else {
            return Ok(None);
        };
        values.push(value);
        pos += consumed;
    }

    Ok(Some((RespValue::Array(values), pos)))
}

fn decode_snapshot(buf: &[u8]) -> anyhow::Result<Option<(Bytes, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    ensure!(buf[0] == b'$', "snapshot payload must start with '$'");

    let Some((len, pos)) = decode_length(buf, 1)? else {
        return Ok(None);
    };
    ensure!(len >= 0, "snapshot length must be non-negative, got {len}");

    let len = len as usize;
    if buf.len() < pos + len {
        return Ok(None);
    }

    Ok(Some((Bytes::copy_from_slice(&buf[pos..pos + len]), pos + len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_string() {
        let mut reader = FrameReader::new();
        reader.buffer_mut().extend_from_slice(b"+OK\r\n");
        assert_eq!(
            reader.next_value().unwrap(),
            Some(RespValue::SimpleString(Bytes::from_static(b"OK")))
        );
    }

    #[test]
    fn decodes_bulk_string() {
        let mut reader = FrameReader::new();
        reader.buffer_mut().extend_from_slice(b"$3\r\nfoo\r\n");
        assert_eq!(
            reader.next_value().unwrap(),
            Some(RespValue::BulkString(Bytes::from_static(b"foo")))
        );
    }

    #[test]
    fn decodes_null_bulk_string() {
        let mut reader = FrameReader::new();
        reader.buffer_mut().extend_from_slice(b"$-1\r\n");
        assert_eq!(reader.next_value().unwrap(), Some(RespValue::NullBulkString));
    }

    #[test]
    fn returns_none_on_partial_frame() {
        let mut reader = FrameReader::new();
        reader.buffer_mut().extend_from_slice(b"*2\r\n$3\r\nfoo");
        assert_eq!(reader.next_value().unwrap(), None);
    }

    #[test]
    fn decodes_request_array_of_bulk_strings() {
        let mut reader = FrameReader::new();
        reader
            .buffer_mut()
            .extend_from_slice(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
        let args = reader.next_request().unwrap().unwrap();
        assert_eq!(args, vec![Bytes::from_static(b"GET"), Bytes::from_static(b"foo")]);
    }

    #[test]
    fn rejects_non_array_request() {
        let mut reader = FrameReader::new();
        reader.buffer_mut().extend_from_slice(b"+OK\r\n");
        assert!(reader.next_request().is_err());
    }

    #[test]
    fn decodes_multiple_frames_back_to_back() {
        let mut reader = FrameReader::new();
        reader
            .buffer_mut()
            .extend_from_slice(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n");
        assert!(reader.next_request().unwrap().is_some());
        assert!(reader.next_request().unwrap().is_some());
        assert!(reader.next_request().unwrap().is_none());
    }

    #[test]
    fn decodes_snapshot_bulk_without_trailing_crlf() {
        let mut reader = FrameReader::new();
        reader.buffer_mut().extend_from_slice(b"$5\r\nhelloREST");
        let snapshot = reader.next_snapshot().unwrap().unwrap();
        assert_eq!(snapshot, Bytes::from_static(b"hello"));
        assert_eq!(&reader.buffer_mut()[..], b"REST");
    }

    #[test]
    fn snapshot_waits_for_full_payload() {
        let mut reader = FrameReader::new();
        reader.buffer_mut().extend_from_slice(b"$5\r\nhel");
        assert_eq!(reader.next_snapshot().unwrap(), None);
    }
}
