pub mod command;
pub mod reader;

use bytes::{BufMut, Bytes, BytesMut};

/// A decoded RESP value. Only the subset this server's wire surface actually
/// produces or consumes is represented; integers and null arrays never
/// appear on this wire so they are not modeled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(Bytes),
    SimpleError(Bytes),
    BulkString(Bytes),
    NullBulkString,
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(value: impl Into<Bytes>) -> Self {
        Self::SimpleString(value.into())
    }

    pub fn simple_error(value: impl Into<Bytes>) -> Self {
        Self::SimpleError(value.into())
    }

    pub fn bulk_string(value: impl Into<Bytes>) -> Self {
        Self::BulkString(value.into())
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        Self::Array(values)
    }

    pub fn into_bulk_string(self) -> Option<Bytes> {
        match self {
            Self::BulkString(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.encode_into(&mut out);
        out.freeze()
    }

    fn encode_into(&self, out: &mut BytesMut) {
        match self {
            RespValue::SimpleString(bytes) => {
                out.put_u8(b'+');
                out.extend_from_slice(bytes);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::SimpleError(bytes) => {
                out.put_u8(b'-');
                out.extend_from_slice(bytes);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(bytes) => {
                out.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
                out.extend_from_slice(bytes);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::NullBulkString => out.extend_from_slice(b"$-1\r\n"),
            RespValue::Array(values) => {
                out.extend_from_slice(format!("*{}\r\n", values.len()).as_bytes());
                for value in values {
                    value.encode_into(out);
                }
            }
        }
    }
}

/// Encodes a raw argument vector as a RESP array of bulk strings, exactly as
/// a client request or a replicated command looks on the wire.
pub fn encode_args(args: &[Bytes]) -> Bytes {
    RespValue::Array(args.iter().cloned().map(RespValue::BulkString).collect()).encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_simple_string() {
        assert_eq!(RespValue::simple_string("OK").encode(), &b"+OK\r\n"[..]);
    }

    #[test]
    fn encodes_simple_error() {
        assert_eq!(
            RespValue::simple_error("ERR unknown command").encode(),
            &b"-ERR unknown command\r\n"[..]
        );
    }

    #[test]
    fn encodes_null_bulk_string() {
        assert_eq!(RespValue::NullBulkString.encode(), &b"$-1\r\n"[..]);
    }

    #[test]
    fn encodes_bulk_string() {
        assert_eq!(
            RespValue::bulk_string(Bytes::from_static(b"foo")).encode(),
            &b"$3\r\nfoo\r\n"[..]
        );
    }

    #[test]
    fn encodes_empty_array() {
        assert_eq!(RespValue::array(vec![]).encode(), &b"*0\r\n"[..]);
    }

    #[test]
    fn encodes_args_as_bulk_string_array() {
        let args = vec![Bytes::from_static(b"SET"), Bytes::from_static(b"foo")];
        assert_eq!(
            encode_args(&args),
            &b"*2\r\n$3\r\nSET\r\n$3\r\nfoo\r\n"[..]
        );
    }
}
