use bytes::Bytes;

use super::encode_args;

/// A parsed request: the raw argument vector exactly as it arrived on the
/// wire. The dispatcher matches on `name_upper()`; propagation re-encodes
/// `args` verbatim rather than reconstructing a command from scratch.
#[derive(Debug, Clone)]
pub struct Request {
    pub args: Vec<Bytes>,
}

impl Request {
    pub fn new(args: Vec<Bytes>) -> anyhow::Result<Self> {
        anyhow::ensure!(!args.is_empty(), "request must be a non-empty argument vector");
        Ok(Self { args })
    }

    pub fn name_upper(&self) -> Vec<u8> {
        self.args[0].to_ascii_uppercase()
    }

    pub fn arg(&self, index: usize) -> Option<&Bytes> {
        self.args.get(index)
    }

    pub fn encode(&self) -> Bytes {
        encode_args(&self.args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_upper_is_case_insensitive() {
        let req = Request::new(vec![Bytes::from_static(b"get"), Bytes::from_static(b"foo")]).unwrap();
        assert_eq!(req.name_upper(), b"GET");
    }

    #[test]
    fn rejects_empty_request() {
        assert!(Request::new(vec![]).is_err());
    }

    #[test]
    fn encode_round_trips_original_args() {
        let req = Request::new(vec![Bytes::from_static(b"SET"), Bytes::from_static(b"foo"), Bytes::from_static(b"bar")]).unwrap();
        assert_eq!(req.encode(), &b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"[..]);
    }
}
