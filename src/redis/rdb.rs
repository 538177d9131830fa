use std::path::Path;

use bytes::Bytes;

use super::keyspace::{Keyspace, Value};

/// A minimal, valid empty RDB file, used verbatim as the snapshot payload
/// a `PSYNC` reply carries when this core has no persistence of its own to
/// offer a fresh replica.
const EMPTY_SNAPSHOT_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a72656469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d62617365c000fff06e3bfec0ff5aa2";

pub fn empty_snapshot() -> Bytes {
    let bytes: Vec<u8> = (0..EMPTY_SNAPSHOT_HEX.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&EMPTY_SNAPSHOT_HEX[i..i + 2], 16).expect("EMPTY_SNAPSHOT_HEX is valid hex"))
        .collect();
    Bytes::from(bytes)
}

/// Loads the RDB file at `path` into `keyspace`, if present. A missing file
/// or any parse failure is logged and treated as "start empty" rather than
/// a fatal startup error.
pub async fn load_rdb_file(path: &Path, keyspace: &Keyspace) -> anyhow::Result<()> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::info!("no RDB snapshot found at {}; starting with an empty keyspace", path.display());
            return Ok(());
        }
        Err(err) => {
            log::warn!("failed to read RDB snapshot at {}: {err}; starting with an empty keyspace", path.display());
            return Ok(());
        }
    };

    if let Err(err) = load_rdb_bytes(&bytes, keyspace).await {
        log::warn!("RDB snapshot at {} failed to load: {err}; starting with an empty keyspace", path.display());
    }

    Ok(())
}

/// Parses a complete in-memory RDB image and loads every key it contains
/// into `keyspace`. Used both for the on-disk snapshot and for the bulk
/// payload a replica receives over `PSYNC`.
pub async fn load_rdb_bytes(bytes: &[u8], keyspace: &Keyspace) -> anyhow::Result<()> {
    let mut cursor = Cursor::new(bytes);
    cursor.expect_header()?;

    loop {
        match cursor.read_u8()? {
            0xFA => {
                cursor.read_string()?;
                cursor.read_string()?;
            }
            0xFE => {
                cursor.read_size()?;
            }
            0xFB => {
                cursor.read_size()?;
                cursor.read_size()?;
            }
            0xFC => {
                let expiry_ms = cursor.read_u64_le()?;
                let value_type = cursor.read_u8()?;
                anyhow::ensure!(value_type == 0x00, "unsupported RDB value type {value_type:#x}");
                let key = cursor.read_string()?;
                let value = cursor.read_string()?;
                keyspace.load(key, Value::with_expiry(value, expiry_ms)).await;
            }
            0xFD => {
                let expiry_secs = cursor.read_u32_le()?;
                let value_type = cursor.read_u8()?;
                anyhow::ensure!(value_type == 0x00, "unsupported RDB value type {value_type:#x}");
                let key = cursor.read_string()?;
                let value = cursor.read_string()?;
                keyspace.load(key, Value::with_expiry(value, expiry_secs as u64 * 1000)).await;
            }
            0x00 => {
                let key = cursor.read_string()?;
                let value = cursor.read_string()?;
                keyspace.load(key, Value::new(value)).await;
            }
            0xFF => break,
            other => anyhow::bail!("unknown RDB opcode {other:#x}"),
        }
    }

    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn expect_header(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(self.buf.len() >= 9, "RDB file is too short to contain a header");
        anyhow::ensure!(&self.buf[0..5] == b"REDIS", "RDB file is missing the 'REDIS' magic");
        let version = std::str::from_utf8(&self.buf[5..9]).unwrap_or("????");
        log::info!("loading RDB snapshot, version {version}");
        self.pos = 9;
        Ok(())
    }

    fn read_u8(&mut self) -> anyhow::Result<u8> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| anyhow::anyhow!("unexpected end of RDB stream"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn peek_u8(&self) -> anyhow::Result<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unexpected end of RDB stream"))
    }

    fn read_bytes(&mut self, len: usize) -> anyhow::Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| anyhow::anyhow!("RDB length overflow"))?;
        anyhow::ensure!(end <= self.buf.len(), "unexpected end of RDB stream");
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16_le(&mut self) -> anyhow::Result<u16> {
        Ok(u16::from_le_bytes(self.read_bytes(2)?.try_into().unwrap()))
    }

    fn read_u32_le(&mut self) -> anyhow::Result<u32> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u64_le(&mut self) -> anyhow::Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    /// Reads a length using the 2-bit tag scheme: 00 -> 6-bit length, 01 ->
    /// 14-bit length, 10 -> 4-byte big-endian length. The 11 tag marks a
    /// special (non-length) string encoding and is handled by `read_string`.
    fn read_size(&mut self) -> anyhow::Result<u32> {
        let first = self.read_u8()?;
        match first & 0b1100_0000 {
            0b0000_0000 => Ok((first & 0b0011_1111) as u32),
            0b0100_0000 => {
                let low = (first & 0b0011_1111) as u32;
                let next = self.read_u8()? as u32;
                Ok((low << 8) | next)
            }
            0b1000_0000 => Ok(u32::from_be_bytes(self.read_bytes(4)?.try_into().unwrap())),
            _ => anyhow::bail!("read_size called on a specially-encoded byte"),
        }
    }

    fn read_string(&mut self) -> anyhow::Result<Bytes> {
        let first = self.peek_u8()?;
        if first & 0b1100_0000 == 0b1100_0000 {
            self.pos += 1;
            let subtype = first & 0b0011_1111;
            let value: u64 = match subtype {
                0 => self.read_u8()? as u64,
                1 => self.read_u16_le()? as u64,
                2 => self.read_u32_le()? as u64,
                other => anyhow::bail!("unsupported RDB special string encoding {other}"),
            };
            Ok(Bytes::from(value.to_string()))
        } else {
            let len = self.read_size()? as usize;
            Ok(Bytes::copy_from_slice(self.read_bytes(len)?))
        }
    }
}
