//! Append-only, HMAC-chained 256-byte block log (C4).
//!
//! Every block is a [`ReasonBlock`]: `index`, `timestamp_ns`, `prev_hash`,
//! `hmac`, a NUL-terminated `event_type`, and a NUL-padded, pure-decimal
//! `payload`. The chain is tamper-evident: each HMAC covers the full
//! logical tuple including `prev_hash`, so altering any earlier block
//! breaks every HMAC after it.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{KolibriError, KolibriResult};

pub const BLOCK_SIZE: usize = 256;
const INDEX_LEN: usize = 8;
const TIMESTAMP_LEN: usize = 8;
const PREV_HASH_LEN: usize = 32;
const HMAC_LEN: usize = 32;
const EVENT_TYPE_LEN: usize = 16;
pub const PAYLOAD_LEN: usize =
    BLOCK_SIZE - INDEX_LEN - TIMESTAMP_LEN - PREV_HASH_LEN - HMAC_LEN - EVENT_TYPE_LEN;

const INDEX_OFF: usize = 0;
const TIMESTAMP_OFF: usize = INDEX_OFF + INDEX_LEN;
const PREV_HASH_OFF: usize = TIMESTAMP_OFF + TIMESTAMP_LEN;
const HMAC_OFF: usize = PREV_HASH_OFF + PREV_HASH_LEN;
const EVENT_TYPE_OFF: usize = HMAC_OFF + HMAC_LEN;
const PAYLOAD_OFF: usize = EVENT_TYPE_OFF + EVENT_TYPE_LEN;

/// Event emitted whenever [`crate::symbols::SymbolTable::encode`] allocates
/// a fresh codepoint.
pub const EVENT_SYMBOL_MAP: &str = "SYMBOL_MAP";
/// Event emitted by [`crate::core::KolibriCore::ingest_association`].
pub const EVENT_TEACH: &str = "TEACH";

type HmacSha256 = Hmac<Sha256>;

/// One 256-byte ledger record, bit-exact with the persisted file format.
#[derive(Debug, Clone)]
pub struct ReasonBlock {
    pub index: u64,
    pub timestamp_ns: u64,
    pub prev_hash: [u8; 32],
    pub hmac: [u8; 32],
    pub event_type: [u8; EVENT_TYPE_LEN],
    pub payload: [u8; PAYLOAD_LEN],
}

impl ReasonBlock {
    fn message_bytes(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(INDEX_LEN + TIMESTAMP_LEN + PREV_HASH_LEN + EVENT_TYPE_LEN + PAYLOAD_LEN);
        msg.extend_from_slice(&self.index.to_be_bytes());
        msg.extend_from_slice(&self.timestamp_ns.to_be_bytes());
        msg.extend_from_slice(&self.prev_hash);
        msg.extend_from_slice(&self.event_type);
        msg.extend_from_slice(&self.payload);
        msg
    }

    fn serialize(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[INDEX_OFF..TIMESTAMP_OFF].copy_from_slice(&self.index.to_be_bytes());
        buf[TIMESTAMP_OFF..PREV_HASH_OFF].copy_from_slice(&self.timestamp_ns.to_be_bytes());
        buf[PREV_HASH_OFF..HMAC_OFF].copy_from_slice(&self.prev_hash);
        buf[HMAC_OFF..EVENT_TYPE_OFF].copy_from_slice(&self.hmac);
        buf[EVENT_TYPE_OFF..PAYLOAD_OFF].copy_from_slice(&self.event_type);
        buf[PAYLOAD_OFF..].copy_from_slice(&self.payload);
        buf
    }

    fn parse(buf: &[u8; BLOCK_SIZE]) -> Self {
        let mut index_b = [0u8; 8];
        index_b.copy_from_slice(&buf[INDEX_OFF..TIMESTAMP_OFF]);
        let mut ts_b = [0u8; 8];
        ts_b.copy_from_slice(&buf[TIMESTAMP_OFF..PREV_HASH_OFF]);
        let mut prev_hash = [0u8; 32];
        prev_hash.copy_from_slice(&buf[PREV_HASH_OFF..HMAC_OFF]);
        let mut hmac = [0u8; 32];
        hmac.copy_from_slice(&buf[HMAC_OFF..EVENT_TYPE_OFF]);
        let mut event_type = [0u8; EVENT_TYPE_LEN];
        event_type.copy_from_slice(&buf[EVENT_TYPE_OFF..PAYLOAD_OFF]);
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&buf[PAYLOAD_OFF..]);
        ReasonBlock {
            index: u64::from_be_bytes(index_b),
            timestamp_ns: u64::from_be_bytes(ts_b),
            prev_hash,
            hmac,
            event_type,
            payload,
        }
    }

    /// Bytes up to (and not including) the first NUL, or the whole field if
    /// there is none.
    fn event_type_str(&self) -> KolibriResult<&str> {
        nul_terminated_str(&self.event_type, "event_type")
    }

    fn payload_str(&self) -> KolibriResult<&str> {
        nul_terminated_str(&self.payload, "payload")
    }
}

fn nul_terminated_str<'a>(field: &'a [u8], name: &str) -> KolibriResult<&'a str> {
    let end = field
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| KolibriError::Corrupted(format!("{name} is not NUL-terminated")))?;
    std::str::from_utf8(&field[..end])
        .map_err(|_| KolibriError::Corrupted(format!("{name} is not valid UTF-8")))
}

fn encode_field(s: &str, len: usize, name: &str) -> KolibriResult<Vec<u8>> {
    if s.len() + 1 > len {
        return Err(KolibriError::InvalidArgument(format!(
            "{name} ({} bytes) does not fit in {len} bytes with NUL terminator",
            s.len()
        )));
    }
    let mut out = vec![0u8; len];
    out[..s.len()].copy_from_slice(s.as_bytes());
    Ok(out)
}

fn validate_decimal_payload(payload: &str) -> KolibriResult<()> {
    if !payload.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KolibriError::InvalidArgument(
            "payload must be pure decimal digits".into(),
        ));
    }
    Ok(())
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub(crate) fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Lifecycle: `Closed` -> `open` -> `Open` -> `append`* -> `close` -> `Closed`.
/// A `Corrupted` detection during `open` transitions back to `Closed`.
pub struct GenomeContext {
    file: Option<File>,
    key: Vec<u8>,
    last_block: Option<ReasonBlock>,
    next_index: u64,
}

impl GenomeContext {
    /// Open (creating if missing) and replay/verify the whole chain.
    pub fn open<P: AsRef<Path>>(path: P, key: &[u8]) -> KolibriResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let (last_block, next_index) = walk_and_verify(&mut file, key)?;
        file.seek(SeekFrom::End(0))?;

        Ok(GenomeContext {
            file: Some(file),
            key: key.to_vec(),
            last_block,
            next_index,
        })
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Append a new block with the given event type and decimal payload.
    pub fn append(&mut self, event_type: &str, payload: &[u8]) -> KolibriResult<u64> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| KolibriError::InvalidArgument("genome is closed".into()))?;

        let payload_str = std::str::from_utf8(payload)
            .map_err(|_| KolibriError::InvalidArgument("payload must be valid UTF-8".into()))?;
        validate_decimal_payload(payload_str)?;

        let event_type_bytes = encode_field(event_type, EVENT_TYPE_LEN, "event_type")?;
        let payload_bytes = encode_field(payload_str, PAYLOAD_LEN, "payload")?;

        let prev_hash = match &self.last_block {
            Some(prev) => sha256(&prev.serialize()),
            None => [0u8; 32],
        };

        let mut event_type_arr = [0u8; EVENT_TYPE_LEN];
        event_type_arr.copy_from_slice(&event_type_bytes);
        let mut payload_arr = [0u8; PAYLOAD_LEN];
        payload_arr.copy_from_slice(&payload_bytes);

        let mut block = ReasonBlock {
            index: self.next_index,
            timestamp_ns: now_nanos(),
            prev_hash,
            hmac: [0u8; 32],
            event_type: event_type_arr,
            payload: payload_arr,
        };
        block.hmac = hmac_sha256(&self.key, &block.message_bytes());

        file.seek(SeekFrom::End(0))?;
        file.write_all(&block.serialize())?;
        file.flush()?;

        self.next_index += 1;
        let index = block.index;
        self.last_block = Some(block);
        Ok(index)
    }

    /// Scan the whole file from offset 0 collecting the payload of every
    /// block whose event type matches, restoring the file offset afterward.
    pub fn scan_event(&mut self, event_type: &str) -> KolibriResult<Vec<Vec<u8>>> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| KolibriError::InvalidArgument("genome is closed".into()))?;

        let restore_to = file.stream_position()?;
        file.seek(SeekFrom::Start(0))?;

        let mut out = Vec::new();
        let mut buf = [0u8; BLOCK_SIZE];
        loop {
            match read_exact_or_eof(file, &mut buf)? {
                false => break,
                true => {
                    let block = ReasonBlock::parse(&buf);
                    if let Ok(ty) = block.event_type_str() {
                        if ty == event_type {
                            if let Ok(payload) = block.payload_str() {
                                out.push(payload.as_bytes().to_vec());
                            }
                        }
                    }
                }
            }
        }

        file.seek(SeekFrom::Start(restore_to))?;
        Ok(out)
    }

    /// Stand-alone verification of a file on disk. `Ok(())` both for a
    /// fully valid file and for a file that does not exist yet.
    pub fn verify_file<P: AsRef<Path>>(path: P, key: &[u8]) -> KolibriResult<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }
        let mut file = File::open(path)?;
        walk_and_verify(&mut file, key)?;
        Ok(())
    }

    /// Flush, close, and zero the key material.
    pub fn close(mut self) {
        self.close_mut();
    }

    fn close_mut(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
        for b in self.key.iter_mut() {
            *b = 0;
        }
    }
}

impl Drop for GenomeContext {
    fn drop(&mut self) {
        self.close_mut();
    }
}

fn read_exact_or_eof(file: &mut File, buf: &mut [u8; BLOCK_SIZE]) -> KolibriResult<bool> {
    let mut filled = 0;
    while filled < BLOCK_SIZE {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(KolibriError::Corrupted(
                "trailing partial block at end of file".into(),
            ));
        }
        filled += n;
    }
    Ok(true)
}

/// Walk every block from offset 0, verifying index/prev_hash/hmac chaining.
/// Returns the last valid block (if any) and the next expected index.
fn walk_and_verify(file: &mut File, key: &[u8]) -> KolibriResult<(Option<ReasonBlock>, u64)> {
    file.seek(SeekFrom::Start(0))?;
    let mut expected_index = 0u64;
    let mut last: Option<ReasonBlock> = None;
    let mut buf = [0u8; BLOCK_SIZE];

    loop {
        if !read_exact_or_eof(file, &mut buf)? {
            break;
        }
        let block = ReasonBlock::parse(&buf);

        block.event_type_str()?;
        block.payload_str().and_then(|p| {
            validate_decimal_payload(p)?;
            Ok(())
        })?;

        if block.index != expected_index {
            return Err(KolibriError::Corrupted(format!(
                "expected index {expected_index}, found {}",
                block.index
            )));
        }

        let expected_prev_hash = match &last {
            Some(prev) => sha256(&prev.serialize()),
            None => [0u8; 32],
        };
        if block.prev_hash != expected_prev_hash {
            return Err(KolibriError::Corrupted(format!(
                "prev_hash mismatch at index {expected_index}"
            )));
        }

        let expected_hmac = hmac_sha256(key, &block.message_bytes());
        if !constant_time_eq(&block.hmac, &expected_hmac) {
            log::warn!("genome hmac mismatch at index {expected_index}, chain rejected");
            return Err(KolibriError::Corrupted(format!(
                "hmac mismatch at index {expected_index}"
            )));
        }

        expected_index += 1;
        last = Some(block);
    }

    Ok((last, expected_index))
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn key() -> Vec<u8> {
        b"k".repeat(16)
    }

    #[test]
    fn round_trip_open_append_close_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path();

        let mut genome = GenomeContext::open(path, &key()).unwrap();
        genome.append("BOOT", b"000").unwrap();
        genome.append("TEACH", b"123456789").unwrap();
        assert_eq!(genome.next_index(), 2);
        genome.close();

        let genome = GenomeContext::open(path, &key()).unwrap();
        assert_eq!(genome.next_index(), 2);
    }

    #[test]
    fn verify_file_ok_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.genome");
        assert!(GenomeContext::verify_file(&path, &key()).is_ok());
    }

    #[test]
    fn tampering_breaks_verification() {
        use std::io::Write as _;

        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();

        let mut genome = GenomeContext::open(&path, &key()).unwrap();
        genome.append("BOOT", b"000").unwrap();
        genome.append("TEACH", b"123456789").unwrap();
        genome.close();

        assert!(GenomeContext::verify_file(&path, &key()).is_ok());

        // Flip one byte inside the second block's payload region.
        let mut f = OpenOptions::new().write(true).open(&path).unwrap();
        f.seek(SeekFrom::Start(BLOCK_SIZE as u64 + PAYLOAD_OFF as u64)).unwrap();
        f.write_all(&[b'9' ^ 0xFF]).unwrap();
        drop(f);

        assert!(matches!(
            GenomeContext::verify_file(&path, &key()),
            Err(KolibriError::Corrupted(_))
        ));
    }

    #[test]
    fn wrong_key_fails_open() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path();

        let mut genome = GenomeContext::open(path, &key()).unwrap();
        genome.append("BOOT", b"000").unwrap();
        genome.close();

        assert!(GenomeContext::open(path, b"wrong-key-of-len16").is_err());
    }

    #[test]
    fn append_rejects_non_decimal_payload() {
        let tmp = NamedTempFile::new().unwrap();
        let mut genome = GenomeContext::open(tmp.path(), &key()).unwrap();
        assert!(genome.append("BOOT", b"12a4").is_err());
    }

    #[test]
    fn scan_event_restores_offset() {
        let tmp = NamedTempFile::new().unwrap();
        let mut genome = GenomeContext::open(tmp.path(), &key()).unwrap();
        genome.append(EVENT_SYMBOL_MAP, b"97000").unwrap();
        genome.append(EVENT_TEACH, b"1").unwrap();
        genome.append(EVENT_SYMBOL_MAP, b"98001").unwrap();

        let before = genome.next_index();
        let hits = genome.scan_event(EVENT_SYMBOL_MAP).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(genome.next_index(), before);

        // Appending still works after a scan (offset correctly restored).
        genome.append(EVENT_TEACH, b"2").unwrap();
        assert_eq!(genome.next_index(), before + 1);
    }
}
