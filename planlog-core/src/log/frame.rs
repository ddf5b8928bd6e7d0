//! Length-prefixed framing and the log prologue
//!
//! `FRAME(x) = LEN(u32 LE) || JSON(x)`. The event file starts with
//! `MAGIC || VERSION(u32 LE)` followed by one frame holding the log options.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::{ErrorKind, Read, Write};

use super::record::LogOptions;
use crate::error::{PlanlogError, Result};

/// Magic bytes opening every event file
pub const MAGIC: &[u8; MAGIC_LEN] = b"ROBYLOG";

const MAGIC_LEN: usize = 7;

/// Format version written and accepted by this build
pub const FORMAT_VERSION: u32 = 5;

/// Size of `MAGIC || VERSION`
pub const PROLOGUE_SIZE: usize = MAGIC_LEN + 4;

/// Size of a frame length prefix
pub const LEN_PREFIX_SIZE: usize = 4;

/// Frames larger than this are treated as corruption
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Serialize `value` into a complete frame
pub fn encode_frame<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(value)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(PlanlogError::InvalidFormat(format!(
            "frame of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }
    let mut frame = Vec::with_capacity(LEN_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Write `value` as one frame, returning the number of bytes written
///
/// The frame is assembled first and written with a single `write_all`.
pub fn write_frame<W: Write, T: Serialize + ?Sized>(writer: &mut W, value: &T) -> Result<usize> {
    let frame = encode_frame(value)?;
    writer.write_all(&frame)?;
    Ok(frame.len())
}

/// Read one frame's payload bytes
pub fn read_raw_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut prefix = [0u8; LEN_PREFIX_SIZE];
    read_full(reader, &mut prefix)?;
    let len = frame_len(prefix)?;
    read_payload(reader, len)
}

/// Read and decode one frame
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let payload = read_raw_frame(reader)?;
    decode_payload(&payload)
}

/// Decode a frame payload
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload)
        .map_err(|e| PlanlogError::InvalidFormat(format!("undecodable frame payload: {}", e)))
}

/// Locate the first complete frame in `buf`
///
/// Returns the payload slice and the total number of bytes the frame
/// occupies, or `None` when `buf` does not yet hold a complete frame.
pub fn split_frame(buf: &[u8]) -> Result<Option<(&[u8], usize)>> {
    if buf.len() < LEN_PREFIX_SIZE {
        return Ok(None);
    }
    let mut prefix = [0u8; LEN_PREFIX_SIZE];
    prefix.copy_from_slice(&buf[..LEN_PREFIX_SIZE]);
    let len = frame_len(prefix)?;
    let total = LEN_PREFIX_SIZE + len;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some((&buf[LEN_PREFIX_SIZE..total], total)))
}

/// Write the prologue and the options frame
pub fn write_header<W: Write>(writer: &mut W, options: &LogOptions) -> Result<usize> {
    writer.write_all(MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    let frame_size = write_frame(writer, options)?;
    Ok(PROLOGUE_SIZE + frame_size)
}

/// Validate a prologue held in memory
pub fn check_prologue(bytes: &[u8]) -> Result<()> {
    if bytes.len() < PROLOGUE_SIZE {
        return Err(PlanlogError::Truncated {
            expected: PROLOGUE_SIZE,
            available: bytes.len(),
        });
    }
    if &bytes[..MAGIC_LEN] != MAGIC {
        return Err(PlanlogError::InvalidFormat(
            "missing ROBYLOG magic, not a plan log".to_string(),
        ));
    }
    check_version(&bytes[MAGIC_LEN..PROLOGUE_SIZE])
}

/// Read and validate the header, returning the log options
///
/// On a magic mismatch the leading bytes are reinterpreted as a legacy
/// header, which was a bare options frame carrying a `version` entry.
pub fn read_header<R: Read>(reader: &mut R) -> Result<LogOptions> {
    let mut magic = [0u8; MAGIC_LEN];
    read_full(reader, &mut magic)?;
    if &magic != MAGIC {
        return Err(sniff_legacy_header(&magic, reader));
    }

    let mut version = [0u8; 4];
    read_full(reader, &mut version)?;
    check_version(&version)?;

    let options: Value = read_frame(reader)?;
    match options {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(PlanlogError::InvalidFormat(format!(
            "header options must be a mapping, found {}",
            value_kind(&other)
        ))),
    }
}

fn check_version(bytes: &[u8]) -> Result<()> {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    let found = u32::from_le_bytes(raw);
    if found != FORMAT_VERSION {
        return Err(PlanlogError::UnsupportedVersion {
            found,
            expected: FORMAT_VERSION,
        });
    }
    Ok(())
}

fn sniff_legacy_header<R: Read>(head: &[u8; MAGIC_LEN], reader: &mut R) -> PlanlogError {
    let not_a_log = || PlanlogError::InvalidFormat("missing ROBYLOG magic, not a plan log".into());

    let mut prefix = [0u8; LEN_PREFIX_SIZE];
    prefix.copy_from_slice(&head[..LEN_PREFIX_SIZE]);
    let len = match frame_len(prefix) {
        Ok(len) if len >= head.len() - LEN_PREFIX_SIZE => len,
        _ => return not_a_log(),
    };

    let mut payload = head[LEN_PREFIX_SIZE..].to_vec();
    match read_payload(reader, len - payload.len()) {
        Ok(rest) => payload.extend_from_slice(&rest),
        Err(_) => return not_a_log(),
    }

    match serde_json::from_slice::<Value>(&payload) {
        Ok(Value::Object(map)) => match map.get("version").and_then(Value::as_u64) {
            Some(found) => {
                tracing::debug!(found, "Recognized legacy log header");
                PlanlogError::UnsupportedVersion {
                    found: found as u32,
                    expected: FORMAT_VERSION,
                }
            }
            None => not_a_log(),
        },
        _ => not_a_log(),
    }
}

fn frame_len(prefix: [u8; LEN_PREFIX_SIZE]) -> Result<usize> {
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(PlanlogError::InvalidFormat(format!(
            "frame length {} exceeds the {} byte limit",
            len, MAX_FRAME_SIZE
        )));
    }
    Ok(len)
}

/// Read exactly `len` payload bytes or fail with `Truncated`
///
/// Memory grows with the bytes actually read, not with the declared length.
fn read_payload<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut payload)?;
    if payload.len() < len {
        return Err(PlanlogError::Truncated {
            expected: len,
            available: payload.len(),
        });
    }
    Ok(payload)
}

/// Fill `buf` completely or fail with `Truncated`
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(PlanlogError::Truncated {
                    expected: buf.len(),
                    available: filled,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn options() -> LogOptions {
        let mut options = LogOptions::new();
        options.insert("plugins".into(), json!(["roby"]));
        options
    }

    #[test]
    fn test_header_roundtrip() {
        let mut buf = Vec::new();
        let written = write_header(&mut buf, &options()).unwrap();
        assert_eq!(written, buf.len());
        assert_eq!(&buf[..7], MAGIC);

        let parsed = read_header(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, options());
    }

    #[test]
    fn test_version_mismatch_is_explicit() {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&4u32.to_le_bytes());
        write_frame(&mut buf, &options()).unwrap();

        match read_header(&mut Cursor::new(&buf)) {
            Err(PlanlogError::UnsupportedVersion { found, expected }) => {
                assert_eq!(found, 4);
                assert_eq!(expected, FORMAT_VERSION);
            }
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn test_legacy_header_is_sniffed() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &json!({"version": 2, "plugins": []})).unwrap();

        match read_header(&mut Cursor::new(&buf)) {
            Err(PlanlogError::UnsupportedVersion { found, .. }) => assert_eq!(found, 2),
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_invalid_format() {
        let buf = b"definitely not a log file".to_vec();
        assert!(matches!(
            read_header(&mut Cursor::new(&buf)),
            Err(PlanlogError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_short_prefix_is_truncated() {
        let buf = vec![3u8, 0];
        match read_raw_frame(&mut Cursor::new(&buf)) {
            Err(PlanlogError::Truncated {
                expected,
                available,
            }) => {
                assert_eq!(expected, 4);
                assert_eq!(available, 2);
            }
            other => panic!("expected Truncated, got {:?}", other),
        }
    }

    #[test]
    fn test_short_payload_is_truncated() {
        let mut buf = encode_frame(&json!([1, 2, 3])).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(read_raw_frame(&mut Cursor::new(&buf)).unwrap_err().is_truncated());
    }

    #[test]
    fn test_declared_length_beyond_data_is_truncated() {
        let mut buf = (64 * 1024 * 1024u32).to_le_bytes().to_vec();
        buf.extend_from_slice(b"[1]");
        match read_raw_frame(&mut Cursor::new(&buf)) {
            Err(PlanlogError::Truncated {
                expected,
                available,
            }) => {
                assert_eq!(expected, 64 * 1024 * 1024);
                assert_eq!(available, 3);
            }
            other => panic!("expected Truncated, got {:?}", other),
        }

        // A legacy-looking prefix with a huge length is just not a log
        let mut legacy = (200 * 1024 * 1024u32).to_le_bytes().to_vec();
        legacy.extend_from_slice(b"{\"version\": 2}");
        assert!(matches!(
            read_header(&mut Cursor::new(&legacy)),
            Err(PlanlogError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_oversized_length_is_invalid() {
        let buf = u32::MAX.to_le_bytes().to_vec();
        assert!(matches!(
            read_raw_frame(&mut Cursor::new(&buf)),
            Err(PlanlogError::InvalidFormat(_))
        ));
        assert!(split_frame(&buf).is_err());
    }

    #[test]
    fn test_split_frame_waits_for_complete_frame() {
        let frame = encode_frame(&json!({"a": 1})).unwrap();
        assert!(split_frame(&frame[..3]).unwrap().is_none());
        assert!(split_frame(&frame[..frame.len() - 1]).unwrap().is_none());

        let (payload, consumed) = split_frame(&frame).unwrap().unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(decode_payload::<Value>(payload).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_check_prologue() {
        let mut buf = Vec::new();
        write_header(&mut buf, &options()).unwrap();
        assert!(check_prologue(&buf[..PROLOGUE_SIZE]).is_ok());
        assert!(check_prologue(&buf[..5]).unwrap_err().is_truncated());
        assert!(matches!(
            check_prologue(b"XOBYLOG\x05\0\0\0"),
            Err(PlanlogError::InvalidFormat(_))
        ));
    }
}
