//! Fixed-header binary codec for entry records.
//!
//! Each record is a 26-byte big-endian header followed by `text_length` raw
//! UTF-8 bytes. An entries file is the plain concatenation of records with no
//! length prefix or footer; readers scan forward using each record's embedded
//! text length.

use crate::error::EngineError;
use crate::util;

use super::Entry;

pub const HEADER_SIZE: usize = 26;

const ID_OFFSET: usize = 0;
const GROUP_ID_OFFSET: usize = 2;
const QUOTED_ID_OFFSET: usize = 4;
const INDENT_LEVEL_OFFSET: usize = 6;
const IS_PINNED_OFFSET: usize = 7;
const CREATED_OFFSET: usize = 8;
const LAST_EDITED_OFFSET: usize = 16;
const TEXT_LENGTH_OFFSET: usize = 24;

/// Sentinel for an absent quote reference.
const QUOTED_NONE: u16 = 0xFFFF;
/// Sentinel for a never-edited entry.
const NEVER_EDITED_MS: u64 = 0;

pub fn encode(entry: &Entry) -> Result<Vec<u8>, EngineError> {
    let text = entry.text.as_bytes();
    if text.len() > u16::MAX as usize {
        return Err(EngineError::InvalidState(format!(
            "entry {} text is {} bytes, exceeding the u16 wire limit",
            entry.id,
            text.len()
        )));
    }

    let mut buffer = vec![0u8; HEADER_SIZE + text.len()];
    buffer[ID_OFFSET..ID_OFFSET + 2].copy_from_slice(&entry.id.to_be_bytes());
    buffer[GROUP_ID_OFFSET..GROUP_ID_OFFSET + 2].copy_from_slice(&entry.group_id.to_be_bytes());
    buffer[QUOTED_ID_OFFSET..QUOTED_ID_OFFSET + 2]
        .copy_from_slice(&entry.quoted_id.unwrap_or(QUOTED_NONE).to_be_bytes());
    buffer[INDENT_LEVEL_OFFSET] = entry.indent_level;
    buffer[IS_PINNED_OFFSET] = u8::from(entry.is_pinned);
    buffer[CREATED_OFFSET..CREATED_OFFSET + 8]
        .copy_from_slice(&util::epoch_ms(entry.created).to_be_bytes());
    let edited_ms = entry.last_edited.map_or(NEVER_EDITED_MS, util::epoch_ms);
    buffer[LAST_EDITED_OFFSET..LAST_EDITED_OFFSET + 8].copy_from_slice(&edited_ms.to_be_bytes());
    buffer[TEXT_LENGTH_OFFSET..TEXT_LENGTH_OFFSET + 2]
        .copy_from_slice(&(text.len() as u16).to_be_bytes());
    buffer[HEADER_SIZE..].copy_from_slice(text);

    Ok(buffer)
}

/// Decode the record starting at the head of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Entry, EngineError> {
    decode_record(bytes).map(|(entry, _)| entry)
}

/// Decode a full entries file: records back to back until the buffer ends.
pub fn decode_stream(bytes: &[u8]) -> Result<Vec<Entry>, EngineError> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (entry, consumed) = decode_record(&bytes[offset..])?;
        entries.push(entry);
        offset += consumed;
    }
    Ok(entries)
}

pub fn encode_stream(entries: &[Entry]) -> Result<Vec<u8>, EngineError> {
    let mut buffer = Vec::with_capacity(entries.len() * HEADER_SIZE);
    for entry in entries {
        buffer.extend_from_slice(&encode(entry)?);
    }
    Ok(buffer)
}

fn decode_record(bytes: &[u8]) -> Result<(Entry, usize), EngineError> {
    if bytes.len() < HEADER_SIZE {
        return Err(EngineError::CorruptRecord(format!(
            "truncated header: {} of {HEADER_SIZE} bytes",
            bytes.len()
        )));
    }

    let id = read_u16(bytes, ID_OFFSET);
    let group_id = read_u16(bytes, GROUP_ID_OFFSET);
    let quoted_raw = read_u16(bytes, QUOTED_ID_OFFSET);
    let indent_level = bytes[INDENT_LEVEL_OFFSET];
    let is_pinned = bytes[IS_PINNED_OFFSET] == 1;
    let created_ms = read_u64(bytes, CREATED_OFFSET);
    let edited_ms = read_u64(bytes, LAST_EDITED_OFFSET);
    let text_length = read_u16(bytes, TEXT_LENGTH_OFFSET) as usize;

    let end = HEADER_SIZE + text_length;
    if bytes.len() < end {
        return Err(EngineError::CorruptRecord(format!(
            "entry {id}: text length {text_length} reads past buffer end"
        )));
    }

    let text = std::str::from_utf8(&bytes[HEADER_SIZE..end])
        .map_err(|err| EngineError::CorruptRecord(format!("entry {id}: invalid UTF-8: {err}")))?
        .to_string();
    let created = util::from_epoch_ms(created_ms).ok_or_else(|| {
        EngineError::CorruptRecord(format!("entry {id}: created timestamp {created_ms}ms"))
    })?;
    let last_edited = if edited_ms == NEVER_EDITED_MS {
        None
    } else {
        Some(util::from_epoch_ms(edited_ms).ok_or_else(|| {
            EngineError::CorruptRecord(format!("entry {id}: edited timestamp {edited_ms}ms"))
        })?)
    };

    let entry = Entry {
        id,
        group_id,
        text,
        created,
        last_edited,
        indent_level,
        is_pinned,
        quoted_id: (quoted_raw != QUOTED_NONE).then_some(quoted_raw),
    };
    Ok((entry, end))
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_be_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sample(id: u16) -> Entry {
        let mut entry = Entry::new(
            id,
            7,
            "entry text with unicode: déjà vu",
            util::from_epoch_ms(1_700_000_123_456).unwrap(),
            3,
        );
        entry.is_pinned = true;
        entry.quoted_id = Some(2);
        entry.last_edited = util::from_epoch_ms(1_700_000_999_000);
        entry
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let entry = sample(5);
        let bytes = encode(&entry).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + entry.text.len());
        assert_eq!(decode(&bytes).unwrap(), entry);
    }

    #[test]
    fn round_trip_preserves_absent_sentinels() {
        // quoted_id 0xFFFF and last_edited epoch-0 must come back as None.
        let entry = Entry::new(0, 0, "plain", util::from_epoch_ms(42).unwrap(), 0);
        let bytes = encode(&entry).unwrap();
        assert_eq!(read_u16(&bytes, QUOTED_ID_OFFSET), 0xFFFF);
        assert_eq!(read_u64(&bytes, LAST_EDITED_OFFSET), 0);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.quoted_id, None);
        assert_eq!(decoded.last_edited, None);
        assert_eq!(decoded, entry);
    }

    #[test]
    fn empty_text_record_is_exactly_header_sized() {
        let entry = Entry::new(1, 0, "", util::from_epoch_ms(0).unwrap(), 0);
        let bytes = encode(&entry).unwrap();
        assert_eq!(bytes.len(), 26);
        assert_eq!(decode(&bytes).unwrap(), entry);
    }

    #[test]
    fn truncated_header_is_corrupt() {
        assert_matches!(decode(&[]), Err(EngineError::CorruptRecord(_)));
        assert_matches!(decode(&[0u8; 25]), Err(EngineError::CorruptRecord(_)));
    }

    #[test]
    fn text_length_past_buffer_end_is_corrupt() {
        let entry = sample(1);
        let mut bytes = encode(&entry).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert_matches!(decode(&bytes), Err(EngineError::CorruptRecord(_)));
    }

    #[test]
    fn stream_scans_records_sequentially() {
        let entries = vec![sample(0), Entry::new(1, 7, "", sample(0).created, 0), sample(2)];
        let bytes = encode_stream(&entries).unwrap();
        assert_eq!(decode_stream(&bytes).unwrap(), entries);
        assert_eq!(decode_stream(&[]).unwrap(), Vec::<Entry>::new());
    }

    #[test]
    fn stream_with_trailing_garbage_is_corrupt() {
        let mut bytes = encode(&sample(0)).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);
        assert_matches!(decode_stream(&bytes), Err(EngineError::CorruptRecord(_)));
    }
}
