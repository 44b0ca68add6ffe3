//! Binary posting-list format v1 for the tokens blob.
//!
//! Little-endian layout:
//!
//! ```text
//! token_count: u32
//! per token (keys in ascending byte order):
//!   key_len:   u16
//!   key:       [key_len] UTF-8 bytes
//!   ref_count: u32
//!   refs:      [ref_count] × (file_id: u32, line: u16)
//! ```

use std::collections::HashMap;

use crate::error::SearchError;
use crate::types::TokenRef;

const REF_SIZE: usize = 6;

/// Encode a tokens map. Output is byte-identical for equal maps.
pub fn encode_postings(tokens: &HashMap<String, Vec<TokenRef>>) -> Result<Vec<u8>, SearchError> {
    let total: usize = 4 + tokens
        .iter()
        .map(|(k, refs)| 2 + k.len() + 4 + refs.len() * REF_SIZE)
        .sum::<usize>();

    let mut keys: Vec<&String> = tokens.keys().collect();
    keys.sort();

    let token_count = u32::try_from(keys.len())
        .map_err(|_| SearchError::InvalidArgs(format!("too many tokens: {}", keys.len())))?;

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&token_count.to_le_bytes());

    for key in keys {
        let refs = &tokens[key];
        let key_len = u16::try_from(key.len()).map_err(|_| {
            SearchError::InvalidArgs(format!("token key too long: {} bytes", key.len()))
        })?;
        let ref_count = u32::try_from(refs.len()).map_err(|_| {
            SearchError::InvalidArgs(format!("too many refs for token '{}': {}", key, refs.len()))
        })?;

        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(&ref_count.to_le_bytes());
        for r in refs {
            buf.extend_from_slice(&r.file_id.to_le_bytes());
            buf.extend_from_slice(&r.line.to_le_bytes());
        }
    }

    Ok(buf)
}

/// Bounds-checked reader over the encoded bytes.
struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
    token: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], SearchError> {
        let end = self.offset.checked_add(n).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let bytes = &self.data[self.offset..end];
                self.offset = end;
                Ok(bytes)
            }
            None => Err(SearchError::PostingDecode {
                token: self.token,
                offset: self.offset,
                message: format!("truncated {} (need {} bytes, have {})", what, n, self.data.len() - self.offset),
            }),
        }
    }

    fn u16(&mut self, what: &str) -> Result<u16, SearchError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> Result<u32, SearchError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Decode a tokens map, failing with [`SearchError::PostingDecode`] on any
/// truncated field or non-UTF-8 key.
pub fn decode_postings(data: &[u8]) -> Result<HashMap<String, Vec<TokenRef>>, SearchError> {
    if data.len() < 4 {
        return Err(SearchError::PostingDecode {
            token: 0,
            offset: 0,
            message: format!("posting list too short: {} bytes", data.len()),
        });
    }

    let mut cur = Cursor { data, offset: 0, token: 0 };
    let token_count = cur.u32("token count")? as usize;
    // Every token needs at least 6 bytes; cap the preallocation by what the input can hold.
    let mut tokens = HashMap::with_capacity(token_count.min(data.len() / 6));

    for i in 0..token_count {
        cur.token = i;
        let key_len = cur.u16("key length")? as usize;
        let key_start = cur.offset;
        let key_bytes = cur.take(key_len, "key")?;
        let key = std::str::from_utf8(key_bytes).map_err(|e| SearchError::PostingDecode {
            token: i,
            offset: key_start,
            message: format!("key is not valid UTF-8: {}", e),
        })?;

        let ref_count = cur.u32("ref count")? as usize;
        let refs_bytes = cur.take(ref_count.saturating_mul(REF_SIZE), "refs")?;
        let refs: Vec<TokenRef> = refs_bytes
            .chunks_exact(REF_SIZE)
            .map(|c| TokenRef {
                file_id: u32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                line: u16::from_le_bytes([c[4], c[5]]),
            })
            .collect();

        tokens.insert(key.to_string(), refs);
    }

    Ok(tokens)
}
