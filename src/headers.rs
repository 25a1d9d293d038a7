//! Header block text format.
//!
//! Header blocks are not HPACK-compressed here. A block is a sequence of
//! `name=value\r\n` records; the name ends at the first `=`, so values may
//! themselves contain `=`.

use crate::error::HeaderError;

const LINE_END: &[u8] = b"\r\n";

/// A decoded HTTP/2 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Header {
    pub name: String,
    pub value: String,
}

impl H2Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    fn validate(&self) -> Result<(), HeaderError> {
        if self.name.contains(['=', '\r', '\n']) {
            return Err(HeaderError::InvalidName(self.name.clone()));
        }
        if self.value.contains(['\r', '\n']) {
            return Err(HeaderError::InvalidValue(self.name.clone()));
        }
        Ok(())
    }

    fn encoded_len(&self) -> usize {
        self.name.len() + 1 + self.value.len() + LINE_END.len()
    }
}

/// Decode a complete header block.
///
/// Records without `=` are skipped. A final record missing its `\r\n` is
/// still decoded. Non-UTF-8 bytes are replaced.
pub fn decode_header_block(block: &[u8]) -> Vec<H2Header> {
    let mut headers = Vec::new();
    let mut rest = block;

    while !rest.is_empty() {
        let (record, next) = match find(rest, LINE_END) {
            Some(pos) => (&rest[..pos], &rest[pos + LINE_END.len()..]),
            None => (rest, &rest[rest.len()..]),
        };
        rest = next;

        let Some(eq) = record.iter().position(|&b| b == b'=') else {
            continue;
        };
        headers.push(H2Header::new(
            String::from_utf8_lossy(&record[..eq]).into_owned(),
            String::from_utf8_lossy(&record[eq + 1..]).into_owned(),
        ));
    }

    headers
}

/// Encode headers into a header block.
pub fn encode_header_block(headers: &[H2Header]) -> Result<Vec<u8>, HeaderError> {
    let mut block = Vec::with_capacity(headers.iter().map(H2Header::encoded_len).sum());
    for header in headers {
        header.validate()?;
        block.extend_from_slice(header.name.as_bytes());
        block.push(b'=');
        block.extend_from_slice(header.value.as_bytes());
        block.extend_from_slice(LINE_END);
    }
    Ok(block)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ============================================================================
// Tests
// ============================================================================
