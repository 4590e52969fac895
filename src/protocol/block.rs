//! Block codec: marshal/unmarshal of the 33-byte framed header plus body,
//! with IEEE CRC32 over both header and body.

use crate::error::{ProxyError, Result};
use crate::protocol::constants::{BlockType, SessionId, HEADER_LEN};

/// One framed unit on the tunnel wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: SessionId,
    pub block_type: BlockType,
    pub block_num: u32,
    pub body_crc32: u32,
    pub length: i32,
    pub header_crc32: u32,
    pub body: Vec<u8>,
}

impl Block {
    pub fn new(id: SessionId, block_type: BlockType) -> Self {
        Block {
            id,
            block_type,
            block_num: 0,
            body_crc32: 0,
            length: 0,
            header_crc32: 0,
            body: Vec::new(),
        }
    }

    pub fn with_body(id: SessionId, block_type: BlockType, body: Vec<u8>) -> Self {
        let mut b = Block::new(id, block_type);
        b.body = body;
        b
    }
}

/// Marshal a block into wire bytes, filling in `length`, `body_crc32` and
/// `header_crc32` from the current `body`.
pub fn marshal(block: &Block) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + block.body.len());
    buf.extend_from_slice(&block.id);
    buf.push(block.block_type.into());
    buf.extend_from_slice(&block.block_num.to_le_bytes());

    let body_crc32 = crc32fast::hash(&block.body);
    buf.extend_from_slice(&body_crc32.to_le_bytes());

    let length = block.body.len() as i32;
    buf.extend_from_slice(&length.to_le_bytes());

    debug_assert_eq!(buf.len(), HEADER_LEN - 4);
    let header_crc32 = crc32fast::hash(&buf);
    buf.extend_from_slice(&header_crc32.to_le_bytes());

    buf.extend_from_slice(&block.body);
    buf
}

/// As `marshal`, but returns an empty byte slice for `None` rather than
/// panicking — mirrors the Go source's nil-receiver behaviour.
pub fn marshal_opt(block: Option<&Block>) -> Vec<u8> {
    block.map(marshal).unwrap_or_default()
}

/// Decode just the 33-byte header. Does not touch or validate the body.
pub fn unmarshal_header(b: &[u8]) -> Result<Block> {
    if b.len() < HEADER_LEN {
        return Err(ProxyError::broken_bytes(b.len()));
    }

    let mut id = [0u8; 16];
    id.copy_from_slice(&b[0..16]);
    let block_type_raw = b[16];
    let block_num = u32::from_le_bytes(b[17..21].try_into().unwrap());
    let body_crc32 = u32::from_le_bytes(b[21..25].try_into().unwrap());
    let length = i32::from_le_bytes(b[25..29].try_into().unwrap());
    let header_crc32 = u32::from_le_bytes(b[29..33].try_into().unwrap());

    if header_crc32 != crc32fast::hash(&b[0..HEADER_LEN - 4]) {
        return Err(ProxyError::InvalidBlock);
    }

    Ok(Block {
        id,
        block_type: BlockType::from_u8(block_type_raw),
        block_num,
        body_crc32,
        length,
        header_crc32,
        body: Vec::new(),
    })
}

/// Decode header and body (if `length > 0`), validating the body CRC.
pub fn unmarshal(b: &[u8]) -> Result<Block> {
    let mut block = unmarshal_header(b)?;

    if block.length > 0 {
        let len = block.length as usize;
        let end = HEADER_LEN
            .checked_add(len)
            .ok_or_else(|| ProxyError::Protocol("body length overflow".into()))?;
        if b.len() < end {
            return Err(ProxyError::broken_bytes(b.len()));
        }

        let body = &b[HEADER_LEN..end];
        if block.body_crc32 != crc32fast::hash(body) {
            return Err(ProxyError::InvalidBlock);
        }
        block.body = body.to_vec();
    }

    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_id() -> SessionId {
        let mut id = [0u8; 16];
        for (i, b) in id.iter_mut().enumerate() {
            *b = i as u8;
        }
        id
    }

    #[test]
    fn round_trip_empty_body() {
        let b = Block::new(sample_id(), BlockType::HandShake);
        let wire = marshal(&b);
        assert_eq!(wire.len(), HEADER_LEN);
        let decoded = unmarshal(&wire).unwrap();
        assert_eq!(decoded.id, b.id);
        assert_eq!(decoded.block_type, BlockType::HandShake);
        assert_eq!(decoded.length, 0);
        assert!(decoded.body.is_empty());
    }

    #[test]
    fn round_trip_with_body() {
        let body = b"hello tunnel".to_vec();
        let b = Block::with_body(sample_id(), BlockType::Data, body.clone());
        let wire = marshal(&b);
        assert_eq!(wire.len(), HEADER_LEN + body.len());
        let decoded = unmarshal(&wire).unwrap();
        assert_eq!(decoded.body, body);
        assert_eq!(decoded.block_type, BlockType::Data);
        assert_eq!(decoded.length, body.len() as i32);
    }

    #[test]
    fn short_header_is_broken_bytes() {
        let err = unmarshal_header(&[0u8; 10]).unwrap_err();
        match err {
            ProxyError::BrokenBytes { need, got } => {
                assert_eq!(need, HEADER_LEN);
                assert_eq!(got, 10);
            }
            other => panic!("expected BrokenBytes, got {other:?}"),
        }
    }

    #[test]
    fn header_crc_mismatch_is_invalid() {
        let b = Block::new(sample_id(), BlockType::HandShake);
        let mut wire = marshal(&b);
        wire[0] ^= 0xFF;
        let err = unmarshal_header(&wire).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidBlock));
    }

    #[test]
    fn body_crc_mismatch_is_invalid() {
        let b = Block::with_body(sample_id(), BlockType::Data, b"payload".to_vec());
        let mut wire = marshal(&b);
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        let err = unmarshal(&wire).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidBlock));
    }

    #[test]
    fn marshal_none_is_empty() {
        assert!(marshal_opt(None).is_empty());
    }

    #[test]
    fn invalid_type_never_round_trips_from_construction() {
        // 0xFF is decode-only; constructing with it is legal in-process but
        // never something marshal/unmarshal produces from a valid block.
        let b = Block::new(sample_id(), BlockType::Invalid);
        let wire = marshal(&b);
        let decoded = unmarshal(&wire).unwrap();
        assert_eq!(decoded.block_type, BlockType::Invalid);
    }

    proptest::proptest! {
        #[test]
        fn marshal_unmarshal_round_trips_for_any_body(body in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..4096)) {
            let b = Block::with_body(sample_id(), BlockType::Data, body);
            let wire = marshal(&b);
            let decoded = unmarshal(&wire).unwrap();
            proptest::prop_assert_eq!(decoded.id, b.id);
            proptest::prop_assert_eq!(decoded.block_type, b.block_type);
            proptest::prop_assert_eq!(decoded.length, b.body.len() as i32);
            proptest::prop_assert_eq!(decoded.body, b.body);
        }
    }
}
