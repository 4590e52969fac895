//! Wire-visible block types and header layout constants.

/// Header size in bytes: `id[16] | type[1] | block_num[4] | body_crc32[4] |
/// length[4] | header_crc32[4]`.
pub const HEADER_LEN: usize = 33;

/// 16-byte opaque session identifier.
pub type SessionId = [u8; 16];

/// Block type byte carried in the header's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockType {
    HandShake = 0x00,
    HandShakeResponse = 0x01,
    HandShakeFinal = 0x02,
    Connect = 0x03,
    Connected = 0x04,
    RequestResend = 0x05,
    Data = 0x06,
    Disconnect = 0x07,
    FastConnect = 0xA0,
    ConnectFailed = 0xF0,
    /// Never appears on the wire; signals a decode failure.
    Invalid = 0xFF,
}

impl BlockType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x00 => BlockType::HandShake,
            0x01 => BlockType::HandShakeResponse,
            0x02 => BlockType::HandShakeFinal,
            0x03 => BlockType::Connect,
            0x04 => BlockType::Connected,
            0x05 => BlockType::RequestResend,
            0x06 => BlockType::Data,
            0x07 => BlockType::Disconnect,
            0xA0 => BlockType::FastConnect,
            0xF0 => BlockType::ConnectFailed,
            _ => BlockType::Invalid,
        }
    }
}

impl From<BlockType> for u8 {
    fn from(t: BlockType) -> u8 {
        t as u8
    }
}
