//! Block wire format: header/body framing with CRC32, and the block type
//! vocabulary exchanged between client and server.

pub mod block;
pub mod connect;
pub mod constants;

pub use block::{marshal, marshal_opt, unmarshal, unmarshal_header, Block};
pub use connect::{decode_disconnect_ids, encode_disconnect_ids, ConnectRequest};
pub use constants::{BlockType, SessionId, HEADER_LEN};

/// Generate a fresh random v4-style session id, treated as an opaque
/// bytestring everywhere except handshake password generation (which
/// stringifies one).
pub fn new_session_id() -> SessionId {
    *uuid::Uuid::new_v4().as_bytes()
}
