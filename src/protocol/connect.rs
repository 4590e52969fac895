//! JSON payloads carried inside block bodies: the `Connect` block's
//! destination and the `Disconnect` block's batch of session ids.

use serde::{Deserialize, Serialize};

use crate::protocol::SessionId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
}

pub fn encode_disconnect_ids(ids: &[SessionId]) -> Vec<u8> {
    let strings: Vec<String> = ids.iter().map(|id| uuid::Uuid::from_bytes(*id).to_string()).collect();
    serde_json::to_vec(&strings).unwrap_or_default()
}

pub fn decode_disconnect_ids(body: &[u8]) -> crate::error::Result<Vec<SessionId>> {
    let strings: Vec<String> = serde_json::from_slice(body)
        .map_err(|e| crate::error::ProxyError::Protocol(format!("bad disconnect payload: {e}")))?;
    strings
        .into_iter()
        .map(|s| {
            uuid::Uuid::parse_str(&s)
                .map(|u| *u.as_bytes())
                .map_err(|e| crate::error::ProxyError::Protocol(format!("bad disconnect id {s}: {e}")))
        })
        .collect()
}
