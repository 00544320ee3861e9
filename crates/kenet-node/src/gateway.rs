use kenet_protocol::{GatewayClient, GatewayPayload};
use serde_json::json;

use crate::console::emit;

/// Gateway client for an online node without a configured SMS bridge.
///
/// The sealed packet is reported on stdout (ciphertext as hex) so an
/// external bridge process can pick it up.
#[derive(Debug, Default)]
pub struct StdoutGateway;

#[async_trait::async_trait]
impl GatewayClient for StdoutGateway {
    async fn submit(&self, packet: &GatewayPayload) -> Result<(), String> {
        tracing::info!(id = %packet.packet_id, from = %packet.sender_id, "gateway packet handed to bridge");
        emit(&json!({
            "event": "gateway_packet",
            "packet_id": packet.packet_id.to_string(),
            "sender_id": packet.sender_id.as_str(),
            "target_phone": packet.target_phone,
            "timestamp": packet.timestamp,
            "encrypted_payload": hex::encode(&packet.encrypted_payload),
            "nonce": hex::encode(&packet.nonce),
            "ephemeral_public_key": hex::encode(&packet.ephemeral_public_key),
            "integrity_tag": hex::encode(&packet.integrity_tag),
        }));
        Ok(())
    }
}
