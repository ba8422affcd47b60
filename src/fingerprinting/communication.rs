//! Request body for the tag (recognition) endpoint.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::signature_format::DecodedSignature;

#[derive(Debug, Clone, Serialize)]
pub struct SignaturePayload {
    pub uri: String,
    #[serde(rename = "samplems")]
    pub samples: u32,
}

/// The JSON document POSTed to the tag endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Signature {
    pub timezone: String,
    pub signature: SignaturePayload,
    pub timestamp: u64,
    pub context: serde_json::Map<String, serde_json::Value>,
    pub geolocation: serde_json::Map<String, serde_json::Value>,
}

pub fn get_signature_json(signature: &DecodedSignature) -> io::Result<Signature> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Ok(Signature {
        timezone: "Europe/Paris".to_string(),
        signature: SignaturePayload {
            uri: signature.encode_to_uri()?,
            samples: signature.duration_ms(),
        },
        timestamp,
        context: serde_json::Map::new(),
        geolocation: serde_json::Map::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let signature = DecodedSignature {
            sample_rate_hz: 16000,
            number_samples: 16000 * 12,
            ..Default::default()
        };
        let body = serde_json::to_value(get_signature_json(&signature).unwrap()).unwrap();

        assert_eq!(body["signature"]["samplems"], 12000);
        assert!(body["signature"]["uri"]
            .as_str()
            .unwrap()
            .starts_with("data:audio/vnd.shazam.sig;base64,"));
        assert!(body["timestamp"].as_u64().unwrap() > 0);
        assert!(body["context"].as_object().unwrap().is_empty());
        assert!(body["geolocation"].as_object().unwrap().is_empty());
    }
}
