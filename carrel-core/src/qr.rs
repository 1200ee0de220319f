use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

const TOKEN_TYPE: &str = "booking";

/// Payload embedded in a scannable booking token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    #[serde(rename = "type")]
    pub token_type: String,
    pub booking_id: Uuid,
    /// Older scanners omit it; only `type` and `bookingId` are required.
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
}

/// Artifacts produced for one booking.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    /// Opaque url-safe token printed into the QR image.
    pub qr_code: String,
    /// JSON text the token decodes to.
    pub qr_data: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QrError {
    #[error("Invalid QR code format: {0}")]
    Malformed(String),

    #[error("Invalid QR code type: {0}")]
    WrongType(String),
}

impl From<QrError> for CoreError {
    fn from(err: QrError) -> Self {
        match err {
            QrError::Malformed(msg) => CoreError::MalformedToken(msg),
            QrError::WrongType(found) => CoreError::WrongTokenType(found),
        }
    }
}

/// Encodes booking references into tokens and back. Knows nothing about
/// booking state; callers re-check ownership and lifecycle guards.
#[derive(Debug, Default, Clone, Copy)]
pub struct QrCodec;

impl QrCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, booking_id: Uuid, issued_at: DateTime<Utc>) -> IssuedToken {
        let payload = TokenPayload {
            token_type: TOKEN_TYPE.to_string(),
            booking_id,
            issued_at: Some(issued_at),
        };
        let qr_data = serde_json::to_string(&payload).unwrap_or_default();
        let qr_code = URL_SAFE_NO_PAD.encode(qr_data.as_bytes());
        IssuedToken { qr_code, qr_data }
    }

    /// Accepts either the opaque token or the raw JSON `qr_data`.
    pub fn decode(&self, scanned: &str) -> Result<Uuid, QrError> {
        let scanned = scanned.trim();
        if scanned.is_empty() {
            return Err(QrError::Malformed("empty token".to_string()));
        }

        let json = if scanned.starts_with('{') {
            scanned.to_string()
        } else {
            let bytes = URL_SAFE_NO_PAD
                .decode(scanned)
                .map_err(|e| QrError::Malformed(e.to_string()))?;
            String::from_utf8(bytes).map_err(|e| QrError::Malformed(e.to_string()))?
        };

        let payload: TokenPayload =
            serde_json::from_str(&json).map_err(|e| QrError::Malformed(e.to_string()))?;
        if payload.token_type != TOKEN_TYPE {
            return Err(QrError::WrongType(payload.token_type));
        }
        Ok(payload.booking_id)
    }
}
