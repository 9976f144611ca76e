use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::models::{TokenAction, TokenPayload};

type HmacSha256 = Hmac<Sha256>;

/// Why a token was refused. Never echoed to the anonymous clicker, only
/// logged.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature mismatch")]
    SignatureMismatch,
    #[error("token expired")]
    Expired,
    #[error("token bound to a different action")]
    ActionMismatch,
}

/// Stateless signer/verifier for action links, constructed once at startup.
///
/// Wire format: `base64url(payload_json) + "." + hex(hmac_sha256(payload_json))`.
/// Neither segment can contain `.`, and the split is on the last occurrence
/// regardless, so payload content can never desynchronize it.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
    max_age: Duration,
}

impl TokenCodec {
    pub fn new(secret: &str, max_age_hours: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            max_age: Duration::hours(max_age_hours),
        }
    }

    pub fn issue(&self, record_id: &str, action: TokenAction) -> String {
        self.issue_at(record_id, action, Utc::now())
    }

    /// Variant of [`issue`](Self::issue) with a pinned issue instant.
    pub fn issue_at(&self, record_id: &str, action: TokenAction, issued_at: DateTime<Utc>) -> String {
        let payload = serde_json::json!({
            "record_id": record_id,
            "action": action.as_str(),
            "issued_at_ms": issued_at.timestamp_millis(),
        })
        .to_string();

        let tag = self.mac_over(payload.as_bytes());
        format!("{}.{}", URL_SAFE_NO_PAD.encode(payload.as_bytes()), hex::encode(tag))
    }

    /// Recomputes the MAC over the recovered payload bytes, compares in
    /// constant time, then enforces the age bound.
    pub fn verify(&self, token: &str) -> Result<TokenPayload, TokenError> {
        let (payload_b64, tag_hex) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed)?;
        let tag = hex::decode(tag_hex).map_err(|_| TokenError::Malformed)?;

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(&payload_bytes);
        mac.verify_slice(&tag)
            .map_err(|_| TokenError::SignatureMismatch)?;

        let payload: TokenPayload =
            serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::Malformed)?;

        let issued_at = DateTime::from_timestamp_millis(payload.issued_at_ms)
            .ok_or(TokenError::Malformed)?;
        if Utc::now() - issued_at > self.max_age {
            return Err(TokenError::Expired);
        }

        Ok(payload)
    }

    /// [`verify`](Self::verify) plus the action binding; a reject token is
    /// refused on the approve path and vice versa.
    pub fn verify_for_action(
        &self,
        token: &str,
        expected: TokenAction,
    ) -> Result<TokenPayload, TokenError> {
        let payload = self.verify(token)?;
        if payload.action != expected {
            return Err(TokenError::ActionMismatch);
        }
        Ok(payload)
    }

    fn mac_over(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new("unit-test-secret", 24)
    }

    #[test]
    fn round_trip_preserves_record_and_action() {
        let codec = codec();
        for action in [TokenAction::Approve, TokenAction::Reject] {
            let token = codec.issue("req_abc123", action);
            let payload = codec.verify(&token).expect("issued token should verify");
            assert_eq!(payload.record_id, "req_abc123");
            assert_eq!(payload.action, action);
        }
    }

    #[test]
    fn record_id_containing_separator_still_splits_correctly() {
        let codec = codec();
        let token = codec.issue("req.with.dots", TokenAction::Approve);
        let payload = codec.verify(&token).expect("token should verify");
        assert_eq!(payload.record_id, "req.with.dots");
    }

    #[test]
    fn mutating_any_byte_never_verifies() {
        let codec = codec();
        let token = codec.issue("req_abc123", TokenAction::Approve);
        let bytes = token.as_bytes();

        for index in 0..bytes.len() {
            let mut mutated = bytes.to_vec();
            // '0' and '1' are distinct in both segments, unlike a hex case flip.
            mutated[index] = if mutated[index] == b'0' { b'1' } else { b'0' };
            let mutated = String::from_utf8(mutated).expect("token is ascii");
            assert!(
                codec.verify(&mutated).is_err(),
                "mutated byte {index} produced a token that still verified"
            );
        }
    }

    #[test]
    fn tampered_signature_reports_signature_mismatch() {
        let codec = codec();
        let token = codec.issue("req_abc123", TokenAction::Approve);
        let (payload, tag) = token.rsplit_once('.').expect("token has a separator");
        let mut flipped: Vec<char> = tag.chars().collect();
        flipped[0] = if flipped[0] == '0' { '1' } else { '0' };
        let tampered = format!("{payload}.{}", flipped.into_iter().collect::<String>());
        assert_eq!(codec.verify(&tampered), Err(TokenError::SignatureMismatch));
    }

    #[test]
    fn token_from_other_secret_is_refused() {
        let token = TokenCodec::new("other-secret", 24).issue("req_abc123", TokenAction::Approve);
        assert_eq!(codec().verify(&token), Err(TokenError::SignatureMismatch));
    }

    #[test]
    fn garbage_inputs_are_malformed() {
        let codec = codec();
        for garbage in ["", "no-separator", "..", "%%%.zzz", "aGVsbG8"] {
            assert_eq!(codec.verify(garbage), Err(TokenError::Malformed), "input: {garbage:?}");
        }
    }

    #[test]
    fn expiry_is_enforced_at_the_age_bound() {
        let codec = codec();

        let fresh = codec.issue_at(
            "req_abc123",
            TokenAction::Approve,
            Utc::now() - Duration::hours(23) - Duration::minutes(59),
        );
        assert!(codec.verify(&fresh).is_ok());

        let stale = codec.issue_at(
            "req_abc123",
            TokenAction::Approve,
            Utc::now() - Duration::hours(24) - Duration::minutes(1),
        );
        assert_eq!(codec.verify(&stale), Err(TokenError::Expired));
    }

    #[test]
    fn action_binding_is_enforced_both_ways() {
        let codec = codec();
        let reject = codec.issue("req_abc123", TokenAction::Reject);
        assert_eq!(
            codec.verify_for_action(&reject, TokenAction::Approve),
            Err(TokenError::ActionMismatch)
        );
        let approve = codec.issue("req_abc123", TokenAction::Approve);
        assert_eq!(
            codec.verify_for_action(&approve, TokenAction::Reject),
            Err(TokenError::ActionMismatch)
        );
        assert!(codec.verify_for_action(&approve, TokenAction::Approve).is_ok());
    }
}
