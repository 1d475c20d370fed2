use {
    chrono::Utc,
    hmac::{Hmac, Mac},
    sha2::Sha256,
    std::sync::Arc,
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum distance between the signed timestamp and now.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Authenticates webhook deliveries.
///
/// The gateway signs `id:{data.id};request-id:{x-request-id};ts:{ts};` with
/// HMAC-SHA256 and sends `x-signature: ts=<unix>,v1=<hex>`.
#[derive(Clone)]
pub enum SignatureVerifier {
    Enforced(Arc<str>),
    /// Accepts everything. Only constructible from non-production config.
    Unverified,
}

impl SignatureVerifier {
    pub fn enforced(secret: impl Into<Arc<str>>) -> Self {
        Self::Enforced(secret.into())
    }

    pub fn verify(&self, payload: &[u8], signature: Option<&str>, request_id: Option<&str>) -> bool {
        match self {
            Self::Unverified => {
                tracing::warn!("webhook signature verification disabled, accepting unsigned payload");
                true
            }
            Self::Enforced(secret) => match check(secret, payload, signature, request_id) {
                Ok(()) => true,
                Err(reason) => {
                    tracing::warn!(reason, "webhook signature rejected");
                    false
                }
            },
        }
    }
}

fn check(
    secret: &str,
    payload: &[u8],
    signature: Option<&str>,
    request_id: Option<&str>,
) -> Result<(), &'static str> {
    let header = signature.ok_or("missing x-signature header")?;
    let (ts, v1) = parse_header(header).ok_or("malformed x-signature header")?;

    let ts_secs: i64 = ts.parse().map_err(|_| "non-numeric timestamp")?;
    // Some senders use milliseconds.
    let ts_secs = if ts_secs > 100_000_000_000 { ts_secs / 1000 } else { ts_secs };
    if (Utc::now().timestamp() - ts_secs).abs() > TIMESTAMP_TOLERANCE_SECS {
        return Err("timestamp outside tolerance");
    }

    let resource_id = resource_id(payload).ok_or("payload has no data.id")?;
    let expected = hex::decode(v1).map_err(|_| "signature is not hex")?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| "unusable secret")?;
    mac.update(manifest(&resource_id, request_id, ts).as_bytes());
    mac.verify_slice(&expected).map_err(|_| "signature mismatch")
}

/// `ts=..,v1=..` in any order, whitespace tolerant.
fn parse_header(header: &str) -> Option<(&str, &str)> {
    let mut ts = None;
    let mut v1 = None;
    for part in header.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim() {
            "ts" => ts = Some(value.trim()),
            "v1" => v1 = Some(value.trim()),
            _ => {}
        }
    }
    Some((ts.filter(|t| !t.is_empty())?, v1.filter(|v| !v.is_empty())?))
}

fn resource_id(payload: &[u8]) -> Option<String> {
    let body: serde_json::Value = serde_json::from_slice(payload).ok()?;
    let id = match body.get("data")?.get("id")? {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(id.to_lowercase())
}

pub fn manifest(resource_id: &str, request_id: Option<&str>, ts: &str) -> String {
    match request_id {
        Some(rid) => format!("id:{resource_id};request-id:{rid};ts:{ts};"),
        None => format!("id:{resource_id};ts:{ts};"),
    }
}

/// Builds an `x-signature` header value. Used by tests and local tooling.
pub fn sign(secret: &str, resource_id: &str, request_id: Option<&str>, ts: i64) -> String {
    let ts = ts.to_string();
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(manifest(&resource_id.to_lowercase(), request_id, &ts).as_bytes());
    format!("ts={ts},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"1","type":"payment","data":{"id":"ABC123"}}"#;

    #[test]
    fn accepts_valid_signature_with_request_id() {
        let header = sign(SECRET, "ABC123", Some("req-1"), Utc::now().timestamp());
        let verifier = SignatureVerifier::enforced(SECRET);
        assert!(verifier.verify(BODY, Some(&header), Some("req-1")));
        // Request id is part of the manifest.
        assert!(!verifier.verify(BODY, Some(&header), Some("req-2")));
        assert!(!verifier.verify(BODY, Some(&header), None));
    }

    #[test]
    fn header_order_and_whitespace_do_not_matter() {
        let header = sign(SECRET, "abc123", None, Utc::now().timestamp());
        let (ts, v1) = parse_header(&header).unwrap();
        let reordered = format!(" v1={v1} , ts={ts} ");
        assert!(SignatureVerifier::enforced(SECRET).verify(BODY, Some(&reordered), None));
    }

    #[test]
    fn rejects_tampering_and_missing_parts() {
        let verifier = SignatureVerifier::enforced(SECRET);
        let header = sign("other-secret", "ABC123", None, Utc::now().timestamp());
        assert!(!verifier.verify(BODY, Some(&header), None));
        assert!(!verifier.verify(BODY, None, None));
        assert!(!verifier.verify(BODY, Some("ts=1"), None));
        assert!(!verifier.verify(BODY, Some("garbage"), None));

        let stale = sign(SECRET, "ABC123", None, Utc::now().timestamp() - 3600);
        assert!(!verifier.verify(BODY, Some(&stale), None));
    }

    #[test]
    fn manifest_omits_absent_request_id() {
        assert_eq!(manifest("42", None, "1700"), "id:42;ts:1700;");
        assert_eq!(manifest("42", Some("r"), "1700"), "id:42;request-id:r;ts:1700;");
    }

    #[test]
    fn unverified_accepts_anything() {
        assert!(SignatureVerifier::Unverified.verify(b"{}", None, None));
    }
}
