use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Sign a webhook payload.
///
/// The signed message is `{timestamp}.{body}`; the signature is the
/// hex-encoded HMAC-SHA256 over it.
pub fn sign_payload(secret: &str, timestamp: i64, body: &str) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(format!("{}.{}", timestamp, body).as_bytes());
    let result = mac.finalize();

    Ok(hex::encode(result.into_bytes()))
}

/// Build a complete signature header value: `t=<unix seconds>,v1=<hex hmac>`.
pub fn signature_header(secret: &str, timestamp: i64, body: &str) -> Result<String, anyhow::Error> {
    let signature = sign_payload(secret, timestamp, body)?;
    Ok(format!("t={},v1={}", timestamp, signature))
}

/// Parsed form of a `t=...,v1=...` signature header.
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

/// Parse a signature header. Returns `None` when the header is malformed or
/// carries no `v1` signature.
pub fn parse_signature_header(header: &str) -> Option<ParsedSignature> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp?;
    if signatures.is_empty() {
        return None;
    }

    Some(ParsedSignature {
        timestamp,
        signatures,
    })
}

/// Verify a signature header against the raw request body.
///
/// Rejects headers whose timestamp falls outside `tolerance_secs` of
/// `now_unix`, and compares candidate signatures in constant time.
pub fn verify_signature_header(
    secret: &str,
    header: &str,
    body: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> Result<bool, anyhow::Error> {
    let parsed = match parse_signature_header(header) {
        Some(parsed) => parsed,
        None => return Ok(false),
    };

    if (now_unix - parsed.timestamp).abs() > tolerance_secs {
        return Ok(false);
    }

    let expected = sign_payload(secret, parsed.timestamp, body)?;
    let expected_bytes = expected.as_bytes();

    for candidate in &parsed.signatures {
        let candidate_bytes = candidate.as_bytes();
        if candidate_bytes.len() == expected_bytes.len()
            && bool::from(candidate_bytes.ct_eq(expected_bytes))
        {
            return Ok(true);
        }
    }

    Ok(false)
}
