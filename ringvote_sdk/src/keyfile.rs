//! RSA keys in JWK form: one public key per line for key-set files, one
//! private JWK (with `d`, `p`, `q`) per voter secret.

use crate::error::{Result, VoteError};
use crate::types::RsaPubKey;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

const JWK_NUMBER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Deserialize)]
struct JwkPublic {
    n: String,
    e: String,
}

#[derive(Serialize)]
struct JwkPublicOut<'a> {
    kty: &'a str,
    n: String,
    e: String,
}

#[derive(Deserialize)]
struct JwkPrivate {
    n: String,
    e: String,
    d: String,
    p: String,
    q: String,
}

fn decode_number(field: &str, value: &str) -> Result<BigUint> {
    let bytes = JWK_NUMBER
        .decode(value.trim())
        .map_err(|e| VoteError::Validation(format!("field `{}` is not base64url: {}", field, e)))?;
    if bytes.is_empty() {
        return Err(VoteError::Validation(format!("field `{}` is empty", field)));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

fn encode_number(value: &BigUint) -> String {
    JWK_NUMBER.encode(value.to_bytes_be())
}

/// Parse a key-set file: one JWK per line, blank lines skipped.
pub fn parse_public_keys(text: &str) -> Result<Vec<RsaPubKey>> {
    let mut keys = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let key = parse_public_key(line)
            .map_err(|e| VoteError::Validation(format!("line {}: {}", lineno + 1, e)))?;
        keys.push(key);
    }
    Ok(keys)
}

pub fn parse_public_key(json: &str) -> Result<RsaPubKey> {
    let jwk: JwkPublic = serde_json::from_str(json)
        .map_err(|e| VoteError::Validation(format!("not a JWK object: {}", e)))?;
    Ok(RsaPubKey::new(
        decode_number("n", &jwk.n)?,
        decode_number("e", &jwk.e)?,
    ))
}

/// Render keys back to the one-JWK-per-line file format.
pub fn render_public_keys(keys: &[RsaPubKey]) -> Result<String> {
    let mut out = String::new();
    for key in keys {
        out.push_str(&serde_json::to_string(&JwkPublicOut {
            kty: "RSA",
            n: encode_number(&key.n),
            e: encode_number(&key.e),
        })?);
        out.push('\n');
    }
    Ok(out)
}

/// Voter's RSA private factors.
#[derive(Clone)]
pub struct VoterSecret {
    pub public: RsaPubKey,
    pub d: BigUint,
    pub p: BigUint,
    pub q: BigUint,
}

impl fmt::Debug for VoterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoterSecret")
            .field("public", &self.public)
            .field("d", &"[REDACTED]")
            .field("p", &"[REDACTED]")
            .field("q", &"[REDACTED]")
            .finish()
    }
}

pub fn parse_secret_key(json: &str) -> Result<VoterSecret> {
    let jwk: JwkPrivate = serde_json::from_str(json.trim())
        .map_err(|e| VoteError::Validation(format!("not a private JWK: {}", e)))?;
    let secret = VoterSecret {
        public: RsaPubKey::new(decode_number("n", &jwk.n)?, decode_number("e", &jwk.e)?),
        d: decode_number("d", &jwk.d)?,
        p: decode_number("p", &jwk.p)?,
        q: decode_number("q", &jwk.q)?,
    };
    if &secret.p * &secret.q != secret.public.n {
        return Err(VoteError::Validation("p * q does not equal n".into()));
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_lines() {
        let text = "{\"kty\":\"RSA\",\"n\":\"AQAB\",\"e\":\"AQAB\"}\n\n  {\"n\":\"_w\",\"e\":\"Aw==\"}  \n";
        let keys = parse_public_keys(text).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].n, BigUint::from(65537u32));
        assert_eq!(keys[1].n, BigUint::from(255u32));
        assert_eq!(keys[1].e, BigUint::from(3u32));

        let rendered = render_public_keys(&keys).unwrap();
        assert_eq!(parse_public_keys(&rendered).unwrap(), keys);
    }

    #[test]
    fn test_bad_line_reports_position() {
        let err = parse_public_keys("{\"n\":\"AQAB\",\"e\":\"AQAB\"}\nnot json\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_secret_key() {
        // n = 61 * 53 = 3233, e = 17, d = 2753
        let json = format!(
            "{{\"n\":\"{}\",\"e\":\"{}\",\"d\":\"{}\",\"p\":\"{}\",\"q\":\"{}\"}}",
            encode_number(&BigUint::from(3233u32)),
            encode_number(&BigUint::from(17u32)),
            encode_number(&BigUint::from(2753u32)),
            encode_number(&BigUint::from(61u32)),
            encode_number(&BigUint::from(53u32)),
        );
        let secret = parse_secret_key(&json).unwrap();
        assert_eq!(secret.d, BigUint::from(2753u32));
        assert!(!format!("{:?}", secret).contains("2753"));

        let wrong = json.replace(&encode_number(&BigUint::from(53u32)), "Ow");
        assert!(parse_secret_key(&wrong).is_err());
    }
}
