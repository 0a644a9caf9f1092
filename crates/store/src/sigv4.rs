//! AWS Signature Version 4 for S3 requests.
//!
//! Only header-based signing is implemented. Callers pass the already
//! URI-encoded path and the full set of headers to sign, lower-cased.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

pub(crate) const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Static AWS credentials.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The parts of an HTTP request that go into the signature.
pub(crate) struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    pub payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    fn signed_headers(&self) -> String {
        self.headers.keys().map(String::as_str).collect::<Vec<_>>().join(";")
    }

    fn render(&self) -> String {
        let headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{name}:{}\n", value.trim()))
            .collect();
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.path,
            self.query,
            headers,
            self.signed_headers(),
            self.payload_hash
        )
    }
}

/// Lower-case hex SHA-256 of `bytes`.
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// URI-encodes each segment of an object key, keeping the separators.
pub(crate) fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(key)?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// The `Authorization` header value for `request` signed at `at`.
pub(crate) fn authorization(
    credentials: &AwsCredentials,
    region: &str,
    at: DateTime<Utc>,
    request: &CanonicalRequest<'_>,
) -> Result<String, InvalidLength> {
    let date = at.format("%Y%m%d").to_string();
    let scope = format!("{date}/{region}/{SERVICE}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{scope}\n{}",
        at.format(AMZ_DATE_FORMAT),
        sha256_hex(request.render().as_bytes())
    );

    let secret = format!("AWS4{}", credentials.secret_access_key);
    let key = hmac(secret.as_bytes(), &date)?;
    let key = hmac(&key, region)?;
    let key = hmac(&key, SERVICE)?;
    let key = hmac(&key, "aws4_request")?;
    let signature = hex::encode(hmac(&key, &string_to_sign)?);

    Ok(format!(
        "{ALGORITHM} Credential={}/{scope},SignedHeaders={},Signature={signature}",
        credentials.access_key_id,
        request.signed_headers()
    ))
}
