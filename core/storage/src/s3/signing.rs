//! AWS Signature Version 4 request signing.
//!
//! Only the header-based variant is implemented. The payload hash is
//! always sent in `x-amz-content-sha256` and signed.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use studiosync_common::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SHA-256 of the empty string.
pub const EMPTY_PAYLOAD_HASH: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Everything except the RFC 3986 unreserved set.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const URI_PATH: &AsciiSet = &URI_COMPONENT.remove(b'/');

/// Percent-encode a path or query component the way SigV4 expects.
pub fn uri_encode(value: &str, encode_slash: bool) -> String {
    let set = if encode_slash { URI_COMPONENT } else { URI_PATH };
    utf8_percent_encode(value, set).to_string()
}

/// Hex SHA-256 of a request body.
pub fn payload_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// `YYYYMMDDTHHMMSSZ`
pub fn amz_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Sorted, encoded `k=v&k=v` form.
pub fn canonical_query_string(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// The parts of an HTTP request that take part in the signature.
#[derive(Debug, Clone)]
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    /// Already URI-encoded absolute path.
    pub uri: &'a str,
    pub query: &'a [(String, String)],
    /// Every header that is sent and signed, `host` included.
    pub headers: &'a [(String, String)],
    pub payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    /// Returns the canonical request text and the signed-headers list.
    pub fn canonicalize(&self) -> (String, String) {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), normalize_value(value)))
            .collect();
        headers.sort();

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect();
        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.uri,
            canonical_query_string(self.query),
            canonical_headers,
            signed_headers,
            self.payload_hash
        );
        (canonical, signed_headers)
    }
}

/// Trim and collapse internal runs of spaces.
fn normalize_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Config(format!("Invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the per-day signing key.
pub fn signing_key(
    secret_access_key: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Zeroizing<Vec<u8>>> {
    let secret = Zeroizing::new(format!("AWS4{}", secret_access_key));
    let k_date = Zeroizing::new(hmac(secret.as_bytes(), date.as_bytes())?);
    let k_region = Zeroizing::new(hmac(&k_date, region.as_bytes())?);
    let k_service = Zeroizing::new(hmac(&k_region, service.as_bytes())?);
    Ok(Zeroizing::new(hmac(&k_service, b"aws4_request")?))
}

/// Signs requests for one set of credentials in one region.
pub struct Signer {
    access_key_id: String,
    secret_access_key: Zeroizing<String>,
    region: String,
    service: String,
}

impl Signer {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: Zeroizing::new(secret_access_key.into()),
            region: region.into(),
            service: "s3".to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Compute the `Authorization` header value. The request headers must
    /// already contain `x-amz-date` matching `timestamp`.
    pub fn authorization(
        &self,
        request: &CanonicalRequest<'_>,
        timestamp: DateTime<Utc>,
    ) -> Result<String> {
        let date = timestamp.format("%Y%m%d").to_string();
        let scope = format!("{}/{}/{}/aws4_request", date, self.region, self.service);

        let (canonical, signed_headers) = request.canonicalize();
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date(timestamp),
            scope,
            payload_hash(canonical.as_bytes())
        );

        let key = signing_key(&self.secret_access_key, &date, &self.region, &self.service)?;
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

        Ok(format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.access_key_id, scope, signed_headers, signature
        ))
    }
}
