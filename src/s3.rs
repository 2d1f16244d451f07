//! Signed read access to the documentation bucket.
//!
//! Document builds are published to an S3 bucket; each edition carries a
//! metadata JSON file that the refresh pipeline reads. Requests are signed
//! with [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html)
//! using only `hmac` + `sha2`.
//!
//! # Configuration
//!
//! ```toml
//! [s3]
//! region = "us-west-1"
//! # bucket = "spherex-docs"                  # default: the LTD org's bucket
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! metadata_key = "{slug}/v/__main/metadata.json"
//! ```
//!
//! Credentials come from `PORTAL_AWS_ACCESS_KEY_ID` and
//! `PORTAL_AWS_ACCESS_KEY_SECRET`.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::S3Config;
use crate::error::MetadataError;
use crate::lander::LanderMetadata;

type HmacSha256 = Hmac<Sha256>;

/// Bucket used when neither the config nor the LTD organization names one.
pub const DEFAULT_BUCKET: &str = "spherex-docs";

const UNSIGNED_EMPTY_PAYLOAD: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Static AWS credentials.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

impl AwsCredentials {
    pub fn from_config(s3: &S3Config) -> Result<Self> {
        match (&s3.access_key_id, &s3.secret_access_key) {
            (Some(id), Some(secret)) => Ok(Self {
                access_key_id: id.clone(),
                secret_access_key: secret.clone(),
            }),
            _ => Err(anyhow!(
                "PORTAL_AWS_ACCESS_KEY_ID and PORTAL_AWS_ACCESS_KEY_SECRET are needed to read document metadata"
            )),
        }
    }
}

/// A SigV4 request signer for one region and service.
pub struct SigV4Signer {
    credentials: AwsCredentials,
    region: String,
    service: String,
}

impl SigV4Signer {
    pub fn new(credentials: AwsCredentials, region: &str, service: &str) -> Self {
        Self {
            credentials,
            region: region.to_string(),
            service: service.to_string(),
        }
    }

    /// Sign a bodiless `GET` and return the headers to send.
    ///
    /// `canonical_uri` must already be URI-encoded. `extra_headers` are
    /// included in the signature (names lowercase).
    pub fn sign_get(
        &self,
        host: &str,
        canonical_uri: &str,
        extra_headers: &[(&str, &str)],
        now: DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers: Vec<(String, String)> = vec![
            ("host".to_string(), host.to_string()),
            (
                "x-amz-content-sha256".to_string(),
                UNSIGNED_EMPTY_PAYLOAD.to_string(),
            ),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        for (k, v) in extra_headers {
            headers.push((k.to_ascii_lowercase(), v.trim().to_string()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "GET\n{}\n\n{}\n{}\n{}",
            canonical_uri, canonical_headers, signed_headers, UNSIGNED_EMPTY_PAYLOAD
        );

        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.credentials.secret_access_key,
            &date_stamp,
            &self.region,
            &self.service,
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.credentials.access_key_id, credential_scope, signed_headers, signature
        );

        // `host` is set by the HTTP client itself.
        let mut out: Vec<(String, String)> =
            headers.into_iter().filter(|(k, _)| k != "host").collect();
        out.push(("authorization".to_string(), authorization));
        out
    }
}

/// Read-only handle on the documentation bucket.
pub struct Bucket {
    name: String,
    endpoint_url: Option<String>,
    region: String,
    metadata_key: String,
    signer: SigV4Signer,
    client: reqwest::Client,
}

impl Bucket {
    pub fn new(
        name: &str,
        s3: &S3Config,
        credentials: AwsCredentials,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.to_string(),
            endpoint_url: s3.endpoint_url.clone(),
            region: s3.region.clone(),
            metadata_key: s3.metadata_key.clone(),
            signer: SigV4Signer::new(credentials, &s3.region, "s3"),
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host name requests are signed for.
    ///
    /// With a custom endpoint (MinIO, LocalStack) path-style addressing is
    /// used, so the bucket goes into the path instead.
    fn host(&self) -> String {
        match &self.endpoint_url {
            Some(endpoint) => endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string(),
            None => format!("{}.s3.{}.amazonaws.com", self.name, self.region),
        }
    }

    fn scheme(&self) -> &str {
        match &self.endpoint_url {
            Some(endpoint) if endpoint.starts_with("http://") => "http",
            _ => "https",
        }
    }

    fn canonical_uri(&self, key: &str) -> String {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match &self.endpoint_url {
            Some(_) => format!("/{}/{}", uri_encode(&self.name), encoded_key),
            None => format!("/{}", encoded_key),
        }
    }

    /// Object key of a project's metadata file.
    pub fn metadata_key_for(&self, slug: &str) -> String {
        self.metadata_key.replace("{slug}", slug)
    }

    /// Fetch an object with a signed `GET`.
    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>, MetadataError> {
        let host = self.host();
        let canonical_uri = self.canonical_uri(key);
        let url = format!("{}://{}{}", self.scheme(), host, canonical_uri);

        let mut req = self.client.get(&url);
        for (name, value) in self.signer.sign_get(&host, &canonical_uri, &[], Utc::now()) {
            req = req.header(name, value);
        }

        let resp = req.send().await.map_err(|e| MetadataError::Fetch {
            key: key.to_string(),
            source: anyhow!("s3://{}/{}: {}", self.name, key, e),
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MetadataError::NotFound {
                key: key.to_string(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MetadataError::Fetch {
                key: key.to_string(),
                source: anyhow!(
                    "S3 GetObject failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                ),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| MetadataError::Fetch {
            key: key.to_string(),
            source: e.into(),
        })?;
        Ok(bytes.to_vec())
    }

    /// Fetch and parse a project's published metadata.
    pub async fn get_lander_metadata(&self, slug: &str) -> Result<LanderMetadata, MetadataError> {
        let key = self.metadata_key_for(slug);
        let bytes = self.get_object(&key).await?;
        LanderMetadata::from_json(&key, &bytes)
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the SigV4 signing key.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything but `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}
