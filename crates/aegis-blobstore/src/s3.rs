//! S3-compatible blob store backend
//!
//! Talks to any S3-compatible object store (MinIO, Ceph RGW, AWS) using
//! path-style addressing and AWS Signature V4. Only the four operations
//! the vault needs are implemented: PUT, GET, HEAD, DELETE on a single
//! configured bucket.

use crate::{validate_key, BlobStore, BlobStoreError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Connection settings for an S3-compatible endpoint
#[derive(Clone, Debug)]
pub struct S3Config {
    /// Endpoint base URL, e.g. `http://127.0.0.1:9000`
    pub endpoint: String,
    /// Access key id
    pub access_key: String,
    /// Secret access key
    pub secret_key: String,
    /// Bucket holding all vault objects
    pub bucket: String,
    /// Signing region; S3-compatible stores accept any fixed value
    pub region: String,
}

impl S3Config {
    /// Create a config with the default signing region
    pub fn new(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            bucket: bucket.into(),
            region: "us-east-1".to_string(),
        }
    }
}

/// Blob store backed by an S3-compatible object store
pub struct S3BlobStore {
    client: reqwest::Client,
    config: S3Config,
    host: String,
}

impl S3BlobStore {
    /// Create a store for the configured endpoint and bucket
    pub fn new(config: S3Config) -> Result<Self> {
        let url = reqwest::Url::parse(&config.endpoint)
            .map_err(|e| BlobStoreError::InvalidKey(format!("bad endpoint: {e}")))?;
        let mut host = url
            .host_str()
            .ok_or_else(|| BlobStoreError::InvalidKey("endpoint has no host".to_string()))?
            .to_string();
        if let Some(port) = url.port() {
            host = format!("{host}:{port}");
        }
        Ok(Self {
            client: reqwest::Client::new(),
            config,
            host,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            key
        )
    }

    fn object_path(&self, key: &str) -> String {
        format!("/{}/{}", self.config.bucket, key)
    }

    /// Build the SigV4 `Authorization` header plus the amz headers
    fn sign(&self, method: &str, path: &str, payload_hash: &str) -> Vec<(&'static str, String)> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let datestamp = now.format("%Y%m%d").to_string();

        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
            self.host, payload_hash, amz_date
        );
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";
        let canonical_request = format!(
            "{method}\n{path}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );

        let scope = format!("{}/{}/s3/aws4_request", datestamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(
            format!("AWS4{}", self.config.secret_key).as_bytes(),
            datestamp.as_bytes(),
        );
        let k_region = hmac_sha256(&k_date, self.config.region.as_bytes());
        let k_service = hmac_sha256(&k_region, b"s3");
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.config.access_key, scope, signed_headers, signature
        );

        vec![
            ("authorization", authorization),
            ("x-amz-date", amz_date),
            ("x-amz-content-sha256", payload_hash.to_string()),
        ]
    }

    async fn request(
        &self,
        method: reqwest::Method,
        key: &str,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response> {
        let payload_hash = match &body {
            Some(data) => hex::encode(Sha256::digest(data)),
            None => hex::encode(Sha256::digest(b"")),
        };
        let path = self.object_path(key);
        let headers = self.sign(method.as_str(), &path, &payload_hash);

        let mut req = self.client.request(method, self.object_url(key));
        for (name, value) in headers {
            req = req.header(name, value);
        }
        if let Some(data) = body {
            req = req.body(data);
        }
        Ok(req.send().await?)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn backend_error(key: &str, status: reqwest::StatusCode) -> BlobStoreError {
    if status == reqwest::StatusCode::NOT_FOUND {
        BlobStoreError::NotFound(key.to_string())
    } else {
        BlobStoreError::Backend {
            status: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("object store rejected request")
                .to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        validate_key(key)?;
        let resp = self.request(reqwest::Method::PUT, key, Some(data)).await?;
        if !resp.status().is_success() {
            tracing::warn!(key, status = %resp.status(), "object store PUT failed");
            return Err(backend_error(key, resp.status()));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let resp = self.request(reqwest::Method::GET, key, None).await?;
        if !resp.status().is_success() {
            return Err(backend_error(key, resp.status()));
        }
        Ok(resp.bytes().await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self.request(reqwest::Method::DELETE, key, None).await?;
        // Deleting a missing object is a no-op, matching S3 semantics
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(backend_error(key, resp.status()));
        }
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<u64> {
        let resp = self.request(reqwest::Method::HEAD, key, None).await?;
        if !resp.status().is_success() {
            return Err(backend_error(key, resp.status()));
        }
        resp.headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| BlobStoreError::Backend {
                status: 200,
                message: "missing Content-Length on HEAD".to_string(),
            })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let resp = self.request(reqwest::Method::HEAD, key, None).await?;
        if resp.status().is_success() {
            Ok(true)
        } else if resp.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(backend_error(key, resp.status()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> S3BlobStore {
        S3BlobStore::new(S3Config::new(
            "http://127.0.0.1:9000",
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI",
            "aegis",
        ))
        .unwrap()
    }

    #[test]
    fn test_host_includes_port() {
        let store = test_store();
        assert_eq!(store.host, "127.0.0.1:9000");
    }

    #[test]
    fn test_object_url_layout() {
        let store = test_store();
        assert_eq!(
            store.object_url("ab/cd"),
            "http://127.0.0.1:9000/aegis/ab/cd"
        );
        assert_eq!(store.object_path("ab/cd"), "/aegis/ab/cd");
    }

    #[test]
    fn test_signing_produces_all_headers() {
        let store = test_store();
        let payload_hash = hex::encode(Sha256::digest(b""));
        let headers = store.sign("GET", "/aegis/key", &payload_hash);
        let names: Vec<_> = headers.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["authorization", "x-amz-date", "x-amz-content-sha256"]);
        let auth = &headers[0].1;
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(auth.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
        assert!(auth.contains("Signature="));
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        assert!(S3BlobStore::new(S3Config::new("not a url", "a", "b", "c")).is_err());
    }
}
