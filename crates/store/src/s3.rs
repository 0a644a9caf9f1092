//! Amazon S3 backend.
//!
//! Versions are S3 ETags. Conditional writes use `If-None-Match: *` and
//! `If-Match`, so a lost race surfaces as HTTP 412 and becomes a
//! [`StoreErrorCode::Conflict`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dormancy::{ObjectStore, ObjectVersion, Precondition, StoreError, StoreErrorCode, VersionedObject};
use reqwest::header::{AUTHORIZATION, ETAG};
use reqwest::{Method, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::sigv4::{self, AwsCredentials, CanonicalRequest, AMZ_DATE_FORMAT};

/// Region used when neither `AWS_REGION` nor `AWS_DEFAULT_REGION` is set.
pub const DEFAULT_REGION: &str = "eu-west-2";

#[derive(Debug, Error)]
pub enum S3ConfigError {
    #[error("environment variable {0} is not set")]
    MissingVariable(&'static str),

    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

impl AwsCredentials {
    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self, S3ConfigError> {
        let var = |name: &'static str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or(S3ConfigError::MissingVariable(name))
        };
        Ok(Self {
            access_key_id: var("AWS_ACCESS_KEY_ID")?,
            secret_access_key: var("AWS_SECRET_ACCESS_KEY")?,
            session_token: var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

/// The region from the environment, or [`DEFAULT_REGION`].
pub fn region_from_env() -> String {
    ["AWS_REGION", "AWS_DEFAULT_REGION"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

/// One S3 bucket.
#[derive(Debug, Clone)]
pub struct S3Store {
    http: reqwest::Client,
    endpoint: String,
    host: String,
    bucket: String,
    region: String,
    credentials: AwsCredentials,
    path_style: bool,
}

impl S3Store {
    /// Virtual-hosted access to `bucket` on AWS.
    pub fn new(
        bucket: &str,
        region: &str,
        credentials: AwsCredentials,
    ) -> Result<Self, S3ConfigError> {
        let endpoint = format!("https://{bucket}.s3.{region}.amazonaws.com");
        let mut store = Self::with_endpoint(&endpoint, bucket, region, credentials)?;
        store.path_style = false;
        Ok(store)
    }

    /// Path-style access through an S3-compatible `endpoint`
    /// (`scheme://host[:port]`).
    pub fn with_endpoint(
        endpoint: &str,
        bucket: &str,
        region: &str,
        credentials: AwsCredentials,
    ) -> Result<Self, S3ConfigError> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let host = endpoint
            .strip_prefix("https://")
            .or_else(|| endpoint.strip_prefix("http://"))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .ok_or_else(|| S3ConfigError::InvalidEndpoint(endpoint.clone()))?
            .to_string();
        let http = reqwest::Client::builder()
            .user_agent("dormant-users/1.0")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            host,
            bucket: bucket.to_string(),
            region: region.to_string(),
            credentials,
            path_style: true,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_path(&self, key: &str) -> String {
        let key = sigv4::encode_key(key);
        if self.path_style {
            format!("/{}/{key}", sigv4::encode_key(&self.bucket))
        } else {
            format!("/{key}")
        }
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        body: Option<Vec<u8>>,
        conditions: &[(&'static str, String)],
    ) -> Result<Response, StoreError> {
        let path = self.object_path(key);
        let now = Utc::now();
        let payload_hash = sigv4::sha256_hex(body.as_deref().unwrap_or_default());

        let mut headers = BTreeMap::from([
            ("host".to_string(), self.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), now.format(AMZ_DATE_FORMAT).to_string()),
        ]);
        if let Some(token) = &self.credentials.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }
        for (name, value) in conditions {
            headers.insert((*name).to_string(), value.clone());
        }

        let request = CanonicalRequest {
            method: method.as_str(),
            path: &path,
            query: "",
            headers: &headers,
            payload_hash: &payload_hash,
        };
        let authorization = sigv4::authorization(&self.credentials, &self.region, now, &request)
            .map_err(|e| StoreError::new(StoreErrorCode::Rejected, key, e.to_string()))?;

        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.endpoint))
            .header(AUTHORIZATION, authorization);
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        builder
            .send()
            .await
            .map_err(|e| StoreError::new(StoreErrorCode::Network, key, e.to_string()))
    }
}

fn status_error(key: &str, operation: &str, status: StatusCode) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => StoreError::not_found(key),
        StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
            StoreError::conflict(key, format!("{operation} precondition failed ({status})"))
        }
        s if s.is_client_error() => StoreError::new(
            StoreErrorCode::Rejected,
            key,
            format!("s3 {operation} rejected: {status}"),
        ),
        _ => StoreError::new(
            StoreErrorCode::Network,
            key,
            format!("s3 {operation} failed: {status}"),
        ),
    }
}

fn etag(key: &str, response: &Response) -> Result<ObjectVersion, StoreError> {
    response
        .headers()
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .map(ObjectVersion::new)
        .ok_or_else(|| StoreError::new(StoreErrorCode::Network, key, "response has no ETag"))
}

fn condition_headers(precondition: &Precondition) -> Vec<(&'static str, String)> {
    match precondition {
        Precondition::None => Vec::new(),
        Precondition::MustNotExist => vec![("if-none-match", "*".to_string())],
        Precondition::MatchVersion(version) => vec![("if-match", version.as_str().to_string())],
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> Result<VersionedObject, StoreError> {
        let response = self.send(Method::GET, key, None, &[]).await?;
        if !response.status().is_success() {
            return Err(status_error(key, "get", response.status()));
        }
        let version = etag(key, &response)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StoreError::new(StoreErrorCode::Network, key, e.to_string()))?;
        debug!(%version, size = bytes.len(), "Object read");
        Ok(VersionedObject {
            bytes: bytes.to_vec(),
            version,
        })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn version(&self, key: &str) -> Result<Option<ObjectVersion>, StoreError> {
        let response = self.send(Method::HEAD, key, None, &[]).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => etag(key, &response).map(Some),
            s => Err(status_error(key, "head", s)),
        }
    }

    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, size = bytes.len()))]
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        precondition: Precondition,
    ) -> Result<ObjectVersion, StoreError> {
        let conditions = condition_headers(&precondition);
        let response = self.send(Method::PUT, key, Some(bytes), &conditions).await?;
        if !response.status().is_success() {
            return Err(status_error(key, "put", response.status()));
        }
        let version = etag(key, &response)?;
        debug!(%version, "Object written");
        Ok(version)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete(&self, key: &str, precondition: Precondition) -> Result<(), StoreError> {
        if precondition == Precondition::MustNotExist {
            return match self.version(key).await? {
                Some(_) => Err(StoreError::conflict(key, "object exists")),
                None => Ok(()),
            };
        }
        let conditional = precondition != Precondition::None;
        let conditions = condition_headers(&precondition);
        let response = self.send(Method::DELETE, key, None, &conditions).await?;
        match response.status() {
            s if s.is_success() => {
                debug!("Object deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND if !conditional => Ok(()),
            StatusCode::NOT_FOUND => Err(StoreError::conflict(key, "object no longer exists")),
            s => Err(status_error(key, "delete", s)),
        }
    }
}
