//! AWS S3 binding (feature `s3-native`)
//!
//! Wraps the async `aws-sdk-s3` client behind the blocking [`RemoteProvider`]
//! surface. The provider owns a multi-threaded Tokio runtime; every call is a
//! `block_on`, so engine worker threads can share one provider.

use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client as AwsS3Client;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

use super::{
    ListPage, ObjectHead, PaginationCursor, ProviderError, ProviderResult, RemoteProvider,
    DEFAULT_PROVIDER_CAP,
};

/// Connection settings for an S3 bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,

    /// AWS region; the default provider chain is used when absent
    pub region: Option<String>,

    /// Custom endpoint URL for S3-compatible services (MinIO, LocalStack)
    pub endpoint: Option<String>,

    /// Explicit credentials; the AWS credential chain is used when absent
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,

    /// Path-style addressing, required by most S3-compatible services
    pub force_path_style: bool,

    /// Per-operation timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            force_path_style: false,
            timeout_seconds: 300,
        }
    }
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ProviderResult<()> {
        if self.bucket.is_empty() {
            return Err(ProviderError::BucketNotFound(
                "bucket name must not be empty".to_string(),
            ));
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(ProviderError::AccessDenied(
                "access_key and secret_key must be set together".to_string(),
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(ProviderError::Service {
                code: "InvalidConfiguration".to_string(),
                message: "timeout_seconds must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// S3 bucket binding
#[derive(Clone)]
pub struct S3Provider {
    client: AwsS3Client,
    bucket: String,
    runtime: Arc<Runtime>,
}

impl S3Provider {
    /// Build the SDK client. No request is sent; reachability is probed by
    /// the connection through [`RemoteProvider::head_bucket`].
    pub fn new(config: S3Config) -> ProviderResult<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("orbit-bucket-s3")
            .build()?;
        let client = runtime.block_on(build_client(&config));
        Ok(Self {
            client,
            bucket: config.bucket,
            runtime: Arc::new(runtime),
        })
    }
}

async fn build_client(config: &S3Config) -> AwsS3Client {
    let region_provider = match &config.region {
        Some(region) => RegionProviderChain::first_try(Region::new(region.clone())),
        None => RegionProviderChain::default_provider(),
    };
    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);

    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        loader = loader.credentials_provider(Credentials::new(
            access_key,
            secret_key,
            config.session_token.clone(),
            None,
            "orbit-bucket-explicit",
        ));
    }

    let shared = loader.load().await;
    let mut builder = aws_sdk_s3::config::Builder::from(&shared);
    if let Some(endpoint) = &config.endpoint {
        builder = builder.endpoint_url(endpoint);
    }
    if config.force_path_style {
        builder = builder.force_path_style(true);
    }
    builder = builder.timeout_config(
        aws_sdk_s3::config::timeout::TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.timeout_seconds))
            .build(),
    );

    AwsS3Client::from_conf(builder.build())
}

/// Map an SDK failure; `missing` supplies the error for an HTTP 404
fn classify<E>(err: SdkError<E>, missing: impl FnOnce() -> ProviderError) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    match (&err, status) {
        (SdkError::DispatchFailure(_) | SdkError::TimeoutError(_), _) => {
            ProviderError::Network(DisplayErrorContext(&err).to_string())
        }
        (_, Some(404)) => missing(),
        (_, Some(403)) => {
            ProviderError::AccessDenied(err.message().unwrap_or("Forbidden").to_string())
        }
        _ => match err.code() {
            Some(code) => ProviderError::Service {
                code: code.to_string(),
                message: err.message().unwrap_or_default().to_string(),
            },
            None => ProviderError::Network(DisplayErrorContext(&err).to_string()),
        },
    }
}

fn build_error(err: impl std::fmt::Display) -> ProviderError {
    ProviderError::Service {
        code: "InvalidRequest".to_string(),
        message: err.to_string(),
    }
}

impl RemoteProvider for S3Provider {
    fn name(&self) -> &str {
        "s3"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn head_bucket(&self) -> ProviderResult<()> {
        self.runtime
            .block_on(self.client.head_bucket().bucket(&self.bucket).send())
            .map_err(|e| classify(e, || ProviderError::BucketNotFound(self.bucket.clone())))?;
        Ok(())
    }

    fn put_object(
        &self,
        key: &str,
        body: &mut dyn Read,
        content_length: u64,
    ) -> ProviderResult<()> {
        let mut data = Vec::with_capacity(content_length as usize);
        body.read_to_end(&mut data)?;

        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .content_length(data.len() as i64)
                    .body(ByteStream::from(data))
                    .send(),
            )
            .map_err(|e| classify(e, || ProviderError::BucketNotFound(self.bucket.clone())))?;
        Ok(())
    }

    fn get_object(&self, key: &str, sink: &mut dyn Write) -> ProviderResult<u64> {
        self.runtime.block_on(async {
            let response = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| classify(e, || ProviderError::not_found(key)))?;

            let mut stream = response.body;
            let mut written = 0u64;
            while let Some(chunk) = stream
                .try_next()
                .await
                .map_err(|e| ProviderError::Network(format!("Failed to read body: {}", e)))?
            {
                sink.write_all(&chunk)?;
                written += chunk.len() as u64;
            }
            sink.flush()?;
            Ok::<u64, ProviderError>(written)
        })
    }

    fn head_object(&self, key: &str) -> ProviderResult<ObjectHead> {
        let response = self
            .runtime
            .block_on(
                self.client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send(),
            )
            .map_err(|e| classify(e, || ProviderError::not_found(key)))?;
        Ok(ObjectHead {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0).max(0) as u64,
        })
    }

    fn list_page(
        &self,
        prefix: &str,
        cursor: Option<&PaginationCursor>,
        max_keys: usize,
    ) -> ProviderResult<ListPage> {
        let limit = max_keys.clamp(1, DEFAULT_PROVIDER_CAP);
        let response = self
            .runtime
            .block_on(
                self.client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(prefix)
                    .max_keys(limit as i32)
                    .set_continuation_token(cursor.map(|c| c.token().to_string()))
                    .send(),
            )
            .map_err(|e| classify(e, || ProviderError::BucketNotFound(self.bucket.clone())))?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();
        let next = response
            .next_continuation_token()
            .map(PaginationCursor::new);
        Ok(ListPage { keys, next })
    }

    fn delete_object(&self, key: &str) -> ProviderResult<()> {
        // S3 answers 204 whether or not the key existed
        self.runtime
            .block_on(
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send(),
            )
            .map_err(|e| classify(e, || ProviderError::BucketNotFound(self.bucket.clone())))?;
        Ok(())
    }

    fn delete_objects(&self, keys: &[String]) -> ProviderResult<()> {
        let identifiers = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build().map_err(build_error))
            .collect::<ProviderResult<Vec<_>>>()?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(build_error)?;

        let response = self
            .runtime
            .block_on(
                self.client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete)
                    .send(),
            )
            .map_err(|e| classify(e, || ProviderError::BucketNotFound(self.bucket.clone())))?;

        // Quiet mode only reports the keys that failed
        if let Some(failed) = response.errors().first() {
            return Err(ProviderError::Service {
                code: failed.code().unwrap_or("Unknown").to_string(),
                message: format!(
                    "{} of {} keys not deleted; first: {}: {}",
                    response.errors().len(),
                    keys.len(),
                    failed.key().unwrap_or_default(),
                    failed.message().unwrap_or_default()
                ),
            });
        }
        Ok(())
    }
}
