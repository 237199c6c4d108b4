use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::client::{HttpError, HttpErrorKind};
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutMode, PutOptions, PutPayload,
    RetryConfig,
};
use prometheus::core::Collector;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::metrics::ObjectMetrics;
use crate::traits::{Backend, UploadOptions};

/// Delay after which a slow upload is hedged with a second request.
pub const DEFAULT_HEDGE_DELAY: Duration = Duration::from_millis(75);

/// `Cache-Control` sent with immutable objects.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=604800, immutable";

/// The subset of object storage the backend needs.
///
/// Kept narrow so tests can interpose latency or failures.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn put(
        &self,
        path: &ObjectPath,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<()>;

    async fn get(&self, path: &ObjectPath) -> object_store::Result<Bytes>;

    async fn delete(&self, path: &ObjectPath) -> object_store::Result<()>;
}

/// [`ObjectClient`] over any `object_store` implementation.
pub struct StoreClient(Arc<dyn ObjectStore>);

impl StoreClient {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self(store)
    }
}

#[async_trait]
impl ObjectClient for StoreClient {
    async fn put(
        &self,
        path: &ObjectPath,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<()> {
        self.0.put_opts(path, payload, opts).await.map(|_| ())
    }

    async fn get(&self, path: &ObjectPath) -> object_store::Result<Bytes> {
        self.0.get(path).await?.bytes().await
    }

    async fn delete(&self, path: &ObjectPath) -> object_store::Result<()> {
        self.0.delete(path).await
    }
}

/// Retry schedule for object storage requests.
///
/// Backoff doubles from `initial_backoff` per attempt, is capped at
/// `max_backoff`, and is fully jittered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the sleep after the given zero-based failed attempt.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_backoff)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_micros() as u64;
        Duration::from_micros(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// S3 error codes worth retrying regardless of status.
const RETRYABLE_CODES: &[&str] = &[
    "SlowDown",
    "InternalError",
    "ServiceUnavailable",
    "RequestTimeout",
    "RequestTimeTooSkewed",
];

/// Classify an object storage error as `(errorcode, retryable)`.
///
/// `Generic` errors are inspected further: transport failures are labelled
/// by their [`HttpErrorKind`], HTTP responses by the S3 `<Code>` or the
/// status. 5xx, 429 and throttling codes are retryable, other 4xx are not.
/// The remaining variants are definite answers from the service.
pub fn classify_error(err: &object_store::Error) -> (String, bool) {
    use object_store::Error as E;
    let (code, retryable) = match err {
        E::Generic { source, .. } => return classify_generic(source.as_ref()),
        E::NotFound { .. } => ("NotFound", false),
        E::AlreadyExists { .. } => ("AlreadyExists", false),
        E::Precondition { .. } => ("Precondition", false),
        E::NotModified { .. } => ("NotModified", false),
        E::PermissionDenied { .. } => ("PermissionDenied", false),
        E::Unauthenticated { .. } => ("Unauthenticated", false),
        E::NotImplemented => ("NotImplemented", false),
        _ => ("Other", false),
    };
    (code.to_string(), retryable)
}

fn classify_generic(source: &(dyn std::error::Error + 'static)) -> (String, bool) {
    let mut text = String::new();
    let mut current = Some(source);
    while let Some(err) = current {
        if let Some(http) = err.downcast_ref::<HttpError>() {
            let kind = http.kind();
            let retryable = matches!(
                kind,
                HttpErrorKind::Connect
                    | HttpErrorKind::Request
                    | HttpErrorKind::Timeout
                    | HttpErrorKind::Interrupted
            );
            return (format!("{kind:?}"), retryable);
        }
        text.push_str(&err.to_string());
        text.push('\n');
        current = err.source();
    }
    classify_response(&text)
}

/// Classify from the rendered error chain of a failed HTTP response.
fn classify_response(text: &str) -> (String, bool) {
    let status = response_status(text);
    let code = s3_error_code(text);
    let retryable_status = status.is_some_and(|s| s >= 500 || s == 429);
    match (code, status) {
        (Some(code), _) => (
            code.to_string(),
            retryable_status || RETRYABLE_CODES.contains(&code),
        ),
        (None, Some(status)) => (status.to_string(), retryable_status),
        (None, None) => ("Generic".to_string(), true),
    }
}

fn response_status(text: &str) -> Option<u16> {
    let (_, rest) = text.split_once("status code: ")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn s3_error_code(text: &str) -> Option<&str> {
    let (_, rest) = text.split_once("<Code>")?;
    let (code, _) = rest.split_once("</Code>")?;
    (!code.is_empty()).then_some(code)
}

/// A conditional write lost to an existing or concurrent write.
fn is_conflict(err: &object_store::Error) -> bool {
    matches!(
        err,
        object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. }
    )
}

/// Final failure of a retried request.
struct Exhausted {
    source: object_store::Error,
    attempts: u32,
}

impl Exhausted {
    fn into_store_error(self, op: &'static str, key: &str) -> StoreError {
        StoreError::Backend {
            op,
            key: key.to_string(),
            attempts: self.attempts,
            source: Box::new(self.source),
        }
    }
}

/// Connection settings for an S3-compatible bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub region: String,
    pub bucket: String,
    /// Custom endpoint for S3-compatible services.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Prepended verbatim to every key.
    #[serde(default)]
    pub key_prefix: String,
}

/// Backend over object storage with retries and hedged uploads.
pub struct ObjectBackend {
    client: Arc<dyn ObjectClient>,
    key_prefix: String,
    retry: RetryPolicy,
    hedge_delay: Duration,
    metrics: ObjectMetrics,
}

impl ObjectBackend {
    pub fn new(client: Arc<dyn ObjectClient>, key_prefix: impl Into<String>) -> StoreResult<Self> {
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
            retry: RetryPolicy::default(),
            hedge_delay: DEFAULT_HEDGE_DELAY,
            metrics: ObjectMetrics::new()?,
        })
    }

    /// Backend for an S3 bucket.
    ///
    /// Credentials come from the environment. The client's own retries are
    /// disabled so every attempt is classified and counted here.
    pub fn s3(config: &S3Config) -> StoreResult<Self> {
        if config.bucket.is_empty() {
            return Err(StoreError::Config("S3 bucket name is empty".into()));
        }
        let mut builder = AmazonS3Builder::from_env()
            .with_region(&config.region)
            .with_bucket_name(&config.bucket)
            .with_conditional_put(S3ConditionalPut::ETagMatch)
            .with_retry(RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            });
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        let store = builder.build().map_err(|e| {
            StoreError::Config(format!("S3 client for bucket {}: {e}", config.bucket))
        })?;
        Self::new(
            Arc::new(StoreClient::new(Arc::new(store))),
            config.key_prefix.clone(),
        )
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_hedge_delay(mut self, delay: Duration) -> Self {
        self.hedge_delay = delay;
        self
    }

    fn object_path(&self, key: &str) -> StoreResult<ObjectPath> {
        let full = format!("{}{}", self.key_prefix, key);
        ObjectPath::parse(&full).map_err(|e| StoreError::InvalidKey {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    async fn with_retries<T, F, Fut>(&self, method: &'static str, op: F) -> Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = object_store::Result<T>>,
    {
        self.with_retries_when(method, |_| false, op).await
    }

    /// Like [`Self::with_retries`], also retrying errors matched by `also`.
    async fn with_retries_when<T, F, Fut>(
        &self,
        method: &'static str,
        also: impl Fn(&object_store::Error) -> bool,
        mut op: F,
    ) -> Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = object_store::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let start = Instant::now();
            let result = op().await;
            let elapsed = start.elapsed().as_secs_f64();

            let err = match result {
                Ok(value) => {
                    self.metrics
                        .request_duration
                        .with_label_values(&[method, "ok"])
                        .observe(elapsed);
                    return Ok(value);
                }
                Err(err) => err,
            };

            let (code, retryable) = classify_error(&err);
            let retryable = retryable || also(&err);
            self.metrics
                .request_duration
                .with_label_values(&[method, code.as_str()])
                .observe(elapsed);
            self.metrics
                .errors
                .with_label_values(&[if retryable { "true" } else { "false" }, code.as_str()])
                .inc();

            if !retryable || attempt >= self.retry.max_attempts {
                return Err(Exhausted {
                    source: err,
                    attempts: attempt,
                });
            }
            let delay = self.retry.backoff(attempt - 1);
            debug!(method, attempt, %code, ?delay, error = %err, "retrying object storage request");
            tokio::time::sleep(delay).await;
        }
    }

    /// Upload, issuing a second request if the first is still running after
    /// the hedge delay. Returns whether the hedge's result was used.
    ///
    /// Two conditional creates can conflict with each other, so a conflict
    /// from one request is only returned once the other has finished too.
    async fn hedged_put(
        &self,
        path: &ObjectPath,
        payload: &PutPayload,
        opts: &PutOptions,
    ) -> (Result<(), Exhausted>, bool) {
        let put = move || {
            self.with_retries("PUT", move || {
                self.client.put(path, payload.clone(), opts.clone())
            })
        };

        let primary = put();
        tokio::pin!(primary);
        tokio::select! {
            result = &mut primary => return (result, false),
            () = tokio::time::sleep(self.hedge_delay) => {}
        }

        self.metrics.hedges.inc();
        debug!(path = %path, delay = ?self.hedge_delay, "hedging slow upload");
        let hedge = put();
        tokio::pin!(hedge);
        let (first, from_hedge) = tokio::select! {
            result = &mut primary => (result, false),
            result = &mut hedge => (result, true),
        };

        let (result, from_hedge) = match first {
            Err(conflict) if is_conflict(&conflict.source) => {
                debug!(path = %path, "upload conflicted, waiting for the other request");
                let second = if from_hedge {
                    primary.await
                } else {
                    hedge.await
                };
                match second {
                    Err(other) if is_conflict(&other.source) => (Err(conflict), from_hedge),
                    second => (second, !from_hedge),
                }
            }
            first => (first, from_hedge),
        };
        if from_hedge {
            self.metrics.hedge_wins.inc();
        }
        (result, from_hedge)
    }
}

fn put_options(opts: &UploadOptions) -> PutOptions {
    let mut attributes = Attributes::new();
    attributes.insert(
        Attribute::ContentType,
        AttributeValue::from(opts.content_type().to_string()),
    );
    if opts.compressed {
        attributes.insert(Attribute::ContentEncoding, AttributeValue::from("gzip"));
    }
    if opts.immutable {
        attributes.insert(
            Attribute::CacheControl,
            AttributeValue::from(IMMUTABLE_CACHE_CONTROL),
        );
    }
    PutOptions {
        mode: if opts.immutable {
            PutMode::Create
        } else {
            PutMode::Overwrite
        },
        attributes,
        ..PutOptions::default()
    }
}

#[async_trait]
impl Backend for ObjectBackend {
    async fn upload(&self, key: &str, data: Bytes, opts: &UploadOptions) -> StoreResult<()> {
        let path = self.object_path(key)?;
        let put_opts = put_options(opts);
        let payload = PutPayload::from(data.clone());
        self.metrics.upload_size.observe(data.len() as f64);

        let start = Instant::now();
        let (result, hedged) = self.hedged_put(&path, &payload, &put_opts).await;
        debug!(
            key,
            size = data.len(),
            compressed = opts.compressed,
            immutable = opts.immutable,
            content_type = opts.content_type(),
            hedged,
            elapsed = ?start.elapsed(),
            ok = result.is_ok(),
            "object PUT"
        );

        match result {
            Ok(()) => Ok(()),
            Err(failed) if opts.immutable && is_conflict(&failed.source) => {
                // A concurrent writer may not be visible yet.
                let not_found = |e: &object_store::Error| {
                    matches!(e, object_store::Error::NotFound { .. })
                };
                let existing = self
                    .with_retries_when("GET", not_found, || self.client.get(&path))
                    .await
                    .map_err(|e| e.into_store_error("fetch", key))?;
                if existing == data {
                    warn!(key, "immutable object already exists with identical content");
                    Ok(())
                } else {
                    Err(StoreError::ContentMismatch {
                        key: key.to_string(),
                    })
                }
            }
            Err(failed) => Err(failed.into_store_error("upload", key)),
        }
    }

    async fn fetch(&self, key: &str) -> StoreResult<Bytes> {
        let path = self.object_path(key)?;
        match self.with_retries("GET", || self.client.get(&path)).await {
            Ok(data) => {
                debug!(key, size = data.len(), "object GET");
                Ok(data)
            }
            Err(failed) if matches!(failed.source, object_store::Error::NotFound { .. }) => {
                Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(failed) => Err(failed.into_store_error("fetch", key)),
        }
    }

    async fn discard(&self, key: &str) -> StoreResult<()> {
        let path = self.object_path(key)?;
        match self.with_retries("DELETE", || self.client.delete(&path)).await {
            Ok(()) => {
                debug!(key, "object DELETE");
                Ok(())
            }
            Err(failed) if matches!(failed.source, object_store::Error::NotFound { .. }) => {
                Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(failed) => Err(failed.into_store_error("discard", key)),
        }
    }

    fn metrics(&self) -> Vec<Box<dyn Collector>> {
        self.metrics.collectors()
    }
}
