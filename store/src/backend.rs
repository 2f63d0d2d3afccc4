use opendal::{services, Operator};

use crate::error::StoreError;

/// Which backend hosts the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Local filesystem rooted at the storage path.
    Fs,
    /// S3-compatible object store; the first path segment is the bucket,
    /// the remainder a key prefix.
    S3,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fs" => Ok(BackendKind::Fs),
            "s3" => Ok(BackendKind::S3),
            other => Err(format!(
                "unknown storage backend {other:?}; valid backends are \"fs\" and \"s3\", \
                 e.g. --storage-backend fs --storage-path ./data"
            )),
        }
    }
}

/// Backend selection plus its location and S3 tuning knobs.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Filesystem root, or `bucket[/prefix]` for S3.
    pub path: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// Keep path-style addressing (the default works for most S3-compatible
    /// providers); switch off for AWS virtual-host addressing.
    pub s3_path_style: bool,
}

/// Builds the one [`Operator`] both backends share.
pub fn build_operator(config: &BackendConfig) -> Result<Operator, StoreError> {
    if config.path.is_empty() {
        return Err(StoreError::Config(
            "storage path must not be empty; pass e.g. --storage-path ./data (fs) \
             or --storage-path my-bucket/quarry (s3)"
            .to_owned(),
        ));
    }
    match config.kind {
        BackendKind::Fs => {
            let builder = services::Fs::default().root(&config.path);
            Ok(Operator::new(builder)
                .map_err(|err| StoreError::Config(err.to_string()))?
                .finish())
        }
        BackendKind::S3 => {
            let (bucket, prefix) = match config.path.split_once('/') {
                Some((bucket, prefix)) => (bucket, prefix),
                None => (config.path.as_str(), ""),
            };
            if bucket.is_empty() {
                return Err(StoreError::Config(
                    "s3 storage path must start with a bucket name, \
                     e.g. --storage-path my-bucket/quarry"
                        .to_owned(),
                ));
            }
            let mut builder = services::S3::default().bucket(bucket);
            if !prefix.is_empty() {
                builder = builder.root(prefix);
            }
            if let Some(region) = &config.region {
                builder = builder.region(region);
            }
            if let Some(endpoint) = &config.endpoint {
                builder = builder.endpoint(endpoint);
            }
            if !config.s3_path_style {
                builder = builder.enable_virtual_host_style();
            }
            Ok(Operator::new(builder)
                .map_err(|err| StoreError::Config(err.to_string()))?
                .finish())
        }
    }
}
