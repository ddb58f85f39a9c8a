use common::config::ObjectStoreSettings;
use common::{Error, Result};
use datafusion::prelude::SessionContext;
use object_store::aws::AmazonS3Builder;
use std::sync::Arc;
use tracing::debug;
use url::Url;

const S3_SCHEME: &str = "s3://";

pub fn is_s3_path(path: &str) -> bool {
    path.starts_with(S3_SCHEME)
}

/// Registers an S3/MinIO object store for the bucket of `path` so DataFusion
/// can resolve `s3://` table locations. Local paths are left alone.
pub fn register_object_store(
    ctx: &SessionContext,
    path: &str,
    settings: Option<&ObjectStoreSettings>,
) -> Result<()> {
    if !is_s3_path(path) {
        return Ok(());
    }

    let url = Url::parse(path)?;
    let bucket = url
        .host_str()
        .ok_or_else(|| Error::InvalidUri(format!("{} has no bucket", path)))?;

    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
    if let Some(settings) = settings {
        builder = builder
            .with_region(&settings.region)
            .with_access_key_id(&settings.access_key)
            .with_secret_access_key(&settings.secret_key)
            .with_endpoint(&settings.endpoint)
            .with_allow_http(true);
    }
    let store = builder.build()?;

    let base = Url::parse(&format!("{}{}", S3_SCHEME, bucket))?;
    ctx.runtime_env().register_object_store(&base, Arc::new(store));
    debug!(bucket, "Registered object store");
    Ok(())
}
