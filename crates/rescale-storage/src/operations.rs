//! High-level storage operations.

use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::error::StorageResult;
use crate::store::ObjectStore;

/// Default lifetime of output URLs.
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(300);

/// Key of a transcoded output.
pub fn output_key(job_id: &str, resolution: &str) -> String {
    format!("processed/{}/{}.mp4", job_id, resolution)
}

/// Upload an encoded resolution and return a fetchable URL for it.
pub async fn publish_output(
    store: &dyn ObjectStore,
    local: &Path,
    job_id: &str,
    resolution: &str,
    ttl: Duration,
) -> StorageResult<String> {
    let key = output_key(job_id, resolution);
    store.upload(local, &key).await?;
    let url = store.fetchable_url(&key, ttl).await?;
    info!(job_id, resolution, key = %key, "Published output");
    Ok(url)
}
