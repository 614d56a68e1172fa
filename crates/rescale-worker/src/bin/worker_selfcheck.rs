use std::path::Path;

use anyhow::Context;
use rescale_media::{check_ffmpeg, check_ffprobe, ensure_writable_dir};
use rescale_worker::{QueueBackend, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_media_tools()?;
    ensure_env_present(&required_env()?)?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir(path: &Path) -> anyhow::Result<()> {
    ensure_writable_dir(path)
        .await
        .with_context(|| format!("work dir {} unusable", path.display()))
}

fn ensure_media_tools() -> anyhow::Result<()> {
    let ffmpeg = check_ffmpeg().context("ffmpeg not available")?;
    let ffprobe = check_ffprobe().context("ffprobe not available")?;
    println!(
        "worker-selfcheck: ffmpeg={} ffprobe={}",
        ffmpeg.display(),
        ffprobe.display()
    );
    Ok(())
}

fn required_env() -> anyhow::Result<Vec<&'static str>> {
    let mut vars = Vec::new();
    if QueueBackend::from_env()? == QueueBackend::Redis {
        vars.push("REDIS_URL");
    }
    let storage = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "s3".to_string());
    if storage.eq_ignore_ascii_case("s3") {
        vars.extend(["S3_ACCESS_KEY_ID", "S3_SECRET_ACCESS_KEY", "S3_BUCKET_NAME"]);
    }
    Ok(vars)
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
