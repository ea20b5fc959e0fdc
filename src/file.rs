use std::path::Path;

use serde::Deserialize;
use tracing::{error, info};

use crate::download::video::StreamDownloader;
use crate::error::{Error, Result};
use crate::mux::Muxer;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJob {
    pub manifest_url: String,
    /// position or label, as accepted by [`crate::Video::select`]
    pub resolution: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
}

pub fn read_jobs(file: &Path) -> Result<Vec<DownloadJob>> {
    let reader = std::fs::File::open(file)
        .map(std::io::BufReader::new)
        .map_err(|err| Error::io(file, err))?;

    serde_json::from_reader(reader).map_err(|source| Error::Json {
        path: file.to_path_buf(),
        source,
    })
}

/// Runs every job in `file` in order. A failing job is logged and skipped.
pub async fn download_jobs<M: Muxer>(
    file: &Path,
    downloader: &StreamDownloader<M>,
    dry_run: bool,
) -> Result<BatchSummary> {
    let jobs = read_jobs(file)?;
    let mut summary = BatchSummary::default();

    for job in jobs {
        info!(url = %job.manifest_url, resolution = %job.resolution, "starting job");

        match run_job(&job, downloader, dry_run).await {
            Ok(()) => {
                summary.completed += 1;
                info!(url = %job.manifest_url, "finished job");
            }
            Err(err) => {
                summary.failed += 1;
                error!(url = %job.manifest_url, error = %err, "job failed");
            }
        }
    }

    info!(
        completed = summary.completed,
        failed = summary.failed,
        "finished reading {}",
        file.display()
    );
    Ok(summary)
}

async fn run_job<M: Muxer>(
    job: &DownloadJob,
    downloader: &StreamDownloader<M>,
    dry_run: bool,
) -> Result<()> {
    let video = downloader.load(&job.manifest_url).await?;
    let variant = video.select(&job.resolution)?;
    downloader.download(&video, variant, dry_run).await?;
    Ok(())
}
