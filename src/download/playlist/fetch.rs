use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::download::playlist::manifest::SegmentRef;
use crate::download::playlist::segment::{
    segment_url, NamingPolicy, ResolvedSegment, SegmentNaming, TrackLayout,
};
use crate::download::{DownloadClient, FileTransfer};
use crate::error::{Error, Result};

#[derive(Debug)]
pub enum DownloadOutcome {
    Success(PathBuf),
    Failure { url: String, cause: Error },
}

struct Progress {
    finished: AtomicUsize,
    total: usize,
}

impl Progress {
    fn finished(&self, segment: &ResolvedSegment, transfer: FileTransfer) {
        let finished = self.finished.fetch_add(1, Ordering::Relaxed) + 1;

        debug!(
            index = segment.sequence_index,
            path = %segment.local_path.display(),
            ?transfer,
            "segment finished"
        );

        if finished == self.total || finished % 25 == 0 {
            info!(
                "{:width$} / {:width$} segs ({:5.2}%)",
                finished,
                self.total,
                (finished as f64 / self.total as f64) * 100.0,
                width = self.total.to_string().len()
            );
        }
    }
}

/// Downloads the segments of one track with at most `concurrency` transfers in
/// flight, returning local paths in playlist order.
#[derive(Clone)]
pub struct SegmentFetcher {
    client: DownloadClient,
    naming: Arc<dyn NamingPolicy>,
    concurrency: usize,
}

impl SegmentFetcher {
    pub fn new(client: DownloadClient, concurrency: usize) -> Self {
        Self::with_naming(client, concurrency, Arc::new(SegmentNaming))
    }

    pub fn with_naming(
        client: DownloadClient,
        concurrency: usize,
        naming: Arc<dyn NamingPolicy>,
    ) -> Self {
        Self {
            client,
            naming,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Resolves every reference in order. Fails on the first name the naming
    /// policy does not recognize.
    ///
    /// Distinct URLs never share a local path: a name already taken by another
    /// URL gets a `_<n>` suffix. A repeated URL resolves to the same path.
    pub fn resolve(
        &self,
        base_url: &str,
        segments: &[SegmentRef],
        layout: &TrackLayout,
    ) -> Result<Vec<ResolvedSegment>> {
        let mut owners: HashMap<PathBuf, String> = HashMap::new();
        let mut resolved = Vec::with_capacity(segments.len());

        for segment in segments {
            let absolute_url = segment_url(base_url, &segment.raw_uri);
            let (local_name, kind) = self.naming.classify(&absolute_url)?;
            let local_path = claim_path(&mut owners, layout.segment_path(&local_name), &absolute_url);

            resolved.push(ResolvedSegment {
                sequence_index: segment.sequence_index,
                absolute_url,
                local_path,
                kind,
            });
        }

        Ok(resolved)
    }

    pub async fn fetch(
        &self,
        base_url: &str,
        segments: &[SegmentRef],
        layout: &TrackLayout,
        dry_run: bool,
    ) -> Result<Vec<PathBuf>> {
        let resolved = self.resolve(base_url, segments, layout)?;
        let paths = resolved
            .iter()
            .map(|segment| segment.local_path.clone())
            .collect::<Vec<_>>();

        if dry_run {
            debug!(segments = paths.len(), "dry run, nothing transferred");
            return Ok(paths);
        }

        info!(
            track = %layout.track,
            resolution = %layout.resolution,
            segments = resolved.len(),
            parallel = self.concurrency,
            "downloading segments"
        );

        // a repeated URL is transferred once
        let mut seen = HashSet::new();
        let unique = resolved
            .into_iter()
            .filter(|segment| seen.insert(segment.local_path.clone()))
            .collect::<Vec<_>>();

        let outcomes = self.download_all(unique).await;

        let first_failure = outcomes.into_iter().find_map(|outcome| match outcome {
            DownloadOutcome::Success(_) => None,
            DownloadOutcome::Failure { url, cause } => Some((url, cause)),
        });

        if let Some((url, cause)) = first_failure {
            error!(%url, error = %cause, "segment download failed");
            return Err(Error::DownloadFailed {
                url,
                source: Box::new(cause),
            });
        }

        Ok(paths)
    }

    /// One outcome per segment, index-aligned with `segments`. Every spawned
    /// transfer is joined before this returns.
    async fn download_all(&self, segments: Vec<ResolvedSegment>) -> Vec<DownloadOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let progress = Arc::new(Progress {
            finished: AtomicUsize::new(0),
            total: segments.len(),
        });

        let tasks = segments
            .iter()
            .cloned()
            .map(|segment| {
                let client = self.client.clone();
                let semaphore = Arc::clone(&semaphore);
                let progress = Arc::clone(&progress);

                tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return task_failure(segment, "download pool closed".to_string()),
                    };

                    match client
                        .download_to_file(&segment.absolute_url, &segment.local_path)
                        .await
                    {
                        Ok(transfer) => {
                            progress.finished(&segment, transfer);
                            DownloadOutcome::Success(segment.local_path)
                        }
                        Err(cause) => DownloadOutcome::Failure {
                            url: segment.absolute_url,
                            cause,
                        },
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (segment, task) in segments.into_iter().zip(tasks) {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(err) => task_failure(segment, format!("download task failed: {err}")),
            };
            outcomes.push(outcome);
        }

        outcomes
    }
}

/// A transfer that ended without a response, reported against its local path.
fn task_failure(segment: ResolvedSegment, reason: String) -> DownloadOutcome {
    DownloadOutcome::Failure {
        url: segment.absolute_url,
        cause: Error::io(segment.local_path, std::io::Error::other(reason)),
    }
}

/// `path`, or the first free `<stem>_<n>.<ext>` when another URL owns it.
fn claim_path(owners: &mut HashMap<PathBuf, String>, path: PathBuf, url: &str) -> PathBuf {
    let mut candidate = path.clone();
    let mut suffix = 1;

    loop {
        match owners.get(&candidate) {
            None => {
                owners.insert(candidate.clone(), url.to_string());
                return candidate;
            }
            Some(owner) if owner == url => return candidate,
            Some(_) => {
                candidate = numbered(&path, suffix);
                suffix += 1;
            }
        }
    }
}

fn numbered(path: &Path, suffix: usize) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{suffix}"),
    };
    debug!(path = %path.display(), %name, "segment name taken by another URL");
    path.with_file_name(name)
}
