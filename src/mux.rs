//! Turning downloaded segments into playable files.
//!
//! The heavy lifting is done by an external tool behind the [`Muxer`] trait;
//! [`Concatenator`] only enforces ordering, arity and cleanup.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_MUX_TIMEOUT: Duration = Duration::from_secs(600);

#[async_trait]
pub trait Muxer: Send + Sync {
    /// Joins `inputs`, in the given order, into `output`.
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    /// Combines a video-only and an audio-only file into `output`.
    async fn combine(&self, video: &Path, audio: &Path, output: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    program: PathBuf,
    timeout: Duration,
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new(PathBuf::from("ffmpeg"))
    }
}

impl FfmpegMuxer {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            timeout: DEFAULT_MUX_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    async fn run(&self, args: &[String]) -> Result<()> {
        let tool = self.tool_name();
        debug!(%tool, ?args, "running muxer");

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| Error::mux(&tool, format!("failed to spawn: {err}")))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(Error::mux(&tool, format!("I/O error waiting for process: {err}")))
            }
            Err(_) => {
                return Err(Error::mux(
                    &tool,
                    format!("timed out after {:?}", self.timeout),
                ))
            }
        };

        if !output.status.success() {
            return Err(Error::mux(
                &tool,
                format!(
                    "exited with status {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    /// Segments of a stream are not standalone files (fragmented mp4 media
    /// segments depend on the init segment), so they are stitched byte for
    /// byte first and the stitched stream is remuxed.
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let stitched = output.with_extension("stitched");

        let result = match stitch(inputs, &stitched).await {
            Ok(()) => {
                self.run(&[
                    "-y".to_string(),
                    "-loglevel".to_string(),
                    "error".to_string(),
                    "-i".to_string(),
                    stitched.to_string_lossy().to_string(),
                    "-c".to_string(),
                    "copy".to_string(),
                    output.to_string_lossy().to_string(),
                ])
                .await
            }
            Err(err) => Err(err),
        };

        let removed = match tokio::fs::remove_file(&stitched).await {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(Error::io(&stitched, err)),
            _ => Ok(()),
        };

        result.and(removed)
    }

    async fn combine(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        self.run(&[
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            video.to_string_lossy().to_string(),
            "-i".to_string(),
            audio.to_string_lossy().to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            output.to_string_lossy().to_string(),
        ])
        .await
    }
}

async fn stitch(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let mut file = tokio::fs::File::create(output)
        .await
        .map_err(|err| Error::io(output, err))?;

    for input in inputs {
        let mut segment = tokio::fs::File::open(input)
            .await
            .map_err(|err| Error::io(input, err))?;
        tokio::io::copy(&mut segment, &mut file)
            .await
            .map_err(|err| Error::io(output, err))?;
    }

    file.flush().await.map_err(|err| Error::io(output, err))
}

pub struct Concatenator<M> {
    muxer: M,
}

impl<M: Muxer> Concatenator<M> {
    pub fn new(muxer: M) -> Self {
        Self { muxer }
    }

    pub fn muxer(&self) -> &M {
        &self.muxer
    }

    pub async fn merge(&self, ordered_paths: &[PathBuf], output: &Path) -> Result<PathBuf> {
        if ordered_paths.is_empty() {
            return Err(Error::mux("concat", "no segments to merge"));
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| Error::io(parent, err))?;
        }

        info!(
            segments = ordered_paths.len(),
            output = %output.display(),
            "merging segments"
        );
        self.muxer.concat(ordered_paths, output).await?;

        Ok(output.to_path_buf())
    }

    /// Combines exactly two intermediates, video first, and removes them once
    /// the combined file exists.
    pub async fn combine(&self, artifacts: &[PathBuf], output: &Path) -> Result<PathBuf> {
        let [video, audio] = artifacts else {
            return Err(Error::UnsupportedTrackCount {
                count: artifacts.len(),
            });
        };

        info!(
            video = %video.display(),
            audio = %audio.display(),
            output = %output.display(),
            "combining audio and video"
        );
        self.muxer.combine(video, audio, output).await?;

        for intermediate in artifacts {
            tokio::fs::remove_file(intermediate)
                .await
                .map_err(|err| Error::io(intermediate, err))?;
        }

        Ok(output.to_path_buf())
    }
}
