#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use stream_downloader::{Muxer, Result};
use tokio::net::TcpListener;
use url::Url;

/// Axum app on a random localhost port, shut down on drop.
pub struct TestServer {
    base_url: Url,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn new(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });

        tokio::spawn(async move {
            server.await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            base_url: Url::parse(&format!("http://{}", addr)).unwrap(),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base_url.join(path).unwrap()
    }

    /// Base URL without the trailing slash, as manifests are resolved against.
    pub fn base(&self) -> String {
        self.base_url.as_str().trim_end_matches('/').to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxCall {
    Concat { inputs: Vec<PathBuf>, output: PathBuf },
    Combine { video: PathBuf, audio: PathBuf, output: PathBuf },
}

/// Records every call and writes plain concatenations instead of running a
/// real muxer.
#[derive(Default)]
pub struct RecordingMuxer {
    calls: Mutex<Vec<MuxCall>>,
}

impl RecordingMuxer {
    pub fn calls(&self) -> Vec<MuxCall> {
        self.calls.lock().unwrap().clone()
    }
}

fn concat_files(inputs: &[&Path], output: &Path) {
    let mut body = Vec::new();
    for input in inputs {
        body.extend(std::fs::read(input).unwrap());
    }
    std::fs::write(output, body).unwrap();
}

#[async_trait]
impl Muxer for RecordingMuxer {
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let refs = inputs.iter().map(PathBuf::as_path).collect::<Vec<_>>();
        concat_files(&refs, output);
        self.calls.lock().unwrap().push(MuxCall::Concat {
            inputs: inputs.to_vec(),
            output: output.to_path_buf(),
        });
        Ok(())
    }

    async fn combine(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        concat_files(&[video, audio], output);
        self.calls.lock().unwrap().push(MuxCall::Combine {
            video: video.to_path_buf(),
            audio: audio.to_path_buf(),
            output: output.to_path_buf(),
        });
        Ok(())
    }
}
