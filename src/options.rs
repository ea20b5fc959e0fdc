use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PARALLEL_DOWNLOADS: usize = 5;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Options {
    pub max_parallel_downloads: usize,
    /// applied to every HTTP request, including streamed segment bodies
    pub request_timeout: Duration,
    /// root under which `<resolution>/...` output directories are created
    pub output_root: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_parallel_downloads: DEFAULT_PARALLEL_DOWNLOADS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            output_root: PathBuf::from("."),
        }
    }
}
