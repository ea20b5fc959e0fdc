use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use stream_downloader::upload::config::DEFAULT_CHUNK_SIZE;
use stream_downloader::{
    file, FfmpegMuxer, Options, StreamDownloader, TusUploader, UploadConfig,
};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[clap(subcommand)]
    subcmd: SubCmd,

    #[clap(short, long, global = true, default_value = "5")]
    /// set the maximum number of parallel segment downloads
    parallel: usize,

    #[clap(short, long, global = true, default_value = "30")]
    /// set the timeout of a single request in seconds
    timeout: u64,

    #[clap(short, long, global = true, default_value = ".")]
    /// directory the `<resolution>/` output folders are created in
    output: PathBuf,

    #[clap(short, long, global = true)]
    /// log every segment
    verbose: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about)]
enum SubCmd {
    /// List the resolutions a manifest offers
    Resolutions {
        #[clap(value_parser = url_parser)]
        manifest_url: String,
    },
    /// Print the manifest URL of one resolution
    ManifestUrl {
        #[clap(value_parser = url_parser)]
        manifest_url: String,

        #[clap(short, long)]
        /// position from `resolutions` or a label such as 720p
        resolution: String,
    },
    /// Count the segments of one resolution
    Count {
        #[clap(value_parser = url_parser)]
        manifest_url: String,

        #[clap(short, long)]
        /// position from `resolutions` or a label such as 720p
        resolution: String,
    },
    /// Download one resolution and merge it into a single mp4
    Download {
        #[clap(value_parser = url_parser)]
        manifest_url: String,

        #[clap(short, long)]
        /// position from `resolutions` or a label such as 720p
        resolution: String,

        #[clap(long)]
        /// resolve every segment path without transferring anything
        dry_run: bool,
    },
    /// Download every job of a json file
    File {
        #[clap(default_value = "download.json")]
        /// provide a formated json file that contains the manifest urls and resolutions
        file: PathBuf,

        #[clap(long)]
        dry_run: bool,
    },
    /// Upload a local file with the resumable tus protocol
    Upload {
        file: PathBuf,

        #[clap(long, value_parser = url_parser)]
        /// continue the upload session printed by an earlier run
        session_url: Option<String>,

        #[clap(long, default_value_t = DEFAULT_CHUNK_SIZE / (1024 * 1024))]
        /// set the chunk size in mega bytes
        chunk_size: u64,
    },
}

fn url_parser(url: &str) -> Result<String, String> {
    if url.starts_with("http") {
        Ok(url.to_string())
    } else {
        Err("URL must start with http or https".to_string())
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if !args.output.exists() {
        error!("Output path {} does not exist", args.output.display());
        return Err(format!("output path {} does not exist", args.output.display()).into());
    }

    let options = Options {
        max_parallel_downloads: args.parallel,
        request_timeout: Duration::from_secs(args.timeout),
        output_root: args.output,
    };

    if let Err(err) = run(args.subcmd, &options).await {
        error!("{err}");
        return Err(err);
    }

    Ok(())
}

async fn run(subcmd: SubCmd, options: &Options) -> Result<(), Box<dyn std::error::Error>> {
    match subcmd {
        SubCmd::Resolutions { manifest_url } => {
            let downloader = StreamDownloader::new(options, FfmpegMuxer::default())?;
            let video = downloader.load(&manifest_url).await?;

            println!("Available resolutions for video {}:", video.base.asset_id);
            for (index, variant) in video.variants.iter().enumerate() {
                println!("{index}) {}", variant.resolution_label);
            }
        }
        SubCmd::ManifestUrl {
            manifest_url,
            resolution,
        } => {
            let downloader = StreamDownloader::new(options, FfmpegMuxer::default())?;
            let video = downloader.load(&manifest_url).await?;
            let variant = video.select(&resolution)?;

            println!("{}", video.variant_url(variant));
        }
        SubCmd::Count {
            manifest_url,
            resolution,
        } => {
            let downloader = StreamDownloader::new(options, FfmpegMuxer::default())?;
            let video = downloader.load(&manifest_url).await?;
            let variant = video.select(&resolution)?;
            let paths = downloader.segment_paths(&video, variant).await?;

            println!(
                "There are a total of {} segments on the {} manifest",
                paths.len(),
                variant.resolution_label
            );
        }
        SubCmd::Download {
            manifest_url,
            resolution,
            dry_run,
        } => {
            let downloader = StreamDownloader::new(options, FfmpegMuxer::default())?;
            let video = downloader.load(&manifest_url).await?;
            let variant = video.select(&resolution)?;
            let report = downloader.download(&video, variant, dry_run).await?;

            match report.artifact {
                Some(artifact) => info!("Video output: {}", artifact.display()),
                None => info!(
                    video = report.video_segments.len(),
                    audio = report.audio_segments.len(),
                    "dry run finished, no segment was downloaded"
                ),
            }
        }
        SubCmd::File { file, dry_run } => {
            let downloader = StreamDownloader::new(options, FfmpegMuxer::default())?;
            let summary = file::download_jobs(&file, &downloader, dry_run).await?;

            if summary.failed > 0 {
                warn!("{} of {} jobs failed", summary.failed, summary.failed + summary.completed);
            }
        }
        SubCmd::Upload {
            file,
            session_url,
            chunk_size,
        } => {
            let mut config = UploadConfig::from_lookup(|key| std::env::var(key).ok())?
                .with_chunk_size_mib(chunk_size)?;
            config.request_timeout = options.request_timeout;

            let uploader = TusUploader::new(config)?;
            let session = match session_url {
                Some(session_url) => uploader.resume(&file, Url::parse(&session_url)?).await?,
                None => uploader.upload_file(&file).await?,
            };

            println!("{}", session.session_url);
        }
    }

    Ok(())
}
