//! Fetch command - load images through one pipeline and save them as PNG.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::ImageFormat;
use imagepipe::adapters::{GaussianBlur, Grayscale, ImageRsDecoder, ReqwestTransport, Resize};
use imagepipe::cache::{DiskDataCache, MemoryImageCache};
use imagepipe::config::{format_size, ConfigFile};
use imagepipe::{ImagePipeline, ImageRequest, ImageResponse, PipelineComponents};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{describe_failure, CliError};
use crate::runner::CliRunner;

/// Arguments for the fetch command.
pub struct FetchArgs {
    pub urls: Vec<String>,
    pub resize: Option<String>,
    pub grayscale: bool,
    pub blur: Option<f32>,
    pub output_dir: PathBuf,
    pub disk_cache: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub progressive: bool,
    pub verbose: bool,
}

/// Run the fetch command.
pub fn run(args: FetchArgs) -> Result<(), CliError> {
    let resize = args.resize.as_deref().map(parse_dimensions).transpose()?;
    if let Some(sigma) = args.blur {
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(CliError::InvalidArgument(format!("blur sigma must be positive, got {}", sigma)));
        }
    }

    let runner = CliRunner::new(args.config.as_deref(), args.verbose)?;
    runner.log_startup("fetch");

    std::fs::create_dir_all(&args.output_dir).map_err(|e| CliError::FileWrite {
        path: args.output_dir.clone(),
        error: e.to_string(),
    })?;

    let runtime = tokio::runtime::Runtime::new().map_err(|e| CliError::Setup(e.to_string()))?;
    runtime.block_on(async {
        let pipeline = build_pipeline(runner.config(), args.disk_cache.as_deref(), args.progressive)?;

        let start = Instant::now();
        let mut loads = JoinSet::new();
        for (index, url) in args.urls.iter().enumerate() {
            let mut request = ImageRequest::new(url.as_str());
            if let Some((width, height)) = resize {
                request = request.with_processor(Resize::new(width, height));
            }
            if args.grayscale {
                request = request.with_processor(Grayscale);
            }
            if let Some(sigma) = args.blur {
                request = request.with_processor(GaussianBlur::new(sigma));
            }

            let pipeline = pipeline.clone();
            let path = args.output_dir.join(output_file_name(index, url));
            let url = url.clone();
            loads.spawn(async move {
                let result = pipeline.image(request).await;
                (url, path, result)
            });
        }

        let total = args.urls.len();
        let mut failed = 0;
        while let Some(joined) = loads.join_next().await {
            let (url, path, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Load task panicked");
                    failed += 1;
                    continue;
                }
            };

            match result {
                Ok(response) => {
                    if let Err(e) = save_png(&response, &path).await {
                        eprintln!("{}", e);
                        failed += 1;
                        continue;
                    }
                    println!(
                        "{} -> {} ({}x{}, {})",
                        url,
                        path.display(),
                        response.container.width(),
                        response.container.height(),
                        source_label(&response)
                    );
                }
                Err(e) => {
                    eprintln!("{}", describe_failure(&url, &e));
                    failed += 1;
                }
            }
        }

        if let Some(stats) = pipeline.stats().await {
            debug!(
                live_tasks = stats.live_tasks,
                coalesced = stats.coalescing.coalesced_requests,
                decoded = stats.decoding.completed,
                processed = stats.processing.completed,
                "Pipeline statistics"
            );
        }
        info!(
            total,
            failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fetch finished"
        );

        if failed > 0 {
            Err(CliError::Fetch { failed, total })
        } else {
            Ok(())
        }
    })
}

fn build_pipeline(
    config: &ConfigFile,
    disk_cache: Option<&Path>,
    progressive: bool,
) -> Result<ImagePipeline, CliError> {
    let transport = ReqwestTransport::new().map_err(|e| CliError::Setup(e.to_string()))?;
    let mut components = PipelineComponents::new(Arc::new(transport), Arc::new(ImageRsDecoder));

    let cache = &config.cache;
    if cache.memory_size > 0 {
        components = components.with_image_cache(Arc::new(MemoryImageCache::new(
            cache.memory_size,
            cache.memory_entries,
        )));
    }

    let disk_directory = disk_cache.map(Path::to_path_buf).or_else(|| cache.disk_directory.clone());
    if let Some(directory) = disk_directory {
        let disk = DiskDataCache::new(directory.clone(), cache.disk_size)?;
        info!(
            directory = %directory.display(),
            size = %format_size(disk.size_bytes()),
            limit = %format_size(cache.disk_size),
            "Disk cache opened"
        );
        components = components.with_data_cache(Arc::new(disk));
    }

    let mut pipeline_config = config.pipeline;
    if progressive {
        pipeline_config = pipeline_config.with_progressive_decoding(true);
    }

    Ok(ImagePipeline::new(pipeline_config, components))
}

async fn save_png(response: &ImageResponse, path: &Path) -> Result<(), CliError> {
    let image = Arc::clone(&response.container.image);
    let target = path.to_path_buf();
    let saved = tokio::task::spawn_blocking(move || image.save_with_format(&target, ImageFormat::Png))
        .await
        .map_err(|e| e.to_string())
        .and_then(|r| r.map_err(|e| e.to_string()));

    saved.map_err(|error| CliError::FileWrite {
        path: path.to_path_buf(),
        error,
    })
}

fn source_label(response: &ImageResponse) -> String {
    match response.cache_type {
        Some(cache) => format!("{:?} cache", cache).to_lowercase(),
        None => "network".to_string(),
    }
}

/// Parses `WIDTHxHEIGHT`.
fn parse_dimensions(input: &str) -> Result<(u32, u32), CliError> {
    let invalid = || CliError::InvalidArgument(format!("expected WIDTHxHEIGHT, got '{}'", input));

    let (width, height) = input.split_once(['x', 'X']).ok_or_else(invalid)?;
    let width: u32 = width.trim().parse().map_err(|_| invalid())?;
    let height: u32 = height.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

/// Output name for the `index`th URL: a numeric prefix keeps names unique
/// when several URLs share a final path segment.
fn output_file_name(index: usize, url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    let segment = path
        .split_once('/')
        .map_or("", |(_, path)| path)
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");
    let stem = segment.rsplit_once('.').map_or(segment, |(stem, _)| stem);

    let clean: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    if clean.is_empty() {
        format!("{:03}-image.png", index)
    } else {
        format!("{:03}-{}.png", index, clean)
    }
}
