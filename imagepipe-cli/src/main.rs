//! imagepipe CLI - command line front end for the image loading pipeline.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};
use commands::fetch::{self, FetchArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "imagepipe")]
#[command(version = imagepipe::VERSION)]
#[command(about = "Fetch, decode and process remote images", long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load one or more images and save them as PNG files
    Fetch {
        /// Image URLs to load
        #[arg(required = true)]
        urls: Vec<String>,

        /// Fit the image inside WIDTHxHEIGHT, keeping its aspect ratio
        #[arg(long, value_name = "WxH")]
        resize: Option<String>,

        /// Convert to grayscale
        #[arg(long)]
        grayscale: bool,

        /// Apply a gaussian blur with the given sigma
        #[arg(long, value_name = "SIGMA")]
        blur: Option<f32>,

        /// Directory the PNG files are written to
        #[arg(long, short, default_value = ".")]
        output_dir: PathBuf,

        /// Disk cache directory (overrides the config file)
        #[arg(long, value_name = "DIR")]
        disk_cache: Option<PathBuf>,

        /// Configuration file (default: ~/.imagepipe/config.ini)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Decode previews while the download is in progress
        #[arg(long)]
        progressive: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Fetch {
            urls,
            resize,
            grayscale,
            blur,
            output_dir,
            disk_cache,
            config,
            progressive,
        } => fetch::run(FetchArgs {
            urls,
            resize,
            grayscale,
            blur,
            output_dir,
            disk_cache,
            config,
            progressive,
            verbose: cli.verbose,
        }),
    };

    if let Err(e) = result {
        e.exit();
    }
}
