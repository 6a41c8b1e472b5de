//! Command-line interface for the obstacle pipeline.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::loaders::{list_frames, load_cloud};
use crate::processors::clustering::ClusterMethod;
use crate::processors::pipeline::{self, frame_stem, process_cloud};
use crate::processors::stream::{FrameStream, Submission};
use crate::visualization;
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "obstacle-pipeline")]
#[command(about = "LiDAR obstacle detection: filter, ground segmentation, clustering, boxes", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Command-line overrides for config values.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Voxel edge length in meters
    #[arg(long)]
    voxel_size: Option<f32>,
    /// Maximum RANSAC iterations
    #[arg(long)]
    max_iterations: Option<usize>,
    /// Point-to-plane distance for ground points
    #[arg(long)]
    distance_threshold: Option<f32>,
    /// RANSAC seed
    #[arg(long)]
    seed: Option<u64>,
    /// Cluster neighbour distance
    #[arg(long)]
    tolerance: Option<f32>,
    /// Minimum points per cluster
    #[arg(long)]
    min_size: Option<usize>,
    /// Maximum points per cluster
    #[arg(long)]
    max_size: Option<usize>,
    /// Cluster with the parallel union-find strategy
    #[arg(long)]
    union_find: bool,
    /// Disable the ego-vehicle filter box
    #[arg(long)]
    no_self_filter: bool,
}

impl Overrides {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(v) = self.voxel_size {
            config.filter.voxel_size = v;
        }
        if let Some(v) = self.max_iterations {
            config.segmentation.max_iterations = v;
        }
        if let Some(v) = self.distance_threshold {
            config.segmentation.distance_threshold = v;
        }
        if let Some(v) = self.seed {
            config.segmentation.seed = v;
        }
        if let Some(v) = self.tolerance {
            config.clustering.tolerance = v;
        }
        if let Some(v) = self.min_size {
            config.clustering.min_size = v;
        }
        if let Some(v) = self.max_size {
            config.clustering.max_size = v;
        }
        if self.union_find {
            config.clustering.method = ClusterMethod::UnionFind;
        }
        if self.no_self_filter {
            config.filter.self_filter = None;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one point cloud through the pipeline
    Process {
        /// Input .pcd, .ply or .csv file
        input: PathBuf,
        /// Output directory for boxes, labels and clouds
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Also write ground and obstacle clouds
        #[arg(long)]
        write_clouds: bool,
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Process every frame of a directory in parallel
    Batch {
        /// Directory of point cloud frames
        input_dir: PathBuf,
        /// Output directory
        output_dir: PathBuf,
        /// Limit number of frames to process
        #[arg(long)]
        limit: Option<usize>,
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Replay a directory of frames at a fixed rate, dropping frames that
    /// arrive while the previous one is still being processed
    Stream {
        /// Directory of point cloud frames
        input_dir: PathBuf,
        /// Time between frames in milliseconds
        #[arg(long, default_value_t = 100)]
        period_ms: u64,
        /// Plane-fit budget per frame in milliseconds
        #[arg(long)]
        budget_ms: Option<u64>,
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Plot a cloud top-down as a PNG
    Visualize {
        /// Input point cloud file
        input: PathBuf,
        /// Output PNG file path (defaults to the input name with .png extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Maximum number of points to plot (subsamples if exceeded)
        #[arg(long, default_value_t = 1_000_000)]
        max_points: usize,
        /// Run the pipeline and plot ground, clusters and boxes
        #[arg(long)]
        frame: bool,
    },

    /// Write the default configuration as YAML
    InitConfig {
        /// Destination file
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    if let Err(e) = dispatch(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    if let Commands::InitConfig { path, force } = &cli.command {
        return cmd_init_config(path, *force);
    }

    let mut config = match &cli.config {
        Some(path) => {
            let cfg = PipelineConfig::from_yaml(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            info!("Loaded config from: {}", path.display());
            cfg
        }
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Process {
            input,
            output_dir,
            write_clouds,
            overrides,
        } => {
            overrides.apply(&mut config);
            config.output.write_clouds |= write_clouds;
            cmd_process(&input, output_dir.as_deref(), &config)
        }
        Commands::Batch {
            input_dir,
            output_dir,
            limit,
            overrides,
        } => {
            overrides.apply(&mut config);
            cmd_batch(&input_dir, &output_dir, limit, &config)
        }
        Commands::Stream {
            input_dir,
            period_ms,
            budget_ms,
            overrides,
        } => {
            overrides.apply(&mut config);
            if budget_ms.is_some() {
                config.stream.frame_budget_ms = budget_ms;
            }
            cmd_stream(&input_dir, Duration::from_millis(period_ms), config)
        }
        Commands::Visualize {
            input,
            output,
            max_points,
            frame,
        } => cmd_visualize(&input, output, max_points, frame, &config),
        Commands::InitConfig { .. } => Ok(()),
    }
}

fn cmd_process(input: &Path, output_dir: Option<&Path>, config: &PipelineConfig) -> anyhow::Result<()> {
    config.validate().context("Invalid configuration")?;
    let start = Instant::now();

    let spinner = create_spinner("Processing point cloud...");
    let cloud = match load_cloud(input) {
        Ok(c) => c,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e).with_context(|| format!("Failed to load {}", input.display()));
        }
    };
    let result = match process_cloud(&cloud, config) {
        Ok(r) => r,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e).with_context(|| format!("Failed to process {}", input.display()));
        }
    };
    if let Some(dir) = output_dir {
        spinner.set_message("Writing results...");
        pipeline::write_frame_outputs(dir, &frame_stem(input), &result, &config.output)
            .with_context(|| format!("Failed to write results to {}", dir.display()))?;
    }
    spinner.finish_and_clear();

    for (id, (bbox, size)) in result.boxes.iter().zip(result.cluster_sizes()).enumerate() {
        info!(
            "cluster {} has {} points, box ({:.2}, {:.2}, {:.2}) .. ({:.2}, {:.2}, {:.2})",
            id, size, bbox.min[0], bbox.min[1], bbox.min[2], bbox.max[0], bbox.max[1], bbox.max[2]
        );
    }

    print_summary(
        "Processing Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Raw points", cloud.len().to_string()),
            ("Filtered points", result.filtered.len().to_string()),
            ("Ground points", result.ground.len().to_string()),
            ("Obstacle points", result.obstacles.len().to_string()),
            ("Clusters found", result.clusters.len().to_string()),
            ("Low confidence", result.low_confidence.to_string()),
            (
                "Output directory",
                output_dir.map_or("-".to_string(), |d| d.display().to_string()),
            ),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_batch(
    input_dir: &Path,
    output_dir: &Path,
    limit: Option<usize>,
    config: &PipelineConfig,
) -> anyhow::Result<()> {
    let start = Instant::now();

    println!("Processing frames...");
    println!("Input: {}", input_dir.display());
    println!("Output directory: {}", output_dir.display());

    let spinner = create_spinner("Processing frames in parallel...");
    let summary = pipeline::process_directory(input_dir, config, Some(output_dir), limit);
    spinner.finish_and_clear();
    let summary = summary.with_context(|| format!("Batch over {} failed", input_dir.display()))?;

    let clusters: usize = summary.reports.iter().map(|r| r.cluster_sizes.len()).sum();
    let low_confidence = summary.reports.iter().filter(|r| r.low_confidence).count();

    print_summary(
        "Batch Complete",
        &[
            ("Input directory", input_dir.display().to_string()),
            ("Output directory", output_dir.display().to_string()),
            ("Frames processed", summary.reports.len().to_string()),
            ("Frames failed", summary.failures.len().to_string()),
            ("Clusters found", clusters.to_string()),
            ("Low-confidence frames", low_confidence.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_stream(input_dir: &Path, period: Duration, config: PipelineConfig) -> anyhow::Result<()> {
    config.validate().context("Invalid configuration")?;
    let frames = list_frames(input_dir)
        .with_context(|| format!("Failed to list frames in {}", input_dir.display()))?;
    if frames.is_empty() {
        bail!("No point cloud files found in {}", input_dir.display());
    }

    let start = Instant::now();
    let progress = ProgressBar::new(frames.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {pos}/{len} frames {msg}")
            .unwrap(),
    );

    let mut stream = FrameStream::spawn(config, |outcome| {
        if let Ok(frame) = outcome {
            info!(
                "{} obstacle points in {} clusters",
                frame.obstacles.len(),
                frame.clusters.len()
            );
        }
    });

    for (i, path) in frames.iter().enumerate() {
        let due = start + period * i as u32;
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }

        let cloud = match load_cloud(path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                progress.inc(1);
                continue;
            }
        };
        match stream.submit(cloud) {
            Submission::Accepted => {}
            Submission::Dropped => info!("Dropped {}: previous frame still running", path.display()),
            Submission::Closed => {
                progress.abandon();
                bail!("Stream worker stopped at {}", path.display());
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    let stats = stream.finish();
    print_summary(
        "Stream Complete",
        &[
            ("Input directory", input_dir.display().to_string()),
            ("Frames offered", frames.len().to_string()),
            ("Accepted", stats.accepted.to_string()),
            ("Dropped", stats.dropped.to_string()),
            ("Completed", stats.completed.to_string()),
            ("Failed", stats.failed.to_string()),
            ("Frame period", format!("{:?}", period)),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_visualize(
    input: &Path,
    output: Option<PathBuf>,
    max_points: usize,
    frame: bool,
    config: &PipelineConfig,
) -> anyhow::Result<()> {
    let start = Instant::now();

    // Determine output path (default to same name as input with .png extension)
    let output_path = output.unwrap_or_else(|| {
        let mut path = input.to_path_buf();
        path.set_extension("png");
        path
    });

    let spinner = create_spinner("Loading point cloud...");
    let cloud = match load_cloud(input) {
        Ok(c) => c,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e).with_context(|| format!("Failed to load {}", input.display()));
        }
    };

    spinner.set_message("Generating plot...");
    let plotted = if frame {
        process_cloud(&cloud, config)
            .with_context(|| format!("Failed to process {}", input.display()))
            .and_then(|result| {
                visualization::plot_frame(&output_path, &result, max_points).context("Plotting failed")
            })
    } else {
        visualization::plot_point_cloud(&output_path, &cloud, max_points).context("Plotting failed")
    };
    spinner.finish_and_clear();
    plotted?;

    print_summary(
        "Visualization Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Output PNG", output_path.display().to_string()),
            ("Points in cloud", cloud.len().to_string()),
            ("Max points plotted", max_points.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    PipelineConfig::default()
        .to_yaml(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_process_with_overrides() {
        let cli = Cli::try_parse_from([
            "obstacle-pipeline",
            "-vv",
            "process",
            "scan.pcd",
            "--voxel-size",
            "0.2",
            "--union-find",
            "--no-self-filter",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);

        let Commands::Process { input, overrides, .. } = cli.command else {
            panic!("expected process command");
        };
        assert_eq!(input, PathBuf::from("scan.pcd"));

        let mut config = PipelineConfig::default();
        overrides.apply(&mut config);
        assert_eq!(config.filter.voxel_size, 0.2);
        assert_eq!(config.clustering.method, ClusterMethod::UnionFind);
        assert!(config.filter.self_filter.is_none());
        assert_eq!(config.clustering.tolerance, 1.0);
    }

    #[test]
    fn test_init_config_refuses_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pipeline.yaml");

        cmd_init_config(&path, false).unwrap();
        assert_eq!(PipelineConfig::from_yaml(&path).unwrap(), PipelineConfig::default());
        assert!(cmd_init_config(&path, false).is_err());
        assert!(cmd_init_config(&path, true).is_ok());
    }
}
