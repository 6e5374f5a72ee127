//! burn-flows CLI
//!
//! Command-line interface for building, sampling and evaluating
//! normalizing-flow image models.

use anyhow::{Context, Result, bail};
use burn::prelude::*;
use burn_flows::backends::{self, DefaultBackend};
use burn_flows::{FlowConfig, FlowRecipe, ImageFlow, create_flow, serialize};
use clap::{Args, Parser, Subcommand};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

type B = DefaultBackend;

#[derive(Parser)]
#[command(name = "burn-flows")]
#[command(about = "Normalizing-flow image models in pure Rust")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Flow architecture, from flags or a JSON config file
#[derive(Args, Debug)]
struct FlowArgs {
    /// Recipe: simple, vardeq, deep, linear, partial_conv, multiscale
    #[arg(short, long, default_value = "simple")]
    model: FlowRecipe,

    /// Image height and width
    #[arg(long, default_value = "28")]
    size: usize,

    /// Image channels (1 = grayscale, 3 = RGB)
    #[arg(short, long, default_value = "1")]
    channels: usize,

    /// Multiscale only: force or disable the second squeeze
    #[arg(long)]
    squeeze_twice: Option<bool>,

    /// JSON flow config; overrides the flags above
    #[arg(long)]
    config: Option<PathBuf>,
}

impl FlowArgs {
    fn to_config(&self) -> Result<FlowConfig> {
        if let Some(path) = &self.config {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            return serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse config {}", path.display()));
        }

        Ok(FlowConfig {
            size: self.size,
            channels: self.channels,
            model: self.model,
            squeeze_twice: self.squeeze_twice,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show backends, recipes and the shapes of a flow
    Info {
        #[command(flatten)]
        flow: FlowArgs,
    },

    /// Generate images by sampling a flow
    Sample {
        #[command(flatten)]
        flow: FlowArgs,

        /// Trained weights (as written by `serialize::save_flow`)
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Number of images to generate
        #[arg(short = 'n', long, default_value = "16")]
        num_samples: usize,

        /// Output directory, one PNG per sample
        #[arg(short, long, default_value = "samples")]
        output: PathBuf,
    },

    /// Compute bits per dimension of PNG images
    Eval {
        #[command(flatten)]
        flow: FlowArgs,

        /// Trained weights (as written by `serialize::save_flow`)
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Importance samples per image
        #[arg(long, default_value = "1")]
        importance_samples: usize,

        /// Images to evaluate
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
}

fn build_flow(
    args: &FlowArgs,
    weights: Option<&Path>,
    device: &<B as Backend>::Device,
) -> Result<(FlowConfig, ImageFlow<B>, burn_flows::SampleShapeFactor)> {
    let config = args.to_config()?;
    let (flow, factor) = create_flow::<B>(&config, device)
        .with_context(|| format!("Failed to build {} flow", config.model))?;

    let flow = match weights {
        Some(path) => serialize::load_flow(flow, path, device)
            .with_context(|| format!("Failed to load weights from {}", path.display()))?,
        None => {
            tracing::warn!("no weights given, using an untrained flow");
            flow
        }
    };

    Ok((config, flow, factor))
}

/// Splits a `[n, c, h, w]` pixel tensor into per-image buffers
fn tensor_to_images(samples: Tensor<B, 4, Int>) -> Vec<Vec<u8>> {
    let [n, c, h, w] = samples.dims();
    let pixels: Vec<u8> = samples
        .into_data()
        .iter::<i64>()
        .map(|v| v.clamp(0, 255) as u8)
        .collect();

    let plane = h * w;
    let per_image = c * plane;
    (0..n)
        .map(|i| {
            let chw = &pixels[i * per_image..(i + 1) * per_image];
            // CHW -> HWC
            (0..plane)
                .flat_map(|p| (0..c).map(move |ch| chw[ch * plane + p]))
                .collect()
        })
        .collect()
}

fn save_png(path: &Path, hwc: Vec<u8>, channels: usize, size: u32) -> Result<()> {
    match channels {
        1 => {
            let img: GrayImage = ImageBuffer::<Luma<u8>, _>::from_raw(size, size, hwc)
                .context("Pixel buffer does not match image size")?;
            img.save(path)?;
        }
        3 => {
            let img: RgbImage = ImageBuffer::<Rgb<u8>, _>::from_raw(size, size, hwc)
                .context("Pixel buffer does not match image size")?;
            img.save(path)?;
        }
        other => bail!("Cannot write PNG with {other} channels (expected 1 or 3)"),
    }
    Ok(())
}

fn load_png(path: &Path, channels: usize, size: usize) -> Result<Vec<i64>> {
    let img = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    if img.width() as usize != size || img.height() as usize != size {
        bail!(
            "{} is {}x{}, expected {}x{}",
            path.display(),
            img.width(),
            img.height(),
            size,
            size
        );
    }

    let hwc = match channels {
        1 => img.to_luma8().into_raw(),
        3 => img.to_rgb8().into_raw(),
        other => bail!("Cannot read PNG into {other} channels (expected 1 or 3)"),
    };

    // HWC -> CHW
    let plane = size * size;
    Ok((0..channels)
        .flat_map(|ch| (0..plane).map(|p| hwc[p * channels + ch] as i64).collect::<Vec<_>>())
        .collect())
}

/// Application entry point
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let device = backends::default_device();

    match cli.command {
        Commands::Info { flow: args } => {
            println!("burn-flows: Normalizing flows in pure Rust\n");
            println!("Available backends:");
            for backend in backends::available_backends() {
                println!("  - {backend} (enabled)");
            }

            println!("\nRecipes:");
            for recipe in FlowRecipe::ALL {
                println!("  - {recipe}");
            }

            let config = args.to_config()?;
            let (flow, factor) = create_flow::<B>(&config, &device)
                .with_context(|| format!("Failed to build {} flow", config.model))?;
            println!("\nFlow:");
            println!("  Model:         {}", config.model);
            println!("  Layers:        {}", flow.layers.len());
            println!("  Parameters:    {}", flow.num_params());
            println!("  Image shape:   {:?}", flow.image_shape());
            println!("  Latent shape:  {:?}", flow.latent_shape());
            println!("  Sample factor: {factor}");

            Ok(())
        }

        Commands::Sample {
            flow: args,
            weights,
            num_samples,
            output,
        } => {
            let (config, flow, factor) = build_flow(&args, weights.as_deref(), &device)?;
            let [c, h, w] = config.image_shape();
            let shape = factor.apply([num_samples, c, h, w]);
            tracing::info!(?shape, "sampling");

            let samples = flow
                .sample(shape, None, &device)
                .context("Failed to sample")?;
            let images = tensor_to_images(samples);

            std::fs::create_dir_all(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;

            let pb = ProgressBar::new(images.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                    .progress_chars("#>-"),
            );
            pb.set_message("Writing samples");

            for (i, hwc) in images.into_iter().enumerate() {
                let path = output.join(format!("sample_{i:04}.png"));
                save_png(&path, hwc, c, config.size as u32)?;
                pb.inc(1);
            }
            pb.finish_with_message("Done");

            println!("Saved {} samples to {}", num_samples, output.display());
            Ok(())
        }

        Commands::Eval {
            flow: args,
            weights,
            importance_samples,
            images,
        } => {
            let (config, flow, _) = build_flow(&args, weights.as_deref(), &device)?;
            let [c, h, w] = config.image_shape();

            let mut pixels = Vec::with_capacity(images.len() * c * h * w);
            for path in &images {
                pixels.extend(load_png(path, c, config.size)?);
            }
            let batch = Tensor::<B, 4, Int>::from_data(
                TensorData::new(pixels, [images.len(), c, h, w]),
                &device,
            );

            let bpd = if importance_samples > 1 {
                flow.importance_bpd(batch, importance_samples)
            } else {
                flow.log_likelihood(batch)
            }
            .context("Failed to evaluate images")?;

            let values: Vec<f64> = bpd.into_data().iter::<f64>().collect();
            for (path, value) in images.iter().zip(&values) {
                println!("{:>8.4} bpd  {}", value, path.display());
            }
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            println!("{:>8.4} bpd  (mean)", mean);

            Ok(())
        }
    }
}
