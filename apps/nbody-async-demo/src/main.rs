//! Async compute N-body demo
//!
//! Simulates 64k gravitating particles on the async compute queue while the
//! render queue draws the most recent finished step into an offscreen target.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p nbody-async-demo -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--slots <N>`: Buffer slots shared by simulation and rendering (default: 3)
//! - `--frames <N>`: Frames to render before exiting, 0 for no limit (default: 600)
//! - `--width <W>`, `--height <H>`: Render target size (default: 1280x720)
//! - `--seed <N>`: Initial distribution seed (default: 0)
//! - `--validation`, `--no-validation`: Toggle Vulkan validation layers
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod config;

use std::sync::Arc;
use std::time::Instant;

use nbody_async::{AsyncRunner, FrameConsumer, RunnerConfig};
use nbody_compute::{ComputeSlotPool, PoolConfig};
use nbody_gpu::{GpuContextBuilder, GpuError};
use nbody_render::{ParticleRenderer, RendererConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::DemoConfig;

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DemoConfig::from_args(std::env::args().skip(1));
    info!("Starting with {config:?}");

    match run(&config) {
        Err(e) if matches!(e.downcast_ref::<GpuError>(), Some(GpuError::NoAsyncComputeQueue)) => {
            error!("Could not find async compute queue.");
            std::process::exit(1);
        }
        result => result,
    }
}

fn run(config: &DemoConfig) -> anyhow::Result<()> {
    let ctx = Arc::new(
        GpuContextBuilder::new()
            .app_name("nbody-async-demo")
            .validation(config.validation)
            .build()?,
    );

    let pool = Arc::new(ComputeSlotPool::new(
        Arc::clone(&ctx),
        PoolConfig::new()
            .with_slot_count(config.slots)
            .with_seed(config.seed),
    )?);
    let mut renderer = ParticleRenderer::new(
        Arc::clone(&ctx),
        RendererConfig::new().with_size(config.width, config.height),
    )?;

    let mut runner = AsyncRunner::new(Arc::clone(&pool), RunnerConfig::default());
    runner.start()?;

    let mut consumer = FrameConsumer::new().with_stats(runner.stats_handle());
    let started = Instant::now();

    let mut render = || -> anyhow::Result<()> {
        let mut frame = 0u64;
        while config.frames == 0 || frame < config.frames {
            let selection = consumer.next_frame(&runner)?;
            renderer.draw_frame(&selection, pool.buffer_for_index(selection.slot))?;
            frame += 1;
        }
        Ok(())
    };
    let rendered = render();

    // Stop the worker before tearing down GPU objects it submits to.
    let stopped = runner.shutdown();
    ctx.wait_idle()?;
    rendered?;
    stopped?;

    let elapsed = started.elapsed().as_secs_f64();
    let stats = runner.stats();
    info!(
        "Rendered {} frames and simulated {} steps in {elapsed:.3}s ({} published, {} superseded, {} slot swaps)",
        stats.frames, stats.simulated_steps, stats.published, stats.dropped, stats.swaps
    );

    // Renderer and pool go before the context they were created from.
    drop(renderer);
    drop(runner);
    drop(pool);
    Ok(())
}

fn print_help() {
    eprintln!(
        "Async compute N-body demo

USAGE:
    cargo run -p nbody-async-demo -- [OPTIONS]

OPTIONS:
    --slots <N>             Buffer slots shared by simulation and rendering (default: 3)
    --frames <N>            Frames to render before exiting, 0 for no limit (default: 600)
    --width <W>             Render target width (default: 1280)
    --height <H>            Render target height (default: 720)
    --seed <N>              Initial particle distribution seed (default: 0)
    --validation            Enable Vulkan validation layers
    --no-validation         Disable Vulkan validation layers

OTHER:
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
