//! pt-headless - render a fixed number of progressive frames offscreen.
//!
//! Usage: `pt-headless [settings.json] [-v|--verbose] [-q|--quiet]`
//!
//! Without a path the settings are read from the user config dir. Set
//! `PT_TRACE=1` to write a Chrome trace to `trace.json`.

use std::env;
use std::time::Instant;

use anyhow::{Context, Result};
use progressive_tracer::prelude::*;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let mut default_level = "info";
    let mut settings_path = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-v" | "--verbose" => default_level = "debug",
            "-vv" | "--trace" => default_level = "trace",
            "-q" | "--quiet" => default_level = "warn",
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            _ => settings_path = Some(arg),
        }
    }

    let _trace_guard = init_tracing(default_level);
    tracing::info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let settings = match &settings_path {
        Some(path) => Settings::load_from(path).with_context(|| format!("loading {path}"))?,
        None => Settings::load(),
    };

    let mut ctx = WgpuContext::new().context("creating GPU context")?;
    let mut renderer = Renderer::from_settings(&mut ctx, &settings, Scene::default())
        .context("creating renderer")?;

    let start = Instant::now();
    for frame in 1..=settings.frames {
        let frame_start = Instant::now();
        renderer.render(&mut ctx).with_context(|| format!("rendering frame {frame}"))?;
        tracing::debug!(
            "frame {frame}: {} samples in {:.2} ms",
            renderer.samples(),
            frame_start.elapsed().as_secs_f64() * 1000.0
        );

        if settings.orbit_every > 0 && frame % settings.orbit_every == 0 {
            renderer.orbit_camera(settings.orbit_sensitivity, 0.0);
        }
    }

    let stats = renderer.frame_stats();
    let elapsed = start.elapsed().as_secs_f64();
    tracing::info!(
        "{} frames at {} ({:?}): {} samples, {:.1} fps",
        settings.frames,
        stats.resolution,
        stats.mode,
        stats.samples,
        settings.frames as f64 / elapsed.max(f64::EPSILON)
    );
    Ok(())
}

fn init_tracing(default_level: &str) -> Option<tracing_chrome::FlushGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    if env::var("PT_TRACE").ok().as_deref() != Some("1") {
        tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        return None;
    }

    let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file("trace.json")
        .build();
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(chrome_layer)
        .init();
    Some(guard)
}

fn print_help() {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: pt-headless [SETTINGS.json] [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -v, --verbose   Per-frame timing");
    println!("  -vv, --trace    Per-cycle render events");
    println!("  -q, --quiet     Warnings only");
    println!("  -h, --help      Show this help");
    println!();
    println!("Environment:");
    println!("  RUST_LOG        Overrides the log filter");
    println!("  PT_TRACE=1      Write a Chrome trace to trace.json");
}
