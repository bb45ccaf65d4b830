use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use image::GrayImage;

use histeq_hal::{list_adapters, EqualizePipeline, EqualizeReport, GpuContext, TimingSource};

/// Equalize the intensity histogram of a grayscale image on the GPU.
#[derive(Parser)]
#[command(name = "histeq", version)]
struct Cli {
    /// Input image; anything decodable is converted to 8-bit grayscale
    image: Option<PathBuf>,

    /// Where to write the equalized image
    #[arg(short, long, default_value = "equalized.png")]
    output: PathBuf,

    /// Adapter index, as printed by --list-adapters (default: best available)
    #[arg(short, long)]
    adapter: Option<usize>,

    /// List available adapters and exit
    #[arg(short, long)]
    list_adapters: bool,

    /// Print the histogram, cumulative histogram and remapping table
    #[arg(long)]
    tables: bool,
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.list_adapters {
        for a in list_adapters() {
            println!("{}: {} [{}] {}", a.index, a.name, a.backend, a.device_type);
        }
        return Ok(());
    }

    let Some(path) = cli.image else {
        bail!("no input image given (see --help)");
    };

    let gray: GrayImage = image::open(&path)
        .with_context(|| format!("failed to load {}", path.display()))?
        .to_luma8();
    let (width, height) = gray.dimensions();
    log::info!("loaded {} ({width}x{height})", path.display());

    let ctx = Arc::new(GpuContext::new(cli.adapter)?);
    println!("running on {}", ctx.adapter_name());

    let mut pipeline = EqualizePipeline::new(ctx)?;
    let report = pipeline.run(width, height, gray.as_raw())?;

    print_diagnostics(&report, cli.tables);

    let out = GrayImage::from_raw(report.width, report.height, report.pixels.clone())
        .context("output image has the wrong size")?;
    out.save(&cli.output)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;
    println!("wrote {}", cli.output.display());

    Ok(())
}

fn print_diagnostics(report: &EqualizeReport, tables: bool) {
    if tables {
        println!("histogram = {:?}", report.histogram);
        println!("cumulative histogram = {:?}", report.cumulative);
        println!("remapping table = {:?}", report.remap);
    }

    let t = &report.timings;
    let source = match t.source {
        TimingSource::DeviceTimestamps => "device timestamps",
        TimingSource::HostWallClock => "host wall clock",
    };
    println!("stage timings ({source}):");
    print_stage("intensity histogram", t.histogram);
    print_stage("cumulative histogram", t.cumulative);
    print_stage("normalize and scale", t.normalize);
    print_stage("back-projection", t.back_project);
}

fn print_stage(label: &str, elapsed: Duration) {
    println!("  {label:<22} {:>10.3} ms", elapsed.as_secs_f64() * 1e3);
}
