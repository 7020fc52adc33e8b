//! Offline battery runner: synthesizes fluorophore mixtures with known
//! abundances, unmixes them and reports the error against ground truth.
//!
//! Emission spectra are Gaussian peaks sampled at 1 nm. Ground truth counts
//! live on a grid `downscale` times finer than the mixed image, matching the
//! way simulated microscopy data is produced.

use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ndarray::{ArrayD, IxDyn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use unmix_core::{
    block_sum, evaluate, image, unmix, Evaluation, ReferenceMatrix, Spectrum, UnmixConfig,
    WavelengthBins,
};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "unmix-test", about = "Synthetic spectral unmixing battery runner")]
struct Args {
    /// Number of spectral bands in the mixed image.
    #[arg(short = 'n', long, default_value_t = 32)]
    bands: usize,

    /// Number of fluorophores mixed in each pixel.
    #[arg(short = 'p', long, default_value_t = 4)]
    components: usize,

    /// Mixed image rows.
    #[arg(long, default_value_t = 64)]
    rows: usize,

    /// Mixed image columns.
    #[arg(long, default_value_t = 64)]
    cols: usize,

    /// Z slices; omit for a 2D image.
    #[arg(short, long)]
    depth: Option<usize>,

    /// Ground truth is this many times finer along every spatial axis.
    #[arg(long, default_value_t = 2)]
    downscale: usize,

    /// Uniform noise amplitude, relative to the image maximum.
    #[arg(long, default_value_t = 0.0)]
    noise: f64,

    /// Random seed.
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Pipeline configuration as inline JSON (overrides defaults).
    #[arg(short, long)]
    config: Option<String>,
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Report {
    seed: u64,
    image_shape: Vec<usize>,
    ground_truth_shape: Vec<usize>,
    config: UnmixConfig,
    rank: usize,
    mean_residual: f64,
    evaluation: Evaluation,
    solve_time_ms: u64,
}

// ── Synthesis ─────────────────────────────────────────────────────────────────

const WL_MIN: f64 = 400.0;
const WL_MAX: f64 = 700.0;

/// Gaussian emission peak sampled every nanometre over the detection range.
fn emission_spectrum(center: f64, sigma: f64) -> Result<Spectrum> {
    let samples = (WL_MIN as usize..WL_MAX as usize).map(|wl| {
        let x = (wl as f64 - center) / sigma;
        (wl as f64, (-0.5 * x * x).exp())
    });
    Spectrum::from_pairs(samples).context("building emission spectrum")
}

/// Peaks spread evenly over the range with a little jitter.
fn synth_spectra(rng: &mut StdRng, p: usize) -> Result<Vec<Spectrum>> {
    let spacing = (WL_MAX - WL_MIN) / (p as f64 + 1.0);
    (0..p)
        .map(|k| {
            let center = WL_MIN + spacing * (k as f64 + 1.0) + rng.gen_range(-0.2..0.2) * spacing;
            let sigma = rng.gen_range(10.0..25.0);
            emission_spectrum(center, sigma)
        })
        .collect()
}

/// Sparse fluorophore counts on the fine grid.
fn synth_ground_truth(rng: &mut StdRng, p: usize, fine_spatial: &[usize]) -> ArrayD<f64> {
    let mut shape = vec![p];
    shape.extend_from_slice(fine_spatial);
    ArrayD::from_shape_fn(IxDyn(&shape), |_| {
        if rng.gen_bool(0.3) {
            rng.gen_range(1..20) as f64
        } else {
            0.0
        }
    })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.components == 0 || args.bands == 0 {
        bail!("need at least one band and one component");
    }
    if args.downscale == 0 {
        bail!("downscale must be at least 1");
    }

    let mut config = match &args.config {
        Some(json) => UnmixConfig::from_json(json).context("parsing --config")?,
        None => UnmixConfig::default(),
    };
    config.downscale_factor = args.downscale;

    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut spatial = Vec::with_capacity(3);
    spatial.extend(args.depth);
    spatial.extend([args.rows, args.cols]);
    let fine_spatial: Vec<usize> = spatial.iter().map(|&e| e * args.downscale).collect();

    let bins = WavelengthBins::uniform(WL_MIN, WL_MAX, args.bands)?;
    let spectra = synth_spectra(&mut rng, args.components)?;
    let reference = ReferenceMatrix::from_spectra(&spectra, &bins)?;

    let ground_truth = synth_ground_truth(&mut rng, args.components, &fine_spatial);
    let coarse = block_sum(&ground_truth, args.downscale)?;

    // y = Rᵀc at every coarse pixel, plus optional uniform noise.
    let c = image::unroll(&coarse)?;
    let mut mixed = image::roll(&reference.design().dot(&c), &spatial)?;
    if args.noise > 0.0 {
        let amplitude = args.noise * mixed.iter().cloned().fold(0.0, f64::max);
        mixed.mapv_inplace(|v| v + rng.gen_range(-amplitude..=amplitude));
    }

    log::info!(
        "synthesized {:?} image, {} components, ground truth {:?}",
        mixed.shape(),
        args.components,
        ground_truth.shape()
    );

    let start = Instant::now();
    let result = unmix(&mixed, &spectra, &bins, &config)?;
    let solve_time_ms = start.elapsed().as_millis() as u64;

    let evaluation = evaluate(&result, &ground_truth, &config)?;
    let mean_residual = result.residuals.mean().unwrap_or(0.0);

    eprintln!("\n{:<10} {:>12}", "Component", "MSE");
    eprintln!("{}", "-".repeat(23));
    for ch in &evaluation.channels {
        eprintln!("{:<10} {:>12.3e}", ch.label, ch.mse);
    }
    let psnr = evaluation.psnr.map_or_else(|| "inf".to_string(), |db| format!("{db:.2}"));
    eprintln!("{:<10} {:>12.3e}   PSNR {} dB", "all", evaluation.mse, psnr);

    let report = Report {
        seed: args.seed,
        image_shape: mixed.shape().to_vec(),
        ground_truth_shape: ground_truth.shape().to_vec(),
        config,
        rank: result.rank,
        mean_residual,
        evaluation,
        solve_time_ms,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
