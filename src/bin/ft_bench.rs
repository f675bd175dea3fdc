use anyhow::Context;
use clap::Parser;
use ftslice::config::TransformerConfig;
use ftslice::transformer::batch::{ReduceStrategy, SparseBatch};
use ftslice::transformer::layer::DoubleFeatureTransformerSlice;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "ft-bench", version, about = "Benchmark feature transformer forward+backward throughput")]
struct Args {
    /// JSON config; CLI shape flags are ignored when given
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rows of the weight matrix
    #[arg(long, default_value_t = 40960)]
    inputs: usize,

    /// Output columns
    #[arg(long, default_value_t = 264)]
    outputs: usize,

    #[arg(long, default_value_t = 64)]
    max_active: usize,

    #[arg(long, default_value_t = 8192)]
    batch: usize,

    #[arg(long, default_value_t = 64)]
    iters: usize,

    /// Threads (0 = all cores)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Gradient reduction: sequential, atomic or partition
    #[arg(long, default_value = "atomic")]
    reduce: String,

    /// Partitions for --reduce partition
    #[arg(long, default_value_t = 8)]
    partitions: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn parse_reduce(s: &str, partitions: usize) -> anyhow::Result<ReduceStrategy> {
    match s {
        "sequential" => Ok(ReduceStrategy::Sequential),
        "atomic" => Ok(ReduceStrategy::Atomic),
        "partition" => Ok(ReduceStrategy::PartitionReduce { partitions }),
        _ => anyhow::bail!("unknown reduce strategy '{}': use sequential, atomic or partition", s),
    }
}

/// Gradients of `mean((clamp(o0) - clamp(o1))^2)` with respect to the raw outputs.
fn clamped_mse_grad(o0: &[f32], o1: &[f32]) -> (Vec<f32>, Vec<f32>, f32) {
    let n = o0.len() as f32;
    let mut g0 = vec![0f32; o0.len()];
    let mut g1 = vec![0f32; o1.len()];
    let mut loss = 0f32;
    for i in 0..o0.len() {
        let a = o0[i].clamp(0.0, 1.0);
        let b = o1[i].clamp(0.0, 1.0);
        let d = a - b;
        loss += d * d;
        let g = 2.0 * d / n;
        if o0[i] > 0.0 && o0[i] < 1.0 { g0[i] = g; }
        if o1[i] > 0.0 && o1[i] < 1.0 { g1[i] = -g; }
    }
    (g0, g1, loss / n)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => TransformerConfig::load(path)?,
        None => TransformerConfig {
            num_inputs: args.inputs,
            output_size: args.outputs,
            max_active_features: args.max_active,
            threads: args.threads,
            reduce: parse_reduce(&args.reduce, args.partitions)?,
            ..TransformerConfig::default()
        },
    };
    info!("config: {:?}", cfg);

    let mut rng = SmallRng::seed_from_u64(args.seed);
    let layer = DoubleFeatureTransformerSlice::new(&cfg, &mut rng).context("build layer")?;
    let active = cfg.max_active_features * 3 / 4;
    let b0 = SparseBatch::random(&mut rng, args.batch, cfg.max_active_features, cfg.num_inputs, active);
    let b1 = SparseBatch::random(&mut rng, args.batch, cfg.max_active_features, cfg.num_inputs, active);

    // warm-up
    layer.forward(&b0, &b1)?;

    let pb = ProgressBar::new(args.iters as u64);
    pb.set_style(ProgressStyle::with_template("{bar:40} {pos}/{len} iters {msg}")?);
    let t0 = Instant::now();
    let mut last_loss = 0f32;
    for _ in 0..args.iters {
        let (o0, o1) = layer.forward(&b0, &b1)?;
        let (g0, g1, loss) = clamped_mse_grad(&o0, &o1);
        let grads = layer.backward(&b0, &b1, &g0, &g1)?;
        std::hint::black_box(&grads);
        last_loss = loss;
        pb.set_message(format!("loss={:.6}", loss));
        pb.inc(1);
    }
    pb.finish_and_clear();
    let dt = t0.elapsed().as_secs_f64();
    let pos = (args.iters * args.batch) as f64;
    let rate = if dt > 0.0 { pos / dt } else { 0.0 };
    println!("{:.0} pos/s (iters={} batch={} elapsed={:.3}s loss={:.6})", rate, args.iters, args.batch, dt, last_loss);
    Ok(())
}
