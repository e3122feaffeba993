use clap::Parser;
use std::path::PathBuf;
use training::search::evaluate_experiment;
use training::util::BackendKind;

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a searched teacher on an image folder and print its genotype"
)]
struct Args {
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
    /// Experiment directory holding config.json, weights.bin and arch.bin.
    #[arg(long)]
    experiment: PathBuf,
    /// Image folder (root/<class>/<image>) to evaluate on.
    #[arg(long)]
    images: PathBuf,
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    training::util::validate_backend_choice(args.backend)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let (stats, genotype) = evaluate_experiment(&args.experiment, &args.images, args.batch_size)?;
    println!(
        "eval: batches={} loss={:.4} top1={:.2}% top5={:.2}%",
        stats.steps, stats.loss, stats.top1, stats.top5
    );
    println!("genotype = {genotype}");
    Ok(())
}
