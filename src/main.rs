use std::path::PathBuf;

use seqcore::audio::{Discard, InstrumentRegistry};
use seqcore::{RunMode, Score, register_builtin_types};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next().map(PathBuf::from) else {
        eprintln!("usage: seqcore <score.ron> [end_sample]");
        std::process::exit(2);
    };
    let end_sample: u64 = match args.next() {
        Some(arg) => arg.parse()?,
        None => 0,
    };

    let score = Score::load(&path)?;
    let mut registry = InstrumentRegistry::with_sink(score.context, Box::new(Discard));
    register_builtin_types(&mut registry)?;
    let mut scheduler = score.build_scheduler();
    score.apply(&mut registry, &mut scheduler)?;

    let summary = scheduler.run(&mut registry, 0, end_sample, RunMode::ONCE);

    let seconds = summary.ticks as f64 / score.context.sample_rate.max(1) as f64;
    info!(
        score = %score.name,
        frames = registry.bus().frames(),
        seconds,
        peak = registry.bus().peak(),
        voices_left = scheduler.voices().len(),
        reason = ?summary.reason,
        "render finished"
    );

    Ok(())
}
