use anyhow::{ensure, Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use animegan_rs::{Config, Stylizer};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let config = Config::parse();

    ensure!(
        config.model_path.is_file(),
        "Model path does not exist: {}",
        config.model_path.display()
    );
    ensure!(
        config.input.exists(),
        "Input path does not exist: {}",
        config.input.display()
    );

    if let Some(num_threads) = config.num_threads {
        ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()?;
    }

    info!("animegan-rs v{}", env!("CARGO_PKG_VERSION"));
    let stylizer = Stylizer::with_onnx_model(config)
        .context("Failed to initialize the style transfer model")?;
    let summary = stylizer.process_directory()?;
    stylizer.model().release()?;

    ensure!(
        summary.failed == 0,
        "{} of {} image(s) failed",
        summary.failed,
        summary.failed + summary.succeeded
    );
    Ok(())
}
