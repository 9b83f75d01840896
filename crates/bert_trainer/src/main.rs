use anyhow::Result;
use bert_trainer::cli::{Cli, Commands};
use bert_trainer::{config, evaluate, train};
use clap::Parser;

fn main() -> Result<()> {
    // 1. File logging
    let file_appender = tracing_appender::rolling::daily("logs", "bert_trainer.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // 2. Console logging
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    // 3. Panic hook
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(target: "panic", "CRASH at {}: {}", location, msg);
        eprintln!("CRASH at {}: {}", location, msg);
    }));

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => train::run(args)?,
        Commands::Evaluate(args) => evaluate::run(args)?,
        Commands::Init(args) => config::run_init(args)?,
    }

    Ok(())
}
