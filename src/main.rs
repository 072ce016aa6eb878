//! Prompt Forge - Automatic Prompt Training
//!
//! Collects feedback on deployed prompts, retrains them when the
//! feedback says they need it, and deploys improvements that pass
//! evaluation.

// Use the library crate for all modules
use prompt_forge::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (WARN level by default, use RUST_LOG=info for debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    // Run CLI
    cli::run().await
}
