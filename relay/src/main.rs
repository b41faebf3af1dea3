use clap::Parser;

use args::Args;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init(&args.log_filter, args.log_format);

    let mut config = config::Config::from_env()?;
    config.port = args.port;
    let port = config.port;

    let router = llm::router(std::sync::Arc::new(config));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;

    log::info!("relay listening on 0.0.0.0:{port}");
    axum::serve(listener, router).await?;

    Ok(())
}
