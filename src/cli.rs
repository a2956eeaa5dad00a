//! Command-line surface.
//!
//! `start` runs the service until a shutdown signal. Any other subcommand
//! is treated as a handler name: one JSON value is read from stdin,
//! dispatched through the router, and the JSON response is printed to
//! stdout. The exit code is 0 when dispatch produced a success status and
//! 1 otherwise.

use {
    crate::Result,
    crate::service::Service,
    bytes::Bytes,
    clap::Parser,
    std::io::Read,
    std::sync::Arc,
};

#[derive(Parser, Debug)]
#[command(
    name = "svckit",
    about = "Configuration-driven microservice runtime",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the service until SIGTERM or Ctrl+C.
    Start,

    /// Any other name dispatches into the handler registered under that
    /// route, reading one JSON value from stdin.
    #[command(external_subcommand)]
    Dispatch(Vec<String>),
}

/// Parses the process arguments and runs the service accordingly.
///
/// Returns the process exit code.
pub async fn run(service: Arc<Service>) -> Result<u8> {
    run_with_args(service, std::env::args()).await
}

/// Testable variant of [`run`] taking explicit arguments.
pub async fn run_with_args(
    service: Arc<Service>,
    args: impl IntoIterator<Item = String>,
) -> Result<u8> {
    let cli = Cli::parse_from(args);

    match cli.command {
        Command::Start => {
            service.run_until_signal().await?;
            Ok(0)
        }
        Command::Dispatch(parts) => {
            let handler = parts
                .first()
                .map(String::as_str)
                .unwrap_or_default()
                .to_string();
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;
            dispatch_handler(&service, &handler, input.into_bytes()).await
        }
    }
}

/// Starts the service, dispatches one request into the named handler and
/// prints the JSON response body.
pub async fn dispatch_handler(service: &Service, handler: &str, body: Vec<u8>) -> Result<u8> {
    service.start().await?;

    let outcome = dispatch_once(service, handler, body).await;

    // Dispatch errors must not leak a running service.
    if let Err(err) = service.stop().await {
        tracing::warn!(error = %err, "service stop after dispatch failed");
    }

    outcome
}

async fn dispatch_once(service: &Service, handler: &str, body: Vec<u8>) -> Result<u8> {
    let router = service
        .router()
        .ok_or_else(|| crate::Error::internal("router missing after start"))?;

    let route = router
        .find_by_pattern(handler)
        .ok_or_else(|| crate::Error::not_found(format!("no handler registered as {handler:?}")))?;

    let response = service
        .dispatch(route.method.clone(), &route.pattern, Bytes::from(body))
        .await?;

    let status = response.status();
    println!("{}", String::from_utf8_lossy(response.body()));

    Ok(if status.is_success() { 0 } else { 1 })
}
