use std::sync::Arc;
use std::time::Duration;

use onebot::{Endpoint, MessageBody, Target, TargetType};
use tokio_util::sync::CancellationToken;

use livewatch::config::AppConfig;
use livewatch::dispatcher::{BindingRoute, BindingSpec, Dispatcher};
use livewatch::store::MemoryStore;
use livewatch::utils::http_client::install_rustls_provider;

/// Allowance for the connection handshake on top of the ack window.
const CONNECT_ALLOWANCE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") || args.len() < 3 {
        print_help();
        return Ok(());
    }

    dotenvy::dotenv().ok();
    let config = AppConfig::from_env_or_default();
    install_rustls_provider();

    let kind = match args[1].as_str() {
        "group" => TargetType::Group,
        "private" => TargetType::Private,
        other => anyhow::bail!("unknown target type '{}', expected group or private", other),
    };
    let target = Target::parse(kind, &args[2])?;
    let token = args.get(3).map(String::as_str).filter(|t| !t.is_empty());
    let endpoint = Endpoint::parse(&args[0], token)?;
    let text = args
        .get(4)
        .cloned()
        .unwrap_or_else(|| "livewatch test message".to_string());

    println!("Sending to {} via {}", target, endpoint.redacted());

    let dispatcher = Dispatcher::new(
        config.dispatcher(),
        Arc::new(MemoryStore::new()),
        CancellationToken::new(),
    );
    dispatcher
        .reconcile(vec![BindingSpec {
            binding_id: "ping".to_string(),
            creator_id: "ping".to_string(),
            route: Ok(BindingRoute { endpoint, target }),
        }])
        .await;

    let result = dispatcher
        .send_and_wait(
            "ping",
            MessageBody::Text(text),
            config.ack_timeout + CONNECT_ALLOWANCE,
        )
        .await;
    dispatcher.shutdown().await;

    let result = result?;
    match result.error_message() {
        None => {
            println!("Acknowledged");
            Ok(())
        }
        Some(reason) => anyhow::bail!("delivery failed: {}", reason),
    }
}

fn print_help() {
    println!("livewatch-ping - Send one test message to a OneBot endpoint");
    println!();
    println!("Usage:");
    println!("  livewatch-ping <ws-url> <group|private> <target-id> [token] [text]");
    println!();
    println!("Environment variables:");
    println!("  LIVEWATCH_ACK_TIMEOUT_SECS=5");
}
