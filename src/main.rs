//! Payment Recon webhook server
//!
//! Development binary wiring the webhook endpoint to the in-memory store.
//! Production deployments embed the library with a real store and provider
//! client instead.

use std::sync::Arc;

use clap::Parser;
use tower_http::trace::TraceLayer;

use payment_recon::config::WebhookConfig;
use payment_recon::memory::InMemoryStore;
use payment_recon::notify::NoopNotifier;
use payment_recon::provider::NoopProvider;
use payment_recon::sweep::Sweeper;
use payment_recon::webhook::{webhook_router, Stores, WebhookState};

/// Payment Recon webhook server
#[derive(Parser, Debug)]
#[command(name = "payment-recon")]
#[command(version)]
#[command(about = "Stripe webhook ingestion and payout reconciliation")]
#[command(long_about = r#"Stripe webhook ingestion and payout reconciliation

Receives checkout, payout, and charge events, records fee payments, and
reconciles bank deposits against them. Configuration comes from the
environment:

  STRIPE_WEBHOOK_SECRET          signing secret (whsec_...)
  CANDIDATE_FEE_PRICE_ID         price id for candidate sponsorship fees
  TEAM_FEE_PRICE_ID              price id for team roster fees
  WEBHOOK_MAX_TIMESTAMP_AGE      replay window in seconds (default 300)
  WEBHOOK_BACKFILL_CONCURRENCY   per-payout provider lookup cap (default 4)
  WEBHOOK_SWEEP_INTERVAL         sweep period in seconds, 0 disables

EXAMPLES:
  # Start on the default port
  payment-recon

  # Custom port with verbose logging
  payment-recon --port 3010 --verbose
"#)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3001")]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = WebhookConfig::from_env()?;
    let sweep_interval = config.sweep_interval;

    let store = Arc::new(InMemoryStore::new());
    let stores = Stores {
        payments: store.clone(),
        payouts: store.clone(),
        links: store.clone(),
        targets: store.clone(),
    };

    let state = Arc::new(WebhookState::new(
        config,
        stores,
        Arc::new(NoopProvider),
        Arc::new(NoopNotifier),
    ));

    let sweeper = Arc::new(Sweeper::new(store.clone(), store.clone(), store));
    tokio::spawn(sweeper.run(sweep_interval));

    let app = webhook_router(state).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!("payment-recon webhook server starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
