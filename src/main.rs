use clap::Parser; // for cli
use color_eyre::eyre::{Result, WrapErr};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use launchpad_gateway::store::expiry_sweeper;
use launchpad_gateway::{AppState, Args, MemoryStore, RateLimitStore, RateLimiter, build_router};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_filter))
        .wrap_err("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let policies = args.policies().wrap_err("Invalid rate limit policy")?;

    let store: Arc<dyn RateLimitStore> = Arc::new(MemoryStore::with_grace(args.expiry_grace()));
    let limiter = Arc::new(RateLimiter::new(Arc::clone(&store), args.store_timeout()));

    // spawn the background expiry sweeper
    let sweeper_clock = Arc::clone(limiter.clock());
    let sweep_interval = args.sweep_interval();
    tokio::spawn(async move {
        expiry_sweeper(store, sweeper_clock, sweep_interval).await;
    });

    let state = Arc::new(AppState::new(limiter, policies.clone(), args.trust_proxy));
    let app = build_router(state);

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", addr))?;

    info!(address = %addr, trust_proxy = args.trust_proxy, "Gateway running");
    for policy in [&policies.newsletter, &policies.apply] {
        info!(
            scope = %policy.scope,
            max_requests = policy.limit.max_requests(),
            window_ms = policy.limit.window_ms(),
            on_store_error = ?policy.on_store_error,
            "Rate limit policy"
        );
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .wrap_err("Server error")?;

    Ok(())
}
