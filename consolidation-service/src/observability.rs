use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins when set; otherwise the engine logs at info.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("consolidation_service=info,turbine_client=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
