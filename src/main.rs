/// Entry point for the Docker Health Exporter.
///
/// Logging is configured through `LOG_LEVEL` (default `info`), e.g.
/// `LOG_LEVEL=debug` or `LOG_LEVEL=docker_health_exporter=trace`.
///
/// # Errors
///
/// Returns an error if startup fails (e.g., the listen address is in use).
///
/// # Examples
///
/// ```bash
/// POLL_INTERVAL=30 CUSTOM_LABELS='{"com.example.team": "team"}' cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("LOG_LEVEL", "info"))
        .init();
    docker_health_exporter::run().await
}
