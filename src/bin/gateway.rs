use edgeloop::config::{gateway_app, GatewayConfig};
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let matches = gateway_app().get_matches();
    let config = GatewayConfig::from_matches(&matches)?;

    if let Err(e) = edgeloop::run_gateway(config).await {
        error!(error = %e, "sensing gateway failed to start");
        return Err(e.into());
    }

    Ok(())
}
