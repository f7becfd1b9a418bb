use edgeloop::config::{controller_app, ControllerConfig};
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let matches = controller_app().get_matches();
    let config = ControllerConfig::from_matches(&matches)?;

    if let Err(e) = edgeloop::run_controller(config).await {
        error!(error = %e, "actuator controller failed to start");
        return Err(e.into());
    }

    Ok(())
}
