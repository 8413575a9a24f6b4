#[tokio::main]
async fn main() {
    if let Err(e) = healthroll::run().await {
        tracing::error!(error = %e, "Worker stopped");
        std::process::exit(1);
    }
}
