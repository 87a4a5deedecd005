use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dferelay_observability::init();

    let services = dferelay_api::app::build_services()?;

    // Background loops: the sync scheduler and the delivery worker.
    let scheduler = Arc::clone(&services.scheduler);
    tokio::spawn(async move { scheduler.run().await });

    let worker = Arc::clone(&services.worker);
    tokio::spawn(async move { worker.run(Duration::from_secs(10)).await });

    let app = dferelay_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
