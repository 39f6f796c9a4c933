use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{
    credit_purchase, get_platform_wallet, get_purchase_payout_state, get_teacher_wallet,
    health_check, list_reference_transactions, list_wallet_transactions, payout_purchase,
    reconcile_wallet, release_allocation, release_purchase, run_payout_sweep, AppState,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        // API v1 routes
        .nest(
            "/api/v1",
            Router::new()
                // Settlement entry points
                .route("/settlement/purchase/:purchase_id/credit", post(credit_purchase))
                .route("/settlement/purchase/:purchase_id/release", post(release_purchase))
                .route("/settlement/purchase/:purchase_id/payout", post(payout_purchase))
                .route(
                    "/settlement/purchase/:purchase_id/state",
                    get(get_purchase_payout_state),
                )
                .route(
                    "/settlement/allocation/:allocation_id/release",
                    post(release_allocation),
                )
                .route("/settlement/run", post(run_payout_sweep))
                // Wallet query surface
                .route("/wallet/platform/:currency", get(get_platform_wallet))
                .route("/wallet/teacher/:teacher_id/:currency", get(get_teacher_wallet))
                .route("/wallet/:wallet_id/transactions", get(list_wallet_transactions))
                .route("/wallet/:wallet_id/reconcile", get(reconcile_wallet))
                .route(
                    "/transactions/reference/:reference_id",
                    get(list_reference_transactions),
                ),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
