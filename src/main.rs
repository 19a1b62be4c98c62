use axum::Router;
use soil_advisor_api::classifier::ModelBundle;
use soil_advisor_api::config::Config;
use soil_advisor_api::document_insight::DocumentInsightService;
use soil_advisor_api::gemini_client::GeminiClient;
use soil_advisor_api::handlers::{self, AppState};
use soil_advisor_api::inference::{InferenceClient, OfflineInferenceClient};
use soil_advisor_api::prediction::Predictor;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Headroom for multipart boundaries and headers on top of the file ceiling.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Main entry point for the application.
///
/// Initializes tracing and configuration, loads the classifier artifacts
/// (starting without them if they are missing or invalid), selects the
/// inference backend and starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "soil_advisor_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let models = match ModelBundle::load(&config.model_dir) {
        Ok(bundle) => Some(Arc::new(bundle)),
        Err(e) => {
            tracing::error!(
                "❌ Failed to load classifier artifacts from {}: {}. Predictions will use the LLM fallback",
                config.model_dir,
                e
            );
            None
        }
    };

    let llm: Arc<dyn InferenceClient> = if config.use_gemini {
        let client = GeminiClient::new(
            config.gemini_base_url.clone(),
            config.google_api_key.clone(),
            config.gemini_model.clone(),
            config.llm_timeout(),
        )?;
        tracing::info!(
            "✓ Gemini client initialized: {} (model {})",
            config.gemini_base_url,
            config.gemini_model
        );
        Arc::new(client)
    } else {
        Arc::new(OfflineInferenceClient)
    };

    let retry = config.retry_policy();
    let app_state = Arc::new(AppState {
        predictor: Predictor::new(models, llm.clone(), retry),
        insight: DocumentInsightService::new(llm, retry, config.max_upload_bytes),
        config: config.clone(),
    });

    // 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let body_limit = config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;
    let protected_routes = handlers::api_routes(body_limit).layer(
        ServiceBuilder::new()
            .layer(RequestBodyLimitLayer::new(body_limit))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Liveness and health bypass rate limiting
    let app = Router::new()
        .merge(handlers::public_routes())
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
