use actix_cors::Cors;
use actix_web::{error, http::StatusCode, middleware, web, App, HttpResponse, HttpServer};
use discovery_engine::config::{CatalogSettings, CatalogSourceKind, LoggingSettings, Settings};
use discovery_engine::routes::{self, AppState};
use discovery_engine::services::{
    CatalogError, CatalogSource, CatalogStore, FileCatalog, HttpCatalogClient, PostgresCatalog,
    ProviderRegistry,
};
use discovery_engine::DiscoveryEngine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// JSON error response for JSON payload errors
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST);
        HttpResponse::build(status).json(self)
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(
    err: error::JsonPayloadError,
    req: &actix_web::HttpRequest,
) -> actix_web::Error {
    info!("JSON payload error on {}: {}", req.path(), err);
    JsonError {
        error: "invalid_json".to_string(),
        message: format!("Invalid JSON: {}", err),
        status_code: 400,
    }
    .into()
}

/// Handle query payload errors
pub fn handle_query_payload_error(
    err: error::QueryPayloadError,
    _req: &actix_web::HttpRequest,
) -> actix_web::Error {
    JsonError {
        error: "invalid_query".to_string(),
        message: format!("Invalid query: {}", err),
        status_code: 400,
    }
    .into()
}

fn init_logging(settings: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if settings.format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.json().init();
    }
}

async fn catalog_source(
    settings: &CatalogSettings,
) -> Result<Arc<dyn CatalogSource>, CatalogError> {
    let fetch_timeout = Duration::from_secs(settings.fetch_timeout_secs);

    let source: Arc<dyn CatalogSource> = match settings.source {
        CatalogSourceKind::File => Arc::new(FileCatalog::new(&settings.file_path)),
        CatalogSourceKind::Http => {
            let http = settings.http.as_ref().ok_or_else(|| {
                CatalogError::NotConfigured("catalog.http is missing".to_string())
            })?;
            Arc::new(HttpCatalogClient::new(http, fetch_timeout)?)
        }
        CatalogSourceKind::Postgres => {
            let database = settings.database.as_ref().ok_or_else(|| {
                CatalogError::NotConfigured("catalog.database is missing".to_string())
            })?;
            Arc::new(PostgresCatalog::from_settings(database).await?)
        }
    };

    Ok(source)
}

/// Keep the catalog index and provider ranking fresh in the background
fn spawn_refresh_tasks(
    engine: Arc<DiscoveryEngine>,
    catalog_every: Duration,
    providers_every: Duration,
) {
    let catalog = Arc::clone(engine.catalog());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(catalog_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = catalog.refresh().await {
                warn!("Scheduled catalog refresh failed, keeping last index: {}", e);
            }
        }
    });

    let providers = Arc::clone(engine.providers());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(providers_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            providers.refresh().await;
        }
    });
}

fn startup_error(context: &str, e: impl std::fmt::Display) -> std::io::Error {
    error!("{}: {}", context, e);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    init_logging(&settings.logging);
    info!("Starting discovery engine...");

    let providers = Arc::new(
        ProviderRegistry::from_settings(&settings.providers)
            .map_err(|e| startup_error("Failed to initialize providers", e))?,
    );
    if providers.is_empty() {
        warn!("No text-generation providers configured, responses will be rule-based");
    } else {
        let ranking = providers.refresh().await;
        info!(
            "Provider registry initialized: {} configured, active: {:?}",
            ranking.len(),
            providers.active_provider().await
        );
    }

    let source = catalog_source(&settings.catalog)
        .await
        .map_err(|e| startup_error("Failed to initialize catalog source", e))?;
    let catalog = Arc::new(
        CatalogStore::new(source, Duration::from_secs(settings.catalog.fetch_timeout_secs))
            .with_retry_backoff(Duration::from_secs(settings.catalog.retry_backoff_secs)),
    );

    // Serve degraded rather than refuse to start; the next refresh may succeed
    if let Err(e) = catalog.refresh().await {
        warn!("Initial catalog load failed: {}", e);
    }

    let engine = Arc::new(
        DiscoveryEngine::from_settings(&settings, providers, catalog)
            .map_err(|e| startup_error("Invalid guardrail configuration", e))?,
    );

    spawn_refresh_tasks(
        Arc::clone(&engine),
        Duration::from_secs(settings.catalog.refresh_secs.max(1)),
        Duration::from_secs(settings.providers.selection_ttl_secs.max(1)),
    );

    if settings.auth.jwt_secret.is_none() {
        warn!("No JWT secret configured, trusting the authenticated flag in request bodies");
    }

    let app_state = AppState {
        engine,
        jwt_secret: settings.auth.jwt_secret.clone().map(Arc::new),
    };

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .app_data(web::QueryConfig::default().error_handler(handle_query_payload_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await
}
