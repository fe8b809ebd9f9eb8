use actix_web::{web, HttpRequest, HttpResponse, Responder};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::core::DiscoveryEngine;
use crate::models::{DiscoverRequest, ErrorResponse, HealthResponse, RefreshResponse};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DiscoveryEngine>,
    /// HS256 secret for bearer tokens; `None` trusts the request body
    pub jwt_secret: Option<Arc<String>>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[allow(dead_code)]
    sub: String,
}

/// How the caller proved (or did not prove) who they are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Caller {
    Verified,
    Anonymous,
    /// No JWT secret configured; the gateway in front is trusted
    Trusted,
}

impl AppState {
    fn caller(&self, req: &HttpRequest) -> Caller {
        let Some(secret) = &self.jwt_secret else {
            return Caller::Trusted;
        };

        let token = req
            .headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim);

        let Some(token) = token else {
            return Caller::Anonymous;
        };

        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        ) {
            Ok(_) => Caller::Verified,
            Err(e) => {
                tracing::info!("Rejected bearer token: {}", e);
                Caller::Anonymous
            }
        }
    }
}

/// Configure all discovery routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/discover", web::post().to(discover))
        .route("/providers", web::get().to(list_providers))
        .route("/providers/refresh", web::post().to(refresh_providers))
        .route("/catalog/refresh", web::post().to(refresh_catalog));
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let index = state.engine.catalog().current().await;
    let active_provider = state.engine.providers().active_provider().await;

    let status = if index.as_ref().is_some_and(|i| !i.is_empty()) {
        "healthy"
    } else {
        "degraded"
    };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        catalog_size: index.as_ref().map(|i| i.len()).unwrap_or(0),
        catalog_refreshed_at: index.as_ref().map(|i| i.built_at()),
        active_provider,
        timestamp: chrono::Utc::now(),
    })
}

/// Discovery endpoint
///
/// POST /api/v1/discover
///
/// Request body:
/// ```json
/// {
///   "query": "pasta near Carlton",
///   "context": {
///     "userLocation": "Melbourne",
///     "conversationHistory": [{"role": "user", "content": "..."}],
///     "authenticated": false
///   }
/// }
/// ```
///
/// Every processed query answers 200 with a composed response.
async fn discover(
    state: web::Data<AppState>,
    body: web::Json<DiscoverRequest>,
    http_req: HttpRequest,
) -> impl Responder {
    if let Err(errors) = body.validate() {
        tracing::info!("Validation failed for discover request: {}", errors);
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Validation failed".to_string(),
            message: errors.to_string(),
            status_code: 400,
        });
    }

    let mut request = body.into_inner();
    match state.caller(&http_req) {
        Caller::Verified => request.context.authenticated = true,
        Caller::Anonymous => request.context.authenticated = false,
        Caller::Trusted => {}
    }

    let response = Arc::clone(&state.engine).discover_isolated(request).await;
    HttpResponse::Ok().json(response)
}

/// Current provider ranking, as last probed
async fn list_providers(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.engine.providers().descriptors().await)
}

/// Re-probe every provider
async fn refresh_providers(state: web::Data<AppState>, http_req: HttpRequest) -> impl Responder {
    if state.caller(&http_req) == Caller::Anonymous {
        return unauthorized();
    }

    HttpResponse::Ok().json(state.engine.providers().refresh().await)
}

/// Reload the catalog and rebuild the index
async fn refresh_catalog(state: web::Data<AppState>, http_req: HttpRequest) -> impl Responder {
    if state.caller(&http_req) == Caller::Anonymous {
        return unauthorized();
    }

    match state.engine.catalog().refresh().await {
        Ok(index) => HttpResponse::Ok().json(RefreshResponse {
            success: true,
            count: index.len(),
        }),
        Err(e) => {
            tracing::error!("Catalog refresh failed: {}", e);
            HttpResponse::ServiceUnavailable().json(ErrorResponse {
                error: "Catalog refresh failed".to_string(),
                message: e.to_string(),
                status_code: 503,
            })
        }
    }
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(ErrorResponse {
        error: "Unauthorized".to_string(),
        message: "A valid bearer token is required".to_string(),
        status_code: 401,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BusinessRecord, ComposedResponse, ResponseType};
    use crate::services::{CatalogStore, ProviderRegistry};
    use actix_web::{test, App};
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn state(jwt_secret: Option<&str>) -> AppState {
        let catalog = CatalogStore::preloaded(vec![BusinessRecord {
            id: "1".to_string(),
            name: "Spice Pavilion CBD".to_string(),
            description: "Modern Indian dining".to_string(),
            industry_type: "restaurant".to_string(),
            slug: "spice-pavilion-cbd".to_string(),
            status: "active".to_string(),
            location: Some("Melbourne CBD".to_string()),
        }]);

        AppState {
            engine: Arc::new(DiscoveryEngine::new(
                Arc::new(ProviderRegistry::empty()),
                Arc::new(catalog),
            )),
            jwt_secret: jwt_secret.map(|s| Arc::new(s.to_string())),
        }
    }

    fn token(secret: &str) -> String {
        let claims = serde_json::json!({ "sub": "user-1", "exp": 4_102_444_800u64 });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[actix_web::test]
    async fn test_discover_returns_composed_response() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(None)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/discover")
            .set_json(serde_json::json!({ "query": "spice pavilion" }))
            .to_request();
        let response: ComposedResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(response.response_type(), ResponseType::Exact);
        assert_eq!(response.recommendations.len(), 1);
    }

    #[actix_web::test]
    async fn test_oversized_query_is_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(None)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/discover")
            .set_json(serde_json::json!({ "query": "x".repeat(2001) }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_jwt_decides_authentication() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(Some("secret"))))
                .configure(configure),
        )
        .await;

        // Body flag alone is ignored when tokens are verified
        let req = test::TestRequest::post()
            .uri("/discover")
            .set_json(serde_json::json!({
                "query": "spice pavilion",
                "context": { "authenticated": true }
            }))
            .to_request();
        let response: ComposedResponse = test::call_and_read_body_json(&app, req).await;
        assert!(response.actions.iter().any(|a| a.kind == "signup"));

        let req = test::TestRequest::post()
            .uri("/discover")
            .insert_header(("Authorization", format!("Bearer {}", token("secret"))))
            .set_json(serde_json::json!({ "query": "spice pavilion" }))
            .to_request();
        let response: ComposedResponse = test::call_and_read_body_json(&app, req).await;
        assert!(response.actions.iter().any(|a| a.kind == "book"));
    }

    #[actix_web::test]
    async fn test_refresh_requires_token_when_configured() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(Some("secret"))))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post().uri("/catalog/refresh").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);

        let req = test::TestRequest::post()
            .uri("/catalog/refresh")
            .insert_header(("Authorization", format!("Bearer {}", token("secret"))))
            .to_request();
        let refreshed: RefreshResponse = test::call_and_read_body_json(&app, req).await;
        assert!(refreshed.success);
        assert_eq!(refreshed.count, 1);
    }

    #[actix_web::test]
    async fn test_health_reports_catalog() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(None)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let health: HealthResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(health.status, "healthy");
        assert_eq!(health.catalog_size, 1);
        assert!(health.active_provider.is_none());
    }
}
