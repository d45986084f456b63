use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bazaar_wallet::{AppConfig, SqliteUserStore, UserStore};
use bazaar_wallet_server::{error, pipeline, routes, state::AppState};

fn build_cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        // Default: allow localhost on any port
        Cors::default()
            .allowed_origin_fn(|origin, _| {
                origin
                    .to_str()
                    .map(|o| o == "http://localhost" || o.starts_with("http://localhost:"))
                    .unwrap_or(false)
            })
            .allow_any_method()
            .allowed_headers(vec!["content-type", "authorization", "x-wallet-signature"])
            .max_age(3600)
    } else {
        let mut cors = Cors::default();
        for origin in origins {
            cors = cors.allowed_origin(origin);
        }
        cors.allow_any_method()
            .allowed_headers(vec!["content-type", "authorization", "x-wallet-signature"])
            .max_age(3600)
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration rejected — refusing to start");
            std::process::exit(1);
        }
    };
    tracing::info!(config = %config.summary(), "configuration loaded");

    let db_path =
        std::env::var("WALLET_DB_PATH").unwrap_or_else(|_| "./bazaar-wallet.db".to_string());
    let users: Arc<dyn UserStore> = match SqliteUserStore::open(&db_path) {
        Ok(store) => {
            tracing::info!("user registry: SQLite at {db_path}");
            Arc::new(store)
        }
        Err(e) => {
            // No in-memory fallback: a registry lost on restart would let
            // revoked sessions come back from the dead.
            tracing::error!("failed to open user registry at {db_path}: {e}");
            std::process::exit(1);
        }
    };

    let state = web::Data::new(AppState::new(config.clone(), users));

    // Idle rate-limit buckets are correct without cleanup (lazy reset), this
    // only reclaims memory from keys that stopped talking to us.
    {
        let api = state.api_limiter.clone();
        let login = state.login_limiter.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                tick.tick().await;
                let purged = api.purge_idle() + login.purge_idle();
                if purged > 0 {
                    tracing::debug!(purged, "dropped idle rate-limit buckets");
                }
            }
        });
    }

    let port = config.port;
    let origins = config.allowed_origins.clone();
    let max_body = config.max_body_bytes;

    tracing::info!("bazaar wallet listening at http://localhost:{port}");

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&origins))
            .wrap(middleware::from_fn(pipeline::request_logger))
            .app_data(
                web::JsonConfig::default()
                    .limit(max_body)
                    .error_handler(error::json_error_handler),
            )
            .app_data(state.clone())
            .service(
                web::scope("/api")
                    .wrap(middleware::from_fn(pipeline::api_rate_limit))
                    .service(routes::login)
                    .service(routes::logout)
                    .service(routes::me)
                    .service(routes::deposit)
                    .service(routes::callback)
                    .service(routes::wallet_health)
                    .service(routes::revoke_sessions),
            )
            .service(routes::health)
            .service(routes::metrics_endpoint)
    })
    .bind(("0.0.0.0", port))?
    .shutdown_timeout(10)
    .run()
    .await
}
