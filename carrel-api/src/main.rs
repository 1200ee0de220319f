use std::net::SocketAddr;
use std::sync::Arc;

use carrel_api::{app, AppState, AuthConfig};
use carrel_core::{BookingRules, SystemClock};
use carrel_store::app_config::Config;
use carrel_store::{
    DbClient, RedisClient, StorageBackend, StoreBookingRepository, StoreSeatRepository,
    StoreUserRepository,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carrel_api=debug,carrel_core=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!("Starting Carrel API on port {}", config.server.port);

    let auth = AuthConfig {
        secret: config.auth.jwt_secret.clone(),
        expiration: config.auth.jwt_expiration_seconds,
        bcrypt_cost: config.auth.bcrypt_cost,
    };
    let rules: BookingRules = config.business_rules.clone().into();
    let clock = Arc::new(SystemClock);

    let mut app_state = match config.storage.backend {
        StorageBackend::Postgres => {
            let db = DbClient::new(&config.database).await?;
            db.migrate().await?;
            AppState::new(
                Arc::new(StoreSeatRepository::new(db.pool.clone())),
                Arc::new(StoreBookingRepository::new(db.pool.clone())),
                Arc::new(StoreUserRepository::new(db.pool.clone())),
                clock,
                rules,
                auth,
            )
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            AppState::in_memory(clock, rules, auth)
        }
    };

    match config.redis.url() {
        Some(url) => {
            let redis = RedisClient::new(url)?;
            app_state = app_state.with_rate_limit(Arc::new(redis), config.redis.rate_limit_per_minute);
        }
        None => tracing::info!("Redis not configured; rate limiting disabled"),
    }

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
