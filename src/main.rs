use {
    lexpay::{
        AdminConfig, AppState,
        adapters::gateway::{GatewayClient, GatewayConfig},
        infra::postgres::PgStore,
        services::worker,
    },
    sqlx::postgres::PgPoolOptions,
    std::{env, sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
    uuid::Uuid,
};

fn required(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("{name} must be set"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();
    let database_url = required("DATABASE_URL");

    let gateway_config = Arc::new(GatewayConfig {
        base_url: required("GATEWAY_API_URL").trim_end_matches('/').to_string(),
        login: required("GATEWAY_X_LOGIN"),
        trans_key: required("GATEWAY_TRANS_KEY"),
        secret: required("GATEWAY_BUSINESS_SECRET"),
        frontend_url: required("FRONTEND_URL"),
    });
    let admin = Arc::new(AdminConfig {
        token: required("ADMIN_API_TOKEN"),
        actor_id: env::var("ADMIN_ACTOR_ID")
            .ok()
            .and_then(|s| Uuid::parse_str(&s).ok())
            .unwrap_or_else(Uuid::nil),
        actor_email: required("ADMIN_ACTOR_EMAIL"),
    });

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&database_url)
        .await
        .expect("failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let store = Arc::new(PgStore::new(pool));
    let state = AppState {
        store: store.clone(),
        gateway: Arc::new(GatewayClient::new((*gateway_config).clone())),
        gateway_config,
        admin,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tier_worker = tokio::spawn(worker::run_tier_recalc(
        store.clone(),
        shutdown_rx.clone(),
    ));
    let bonus_worker = tokio::spawn(worker::run_bonus_reset(store, shutdown_rx));

    let app = lexpay::app(state);
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    tracing::info!("listening on 0.0.0.0:3000");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    let _ = shutdown_tx.send(true);
    let _ = tier_worker.await;
    let _ = bonus_worker.await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
