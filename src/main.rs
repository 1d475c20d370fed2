use {
    recon_engine::{
        AppState,
        adapters::{
            email::{HttpEmailDispatcher, LogEmailDispatcher},
            gateway_client::HttpGateway,
            http::router,
        },
        config::Config,
        domain::email::EmailDispatcher,
        infra::postgres::PgStore,
        services::{Engine, sweeper::run_sweeper},
    },
    sqlx::postgres::PgPoolOptions,
    std::{sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
    tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recon_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("invalid configuration");
    let verifier = config
        .signature_verifier()
        .expect("webhook signature configuration");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .expect("failed to build http client");

    let gateway = Arc::new(HttpGateway::new(
        http.clone(),
        &config.gateway_base_url,
        &config.gateway_access_token,
    ));
    let email: Arc<dyn EmailDispatcher> = match &config.email_relay_url {
        Some(url) => Arc::new(HttpEmailDispatcher::new(http, url)),
        None => {
            tracing::warn!("EMAIL_RELAY_URL not set, emails will only be logged");
            Arc::new(LogEmailDispatcher)
        }
    };

    let store = Arc::new(PgStore::new(pool));
    let engine = Engine::new(store, gateway, email, config.engine.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(run_sweeper(engine.sweeper.clone(), shutdown_rx));

    let state = AppState { engine, verifier };
    let app = router(state, config.request_timeout);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind");
    tracing::info!(addr = %config.bind_addr, env = ?config.environment, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "sweeper task panicked");
    }
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
