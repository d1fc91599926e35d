use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use relief_match::config::{Settings, SinkKind};
use relief_match::core::MatchingEngine;
use relief_match::routes::{self, operator::AppState};
use relief_match::services::{
    DispatchSink, LogSink, RedisLedgerStore, StoreClient, StoreCollections, WebhookSink,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(level: &str, format: &str) {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| level.to_string());
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| format.to_string());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_level(true);

    if format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.json().init();
    }
}

fn other(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, message)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(other(format!("Configuration error: {}", e)));
        }
    };

    init_logging(&settings.logging.level, &settings.logging.format);
    info!("Starting relief-match service...");

    // Radius and interval problems are fatal at startup
    if let Err(e) = settings.matching.validate() {
        error!("Invalid matching configuration: {}", e);
        return Err(other(e.to_string()));
    }

    let store_timeout = Duration::from_secs(settings.store.timeout_secs.unwrap_or(30));
    let mut store = StoreClient::new(
        settings.store.endpoint.clone(),
        settings.store.api_key.clone(),
        settings.store.project_id.clone(),
        settings.store.database_id.clone(),
        StoreCollections {
            help_requests: settings.store.help_requests_collection.clone(),
            volunteers: settings.store.volunteers_collection.clone(),
        },
        store_timeout,
    )
    .map_err(|e| other(format!("Failed to build store client: {}", e)))?;
    if let Some(limit) = settings.store.page_limit {
        store = store.with_page_limit(limit);
    }
    let store = Arc::new(store);

    info!("Data store client initialized");

    let sink: Arc<dyn DispatchSink> = match (settings.dispatch.kind, &settings.dispatch.webhook_url) {
        (SinkKind::Webhook, Some(url)) => {
            let timeout = Duration::from_secs(settings.dispatch.timeout_secs.unwrap_or(10));
            let sink = WebhookSink::new(url.clone(), timeout)
                .map_err(|e| other(format!("Failed to build webhook sink: {}", e)))?;
            info!("Dispatching notifications to webhook {}", url);
            Arc::new(sink)
        }
        (SinkKind::Webhook, None) => {
            error!("dispatch.kind = webhook requires dispatch.webhook_url");
            return Err(other("Missing dispatch.webhook_url".to_string()));
        }
        (SinkKind::Log, _) => {
            info!("Dispatching notifications to the log");
            Arc::new(LogSink)
        }
    };

    let mut builder = MatchingEngine::builder(store.clone(), store, sink)
        .config(settings.matching.engine_config())
        .index(settings.matching.index.build());

    // Ledger persistence is optional - the engine runs with an in-memory ledger without it
    if let Some(redis_url) = &settings.ledger.redis_url {
        let limit = Duration::from_secs(settings.matching.ledger_timeout_secs);
        let connect = tokio::time::timeout(limit, RedisLedgerStore::new(redis_url, settings.ledger.key.clone()));
        match connect.await {
            Ok(Ok(ledger_store)) => {
                info!("Ledger persistence enabled (key: {})", settings.ledger.key);
                builder = builder.ledger_store(Arc::new(ledger_store));
            }
            Ok(Err(e)) => warn!("Failed to connect to Redis ({}), ledger will not persist", e),
            Err(_) => warn!("Redis did not answer within {:?}, ledger will not persist", limit),
        }
    }

    let engine = builder.build().map_err(|e| other(e.to_string()))?;
    engine
        .start(settings.matching.poll_interval(), settings.matching.radius_meters)
        .await
        .map_err(|e| other(e.to_string()))?;

    info!(
        "Matching engine running (radius: {} m, interval: {}s, index: {:?})",
        settings.matching.radius_meters, settings.matching.poll_interval_secs, settings.matching.index
    );

    let app_state = AppState {
        engine: engine.clone(),
    };

    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(2);

    info!("Starting HTTP server on {}:{}", host, port);

    let server = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run();

    let result = server.await;

    engine.stop().await;
    info!("Shutdown complete");

    result
}
