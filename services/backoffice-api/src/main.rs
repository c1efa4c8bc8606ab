use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use backoffice_api::{build_services, config::Config, handlers, metrics};
use dotenv::dotenv;
use prometheus::Registry;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("backoffice_api=info,actix_web=info"));
    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting Backoffice API...");

    // Load configuration
    let config = Config::from_env().expect("Failed to load configuration");
    config.validate().expect("Invalid configuration");

    info!(
        "Configuration loaded (storage: {:?}, providers: {})",
        config.database.backend,
        config.providers.mode.as_str()
    );

    let services = build_services(&config)
        .await
        .expect("Failed to initialize services");

    // Provider calls interrupted by a previous shutdown
    if let Err(e) = services.outbox.recover_stale().await {
        error!("Outbox recovery failed: {}", e);
    }

    let registry = Registry::new();
    metrics::register_metrics(&registry).expect("Failed to register metrics");

    let server_config = config.server.clone();
    let auth_config = config.auth.clone();
    let services_data = web::Data::new(services);
    let registry_data = web::Data::new(registry);

    info!(
        "Starting HTTP server on {}:{}",
        server_config.host, server_config.port
    );

    HttpServer::new(move || {
        let auth = auth_config.clone();
        App::new()
            .app_data(services_data.clone())
            .app_data(registry_data.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(move |cfg| handlers::configure_routes(cfg, &auth))
    })
    .workers(server_config.workers)
    .bind((server_config.host, server_config.port))?
    .run()
    .await
}
