use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;

use spaces_vm::api::{self, AppState};
use spaces_vm::auth::AuthService;
use spaces_vm::clock::{Clock, SystemClock};
use spaces_vm::config::Config;
use spaces_vm::membership::MembershipService;
use spaces_vm::reminders::{shutdown_channel, CheckInEngine, MentionEngine, Notifier, StoreNotifier};
use spaces_vm::store::Store;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    // Initialize store
    let store = Arc::new(
        Store::open(&config.database_path, config.store_busy_timeout)
            .expect("Failed to initialize database"),
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let auth_service = Arc::new(AuthService::new(config.jwt_secret.clone()));
    let membership = Arc::new(
        MembershipService::with_clock(store.clone(), clock.clone())
            .with_default_check_in_interval(config.default_check_in_interval_secs),
    );

    // Reminders land in the local notifications inbox
    let notifier: Arc<dyn Notifier> = Arc::new(StoreNotifier::new(store.clone(), clock.clone()));
    let mentions = Arc::new(
        MentionEngine::with_clock(store.clone(), notifier.clone(), clock.clone())
            .with_cooldown(config.mention_cooldown),
    );
    let checkins = Arc::new(
        CheckInEngine::with_clock(store.clone(), notifier, clock)
            .with_cooldown(config.checkin_cooldown),
    );

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mention_loop = mentions
        .clone()
        .spawn(config.mention_scan_interval, shutdown_rx.clone());
    let checkin_loop = checkins
        .clone()
        .spawn(config.checkin_scan_interval, shutdown_rx);

    log::info!("Database: {}", config.database_path);
    log::info!("Starting spaces-vm server on port {}", config.port);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            // Registered on its own for the AuthUser extractor
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(AppState {
                store: store.clone(),
                auth_service: auth_service.clone(),
                membership: membership.clone(),
                mentions: mentions.clone(),
                checkins: checkins.clone(),
            }))
            .configure(api::configure_routes)
    })
    .workers(1)
    .bind(("0.0.0.0", config.port))?;

    let result = server.run().await;

    // Server has stopped; let the reminder loops finish their current tick
    log::info!("Shutting down reminder loops");
    let _ = shutdown_tx.send(true);
    for handle in [mention_loop, checkin_loop] {
        if let Err(e) = handle.await {
            log::error!("Reminder loop ended abnormally: {}", e);
        }
    }

    result
}
