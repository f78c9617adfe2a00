use actix_web::middleware::NormalizePath;
use actix_web::{App, HttpResponse, HttpServer, Responder, get};
use anyhow::Context;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi; // needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use edumanage::config::{Config, StoreBackend};
use edumanage::db::init_db;
use edumanage::docs::ApiDoc;
use edumanage::notify::{LogMailer, Mailer, SmtpMailer};
use edumanage::routes::{self, AppState};
use edumanage::service::{AccountService, AttendanceService};
use edumanage::store::{AccountStore, AttendanceStore, LocalStore, MySqlStore};
use edumanage::utils::email_cache::EmailCache;

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok", "service": "edumanage"}))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(config.log_level.parse::<Level>().unwrap_or(Level::DEBUG))
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!(backend = ?config.store_backend, "Server starting...");

    let (attendance_store, account_store): (Arc<dyn AttendanceStore>, Arc<dyn AccountStore>) =
        match config.store_backend {
            StoreBackend::MySql => {
                let store = Arc::new(MySqlStore::new(init_db(&config).await?));
                (store.clone(), store)
            }
            StoreBackend::Local => {
                let store = Arc::new(
                    LocalStore::open(&config.local_store_path)
                        .await
                        .with_context(|| {
                            format!("Failed to open {}", config.local_store_path.display())
                        })?,
                );
                (store.clone(), store)
            }
        };

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(smtp, &config.mail_from)?),
        None => {
            warn!("SMTP_HOST not set, outgoing mail will only be logged");
            Arc::new(LogMailer)
        }
    };

    let email_cache = EmailCache::default();

    // Warm up addresses of accounts active in the last 30 days
    let warmup_cache = email_cache.clone();
    let warmup_store = account_store.clone();
    actix_web::rt::spawn(async move {
        if let Err(e) = warmup_cache.warmup(warmup_store.as_ref(), 30, 250).await {
            error!(error = %e, "Failed to warm up email cache");
        }
    });

    let attendance = AttendanceService::new(
        attendance_store,
        config.store_timeout,
        config.roster_policy,
    );
    let accounts = AccountService::new(account_store, mailer, email_cache, config.clone());

    let server_addr = config.server_addr.clone();
    let state = AppState::new(config, attendance, accounts);

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .service(index)
            // auth + protected routes with rate limiting
            .configure(|cfg| routes::configure(cfg, &state))
    })
    .bind(&server_addr)
    .with_context(|| format!("Failed to bind {server_addr}"))?
    .run()
    .await?;

    Ok(())
}
