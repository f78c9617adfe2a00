use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;
use tracing::warn;

use crate::{
    api::{account, attendance, classes, dashboard},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    error::{json_config, query_config},
    service::{AccountService, AttendanceService},
};

/// Everything the handlers pull out of `app_data`.
#[derive(Clone)]
pub struct AppState {
    pub config: web::Data<Config>,
    pub attendance: web::Data<AttendanceService>,
    pub accounts: web::Data<AccountService>,
}

impl AppState {
    pub fn new(config: Config, attendance: AttendanceService, accounts: AccountService) -> Self {
        Self {
            config: web::Data::new(config),
            attendance: web::Data::from(Arc::new(attendance)),
            accounts: web::Data::from(Arc::new(accounts)),
        }
    }
}

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let per_ms = if requests_per_min == 0 {
        1
    } else {
        (60_000 / requests_per_min as u64).max(1)
    };
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min.max(1))
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_else(|| {
            warn!(requests_per_min, "Invalid rate limit, using governor defaults");
            GovernorConfig::default()
        });
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, state: &AppState) {
    let config = state.config.get_ref();

    cfg.app_data(state.config.clone())
        .app_data(state.attendance.clone())
        .app_data(state.accounts.clone())
        .app_data(json_config())
        .app_data(query_config());

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/signup")
                    .wrap(build_limiter(config.rate_signup_per_min))
                    .route(web::post().to(handlers::signup)),
            )
            .service(
                web::resource("/verify-email")
                    .wrap(build_limiter(config.rate_signup_per_min))
                    .route(web::get().to(handlers::verify_email)),
            )
            .service(
                web::resource("/login")
                    .wrap(build_limiter(config.rate_login_per_min))
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/forgot-password")
                    .wrap(build_limiter(config.rate_password_per_min))
                    .route(web::post().to(handlers::forgot_password)),
            )
            .service(
                web::resource("/reset-password")
                    .wrap(build_limiter(config.rate_password_per_min))
                    .route(web::post().to(handlers::reset_password)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(build_limiter(config.rate_protected_per_min)) // rate limiting
            .service(
                web::scope("/attendance")
                    // /attendance
                    .service(
                        web::resource("")
                            .route(web::post().to(attendance::submit_attendance))
                            .route(web::get().to(attendance::list_attendance)),
                    )
                    // /attendance/summary
                    .service(
                        web::resource("/summary")
                            .route(web::get().to(attendance::attendance_summary)),
                    ),
            )
            // /classes/{class_id}/students
            .service(
                web::resource("/classes/{class_id}/students")
                    .route(web::get().to(classes::class_roster)),
            )
            .service(
                web::resource("/dashboard-stats").route(web::get().to(dashboard::dashboard_stats)),
            )
            .service(web::resource("/me").route(web::get().to(account::me)))
            .service(
                web::resource("/change-password").route(web::put().to(account::change_password)),
            ),
    );
}
