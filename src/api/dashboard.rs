use actix_web::{HttpResponse, web};
use serde_json::json;

use crate::auth::auth::AuthUser;
use crate::error::AppResult;
use crate::model::school::DashboardStats;
use crate::service::AttendanceService;

/// Entity counts and today's attendance (admin only)
#[utoipa::path(
    get,
    path = "/api/dashboard-stats",
    responses(
        (status = 200, description = "Dashboard statistics", body = DashboardStats),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin only"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Dashboard"
)]
pub async fn dashboard_stats(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
) -> AppResult<HttpResponse> {
    let stats = service.dashboard(&auth).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "data": stats
    })))
}
