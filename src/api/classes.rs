use actix_web::{HttpResponse, web};
use serde_json::json;

use crate::auth::auth::AuthUser;
use crate::error::AppResult;
use crate::model::school::ClassRoster;
use crate::service::AttendanceService;

/// Students currently enrolled in a class
#[utoipa::path(
    get,
    path = "/api/classes/{class_id}/students",
    params(
        ("class_id" = String, Path, description = "Class identifier")
    ),
    responses(
        (status = 200, description = "Class roster", body = ClassRoster),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin/Teacher only"),
        (status = 404, description = "Class not found"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn class_roster(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let roster = service.roster_for(&auth, &path).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "data": roster
    })))
}
