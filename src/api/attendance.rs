use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::auth::auth::AuthUser;
use crate::error::AppResult;
use crate::model::attendance::{
    AttendanceFilter, AttendanceRecord, AttendanceSummary, StatusCount, SubmitAttendance,
    SummaryFilter,
};
use crate::service::AttendanceService;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct AttendanceQuery {
    /// Only records of this class
    pub class_id: Option<String>,
    /// Only records of this day (YYYY-MM-DD)
    pub date: Option<String>,
    /// Only records of this student
    pub student_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct SummaryQuery {
    pub class_id: Option<String>,
    /// Inclusive lower bound (YYYY-MM-DD)
    pub start_date: Option<String>,
    /// Inclusive upper bound (YYYY-MM-DD)
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AttendanceListResponse {
    pub status: String,
    pub data: Vec<AttendanceRecord>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SummaryResponse {
    pub status: String,
    pub data: Vec<StatusCount>,
    pub summary: AttendanceSummary,
}

/// Record attendance for one class on one day
///
/// Replaces every record previously stored for the same class and date.
#[utoipa::path(
    post,
    path = "/api/attendance",
    request_body = SubmitAttendance,
    responses(
        (status = 201, description = "Attendance recorded", body = Object, example = json!({
            "status": "success",
            "message": "Attendance recorded successfully",
            "data": { "recorded": 2 }
        })),
        (status = 400, description = "Invalid batch", body = Object, example = json!({
            "status": "error",
            "message": "records[1].status 'tardy' is not one of present, absent, late"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Only admins and teachers can record attendance"),
        (status = 404, description = "Class not found"),
        (status = 409, description = "Concurrent submission for the same class and date"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn submit_attendance(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    body: web::Json<SubmitAttendance>,
) -> AppResult<HttpResponse> {
    let recorded = service.submit(&auth, &body).await?;
    Ok(HttpResponse::Created().json(json!({
        "status": "success",
        "message": "Attendance recorded successfully",
        "data": { "recorded": recorded }
    })))
}

/// List attendance records
#[utoipa::path(
    get,
    path = "/api/attendance",
    params(AttendanceQuery),
    responses(
        (status = 200, description = "Matching records, newest day first", body = AttendanceListResponse),
        (status = 400, description = "Malformed date filter"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn list_attendance(
    _auth: AuthUser,
    service: web::Data<AttendanceService>,
    query: web::Query<AttendanceQuery>,
) -> AppResult<HttpResponse> {
    let filter = AttendanceFilter::from_query(
        query.class_id.as_deref(),
        query.date.as_deref(),
        query.student_id.as_deref(),
    )?;
    let data = service.list(&filter).await?;
    Ok(HttpResponse::Ok().json(AttendanceListResponse {
        status: "success".to_string(),
        data,
    }))
}

/// Per-status counts and attendance percentage
#[utoipa::path(
    get,
    path = "/api/attendance/summary",
    params(SummaryQuery),
    responses(
        (status = 200, description = "Summary over the filtered records", body = SummaryResponse),
        (status = 400, description = "Malformed date or startDate after endDate"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn attendance_summary(
    _auth: AuthUser,
    service: web::Data<AttendanceService>,
    query: web::Query<SummaryQuery>,
) -> AppResult<HttpResponse> {
    let filter = SummaryFilter::from_query(
        query.class_id.as_deref(),
        query.start_date.as_deref(),
        query.end_date.as_deref(),
    )?;
    let summary = service.summarize(&filter).await?;
    Ok(HttpResponse::Ok().json(SummaryResponse {
        status: "success".to_string(),
        data: summary.counts(),
        summary,
    }))
}
