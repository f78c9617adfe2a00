use crate::api::attendance::{AttendanceListResponse, SummaryResponse};
use crate::model::attendance::{
    AttendanceRecord, AttendanceStatus, AttendanceSummary, RecordInput, StatusCount,
    SubmitAttendance,
};
use crate::model::role::Role;
use crate::model::school::{ClassRoster, DashboardStats, EntityCounts, RosterStudent};
use crate::models::{
    ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, LoginResponse,
    ResetPasswordRequest, SessionUser, SignupRequest,
};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "EduManage API",
        version = "1.0.0",
        description = r#"
## EduManage school management

Attendance capture and reporting for a school, plus the account flows that
gate it.

### Key features
- **Attendance**
  - Record a class's attendance for a day (replaces any earlier submission)
  - List records by class, day, or student
  - Per-status summary with attendance percentage
- **Dashboard**
  - Entity counts and today's attendance
- **Accounts**
  - Signup with email confirmation, login, password reset
  - Current account and password change

### Security
`/api` endpoints require a **JWT Bearer** token from `/auth/login`.
Only **admin** and **teacher** accounts can record attendance.

### Errors
Every failure answers `{"status": "error", "message": "..."}`.
"#,
    ),
    paths(
        crate::api::attendance::submit_attendance,
        crate::api::attendance::list_attendance,
        crate::api::attendance::attendance_summary,
        crate::api::classes::class_roster,

        crate::api::dashboard::dashboard_stats,

        crate::api::account::me,
        crate::api::account::change_password,

        crate::auth::handlers::signup,
        crate::auth::handlers::verify_email,
        crate::auth::handlers::login,
        crate::auth::handlers::forgot_password,
        crate::auth::handlers::reset_password
    ),
    components(
        schemas(
            AttendanceStatus,
            AttendanceRecord,
            SubmitAttendance,
            RecordInput,
            StatusCount,
            AttendanceSummary,
            AttendanceListResponse,
            SummaryResponse,
            ClassRoster,
            RosterStudent,
            EntityCounts,
            DashboardStats,
            Role,
            SessionUser,
            SignupRequest,
            LoginRequest,
            LoginResponse,
            ForgotPasswordRequest,
            ResetPasswordRequest,
            ChangePasswordRequest
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Attendance", description = "Attendance recording and reporting APIs"),
        (name = "Dashboard", description = "Admin dashboard APIs"),
        (name = "Auth", description = "Signup, login and password reset APIs"),
        (name = "Account", description = "Signed-in account APIs"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_attendance_paths_and_bearer_scheme() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/attendance"));
        assert!(doc.paths.paths.contains_key("/api/attendance/summary"));
        assert!(doc.paths.paths.contains_key("/auth/login"));
        assert!(doc.paths.paths.contains_key("/api/me"));
        assert!(doc.paths.paths.contains_key("/api/change-password"));
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
