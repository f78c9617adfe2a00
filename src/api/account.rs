use actix_web::{HttpResponse, web};
use serde_json::json;

use crate::auth::auth::AuthUser;
use crate::error::AppResult;
use crate::models::{ChangePasswordRequest, SessionUser};
use crate::service::AccountService;

/// The signed-in account
#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "Current account", body = SessionUser),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Account no longer exists")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Account"
)]
pub async fn me(auth: AuthUser, accounts: web::Data<AccountService>) -> AppResult<HttpResponse> {
    let user = accounts.me(&auth).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "data": user
    })))
}

/// Change the password after checking the current one
#[utoipa::path(
    put,
    path = "/api/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed"),
        (status = 400, description = "Missing fields, weak password, or wrong current password"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Account no longer exists")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Account"
)]
pub async fn change_password(
    auth: AuthUser,
    accounts: web::Data<AccountService>,
    body: web::Json<ChangePasswordRequest>,
) -> AppResult<HttpResponse> {
    accounts.change_password(&auth, &body).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Password changed successfully"
    })))
}
