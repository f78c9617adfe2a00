use actix_web::{HttpResponse, web};
use serde_json::json;

use crate::error::AppResult;
use crate::models::{
    ForgotPasswordRequest, LoginRequest, LoginResponse, ResetPasswordRequest, SignupRequest,
    VerifyEmailQuery,
};
use crate::service::AccountService;

// auth end points

/// Register a new (unverified) admin account
#[utoipa::path(
    post,
    path = "/auth/signup",
    tag = "Auth",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created, confirmation email sent"),
        (status = 400, description = "Missing fields, bad email, weak or mismatched password"),
        (status = 409, description = "Email already registered"),
        (status = 500, description = "Confirmation email could not be sent")
    )
)]
pub async fn signup(
    accounts: web::Data<AccountService>,
    body: web::Json<SignupRequest>,
) -> AppResult<HttpResponse> {
    let user_id = accounts.signup(&body).await?;
    Ok(HttpResponse::Created().json(json!({
        "status": "success",
        "message": "Account created. Check your email to confirm your address.",
        "userId": user_id
    })))
}

/// Confirm an email address with the token from the confirmation link
#[utoipa::path(
    get,
    path = "/auth/verify-email",
    tag = "Auth",
    params(VerifyEmailQuery),
    responses(
        (status = 200, description = "Email verified"),
        (status = 400, description = "Missing or unknown token")
    )
)]
pub async fn verify_email(
    accounts: web::Data<AccountService>,
    query: web::Query<VerifyEmailQuery>,
) -> AppResult<HttpResponse> {
    accounts.verify_email(query.token.as_deref()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Email verified. You can now log in."
    })))
}

/// Exchange credentials for a bearer token
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Missing email or password"),
        (status = 401, description = "Invalid credentials or unverified email")
    )
)]
pub async fn login(
    accounts: web::Data<AccountService>,
    body: web::Json<LoginRequest>,
) -> AppResult<HttpResponse> {
    let (user, token) = accounts.login(&body).await?;
    Ok(HttpResponse::Ok().json(LoginResponse {
        status: "success".to_string(),
        message: "Login successful".to_string(),
        user,
        token,
    }))
}

/// Mail a password reset link
#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    tag = "Auth",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset link sent"),
        (status = 404, description = "No account with that email"),
        (status = 500, description = "Reset email could not be sent")
    )
)]
pub async fn forgot_password(
    accounts: web::Data<AccountService>,
    body: web::Json<ForgotPasswordRequest>,
) -> AppResult<HttpResponse> {
    accounts.forgot_password(&body).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Password reset link sent to your email"
    })))
}

/// Set a new password using a reset token
#[utoipa::path(
    post,
    path = "/auth/reset-password",
    tag = "Auth",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated"),
        (status = 400, description = "Invalid or expired token, or weak password")
    )
)]
pub async fn reset_password(
    accounts: web::Data<AccountService>,
    body: web::Json<ResetPasswordRequest>,
) -> AppResult<HttpResponse> {
    accounts.reset_password(&body).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Password has been reset"
    })))
}
