use chrono::{Duration as ChronoDuration, Utc};
use email_address::EmailAddress;
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::auth::AuthUser;
use crate::auth::jwt::generate_access_token;
use crate::auth::password::{hash_password, verify_password};
use crate::config::Config;
use crate::error::{AppError, AppResult, StoreError};
use crate::model::role::Role;
use crate::model::user::{NewUser, User};
use crate::models::{
    ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, ResetPasswordRequest,
    SessionUser, SignupRequest,
};
use crate::notify::{Mailer, OutgoingEmail};
use crate::store::{AccountStore, with_timeout};
use crate::utils::email_cache::EmailCache;

pub const MIN_PASSWORD_LEN: usize = 8;
const TOKEN_LEN: usize = 64;

fn random_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn check_password_strength(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }
    Ok(())
}

/// Signup, e-mail verification, login, the signed-in profile and password
/// changes.
pub struct AccountService {
    store: Arc<dyn AccountStore>,
    mailer: Arc<dyn Mailer>,
    cache: EmailCache,
    config: Config,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        mailer: Arc<dyn Mailer>,
        cache: EmailCache,
        config: Config,
    ) -> Self {
        Self {
            store,
            mailer,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &EmailCache {
        &self.cache
    }

    async fn email_taken(&self, email: &str) -> AppResult<bool> {
        if self.cache.is_taken(email).await {
            return Ok(true);
        }
        let existing = with_timeout(
            "find_user_by_email",
            self.config.store_timeout,
            self.store.find_user_by_email(email),
        )
        .await?;
        if existing.is_some() {
            self.cache.mark_taken(email).await;
            return Ok(true);
        }
        Ok(false)
    }

    /// Creates an unverified admin account and mails its confirmation link.
    #[instrument(name = "auth_signup", skip(self, req), fields(email = %req.email))]
    pub async fn signup(&self, req: &SignupRequest) -> AppResult<String> {
        let email = normalize_email(&req.email);
        if email.is_empty() || req.password.is_empty() || req.confirm_password.is_empty() {
            return Err(AppError::Validation("All fields are required".to_string()));
        }
        if !EmailAddress::is_valid(&email) {
            return Err(AppError::Validation("Invalid email format".to_string()));
        }
        if req.password != req.confirm_password {
            return Err(AppError::Validation("Passwords do not match".to_string()));
        }
        check_password_strength(&req.password)?;

        if self.email_taken(&email).await? {
            info!("Signup refused: email already registered");
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        let password_hash = hash_password(&req.password)
            .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))?;
        let token = random_token();

        let user_id = match with_timeout(
            "create_user",
            self.config.store_timeout,
            self.store.create_user(NewUser {
                email: email.clone(),
                password_hash,
                role: Role::Admin,
                is_verified: false,
                confirmation_token: Some(token.clone()),
            }),
        )
        .await
        {
            Ok(id) => id,
            Err(StoreError::Duplicate) => {
                self.cache.mark_taken(&email).await;
                return Err(AppError::Conflict("Email already registered".to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        self.cache.mark_taken(&email).await;
        debug!(user_id = %user_id, "Account created");

        let mail = OutgoingEmail::confirmation(&email, &self.config.public_base_url, &token);
        if let Err(e) = self.mailer.send(&mail).await {
            error!(error = %e, user_id = %user_id, "Confirmation email failed, removing account");
            if let Err(e) = with_timeout(
                "delete_user",
                self.config.store_timeout,
                self.store.delete_user(&user_id),
            )
            .await
            {
                error!(error = %e, user_id = %user_id, "Failed to remove unconfirmed account");
            }
            self.cache.forget(&email).await;
            return Err(AppError::Delivery(
                "Failed to send confirmation email".to_string(),
            ));
        }

        info!(user_id = %user_id, "Signup complete, confirmation sent");
        Ok(user_id)
    }

    pub async fn verify_email(&self, token: Option<&str>) -> AppResult<()> {
        let token = token.map(str::trim).unwrap_or_default();
        if token.is_empty() {
            return Err(AppError::Validation(
                "Confirmation token is required".to_string(),
            ));
        }
        let confirmed = with_timeout(
            "confirm_email",
            self.config.store_timeout,
            self.store.confirm_email(token),
        )
        .await?;
        if !confirmed {
            return Err(AppError::Validation(
                "Invalid or expired confirmation token".to_string(),
            ));
        }
        info!("Email verified");
        Ok(())
    }

    /// Returns the session user and a signed access token.
    #[instrument(name = "auth_login", skip(self, req), fields(email = %req.email))]
    pub async fn login(&self, req: &LoginRequest) -> AppResult<(SessionUser, String)> {
        info!("Login request received");

        let email = normalize_email(&req.email);
        if email.is_empty() || req.password.is_empty() {
            info!("Validation failed: empty email or password");
            return Err(AppError::Validation(
                "Email and password are required".to_string(),
            ));
        }

        let user = with_timeout(
            "find_user_by_email",
            self.config.store_timeout,
            self.store.find_user_by_email(&email),
        )
        .await?
        .ok_or_else(|| {
            info!("Invalid credentials: user not found");
            AppError::Unauthenticated("Invalid credentials".to_string())
        })?;

        if let Err(e) = verify_password(&req.password, &user.password) {
            info!(error = %e, "Invalid credentials: password mismatch");
            return Err(AppError::Unauthenticated("Invalid credentials".to_string()));
        }

        if !user.is_verified {
            info!(user_id = %user.id, "Login refused: email not verified");
            return Err(AppError::Unauthenticated(
                "Please verify your email before logging in".to_string(),
            ));
        }

        let token = generate_access_token(
            &user.id,
            &user.email,
            user.role,
            &self.config.jwt_secret,
            self.config.access_token_ttl,
        )
        .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))?;

        if let Err(e) = with_timeout(
            "record_login",
            self.config.store_timeout,
            self.store.record_login(&user.id, Utc::now()),
        )
        .await
        {
            // login still succeeds
            error!(error = %e, "Failed to update last_login");
        }
        self.cache.mark_taken(&user.email).await;

        info!(user_id = %user.id, "Login successful");
        Ok((
            SessionUser {
                id: user.id,
                email: user.email,
                role: user.role,
            },
            token,
        ))
    }

    async fn current_user(&self, caller: &AuthUser) -> AppResult<User> {
        with_timeout(
            "find_user_by_id",
            self.config.store_timeout,
            self.store.find_user_by_id(&caller.user_id),
        )
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// The account behind a bearer token, as stored now.
    pub async fn me(&self, caller: &AuthUser) -> AppResult<SessionUser> {
        let user = self.current_user(caller).await?;
        Ok(SessionUser {
            id: user.id,
            email: user.email,
            role: user.role,
        })
    }

    #[instrument(name = "account_change_password", skip(self, caller, req), fields(user_id = %caller.user_id))]
    pub async fn change_password(
        &self,
        caller: &AuthUser,
        req: &ChangePasswordRequest,
    ) -> AppResult<()> {
        if req.current_password.is_empty() || req.new_password.is_empty() {
            return Err(AppError::Validation(
                "Current and new password are required".to_string(),
            ));
        }
        check_password_strength(&req.new_password)?;

        let user = self.current_user(caller).await?;
        if let Err(e) = verify_password(&req.current_password, &user.password) {
            info!(error = %e, "Password change refused: current password mismatch");
            return Err(AppError::Validation(
                "Current password is incorrect".to_string(),
            ));
        }

        let password_hash = hash_password(&req.new_password)
            .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))?;
        let updated = with_timeout(
            "set_password",
            self.config.store_timeout,
            self.store.set_password(&user.id, &password_hash),
        )
        .await?;
        if !updated {
            return Err(AppError::NotFound("User not found".to_string()));
        }
        info!("Password changed");
        Ok(())
    }

    #[instrument(name = "auth_forgot_password", skip(self, req), fields(email = %req.email))]
    pub async fn forgot_password(&self, req: &ForgotPasswordRequest) -> AppResult<()> {
        let email = normalize_email(&req.email);
        if email.is_empty() {
            return Err(AppError::Validation("Email is required".to_string()));
        }

        let user = with_timeout(
            "find_user_by_email",
            self.config.store_timeout,
            self.store.find_user_by_email(&email),
        )
        .await?
        .ok_or_else(|| AppError::NotFound("No account found with that email".to_string()))?;

        let token = random_token();
        let expires_at = Utc::now() + ChronoDuration::seconds(self.config.reset_token_ttl);
        with_timeout(
            "set_reset_token",
            self.config.store_timeout,
            self.store.set_reset_token(&user.id, &token, expires_at),
        )
        .await?;

        let mail = OutgoingEmail::password_reset(
            &user.email,
            &self.config.public_base_url,
            &token,
            self.config.reset_token_ttl / 60,
        );
        self.mailer.send(&mail).await.map_err(|e| {
            error!(error = %e, user_id = %user.id, "Password reset email failed");
            AppError::Delivery("Failed to send password reset email".to_string())
        })?;

        info!(user_id = %user.id, "Password reset link sent");
        Ok(())
    }

    pub async fn reset_password(&self, req: &ResetPasswordRequest) -> AppResult<()> {
        let token = req.token.trim();
        if token.is_empty() || req.password.is_empty() {
            return Err(AppError::Validation(
                "Token and new password are required".to_string(),
            ));
        }
        check_password_strength(&req.password)?;

        let password_hash = hash_password(&req.password)
            .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))?;
        let replaced = with_timeout(
            "reset_password",
            self.config.store_timeout,
            self.store.reset_password(token, &password_hash, Utc::now()),
        )
        .await?;
        if !replaced {
            warn!("Password reset with unknown or expired token");
            return Err(AppError::Validation(
                "Invalid or expired reset token".to_string(),
            ));
        }
        info!("Password reset complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MailError;
    use crate::store::LocalStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<OutgoingEmail>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for Outbox {
        async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Address(email.to.clone()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    impl Outbox {
        fn last_token(&self) -> String {
            let sent = self.sent.lock().unwrap();
            let html = &sent.last().unwrap().html;
            let start = html.find("token=").unwrap() + "token=".len();
            html[start..start + TOKEN_LEN].to_string()
        }
    }

    fn signup_req(email: &str, password: &str, confirm: &str) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            password: password.to_string(),
            confirm_password: confirm.to_string(),
        }
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    fn service(store: Arc<LocalStore>, outbox: Arc<Outbox>) -> AccountService {
        AccountService::new(store, outbox, EmailCache::default(), Config::default())
    }

    #[tokio::test]
    async fn signup_verify_login() {
        let store = Arc::new(LocalStore::in_memory());
        let outbox = Arc::new(Outbox::default());
        let svc = service(store.clone(), outbox.clone());

        let user_id = svc
            .signup(&signup_req("Head@School.org", "longenough", "longenough"))
            .await
            .unwrap();
        assert!(user_id.starts_with('U'));

        let err = svc.login(&login_req("head@school.org", "longenough")).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(ref m) if m.contains("verify")));

        svc.verify_email(Some(&outbox.last_token())).await.unwrap();
        let (user, token) = svc.login(&login_req("head@school.org", "longenough")).await.unwrap();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.email, "head@school.org");
        assert!(!token.is_empty());

        let stored = store.find_user_by_email("head@school.org").await.unwrap().unwrap();
        assert!(stored.last_login.is_some());
        assert!(stored.confirmation_token.is_none());
    }

    #[tokio::test]
    async fn signup_rejects_bad_input() {
        let svc = service(Arc::new(LocalStore::in_memory()), Arc::new(Outbox::default()));
        let cases = [
            signup_req("", "longenough", "longenough"),
            signup_req("not-an-email", "longenough", "longenough"),
            signup_req("a@b.org", "longenough", "different1"),
            signup_req("a@b.org", "short", "short"),
        ];
        for case in cases {
            assert!(matches!(svc.signup(&case).await, Err(AppError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let svc = service(Arc::new(LocalStore::in_memory()), Arc::new(Outbox::default()));
        svc.signup(&signup_req("a@b.org", "longenough", "longenough")).await.unwrap();
        let err = svc
            .signup(&signup_req("A@B.org", "longenough", "longenough"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn failed_confirmation_mail_removes_the_account() {
        let store = Arc::new(LocalStore::in_memory());
        let outbox = Arc::new(Outbox {
            fail: true,
            ..Outbox::default()
        });
        let svc = service(store.clone(), outbox);

        let err = svc
            .signup(&signup_req("a@b.org", "longenough", "longenough"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Delivery(_)));
        assert!(store.find_user_by_email("a@b.org").await.unwrap().is_none());
        assert!(!svc.cache().is_taken("a@b.org").await);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let outbox = Arc::new(Outbox::default());
        let svc = service(Arc::new(LocalStore::in_memory()), outbox.clone());
        svc.signup(&signup_req("a@b.org", "longenough", "longenough")).await.unwrap();
        svc.verify_email(Some(&outbox.last_token())).await.unwrap();

        let wrong = svc.login(&login_req("a@b.org", "nottheone")).await.unwrap_err();
        let unknown = svc.login(&login_req("x@b.org", "longenough")).await.unwrap_err();
        assert_eq!(wrong.to_string(), unknown.to_string());
        assert!(matches!(svc.login(&login_req("", "")).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_confirmation_token_is_rejected() {
        let svc = service(Arc::new(LocalStore::in_memory()), Arc::new(Outbox::default()));
        assert!(matches!(svc.verify_email(None).await, Err(AppError::Validation(_))));
        assert!(matches!(svc.verify_email(Some("nope")).await, Err(AppError::Validation(_))));
    }

    fn as_caller(user: &SessionUser) -> AuthUser {
        AuthUser {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }

    #[tokio::test]
    async fn me_and_change_password() {
        let outbox = Arc::new(Outbox::default());
        let svc = service(Arc::new(LocalStore::in_memory()), outbox.clone());
        svc.signup(&signup_req("a@b.org", "longenough", "longenough")).await.unwrap();
        svc.verify_email(Some(&outbox.last_token())).await.unwrap();
        let (user, _) = svc.login(&login_req("a@b.org", "longenough")).await.unwrap();
        let caller = as_caller(&user);

        assert_eq!(svc.me(&caller).await.unwrap(), user);

        let change = |current: &str, new: &str| ChangePasswordRequest {
            current_password: current.to_string(),
            new_password: new.to_string(),
        };
        let wrong = svc
            .change_password(&caller, &change("nottheone", "brandnewpass"))
            .await
            .unwrap_err();
        assert!(matches!(wrong, AppError::Validation(ref m) if m.contains("incorrect")));
        assert!(matches!(
            svc.change_password(&caller, &change("longenough", "short")).await,
            Err(AppError::Validation(_))
        ));

        svc.change_password(&caller, &change("longenough", "brandnewpass"))
            .await
            .unwrap();
        svc.login(&login_req("a@b.org", "brandnewpass")).await.unwrap();
        assert!(svc.login(&login_req("a@b.org", "longenough")).await.is_err());
    }

    #[tokio::test]
    async fn deleted_account_is_not_found() {
        let svc = service(Arc::new(LocalStore::in_memory()), Arc::new(Outbox::default()));
        let ghost = AuthUser {
            user_id: "U404".to_string(),
            email: "ghost@b.org".to_string(),
            role: Role::Teacher,
        };
        assert!(matches!(svc.me(&ghost).await, Err(AppError::NotFound(_))));
        let req = ChangePasswordRequest {
            current_password: "whatever1".to_string(),
            new_password: "whatever2".to_string(),
        };
        assert!(matches!(
            svc.change_password(&ghost, &req).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn password_reset_flow() {
        let outbox = Arc::new(Outbox::default());
        let svc = service(Arc::new(LocalStore::in_memory()), outbox.clone());
        svc.signup(&signup_req("a@b.org", "longenough", "longenough")).await.unwrap();
        svc.verify_email(Some(&outbox.last_token())).await.unwrap();

        let missing = svc
            .forgot_password(&ForgotPasswordRequest { email: "x@b.org".to_string() })
            .await
            .unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));

        svc.forgot_password(&ForgotPasswordRequest { email: "a@b.org".to_string() })
            .await
            .unwrap();
        let token = outbox.last_token();

        let weak = ResetPasswordRequest { token: token.clone(), password: "short".to_string() };
        assert!(matches!(svc.reset_password(&weak).await, Err(AppError::Validation(_))));

        svc.reset_password(&ResetPasswordRequest { token: token.clone(), password: "brandnewpass".to_string() })
            .await
            .unwrap();
        svc.login(&login_req("a@b.org", "brandnewpass")).await.unwrap();
        assert!(svc.login(&login_req("a@b.org", "longenough")).await.is_err());

        let reused = ResetPasswordRequest { token, password: "anotherpass".to_string() };
        assert!(matches!(svc.reset_password(&reused).await, Err(AppError::Validation(_))));
    }
}
