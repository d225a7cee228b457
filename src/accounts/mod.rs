//! Accounts - Registration, Approval, Login, Password Reset
//!
//! TigerStyle: Every rule checked in a fixed order, first failure wins.
//!
//! Lifecycle of a staff account:
//! 1. Self-registration creates an inactive staff user
//! 2. An admin approves (account becomes active) or rejects (account deleted)
//! 3. Exactly one notification email is queued per transition
//! 4. Active users log in and receive a signed session token

mod password;
mod token;
mod validation;

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{first_message, FieldError};
use crate::mail::{self, Mailer};
use crate::models::{RoleName, User, USER_EMAIL_BYTES_MAX, USER_FULL_NAME_BYTES_MAX};
use crate::storage::{StorageBackend, StorageError};

pub use password::{hash_password, verify_password};
pub use token::{account_fingerprint, Claims, TokenError, TokenPurpose, TokenSigner};
pub use validation::{
    is_valid_email, is_well_formed_email, password_problem, quick_ratio, UserAttributes,
    MSG_EMAIL_INVALID, MSG_PASSWORDS_MISMATCH, PASSWORD_LENGTH_MIN,
};

// =============================================================================
// Messages
// =============================================================================

pub const MSG_INVALID_CREDENTIALS: &str = "Invalid email or password.";
pub const MSG_PENDING_LOGIN: &str =
    "Your account is pending administrator approval. Please wait for approval email.";
pub const MSG_ALREADY_REGISTERED: &str = "Email already registered. Please login.";
pub const MSG_PENDING_APPLICATION: &str = "Email has pending application. Wait for approval.";
pub const MSG_ACCESS_DENIED: &str = "Access denied.";
pub const MSG_NOT_PENDING_APPROVE: &str = "User not found or already approved.";
pub const MSG_NOT_PENDING_REJECT: &str = "User not found or already processed.";
pub const MSG_FIELD_REQUIRED: &str = "This field is required.";

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// One or more form fields are invalid
    #[error("{}", first_message(.0))]
    Invalid(Vec<FieldError>),

    /// Email already belongs to an account
    #[error("{0}")]
    AlreadyRegistered(String),

    /// Login refused
    #[error("{0}")]
    Auth(String),

    #[error("Authentication required.")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("The password reset link is invalid or has expired.")]
    InvalidResetLink,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AccountError {
    fn field(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid(vec![FieldError::new(field, message)])
    }
}

pub type AccountResult<T> = Result<T, AccountError>;

// =============================================================================
// Types
// =============================================================================

/// Registration form as submitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

/// Where the client should go after logging in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LandingPage {
    AdminApproval,
    Events,
}

/// Successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub redirect: LandingPage,
    pub user: User,
}

/// A pending staff application as shown to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Application {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    /// `YYYY-MM-DD` in display time
    pub date_applied: String,
}

/// Settings the service needs from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct AccountSettings {
    pub allowed_email_domains: Vec<String>,
    pub session_ttl_secs: i64,
    pub password_reset_ttl_secs: i64,
    pub public_base_url: String,
    pub display_offset: FixedOffset,
}

// =============================================================================
// AccountService
// =============================================================================

pub struct AccountService {
    storage: Arc<dyn StorageBackend>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    signer: TokenSigner,
    settings: AccountSettings,
}

impl AccountService {
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        signer: TokenSigner,
        settings: AccountSettings,
    ) -> Self {
        assert!(settings.session_ttl_secs > 0, "session ttl must be positive");
        assert!(settings.password_reset_ttl_secs > 0, "reset ttl must be positive");
        Self {
            storage,
            mailer,
            clock,
            signer,
            settings,
        }
    }

    /// Self-register a staff account awaiting approval.
    pub async fn register(&self, form: RegisterForm) -> AccountResult<User> {
        let first_name = form.first_name.trim();
        let last_name = form.last_name.trim();
        let email = form.email.trim().to_lowercase();
        let password = form.password.trim();
        let confirm_password = form.confirm_password.trim();

        if !email.is_empty() && !self.email_allowed(&email) {
            return Err(AccountError::field("email", MSG_EMAIL_INVALID));
        }

        let mut missing = Vec::new();
        for (field, value, message) in [
            ("first_name", first_name, "Please enter your first name."),
            ("last_name", last_name, "Please enter your last name."),
            ("email", email.as_str(), "Please enter your email address."),
            ("password", password, "Please enter your password."),
            ("confirm_password", confirm_password, "Please confirm your password."),
        ] {
            if value.is_empty() {
                missing.push(FieldError::new(field, message));
            }
        }
        if !missing.is_empty() {
            return Err(AccountError::Invalid(missing));
        }

        let full_name = format!("{first_name} {last_name}").trim().to_string();
        if full_name.len() > USER_FULL_NAME_BYTES_MAX {
            return Err(AccountError::field(
                "last_name",
                format!("Ensure your name has at most {USER_FULL_NAME_BYTES_MAX} characters."),
            ));
        }

        let attrs = UserAttributes {
            email: &email,
            full_name: &full_name,
        };
        if let Some(problem) = password_problem(password, attrs) {
            return Err(AccountError::field("password", problem));
        }

        if password != confirm_password {
            return Err(AccountError::field("confirm_password", MSG_PASSWORDS_MISMATCH));
        }

        if let Some(existing) = self.storage.find_user_by_email(&email).await? {
            let message = if existing.is_active {
                MSG_ALREADY_REGISTERED
            } else {
                MSG_PENDING_APPLICATION
            };
            return Err(AccountError::AlreadyRegistered(message.to_string()));
        }

        let role = self.storage.get_or_create_role(RoleName::Staff.as_str()).await?;
        let mut user = User::new(
            role.id,
            full_name,
            email,
            hash_password(password)?,
            self.clock.now(),
        );
        user.is_staff = true;

        match self.storage.insert_user(&user).await {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => {
                return Err(AccountError::AlreadyRegistered(MSG_PENDING_APPLICATION.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %user.id, email = %user.email, "staff registration received");
        mail::dispatch(
            self.mailer.clone(),
            mail::registration_received(&user.email, first_name),
        );

        // Postcondition
        assert!(user.is_pending(), "new registration must be pending");
        Ok(user)
    }

    /// Check credentials and issue a session token.
    pub async fn login(&self, email: &str, password: &str) -> AccountResult<LoginOutcome> {
        let email = email.trim();
        let password = password.trim();

        if !email.is_empty() && !self.email_allowed(email) {
            return Err(AccountError::field("email", MSG_EMAIL_INVALID));
        }

        let mut missing = Vec::new();
        if email.is_empty() {
            missing.push(FieldError::new("email", "Please enter your email address."));
        }
        if password.is_empty() {
            missing.push(FieldError::new("password", "Please enter your password."));
        }
        if !missing.is_empty() {
            return Err(AccountError::Invalid(missing));
        }

        let invalid = || AccountError::Auth(MSG_INVALID_CREDENTIALS.to_string());

        let Some(mut user) = self.storage.find_user_by_email(email).await? else {
            tracing::debug!(email = %email, "login for unknown email");
            return Err(invalid());
        };

        if !user.is_active {
            if user.is_pending() && verify_password(password, &user.password_hash) {
                return Err(AccountError::Auth(MSG_PENDING_LOGIN.to_string()));
            }
            return Err(invalid());
        }

        if !verify_password(password, &user.password_hash) {
            tracing::info!(user_id = %user.id, "login failed: wrong password");
            return Err(invalid());
        }

        let now = self.clock.now();
        user.last_login = Some(now);
        self.storage.update_user(&user).await?;

        let expires_at = now + Duration::seconds(self.settings.session_ttl_secs);
        let token = self
            .signer
            .issue(TokenPurpose::Session, user.id, expires_at, None)?;
        let redirect = if user.is_admin {
            LandingPage::AdminApproval
        } else {
            LandingPage::Events
        };

        tracing::info!(user_id = %user.id, "user logged in");
        Ok(LoginOutcome {
            token,
            expires_at,
            redirect,
            user,
        })
    }

    /// Resolve a session token to an active user.
    pub async fn authenticate(&self, token: &str) -> AccountResult<User> {
        let claims = self
            .signer
            .verify(token, TokenPurpose::Session, self.clock.now())
            .map_err(|e| {
                tracing::debug!(error = %e, "session token rejected");
                AccountError::Unauthenticated
            })?;

        match self.storage.get_user(claims.user_id).await? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(AccountError::Unauthenticated),
        }
    }

    /// Staff accounts awaiting approval, oldest first.
    pub async fn pending_applications(&self) -> AccountResult<Vec<Application>> {
        let users = self.storage.list_pending_users().await?;
        Ok(users
            .into_iter()
            .map(|u| Application {
                id: u.id,
                date_applied: u
                    .created_at
                    .with_timezone(&self.settings.display_offset)
                    .format("%Y-%m-%d")
                    .to_string(),
                full_name: u.full_name,
                email: u.email,
            })
            .collect())
    }

    /// Activate a pending staff account and queue the approval email.
    pub async fn approve(&self, admin: &User, user_id: Uuid) -> AccountResult<User> {
        require_admin(admin)?;

        let mut user = match self.storage.get_user(user_id).await? {
            Some(user) if user.is_pending() => user,
            _ => {
                tracing::warn!(user_id = %user_id, "approval failed: not found or already approved");
                return Err(AccountError::NotFound(MSG_NOT_PENDING_APPROVE.to_string()));
            }
        };

        user.approve(admin.id, self.clock.now());
        self.storage.update_user(&user).await?;

        let login_url = format!("{}/users/login/", self.settings.public_base_url);
        mail::dispatch(
            self.mailer.clone(),
            mail::account_approved(&user.email, &user.full_name, &login_url),
        );

        tracing::info!(user_id = %user.id, admin_id = %admin.id, "account approved, email queued");

        // Postconditions
        assert!(user.is_active, "approved user must be active");
        assert_eq!(user.approved_by, Some(admin.id), "approver must be recorded");
        Ok(user)
    }

    /// Queue the rejection email and delete the pending account.
    pub async fn reject(&self, admin: &User, user_id: Uuid) -> AccountResult<User> {
        require_admin(admin)?;

        let user = match self.storage.get_user(user_id).await? {
            Some(user) if user.is_pending() => user,
            _ => {
                tracing::warn!(user_id = %user_id, "rejection failed: not found or already processed");
                return Err(AccountError::NotFound(MSG_NOT_PENDING_REJECT.to_string()));
            }
        };

        mail::dispatch(
            self.mailer.clone(),
            mail::application_rejected(&user.email, &user.full_name),
        );
        self.storage.delete_user(user.id).await?;

        tracing::info!(user_id = %user.id, admin_id = %admin.id, "account rejected, email queued");
        Ok(user)
    }

    /// Email a reset link (active account) or a pending notice. The caller
    /// always reports success so unknown addresses look the same as known ones.
    pub async fn request_password_reset(&self, email: &str) -> AccountResult<()> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AccountError::field("email", "Please enter your email address."));
        }
        if !is_well_formed_email(email) {
            return Err(AccountError::field("email", "Enter a valid email address."));
        }

        let Some(user) = self.storage.find_user_by_email(email).await? else {
            tracing::debug!("password reset requested for unknown email");
            return Ok(());
        };

        if user.is_pending() {
            let registered_on = user
                .created_at
                .with_timezone(&self.settings.display_offset)
                .format("%B %d, %Y")
                .to_string();
            mail::dispatch(
                self.mailer.clone(),
                mail::pending_reset_notice(&user.email, &user.full_name, &registered_on),
            );
            tracing::info!(user_id = %user.id, "reset requested for pending account");
            return Ok(());
        }

        if !user.is_active {
            return Ok(());
        }

        let expires_at = self.clock.now() + Duration::seconds(self.settings.password_reset_ttl_secs);
        let fingerprint = account_fingerprint(&user.password_hash, user.last_login);
        let token = self.signer.issue(
            TokenPurpose::PasswordReset,
            user.id,
            expires_at,
            Some(&fingerprint),
        )?;
        let reset_url = format!(
            "{}/users/reset/{}/{}/",
            self.settings.public_base_url,
            encode_uid(user.id),
            token
        );
        mail::dispatch(
            self.mailer.clone(),
            mail::password_reset_link(&user.email, &user.full_name, &reset_url),
        );

        tracing::info!(user_id = %user.id, "password reset link queued");
        Ok(())
    }

    /// Set a new password using a reset link.
    pub async fn confirm_password_reset(
        &self,
        uid: &str,
        token: &str,
        new_password1: &str,
        new_password2: &str,
    ) -> AccountResult<()> {
        let user_id = decode_uid(uid).ok_or(AccountError::InvalidResetLink)?;
        let mut user = match self.storage.get_user(user_id).await? {
            Some(user) if user.is_active => user,
            _ => return Err(AccountError::InvalidResetLink),
        };

        let claims = self
            .signer
            .verify(token, TokenPurpose::PasswordReset, self.clock.now())
            .map_err(|_| AccountError::InvalidResetLink)?;
        let fingerprint = account_fingerprint(&user.password_hash, user.last_login);
        if claims.user_id != user.id || claims.fingerprint.as_deref() != Some(fingerprint.as_str()) {
            return Err(AccountError::InvalidResetLink);
        }

        let mut missing = Vec::new();
        if new_password1.is_empty() {
            missing.push(FieldError::new("new_password1", MSG_FIELD_REQUIRED));
        }
        if new_password2.is_empty() {
            missing.push(FieldError::new("new_password2", MSG_FIELD_REQUIRED));
        }
        if !missing.is_empty() {
            return Err(AccountError::Invalid(missing));
        }

        let attrs = UserAttributes {
            email: &user.email,
            full_name: &user.full_name,
        };
        if let Some(problem) = password_problem(new_password1, attrs) {
            return Err(AccountError::field("new_password1", problem));
        }
        if new_password1 != new_password2 {
            return Err(AccountError::field("new_password2", MSG_PASSWORDS_MISMATCH));
        }

        user.password_hash = hash_password(new_password1)?;
        self.storage.update_user(&user).await?;

        tracing::info!(user_id = %user.id, "password reset completed");
        Ok(())
    }

    /// Create an active administrator (CLI bootstrap).
    pub async fn create_admin(
        &self,
        email: &str,
        full_name: &str,
        password: &str,
    ) -> AccountResult<User> {
        let email = email.trim().to_lowercase();
        let full_name = full_name.trim();

        if email.len() > USER_EMAIL_BYTES_MAX || !is_well_formed_email(&email) {
            return Err(AccountError::field("email", "Enter a valid email address."));
        }
        if full_name.is_empty() {
            return Err(AccountError::field("full_name", MSG_FIELD_REQUIRED));
        }
        if full_name.len() > USER_FULL_NAME_BYTES_MAX {
            return Err(AccountError::field("full_name", "Name is too long."));
        }
        let attrs = UserAttributes {
            email: &email,
            full_name,
        };
        if let Some(problem) = password_problem(password, attrs) {
            return Err(AccountError::field("password", problem));
        }
        if self.storage.find_user_by_email(&email).await?.is_some() {
            return Err(AccountError::AlreadyRegistered(MSG_ALREADY_REGISTERED.to_string()));
        }

        let role = self.storage.get_or_create_role(RoleName::Admin.as_str()).await?;
        let now = self.clock.now();
        let mut user = User::new(
            role.id,
            full_name.to_string(),
            email,
            hash_password(password)?,
            now,
        );
        user.is_active = true;
        user.is_admin = true;
        user.approved_at = Some(now);
        self.storage.insert_user(&user).await?;

        tracing::info!(user_id = %user.id, "administrator created");
        Ok(user)
    }

    fn email_allowed(&self, email: &str) -> bool {
        email.len() <= USER_EMAIL_BYTES_MAX
            && is_valid_email(email, &self.settings.allowed_email_domains)
    }
}

fn require_admin(actor: &User) -> AccountResult<()> {
    if actor.is_active && actor.is_admin {
        Ok(())
    } else {
        Err(AccountError::Forbidden(MSG_ACCESS_DENIED.to_string()))
    }
}

/// URL-safe encoding of a user id for reset links.
#[must_use]
pub fn encode_uid(id: Uuid) -> String {
    URL_SAFE_NO_PAD.encode(id.to_string().as_bytes())
}

#[must_use]
pub fn decode_uid(uid: &str) -> Option<Uuid> {
    let bytes = URL_SAFE_NO_PAD.decode(uid.trim()).ok()?;
    Uuid::parse_str(std::str::from_utf8(&bytes).ok()?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::mail::RecordingMailer;
    use crate::storage::SimStorageBackend;
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;

    const PASSWORD: &str = "Tamaraw-Falls-88";

    struct Harness {
        service: AccountService,
        storage: Arc<SimStorageBackend>,
        mailer: Arc<RecordingMailer>,
        clock: Arc<SimClock>,
    }

    fn harness() -> Harness {
        let storage = Arc::new(SimStorageBackend::new());
        let mailer = Arc::new(RecordingMailer::new());
        let clock = Arc::new(SimClock::at(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
        let service = AccountService::new(
            storage.clone(),
            mailer.clone(),
            clock.clone(),
            TokenSigner::new("test-secret"),
            AccountSettings {
                allowed_email_domains: vec!["gmail.com".to_string(), "cit.edu".to_string()],
                session_ttl_secs: 600,
                password_reset_ttl_secs: 3600,
                public_base_url: "http://arcasys.test".to_string(),
                display_offset: FixedOffset::east_opt(8 * 3600).unwrap(),
            },
        );
        Harness {
            service,
            storage,
            mailer,
            clock,
        }
    }

    fn form(email: &str) -> RegisterForm {
        RegisterForm {
            first_name: "Ana".to_string(),
            last_name: "Cruz".to_string(),
            email: email.to_string(),
            password: PASSWORD.to_string(),
            confirm_password: PASSWORD.to_string(),
        }
    }

    fn fields(err: AccountError) -> Vec<(String, String)> {
        match err {
            AccountError::Invalid(errors) => errors.into_iter().map(|e| (e.field, e.message)).collect(),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    async fn admin(h: &Harness) -> User {
        h.service
            .create_admin("admin@cit.edu", "Site Admin", "Molave-Admin-2025")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_creates_pending_staff() {
        let h = harness();
        let user = h.service.register(form("  Ana.Cruz@Gmail.com ")).await.unwrap();

        assert_eq!(user.email, "ana.cruz@gmail.com");
        assert_eq!(user.full_name, "Ana Cruz");
        assert!(user.is_pending());
        assert!(verify_password(PASSWORD, &user.password_hash));

        let sent = h.mailer.wait_for(1, StdDuration::from_secs(1)).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Account Registration Received - Marketing Archive");
        assert!(sent[0].body.starts_with("Hello Ana,"));
    }

    #[tokio::test]
    async fn test_register_validation_order() {
        let h = harness();

        // Bad domain is reported before empty fields.
        let mut f = form("ana@example.com");
        f.first_name.clear();
        assert_eq!(fields(h.service.register(f).await.unwrap_err())[0].0, "email");

        // All empty fields are reported together.
        let errs = fields(h.service.register(RegisterForm::default()).await.unwrap_err());
        assert_eq!(errs.len(), 5);

        // Policy before mismatch.
        let mut f = form("ana@gmail.com");
        f.password = "short".to_string();
        f.confirm_password = "different".to_string();
        let errs = fields(h.service.register(f).await.unwrap_err());
        assert_eq!(errs, vec![(
            "password".to_string(),
            "This password is too short. It must contain at least 8 characters.".to_string()
        )]);

        let mut f = form("ana@gmail.com");
        f.confirm_password = "Tamaraw-Falls-89".to_string();
        let errs = fields(h.service.register(f).await.unwrap_err());
        assert_eq!(errs[0], ("confirm_password".to_string(), MSG_PASSWORDS_MISMATCH.to_string()));
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let h = harness();
        h.service.register(form("ana@gmail.com")).await.unwrap();

        let err = h.service.register(form("ANA@gmail.com")).await.unwrap_err();
        assert_eq!(err.to_string(), MSG_PENDING_APPLICATION);

        let mut user = h.storage.find_user_by_email("ana@gmail.com").await.unwrap().unwrap();
        user.is_active = true;
        h.storage.update_user(&user).await.unwrap();

        let err = h.service.register(form("ana@gmail.com")).await.unwrap_err();
        assert_eq!(err.to_string(), MSG_ALREADY_REGISTERED);
    }

    #[tokio::test]
    async fn test_login_flow() {
        let h = harness();
        h.service.register(form("ana@gmail.com")).await.unwrap();

        // Pending: correct password gets the pending message, wrong one the generic one.
        let err = h.service.login("ana@gmail.com", PASSWORD).await.unwrap_err();
        assert_eq!(err.to_string(), MSG_PENDING_LOGIN);
        let err = h.service.login("ana@gmail.com", "nope-nope-nope").await.unwrap_err();
        assert_eq!(err.to_string(), MSG_INVALID_CREDENTIALS);

        let admin = admin(&h).await;
        let pending = h.storage.find_user_by_email("ana@gmail.com").await.unwrap().unwrap();
        h.service.approve(&admin, pending.id).await.unwrap();

        let outcome = h.service.login("ANA@gmail.com", PASSWORD).await.unwrap();
        assert_eq!(outcome.redirect, LandingPage::Events);
        assert_eq!(outcome.user.last_login, Some(h.clock.now()));

        let user = h.service.authenticate(&outcome.token).await.unwrap();
        assert_eq!(user.id, pending.id);

        h.clock.advance_secs(601);
        assert!(matches!(
            h.service.authenticate(&outcome.token).await,
            Err(AccountError::Unauthenticated)
        ));

        let admin_login = h.service.login("admin@cit.edu", "Molave-Admin-2025").await.unwrap();
        assert_eq!(admin_login.redirect, LandingPage::AdminApproval);
    }

    #[tokio::test]
    async fn test_login_unknown_and_format() {
        let h = harness();
        let err = h.service.login("ghost@gmail.com", PASSWORD).await.unwrap_err();
        assert_eq!(err.to_string(), MSG_INVALID_CREDENTIALS);

        let errs = fields(h.service.login("ghost@nowhere.io", "").await.unwrap_err());
        assert_eq!(errs, vec![("email".to_string(), MSG_EMAIL_INVALID.to_string())]);

        let errs = fields(h.service.login("", "").await.unwrap_err());
        assert_eq!(errs.len(), 2);
    }

    #[tokio::test]
    async fn test_approve_sends_exactly_one_email() {
        let h = harness();
        let pending = h.service.register(form("ana@gmail.com")).await.unwrap();
        let admin = admin(&h).await;
        h.mailer.wait_for(1, StdDuration::from_secs(1)).await;

        let approved = h.service.approve(&admin, pending.id).await.unwrap();
        assert!(approved.is_active);
        assert_eq!(approved.approved_by, Some(admin.id));
        assert_eq!(approved.approved_at, Some(h.clock.now()));

        let sent = h.mailer.wait_for(2, StdDuration::from_secs(1)).await;
        let approvals: Vec<_> = sent
            .iter()
            .filter(|m| m.subject == "Arcasys System - Account Approved")
            .collect();
        assert_eq!(approvals.len(), 1);
        assert!(approvals[0].body.contains("Login: http://arcasys.test/users/login/"));

        // Second approval is refused.
        let err = h.service.approve(&admin, pending.id).await.unwrap_err();
        assert_eq!(err.to_string(), MSG_NOT_PENDING_APPROVE);
        assert!(h.service.pending_applications().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reject_deletes_and_notifies() {
        let h = harness();
        let pending = h.service.register(form("ana@gmail.com")).await.unwrap();
        let admin = admin(&h).await;

        let apps = h.service.pending_applications().await.unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].date_applied, "2025-06-01");

        h.service.reject(&admin, pending.id).await.unwrap();
        assert!(h.storage.get_user(pending.id).await.unwrap().is_none());

        let sent = h.mailer.wait_for(2, StdDuration::from_secs(1)).await;
        assert!(sent.iter().any(|m| m.subject == "Arcasys System - Application Status"));
    }

    #[tokio::test]
    async fn test_create_admin_is_active_admin_not_staff() {
        let h = harness();
        let admin = admin(&h).await;

        assert!(admin.is_active && admin.is_admin);
        assert!(!admin.is_staff);
        assert!(!admin.is_pending());
        assert!(admin.can_manage_events());
        assert!(h.service.pending_applications().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_admin_cannot_approve() {
        let h = harness();
        let pending = h.service.register(form("ana@gmail.com")).await.unwrap();
        let err = h.service.approve(&pending, pending.id).await.unwrap_err();
        assert!(matches!(err, AccountError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_password_reset_roundtrip() {
        let h = harness();
        let admin = admin(&h).await;
        h.service.request_password_reset("admin@cit.edu").await.unwrap();

        let sent = h.mailer.wait_for(1, StdDuration::from_secs(1)).await;
        let link = sent[0]
            .body
            .lines()
            .find_map(|l| l.strip_prefix("Reset your password: "))
            .unwrap()
            .to_string();
        let parts: Vec<&str> = link.trim_end_matches('/').rsplit('/').take(2).collect();
        let (token, uid) = (parts[0], parts[1]);
        assert_eq!(decode_uid(uid), Some(admin.id));

        let errs = fields(
            h.service
                .confirm_password_reset(uid, token, "Narra-Tree-2026", "Narra-Tree-2027")
                .await
                .unwrap_err(),
        );
        assert_eq!(errs[0].0, "new_password2");

        h.service
            .confirm_password_reset(uid, token, "Narra-Tree-2026", "Narra-Tree-2026")
            .await
            .unwrap();
        h.service.login("admin@cit.edu", "Narra-Tree-2026").await.unwrap();

        // The link dies once the password changed.
        assert!(matches!(
            h.service
                .confirm_password_reset(uid, token, "Another-Pass-77", "Another-Pass-77")
                .await,
            Err(AccountError::InvalidResetLink)
        ));
    }

    #[tokio::test]
    async fn test_password_reset_pending_and_unknown() {
        let h = harness();
        h.service.register(form("ana@gmail.com")).await.unwrap();
        h.service.request_password_reset("ana@gmail.com").await.unwrap();
        h.service.request_password_reset("ghost@gmail.com").await.unwrap();

        let sent = h.mailer.wait_for(2, StdDuration::from_secs(1)).await;
        assert_eq!(sent.len(), 2);
        let notice = sent
            .iter()
            .find(|m| m.subject.contains("Pending Account"))
            .unwrap();
        assert!(notice.body.contains("ACCOUNT STATUS: PENDING APPROVAL"));
        assert!(notice.body.contains("June 01, 2025"));
    }

    #[test]
    fn test_uid_roundtrip() {
        let id = Uuid::new_v4();
        assert_eq!(decode_uid(&encode_uid(id)), Some(id));
        assert_eq!(decode_uid("!!"), None);
    }
}
