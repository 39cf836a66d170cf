use crate::app::AppState;
use crate::error::AppError;
use crate::metrics::EventKind;
use crate::saving;
use crate::store::{RecordStore, User};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use axum::{
    Extension, Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::Utc;
use lazy_static::lazy_static;
use log::{error, info};
use rand_core::OsRng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session";

const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    // Usernames double as upload directory names.
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9_.-]{2,31}$").unwrap();
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

/// Credential data for login and registration
#[derive(Debug, Serialize, Deserialize)]
pub struct UserCredentials {
    pub username: String,

    /// Required for registration, ignored for login
    #[serde(default)]
    pub email: String,

    /// Password in plaintext (only transmitted, never stored)
    pub password: String,
}

/// Password reset request data
#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

/// Password reset confirmation data
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetConfirm {
    pub email: String,
    pub reset_code: String,
    pub new_password: String,
}

/// Password change request data
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChangeRequest {
    pub old_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// Public view of an account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub created_at: chrono::DateTime<Utc>,
}

impl AccountView {
    pub fn new(user: &User, is_admin: bool) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            is_admin,
            created_at: user.created_at,
        }
    }
}

/// The authenticated caller, inserted into request extensions by [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub username: String,
    pub is_admin: bool,
}

/// User session data
#[derive(Debug, Clone)]
pub struct Session {
    /// Username of the authenticated user
    pub user_id: String,

    /// Time when the session expires
    pub expires_at: SystemTime,
}

/// Active sessions keyed by session id.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Creates a session for `username` and returns its id.
    pub fn create(&self, username: &str) -> String {
        let session_id = Uuid::new_v4().to_string();
        let session = Session {
            user_id: username.to_string(),
            // A lifetime past the clock's range yields an already-expired session.
            expires_at: SystemTime::now()
                .checked_add(self.ttl)
                .unwrap_or(SystemTime::UNIX_EPOCH),
        };

        if let Ok(mut sessions) = self.sessions.write() {
            sessions.retain(|_, s| s.expires_at > SystemTime::now());
            sessions.insert(session_id.clone(), session);
        }
        session_id
    }

    /// The username behind a live session.
    pub fn validate(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.read().ok()?;
        sessions
            .get(session_id)
            .filter(|s| s.expires_at > SystemTime::now())
            .map(|s| s.user_id.clone())
    }

    pub fn remove(&self, session_id: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(session_id);
        }
    }

    /// Ends every session of `username`.
    pub fn remove_user(&self, username: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.retain(|_, s| s.user_id != username);
        }
    }
}

/// Register a new user
///
/// # Errors
/// * `BadRequest` for a malformed username, email or a short password
/// * `Conflict` when the username or email is already in use
pub fn register_user(
    store: &dyn RecordStore,
    username: &str,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    if !USERNAME_REGEX.is_match(username) {
        return Err(AppError::BadRequest(
            "Username must be 3-32 letters, digits, '.', '_' or '-'".to_string(),
        ));
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err(AppError::BadRequest("Invalid email address".to_string()));
    }
    validate_password(password)?;

    let user = User {
        username: username.to_string(),
        email: email.to_string(),
        password_hash: hash_password(password)?,
        reset_code: None,
        reset_code_expires: None,
        created_at: Utc::now(),
    };
    store.insert_user(user.clone())?;
    info!("registered user {}", username);
    Ok(user)
}

/// Checks whether the username and password match a registered user.
pub fn verify_user(store: &dyn RecordStore, username: &str, password: &str) -> Result<bool, AppError> {
    match store.get_user(username)? {
        Some(user) => verify_password(password, &user.password_hash),
        None => Ok(false),
    }
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Hash a password using Argon2id with a random salt.
fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AppError::Internal("Password hashing failed".to_string()))
}

/// Verify a password against a stored hash.
fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal("Invalid password hash format".to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Issues a reset code for the account behind `email`.
///
/// Returns the code to deliver, or `None` when no account uses the address.
pub fn issue_reset_code(
    store: &dyn RecordStore,
    email: &str,
    ttl: Duration,
) -> Result<Option<String>, AppError> {
    let Some(mut user) = store.find_user_by_email(email)? else {
        return Ok(None);
    };

    let code = crate::mailer::generate_reset_code();
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
    user.reset_code = Some(code.clone());
    user.reset_code_expires = Some(Utc::now() + ttl);
    store.update_user(user)?;
    Ok(Some(code))
}

/// Sets a new password when `reset_code` matches the pending, unexpired code.
pub fn reset_password(
    store: &dyn RecordStore,
    email: &str,
    reset_code: &str,
    new_password: &str,
) -> Result<(), AppError> {
    let invalid = || AppError::BadRequest("Invalid or expired reset code".to_string());

    let mut user = store.find_user_by_email(email)?.ok_or_else(invalid)?;
    let (Some(stored_code), Some(expires)) = (&user.reset_code, user.reset_code_expires) else {
        return Err(invalid());
    };
    if Utc::now() > expires || stored_code != reset_code.trim() {
        return Err(invalid());
    }
    validate_password(new_password)?;

    user.password_hash = hash_password(new_password)?;
    user.reset_code = None;
    user.reset_code_expires = None;
    store.update_user(user)?;
    Ok(())
}

/// Changes the password of `username` after verifying the current one.
pub fn change_password(
    store: &dyn RecordStore,
    username: &str,
    request: &PasswordChangeRequest,
) -> Result<(), AppError> {
    let mut user = store.get_user(username)?.ok_or(AppError::NotFound("user"))?;

    if !verify_password(&request.old_password, &user.password_hash)? {
        return Err(AppError::BadRequest("Invalid old password".to_string()));
    }
    if request.new_password != request.confirm_password {
        return Err(AppError::BadRequest("New passwords don't match".to_string()));
    }
    validate_password(&request.new_password)?;

    user.password_hash = hash_password(&request.new_password)?;
    store.update_user(user)?;
    Ok(())
}

/// Deletes an account with its files, charts, stored bytes and sessions.
///
/// Returns `false` when no such account exists.
pub fn delete_account(state: &AppState, username: &str) -> Result<bool, AppError> {
    let Some(deleted) = state.store.delete_user(username)? else {
        return Ok(false);
    };

    for file in &deleted.files {
        if let Err(e) = saving::remove_upload(&file.storage_path) {
            error!("failed to remove {}: {}", file.storage_path, e);
        }
    }
    state.sessions.remove_user(username);
    info!(
        "deleted user {} with {} files and {} charts",
        username,
        deleted.files.len(),
        deleted.charts
    );
    Ok(true)
}

/// Authentication middleware
///
/// Lets the request through with a [`CurrentUser`] extension when the session
/// cookie names a live session, and answers 401 otherwise.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let username = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| state.sessions.validate(cookie.value()));

    match username {
        Some(username) => {
            let is_admin = state.config.is_admin(&username);
            request
                .extensions_mut()
                .insert(CurrentUser { username, is_admin });
            next.run(request).await
        }
        None => AppError::Unauthorized.into_response(),
    }
}

/// Admin gate; must run inside [`require_auth`].
pub async fn require_admin(
    Extension(user): Extension<CurrentUser>,
    request: Request,
    next: Next,
) -> Response {
    if user.is_admin {
        next.run(request).await
    } else {
        AppError::Forbidden.into_response()
    }
}

/// Handle user registration
pub async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<UserCredentials>,
) -> Result<impl IntoResponse, AppError> {
    let user = register_user(
        state.store.as_ref(),
        credentials.username.trim(),
        credentials.email.trim(),
        &credentials.password,
    )?;
    state
        .metrics
        .record_event(EventKind::Registration, json!({ "user": user.username }));

    let is_admin = state.config.is_admin(&user.username);
    Ok((StatusCode::CREATED, Json(AccountView::new(&user, is_admin))))
}

/// Handle user login: validates credentials and sets the session cookie.
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(credentials): Json<UserCredentials>,
) -> Result<impl IntoResponse, AppError> {
    let username = credentials.username.trim();
    if !verify_user(state.store.as_ref(), username, &credentials.password)? {
        return Err(AppError::BadRequest("Invalid username or password".to_string()));
    }

    let user = state.store.get_user(username)?.ok_or(AppError::Unauthorized)?;
    let session_id = state.sessions.create(username);
    let cookie = Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true);

    state
        .metrics
        .record_event(EventKind::Login, json!({ "user": username }));
    info!("user {} logged in", username);

    let is_admin = state.config.is_admin(username);
    Ok((jar.add(cookie), Json(AccountView::new(&user, is_admin))))
}

/// Handle user logout: ends the session and clears the cookie.
pub async fn handle_logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.remove(cookie.value());
    }
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        StatusCode::NO_CONTENT,
    )
}

/// Handle password reset requests
///
/// Answers the same way whether or not the address is registered.
pub async fn handle_forgot_password(
    State(state): State<Arc<AppState>>,
    Json(reset_req): Json<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = reset_req.email.trim().to_string();

    if let Some(code) = issue_reset_code(state.store.as_ref(), &email, state.config.reset_code_ttl)? {
        info!("password reset requested for {}", email);
        let notifier = state.notifier.clone();
        let recipient = email.clone();
        let sent =
            tokio::task::spawn_blocking(move || notifier.send_password_reset(&recipient, &code)).await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("failed to send reset code to {}: {}", email, e),
            Err(e) => error!("reset code delivery task failed: {}", e),
        }
    }

    Ok(Json(json!({
        "message": "If the address is registered, a reset code has been sent."
    })))
}

/// Handle password reset confirmation
pub async fn handle_reset_password(
    State(state): State<Arc<AppState>>,
    Json(reset_confirm): Json<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AppError> {
    reset_password(
        state.store.as_ref(),
        reset_confirm.email.trim(),
        &reset_confirm.reset_code,
        &reset_confirm.new_password,
    )?;
    Ok(Json(json!({ "message": "Password reset successful" })))
}

/// Handle password change for authenticated users
pub async fn handle_change_password(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(change_req): Json<PasswordChangeRequest>,
) -> Result<impl IntoResponse, AppError> {
    change_password(state.store.as_ref(), &user.username, &change_req)?;
    Ok(Json(json!({ "message": "Password changed successfully" })))
}

/// The caller's own account.
pub async fn handle_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .store
        .get_user(&user.username)?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(AccountView::new(&account, user.is_admin)))
}

/// Deletes the caller's own account.
pub async fn handle_delete_account(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    if !delete_account(&state, &user.username)? {
        return Err(AppError::NotFound("user"));
    }
    Ok((
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        StatusCode::NO_CONTENT,
    ))
}
