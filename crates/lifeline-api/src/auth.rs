use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info, warn};
use uuid::Uuid;

use lifeline_db::Database;
use lifeline_gateway::dispatcher::Dispatcher;
use lifeline_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use lifeline_types::models::{Profile, Role};

use crate::error::{ApiError, ApiJson};
use crate::profiles::username_taken;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    /// Offers an alert may receive before it stops taking responders.
    pub max_responders: u32,
}

impl AppStateInner {
    /// Run a blocking database call off the async runtime.
    pub async fn db_call<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> lifeline_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal
            })?
            .map_err(ApiError::from)
    }

    /// Fresh profile of the authenticated caller; roles are never trusted
    /// from the token.
    pub async fn caller(&self, claims: &Claims) -> Result<Profile, ApiError> {
        let id = claims.sub;
        self.db_call(move |db| db.get_profile(id))
            .await?
            .ok_or_else(|| {
                ApiError::Unauthorized(
                    "Could not find the profile of the user making the request.".into(),
                )
            })
    }

    /// Caller profile, refused while a suspension is running.
    pub async fn active_caller(&self, claims: &Claims) -> Result<Profile, ApiError> {
        let profile = self.caller(claims).await?;
        if let Some(until) = profile.suspended_until.filter(|until| *until > Utc::now()) {
            return Err(ApiError::forbidden(format!(
                "Your account is suspended until {}.",
                until.format("%Y-%m-%d %H:%M UTC")
            )));
        }
        Ok(profile)
    }
}

pub(crate) fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(ApiError::bad_request("Username must be 3 to 32 characters."));
    }
    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    validate_username(&username)?;
    if req.password.len() < 8 {
        return Err(ApiError::bad_request("Password must be at least 8 characters."));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            ApiError::Internal
        })?
        .to_string();

    let user_id = Uuid::new_v4();
    let name = username.clone();
    state
        .db_call(move |db| db.create_profile(user_id, &name, &password_hash))
        .await
        .map_err(username_taken)?;

    info!("Registered {} ({})", username, user_id);
    let token = create_token(&state.jwt_secret, user_id, &username)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id,
            username,
            role: Role::User,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid username or password.".into());

    let username = req.username.trim().to_string();
    let user = state
        .db_call(move |db| db.get_credentials(&username))
        .await?
        .ok_or_else(invalid)?;

    let parsed_hash = PasswordHash::new(&user.password).map_err(|e| {
        error!("Stored password hash for {} is unreadable: {}", user.id, e);
        ApiError::Internal
    })?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| {
            warn!("Failed login for {}", user.username);
            invalid()
        })?;

    let token = create_token(&state.jwt_secret, user.id, &user.username)?;

    Ok(Json(AuthResponse {
        user_id: user.id,
        username: user.username,
        role: user.role,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!("Token encoding failed: {}", e);
        ApiError::Internal
    })
}
