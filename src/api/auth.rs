//! JWT auth: registration, login, token refresh, and the bearer middleware.
//!
//! - Clients obtain a token pair from `/api/auth/register` or `/login`
//! - Access tokens are short-lived JWTs; refresh tokens are opaque,
//!   stored against the user, and rotated on every refresh
//! - All protected endpoints require `Authorization: Bearer <jwt>`
//!
//! # Security notes
//! - Login failures use one generic message for both unknown email and
//!   wrong password to prevent account enumeration.
//! - Password hashes are PBKDF2-HMAC-SHA256 with a per-user random salt.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use uuid::Uuid;

use super::routes::AppState;
use super::types::{
    ApiResponse, AuthResponse, LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest,
    UserView,
};
use crate::error::ApiError;
use crate::identity::{Identity, NewIdentity};

const PBKDF2_ROUNDS: u32 = 100_000;
const MIN_PASSWORD_LEN: usize = 8;
const REFRESH_TOKEN_BYTES: usize = 32;

/// Well-formed hash compared against when the email is unknown, so login
/// latency does not reveal whether an account exists.
const DUMMY_HASH: &str = "pbkdf2-sha256$100000$00000000000000000000000000000000$0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Claims {
    /// Subject (user id)
    sub: String,
    /// Email (for display/auditing)
    #[serde(default)]
    email: String,
    /// Issued-at unix seconds
    iat: i64,
    /// Expiration unix seconds
    exp: i64,
}

/// The authenticated requester, inserted into request extensions by
/// [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a.len() {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

/// Hash a password as `pbkdf2-sha256$rounds$salt$hash` (salt and hash
/// hex-encoded).
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut derived = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ROUNDS, &mut derived);

    format!(
        "pbkdf2-sha256${}${}${}",
        PBKDF2_ROUNDS,
        hex::encode(salt),
        hex::encode(derived)
    )
}

/// Verify a password against a stored hash. Unparseable hashes verify as
/// false rather than erroring.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(rounds), Some(salt_hex), Some(hash_hex)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != "pbkdf2-sha256" || parts.next().is_some() {
        return false;
    }
    let Ok(rounds) = rounds.parse::<u32>() else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let Ok(expected) = hex::decode(hash_hex) else {
        return false;
    };

    let mut derived = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, rounds, &mut derived);
    constant_time_eq(&derived, &expected)
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn issue_jwt(secret: &str, ttl_secs: i64, user: &Identity) -> anyhow::Result<(String, i64)> {
    let now = Utc::now();
    let exp = now + Duration::seconds(ttl_secs.max(1));
    let claims = Claims {
        sub: user.id.to_string(),
        email: user.email.clone(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };
    let token = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok((token, claims.exp))
}

fn verify_jwt(token: &str, secret: &str) -> anyhow::Result<Claims> {
    let validation = Validation::default();
    let token_data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(token_data.claims)
}

/// Issue an access token and a fresh refresh token, persisting the
/// latter against the user.
fn issue_session(state: &AppState, user: &Identity) -> Result<AuthResponse, ApiError> {
    let (token, _exp) = issue_jwt(&state.config.jwt_secret, state.config.jwt_expires_in, user)
        .map_err(ApiError::Internal)?;

    let refresh_token = generate_refresh_token();
    let expires = Utc::now() + Duration::seconds(state.config.jwt_refresh_expires_in);
    state
        .users
        .set_refresh_token(user.id, Some((&refresh_token, expires)))?;

    Ok(AuthResponse {
        user: UserView::from(user),
        token,
        refresh_token,
    })
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    if !is_plausible_email(&email) {
        return Err(ApiError::Validation("A valid email is required".to_string()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Name is required".to_string()));
    }

    if state.users.find_by_email(&email)?.is_some() {
        return Err(ApiError::Validation("Email is already in use".to_string()));
    }

    let identity = state.users.create(NewIdentity {
        email,
        name: name.to_string(),
        password_hash: hash_password(&req.password),
    })?;

    let session = issue_session(&state, &identity)?;
    tracing::info!(user = %identity.id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::created(session, "User registered successfully")),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = state.users.find_by_email(&email)?;

    let valid = match &user {
        Some(u) => verify_password(&req.password, &u.password_hash),
        None => {
            // Burn the same hashing work for unknown emails.
            let _ = verify_password(&req.password, DUMMY_HASH);
            false
        }
    };

    if !valid {
        return Err(ApiError::Unauthorized(
            "Email or password is incorrect".to_string(),
        ));
    }

    let user = user.unwrap();
    let session = issue_session(&state, &user)?;
    tracing::info!(user = %user.id, "user logged in");

    Ok(Json(ApiResponse::success(session, "Logged in successfully")))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, ApiError> {
    let token = req.refresh_token.trim();
    if token.is_empty() {
        return Err(ApiError::Unauthorized("Refresh token is required".to_string()));
    }

    let user = state
        .users
        .find_by_refresh_token(token)?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired refresh token".to_string()))?;

    // Rotates the stored refresh token.
    let session = issue_session(&state, &user)?;
    Ok(Json(ApiResponse::success(
        session,
        "Token refreshed successfully",
    )))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LogoutRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let token = req.refresh_token.trim();
    if token.is_empty() {
        return Err(ApiError::Validation("Refresh token is required".to_string()));
    }

    // A no-op for unknown tokens; logout always succeeds.
    state.users.clear_refresh_token(token)?;
    Ok(Json(ApiResponse::success((), "Logged out successfully")))
}

/// Middleware for the protected routes: verifies the bearer token and
/// makes the requester available to handlers.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    let token = auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .unwrap_or("");

    if token.is_empty() {
        return ApiError::Unauthorized("Missing Authorization header".to_string()).into_response();
    }

    match verify_jwt(token, &state.config.jwt_secret) {
        Ok(claims) => {
            let Ok(id) = Uuid::parse_str(&claims.sub) else {
                return ApiError::Unauthorized("Invalid or expired token".to_string())
                    .into_response();
            };
            req.extensions_mut().insert(AuthUser {
                id,
                email: claims.email,
            });
            next.run(req).await
        }
        Err(_) => ApiError::Unauthorized("Invalid or expired token".to_string()).into_response(),
    }
}
