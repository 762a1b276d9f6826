use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
    routing::post,
    Json, Router,
};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::shared::error::ApiError;
use crate::shared::models::User;
use crate::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

/// Identity attached to every request by `authentication_middleware`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: String,
}

impl AuthenticatedUser {
    pub fn anonymous() -> Self {
        Self {
            user_id: Uuid::nil(),
            role: "anonymous".to_string(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.user_id.is_nil()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role == "admin" || self.role == role
    }
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn issue_token(user: &User, config: &AuthConfig) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = TokenClaims {
        sub: user.id.to_string(),
        role: user.role.clone(),
        exp: (now + Duration::hours(config.token_ttl_hours)).timestamp(),
        iat: now.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token encoding: {e}")))
}

pub fn validate_token(token: &str, secret: &str) -> Option<TokenClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.set_required_spec_claims(&["sub", "exp"]);

    decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .ok()
    .map(|data| data.claims)
}

fn user_from_request(request: &Request, secret: &str) -> AuthenticatedUser {
    let Some(header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return AuthenticatedUser::anonymous();
    };

    let Some(token) = header.strip_prefix("Bearer ") else {
        return AuthenticatedUser::anonymous();
    };

    let Some(claims) = validate_token(token, secret) else {
        warn!("rejected bearer token");
        return AuthenticatedUser::anonymous();
    };

    match Uuid::parse_str(&claims.sub) {
        Ok(user_id) => AuthenticatedUser {
            user_id,
            role: claims.role,
        },
        Err(_) => AuthenticatedUser::anonymous(),
    }
}

/// Decodes the bearer token and attaches an `AuthenticatedUser` extension.
/// Missing or invalid tokens fall back to anonymous; route guards decide
/// whether anonymous is acceptable.
pub async fn authentication_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = user_from_request(&request, &state.config.auth.jwt_secret);
    request.extensions_mut().insert(user);
    next.run(request).await
}

pub async fn require_authentication(
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .unwrap_or_else(AuthenticatedUser::anonymous);

    if !user.is_authenticated() {
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}

pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .unwrap_or_else(AuthenticatedUser::anonymous);

    if !user.has_role("admin") {
        return Err(ApiError::Forbidden("admin role required".to_string()));
    }

    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: Uuid,
    pub display_name: String,
    pub role: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    use crate::shared::schema::users::dsl::*;

    let mut conn = state.conn.get()?;

    let user: User = users
        .filter(email.eq(&req.email))
        .filter(is_active.eq(true))
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::Unauthorized)?;

    if !verify_password(&req.password, &user.password_hash) {
        warn!("failed login for {}", req.email);
        return Err(ApiError::Unauthorized);
    }

    let token = issue_token(&user, &state.config.auth)?;
    info!("user {} logged in", user.id);

    Ok(Json(LoginResponse {
        token,
        user_id: user.id,
        display_name: user.display_name,
        role: user.role,
    }))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/api/auth/login", post(login))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_user(role: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: "pm@example.com".to_string(),
            password_hash: String::new(),
            display_name: "Project Manager".to_string(),
            role: role.to_string(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn test_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            token_ttl_hours: 1,
        }
    }

    #[test]
    fn issued_token_round_trips() {
        let user = test_user("manager");
        let config = test_config();
        let token = issue_token(&user, &config).unwrap();
        let claims = validate_token(&token, &config.jwt_secret).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.role, "manager");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token(&test_user("member"), &test_config()).unwrap();
        assert!(validate_token(&token, "other-secret").is_none());
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("s3cret").unwrap();
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn admin_passes_any_role_check() {
        let admin = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: "admin".to_string(),
        };
        assert!(admin.has_role("manager"));

        let member = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: "member".to_string(),
        };
        assert!(!member.has_role("manager"));
        assert!(!AuthenticatedUser::anonymous().is_authenticated());
    }
}
