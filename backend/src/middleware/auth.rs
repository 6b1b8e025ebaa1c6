//! Authentication middleware
//!
//! Login, passwords and idle logout belong to the external auth service. This
//! middleware only verifies the bearer token it issued (HS256, signed with
//! `SESSION_SECRET`), mirrors the operator into `users` and exposes it to
//! handlers.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::Utc;
use shared::Actor;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::settings::ProfileService;
use crate::AppState;

/// Authenticated user information extracted from the session token
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
    pub is_admin: bool,
}

impl AuthUser {
    /// Request context handed to services; `now` is taken once per call
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.user_id,
            username: self.username.clone(),
            is_admin: self.is_admin,
            now: Utc::now(),
        }
    }

    /// Admin-only operations
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(AppError::AuthorizationDenied(
                "administrator role required".to_string(),
            ))
        }
    }
}

/// Session token claims issued by the auth service
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
    pub exp: i64,
    pub iat: i64,
}

/// Authentication middleware that validates bearer tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return AppError::unauthorized(
            "Missing or invalid Authorization header",
            "Cabeçalho Authorization ausente ou inválido",
        )
        .into_response();
    };

    let claims = match decode_token(bearer.token(), &state.config.session.secret) {
        Ok(claims) => claims,
        Err(err) => return err.into_response(),
    };

    let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
        return AppError::InvalidToken.into_response();
    };

    let user = AuthUser {
        user_id,
        username: claims.username,
        is_admin: claims.is_admin,
    };

    // Movements reference users by id; keep the local mirror current
    if let Err(err) = ProfileService::new(state.db.clone()).ensure_profile(&user).await {
        return err.into_response();
    }

    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Decode and validate a session token
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    use jsonwebtoken::{decode, DecodingKey, Validation};

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "Rejected session token");
        AppError::InvalidToken
    })
}

/// Extractor for authenticated user
/// Use this in handlers to get the current user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| {
                AppError::unauthorized("Authentication required", "É necessário fazer login")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, exp_offset: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::nil().to_string(),
            username: "conferente".into(),
            is_admin: false,
            exp: now + exp_offset,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_decode_valid_token() {
        let claims = decode_token(&token("s3cret", 3600), "s3cret").unwrap();
        assert_eq!(claims.username, "conferente");
        assert!(!claims.is_admin);
    }

    #[test]
    fn test_decode_rejects_wrong_secret_and_expiry() {
        let wrong_secret = decode_token(&token("s3cret", 3600), "other").unwrap_err();
        assert!(matches!(wrong_secret, AppError::InvalidToken));
        assert_eq!(wrong_secret.status_code(), axum::http::StatusCode::UNAUTHORIZED);

        let expired = decode_token(&token("s3cret", -3600), "s3cret").unwrap_err();
        assert!(matches!(expired, AppError::InvalidToken));
        assert!(matches!(
            decode_token("not-a-jwt", "s3cret"),
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn test_missing_user_is_unauthorized() {
        use axum::extract::FromRequestParts;

        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        let rejection = tokio_test::block_on(CurrentUser::from_request_parts(&mut parts, &()))
            .unwrap_err();
        assert!(matches!(rejection, AppError::Unauthorized { .. }));
        assert_eq!(rejection.status_code(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_require_admin() {
        let user = AuthUser {
            user_id: Uuid::nil(),
            username: "op".into(),
            is_admin: false,
        };
        assert!(user.require_admin().is_err());
        assert!(user.actor().can_act_for(Uuid::nil()));
    }
}
