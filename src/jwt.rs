use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppError;
use crate::models::user::User;
use crate::utils::token_fingerprint;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
    pub refresh_exp_hours: i64,
}

impl JwtConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        let exp_hours = std::env::var("JWT_EXP_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(24))
            .map_err(|_| AppError::configuration("JWT_EXP_HOURS must be a valid integer"))?;
        let refresh_exp_hours = std::env::var("JWT_REFRESH_EXP_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(168))
            .map_err(|_| AppError::configuration("JWT_REFRESH_EXP_HOURS must be a valid integer"))?;

        Ok(Self {
            secret: Arc::new(secret.into_bytes()),
            exp_hours,
            refresh_exp_hours,
        })
    }

    /// Signs an access token, the only kind `CurrentUser` accepts.
    pub fn encode(&self, user_id: Uuid) -> Result<String, AppError> {
        self.sign(user_id, TokenKind::Access, self.exp_hours)
    }

    pub fn encode_refresh(&self, user_id: Uuid) -> Result<String, AppError> {
        self.sign(user_id, TokenKind::Refresh, self.refresh_exp_hours)
    }

    fn sign(&self, user_id: Uuid, kind: TokenKind, hours: i64) -> Result<String, AppError> {
        let now = Utc::now();
        let exp = now + Duration::hours(hours);

        let claims = Claims {
            sub: user_id,
            jti: Uuid::new_v4(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
            kind,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::internal(format!("failed to sign token: {err}")))
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::not_authenticated(format!("invalid token: {err}")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    #[default]
    Access,
    Refresh,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    /// Unique per token so two logins in the same second get distinct fingerprints.
    pub jti: Uuid,
    pub exp: usize,
    pub iat: usize,
    #[serde(default)]
    pub kind: TokenKind,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp as i64, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// The authenticated caller, loaded fresh from the store on every request.
///
/// Inactive users still resolve here; the engine denies them.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub token: String,
    pub claims: Claims,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::not_authenticated("Authorization header missing"))?;

        let claims = state.jwt.decode(token)?;
        if claims.kind != TokenKind::Access {
            return Err(AppError::not_authenticated("refresh tokens cannot authenticate requests"));
        }

        if state.store.is_token_revoked(&token_fingerprint(token)).await? {
            return Err(AppError::not_authenticated("token has been revoked"));
        }

        let user = state
            .store
            .user_by_id(claims.sub)
            .await?
            .ok_or_else(|| AppError::not_authenticated("user no longer exists"))?;

        Ok(CurrentUser {
            user,
            token: token.to_string(),
            claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            secret: Arc::new(b"unit-test-secret".to_vec()),
            exp_hours: 1,
            refresh_exp_hours: 2,
        }
    }

    #[test]
    fn issued_tokens_decode_to_their_subject() {
        let cfg = config();
        let user_id = Uuid::new_v4();
        let token = cfg.encode(user_id).unwrap();
        let claims = cfg.decode(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert!(claims.expires_at() > Utc::now());
        assert_ne!(token, cfg.encode(user_id).unwrap());
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn refresh_tokens_outlive_access_tokens() {
        let cfg = config();
        let user_id = Uuid::new_v4();
        let access = cfg.decode(&cfg.encode(user_id).unwrap()).unwrap();
        let refresh = cfg.decode(&cfg.encode_refresh(user_id).unwrap()).unwrap();
        assert_eq!(refresh.kind, TokenKind::Refresh);
        assert_eq!(refresh.sub, user_id);
        assert!(refresh.exp > access.exp);
    }

    #[test]
    fn claims_without_a_kind_are_access_claims() {
        let claims: Claims = serde_json::from_value(serde_json::json!({
            "sub": Uuid::new_v4(),
            "jti": Uuid::new_v4(),
            "exp": 1,
            "iat": 0
        }))
        .unwrap();
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn foreign_tokens_are_not_authenticated() {
        let other = JwtConfig {
            secret: Arc::new(b"another-secret".to_vec()),
            exp_hours: 1,
            refresh_exp_hours: 2,
        };
        let token = other.encode(Uuid::new_v4()).unwrap();
        let err = config().decode(&token).unwrap_err();
        assert_eq!(err.code(), "not_authenticated");
    }
}
