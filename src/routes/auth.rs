use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::json;

use super::MessageResponse;
use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::RequestContext;
use crate::jwt::{CurrentUser, TokenKind};
use crate::models::audit::AuditAction;
use crate::models::user::{
    AuthResponse, LoginRequest, LogoutRequest, NewUser, Profile, ProfileUpdateRequest, RefreshRequest,
    RefreshResponse, RegisterRequest, User,
};
use crate::store::IdentityStore;
use crate::utils::{hash_password, token_fingerprint, utc_now, verify_password};

#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 400, description = "Invalid payload or weak password"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    payload.validate()?;
    let password_hash = hash_password(&payload.password)?;

    let user = state
        .store
        .create_user(NewUser {
            email: payload.email.trim().to_lowercase(),
            first_name: payload.first_name.trim().to_string(),
            last_name: payload.last_name.trim().to_string(),
            patronymic: payload.patronymic.unwrap_or_default().trim().to_string(),
            password_hash,
            is_staff: false,
            is_superuser: false,
        })
        .await?;

    let token = state.jwt.encode(user.id)?;
    let refresh = state.jwt.encode_refresh(user.id)?;
    let ctx = RequestContext::from_headers(&headers);
    state
        .audit
        .record_entity(Some(user.id), AuditAction::Create, &user, json!({ "email": user.email }), Some(&ctx))
        .await?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(AuthResponse { token, refresh, user })))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials or disabled account")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let db_user = state
        .store
        .user_by_email(&payload.email.trim().to_lowercase())
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        return Err(AppError::unauthorized("invalid credentials"));
    }
    if !db_user.is_active {
        return Err(AppError::unauthorized("account is disabled"));
    }

    let now = utc_now();
    state.store.touch_last_login(db_user.id, now).await?;

    let mut user = User::from(db_user);
    user.last_login = Some(now);
    let token = state.jwt.encode(user.id)?;
    let refresh = state.jwt.encode_refresh(user.id)?;

    let ctx = RequestContext::from_headers(&headers);
    state
        .audit
        .record(Some(user.id), AuditAction::Login, "", "", json!({}), Some(&ctx))
        .await?;

    Ok(Json(AuthResponse { token, refresh, user }))
}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = RefreshResponse),
        (status = 401, description = "Refresh token invalid, revoked or of a disabled account")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<RefreshResponse>> {
    let claims = state.jwt.decode(&payload.refresh)?;
    if claims.kind != TokenKind::Refresh {
        return Err(AppError::not_authenticated("not a refresh token"));
    }
    if state.store.is_token_revoked(&token_fingerprint(&payload.refresh)).await? {
        return Err(AppError::not_authenticated("token has been revoked"));
    }

    let user = state
        .store
        .user_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::not_authenticated("user no longer exists"))?;
    if !user.is_active {
        return Err(AppError::not_authenticated("account is disabled"));
    }

    Ok(Json(RefreshResponse {
        token: state.jwt.encode(user.id)?,
    }))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "Auth",
    request_body(content = LogoutRequest, description = "Optional refresh token to revoke"),
    responses(
        (status = 200, description = "Token revoked", body = MessageResponse),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearerAuth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    current: CurrentUser,
    payload: Option<Json<LogoutRequest>>,
) -> AppResult<Json<MessageResponse>> {
    let refresh = match payload.and_then(|Json(body)| body.refresh) {
        Some(refresh) => {
            let claims = state.jwt.decode(&refresh)?;
            if claims.kind != TokenKind::Refresh || claims.sub != current.user.id {
                return Err(AppError::bad_request("refresh token does not belong to this user"));
            }
            Some((refresh, claims))
        }
        None => None,
    };

    state
        .store
        .revoke_token(&token_fingerprint(&current.token), current.user.id, current.claims.expires_at())
        .await?;
    if let Some((refresh, claims)) = refresh {
        state
            .store
            .revoke_token(&token_fingerprint(&refresh), current.user.id, claims.expires_at())
            .await?;
    }

    let ctx = RequestContext::from_headers(&headers);
    state
        .audit
        .record(Some(current.user.id), AuditAction::Logout, "", "", json!({}), Some(&ctx))
        .await?;

    Ok(Json(MessageResponse::new("logged out")))
}

#[utoipa::path(
    get,
    path = "/api/auth/profile",
    tag = "Auth",
    responses(
        (status = 200, description = "Current user with role names", body = Profile),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearerAuth" = []))
)]
pub async fn profile(State(state): State<AppState>, current: CurrentUser) -> AppResult<Json<Profile>> {
    Ok(Json(build_profile(&state, current.user).await?))
}

#[utoipa::path(
    put,
    path = "/api/auth/profile",
    tag = "Auth",
    request_body = ProfileUpdateRequest,
    responses((status = 200, description = "Profile updated", body = Profile)),
    security(("bearerAuth" = []))
)]
pub async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    current: CurrentUser,
    Json(payload): Json<ProfileUpdateRequest>,
) -> AppResult<Json<Profile>> {
    let user = state.store.update_profile(current.user.id, &payload).await?;

    let ctx = RequestContext::from_headers(&headers);
    state
        .audit
        .record_entity(
            Some(user.id),
            AuditAction::Update,
            &user,
            json!({ "updated_fields": payload.updated_fields() }),
            Some(&ctx),
        )
        .await?;

    Ok(Json(build_profile(&state, user).await?))
}

#[utoipa::path(
    delete,
    path = "/api/auth/profile",
    tag = "Auth",
    responses((status = 204, description = "Account deactivated and token revoked")),
    security(("bearerAuth" = []))
)]
pub async fn delete_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    current: CurrentUser,
) -> AppResult<StatusCode> {
    state.store.deactivate_user(current.user.id).await?;
    state
        .store
        .revoke_token(&token_fingerprint(&current.token), current.user.id, current.claims.expires_at())
        .await?;

    let ctx = RequestContext::from_headers(&headers);
    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::Delete,
            &current.user,
            json!({ "soft_delete": true }),
            Some(&ctx),
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn build_profile(state: &AppState, user: User) -> AppResult<Profile> {
    let roles = state
        .store
        .roles_of(user.id)
        .await?
        .into_iter()
        .map(|a| a.role.name)
        .collect();

    Ok(Profile {
        full_name: user.full_name(),
        user,
        roles,
    })
}
