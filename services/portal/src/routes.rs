//! Portal service routes

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::PortalError,
    middleware::{
        AuthUser, REFRESH_COOKIE, SESSION_COOKIE, admin_api_gate, refresh_cookie, removal_cookie,
        session_cookie, session_gate, token_from_headers,
    },
    models::{ArchivedUserResponse, NewUser, UserResponse},
    state::AppState,
    validation,
};

/// Request for account registration and admin account creation
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Request for user login
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Response for user login
#[derive(Serialize)]
pub struct LoginResponse {
    pub user: UserResponse,
    pub token: String,
}

/// Response for token refresh
#[derive(Serialize)]
pub struct RefreshResponse {
    pub message: String,
    pub access_token: String,
}

/// Request for restoring an archived account
#[derive(Deserialize)]
pub struct RestoreRequest {
    pub archive_id: i64,
}

/// Response carrying a freshly issued membership number
#[derive(Serialize)]
pub struct NextNumberResponse {
    pub membership_number: String,
}

/// Generic message response
#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Create the router for the portal service
pub fn create_router(state: AppState) -> Router {
    let admin_api = Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/restore", post(restore_user))
        .route("/users/:id", delete(delete_user))
        .route("/users/:id/approve", patch(approve_user))
        .route("/deleted-users", get(list_deleted_users))
        .route_layer(from_fn_with_state(state.clone(), admin_api_gate));

    let membership_api = Router::new()
        .route("/next-number", post(next_membership_number))
        .route_layer(from_fn_with_state(state.clone(), admin_api_gate));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh_session))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(current_session))
        .nest("/api/admin", admin_api)
        .nest("/api/membership", membership_api)
        .route("/dashboard", get(dashboard))
        .route("/admin", get(admin_home))
        .layer(from_fn_with_state(state.clone(), session_gate))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = common::database::health_check(&state.db_pool)
        .await
        .unwrap_or(false);
    let status = if database { "ok" } else { "degraded" };

    Json(serde_json::json!({
        "status": status,
        "service": "portal"
    }))
}

/// Account registration endpoint: the account starts pending and
/// cannot log in until an administrator approves it
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, PortalError> {
    info!("Registration attempt for {}", payload.email);

    validate_account_payload(&payload)?;

    let new_user = NewUser {
        name: payload.name,
        email: payload.email,
        password: payload.password,
    };
    state.user_repository.create(&new_user).await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Registration successful. Waiting for admin approval.".to_string(),
        }),
    ))
}

/// User login endpoint
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, PortalError> {
    info!("Login attempt for {}", payload.email);

    let throttle_key = payload.email.to_lowercase();
    if !state.rate_limiter.is_allowed(&throttle_key).await {
        return Err(PortalError::TooManyAttempts);
    }

    let user = state
        .user_repository
        .find_by_email(&payload.email)
        .await?
        .ok_or(PortalError::NotFound)?;

    if !state
        .user_repository
        .verify_password(&user, &payload.password)
        .await?
    {
        return Err(PortalError::InvalidCredentials);
    }

    if !user.approval_granted() {
        info!("Login blocked pending approval for {}", user.email);
        return Err(PortalError::PendingApproval);
    }

    state.rate_limiter.reset(&throttle_key).await;

    let access_token = state.jwt_service.issue_access_token(&user)?;
    let refresh_token = state.jwt_service.issue_refresh_token(&user)?;

    let jar = jar
        .add(session_cookie(
            &state.cookie_config,
            access_token.clone(),
            state.jwt_service.access_token_expiry(),
        ))
        .add(refresh_cookie(
            &state.cookie_config,
            refresh_token,
            state.jwt_service.refresh_token_expiry(),
        ));

    info!("Login successful for account {}", user.id);
    Ok((
        jar,
        Json(LoginResponse {
            user: user.into(),
            token: access_token,
        }),
    ))
}

/// Token refresh endpoint: exchanges a valid refresh cookie for a
/// fresh access token. An invalid refresh cookie is expired in the
/// 401 response, forcing re-authentication.
pub async fn refresh_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response, PortalError> {
    let Some(refresh_token) = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()) else {
        return Err(PortalError::InvalidOrExpiredToken);
    };

    let claims = match state.jwt_service.verify_refresh_token(&refresh_token) {
        Ok(claims) => claims,
        Err(err) => {
            let jar = jar.remove(removal_cookie(REFRESH_COOKIE));
            return Ok((jar, err.into_response()).into_response());
        }
    };

    let access_token = state.jwt_service.reissue_access_token(&claims)?;
    let jar = jar.add(session_cookie(
        &state.cookie_config,
        access_token.clone(),
        state.jwt_service.access_token_expiry(),
    ));

    info!("Refreshed session for account {}", claims.sub);
    Ok((
        jar,
        Json(RefreshResponse {
            message: "Token refreshed successfully".to_string(),
            access_token,
        }),
    )
        .into_response())
}

/// Logout endpoint: the tokens are stateless, so logout only
/// instructs the client to discard both cookies
pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    let jar = jar
        .remove(removal_cookie(SESSION_COOKIE))
        .remove(removal_cookie(REFRESH_COOKIE));

    (
        jar,
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    )
}

/// Current session endpoint: decode the caller's token and return the
/// account it names
pub async fn current_session(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Json<UserResponse>, PortalError> {
    let token = token_from_headers(&headers, &jar).ok_or(PortalError::InvalidOrExpiredToken)?;
    let claims = state.jwt_service.verify_access_token(&token)?;

    let user = state
        .user_repository
        .find_by_id(claims.sub)
        .await?
        .ok_or(PortalError::NotFound)?;

    Ok(Json(user.into()))
}

/// List all accounts, newest first (admin)
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<UserResponse>>, PortalError> {
    let users = state.user_repository.list().await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Create a pre-approved account with its membership number (admin)
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, PortalError> {
    validate_account_payload(&payload)?;

    let new_user = NewUser {
        name: payload.name,
        email: payload.email,
        password: payload.password,
    };
    let user = state.user_repository.create_approved(&new_user).await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// Approve a pending account, minting its membership number (admin)
pub async fn approve_user(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, PortalError> {
    info!("Account {} approval requested by {}", id, admin.id);
    let user = state.user_repository.approve(id).await?;
    Ok(Json(user.into()))
}

/// Delete an account, archiving a snapshot first (admin)
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, PortalError> {
    state.user_repository.delete(id, admin.id).await?;
    Ok(Json(MessageResponse {
        message: "User deleted successfully".to_string(),
    }))
}

/// List archived accounts (admin)
pub async fn list_deleted_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<ArchivedUserResponse>>, PortalError> {
    let archived = state.user_repository.list_deleted().await?;
    Ok(Json(
        archived
            .into_iter()
            .map(ArchivedUserResponse::from)
            .collect(),
    ))
}

/// Restore an archived account from its snapshot (admin)
pub async fn restore_user(
    State(state): State<AppState>,
    Json(payload): Json<RestoreRequest>,
) -> Result<Json<UserResponse>, PortalError> {
    let user = state.user_repository.restore(payload.archive_id).await?;
    Ok(Json(user.into()))
}

/// Issue the next membership number outside the approval flow (admin)
pub async fn next_membership_number(
    State(state): State<AppState>,
) -> Result<Json<NextNumberResponse>, PortalError> {
    let membership_number = state.membership.next_number().await?;
    Ok(Json(NextNumberResponse { membership_number }))
}

/// Landing payload for the gated dashboard path; page rendering lives
/// in the web frontend
pub async fn dashboard(Extension(user): Extension<AuthUser>) -> impl IntoResponse {
    Json(serde_json::json!({
        "area": "dashboard",
        "email": user.email,
    }))
}

/// Landing payload for the gated admin area
pub async fn admin_home(Extension(user): Extension<AuthUser>) -> impl IntoResponse {
    Json(serde_json::json!({
        "area": "admin",
        "email": user.email,
    }))
}

fn validate_account_payload(payload: &RegisterRequest) -> Result<(), PortalError> {
    validation::validate_name(&payload.name).map_err(PortalError::Validation)?;
    validation::validate_email(&payload.email).map_err(PortalError::Validation)?;
    validation::validate_password(&payload.password).map_err(PortalError::Validation)?;
    Ok(())
}
