//! Account service routes

use axum::{
    Extension, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::{TypedHeader, headers::UserAgent};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::{
    AppState,
    code::CodeError,
    jwt::AccessClaims,
    middleware::{auth_middleware, ip_rate_limit_middleware},
    models::UpdateUser,
    session::{AuthError, SessionError},
    sms::SmsError,
    user_cache::LookupError,
    validation,
};

/// Business scope of login codes
pub const LOGIN_BIZ: &str = "login";

/// Response header carrying the access token
pub const ACCESS_TOKEN_HEADER: &str = "x-jwt-token";
/// Header carrying the refresh token, in responses and in refresh requests
pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

#[derive(Deserialize)]
pub struct SendCodeRequest {
    pub phone: String,
}

#[derive(Deserialize)]
pub struct LoginSmsRequest {
    pub phone: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct EditRequest {
    pub nickname: String,
    /// `YYYY-MM-DD`
    pub birthday: String,
    pub about_me: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileResponse {
    pub id: i64,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub nickname: String,
    pub birthday: Option<NaiveDate>,
    pub about_me: String,
}

/// Create the router for the account service
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/users/logout", post(logout))
        .route("/users/profile", get(profile))
        .route("/users/edit", post(edit))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/users/login_sms/code/send", post(send_login_code))
        .route("/users/login_sms", post(login_sms))
        .route("/users/refresh_token", post(refresh_token))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ip_rate_limit_middleware,
        ))
        .with_state(state)
}

fn user_agent(header: Option<TypedHeader<UserAgent>>) -> String {
    header
        .map(|TypedHeader(ua)| ua.as_str().to_string())
        .unwrap_or_default()
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "account-service"
    }))
}

/// Send a login code by SMS
pub async fn send_login_code(
    State(state): State<AppState>,
    Json(payload): Json<SendCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_phone(&payload.phone).map_err(AppError::BadRequest)?;

    state.codes.send(LOGIN_BIZ, &payload.phone).await?;
    Ok(Json(serde_json::json!({"message": "Verification code sent"})))
}

/// Log in (and sign up on first use) with an SMS code
pub async fn login_sms(
    State(state): State<AppState>,
    ua: Option<TypedHeader<UserAgent>>,
    Json(payload): Json<LoginSmsRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_phone(&payload.phone).map_err(AppError::BadRequest)?;
    validation::validate_code(&payload.code).map_err(AppError::BadRequest)?;

    let ok = state
        .codes
        .verify(LOGIN_BIZ, &payload.phone, &payload.code)
        .await?;
    if !ok {
        return Err(AppError::BadRequest(
            "Invalid verification code".to_string(),
        ));
    }

    let user = state.users.find_or_create_by_phone(&payload.phone).await?;
    let tokens = state
        .sessions
        .issue_login_tokens(user.id, &user_agent(ua))?;
    info!("User {} logged in by SMS", user.id);

    Ok((
        [
            (ACCESS_TOKEN_HEADER, tokens.access_token),
            (REFRESH_TOKEN_HEADER, tokens.refresh_token),
        ],
        Json(serde_json::json!({"message": "Logged in successfully"})),
    ))
}

/// Exchange the refresh token in `x-refresh-token` for a new access token
pub async fn refresh_token(
    State(state): State<AppState>,
    ua: Option<TypedHeader<UserAgent>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = headers
        .get(REFRESH_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let access_token = state.sessions.refresh(token, &user_agent(ua)).await?;
    Ok((
        [(ACCESS_TOKEN_HEADER, access_token)],
        Json(serde_json::json!({"message": "Token refreshed"})),
    ))
}

/// Revoke the caller's session
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessClaims>,
) -> Result<impl IntoResponse, AppError> {
    state.sessions.revoke(&claims.ssid).await?;
    Ok((
        [(ACCESS_TOKEN_HEADER, ""), (REFRESH_TOKEN_HEADER, "")],
        Json(serde_json::json!({"message": "Logged out successfully"})),
    ))
}

/// Profile of the caller, served through the user cache
pub async fn profile(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessClaims>,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = state.users.find_by_id(claims.uid).await?;
    Ok(Json(ProfileResponse {
        id: user.id,
        email: user.email,
        phone: user.phone,
        nickname: user.nickname,
        birthday: user.birthday,
        about_me: user.about_me,
    }))
}

/// Edit the caller's profile
pub async fn edit(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessClaims>,
    Json(payload): Json<EditRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_nickname(&payload.nickname).map_err(AppError::BadRequest)?;
    validation::validate_about_me(&payload.about_me).map_err(AppError::BadRequest)?;
    let birthday = validation::validate_birthday(&payload.birthday).map_err(AppError::BadRequest)?;

    let changes = UpdateUser {
        nickname: Some(payload.nickname),
        birthday: Some(birthday),
        about_me: Some(payload.about_me),
        avatar: None,
    };
    state.users.update(claims.uid, &changes).await?;
    Ok(Json(serde_json::json!({"message": "Profile updated"})))
}

/// HTTP error of the account service
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    TooManyRequests(String),

    #[error("Internal server error")]
    Internal,
}

impl From<AuthError> for AppError {
    fn from(_: AuthError) -> Self {
        AppError::Unauthorized
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        error!("Session error: {}", err);
        AppError::Internal
    }
}

impl From<LookupError> for AppError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound => AppError::NotFound,
            other => {
                error!("User lookup failed: {}", other);
                AppError::Internal
            }
        }
    }
}

impl From<CodeError> for AppError {
    fn from(err: CodeError) -> Self {
        match err {
            CodeError::SendTooMany | CodeError::VerifyTooMany => {
                AppError::TooManyRequests(err.to_string())
            }
            CodeError::Delivery(SmsError::Limited) => AppError::TooManyRequests(err.to_string()),
            CodeError::Expired => AppError::BadRequest("Verification code expired".to_string()),
            other => {
                error!("Verification code error: {}", other);
                AppError::Internal
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
