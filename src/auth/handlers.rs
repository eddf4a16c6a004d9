use anyhow::Context;
use axum::{
    extract::{FromRef, Path, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    routing::{get, post},
    Json, Router,
};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            JwtKeys, LoginRequest, LoginResponse, MessageResponse, PublicUser,
            RefreshResponse, RegisterStaffRequest, RegisterStudentRequest, VerifyEmailRequest,
        },
        extractors::AuthUser,
        repo::{should_log_login, LoginLog, NewUser, Role, User},
        services::{
            derive_username, generate_verification_code, hash_password, is_allow_listed,
            is_institutional_email, verify_password,
        },
    },
    cache::{self, user_key, CacheClient, USER_NAMESPACES},
    catalog::repo::{Department, Program},
    error::ApiError,
    mailer::Mailer,
    state::AppState,
};

pub(crate) const ACCESS_COOKIE: &str = "accessToken";
pub(crate) const REFRESH_COOKIE: &str = "refreshToken";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register/student", post(register_student))
        .route("/register/staff", post(register_staff))
        .route("/login", post(login))
        .route("/token/refresh", post(refresh))
        .route("/logout/:user_id", post(logout))
        .route("/verify", post(verify_email))
        .route("/users/:user_id", get(user_details))
}

fn token_cookie(name: &str, token: &str, max_age: Duration) -> anyhow::Result<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        max_age.as_secs()
    ))
    .context("cookie header value")
}

fn expired_cookie(name: &str) -> anyhow::Result<HeaderValue> {
    HeaderValue::from_str(&format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"))
        .context("cookie header value")
}

pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name {
            return Some(val.to_string());
        }
    }
    None
}

#[instrument(skip(state, payload))]
pub async fn register_student(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterStudentRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if payload.email.is_empty()
        || payload.password.is_empty()
        || payload.password_confirmation.is_empty()
    {
        return Err(ApiError::Validation(
            "Please fill in all the required fields".into(),
        ));
    }
    if !is_institutional_email(&payload.email, &state.config.registration.email_domain) {
        warn!(email = %payload.email, "non-institutional email");
        return Err(ApiError::Validation("Invalid institutional email".into()));
    }
    if payload.chosen_role != Role::Student {
        return Err(ApiError::Validation("Your role should be a student".into()));
    }
    if payload.password.len() < 8 {
        warn!("password too short");
        return Err(ApiError::Validation("Password too short".into()));
    }

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::Conflict("User already exists".into()));
    }

    let department = Department::find_by_id(&state.db, payload.chosen_department)
        .await?
        .ok_or_else(|| ApiError::NotFound("Department doesn't exist".into()))?;
    let program = Program::find_by_id(&state.db, payload.chosen_program)
        .await?
        .ok_or_else(|| ApiError::NotFound("Program doesn't exist".into()))?;

    if payload.password != payload.password_confirmation {
        return Err(ApiError::Validation("Passwords do not match".into()));
    }

    let username = derive_username(&payload.email).to_string();
    let password_hash = hash_password(&payload.password).await?;
    let code = generate_verification_code();

    let user = User::create(
        &state.db,
        &NewUser {
            email: &payload.email,
            username: &username,
            password_hash: &password_hash,
            role: Role::Student,
            verification_code: &code,
            department_id: Some(department.id),
            program_id: Some(program.id),
        },
    )
    .await?;

    // The record is written before the email goes out. If dispatch fails
    // the account stays pending and the expiry sweep reclaims it unless the
    // user verifies through a resent code.
    state
        .mailer
        .send(
            &payload.email,
            "Email Verification",
            &format!("Your verification code is: {code}"),
        )
        .await
        .map_err(ApiError::EmailDelivery)?;

    info!(user_id = %user.id, email = %user.email, "student registered");
    Ok(Json(MessageResponse {
        msg: "Verification code sent. Please check your email".into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn register_staff(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterStaffRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if payload.email.is_empty()
        || payload.password.is_empty()
        || payload.password_confirmation.is_empty()
    {
        return Err(ApiError::Validation(
            "Please fill in all the required fields".into(),
        ));
    }
    if !is_institutional_email(&payload.email, &state.config.registration.email_domain) {
        warn!(email = %payload.email, "non-institutional email");
        return Err(ApiError::Validation("Invalid institutional email".into()));
    }
    if payload.chosen_role == Role::Student {
        return Err(ApiError::Validation(
            "Use the student registration for a student account".into(),
        ));
    }
    if payload.password.len() < 8 {
        warn!("password too short");
        return Err(ApiError::Validation("Password too short".into()));
    }

    if !is_allow_listed(&state.config.registration, payload.chosen_role, &payload.email) {
        warn!(email = %payload.email, role = %payload.chosen_role, "not allow-listed");
        return Err(ApiError::Forbidden(format!(
            "You are not authorized to register as a {}",
            payload.chosen_role
        )));
    }

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::Conflict("User already exists".into()));
    }

    if payload.password != payload.password_confirmation {
        return Err(ApiError::Validation("Passwords do not match".into()));
    }

    let username = derive_username(&payload.email).to_string();
    let password_hash = hash_password(&payload.password).await?;
    let code = generate_verification_code();

    let user = User::create(
        &state.db,
        &NewUser {
            email: &payload.email,
            username: &username,
            password_hash: &password_hash,
            role: payload.chosen_role,
            verification_code: &code,
            department_id: None,
            program_id: None,
        },
    )
    .await?;

    state
        .mailer
        .send(
            &payload.email,
            "Email Verification",
            &format!("Your verification code is: {code}"),
        )
        .await
        .map_err(ApiError::EmailDelivery)?;

    info!(user_id = %user.id, email = %user.email, role = %user.role, "staff registered");
    Ok(Json(MessageResponse {
        msg: "Verification code sent. Check your email to complete registration".into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<(HeaderMap, Json<LoginResponse>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if payload.email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation(
            "Email and password are both required".into(),
        ));
    }
    if !is_institutional_email(&payload.email, &state.config.registration.email_domain) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Validation("Invalid email".into()));
    }

    let user = User::find_by_email(&state.db, &payload.email)
        .await?
        .ok_or_else(|| {
            warn!(email = %payload.email, "login unknown email");
            ApiError::NotFound("User not found".into())
        })?;

    if !verify_password(&payload.password, &user.password_hash).await? {
        warn!(email = %payload.email, user_id = %user.id, "login invalid password");
        return Err(ApiError::Unauthorized(
            "Incorrect password. Please try again.".into(),
        ));
    }

    if user.verification_code.is_some() {
        warn!(user_id = %user.id, "login before verification");
        return Err(ApiError::Unauthorized("Please verify your email first".into()));
    }

    if should_log_login(&user) {
        LoginLog::record(&state.db, &user).await?;
    }

    let keys = JwtKeys::from_ref(&state);
    let access_token = keys.sign_access(user.id, user.role)?;
    let refresh_token = keys.sign_refresh(user.id, user.role)?;

    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        token_cookie(ACCESS_COOKIE, &access_token, keys.access_ttl)?,
    );
    headers.append(
        SET_COOKIE,
        token_cookie(REFRESH_COOKIE, &refresh_token, keys.refresh_ttl)?,
    );

    info!(user_id = %user.id, role = %user.role, "user logged in");
    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            refresh_token,
            user_id: user.id,
            role: user.role,
            msg: "User logged in successfully".into(),
        }),
    ))
}

/// Mints a fresh access token from the refresh cookie. Credentials are
/// never re-entered on this path.
#[instrument(skip(state, headers))]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<RefreshResponse>), ApiError> {
    let token = cookie_value(&headers, REFRESH_COOKIE).ok_or(ApiError::InvalidToken)?;

    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&token).map_err(|_| ApiError::InvalidToken)?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or(ApiError::InvalidToken)?;

    let new_access_token = keys.sign_access(user.id, user.role)?;
    let mut out = HeaderMap::new();
    out.append(
        SET_COOKIE,
        token_cookie(ACCESS_COOKIE, &new_access_token, keys.access_ttl)?,
    );

    info!(user_id = %user.id, "access token refreshed");
    Ok((out, Json(RefreshResponse { new_access_token })))
}

/// Clears both token cookies and drops every cache entry scoped to the
/// user. Tokens are not revoked server side: an access token issued before
/// logout stays valid until its natural expiry.
#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<(HeaderMap, Json<MessageResponse>), ApiError> {
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, expired_cookie(ACCESS_COOKIE)?);
    headers.append(SET_COOKIE, expired_cookie(REFRESH_COOKIE)?);

    for namespace in USER_NAMESPACES {
        state.cache.del(&user_key(namespace, user_id)).await?;
    }

    info!(%user_id, "user logged out");
    Ok((
        headers,
        Json(MessageResponse {
            msg: "Logged out successfully".into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = User::find_by_email(&state.db, &payload.email)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    // A verified account holds no code, so any resubmission lands here too.
    if user.verification_code.as_deref() != Some(payload.verification_code.as_str()) {
        warn!(email = %payload.email, "verification code mismatch");
        return Err(ApiError::Validation("Incorrect verification code".into()));
    }

    User::mark_verified(&state.db, &user.email).await?;

    info!(user_id = %user.id, "email verified");
    Ok(Json(MessageResponse {
        msg: "Email verified successfully. User registered.".into(),
    }))
}

#[instrument(skip(state))]
pub async fn user_details(
    State(state): State<AppState>,
    AuthUser(_, _): AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<PublicUser>, ApiError> {
    let key = user_key("user-details", user_id);
    if let Some(cached) = cache::get_json::<PublicUser>(state.cache.as_ref(), &key).await {
        return Ok(Json(cached));
    }

    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    let public = PublicUser::from(user);

    cache::put_json(state.cache.as_ref(), &key, &public, state.config.cache_ttl()).await;
    Ok(Json(public))
}

#[cfg(test)]
mod cookie_tests {
    use super::*;

    #[test]
    fn token_cookie_is_http_only_with_ttl() {
        let value = token_cookie(ACCESS_COOKIE, "tok", Duration::from_secs(300)).unwrap();
        let raw = value.to_str().unwrap();
        assert!(raw.starts_with("accessToken=tok;"));
        assert!(raw.contains("HttpOnly"));
        assert!(raw.contains("Max-Age=300"));
    }

    #[test]
    fn expired_cookie_clears_the_value() {
        let value = expired_cookie(REFRESH_COOKIE).unwrap();
        let raw = value.to_str().unwrap();
        assert!(raw.starts_with("refreshToken=;"));
        assert!(raw.contains("Max-Age=0"));
    }

    #[test]
    fn cookie_value_picks_the_named_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("accessToken=abc; refreshToken=def; theme=dark"),
        );
        assert_eq!(cookie_value(&headers, ACCESS_COOKIE).as_deref(), Some("abc"));
        assert_eq!(cookie_value(&headers, REFRESH_COOKIE).as_deref(), Some("def"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}

#[cfg(test)]
mod logout_tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn logout_clears_cookies_and_only_this_users_cache() {
        let state = AppState::fake();
        let this_user = Uuid::new_v4();
        let other_user = Uuid::new_v4();

        for namespace in USER_NAMESPACES {
            state
                .cache
                .set_ex(
                    &user_key(namespace, this_user),
                    "cached",
                    StdDuration::from_secs(60),
                )
                .await
                .unwrap();
            state
                .cache
                .set_ex(
                    &user_key(namespace, other_user),
                    "cached",
                    StdDuration::from_secs(60),
                )
                .await
                .unwrap();
        }

        let (headers, body) = logout(State(state.clone()), Path(this_user))
            .await
            .expect("logout should succeed");

        let cookies: Vec<_> = headers.get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 2);
        for cookie in cookies {
            assert!(cookie.to_str().unwrap().contains("Max-Age=0"));
        }
        assert_eq!(body.msg, "Logged out successfully");

        for namespace in USER_NAMESPACES {
            assert_eq!(
                state
                    .cache
                    .get(&user_key(namespace, this_user))
                    .await
                    .unwrap(),
                None,
                "{namespace} should be invalidated for the logged-out user"
            );
            assert!(
                state
                    .cache
                    .get(&user_key(namespace, other_user))
                    .await
                    .unwrap()
                    .is_some(),
                "{namespace} for other users should survive"
            );
        }
    }
}
