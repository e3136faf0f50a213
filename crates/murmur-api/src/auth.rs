use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{SubsecRound, Utc};
use serde_json::json;
use tracing::{info, warn};

use murmur_db::deadline::{self, internal};
use murmur_db::queries::is_constraint_violation;
use murmur_db::{Database, STORE_DEADLINE};
use murmur_types::api::{
    Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, SendEmailRequest,
    StatusResponse, VerifyEmailRequest,
};
use murmur_types::models::User;
use murmur_types::{ChatError, ObjectId};

use crate::error::ApiError;
use crate::mailer::{self, Mailer};
use crate::{otp, password, token};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub mailer: Arc<dyn Mailer>,
}

pub async fn hello() -> impl IntoResponse {
    Json(json!({ "message": "Hello World" }))
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_string();
    let username = req.username.trim().to_string();
    if email.is_empty() || username.is_empty() || req.password.is_empty() {
        return Err(ChatError::BadInput("email, username and password are required".into()).into());
    }

    let code = otp::generate();
    let digest = otp::digest(&code);

    let user = deadline::run(&state.db, STORE_DEADLINE, move |db| -> Result<User, ChatError> {
        if db
            .find_user_by_email_or_username(&email, &username)
            .map_err(internal)?
            .is_some()
        {
            return Err(ChatError::Conflict(
                "user with given email or username already exists".into(),
            ));
        }

        password::validate(&req.password)?;
        let password_hash = password::hash(&req.password)?;

        let now = Utc::now().trunc_subsecs(6);
        let user = User {
            id: ObjectId::new(),
            email,
            username,
            password: password_hash,
            verified_email: false,
            otp_token: Some(digest),
            otp_expires_at: Some(otp::expiry_from(now)),
            created_at: now,
            updated_at: now,
        };

        match db.insert_user(&user) {
            Ok(()) => Ok(user),
            Err(e) if is_constraint_violation(&e) => Err(ChatError::Conflict(
                "user with given email or username already exists".into(),
            )),
            Err(e) => Err(internal(e)),
        }
    })
    .await?;

    info!("User {} registered ({})", user.id, user.username);

    // Delivery must not hold up the response.
    let outbox = state.mailer.clone();
    let to = user.email.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = outbox.send(&to, mailer::otp_subject(), &mailer::otp_body(&code)) {
            warn!("Failed to send verification email to {}: {:#}", to, e);
        }
    });

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            user,
        }),
    ))
}

pub async fn verify_email(
    State(state): State<AppState>,
    Json(req): Json<VerifyEmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_string();
    if email.is_empty() || req.otp_token.trim().is_empty() {
        return Err(ChatError::BadInput("email and otpToken are required".into()).into());
    }

    deadline::run(&state.db, STORE_DEADLINE, move |db| -> Result<(), ChatError> {
        let user = db
            .find_user_by_email(&email)
            .map_err(internal)?
            .ok_or_else(|| ChatError::NotFound("user not found".into()))?;

        let stored = user
            .otp_token
            .as_deref()
            .ok_or_else(|| ChatError::BadRequest("invalid OTP token".into()))?;
        if !otp::matches(&req.otp_token, stored) {
            return Err(ChatError::BadRequest("invalid OTP token".into()));
        }
        if user.otp_expires_at.is_none_or(|expires| expires < Utc::now()) {
            return Err(ChatError::BadRequest("OTP token has expired".into()));
        }

        db.mark_email_verified(&email).map_err(internal)?;
        Ok(())
    })
    .await?;

    Ok(Json(StatusResponse {
        success: true,
        message: "Email verified successfully".into(),
    }))
}

/// Issue a fresh code and mail it, replacing any pending one.
pub async fn send_email(
    State(state): State<AppState>,
    Json(req): Json<SendEmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_string();
    if email.is_empty() {
        return Err(ChatError::BadInput("email is required".into()).into());
    }

    let code = otp::generate();
    let digest = otp::digest(&code);
    let expires_at = otp::expiry_from(Utc::now().trunc_subsecs(6));

    let lookup = email.clone();
    deadline::run(&state.db, STORE_DEADLINE, move |db| -> Result<(), ChatError> {
        if db.set_user_otp(&lookup, &digest, &expires_at).map_err(internal)? {
            Ok(())
        } else {
            Err(ChatError::NotFound("user does not exist".into()))
        }
    })
    .await?;

    let outbox = state.mailer.clone();
    let to = email.clone();
    tokio::task::spawn_blocking(move || outbox.send(&to, mailer::otp_subject(), &mailer::otp_body(&code)))
        .await
        .map_err(ChatError::internal)?
        .map_err(|e| {
            warn!("Failed to send verification email to {}: {:#}", email, e);
            ChatError::Internal("failed to send email".into())
        })?;

    Ok(Json(StatusResponse {
        success: true,
        message: format!("Email sent successfully to {}", email),
    }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_string();
    if email.is_empty() || req.password.is_empty() {
        return Err(ChatError::BadInput("email and password are required".into()).into());
    }

    let user = deadline::run(&state.db, STORE_DEADLINE, move |db| -> Result<User, ChatError> {
        let user = db
            .find_user_by_email(&email)
            .map_err(internal)?
            .ok_or_else(|| ChatError::NotFound("user not found".into()))?;

        // Verify password
        if !password::verify(&req.password, &user.password) {
            return Err(ChatError::Unauthorized("invalid password".into()));
        }
        Ok(user)
    })
    .await?;

    if !user.verified_email {
        return Err(ChatError::Unauthorized("email address is not verified".into()).into());
    }

    let token = token::mint(&state.jwt_secret, user.id)?;
    info!("User {} logged in", user.id);

    Ok(Json(LoginResponse {
        success: true,
        token,
    }))
}

/// The authenticated caller's own record.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let user = deadline::run(&state.db, STORE_DEADLINE, move |db| -> Result<User, ChatError> {
        db.find_user_by_id(&user_id)
            .map_err(internal)?
            .ok_or_else(|| ChatError::NotFound("user not found".into()))
    })
    .await?;

    Ok(Json(user))
}
