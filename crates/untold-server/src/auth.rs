//! OTP-based signup and login.
//!
//! The flow keeps unverified signups out of the `users` table: a signup
//! first lands in `pending_signups` with a short-lived OTP, and only a
//! correct, unexpired code creates the account.  Login on a 2FA-enabled
//! account goes through the same OTP dance before a token is issued.
//!
//! Passwords are hashed with Argon2; session tokens are HS256 JWTs signed
//! with the configured secret.

use axum::extract::{Json, State};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use untold_store::{PendingSignup, User};

use crate::api::AppState;
use crate::error::ApiError;
use crate::mailer::{OtpEmail, OtpPurpose};

/// Session token lifetime.
const TOKEN_TTL_DAYS: i64 = 7;

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SendSignupOtpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct VerifySignupOtpRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct VerifyTwoFaRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Deserialize)]
pub struct ForgotRequest {
    pub email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub success: bool,
    pub token: String,
    pub user: User,
}

/// JWT claims carried by a session token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    /// Expiry as a unix timestamp.
    pub exp: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn send_signup_otp(
    State(state): State<AppState>,
    Json(req): Json<SendSignupOtpRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = req.name.trim();
    let email = req.email.trim().to_lowercase();

    if name.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("missing fields".into()));
    }
    if !email_looks_valid(&email) {
        return Err(ApiError::BadRequest("invalid email".into()));
    }
    if !password_is_strong(&req.password) {
        return Err(ApiError::BadRequest(
            "password must be at least 6 characters with at least one letter and one digit".into(),
        ));
    }

    let db = state.db.lock().await;
    if db.find_user_by_email(&email)?.is_some() {
        return Err(ApiError::BadRequest("email already registered".into()));
    }

    let otp = generate_otp();
    let now = Utc::now();
    db.upsert_pending_signup(&PendingSignup {
        email: email.clone(),
        name: name.to_string(),
        password_hash: hash_password(&req.password)?,
        otp: otp.clone(),
        otp_expires: now + Duration::minutes(state.config.otp_ttl_minutes),
        created_at: now,
    })?;
    drop(db);

    state.mailer.send_otp(OtpEmail {
        to: &email,
        otp: &otp,
        purpose: OtpPurpose::Signup,
        name,
    });

    info!(email = %email, "signup OTP issued");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "OTP sent to email",
    })))
}

pub async fn verify_signup_otp(
    State(state): State<AppState>,
    Json(req): Json<VerifySignupOtpRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.otp.is_empty() {
        return Err(ApiError::BadRequest("missing email/otp".into()));
    }

    let db = state.db.lock().await;
    let pending = db
        .get_pending_signup(&email)?
        .ok_or_else(|| ApiError::BadRequest("no pending signup for this email".into()))?;

    if pending.otp != req.otp {
        return Err(ApiError::BadRequest("invalid OTP".into()));
    }
    if pending.otp_expires < Utc::now() {
        return Err(ApiError::BadRequest("OTP expired".into()));
    }
    // The email may have been registered while the signup was pending.
    if db.find_user_by_email(&email)?.is_some() {
        db.delete_pending_signup(&email)?;
        return Err(ApiError::BadRequest("email already registered".into()));
    }

    let user = db.create_user(&pending.name, &pending.email, &pending.password_hash)?;
    db.delete_pending_signup(&email)?;
    drop(db);

    let token = issue_token(&state.config.jwt_secret, &user)?;
    info!(email = %email, user = %user.id, "signup verified");
    Ok(Json(TokenResponse {
        success: true,
        token,
        user,
    }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("missing email/password".into()));
    }

    let db = state.db.lock().await;
    let user = db
        .find_user_by_email(&email)?
        .filter(|u| verify_password(&req.password, &u.password_hash))
        .ok_or_else(|| ApiError::Unauthorized("invalid credentials".into()))?;

    if user.two_fa {
        let otp = generate_otp();
        db.set_user_otp(
            user.id,
            &otp,
            Utc::now() + Duration::minutes(state.config.otp_ttl_minutes),
        )?;
        drop(db);

        state.mailer.send_otp(OtpEmail {
            to: &user.email,
            otp: &otp,
            purpose: OtpPurpose::Login,
            name: &user.name,
        });

        info!(email = %email, "login OTP issued (2FA)");
        return Ok(Json(serde_json::json!({
            "success": true,
            "twoFA": true,
            "message": "OTP sent to email",
        })));
    }
    drop(db);

    let token = issue_token(&state.config.jwt_secret, &user)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "token": token,
        "user": user,
    })))
}

pub async fn verify_two_fa(
    State(state): State<AppState>,
    Json(req): Json<VerifyTwoFaRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();

    let db = state.db.lock().await;
    let user = db
        .find_user_by_email(&email)?
        .ok_or_else(|| ApiError::Unauthorized("invalid credentials".into()))?;

    check_user_otp(&user, &req.otp)?;
    db.clear_user_otp(user.id)?;
    drop(db);

    let token = issue_token(&state.config.jwt_secret, &user)?;
    info!(email = %email, "2FA verified");
    Ok(Json(TokenResponse {
        success: true,
        token,
        user,
    }))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(ApiError::BadRequest("missing email".into()));
    }

    let db = state.db.lock().await;
    if let Some(user) = db.find_user_by_email(&email)? {
        let otp = generate_otp();
        db.set_user_otp(
            user.id,
            &otp,
            Utc::now() + Duration::minutes(state.config.otp_ttl_minutes),
        )?;
        drop(db);

        state.mailer.send_otp(OtpEmail {
            to: &user.email,
            otp: &otp,
            purpose: OtpPurpose::PasswordReset,
            name: &user.name,
        });
        info!(email = %email, "password reset OTP issued");
    }

    // Same response whether or not the email is registered.
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "If the email is registered, an OTP has been sent",
    })))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if !password_is_strong(&req.new_password) {
        return Err(ApiError::BadRequest(
            "password must be at least 6 characters with at least one letter and one digit".into(),
        ));
    }

    let db = state.db.lock().await;
    let user = db
        .find_user_by_email(&email)?
        .ok_or_else(|| ApiError::BadRequest("invalid or expired OTP".into()))?;

    check_user_otp(&user, &req.otp)?;
    db.set_password(user.id, &hash_password(&req.new_password)?)?;
    db.clear_user_otp(user.id)?;

    info!(email = %email, "password reset");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Password updated",
    })))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_user_otp(user: &User, otp: &str) -> Result<(), ApiError> {
    let valid = match (&user.otp, &user.otp_expires) {
        (Some(stored), Some(expires)) => stored == otp && *expires >= Utc::now(),
        _ => false,
    };
    if !valid {
        return Err(ApiError::BadRequest("invalid or expired OTP".into()));
    }
    Ok(())
}

pub(crate) fn issue_token(secret: &str, user: &User) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user.id.to_string(),
        email: user.email.clone(),
        exp: (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))
}

pub(crate) fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
}

fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// 6-digit numeric code.
fn generate_otp() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

fn password_is_strong(password: &str) -> bool {
    password.len() >= 6
        && password.chars().any(|c| c.is_ascii_alphabetic())
        && password.chars().any(|c| c.is_ascii_digit())
}

/// Cheap shape check; real deliverability is the mail collaborator's problem.
fn email_looks_valid(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !email.contains(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use jsonwebtoken::{decode, DecodingKey, Validation};
    use tokio::sync::Mutex;

    use untold_store::Database;

    use crate::config::ServerConfig;
    use crate::mailer::test_support::RecordingMailer;
    use crate::proof_store::ProofStore;
    use crate::rate_limit::RateLimiter;

    async fn test_state(dir: &tempfile::TempDir) -> (AppState, Arc<RecordingMailer>) {
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState {
            db: Arc::new(Mutex::new(Database::open_in_memory().unwrap())),
            proofs: Arc::new(
                ProofStore::new(PathBuf::from(dir.path()), 1024)
                    .await
                    .unwrap(),
            ),
            mailer: mailer.clone(),
            rate_limiter: RateLimiter::new(1000.0, 1000.0),
            config: Arc::new(ServerConfig::default()),
        };
        (state, mailer)
    }

    #[test]
    fn password_strength() {
        assert!(password_is_strong("abc123"));
        assert!(!password_is_strong("abc12"));
        assert!(!password_is_strong("abcdef"));
        assert!(!password_is_strong("123456"));
    }

    #[test]
    fn email_shape() {
        assert!(email_looks_valid("a@b.co"));
        assert!(!email_looks_valid("a@b"));
        assert!(!email_looks_valid("@b.co"));
        assert!(!email_looks_valid("a@"));
        assert!(!email_looks_valid("a b@c.co"));
        assert!(!email_looks_valid("plain"));
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..32 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter42").unwrap();
        assert!(verify_password("hunter42", &hash));
        assert!(!verify_password("hunter43", &hash));
    }

    #[tokio::test]
    async fn signup_flow_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (state, mailer) = test_state(&dir).await;

        send_signup_otp(
            State(state.clone()),
            Json(SendSignupOtpRequest {
                name: "Frida".into(),
                email: "Frida@Example.com".into(),
                password: "abc123".into(),
            }),
        )
        .await
        .unwrap();

        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        let (to, otp, purpose) = sent.into_iter().next().unwrap();
        assert_eq!(to, "frida@example.com");
        assert_eq!(purpose, OtpPurpose::Signup);

        // A wrong code is rejected and does not consume the signup.
        let wrong = verify_signup_otp(
            State(state.clone()),
            Json(VerifySignupOtpRequest {
                email: "frida@example.com".into(),
                otp: "000000".into(),
            }),
        )
        .await;
        assert!(matches!(wrong, Err(ApiError::BadRequest(_))));

        let ok = verify_signup_otp(
            State(state.clone()),
            Json(VerifySignupOtpRequest {
                email: "frida@example.com".into(),
                otp,
            }),
        )
        .await
        .unwrap();
        assert!(ok.0.success);
        assert_eq!(ok.0.user.email, "frida@example.com");

        // The token decodes against the configured secret.
        let claims = decode::<Claims>(
            &ok.0.token,
            &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .unwrap()
        .claims;
        assert_eq!(claims.sub, ok.0.user.id.to_string());

        // The pending signup is consumed.
        let again = verify_signup_otp(
            State(state.clone()),
            Json(VerifySignupOtpRequest {
                email: "frida@example.com".into(),
                otp: "123456".into(),
            }),
        )
        .await;
        assert!(again.is_err());

        // And login now works.
        let login_result = login(
            State(state),
            Json(LoginRequest {
                email: "frida@example.com".into(),
                password: "abc123".into(),
            }),
        )
        .await
        .unwrap();
        assert!(login_result.0.get("token").is_some());
    }

    #[tokio::test]
    async fn login_rejects_bad_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _mailer) = test_state(&dir).await;

        let result = login(
            State(state),
            Json(LoginRequest {
                email: "ghost@example.com".into(),
                password: "abc123".into(),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn forgot_and_reset_password() {
        let dir = tempfile::tempdir().unwrap();
        let (state, mailer) = test_state(&dir).await;

        {
            let db = state.db.lock().await;
            db.create_user("gus", "gus@example.com", &hash_password("old123").unwrap())
                .unwrap();
        }

        forgot_password(
            State(state.clone()),
            Json(ForgotRequest {
                email: "gus@example.com".into(),
            }),
        )
        .await
        .unwrap();

        let otp = mailer.sent.lock().unwrap()[0].1.clone();

        reset_password(
            State(state.clone()),
            Json(ResetPasswordRequest {
                email: "gus@example.com".into(),
                otp,
                new_password: "new456".into(),
            }),
        )
        .await
        .unwrap();

        let result = login(
            State(state),
            Json(LoginRequest {
                email: "gus@example.com".into(),
                password: "new456".into(),
            }),
        )
        .await
        .unwrap();
        assert!(result.0.get("token").is_some());
    }

    #[tokio::test]
    async fn forgot_does_not_reveal_unknown_emails() {
        let dir = tempfile::tempdir().unwrap();
        let (state, mailer) = test_state(&dir).await;

        let result = forgot_password(
            State(state),
            Json(ForgotRequest {
                email: "nobody@example.com".into(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(result.0.get("success"), Some(&serde_json::json!(true)));
        assert!(mailer.sent.lock().unwrap().is_empty());
    }
}
