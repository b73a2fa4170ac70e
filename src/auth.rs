//! Authentication: Google OAuth login, session tokens, and the bearer guard.
//!
//! # Flow
//!
//! 1. `GET /auth/google/login` redirects to Google with a signed `state`.
//! 2. Google redirects back to `/auth/google/callback?code=..&state=..`.
//! 3. The state signature and expiry are checked, the code is exchanged for
//!    an access token, and the user info is fetched.
//! 4. The user is upserted and an HS256 token is issued; the browser is
//!    redirected to `{FRONTEND_REDIRECT_URL}?token=..`.
//!
//! The `state` is `nonce.expiry.signature`, an HMAC-SHA256 over the first
//! two fields keyed with `SECRET_KEY`, so no server-side session is needed.

use anyhow::{anyhow, bail, Result};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeaderRejection,
    TypedHeader,
};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::{AuthConfig, Config, Secrets};
use crate::error::{unauthorized, AppError};
use crate::models::User;
use crate::server::AppState;

type HmacSha256 = Hmac<Sha256>;

// ============ Session tokens ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies HS256 session tokens.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String> {
        self.issue_at(user, Utc::now())
    }

    fn issue_at(&self, user: &User, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            sub: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| anyhow!("Failed to sign token: {}", e))
    }

    /// Check signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation).map(|data| data.claims)
    }
}

// ============ OAuth state ============

fn state_mac(secret: &str, payload: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    mac
}

/// Create a signed, expiring `state` value.
pub fn sign_state(secret: &str, ttl_secs: i64, now: DateTime<Utc>) -> String {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let expires = now.timestamp() + ttl_secs;
    let payload = format!("{}.{}", nonce, expires);
    let signature = hex::encode(state_mac(secret, &payload).finalize().into_bytes());
    format!("{}.{}", payload, signature)
}

/// True when `state` was produced by [`sign_state`] with `secret` and has
/// not expired.
pub fn verify_state(secret: &str, state: &str, now: DateTime<Utc>) -> bool {
    let mut parts = state.splitn(3, '.');
    let (Some(nonce), Some(expires), Some(signature)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Ok(expires_at) = expires.parse::<i64>() else {
        return false;
    };
    let Ok(signature) = hex::decode(signature) else {
        return false;
    };

    let payload = format!("{}.{}", nonce, expires);
    state_mac(secret, &payload).verify_slice(&signature).is_ok() && now.timestamp() <= expires_at
}

// ============ Google OAuth client ============

/// Profile returned by the userinfo endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleUserInfo {
    pub sub: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct GoogleOAuth {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
}

impl GoogleOAuth {
    pub fn new(config: &Config, secrets: &Secrets) -> Result<Self> {
        let auth: &AuthConfig = &config.auth;
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            client_id: secrets.google_client_id.clone(),
            client_secret: secrets.google_client_secret.clone(),
            redirect_uri: config.oauth_redirect_uri(),
            auth_url: auth.google_auth_url.clone(),
            token_url: auth.google_token_url.clone(),
            userinfo_url: auth.google_userinfo_url.clone(),
        })
    }

    /// The consent-screen URL for a given `state`.
    pub fn authorize_url(&self, state: &str) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state),
            ],
        )?;
        Ok(url.to_string())
    }

    /// Exchange an authorization code for an access token.
    pub async fn exchange_code(&self, code: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("token endpoint returned {}: {}", status, body);
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<GoogleUserInfo> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("userinfo endpoint returned {}: {}", status, body);
        }

        Ok(response.json().await?)
    }
}

// ============ Bearer guard ============

/// Require a valid bearer token whose subject is a known user, and make
/// that [`User`] available to the handler as an `Extension`.
pub async fn require_user(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let TypedHeader(Authorization(bearer)) =
        bearer.map_err(|_| unauthorized("Missing bearer token"))?;

    let claims = state.tokens.verify(bearer.token()).map_err(|e| {
        tracing::debug!("rejected token: {}", e);
        unauthorized("Could not validate credentials")
    })?;

    let user = state
        .users
        .get_by_id(&claims.sub)
        .await?
        .ok_or_else(|| unauthorized("Could not validate credentials"))?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
