//! Bearer-token extractors

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use super::AppState;
use crate::error::LitukError;
use crate::storage::User;

/// Raw token from `Authorization: Bearer <token>`
pub struct BearerToken(pub String);

/// Any signed-in user
pub struct AuthUser(pub User);

/// A signed-in user with the admin role
pub struct AdminUser(pub User);

fn bearer(parts: &Parts) -> Result<String, LitukError> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| LitukError::unauthorized("missing Authorization header"))?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim().to_string())
        }
        _ => Err(LitukError::unauthorized("expected a Bearer token")),
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = LitukError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(BearerToken(bearer(parts)?))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = LitukError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)?;
        Ok(AuthUser(state.auth.authenticate(&token)?))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = LitukError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(LitukError::Forbidden {
                message: "admin role required".to_string(),
            });
        }
        Ok(AdminUser(user))
    }
}
