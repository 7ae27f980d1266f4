//! Builds the [`AccessContext`] the access predicate consults. RBAC/ACL
//! evaluation and the login/session flow that resolves a caller's identity
//! live upstream of this binary — by the time a request reaches here, an
//! auth layer has already authenticated it and attached the resolved
//! identity as `X-User-Id`/`X-Superuser` headers.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};
use docflow_core::access::AccessContext;

pub struct Identity(pub AccessContext);

fn parse_identity(headers: &HeaderMap) -> Result<AccessContext, (StatusCode, &'static str)> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i32>().ok())
        .ok_or((StatusCode::UNAUTHORIZED, "missing or invalid X-User-Id header"))?;

    let is_superuser = headers
        .get("x-superuser")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    Ok(AccessContext { user_id, is_superuser })
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parse_identity(&parts.headers).map(Identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_user_id_is_rejected() {
        let headers = HeaderMap::new();
        assert!(parse_identity(&headers).is_err());
    }

    #[test]
    fn valid_user_id_defaults_to_non_superuser() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("42"));
        let ctx = parse_identity(&headers).unwrap();
        assert_eq!(ctx.user_id, 42);
        assert!(!ctx.is_superuser);
    }

    #[test]
    fn superuser_header_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("1"));
        headers.insert("x-superuser", HeaderValue::from_static("True"));
        let ctx = parse_identity(&headers).unwrap();
        assert!(ctx.is_superuser);
    }

    #[test]
    fn non_numeric_user_id_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("not-a-number"));
        assert!(parse_identity(&headers).is_err());
    }
}
