//! Principal extractor for Axum handlers.
//!
//! The authenticated owner arrives in the `x-owner-id` header, set by
//! whatever sits in front of this service. Every owner-scoped handler takes a
//! [`Principal`] so an unauthenticated request never reaches an adapter.

use crate::api::handlers::{AppError, ApiState};
use crate::owner::OwnerId;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

pub const OWNER_HEADER: &str = "x-owner-id";

#[derive(Debug, Clone)]
pub struct Principal(pub OwnerId);

impl Principal {
    fn from_parts(parts: &Parts) -> Result<Self, AppError> {
        let raw = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {OWNER_HEADER} header")))?
            .to_str()
            .map_err(|_| AppError::Unauthorized(format!("Invalid {OWNER_HEADER} header")))?;

        OwnerId::new(raw)
            .map(Self)
            .map_err(|_| AppError::Unauthorized(format!("Blank {OWNER_HEADER} header")))
    }
}

impl FromRequestParts<ApiState> for Principal {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &ApiState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let principal = Self::from_parts(parts);
        async move { principal }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/contacts");
        if let Some(value) = header {
            builder = builder.header(OWNER_HEADER, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_principal_from_header() {
        let principal = Principal::from_parts(&parts_with(Some(" user-1 "))).unwrap();
        assert_eq!(principal.0.as_str(), "user-1");
    }

    #[test]
    fn test_missing_header_is_unauthorized() {
        let err = Principal::from_parts(&parts_with(None)).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_blank_header_is_unauthorized() {
        let err = Principal::from_parts(&parts_with(Some("   "))).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
