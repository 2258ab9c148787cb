//! Request guards.

use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, FromRequest, HttpRequest};

use super::AppState;
use crate::auth::Claims;
use crate::error::AppError;

/// The logged-in user behind a request. Taking this as a handler argument is
/// what makes a route require a bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl AuthUser {
    pub fn username(&self) -> &str {
        &self.0.sub
    }
}

fn bearer_token(req: &HttpRequest) -> Result<&str, AppError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("missing Authorization header".into()))?
        .to_str()
        .map_err(|_| AppError::Unauthorized("malformed Authorization header".into()))?;
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized("expected a Bearer token".into()))
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = match req.app_data::<web::Data<AppState>>() {
            Some(state) => bearer_token(req).and_then(|token| state.auth.verify(token)).map(AuthUser),
            None => Err(AppError::Internal(anyhow::anyhow!("application state is not registered"))),
        };
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn bearer_token_is_extracted() {
        let req = TestRequest::default()
            .insert_header((AUTHORIZATION, "Bearer abc.def"))
            .to_http_request();
        assert_eq!(bearer_token(&req).unwrap(), "abc.def");
    }

    #[test]
    fn other_schemes_are_rejected() {
        let basic = TestRequest::default()
            .insert_header((AUTHORIZATION, "Basic dXNlcjpwYXNz"))
            .to_http_request();
        assert!(matches!(bearer_token(&basic), Err(AppError::Unauthorized(_))));

        let missing = TestRequest::default().to_http_request();
        assert!(matches!(bearer_token(&missing), Err(AppError::Unauthorized(_))));
    }
}
