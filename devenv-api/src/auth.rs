use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use devenv_orchestrator::UserContext;

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub username: String,
    pub email: Option<String>,
}

impl AuthenticatedUser {
    pub fn context(&self) -> UserContext {
        UserContext {
            user_id: self.username.clone(),
            email: self.email.clone(),
        }
    }
}

/// Auth middleware: trusts the identity headers set by the fronting proxy.
///
/// `x-forwarded-user` is what oauth2-proxy sets; `x-user` is accepted for
/// local development without a proxy.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let username = req
        .headers()
        .get("x-forwarded-user")
        .or_else(|| req.headers().get("x-user"))
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    let email = req
        .headers()
        .get("x-forwarded-email")
        .or_else(|| req.headers().get("x-user-email"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    let username = username.ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut()
        .insert(AuthenticatedUser { username, email });

    Ok(next.run(req).await)
}
