//! Request gating for protected and admin routes
//!
//! Two layers share the verification logic: `session_gate` protects
//! page paths with redirect semantics (stale sessions go back to the
//! login entry point, non-admins leave the admin area), while
//! `admin_api_gate` protects the JSON API with structured 401/403
//! responses.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::warn;

use crate::{error::PortalError, jwt::Claims, state::AppState};

/// Name of the session cookie carrying the access token
pub const SESSION_COOKIE: &str = "token";
/// Name of the cookie carrying the refresh token
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Cookie security configuration
#[derive(Debug, Clone)]
pub struct CookieConfig {
    /// Set the Secure attribute on auth cookies
    pub secure: bool,
}

impl CookieConfig {
    /// Create a new CookieConfig from environment variables
    ///
    /// # Environment Variables
    /// - `COOKIE_SECURE`: set the Secure attribute on auth cookies (default: false)
    pub fn from_env() -> Self {
        let secure = std::env::var("COOKIE_SECURE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        CookieConfig { secure }
    }
}

/// Role required to access a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredRole {
    /// Any valid session
    User,
    /// Administrator sessions only
    Admin,
}

/// Pure authorization check: admin resources require the administrator
/// flag, everything else only needs a valid session. Approval is a
/// point-in-time gate at login and is not re-checked here.
pub fn authorize(claims: &Claims, required: RequiredRole) -> bool {
    match required {
        RequiredRole::User => true,
        RequiredRole::Admin => claims.is_admin,
    }
}

/// Authenticated caller, attached to request extensions by the gates
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
    pub is_admin: bool,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        AuthUser {
            id: claims.sub,
            email: claims.email,
            is_admin: claims.is_admin,
        }
    }
}

/// Session gate for page paths.
///
/// Public, auth, and API paths pass through untouched. Everything else
/// requires a valid session cookie; failures redirect to the login
/// entry point carrying the originally requested path, and the stale
/// cookie is expired. Admin paths additionally require the
/// administrator flag, redirecting other sessions to the dashboard.
pub async fn session_gate(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();

    if is_public_path(&path) {
        return next.run(req).await;
    }

    let Some(token) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
        return login_redirect(&path, jar);
    };

    let claims = match state.jwt_service.verify_access_token(&token) {
        Ok(claims) => claims,
        Err(_) => {
            warn!("Rejecting stale session on {}", path);
            return login_redirect(&path, jar);
        }
    };

    if path.starts_with("/admin") && !authorize(&claims, RequiredRole::Admin) {
        return Redirect::to("/dashboard").into_response();
    }

    req.extensions_mut().insert(AuthUser::from(claims));
    next.run(req).await
}

/// Gate for admin API routes: bearer token or session cookie, must
/// verify and carry the administrator flag.
pub async fn admin_api_gate(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, PortalError> {
    let token =
        token_from_headers(req.headers(), &jar).ok_or(PortalError::InvalidOrExpiredToken)?;
    let claims = state.jwt_service.verify_access_token(&token)?;

    if !authorize(&claims, RequiredRole::Admin) {
        return Err(PortalError::Forbidden);
    }

    req.extensions_mut().insert(AuthUser::from(claims));
    Ok(next.run(req).await)
}

/// Pull the access token from the Authorization header or, failing
/// that, the session cookie
pub fn token_from_headers(headers: &HeaderMap, jar: &CookieJar) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    jar.get(SESSION_COOKIE).map(|c| c.value().to_string())
}

/// Paths that bypass the session gate: the landing page, the health
/// probe, auth entry points, and the JSON API (which carries its own
/// guards)
fn is_public_path(path: &str) -> bool {
    path == "/" || path == "/health" || path.starts_with("/auth") || path.starts_with("/api")
}

fn login_redirect(path: &str, jar: CookieJar) -> Response {
    let jar = jar.remove(removal_cookie(SESSION_COOKIE));
    let location = format!("/auth/login?redirect={path}");
    (jar, Redirect::to(&location)).into_response()
}

/// Removal cookie matching the attributes the auth cookies are set with
pub fn removal_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").build()
}

/// Build the HTTP-only session cookie carrying a fresh access token
pub fn session_cookie(config: &CookieConfig, token: String, max_age_seconds: u64) -> Cookie<'static> {
    auth_cookie(SESSION_COOKIE, token, config, max_age_seconds)
}

/// Build the HTTP-only cookie carrying a fresh refresh token
pub fn refresh_cookie(config: &CookieConfig, token: String, max_age_seconds: u64) -> Cookie<'static> {
    auth_cookie(REFRESH_COOKIE, token, config, max_age_seconds)
}

fn auth_cookie(
    name: &'static str,
    value: String,
    config: &CookieConfig,
    max_age_seconds: u64,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(config.secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(max_age_seconds as i64))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::TokenKind;
    use axum::http::HeaderValue;

    fn claims(is_admin: bool) -> Claims {
        Claims {
            sub: 7,
            email: "asha@example.org".to_string(),
            is_admin,
            iat: 0,
            exp: u64::MAX,
            kind: TokenKind::Access,
        }
    }

    #[test]
    fn admin_resources_require_the_admin_flag() {
        assert!(!authorize(&claims(false), RequiredRole::Admin));
        assert!(authorize(&claims(true), RequiredRole::Admin));
    }

    #[test]
    fn any_valid_session_reaches_user_resources() {
        assert!(authorize(&claims(false), RequiredRole::User));
        assert!(authorize(&claims(true), RequiredRole::User));
    }

    #[test]
    fn public_paths_bypass_the_gate() {
        assert!(is_public_path("/"));
        assert!(is_public_path("/health"));
        assert!(is_public_path("/auth/login"));
        assert!(is_public_path("/api/auth/login"));
        assert!(is_public_path("/api/admin/users"));
        assert!(!is_public_path("/dashboard"));
        assert!(!is_public_path("/admin"));
    }

    #[test]
    fn bearer_header_takes_precedence_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer header-token"),
        );
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, "cookie-token"));

        assert_eq!(
            token_from_headers(&headers, &jar).as_deref(),
            Some("header-token")
        );
    }

    #[test]
    fn empty_bearer_falls_back_to_the_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, "cookie-token"));

        assert_eq!(
            token_from_headers(&headers, &jar).as_deref(),
            Some("cookie-token")
        );
    }

    #[test]
    fn missing_token_is_none() {
        let headers = HeaderMap::new();
        let jar = CookieJar::new();
        assert!(token_from_headers(&headers, &jar).is_none());
    }

    #[test]
    fn auth_cookies_are_http_only_lax_and_scoped_to_root() {
        let config = CookieConfig { secure: true };
        let cookie = session_cookie(&config, "tok".to_string(), 3600);

        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(3600)));
    }
}
