//! Application state shared across handlers

use sqlx::PgPool;

use crate::{
    jwt::JwtService, membership::MembershipSequence, middleware::CookieConfig,
    rate_limiter::RateLimiter, repositories::UserRepository,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub jwt_service: JwtService,
    pub cookie_config: CookieConfig,
    pub user_repository: UserRepository,
    pub membership: MembershipSequence,
    pub rate_limiter: RateLimiter,
}
