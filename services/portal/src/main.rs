use anyhow::Result;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use portal::{
    AppState,
    jwt::{JwtConfig, JwtService},
    membership::MembershipSequence,
    middleware::CookieConfig,
    rate_limiter::{RateLimiter, RateLimiterConfig},
    repositories::UserRepository,
    routes,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting membership portal service");

    // Initialize database connection pool
    let db_config = common::database::DatabaseConfig::from_env()?;
    let pool = common::database::init_pool(&db_config).await?;

    // Check database connectivity
    if common::database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied");

    // Initialize JWT service
    let jwt_config = JwtConfig::from_env()?;
    let jwt_service = JwtService::new(jwt_config);

    let cookie_config = CookieConfig::from_env();
    let user_repository = UserRepository::new(pool.clone());
    let membership = MembershipSequence::new(pool.clone());
    let rate_limiter = RateLimiter::new(RateLimiterConfig::default());

    let app_state = AppState {
        db_pool: pool,
        jwt_service,
        cookie_config,
        user_repository,
        membership,
        rate_limiter,
    };

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    info!("Membership portal listening on 0.0.0.0:3000");

    axum::serve(listener, app).await?;

    Ok(())
}
