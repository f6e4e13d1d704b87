//! Membership portal service
//!
//! Registration with an admin approval workflow, JWT session auth,
//! and membership-number issuance for the member portal.

pub mod error;
pub mod jwt;
pub mod membership;
pub mod middleware;
pub mod models;
pub mod rate_limiter;
pub mod repositories;
pub mod routes;
pub mod state;
pub mod validation;

pub use state::AppState;
