//! Portal service models

pub mod user;

// Re-export for convenience
pub use user::{ArchivedUser, ArchivedUserResponse, NewUser, User, UserResponse};
