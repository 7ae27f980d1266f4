//! Thin HTTP surface over `docflow-core`: `submit` (upload), `search`,
//! `ask`, and `health`. Registration/login/OIDC, the conversation manager,
//! and provider-specific chat handlers live in a separate identity service
//! and are not this binary's concern.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod state;

pub use error::ApiError;
pub use state::AppState;
