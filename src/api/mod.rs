//! HTTP surface: the `/configMap` REST API, its error type and bearer token auth

pub mod auth;
pub mod error;
pub mod router;

pub use auth::{Authenticator, OidcValidator, Principal, TokenValidator};
pub use error::{ApiError, ApiResult};
pub use router::{AppState, router};
