//! Security module for pairgate.
//!
//! API keys are checked as bearer tokens on every route except `/health`.
//!
//! ## Example
//!
//! ```rust
//! use pairgate::security::{generate_api_key, ApiKeyStore};
//!
//! let auth = ApiKeyStore::default();
//! let key = generate_api_key();
//! auth.add_key(&key);
//! assert!(auth.is_valid(&key));
//! ```

pub mod auth;

pub use auth::{auth_middleware, generate_api_key, ApiKeyStore, AuthConfig};
