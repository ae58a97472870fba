//! GraphQL query whitelisting.
//!
//! Accepts only GraphQL queries an operator has approved beforehand, sent
//! either as full text or as a short query id.
//!
//! # Features
//!
//! - Canonical normalization (formatting-independent comparison)
//! - SHA-256 query ids
//! - Pluggable async whitelist store (in-memory and YAML file)
//! - Skip predicate, validation error hook and dry-run mode
//! - axum middleware adapter
//!
//! # Example
//!
//! ```ignore
//! use graphql_query_whitelist::{protect, MemoryStore, QueryRepository, QueryWhitelist, WhitelistState};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let query_id = QueryRepository::new(store.clone())
//!     .put("query ValidQuery { firstName }")
//!     .await?;
//!
//! let whitelist = QueryWhitelist::new(store).dry_run(false);
//! let app = protect(graphql_routes, WhitelistState::new(Arc::new(whitelist)));
//! ```

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod parser;
pub mod repository;
pub mod request;
pub mod store;
pub mod whitelist;

pub use config::{HookFailurePolicy, WhitelistConfig};
pub use error::{ErrorResponse, Violation, ViolationCode, WhitelistError};
pub use fingerprint::fingerprint;
pub use http::{enforce_whitelist, protect, WhitelistState};
pub use parser::{normalize, NormalizedQuery};
pub use repository::QueryRepository;
pub use request::{GraphQLRequest, RequestBody, RequestParams};
pub use store::{FileStore, MemoryStore, WhitelistStore};
pub use whitelist::{Outcome, QueryAnnotation, QueryWhitelist, Verdict, WhitelistStats};
