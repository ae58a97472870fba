//! Request-time whitelist decisions.
//!
//! [`QueryWhitelist::evaluate`] runs the whole protocol for one request and
//! returns a [`Verdict`]. It never touches the host's request or response
//! objects; adapters such as [`crate::http`] apply the verdict.

use crate::config::{HookFailurePolicy, SettingsConfig};
use crate::error::{ErrorResponse, Violation};
use crate::fingerprint::fingerprint;
use crate::parser::normalize;
use crate::request::{GraphQLRequest, RequestParams};
use crate::store::WhitelistStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Error type returned by validation error hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Predicate deciding whether a request bypasses whitelist checks.
pub type SkipValidationFn = Arc<dyn Fn(&GraphQLRequest) -> bool + Send + Sync>;

/// Hook notified once for every request that fails validation.
pub type ValidationErrorFn =
    Arc<dyn Fn(&GraphQLRequest, &Violation) -> Result<(), BoxError> + Send + Sync>;

/// Metadata derived for an allowed request, consumed by execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAnnotation {
    pub query_id: String,
    pub operation_name: Option<String>,
    /// Canonical query text; replaces the query the client sent
    pub query: String,
}

/// Final decision for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Hand the request to execution
    Allow,
    /// Refuse the request (client-side problem)
    Reject,
    /// Refuse the request (deployment problem)
    Error,
}

/// Result of evaluating one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub outcome: Outcome,
    /// Present when the canonical form could be derived
    pub annotation: Option<QueryAnnotation>,
    /// Response to send instead of executing; set unless allowed
    pub response: Option<ErrorResponse>,
    /// Validation failure, including ones let through by dry run
    pub violation: Option<Violation>,
}

impl Verdict {
    fn allow(annotation: Option<QueryAnnotation>) -> Self {
        Self {
            outcome: Outcome::Allow,
            annotation,
            response: None,
            violation: None,
        }
    }

    fn reject(response: ErrorResponse, violation: Violation) -> Self {
        Self {
            outcome: Outcome::Reject,
            annotation: None,
            response: Some(response),
            violation: Some(violation),
        }
    }

    fn error(response: ErrorResponse, violation: Violation) -> Self {
        Self {
            outcome: Outcome::Error,
            annotation: None,
            response: Some(response),
            violation: Some(violation),
        }
    }

    fn with_violation(mut self, violation: Violation) -> Self {
        self.violation = Some(violation);
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }
}

/// Snapshot of decision counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WhitelistStats {
    pub requests_total: u64,
    pub requests_allowed: u64,
    pub requests_rejected: u64,
    pub dry_run_allowed: u64,
    pub skipped: u64,
}

/// How the canonical form of a request was obtained.
enum Resolution {
    /// Found in the store by query id; already known to be whitelisted
    Stored(QueryAnnotation),
    /// Derived from the query text; membership still unknown
    Derived(QueryAnnotation),
    /// Nothing usable could be derived
    Failed(Violation),
}

/// Whitelisting middleware.
///
/// Accepts only queries whose canonical form is in the configured store.
pub struct QueryWhitelist {
    store: Arc<dyn WhitelistStore>,
    skip_validation_fn: Option<SkipValidationFn>,
    validation_error_fn: Option<ValidationErrorFn>,
    dry_run: bool,
    hook_failure: HookFailurePolicy,
    requests_total: AtomicU64,
    requests_allowed: AtomicU64,
    requests_rejected: AtomicU64,
    dry_run_allowed: AtomicU64,
    skipped: AtomicU64,
}

impl QueryWhitelist {
    /// Create a whitelist backed by `store` with no hooks and dry run off.
    pub fn new(store: Arc<dyn WhitelistStore>) -> Self {
        Self {
            store,
            skip_validation_fn: None,
            validation_error_fn: None,
            dry_run: false,
            hook_failure: HookFailurePolicy::default(),
            requests_total: AtomicU64::new(0),
            requests_allowed: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            dry_run_allowed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Apply dry run and hook failure policy from configuration.
    pub fn with_settings(self, settings: &SettingsConfig) -> Self {
        self.dry_run(settings.dry_run)
            .hook_failure(settings.hook_failure)
    }

    /// Bypass whitelist checks for requests matching `f`.
    pub fn skip_validation<F>(mut self, f: F) -> Self
    where
        F: Fn(&GraphQLRequest) -> bool + Send + Sync + 'static,
    {
        self.skip_validation_fn = Some(Arc::new(f));
        self
    }

    /// Notify `f` about every validation failure.
    pub fn on_validation_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&GraphQLRequest, &Violation) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.validation_error_fn = Some(Arc::new(f));
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn hook_failure(mut self, policy: HookFailurePolicy) -> Self {
        self.hook_failure = policy;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Current decision counters.
    pub fn stats(&self) -> WhitelistStats {
        WhitelistStats {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_allowed: self.requests_allowed.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            dry_run_allowed: self.dry_run_allowed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    /// Decide what happens to `request`.
    pub async fn evaluate(&self, request: &GraphQLRequest) -> Verdict {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let Some(identifiers) = request.identifiers() else {
            error!(
                method = %request.method,
                "Request body was not parsed before the whitelist middleware"
            );
            return self.rejected(Verdict::error(
                ErrorResponse::body_not_parsed(),
                Violation::body_not_parsed(),
            ));
        };

        if identifiers.is_empty() && !request.carries_body() {
            debug!(method = %request.method, "No query provided");
            return self.rejected(Verdict::reject(
                ErrorResponse::missing_query(),
                Violation::missing_query(),
            ));
        }

        let resolution = self.resolve(&identifiers).await;

        if let Some(skip) = &self.skip_validation_fn {
            if skip(request) {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                let annotation = match resolution {
                    Resolution::Stored(annotation) | Resolution::Derived(annotation) => {
                        Some(annotation)
                    }
                    Resolution::Failed(_) => None,
                };
                debug!(
                    query_id = ?annotation.as_ref().map(|a| a.query_id.as_str()),
                    "Whitelist validation skipped"
                );
                return self.allowed(Verdict::allow(annotation));
            }
        }

        match resolution {
            Resolution::Stored(annotation) => {
                debug!(query_id = %annotation.query_id, "Query resolved by id");
                self.allowed(Verdict::allow(Some(annotation)))
            }
            Resolution::Derived(annotation) => match self.store.get(&annotation.query_id).await {
                Ok(Some(_)) => {
                    debug!(query_id = %annotation.query_id, "Query is whitelisted");
                    self.allowed(Verdict::allow(Some(annotation)))
                }
                Ok(None) => {
                    let violation = Violation::not_whitelisted(&annotation.query_id);
                    self.fail(request, violation, Some(annotation))
                }
                Err(e) => {
                    warn!(query_id = %annotation.query_id, error = %e, "Whitelist lookup failed");
                    let violation = Violation::not_whitelisted(&annotation.query_id);
                    self.fail(request, violation, Some(annotation))
                }
            },
            Resolution::Failed(violation) => self.fail(request, violation, None),
        }
    }

    /// Derive the canonical form from a query id or from the query text.
    ///
    /// When both are supplied the query text must hash to the query id.
    async fn resolve(&self, identifiers: &RequestParams) -> Resolution {
        if let Some(query_id) = &identifiers.query_id {
            if let Some(query) = &identifiers.query {
                let derived = match normalize(query) {
                    Ok(normalized) => fingerprint(&normalized.canonical),
                    Err(e) => {
                        return Resolution::Failed(
                            Violation::parse_error(&e.to_string()).with_query_id(query_id),
                        )
                    }
                };
                if &derived != query_id {
                    return Resolution::Failed(Violation::query_id_mismatch(query_id, &derived));
                }
            }

            let stored = match self.store.get(query_id).await {
                Ok(Some(stored)) => stored,
                Ok(None) => return Resolution::Failed(Violation::not_whitelisted(query_id)),
                Err(e) => {
                    warn!(query_id = %query_id, error = %e, "Whitelist lookup failed");
                    return Resolution::Failed(Violation::not_whitelisted(query_id));
                }
            };

            return match normalize(&stored) {
                Ok(normalized) => Resolution::Stored(QueryAnnotation {
                    query_id: query_id.clone(),
                    operation_name: normalized.operation_name,
                    query: stored,
                }),
                Err(e) => {
                    warn!(query_id = %query_id, error = %e, "Stored query does not parse");
                    Resolution::Failed(
                        Violation::parse_error(&e.to_string()).with_query_id(query_id),
                    )
                }
            };
        }

        let Some(query) = &identifiers.query else {
            return Resolution::Failed(Violation::missing_query());
        };

        match normalize(query) {
            Ok(normalized) => Resolution::Derived(QueryAnnotation {
                query_id: fingerprint(&normalized.canonical),
                operation_name: normalized.operation_name,
                query: normalized.canonical,
            }),
            Err(e) => Resolution::Failed(Violation::parse_error(&e.to_string())),
        }
    }

    /// Report a validation failure and apply the dry run policy.
    fn fail(
        &self,
        request: &GraphQLRequest,
        violation: Violation,
        annotation: Option<QueryAnnotation>,
    ) -> Verdict {
        warn!(
            code = %violation.code,
            query_id = ?violation.query_id,
            dry_run = self.dry_run,
            "Query failed whitelist validation"
        );

        if let Some(hook) = &self.validation_error_fn {
            if let Err(e) = hook(request, &violation) {
                match self.hook_failure {
                    HookFailurePolicy::FailOpen => {
                        warn!(error = %e, "Validation error hook failed, continuing");
                    }
                    HookFailurePolicy::FailClosed => {
                        error!(error = %e, "Validation error hook failed, aborting request");
                        return self.rejected(Verdict::error(
                            ErrorResponse::hook_failed(),
                            Violation::hook_failed(&e.to_string()),
                        ));
                    }
                }
            }
        }

        if self.dry_run {
            info!(
                code = %violation.code,
                "Validation failed but allowing request (dry_run)"
            );
            self.dry_run_allowed.fetch_add(1, Ordering::Relaxed);
            return self.allowed(Verdict::allow(annotation).with_violation(violation));
        }

        self.rejected(Verdict::reject(ErrorResponse::unauthorized(), violation))
    }

    fn allowed(&self, verdict: Verdict) -> Verdict {
        self.requests_allowed.fetch_add(1, Ordering::Relaxed);
        verdict
    }

    fn rejected(&self, verdict: Verdict) -> Verdict {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
        verdict
    }
}
