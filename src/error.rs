//! Error types and GraphQL-compliant error responses.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Message returned to clients whose query is not whitelisted.
pub const UNAUTHORIZED_QUERY: &str = "Unauthorized query";

/// Message returned when a body-less request carries neither query nor queryId.
pub const MISSING_QUERY: &str = "Must provide query string.";

/// Message returned when the host never parsed the request body.
pub const BODY_NOT_PARSED: &str = "The request body has not been parsed. \
     Install a body-parser middleware before the GraphQL whitelist middleware.";

/// Reasons a request can fail whitelist validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    /// Query id not present in the whitelist
    NotWhitelisted,
    /// GraphQL parse error
    ParseError,
    /// Neither query nor queryId supplied
    MissingQuery,
    /// Host did not parse the request body
    BodyNotParsed,
    /// Query text does not match the supplied query id
    QueryIdMismatch,
    /// Invalid request format
    InvalidRequest,
    /// Body encoding the adapter cannot parse
    UnsupportedContentType,
    /// Validation error hook returned an error
    HookFailed,
}

impl ViolationCode {
    /// Get the code as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotWhitelisted => "NOT_WHITELISTED",
            Self::ParseError => "PARSE_ERROR",
            Self::MissingQuery => "MISSING_QUERY",
            Self::BodyNotParsed => "BODY_NOT_PARSED",
            Self::QueryIdMismatch => "QUERY_ID_MISMATCH",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::UnsupportedContentType => "UNSUPPORTED_CONTENT_TYPE",
            Self::HookFailed => "HOOK_FAILED",
        }
    }
}

impl fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A whitelist violation detected for a request.
///
/// This is what the validation error hook receives. It is richer than the
/// response sent to the client, which never reveals why a query was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Violation code
    pub code: ViolationCode,
    /// Human-readable message
    pub message: String,
    /// Query id involved, when one was supplied or derived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
}

impl Violation {
    /// Create a new violation.
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            query_id: None,
        }
    }

    /// Attach the query id involved.
    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = Some(query_id.into());
        self
    }

    /// Create a not whitelisted violation.
    pub fn not_whitelisted(query_id: &str) -> Self {
        Self::new(
            ViolationCode::NotWhitelisted,
            format!("Query '{}' is not in the whitelist", query_id),
        )
        .with_query_id(query_id)
    }

    /// Create a parse error violation.
    pub fn parse_error(message: &str) -> Self {
        Self::new(ViolationCode::ParseError, message)
    }

    /// Create a missing query violation.
    pub fn missing_query() -> Self {
        Self::new(ViolationCode::MissingQuery, MISSING_QUERY)
    }

    /// Create a body not parsed violation.
    pub fn body_not_parsed() -> Self {
        Self::new(ViolationCode::BodyNotParsed, BODY_NOT_PARSED)
    }

    /// Create a violation for a query whose id differs from the one supplied.
    pub fn query_id_mismatch(supplied: &str, derived: &str) -> Self {
        Self::new(
            ViolationCode::QueryIdMismatch,
            format!(
                "Query text hashes to '{}' but queryId '{}' was supplied",
                derived, supplied
            ),
        )
        .with_query_id(supplied)
    }

    /// Create an unsupported content type violation.
    pub fn unsupported_content_type(message: &str) -> Self {
        Self::new(ViolationCode::UnsupportedContentType, message)
    }

    /// Create an invalid request violation.
    pub fn invalid_request(message: &str) -> Self {
        Self::new(ViolationCode::InvalidRequest, message)
    }

    /// Create a hook failure violation.
    pub fn hook_failed(message: &str) -> Self {
        Self::new(ViolationCode::HookFailed, message)
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Whitelist library errors.
#[derive(Debug, thiserror::Error)]
pub enum WhitelistError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A response that short-circuits the request instead of reaching execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    /// HTTP status code
    pub status: u16,
    /// GraphQL error envelope
    pub body: Value,
}

impl ErrorResponse {
    /// Create a response with a single error message.
    pub fn new(status: u16, message: &str) -> Self {
        Self {
            status,
            body: graphql_error_response(&[message]),
        }
    }

    /// 401 for queries outside the whitelist.
    pub fn unauthorized() -> Self {
        Self::new(401, UNAUTHORIZED_QUERY)
    }

    /// 400 for body-less requests without a query.
    pub fn missing_query() -> Self {
        Self::new(400, MISSING_QUERY)
    }

    /// 500 for hosts that did not parse the body.
    pub fn body_not_parsed() -> Self {
        Self::new(500, BODY_NOT_PARSED)
    }

    /// 500 for a failing validation error hook under the fail-closed policy.
    pub fn hook_failed() -> Self {
        Self::new(500, "Validation error hook failed")
    }

    /// 400 for bodies that could not be parsed.
    pub fn invalid_request(message: &str) -> Self {
        Self::new(400, message)
    }

    /// 415 for bodies in an encoding the adapter does not parse.
    pub fn unsupported_content_type(message: &str) -> Self {
        Self::new(415, message)
    }

    /// 413 for bodies over the configured limit.
    pub fn payload_too_large() -> Self {
        Self::new(413, "Request body too large")
    }

    /// First error message in the body.
    pub fn message(&self) -> Option<&str> {
        self.body["errors"][0]["message"].as_str()
    }
}

/// Build a GraphQL-compliant error response.
///
/// Returns a JSON value in the standard GraphQL error format. Only messages
/// are included; violation details stay server-side.
pub fn graphql_error_response(messages: &[&str]) -> Value {
    json!({
        "errors": messages
            .iter()
            .map(|message| json!({ "message": message }))
            .collect::<Vec<_>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_code_display() {
        assert_eq!(ViolationCode::NotWhitelisted.to_string(), "NOT_WHITELISTED");
        assert_eq!(ViolationCode::BodyNotParsed.to_string(), "BODY_NOT_PARSED");
    }

    #[test]
    fn test_violation_code_serializes_screaming_snake_case() {
        let value = serde_json::to_value(ViolationCode::ParseError).unwrap();
        assert_eq!(value, "PARSE_ERROR");
    }

    #[test]
    fn test_not_whitelisted_violation() {
        let violation = Violation::not_whitelisted("abc=");
        assert_eq!(violation.code, ViolationCode::NotWhitelisted);
        assert!(violation.message.contains("abc="));
        assert_eq!(violation.query_id.as_deref(), Some("abc="));
    }

    #[test]
    fn test_unauthorized_response() {
        let response = ErrorResponse::unauthorized();
        assert_eq!(response.status, 401);
        assert_eq!(
            response.body,
            json!({ "errors": [{ "message": "Unauthorized query" }] })
        );
    }

    #[test]
    fn test_missing_query_response() {
        let response = ErrorResponse::missing_query();
        assert_eq!(response.status, 400);
        assert_eq!(
            response.body,
            json!({ "errors": [{ "message": "Must provide query string." }] })
        );
    }

    #[test]
    fn test_body_not_parsed_response() {
        let response = ErrorResponse::body_not_parsed();
        assert_eq!(response.status, 500);
        assert!(response.message().unwrap().contains("body-parser middleware"));
    }

    #[test]
    fn test_query_id_mismatch_violation() {
        let violation = Violation::query_id_mismatch("supplied=", "derived=");
        assert_eq!(violation.code, ViolationCode::QueryIdMismatch);
        assert_eq!(violation.query_id.as_deref(), Some("supplied="));
        assert!(violation.message.contains("derived="));
    }

    #[test]
    fn test_multiple_messages() {
        let response = graphql_error_response(&["first", "second"]);

        let errors = response["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0]["message"], "first");
        assert_eq!(errors[1]["message"], "second");
    }
}
