//! GraphQL query normalization and request body parsing.

use crate::error::{Violation, WhitelistError};
use crate::request::RequestParams;
use graphql_parser::query::{parse_query, Definition, Document, OperationDefinition};
use serde_json::{Map, Value};

/// A query reduced to its canonical printed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    /// Canonical text; equal for queries that differ only in formatting
    pub canonical: String,
    /// Name of the first operation definition, if it has one
    pub operation_name: Option<String>,
}

/// Parse a GraphQL query and print it back in canonical form.
///
/// Formatting, comments and insignificant commas do not survive the round
/// trip, so two documents that only differ in layout normalize to the same
/// text. Printing a canonical text again yields it unchanged.
pub fn normalize(query: &str) -> Result<NormalizedQuery, WhitelistError> {
    let document =
        parse_query::<&str>(query).map_err(|e| WhitelistError::Parse(e.to_string()))?;

    Ok(NormalizedQuery {
        operation_name: operation_name(&document),
        canonical: document.to_string(),
    })
}

fn operation_name<'a>(document: &Document<'a, &'a str>) -> Option<String> {
    document
        .definitions
        .iter()
        .find_map(|definition| match definition {
            Definition::Operation(operation) => Some(match operation {
                OperationDefinition::Query(query) => query.name,
                OperationDefinition::Mutation(mutation) => mutation.name,
                OperationDefinition::Subscription(subscription) => subscription.name,
                OperationDefinition::SelectionSet(_) => None,
            }),
            Definition::Fragment(_) => None,
        })
        .flatten()
        .map(|name| name.to_string())
}

/// How the request body was encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyFormat {
    /// No body bytes at all
    Empty,
    /// JSON object; all members are kept so they can be forwarded
    Json(Map<String, Value>),
    /// `application/graphql`: the whole body is the query text
    GraphQL,
}

/// A request body turned into structured parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBody {
    pub params: RequestParams,
    pub format: BodyFormat,
}

/// Parse a raw request body according to its content type.
pub fn parse_request_body(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<ParsedBody, Violation> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ParsedBody {
            params: RequestParams::default(),
            format: BodyFormat::Empty,
        });
    }

    let mime = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase());

    match mime.as_deref() {
        Some("application/graphql") => parse_graphql_body(body),
        // Clients that omit the header are assumed to send JSON
        None | Some("application/json") => parse_json_body(body),
        Some(other) if other.ends_with("+json") => parse_json_body(body),
        Some(other) => Err(Violation::unsupported_content_type(&format!(
            "Unsupported content type '{}': send application/json or application/graphql",
            other
        ))),
    }
}

fn parse_graphql_body(body: &[u8]) -> Result<ParsedBody, Violation> {
    let query = std::str::from_utf8(body)
        .map_err(|_| Violation::invalid_request("Request body is not valid UTF-8"))?;
    Ok(ParsedBody {
        params: RequestParams {
            query: Some(query.to_string()),
            ..RequestParams::default()
        },
        format: BodyFormat::GraphQL,
    })
}

fn parse_json_body(body: &[u8]) -> Result<ParsedBody, Violation> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Violation::invalid_request(&format!("Invalid request body: {}", e)))?;

    let Value::Object(fields) = value else {
        return Err(Violation::invalid_request(
            "Invalid request body: expected a JSON object",
        ));
    };

    let params = RequestParams::from_fields(&fields);
    Ok(ParsedBody {
        params,
        format: BodyFormat::Json(fields),
    })
}
