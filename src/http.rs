//! axum adapter for the whitelist middleware.
//!
//! Buffers and parses the request body, builds a [`GraphQLRequest`], asks
//! [`QueryWhitelist`] for a verdict and applies it: allowed requests continue
//! with a [`QueryAnnotation`] extension and the canonical query in their body
//! and query string. Everything else is answered with the verdict's GraphQL
//! error response.

use crate::config::SettingsConfig;
use crate::error::{ErrorResponse, ViolationCode};
use crate::parser::{parse_request_body, BodyFormat, ParsedBody};
use crate::request::{GraphQLRequest, RequestBody, RequestParams};
use crate::whitelist::{QueryAnnotation, QueryWhitelist};
use axum::body::{to_bytes, Body};
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use http_body_util::LengthLimitError;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body)).into_response()
    }
}

/// Shared state of the whitelist middleware.
#[derive(Clone)]
pub struct WhitelistState {
    whitelist: Arc<QueryWhitelist>,
    parse_body: bool,
    max_body_size: usize,
}

impl WhitelistState {
    pub fn new(whitelist: Arc<QueryWhitelist>) -> Self {
        Self::from_settings(whitelist, &SettingsConfig::default())
    }

    pub fn from_settings(whitelist: Arc<QueryWhitelist>, settings: &SettingsConfig) -> Self {
        Self {
            whitelist,
            parse_body: settings.parse_body,
            max_body_size: settings.max_body_size,
        }
    }

    /// Leave bodies untouched, as a host without a body parser would.
    pub fn without_body_parsing(mut self) -> Self {
        self.parse_body = false;
        self
    }

    pub fn max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }
}

/// Put the whitelist in front of every route of `router`.
pub fn protect<S>(router: Router<S>, state: WhitelistState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(from_fn_with_state(state, enforce_whitelist))
}

/// Middleware function; use with [`axum::middleware::from_fn_with_state`].
pub async fn enforce_whitelist(
    State(state): State<WhitelistState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let params = match Query::<RequestParams>::try_from_uri(&parts.uri) {
        Ok(Query(params)) => params.without_empty(),
        Err(e) => {
            warn!(uri = %parts.uri, error = %e, "Invalid query string");
            return ErrorResponse::invalid_request("Invalid query string").into_response();
        }
    };

    let (request_body, parsed, body) = if state.parse_body {
        let bytes = match to_bytes(body, state.max_body_size).await {
            Ok(bytes) => bytes,
            Err(e) => return body_read_error(e, state.max_body_size).into_response(),
        };

        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());

        match parse_request_body(content_type, &bytes) {
            Ok(parsed) => (
                RequestBody::Parsed(parsed.params.clone()),
                Some(parsed),
                Body::from(bytes),
            ),
            Err(violation) => {
                debug!(code = %violation.code, message = %violation.message, "Rejecting request body");
                let response = match violation.code {
                    ViolationCode::UnsupportedContentType => {
                        ErrorResponse::unsupported_content_type(&violation.message)
                    }
                    _ => ErrorResponse::invalid_request(&violation.message),
                };
                return response.into_response();
            }
        }
    } else {
        (RequestBody::NotParsed, None, body)
    };

    let graphql_request = GraphQLRequest {
        method: parts.method.clone(),
        body: request_body,
        params,
    };

    let verdict = state.whitelist.evaluate(&graphql_request).await;
    if !verdict.is_allowed() {
        return verdict
            .response
            .unwrap_or_else(ErrorResponse::unauthorized)
            .into_response();
    }

    let mut body = body;
    if let Some(annotation) = verdict.annotation {
        if !graphql_request.params.is_empty() {
            match rewrite_uri(&parts.uri, &annotation) {
                Some(uri) => parts.uri = uri,
                None => {
                    return ErrorResponse::invalid_request("Invalid query string").into_response()
                }
            }
        }
        let rewritten = parsed.and_then(|parsed| {
            rewrite_body(parsed, &annotation, graphql_request.carries_body())
        });
        if let Some(rewritten) = rewritten {
            if rewritten.set_json_content_type {
                parts.headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
            }
            parts
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(rewritten.bytes.len()));
            body = Body::from(rewritten.bytes);
        }
        parts.extensions.insert(annotation);
    }

    next.run(Request::from_parts(parts, body)).await
}

/// Tell an oversized body apart from one that failed to arrive.
fn body_read_error(error: axum::Error, max_body_size: usize) -> ErrorResponse {
    let source = error.into_inner();
    if source.is::<LengthLimitError>() {
        warn!(max_body_size, "Request body over the size limit");
        ErrorResponse::payload_too_large()
    } else {
        warn!(error = %source, "Failed to read request body");
        ErrorResponse::invalid_request("Invalid request body")
    }
}

/// Put the canonical query and its id into the query string.
///
/// Other parameters keep their values. A client-supplied `operationName`
/// is kept, otherwise the derived one is added.
fn rewrite_uri(uri: &Uri, annotation: &QueryAnnotation) -> Option<Uri> {
    let mut pairs: Vec<(String, String)> =
        match serde_urlencoded::from_str(uri.query().unwrap_or_default()) {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!(uri = %uri, error = %e, "Failed to decode query string");
                return None;
            }
        };

    let has_operation_name = pairs
        .iter()
        .any(|(key, value)| key == "operationName" && !value.is_empty());
    pairs.retain(|(key, _)| {
        key != "query" && key != "queryId" && (has_operation_name || key != "operationName")
    });
    pairs.push(("query".to_string(), annotation.query.clone()));
    pairs.push(("queryId".to_string(), annotation.query_id.clone()));
    if !has_operation_name {
        if let Some(operation_name) = &annotation.operation_name {
            pairs.push(("operationName".to_string(), operation_name.clone()));
        }
    }

    let query = match serde_urlencoded::to_string(&pairs) {
        Ok(query) => query,
        Err(e) => {
            warn!(error = %e, "Failed to encode query string");
            return None;
        }
    };

    let mut uri_parts = uri.clone().into_parts();
    uri_parts.path_and_query = match format!("{}?{}", uri.path(), query).parse() {
        Ok(path_and_query) => Some(path_and_query),
        Err(e) => {
            warn!(error = %e, "Rewritten query string is not a valid URI");
            return None;
        }
    };
    Uri::from_parts(uri_parts).ok()
}

struct RewrittenBody {
    bytes: Vec<u8>,
    set_json_content_type: bool,
}

/// Replace the client's query with the canonical one.
///
/// JSON members other than `query` are kept; `queryId` and `operationName`
/// are filled in when the client did not send them.
fn rewrite_body(
    parsed: ParsedBody,
    annotation: &QueryAnnotation,
    carries_body: bool,
) -> Option<RewrittenBody> {
    let (fields, set_json_content_type) = match parsed.format {
        BodyFormat::GraphQL => {
            return Some(RewrittenBody {
                bytes: annotation.query.clone().into_bytes(),
                set_json_content_type: false,
            })
        }
        BodyFormat::Json(fields) => (fields, false),
        BodyFormat::Empty if carries_body => (Map::new(), true),
        BodyFormat::Empty => return None,
    };

    let mut fields = fields;
    fields.insert("query".to_string(), Value::String(annotation.query.clone()));
    fields
        .entry("queryId")
        .or_insert_with(|| Value::String(annotation.query_id.clone()));
    if let Some(operation_name) = &annotation.operation_name {
        fields
            .entry("operationName")
            .or_insert_with(|| Value::String(operation_name.clone()));
    }

    match serde_json::to_vec(&fields) {
        Ok(bytes) => Some(RewrittenBody {
            bytes,
            set_json_content_type,
        }),
        Err(e) => {
            warn!(error = %e, "Failed to serialize rewritten body");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn annotation() -> QueryAnnotation {
        QueryAnnotation {
            query_id: "id=".to_string(),
            operation_name: Some("ValidQuery".to_string()),
            query: "query ValidQuery {\n  firstName\n}\n".to_string(),
        }
    }

    #[test]
    fn test_rewrite_json_body_keeps_other_members() {
        let parsed = parse_request_body(
            Some("application/json"),
            br#"{"query": "query ValidQuery { firstName }", "variables": {"a": 1}}"#,
        )
        .unwrap();

        let rewritten = rewrite_body(parsed, &annotation(), true).unwrap();
        let value: Value = serde_json::from_slice(&rewritten.bytes).unwrap();

        assert_eq!(value["query"], "query ValidQuery {\n  firstName\n}\n");
        assert_eq!(value["queryId"], "id=");
        assert_eq!(value["operationName"], "ValidQuery");
        assert_eq!(value["variables"], json!({"a": 1}));
        assert!(!rewritten.set_json_content_type);
    }

    #[test]
    fn test_rewrite_keeps_client_operation_name() {
        let parsed = parse_request_body(
            Some("application/json"),
            br#"{"queryId": "id=", "operationName": "Chosen"}"#,
        )
        .unwrap();

        let rewritten = rewrite_body(parsed, &annotation(), true).unwrap();
        let value: Value = serde_json::from_slice(&rewritten.bytes).unwrap();

        assert_eq!(value["operationName"], "Chosen");
    }

    #[test]
    fn test_rewrite_empty_post_body() {
        let parsed = parse_request_body(None, b"").unwrap();

        let rewritten = rewrite_body(parsed, &annotation(), true).unwrap();
        assert!(rewritten.set_json_content_type);

        let parsed = parse_request_body(None, b"").unwrap();
        assert!(rewrite_body(parsed, &annotation(), false).is_none());
    }

    #[test]
    fn test_rewrite_graphql_body() {
        let parsed =
            parse_request_body(Some("application/graphql"), b"query ValidQuery{firstName}").unwrap();

        let rewritten = rewrite_body(parsed, &annotation(), true).unwrap();
        assert_eq!(rewritten.bytes, b"query ValidQuery {\n  firstName\n}\n".to_vec());
    }

    fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
        serde_urlencoded::from_str(uri.query().unwrap()).unwrap()
    }

    #[test]
    fn test_rewrite_uri_replaces_query() {
        let uri: Uri = "/graphql?query=%7B+secret+%7D&queryId=other&debug=1"
            .parse()
            .unwrap();

        let rewritten = rewrite_uri(&uri, &annotation()).unwrap();

        assert_eq!(rewritten.path(), "/graphql");
        assert_eq!(
            query_pairs(&rewritten),
            vec![
                ("debug".to_string(), "1".to_string()),
                ("query".to_string(), "query ValidQuery {\n  firstName\n}\n".to_string()),
                ("queryId".to_string(), "id=".to_string()),
                ("operationName".to_string(), "ValidQuery".to_string()),
            ]
        );
    }

    #[test]
    fn test_rewrite_uri_keeps_client_operation_name() {
        let uri: Uri = "/graphql?operationName=Chosen&queryId=id%3D".parse().unwrap();

        let rewritten = rewrite_uri(&uri, &annotation()).unwrap();
        let pairs = query_pairs(&rewritten);

        assert!(pairs.contains(&("operationName".to_string(), "Chosen".to_string())));
        assert!(!pairs.contains(&("operationName".to_string(), "ValidQuery".to_string())));
    }

    #[tokio::test]
    async fn test_body_over_limit_is_payload_too_large() {
        let error = to_bytes(Body::from("0123456789"), 4).await.unwrap_err();
        assert_eq!(body_read_error(error, 4).status, 413);
    }

    #[test]
    fn test_broken_body_is_bad_request() {
        let error = axum::Error::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ));

        let response = body_read_error(error, 1024);

        assert_eq!(response.status, 400);
        assert_eq!(response.message(), Some("Invalid request body"));
    }

    #[test]
    fn test_error_response_status() {
        let response = ErrorResponse::unauthorized().into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
