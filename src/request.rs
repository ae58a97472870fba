//! Framework-independent view of an inbound GraphQL request.

use axum::http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Whitelist-relevant parameters, read from a body or a query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, rename = "queryId", skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, rename = "operationName", skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl RequestParams {
    /// Read the parameters out of a JSON object, ignoring members of the wrong type.
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        let text = |key: &str| {
            fields
                .get(key)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            query: text("query"),
            query_id: text("queryId"),
            operation_name: text("operationName"),
        }
    }

    /// Treat empty strings as absent.
    pub fn without_empty(self) -> Self {
        let keep = |value: Option<String>| value.filter(|value| !value.is_empty());
        Self {
            query: keep(self.query),
            query_id: keep(self.query_id),
            operation_name: keep(self.operation_name),
        }
    }

    /// True when neither a query nor a query id is present.
    pub fn is_empty(&self) -> bool {
        self.query.is_none() && self.query_id.is_none()
    }
}

/// State of the request body as delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// The host parsed the body into parameters (possibly empty)
    Parsed(RequestParams),
    /// The host never parsed the body
    NotParsed,
}

/// An inbound request, reduced to what the whitelist needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphQLRequest {
    pub method: Method,
    pub body: RequestBody,
    /// Query-string parameters
    pub params: RequestParams,
}

impl GraphQLRequest {
    /// A GET request with the given query-string parameters.
    pub fn get(params: RequestParams) -> Self {
        Self {
            method: Method::GET,
            body: RequestBody::Parsed(RequestParams::default()),
            params,
        }
    }

    /// A POST request with the given parsed body.
    pub fn post(body: RequestParams) -> Self {
        Self {
            method: Method::POST,
            body: RequestBody::Parsed(body),
            params: RequestParams::default(),
        }
    }

    /// Replace the query-string parameters.
    pub fn with_params(mut self, params: RequestParams) -> Self {
        self.params = params;
        self
    }

    /// Mark the body as never parsed by the host.
    pub fn without_parsed_body(mut self) -> Self {
        self.body = RequestBody::NotParsed;
        self
    }

    /// Whether the method carries a payload in its body.
    pub fn carries_body(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }

    /// Resolve query and query id from body and query string.
    ///
    /// Body members win for methods that carry a body, with the query string
    /// as fallback. Other methods only consult the query string.
    pub fn identifiers(&self) -> Option<RequestParams> {
        let RequestBody::Parsed(body) = &self.body else {
            return None;
        };

        if !self.carries_body() {
            return Some(self.params.clone());
        }

        Some(RequestParams {
            query: body.query.clone().or_else(|| self.params.query.clone()),
            query_id: body.query_id.clone().or_else(|| self.params.query_id.clone()),
            operation_name: body
                .operation_name
                .clone()
                .or_else(|| self.params.operation_name.clone()),
        })
    }
}
