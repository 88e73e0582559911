//! # JSON-RPC 2.0 envelopes
//!
//! An [`Envelope`] is immutable once built. Requests carry an id and expect a
//! correlated [`JsonRpcResponse`]; notifications carry no id. A response whose
//! request could not be identified (for example a parse failure) carries a
//! `null` id.
//!
//! Decoding classifies the message by the members present rather than by
//! trial deserialization, so every rejection names what was wrong.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::error::{CodecError, CodecResult};

/// JSON-RPC version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Numeric error codes carried in `error.code`.
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Generic transport rejection: authentication, missing session, bad verb
    pub const SERVER_ERROR: i32 = -32000;
    /// The session id does not name a live session
    pub const SESSION_NOT_FOUND: i32 = -32001;
    /// A tool method arrived before `initialize`
    pub const NOT_INITIALIZED: i32 = -32002;
    /// The binding carrying the exchange has closed
    pub const BINDING_CLOSED: i32 = -32003;
    /// The server gave up waiting for a reply
    pub const REQUEST_TIMEOUT: i32 = -32004;
}

/// Request identifier used for correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id
    Number(i64),
    /// String id
    String(String),
}

impl RequestId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create a new JSON-RPC error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a new JSON-RPC error with additional data
    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create a method not found error (-32601)
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )
    }

    /// Create an invalid params error (-32602)
    pub fn invalid_params(details: &str) -> Self {
        Self::new(
            error_codes::INVALID_PARAMS,
            format!("Invalid params: {details}"),
        )
    }

    /// Create an internal error (-32603)
    pub fn internal_error(details: &str) -> Self {
        Self::new(
            error_codes::INTERNAL_ERROR,
            format!("Internal error: {details}"),
        )
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// JSON-RPC request message
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcRequest {
    /// Request identifier
    pub id: RequestId,
    /// Request method name
    pub method: String,
    /// Request parameters
    pub params: Option<Value>,
}

/// JSON-RPC notification message (no response expected)
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcNotification {
    /// Notification method name
    pub method: String,
    /// Notification parameters
    pub params: Option<Value>,
}

/// Either a result or an error, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// Successful response with result
    Success(Value),
    /// Error response
    Error(JsonRpcError),
}

/// JSON-RPC response message
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    /// Id of the request being answered; `None` when it could not be determined
    pub id: Option<RequestId>,
    /// Result or error
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    /// The error object, if this is an error response.
    pub fn error(&self) -> Option<&JsonRpcError> {
        match &self.payload {
            ResponsePayload::Error(error) => Some(error),
            ResponsePayload::Success(_) => None,
        }
    }

    /// Convert into the result value, surfacing a peer error as `Err`.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.payload {
            ResponsePayload::Success(value) => Ok(value),
            ResponsePayload::Error(error) => Err(error),
        }
    }
}

/// Discriminant of an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Carries an id and a method
    Request,
    /// Carries a method and no id
    Notification,
    /// Carries a result or an error
    Response,
}

/// One protocol message unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Request expecting a correlated response
    Request(JsonRpcRequest),
    /// Fire-and-forget message
    Notification(JsonRpcNotification),
    /// Reply to an earlier request
    Response(JsonRpcResponse),
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(JsonRpcRequest {
            id,
            method: method.into(),
            params,
        })
    }

    /// Build a notification envelope.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(JsonRpcNotification {
            method: method.into(),
            params,
        })
    }

    /// Build a success response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self::Response(JsonRpcResponse {
            id: Some(id),
            payload: ResponsePayload::Success(result),
        })
    }

    /// Build an error response. `id` is `None` when the request could not be identified.
    pub fn error(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self::Response(JsonRpcResponse {
            id,
            payload: ResponsePayload::Error(error),
        })
    }

    /// Which kind of envelope this is.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Request(_) => EnvelopeKind::Request,
            Self::Notification(_) => EnvelopeKind::Notification,
            Self::Response(_) => EnvelopeKind::Response,
        }
    }

    /// Correlation id, if any.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Notification(_) => None,
            Self::Response(r) => r.id.as_ref(),
        }
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    /// Decode one envelope from JSON bytes.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Decode one envelope from a JSON string.
    pub fn decode_str(text: &str) -> CodecResult<Self> {
        Self::decode(text.as_bytes())
    }

    /// Classify an already parsed JSON value.
    pub fn from_value(value: Value) -> CodecResult<Self> {
        let Value::Object(mut object) = value else {
            return Err(CodecError::invalid("envelope must be a JSON object", None));
        };

        // Recover the id first so later rejections can still be correlated.
        let raw_id = object.remove("id");
        let id = match &raw_id {
            None | Some(Value::Null) => None,
            Some(value) => match RequestId::from_value(value) {
                Some(id) => Some(id),
                None => {
                    return Err(CodecError::invalid(
                        "id must be an integer or a string",
                        None,
                    ));
                }
            },
        };

        match object.remove("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(other) => {
                return Err(CodecError::invalid(
                    format!("Invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got {other}"),
                    id,
                ));
            }
            None => return Err(CodecError::invalid("missing jsonrpc member", id)),
        }

        let method = match object.remove("method") {
            None => None,
            Some(Value::String(m)) => Some(m),
            Some(_) => return Err(CodecError::invalid("method must be a string", id)),
        };
        let params = object.remove("params");
        let result = object.remove("result");
        let error = object.remove("error");

        match (method, result, error) {
            (Some(method), None, None) => {
                if let Some(params) = &params {
                    if !(params.is_object() || params.is_array() || params.is_null()) {
                        return Err(CodecError::invalid(
                            "params must be an object or an array",
                            id,
                        ));
                    }
                }
                match (raw_id, id) {
                    (None, _) => Ok(Self::notification(method, params)),
                    (Some(_), Some(id)) => Ok(Self::request(id, method, params)),
                    (Some(_), None) => Err(CodecError::invalid("request id must not be null", None)),
                }
            }
            (None, Some(result), None) => {
                if params.is_some() {
                    return Err(CodecError::invalid("response must not carry params", id));
                }
                match id {
                    Some(id) => Ok(Self::success(id, result)),
                    None => Err(CodecError::invalid("success response requires an id", None)),
                }
            }
            (None, None, Some(error)) => {
                if params.is_some() {
                    return Err(CodecError::invalid("response must not carry params", id));
                }
                let error: JsonRpcError = serde_json::from_value(error).map_err(|e| {
                    CodecError::invalid(format!("malformed error object: {e}"), id.clone())
                })?;
                if raw_id.is_none() {
                    return Err(CodecError::invalid("error response requires an id member", None));
                }
                Ok(Self::error(id, error))
            }
            (None, Some(_), Some(_)) => Err(CodecError::invalid(
                "response must carry either result or error, not both",
                id,
            )),
            (Some(_), _, _) => Err(CodecError::invalid(
                "message must not carry both method and result/error",
                id,
            )),
            (None, None, None) => Err(CodecError::invalid(
                "message carries neither method nor result/error",
                id,
            )),
        }
    }

    /// Render as a JSON value.
    pub fn to_value(&self) -> Value {
        let mut object = serde_json::Map::new();
        object.insert("jsonrpc".into(), Value::String(JSONRPC_VERSION.into()));
        match self {
            Self::Request(r) => {
                object.insert("id".into(), r.id.to_value());
                object.insert("method".into(), Value::String(r.method.clone()));
                if let Some(params) = &r.params {
                    object.insert("params".into(), params.clone());
                }
            }
            Self::Notification(n) => {
                object.insert("method".into(), Value::String(n.method.clone()));
                if let Some(params) = &n.params {
                    object.insert("params".into(), params.clone());
                }
            }
            Self::Response(r) => {
                object.insert(
                    "id".into(),
                    r.id.as_ref().map_or(Value::Null, RequestId::to_value),
                );
                match &r.payload {
                    ResponsePayload::Success(result) => {
                        object.insert("result".into(), result.clone());
                    }
                    ResponsePayload::Error(error) => {
                        let error = serde_json::to_value(error).unwrap_or_else(|_| {
                            serde_json::json!({ "code": error.code, "message": error.message })
                        });
                        object.insert("error".into(), error);
                    }
                }
            }
        }
        Value::Object(object)
    }

    /// Encode as compact JSON bytes.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(&self.to_value()).map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// Encode as a compact JSON string.
    pub fn encode_string(&self) -> CodecResult<String> {
        serde_json::to_string(&self.to_value())
            .map_err(|e| CodecError::Serialization(e.to_string()))
    }
}

impl Serialize for Envelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}
