//! Frames exchanged with the gateway, one JSON object per line.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error code for invokes that arrive while nothing can answer them
pub const UNAVAILABLE: &str = "UNAVAILABLE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    Connect { params: ConnectParams },
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
    InvokeResult(InvokeResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    HelloOk {
        #[serde(default)]
        server: Option<Value>,
    },
    Error { code: String, message: String },
    Invoke(InvokeRequest),
}

/// Handshake payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub role: String,
    pub scopes: Vec<String>,
    pub caps: Vec<String>,
    pub commands: Vec<String>,
    pub permissions: BTreeMap<String, bool>,
    pub client_id: String,
    pub client_mode: String,
    pub client_display_name: String,
    pub auth: ConnectAuth,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<InvokeError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeError {
    pub code: String,
    pub message: String,
}

impl InvokeResponse {
    pub fn success(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(InvokeError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// Answer for an invoke that arrives after the handler went away
    pub fn unavailable(id: impl Into<String>) -> Self {
        Self::failure(id, UNAVAILABLE, "UNAVAILABLE: node not ready")
    }
}

/// Capabilities advertised in the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub caps: Vec<String>,
    pub commands: Vec<String>,
    pub permissions: BTreeMap<String, bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connect_frame_wire_shape() {
        let frame = ClientFrame::Connect {
            params: ConnectParams {
                role: "node".to_string(),
                scopes: vec![],
                caps: vec!["canvas".to_string()],
                commands: vec!["canvas.present".to_string()],
                permissions: BTreeMap::from([("screen".to_string(), true)]),
                client_id: "hearth-node".to_string(),
                client_mode: "node".to_string(),
                client_display_name: "Studio".to_string(),
                auth: ConnectAuth {
                    token: Some("secret".to_string()),
                    password: None,
                },
            },
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "connect");
        assert_eq!(value["params"]["clientId"], "hearth-node");
        assert_eq!(value["params"]["clientDisplayName"], "Studio");
        assert_eq!(value["params"]["permissions"]["screen"], true);
        assert_eq!(value["params"]["auth"], json!({"token": "secret"}));
    }

    #[test]
    fn test_parse_server_frames() {
        let hello: ServerFrame = serde_json::from_str(r#"{"type":"hello-ok"}"#).unwrap();
        assert_eq!(hello, ServerFrame::HelloOk { server: None });

        let invoke: ServerFrame =
            serde_json::from_str(r#"{"type":"invoke","id":"7","command":"system.which","params":{"bin":"git"}}"#)
                .unwrap();
        match invoke {
            ServerFrame::Invoke(request) => {
                assert_eq!(request.id, "7");
                assert_eq!(request.params["bin"], "git");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_unavailable_response() {
        let value = serde_json::to_value(ClientFrame::InvokeResult(InvokeResponse::unavailable("9"))).unwrap();
        assert_eq!(value["type"], "invoke-result");
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"]["code"], "UNAVAILABLE");
        assert_eq!(value["error"]["message"], "UNAVAILABLE: node not ready");
        assert!(value.get("payload").is_none());
    }
}
