//! Inbound envelope decoding: JSON first, BSON as fallback.
//!
//! The `notification` field reaches us in several shapes depending on the
//! sender: a nested object, a JSON string, a base64 string (Go `[]byte`
//! marshalled through JSON) or BSON binary. All of them end up as a JSON value.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bson::{Bson, Document};
use serde_json::Value as Json;
use tether_core::{AgentError, AgentResult};

/// Destination tag of the platform's posture scanner.
pub const DEST_KUBESCAPE: &str = "kubescape";
pub const DEST_SAFE_MODE: &str = "safeMode";

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// `target.dest`; empty when absent.
    pub dest: String,
    /// Decoded notification body.
    pub notification: Json,
}

fn decode_err(msg: impl Into<String>) -> AgentError { AgentError::Decode(msg.into()) }

/// Decode one transport payload.
pub fn decode(payload: &[u8]) -> AgentResult<Envelope> {
    match serde_json::from_slice::<Json>(payload) {
        Ok(v) => from_json(v),
        Err(json_err) => match bson::from_slice::<Document>(payload) {
            Ok(doc) => from_bson(doc),
            Err(bson_err) => Err(decode_err(format!("neither JSON ({}) nor BSON ({})", json_err, bson_err))),
        },
    }
}

fn from_json(v: Json) -> AgentResult<Envelope> {
    let Json::Object(mut obj) = v else { return Err(decode_err("envelope is not an object")) };
    let dest = obj.get("target").and_then(|t| t.get("dest")).and_then(Json::as_str).unwrap_or_default().to_string();
    let raw = obj.remove("notification").ok_or_else(|| decode_err("envelope has no notification"))?;
    Ok(Envelope { dest, notification: notification_body(raw)? })
}

fn from_bson(doc: Document) -> AgentResult<Envelope> {
    let dest = doc.get_document("target").ok().and_then(|t| t.get_str("dest").ok()).unwrap_or_default().to_string();
    let notification = match doc.get("notification") {
        None | Some(Bson::Null) => return Err(decode_err("envelope has no notification")),
        Some(Bson::Binary(bin)) => bytes_body(&bin.bytes)?,
        Some(Bson::String(s)) => string_body(s)?,
        Some(other) => other.clone().into_relaxed_extjson(),
    };
    Ok(Envelope { dest, notification })
}

fn notification_body(raw: Json) -> AgentResult<Json> {
    match raw {
        Json::String(s) => string_body(&s),
        Json::Null => Err(decode_err("notification is null")),
        other => Ok(other),
    }
}

fn bytes_body(bytes: &[u8]) -> AgentResult<Json> {
    serde_json::from_slice(bytes).map_err(|e| decode_err(format!("notification bytes are not JSON: {}", e)))
}

/// A string body is either JSON text or base64 of JSON text.
fn string_body(s: &str) -> AgentResult<Json> {
    if let Ok(v) = serde_json::from_str::<Json>(s) {
        if v.is_object() {
            return Ok(v);
        }
    }
    let bytes = STANDARD.decode(s.trim()).map_err(|e| decode_err(format!("notification string is neither JSON nor base64: {}", e)))?;
    bytes_body(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use bson::spec::BinarySubtype;
    use serde_json::json;

    #[test]
    fn nested_object_passes_through() {
        let raw = json!({"target": {"dest": "kubescape"}, "notification": {"notificationType": "scan"}}).to_string();
        let env = decode(raw.as_bytes()).unwrap();
        assert_eq!(env.dest, "kubescape");
        assert_eq!(env.notification["notificationType"], "scan");
    }

    #[test]
    fn base64_body_is_unwrapped() {
        let inner = json!({"podName": "p"}).to_string();
        let raw = json!({"target": {"dest": "safeMode"}, "notification": STANDARD.encode(inner)}).to_string();
        let env = decode(raw.as_bytes()).unwrap();
        assert_eq!(env.notification["podName"], "p");
    }

    #[test]
    fn json_string_body_is_parsed() {
        let raw = json!({"notification": "{\"podName\":\"q\"}"}).to_string();
        let env = decode(raw.as_bytes()).unwrap();
        assert_eq!(env.dest, "");
        assert_eq!(env.notification["podName"], "q");
    }

    #[test]
    fn bson_binary_body() {
        let inner = json!({"notificationType": "scan", "jobID": "j"}).to_string().into_bytes();
        let d = doc! {
            "target": {"dest": "kubescape"},
            "notification": Bson::Binary(bson::Binary { subtype: BinarySubtype::Generic, bytes: inner }),
        };
        let env = decode(&bson::to_vec(&d).unwrap()).unwrap();
        assert_eq!(env.dest, "kubescape");
        assert_eq!(env.notification["jobID"], "j");
    }

    #[test]
    fn bson_document_body() {
        let d = doc! {"target": {"dest": "safeMode"}, "notification": {"podName": "p", "instanceID": ""}};
        let env = decode(&bson::to_vec(&d).unwrap()).unwrap();
        assert_eq!(env.notification["podName"], "p");
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(decode(b"\x00\x01not anything"), Err(AgentError::Decode(_))));
        assert!(matches!(decode(b"[1,2,3]"), Err(AgentError::Decode(_))));
        assert!(matches!(decode(br#"{"target":{"dest":"kubescape"}}"#), Err(AgentError::Decode(_))));
        assert!(matches!(decode(br#"{"notification":"%%%"}"#), Err(AgentError::Decode(_))));
    }
}
