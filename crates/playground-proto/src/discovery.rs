use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Shared topic every discoverer and responder listens on.
pub const TOPIC_DISCOVERY: &str = "playground.discovery";

/// Dedicated topic carrying requests and answers for one instance.
pub fn instance_topic(uuid: &str) -> String {
    format!("playground.instance.{uuid}")
}

/// Messages exchanged on [`TOPIC_DISCOVERY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiscoveryMessage {
    /// Asks every online instance to announce itself.
    Discovery,
    InstanceAnnounced {
        uuid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    InstanceLeft {
        uuid: String,
    },
}

impl DiscoveryMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    #[serde(rename = "list-actions")]
    List,
    #[serde(rename = "action")]
    Exec,
}

/// Request sent to an instance. `uuid` is the correlation id echoed back by
/// the matching [`InstanceAnswer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRequest {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub uuid: String,
}

impl InstanceRequest {
    pub fn new(kind: RequestKind, name: Option<String>, data: Option<Value>) -> Self {
        Self {
            kind,
            name,
            data,
            uuid: Uuid::new_v4().to_string(),
        }
    }

    pub fn list_actions() -> Self {
        Self::new(RequestKind::List, None, None)
    }

    pub fn action(name: impl Into<String>, data: Value) -> Self {
        Self::new(RequestKind::Exec, Some(name.into()), Some(data))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerKind {
    #[serde(rename = "extension-answer")]
    Ok,
    #[serde(rename = "extension-answer-error")]
    Error,
    #[serde(rename = "extension-answer-offline")]
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceAnswer {
    #[serde(rename = "type")]
    pub kind: AnswerKind,
    pub uuid: String,
    #[serde(default)]
    pub data: Value,
}

impl InstanceAnswer {
    pub fn ok(request: &InstanceRequest, data: Value) -> Self {
        Self {
            kind: AnswerKind::Ok,
            uuid: request.uuid.clone(),
            data,
        }
    }

    pub fn error(request: &InstanceRequest, data: Value) -> Self {
        Self {
            kind: AnswerKind::Error,
            uuid: request.uuid.clone(),
            data,
        }
    }

    pub fn offline(request: &InstanceRequest) -> Self {
        Self {
            kind: AnswerKind::Offline,
            uuid: request.uuid.clone(),
            data: Value::Null,
        }
    }
}

/// Either direction of traffic on an instance topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstanceFrame {
    Request(InstanceRequest),
    Answer(InstanceAnswer),
}

impl InstanceFrame {
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
