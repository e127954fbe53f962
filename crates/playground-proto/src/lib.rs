//! Shared protocol definitions for the playground: cross-context discovery
//! messages, per-instance request/answer frames, and the backend data model.
//! Kept free of runtime code so bindings for other consumers can be generated
//! from these types alone.

mod discovery;
mod model;

pub use discovery::*;
pub use model::*;

use serde::{Deserialize, Serialize};

/// Body of every backend reply: exactly one of `result` / `error` is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEnvelope<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> RpcEnvelope<T> {
    pub fn into_result(self) -> Result<Option<T>, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_error_wins_over_result() {
        let envelope: RpcEnvelope<String> =
            serde_json::from_str(r#"{"result":"x","error":"denied"}"#).unwrap();
        assert_eq!(envelope.into_result(), Err("denied".to_string()));
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct NoDefault {
        id: String,
    }

    #[test]
    fn envelope_decodes_result_without_default_impl() {
        let envelope: RpcEnvelope<NoDefault> =
            serde_json::from_str(r#"{"result":{"id":"alice"}}"#).unwrap();
        assert_eq!(
            envelope.into_result(),
            Ok(Some(NoDefault { id: "alice".into() }))
        );

        let empty: RpcEnvelope<NoDefault> = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.into_result(), Ok(None));
    }

    #[test]
    fn empty_envelope_is_absent_result() {
        let envelope: RpcEnvelope<Session> = serde_json::from_str("{}").unwrap();
        assert_eq!(envelope.into_result(), Ok(None));
    }
}
