use playground_proto::{Playground, RuntimeState, Session};

pub(crate) fn details() -> Playground {
    serde_json::from_value(serde_json::json!({
        "env": {"secured": false, "host": "playground.test", "namespace": "playground"},
        "configuration": {
            "githubClientId": "client",
            "session": {
                "duration": 60,
                "maxDuration": 240,
                "poolAffinity": "default",
                "maxSessionsPerPod": 4
            }
        }
    }))
    .expect("valid details fixture")
}

pub(crate) fn session(id: &str) -> Session {
    Session {
        id: id.to_string(),
        user_id: id.to_string(),
        template: Some("node".into()),
        state: RuntimeState::Pending,
        max_duration: 60,
    }
}

pub(crate) fn running(url: &str) -> RuntimeState {
    RuntimeState::Running {
        url: Some(url.to_string()),
        start_time: 1_700_000_000_000,
        runtime_configuration: Default::default(),
    }
}
