/// Shared configuration types for embedding the engine.
use serde::{Deserialize, Serialize};

/// Identity of the local participant (shared format across frontends).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantIdentity {
    pub id: String,
    pub name: String,
}

fn default_persist_timeout_ms() -> u64 {
    5_000
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub participant: ParticipantIdentity,
    /// Deadline for a single durable-store write. A persist call that does
    /// not resolve within this window is rolled back as a transient failure.
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,
}

impl EngineConfig {
    pub fn new(participant: ParticipantIdentity) -> Self {
        Self {
            participant,
            persist_timeout_ms: default_persist_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_timeout_defaults_when_missing() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"participant":{"id":"u1","name":"Ada"}}"#).unwrap();
        assert_eq!(config.persist_timeout_ms, 5_000);
    }
}
