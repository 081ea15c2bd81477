use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Terminal result of a clone operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneResult {
    pub success: bool,
    /// Local path the repository was cloned into.
    pub path: String,
    /// Wall time from registration to the terminal event.
    #[serde(rename = "durationMs", with = "duration_millis")]
    pub duration: Duration,
    pub total_bytes: u64,
    /// Failure text for serialized reports. Always `None` on results from
    /// `wait()`, where failures arrive as the error value instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `true` when the operation started from a stored checkpoint.
    pub resumed: bool,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
