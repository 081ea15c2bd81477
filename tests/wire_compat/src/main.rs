fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use repoferry_coordinator::{CheckpointStore, CoordinatorConfig};
    use repoferry_protocol::{Checkpoint, CloneResult, CloneStage, Progress, ProgressEvent};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Normalizes numbers so that `65` and `65.0` compare as equal.
    ///
    /// Fixtures written by hand or by other tools may drop the fractional
    /// part of whole floats; `f64` fields always serialize with it.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture, re-serializes it, and compares the JSON values
    /// (order-independent, float-normalized).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    #[test]
    fn fixture_checkpoint() {
        let cp: Checkpoint = roundtrip_test("checkpoint.json");
        assert_eq!(cp.downloaded_bytes, 5 * 1024 * 1024);
        assert_eq!(cp.percentage(), 25.0);
    }

    #[test]
    fn fixture_progress_event() {
        let event: ProgressEvent = roundtrip_test("progress_event.json");
        assert_eq!(event.progress.stage, CloneStage::Receiving);
        assert_eq!(event.progress.objects_received, 1200);
    }

    #[test]
    fn fixture_progress_without_message() {
        let progress: Progress = roundtrip_test("progress_checking_out.json");
        assert_eq!(progress.stage, CloneStage::CheckingOut);
        assert!(progress.message.is_empty());
    }

    #[test]
    fn fixture_progress_error() {
        let progress: Progress = roundtrip_test("progress_error.json");
        assert!(progress.stage.is_terminal());
        assert_eq!(progress.message, "operation cancelled");
    }

    #[test]
    fn fixture_clone_result() {
        let result: CloneResult = roundtrip_test("clone_result.json");
        assert_eq!(result.duration.as_millis(), 48_211);
        assert!(result.error.is_none());
    }

    #[test]
    fn fixture_coordinator_config() {
        let config: CoordinatorConfig = roundtrip_test("coordinator_config.json");
        assert_eq!(config.retry.max_delay_ms, 30_000);
    }

    /// The file the store writes must match the published checkpoint format.
    #[test]
    fn store_writes_fixture_format() {
        let fixture = load_fixture("checkpoint.json");
        let cp: Checkpoint = serde_json::from_value(fixture.clone()).unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path());
        store.save(&cp).unwrap();

        let path = store.path_for(&cp.operation_id);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "clone_1760600000000_3f9a1c2e.json"
        );
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, fixture);
    }
}
