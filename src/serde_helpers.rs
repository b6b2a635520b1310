//! Payload decoding for typed event handlers.
//!
//! With the `tracing` feature enabled, unknown payload fields are reported as
//! warnings and decode failures are logged with the path of the offending
//! field, which makes server-side schema drift visible.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decode a payload into `T`, logging unknown fields.
///
/// Unknown fields are tolerated; they are reported but do not fail decoding.
#[cfg(feature = "tracing")]
pub(crate) fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    let original = value.clone();
    let mut unknown_paths: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        unknown_paths.push(path.to_string());
    })
    .inspect_err(|_| {
        // Decode again to learn where it failed
        if let Err(path_err) = serde_path_to_error::deserialize::<_, T>(original.clone()) {
            tracing::error!(
                type_name = %type_name::<T>(),
                path = %path_err.path(),
                error = %path_err.inner(),
                "payload decoding failed"
            );
        }
    })?;

    for path in unknown_paths {
        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            "unknown field in event payload"
        );
    }

    Ok(result)
}

/// Pass-through decoding when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub(crate) fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::deserialize_with_warnings;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Presence {
        user: String,
        #[serde(default)]
        online: Option<bool>,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Room {
        name: String,
        members: Vec<Presence>,
    }

    #[test]
    fn decodes_known_fields() {
        let presence: Presence =
            deserialize_with_warnings(json!({ "user": "ada", "online": true })).unwrap();

        assert_eq!(
            presence,
            Presence {
                user: "ada".to_owned(),
                online: Some(true)
            }
        );
    }

    #[test]
    fn tolerates_unknown_fields() {
        let presence: Presence =
            deserialize_with_warnings(json!({ "user": "ada", "avatar": "a.png" })).unwrap();

        assert_eq!(presence.user, "ada");
        assert_eq!(presence.online, None);
    }

    #[test]
    fn nested_type_mismatch_fails() {
        let result: crate::Result<Room> = deserialize_with_warnings(json!({
            "name": "lobby",
            "members": [{ "user": "ada" }, { "user": 7 }]
        }));

        result.unwrap_err();
    }

    #[test]
    fn raw_value_passes_through() {
        let value: serde_json::Value = deserialize_with_warnings(json!([1, "two", null])).unwrap();

        assert_eq!(value, json!([1, "two", null]));
    }

    #[test]
    fn null_payload_decodes_into_unit_like_types() {
        let value: Option<Presence> = deserialize_with_warnings(serde_json::Value::Null).unwrap();

        assert!(value.is_none());
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn warning_is_emitted_for_unknown_fields() {
        use std::sync::{Arc, Mutex};

        use tracing_subscriber::layer::SubscriberExt as _;

        let warnings: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&warnings);

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(move || CaptureWriter(Arc::clone(&sink)))
            .with_ansi(false);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let _presence: Presence =
                deserialize_with_warnings(json!({ "user": "ada", "avatar": "a.png" })).unwrap();
        });

        let output = warnings.lock().unwrap().join("");
        assert!(output.contains("unknown field in event payload"), "{output}");
        assert!(output.contains("avatar"), "{output}");
    }

    #[cfg(feature = "tracing")]
    struct CaptureWriter(std::sync::Arc<std::sync::Mutex<Vec<String>>>);

    #[cfg(feature = "tracing")]
    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(buf).into_owned());
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
