use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Key/value store shared by the tasks of one session.
///
/// Values are kept as JSON so any serde type can round-trip through it.
/// Clones share the same underlying map.
#[derive(Clone, Debug)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: impl serde::Serialize) {
        self.set_sync(key, value);
    }

    /// Store a value without awaiting. Values that fail to serialize are
    /// dropped with a warning.
    pub fn set_sync(&self, key: impl Into<String>, value: impl serde::Serialize) {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.data.insert(key, value);
            }
            Err(e) => warn!(key = %key, error = %e, "Failed to serialize context value"),
        }
    }

    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_sync(key)
    }

    pub fn get_sync<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_values() {
        let context = Context::new();
        let other = context.clone();

        context.set("report_text", "Hemoglobin 10.2 g/dL").await;

        let text: Option<String> = other.get("report_text").await;
        assert_eq!(text.as_deref(), Some("Hemoglobin 10.2 g/dL"));
        assert!(other.contains_key("report_text"));
    }

    #[tokio::test]
    async fn get_with_wrong_type_is_none() {
        let context = Context::new();
        context.set("count", "not a number").await;

        let count: Option<u32> = context.get("count").await;
        assert!(count.is_none());
    }

    #[tokio::test]
    async fn remove_returns_stored_value() {
        let context = Context::new();
        context.set("flag", true).await;

        assert_eq!(context.remove("flag").await, Some(Value::Bool(true)));
        assert!(!context.contains_key("flag"));
    }
}
