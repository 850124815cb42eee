//! Reducer library and state schema
//!
//! State is a JSON object mapping string keys to arbitrary values. Every
//! write to a key flows through that key's [`Reducer`], a pure function
//! `(existing, incoming) -> merged` that must not mutate its arguments.
//! Keys without a registered reducer fall back to [`OverwriteReducer`].
//!
//! Built-in reducers:
//!
//! | name | semantics |
//! |------|-----------|
//! | `overwrite` | incoming wins |
//! | `append_list` | list concatenation, existing before incoming |
//! | `merge_map` | shallow right-biased object merge |
//! | `max` / `min` | numeric comparison, nil-tolerant |
//! | `counter` | integer addition, nil counts as 0 |
//! | `union_set` | array-as-set union, first occurrence wins |
//! | `priority_map` | per-key: higher `.priority` wins, ties to incoming |
//! | `latest_by_timestamp` | per-key: later `.timestamp` wins |
//! | `strategy(...)` | factory over latest / earliest / merge / append |

use chrono::DateTime;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by reducers and schema application
#[derive(Debug, Error)]
pub enum StateError {
    /// State or update was not a JSON object where one was required
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A reducer received incompatible value types
    #[error("Reducer '{reducer}' failed on key '{key}': {message}")]
    ReducerFailed {
        reducer: String,
        key: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, StateError>;

/// A pure binary merge function for one state key.
///
/// Implementations must be side-effect-free and must not mutate their
/// arguments; the merged value is always a fresh `Value`.
pub trait Reducer: Send + Sync {
    /// Merge `incoming` into `existing`. `existing` is `Null` when the key
    /// has never been written.
    fn reduce(&self, existing: &Value, incoming: &Value) -> std::result::Result<Value, String>;

    /// Registry name of this reducer
    fn name(&self) -> &str;
}

/// Last write wins. The default for unregistered keys.
#[derive(Debug, Clone)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _existing: &Value, incoming: &Value) -> std::result::Result<Value, String> {
        Ok(incoming.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }
}

/// List concatenation, existing elements before incoming ones.
///
/// A nil side is treated as the empty list; a scalar incoming value is
/// appended as a single element.
#[derive(Debug, Clone)]
pub struct AppendListReducer;

impl Reducer for AppendListReducer {
    fn reduce(&self, existing: &Value, incoming: &Value) -> std::result::Result<Value, String> {
        let mut merged = match existing {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => return Err(format!("existing value is not a list: {}", other)),
        };

        match incoming {
            Value::Array(items) => merged.extend(items.iter().cloned()),
            Value::Null => {}
            single => merged.push(single.clone()),
        }

        Ok(Value::Array(merged))
    }

    fn name(&self) -> &str {
        "append_list"
    }
}

/// Shallow right-biased object merge. Nil sides are empty maps.
#[derive(Debug, Clone)]
pub struct MergeMapReducer;

impl Reducer for MergeMapReducer {
    fn reduce(&self, existing: &Value, incoming: &Value) -> std::result::Result<Value, String> {
        let mut merged = match existing {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => return Err(format!("existing value is not a map: {}", other)),
        };

        match incoming {
            Value::Object(map) => {
                for (key, value) in map {
                    merged.insert(key.clone(), value.clone());
                }
            }
            Value::Null => {}
            other => return Err(format!("incoming value is not a map: {}", other)),
        }

        Ok(Value::Object(merged))
    }

    fn name(&self) -> &str {
        "merge_map"
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Keeps the numerically larger value. A nil side yields the other side.
#[derive(Debug, Clone)]
pub struct MaxReducer;

impl Reducer for MaxReducer {
    fn reduce(&self, existing: &Value, incoming: &Value) -> std::result::Result<Value, String> {
        match (as_number(existing), as_number(incoming)) {
            (Some(a), Some(b)) => Ok(if b > a { incoming.clone() } else { existing.clone() }),
            (None, Some(_)) if existing.is_null() => Ok(incoming.clone()),
            (Some(_), None) if incoming.is_null() => Ok(existing.clone()),
            _ => Err("max requires numeric values".to_string()),
        }
    }

    fn name(&self) -> &str {
        "max"
    }
}

/// Keeps the numerically smaller value. A nil side yields the other side.
#[derive(Debug, Clone)]
pub struct MinReducer;

impl Reducer for MinReducer {
    fn reduce(&self, existing: &Value, incoming: &Value) -> std::result::Result<Value, String> {
        match (as_number(existing), as_number(incoming)) {
            (Some(a), Some(b)) => Ok(if b < a { incoming.clone() } else { existing.clone() }),
            (None, Some(_)) if existing.is_null() => Ok(incoming.clone()),
            (Some(_), None) if incoming.is_null() => Ok(existing.clone()),
            _ => Err("min requires numeric values".to_string()),
        }
    }

    fn name(&self) -> &str {
        "min"
    }
}

/// Integer addition. A nil side counts as 0.
#[derive(Debug, Clone)]
pub struct CounterReducer;

impl Reducer for CounterReducer {
    fn reduce(&self, existing: &Value, incoming: &Value) -> std::result::Result<Value, String> {
        let a = match existing {
            Value::Null => 0,
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| "counter requires integer values".to_string())?,
            other => return Err(format!("counter requires integer values, got {}", other)),
        };
        let b = match incoming {
            Value::Null => 0,
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| "counter requires integer values".to_string())?,
            other => return Err(format!("counter requires integer values, got {}", other)),
        };
        Ok(Value::Number((a + b).into()))
    }

    fn name(&self) -> &str {
        "counter"
    }
}

/// Set union over arrays. JSON has no set type, so sets are arrays with
/// duplicates removed by value equality; first occurrence order is kept.
#[derive(Debug, Clone)]
pub struct UnionSetReducer;

impl Reducer for UnionSetReducer {
    fn reduce(&self, existing: &Value, incoming: &Value) -> std::result::Result<Value, String> {
        let mut merged: Vec<Value> = Vec::new();

        for side in [existing, incoming] {
            match side {
                Value::Array(items) => {
                    for item in items {
                        if !merged.contains(item) {
                            merged.push(item.clone());
                        }
                    }
                }
                Value::Null => {}
                other => return Err(format!("union_set requires list values, got {}", other)),
            }
        }

        Ok(Value::Array(merged))
    }

    fn name(&self) -> &str {
        "union_set"
    }
}

fn priority_of(value: &Value) -> f64 {
    value
        .get("priority")
        .and_then(Value::as_f64)
        .unwrap_or(f64::MIN)
}

/// Per-key merge keeping the entry whose `.priority` field is higher.
/// Equal priorities break toward the incoming entry.
#[derive(Debug, Clone)]
pub struct PriorityMapReducer;

impl Reducer for PriorityMapReducer {
    fn reduce(&self, existing: &Value, incoming: &Value) -> std::result::Result<Value, String> {
        let mut merged = match existing {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => return Err(format!("priority_map requires map values, got {}", other)),
        };

        let incoming = match incoming {
            Value::Object(map) => map,
            Value::Null => return Ok(Value::Object(merged)),
            other => return Err(format!("priority_map requires map values, got {}", other)),
        };

        for (key, new_value) in incoming {
            match merged.get(key) {
                Some(old_value) if priority_of(old_value) > priority_of(new_value) => {}
                _ => {
                    merged.insert(key.clone(), new_value.clone());
                }
            }
        }

        Ok(Value::Object(merged))
    }

    fn name(&self) -> &str {
        "priority_map"
    }
}

/// Parse a `.timestamp` field as ISO-8601 text or an epoch number.
/// Unparsable or absent timestamps sort earliest.
fn timestamp_of(value: &Value) -> f64 {
    match value.get("timestamp") {
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.timestamp_millis() as f64)
            .unwrap_or(f64::MIN),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::MIN),
        _ => f64::MIN,
    }
}

/// Per-key merge keeping the entry whose `.timestamp` field is later.
/// Equal timestamps break toward the incoming entry.
#[derive(Debug, Clone)]
pub struct LatestByTimestampReducer;

impl Reducer for LatestByTimestampReducer {
    fn reduce(&self, existing: &Value, incoming: &Value) -> std::result::Result<Value, String> {
        let mut merged = match existing {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(format!(
                    "latest_by_timestamp requires map values, got {}",
                    other
                ))
            }
        };

        let incoming = match incoming {
            Value::Object(map) => map,
            Value::Null => return Ok(Value::Object(merged)),
            other => {
                return Err(format!(
                    "latest_by_timestamp requires map values, got {}",
                    other
                ))
            }
        };

        for (key, new_value) in incoming {
            match merged.get(key) {
                Some(old_value) if timestamp_of(old_value) > timestamp_of(new_value) => {}
                _ => {
                    merged.insert(key.clone(), new_value.clone());
                }
            }
        }

        Ok(Value::Object(merged))
    }

    fn name(&self) -> &str {
        "latest_by_timestamp"
    }
}

/// Merge strategy selected at registration time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Incoming wins
    Latest,
    /// Existing wins once set
    Earliest,
    /// Shallow map merge
    Merge,
    /// List concatenation
    Append,
}

/// Factory reducer dispatching to one of the built-ins by strategy
#[derive(Debug, Clone)]
pub struct StrategyReducer {
    strategy: MergeStrategy,
}

impl StrategyReducer {
    pub fn new(strategy: MergeStrategy) -> Self {
        Self { strategy }
    }
}

impl Reducer for StrategyReducer {
    fn reduce(&self, existing: &Value, incoming: &Value) -> std::result::Result<Value, String> {
        match self.strategy {
            MergeStrategy::Latest => OverwriteReducer.reduce(existing, incoming),
            MergeStrategy::Earliest => {
                if existing.is_null() {
                    Ok(incoming.clone())
                } else {
                    Ok(existing.clone())
                }
            }
            MergeStrategy::Merge => MergeMapReducer.reduce(existing, incoming),
            MergeStrategy::Append => AppendListReducer.reduce(existing, incoming),
        }
    }

    fn name(&self) -> &str {
        match self.strategy {
            MergeStrategy::Latest => "strategy_latest",
            MergeStrategy::Earliest => "strategy_earliest",
            MergeStrategy::Merge => "strategy_merge",
            MergeStrategy::Append => "strategy_append",
        }
    }
}

/// Per-key reducer registry with an `overwrite` default.
///
/// Reducers are stored behind `Arc` so a schema can be cloned into each
/// execution's state manager without re-registering.
#[derive(Default, Clone)]
pub struct StateSchema {
    fields: HashMap<String, std::sync::Arc<dyn Reducer>>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reducer for a key, replacing any previous registration
    pub fn register(&mut self, key: impl Into<String>, reducer: Box<dyn Reducer>) {
        self.fields.insert(key.into(), std::sync::Arc::from(reducer));
    }

    /// The reducer for `key`, or [`OverwriteReducer`] semantics if unregistered
    pub fn reducer_for(&self, key: &str) -> &dyn Reducer {
        static OVERWRITE: OverwriteReducer = OverwriteReducer;
        self.fields
            .get(key)
            .map(|r| r.as_ref())
            .unwrap_or(&OVERWRITE)
    }

    /// Whether `key` has an explicitly registered reducer
    pub fn has_reducer(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Registered field names
    pub fn fields(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Merge a single key's update into its existing value.
    ///
    /// Short-circuits to `Null` when both sides are nil so reducers never see
    /// a nil/nil pair.
    pub fn merge_key(&self, key: &str, existing: &Value, incoming: &Value) -> Result<Value> {
        if existing.is_null() && incoming.is_null() {
            return Ok(Value::Null);
        }

        let reducer = self.reducer_for(key);
        reducer
            .reduce(existing, incoming)
            .map_err(|message| StateError::ReducerFailed {
                reducer: reducer.name().to_string(),
                key: key.to_string(),
                message,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_overwrite() {
        let merged = OverwriteReducer.reduce(&json!("old"), &json!("new")).unwrap();
        assert_eq!(merged, json!("new"));
    }

    #[test]
    fn test_append_list_concatenates_in_order() {
        let merged = AppendListReducer
            .reduce(&json!([1, 2]), &json!([3, 4]))
            .unwrap();
        assert_eq!(merged, json!([1, 2, 3, 4]));
    }

    #[test]
    fn test_append_list_nil_and_scalar() {
        assert_eq!(
            AppendListReducer.reduce(&Value::Null, &json!([1])).unwrap(),
            json!([1])
        );
        assert_eq!(
            AppendListReducer.reduce(&json!([1]), &json!(2)).unwrap(),
            json!([1, 2])
        );
    }

    #[test]
    fn test_merge_map_right_biased() {
        let merged = MergeMapReducer
            .reduce(&json!({"a": 1, "b": 2}), &json!({"b": 3, "c": 4}))
            .unwrap();
        assert_eq!(merged, json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn test_max_min() {
        assert_eq!(MaxReducer.reduce(&json!(3), &json!(5)).unwrap(), json!(5));
        assert_eq!(MaxReducer.reduce(&json!(5), &json!(3)).unwrap(), json!(5));
        assert_eq!(MinReducer.reduce(&json!(3), &json!(5)).unwrap(), json!(3));
        assert_eq!(MaxReducer.reduce(&Value::Null, &json!(2)).unwrap(), json!(2));
    }

    #[test]
    fn test_counter_adds_with_nil_as_zero() {
        assert_eq!(
            CounterReducer.reduce(&json!(2), &json!(3)).unwrap(),
            json!(5)
        );
        assert_eq!(
            CounterReducer.reduce(&Value::Null, &json!(3)).unwrap(),
            json!(3)
        );
    }

    #[test]
    fn test_counter_rejects_floats() {
        assert!(CounterReducer.reduce(&json!(1.5), &json!(1)).is_err());
    }

    #[test]
    fn test_union_set_deduplicates() {
        let merged = UnionSetReducer
            .reduce(&json!(["a", "b"]), &json!(["b", "c"]))
            .unwrap();
        assert_eq!(merged, json!(["a", "b", "c"]));
    }

    #[test]
    fn test_priority_map_higher_wins_ties_to_incoming() {
        let existing = json!({"slot": {"priority": 5, "v": "old"}});

        let lower = json!({"slot": {"priority": 3, "v": "low"}});
        let merged = PriorityMapReducer.reduce(&existing, &lower).unwrap();
        assert_eq!(merged["slot"]["v"], "old");

        let tie = json!({"slot": {"priority": 5, "v": "tie"}});
        let merged = PriorityMapReducer.reduce(&existing, &tie).unwrap();
        assert_eq!(merged["slot"]["v"], "tie");
    }

    #[test]
    fn test_latest_by_timestamp_iso_and_epoch() {
        let existing = json!({"slot": {"timestamp": "2024-01-01T00:00:00Z", "v": "old"}});
        let newer = json!({"slot": {"timestamp": "2024-06-01T00:00:00Z", "v": "new"}});
        let merged = LatestByTimestampReducer.reduce(&existing, &newer).unwrap();
        assert_eq!(merged["slot"]["v"], "new");

        let numeric_old = json!({"slot": {"timestamp": 100, "v": "old"}});
        let numeric_older = json!({"slot": {"timestamp": 50, "v": "older"}});
        let merged = LatestByTimestampReducer
            .reduce(&numeric_old, &numeric_older)
            .unwrap();
        assert_eq!(merged["slot"]["v"], "old");
    }

    #[test]
    fn test_strategy_reducer_dispatch() {
        let earliest = StrategyReducer::new(MergeStrategy::Earliest);
        assert_eq!(
            earliest.reduce(&json!("first"), &json!("second")).unwrap(),
            json!("first")
        );
        assert_eq!(
            earliest.reduce(&Value::Null, &json!("second")).unwrap(),
            json!("second")
        );

        let append = StrategyReducer::new(MergeStrategy::Append);
        assert_eq!(
            append.reduce(&json!([1]), &json!([2])).unwrap(),
            json!([1, 2])
        );
    }

    #[test]
    fn test_schema_default_is_overwrite() {
        let schema = StateSchema::new();
        let merged = schema
            .merge_key("anything", &json!("a"), &json!("b"))
            .unwrap();
        assert_eq!(merged, json!("b"));
    }

    #[test]
    fn test_schema_nil_nil_short_circuit() {
        let mut schema = StateSchema::new();
        schema.register("n", Box::new(CounterReducer));
        let merged = schema.merge_key("n", &Value::Null, &Value::Null).unwrap();
        assert!(merged.is_null());
    }

    proptest! {
        // Reducers never mutate inputs: the same call twice yields the same value.
        #[test]
        fn prop_counter_deterministic(a in -1000i64..1000, b in -1000i64..1000) {
            let existing = json!(a);
            let incoming = json!(b);
            let first = CounterReducer.reduce(&existing, &incoming).unwrap();
            let second = CounterReducer.reduce(&existing, &incoming).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first, json!(a + b));
            prop_assert_eq!(existing, json!(a));
        }

        #[test]
        fn prop_append_preserves_lengths(xs in proptest::collection::vec(0i64..100, 0..8),
                                         ys in proptest::collection::vec(0i64..100, 0..8)) {
            let existing = json!(xs.clone());
            let incoming = json!(ys.clone());
            let merged = AppendListReducer.reduce(&existing, &incoming).unwrap();
            prop_assert_eq!(merged.as_array().unwrap().len(), xs.len() + ys.len());
        }
    }
}
