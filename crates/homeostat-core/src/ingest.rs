//! # Node State Ingestion
//!
//! Nodes report state as JSON. Parsing is deliberately lenient:
//! - Unknown fields are ignored.
//! - Both `snake_case` and `camelCase` keys are accepted.
//! - A missing timestamp uses the ingestion time.
//! - Non-numeric or out-of-range scores become the neutral score.
//! - Goals without a name are skipped.
//!
//! Only input with no usable node id (or no JSON object at all) is rejected.

use crate::invariant::sanitize_input;
use crate::primitives::{MAX_DIMENSIONS, MAX_GOALS, MAX_NAME_LENGTH};
use crate::types::{Goal, HomeostatError, NodeId, NodeState, Timestamp};
use serde_json::{Map, Value};

/// Strength assumed for goals that do not report one.
pub const DEFAULT_GOAL_STRENGTH: f64 = 0.7;

/// Parse one node state or an array of them from raw JSON bytes.
///
/// Array elements that cannot be interpreted are skipped with a warning;
/// the call fails only if the payload itself is not JSON.
pub fn parse_node_states(raw: &[u8], now: Timestamp) -> Result<Vec<NodeState>, HomeostatError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| HomeostatError::InputError(format!("node state is not JSON: {}", e)))?;

    match value {
        Value::Array(items) => {
            let mut states = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                match node_state_from_value(item, now) {
                    Ok(state) => states.push(state),
                    Err(e) => {
                        tracing::warn!(event = "node_state_skipped", index, error = %e, "Skipping node state");
                    }
                }
            }
            Ok(states)
        }
        other => node_state_from_value(&other, now).map(|s| vec![s]),
    }
}

/// Interpret one JSON value as a node state.
pub fn node_state_from_value(value: &Value, now: Timestamp) -> Result<NodeState, HomeostatError> {
    let obj = value
        .as_object()
        .ok_or_else(|| HomeostatError::InputError("node state must be an object".to_string()))?;

    let node_id = field(obj, &["node_id", "nodeId", "node"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= MAX_NAME_LENGTH)
        .ok_or_else(|| HomeostatError::InputError("node state has no usable node id".to_string()))?;

    let timestamp = match field(obj, &["timestamp", "ts"]) {
        Some(v) => v.as_u64().map(Timestamp).unwrap_or_else(|| {
            tracing::warn!(event = "input_defaulted", node = node_id, field = "timestamp", "Invalid timestamp; using ingestion time");
            now
        }),
        None => now,
    };

    let mut state = NodeState::new(NodeId::new(node_id), timestamp);

    if let Some(dims) = field(obj, &["dimension_scores", "dimensionScores", "dimensions"]) {
        match dims.as_object() {
            Some(dims) => {
                for (name, raw) in dims.iter().take(MAX_DIMENSIONS) {
                    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
                        continue;
                    }
                    let (score, substituted) = sanitize_input(raw.as_f64());
                    if substituted {
                        tracing::warn!(event = "input_defaulted", node = node_id, dimension = %name, "Invalid dimension score; using neutral");
                    }
                    state.dimension_scores.insert(name.clone(), score);
                }
                if dims.len() > MAX_DIMENSIONS {
                    tracing::warn!(event = "input_truncated", node = node_id, count = dims.len(), "Too many dimensions; extra entries ignored");
                }
            }
            None => {
                tracing::warn!(event = "input_defaulted", node = node_id, field = "dimension_scores", "Dimension scores are not an object; ignoring");
            }
        }
    }

    if let Some(goals) = field(obj, &["goals"]) {
        match goals.as_array() {
            Some(goals) => {
                for raw in goals.iter().take(MAX_GOALS) {
                    if let Some(goal) = goal_from_value(raw, node_id) {
                        state.goals.push(goal);
                    }
                }
            }
            None => {
                tracing::warn!(event = "input_defaulted", node = node_id, field = "goals", "Goals are not an array; ignoring");
            }
        }
    }

    Ok(state)
}

fn goal_from_value(value: &Value, node_id: &str) -> Option<Goal> {
    let obj = value.as_object()?;
    let name = field(obj, &["name", "id"])
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty() && s.len() <= MAX_NAME_LENGTH)?;

    let (priority, substituted) = sanitize_input(field(obj, &["priority"]).and_then(Value::as_f64));
    if substituted {
        tracing::warn!(event = "input_defaulted", node = node_id, goal = name, "Invalid goal priority; using neutral");
    }

    let strength = match field(obj, &["strength", "weight"]) {
        None => DEFAULT_GOAL_STRENGTH,
        Some(raw) => {
            let (strength, substituted) = sanitize_input(raw.as_f64());
            if substituted {
                tracing::warn!(event = "input_defaulted", node = node_id, goal = name, "Invalid goal strength; using neutral");
            }
            strength
        }
    };

    Some(Goal::new(name, priority, strength))
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| obj.get(*name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::NEUTRAL_SCORE;

    #[test]
    fn parses_well_formed_state() {
        let raw = br#"{
            "node_id": "individual",
            "timestamp": 1700,
            "dimension_scores": {"coherence": 0.8, "logical": 0.6},
            "goals": [{"name": "growth", "priority": 0.9, "strength": 0.8}]
        }"#;
        let states = parse_node_states(raw, Timestamp(5)).expect("parse");
        assert_eq!(states.len(), 1);

        let state = &states[0];
        assert_eq!(state.node_id, NodeId::new("individual"));
        assert_eq!(state.timestamp, Timestamp(1700));
        assert_eq!(state.dimension("coherence"), Some(0.8));
        assert_eq!(state.goals, vec![Goal::new("growth", 0.9, 0.8)]);
    }

    #[test]
    fn accepts_camel_case_and_ignores_unknown_fields() {
        let raw = br#"{"nodeId": "collective", "dimensionScores": {"emotional": 0.4}, "mood": "sunny"}"#;
        let states = parse_node_states(raw, Timestamp(99)).expect("parse");
        assert_eq!(states[0].node_id.as_str(), "collective");
        assert_eq!(states[0].timestamp, Timestamp(99));
        assert_eq!(states[0].dimension("emotional"), Some(0.4));
    }

    #[test]
    fn malformed_fields_degrade_to_neutral() {
        let raw = br#"{
            "node_id": "individual",
            "timestamp": "yesterday",
            "dimension_scores": {"coherence": "high", "logical": 7.5},
            "goals": [{"name": "growth", "priority": null}, {"priority": 0.3}, "junk"]
        }"#;
        let states = parse_node_states(raw, Timestamp(42)).expect("parse");
        let state = &states[0];

        assert_eq!(state.timestamp, Timestamp(42));
        assert_eq!(state.dimension("coherence"), Some(NEUTRAL_SCORE));
        assert_eq!(state.dimension("logical"), Some(NEUTRAL_SCORE));
        assert_eq!(state.goals.len(), 1);
        assert!((state.goals[0].priority - NEUTRAL_SCORE).abs() < f64::EPSILON);
        assert!((state.goals[0].strength - DEFAULT_GOAL_STRENGTH).abs() < f64::EPSILON);
    }

    #[test]
    fn array_skips_unusable_elements() {
        let raw = br#"[{"node_id": "a"}, {"dimension_scores": {}}, {"node_id": "b"}]"#;
        let states = parse_node_states(raw, Timestamp(0)).expect("parse");
        let ids: Vec<_> = states.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn missing_node_id_is_input_error() {
        let result = parse_node_states(br#"{"goals": []}"#, Timestamp(0));
        assert!(matches!(result, Err(HomeostatError::InputError(_))));
    }

    #[test]
    fn non_json_is_input_error() {
        let result = parse_node_states(b"not json", Timestamp(0));
        assert!(matches!(result, Err(HomeostatError::InputError(_))));
    }
}
