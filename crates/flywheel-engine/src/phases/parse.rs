//! Untrusted-response parsing.
//!
//! Every adapter response is treated as hostile input: fields are coerced
//! into their enumerated domains, numbers are clamped, and a response that
//! is not JSON at all degrades to a sentinel rather than an error. Models
//! frequently wrap JSON in markdown fences, so extraction tries the raw
//! text, then a fenced block, then the first balanced object.

use serde_json::Value;

use flywheel_core::{
    AutonomyTier, Confidence, RecommendationPriority, TaskComplexity, TruthLabel, TruthStatus,
};

/// Best-effort extraction of a JSON value from model output.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    // ```json ... ``` fenced block
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(value) = serde_json::from_str::<Value>(after[..end].trim()) {
                return Some(value);
            }
        }
    }

    // First balanced top-level object.
    let bytes = trimmed.as_bytes();
    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &trimmed[start..=start + offset];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Clamp into `[0, 1]`; non-finite values collapse to 0.
pub fn clamp01(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// String field lookup, first match among `keys`.
pub fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(k).and_then(Value::as_str))
        .map(str::to_string)
}

/// Array-of-strings field; missing or malformed entries are dropped.
pub fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn coerce_confidence(value: Option<&Value>) -> Confidence {
    match value.and_then(Value::as_str) {
        Some("high") => Confidence::High,
        Some("medium") => Confidence::Medium,
        _ => Confidence::Low,
    }
}

/// Scan findings may only claim `speculative` or `hypothesis`.
pub fn coerce_scan_truth(value: &Value) -> TruthLabel {
    let status = match value.get("truth_status").and_then(Value::as_str) {
        Some("hypothesis") => TruthStatus::Hypothesis,
        _ => TruthStatus::Speculative,
    };
    TruthLabel::new(status, coerce_confidence(value.get("confidence")))
}

/// Full-domain truth coercion, defaulting to `(speculative, low)`.
pub fn coerce_truth(value: &Value) -> TruthLabel {
    let status = match value.get("truth_status").and_then(Value::as_str) {
        Some("verified") => TruthStatus::Verified,
        Some("hypothesis") => TruthStatus::Hypothesis,
        Some("implemented") => TruthStatus::Implemented,
        Some("failed") => TruthStatus::Failed,
        Some("archived") => TruthStatus::Archived,
        _ => TruthStatus::Speculative,
    };
    TruthLabel::new(status, coerce_confidence(value.get("confidence")))
}

pub fn coerce_complexity(value: Option<&Value>) -> TaskComplexity {
    match value.and_then(Value::as_str) {
        Some("trivial") => TaskComplexity::Trivial,
        Some("small") => TaskComplexity::Small,
        Some("large") => TaskComplexity::Large,
        _ => TaskComplexity::Medium,
    }
}

/// Tier from a JSON number or string (`0`/`"0"`/`"t0"`), defaulting to T0.
pub fn coerce_tier(value: Option<&Value>) -> AutonomyTier {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(AutonomyTier::from_index)
            .unwrap_or(AutonomyTier::T0),
        Some(Value::String(s)) => match s.trim_start_matches(['t', 'T']).parse::<u64>() {
            Ok(index) => AutonomyTier::from_index(index).unwrap_or(AutonomyTier::T0),
            Err(_) => AutonomyTier::T0,
        },
        _ => AutonomyTier::T0,
    }
}

pub fn coerce_priority(value: Option<&Value>) -> RecommendationPriority {
    match value.and_then(Value::as_str) {
        Some("low") => RecommendationPriority::Low,
        Some("high") => RecommendationPriority::High,
        _ => RecommendationPriority::Medium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_plain_json() {
        let value = extract_json(r#"{"findings": []}"#).unwrap();
        assert!(value["findings"].as_array().unwrap().is_empty());
    }

    #[test]
    fn extract_fenced_json() {
        let text = "Here you go:\n```json\n{\"summary\": \"ok\"}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["summary"], "ok");
    }

    #[test]
    fn extract_embedded_object() {
        let text = "The plan is {\"summary\": \"x\", \"nested\": {\"a\": 1}} as requested.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["nested"]["a"], 1);
    }

    #[test]
    fn extract_handles_braces_inside_strings() {
        let text = r#"prefix {"note": "a } inside", "n": 2} suffix"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["n"], 2);
    }

    #[test]
    fn extract_rejects_non_json() {
        assert!(extract_json("I could not produce output today.").is_none());
        assert!(extract_json("").is_none());
    }

    #[test]
    fn clamp01_bounds_and_non_finite() {
        assert_eq!(clamp01(0.5), 0.5);
        assert_eq!(clamp01(2.0), 1.0);
        assert_eq!(clamp01(-1.0), 0.0);
        assert_eq!(clamp01(f64::NAN), 0.0);
        assert_eq!(clamp01(f64::INFINITY), 0.0);
    }

    #[test]
    fn scan_truth_is_restricted() {
        let label = coerce_scan_truth(&json!({"truth_status": "verified"}));
        assert_eq!(label.status, TruthStatus::Speculative);

        let label = coerce_scan_truth(&json!({"truth_status": "hypothesis", "confidence": "high"}));
        assert_eq!(label.status, TruthStatus::Hypothesis);
        assert_eq!(label.confidence, Confidence::High);

        let label = coerce_scan_truth(&json!({}));
        assert_eq!(label.status, TruthStatus::Speculative);
        assert_eq!(label.confidence, Confidence::Low);
    }

    #[test]
    fn tier_coercion_accepts_numbers_and_strings() {
        assert_eq!(coerce_tier(Some(&json!(2))), AutonomyTier::T2);
        assert_eq!(coerce_tier(Some(&json!("1"))), AutonomyTier::T1);
        assert_eq!(coerce_tier(Some(&json!("t2"))), AutonomyTier::T2);
        assert_eq!(coerce_tier(Some(&json!(9))), AutonomyTier::T0);
        assert_eq!(coerce_tier(Some(&json!("high"))), AutonomyTier::T0);
        assert_eq!(coerce_tier(None), AutonomyTier::T0);
    }

    #[test]
    fn complexity_and_priority_defaults() {
        assert_eq!(coerce_complexity(Some(&json!("large"))), TaskComplexity::Large);
        assert_eq!(coerce_complexity(Some(&json!("huge"))), TaskComplexity::Medium);
        assert_eq!(coerce_complexity(None), TaskComplexity::Medium);
        assert_eq!(
            coerce_priority(Some(&json!("high"))),
            RecommendationPriority::High
        );
        assert_eq!(coerce_priority(None), RecommendationPriority::Medium);
    }

    #[test]
    fn string_helpers() {
        let value = json!({"title": "a", "sources": ["x", 3, "y"]});
        assert_eq!(string_field(&value, &["summary", "title"]), Some("a".into()));
        assert_eq!(string_field(&value, &["missing"]), None);
        assert_eq!(string_list(&value, "sources"), vec!["x", "y"]);
        assert!(string_list(&value, "absent").is_empty());
    }
}
