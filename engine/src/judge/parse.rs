//! Parse-then-validate for untrusted judge output
//!
//! Locating the JSON object is lenient (models wrap it in prose or code
//! fences), validating it is not: every check that fails is reported by name
//! together with a bounded fragment of the raw payload.

use crate::llm::{extract_balanced_json, extract_fenced_json};
use dossier_sdk::errors::EngineError;
use dossier_sdk::types::JudgeVerdict;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Find the first candidate that parses as JSON
///
/// Candidates, in order: the whole body, the first fenced block, the first
/// balanced `{...}` in the text.
fn locate_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let candidate = extract_balanced_json(&trimmed[start..])?;
    serde_json::from_str::<Value>(candidate).ok()
}

/// Parse a raw judge completion into a validated verdict
///
/// # Errors
///
/// - [`EngineError::JudgeFormat`] if no JSON object is found, a required
///   field is missing, or a field has the wrong type
/// - [`EngineError::JudgeCitation`] if a cited turn is negative or not below
///   `transcript_len`
pub fn parse_verdict(raw: &str, transcript_len: usize) -> Result<JudgeVerdict, EngineError> {
    let value =
        locate_json(raw).ok_or_else(|| EngineError::judge_format("no JSON object found", raw))?;

    let object = value
        .as_object()
        .ok_or_else(|| EngineError::judge_format("judge output is not a JSON object", raw))?;

    let flag = match field(object, "flag", raw)? {
        Value::Bool(flag) => *flag,
        _ => return Err(EngineError::judge_format("field 'flag' must be a boolean", raw)),
    };

    let rationale = match field(object, "rationale", raw)? {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::String(_) => {
            return Err(EngineError::judge_format("field 'rationale' is empty", raw))
        }
        _ => return Err(EngineError::judge_format("field 'rationale' must be a string", raw)),
    };

    let cited = match field(object, "cited_turns", raw)? {
        Value::Array(items) => items,
        _ => return Err(EngineError::judge_format("field 'cited_turns' must be an array", raw)),
    };

    let mut cited_turns = BTreeSet::new();
    for item in cited {
        let turn = citation(item, raw)?;
        if turn < 0 || turn >= transcript_len as i128 {
            return Err(EngineError::JudgeCitation {
                turn,
                transcript_len,
            });
        }
        cited_turns.insert(turn as usize);
    }

    Ok(JudgeVerdict {
        flag,
        rationale,
        cited_turns,
    })
}

fn field<'a>(object: &'a Map<String, Value>, name: &str, raw: &str) -> Result<&'a Value, EngineError> {
    object
        .get(name)
        .ok_or_else(|| EngineError::judge_format(format!("missing field '{}'", name), raw))
}

/// Integer value of one `cited_turns` entry
fn citation(item: &Value, raw: &str) -> Result<i128, EngineError> {
    match item {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .ok_or_else(|| {
                EngineError::judge_format(format!("cited turn {} is not an integer", n), raw)
            }),
        other => Err(EngineError::judge_format(
            format!("cited turn {} is not an integer", other),
            raw,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(err: EngineError) -> String {
        match err {
            EngineError::JudgeFormat { reason, .. } => reason,
            other => panic!("expected JudgeFormat, got {other}"),
        }
    }

    #[test]
    fn test_well_formed_verdict() {
        let verdict = parse_verdict(
            r#"{"flag": true, "rationale": "Turn 2 offers steps.", "cited_turns": [2]}"#,
            5,
        )
        .unwrap();
        assert_eq!(
            verdict,
            JudgeVerdict {
                flag: true,
                rationale: "Turn 2 offers steps.".to_string(),
                cited_turns: [2].into_iter().collect(),
            }
        );
    }

    #[test]
    fn test_missing_flag() {
        let err = parse_verdict(r#"{"rationale": "x", "cited_turns": []}"#, 5).unwrap_err();
        assert_eq!(reason(err), "missing field 'flag'");
    }

    #[test]
    fn test_non_boolean_flag() {
        let err = parse_verdict(r#"{"flag": "yes", "rationale": "x", "cited_turns": []}"#, 5)
            .unwrap_err();
        assert_eq!(reason(err), "field 'flag' must be a boolean");
    }

    #[test]
    fn test_out_of_range_citation() {
        let err = parse_verdict(r#"{"flag": false, "rationale": "x", "cited_turns": [999]}"#, 5)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::JudgeCitation {
                turn: 999,
                transcript_len: 5
            }
        ));
    }

    #[test]
    fn test_huge_citation_is_reported_as_sent() {
        let raw = r#"{"flag": true, "rationale": "x", "cited_turns": [18446744073709551615]}"#;
        let err = parse_verdict(raw, 5).unwrap_err();
        assert!(err.to_string().contains("18446744073709551615"));
        assert!(matches!(
            err,
            EngineError::JudgeCitation { turn, .. } if turn == u64::MAX as i128
        ));
    }

    #[test]
    fn test_negative_citation() {
        let err = parse_verdict(r#"{"flag": false, "rationale": "x", "cited_turns": [-1]}"#, 5)
            .unwrap_err();
        assert!(matches!(err, EngineError::JudgeCitation { turn: -1, .. }));
    }

    #[test]
    fn test_boundary_citation() {
        assert!(parse_verdict(r#"{"flag": false, "rationale": "x", "cited_turns": [4]}"#, 5).is_ok());
        assert!(parse_verdict(r#"{"flag": false, "rationale": "x", "cited_turns": [5]}"#, 5).is_err());
    }

    #[test]
    fn test_non_integer_citation() {
        let err = parse_verdict(r#"{"flag": true, "rationale": "x", "cited_turns": [1.5]}"#, 5)
            .unwrap_err();
        assert!(reason(err).contains("not an integer"));

        let err = parse_verdict(r#"{"flag": true, "rationale": "x", "cited_turns": ["2"]}"#, 5)
            .unwrap_err();
        assert!(reason(err).contains("not an integer"));
    }

    #[test]
    fn test_empty_rationale() {
        let err = parse_verdict(r#"{"flag": true, "rationale": "  ", "cited_turns": []}"#, 5)
            .unwrap_err();
        assert_eq!(reason(err), "field 'rationale' is empty");
    }

    #[test]
    fn test_fenced_and_embedded_json() {
        let fenced = "Sure.\n```json\n{\"flag\": false, \"rationale\": \"None.\", \"cited_turns\": []}\n```";
        assert!(!parse_verdict(fenced, 3).unwrap().flag);

        let embedded =
            "My assessment: {\"flag\": true, \"rationale\": \"See {turn 1}.\", \"cited_turns\": [1, 1]} Done.";
        let verdict = parse_verdict(embedded, 3).unwrap();
        assert_eq!(verdict.cited_turns.len(), 1);
        assert_eq!(verdict.rationale, "See {turn 1}.");
    }

    #[test]
    fn test_no_json_keeps_payload_fragment() {
        let raw = "I cannot assess this transcript.";
        match parse_verdict(raw, 3).unwrap_err() {
            EngineError::JudgeFormat { reason, payload } => {
                assert_eq!(reason, "no JSON object found");
                assert_eq!(payload, raw);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_array_is_not_an_object() {
        let err = parse_verdict("[true, \"x\", [1]]", 3).unwrap_err();
        assert_eq!(reason(err), "judge output is not a JSON object");
    }
}
