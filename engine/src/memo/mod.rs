//! Memo assembly
//!
//! Renders the rule verdict and the judge verdict into a neutral Markdown
//! memo. Every finding in the memo points at numbered citations, and every
//! citation carries a turn index and a literal excerpt of that turn. The
//! citations are verified against the transcript before the memo is returned.

use crate::pipeline::RunMetadata;
use crate::rules::RuleVerdict;
use dossier_sdk::errors::EngineError;
use dossier_sdk::types::{FeatureCategory, JudgeVerdict, Transcript};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Where a citation comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationSource {
    Rule,
    Judge,
}

/// A turn-anchored quotation used by the memo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Identifier used in the memo text, `C1`, `C2`, ...
    pub id: String,
    pub turn_index: usize,
    /// Literal substring of the turn text
    pub excerpt: String,
    pub source: CitationSource,
    /// Category for rule citations
    pub category: Option<FeatureCategory>,
}

/// Rendered memo and the citations it relies on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo {
    pub text: String,
    pub citations: Vec<Citation>,
}

const COUNTERARGUMENTS: [&str; 3] = [
    "The assistant may state that its information is general and not legal advice, which could be offered to argue the interaction is informational rather than regulated conduct.",
    "Much of the content is procedural (documentation, options, resources) and could be characterized as customer support style guidance rather than relational engagement.",
    "The assistant does not claim authority or establish a professional relationship, which could be used to argue the engagement is limited in scope.",
];

const LIMITATIONS: [&str; 2] = [
    "Feature matches are lexical. They show that a phrase is present, not what the user understood by it.",
    "The judge verdict is the output of a single model call and is reported as recorded, without adjustment.",
];

/// Render a memo without run metadata
pub fn render(
    transcript: &Transcript,
    rule: &RuleVerdict,
    judge: &JudgeVerdict,
) -> Result<Memo, EngineError> {
    assemble(None, transcript, rule, judge)
}

/// Render a memo that opens with the run metadata
pub fn render_with_metadata(
    metadata: &RunMetadata,
    transcript: &Transcript,
    rule: &RuleVerdict,
    judge: &JudgeVerdict,
) -> Result<Memo, EngineError> {
    assemble(Some(metadata), transcript, rule, judge)
}

/// Check every citation against the transcript
pub fn verify_citations(transcript: &Transcript, citations: &[Citation]) -> Result<(), EngineError> {
    for citation in citations {
        if transcript.get(citation.turn_index).is_none() {
            return Err(EngineError::CitationMismatch {
                turn_index: citation.turn_index,
                reason: format!("transcript has {} turns", transcript.len()),
            });
        }
        if !transcript.contains_excerpt(citation.turn_index, &citation.excerpt) {
            return Err(EngineError::CitationMismatch {
                turn_index: citation.turn_index,
                reason: format!("{} excerpt is not a literal substring of the turn", citation.id),
            });
        }
    }
    Ok(())
}

fn collect_citations(
    transcript: &Transcript,
    rule: &RuleVerdict,
    judge: &JudgeVerdict,
) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();

    for m in &rule.evidence {
        citations.push(Citation {
            id: String::new(),
            turn_index: m.turn_index,
            excerpt: m.excerpt.clone(),
            source: CitationSource::Rule,
            category: Some(m.category),
        });
    }
    for &turn_index in &judge.cited_turns {
        // Out of range turns keep an empty excerpt and fail verification
        let excerpt = transcript
            .get(turn_index)
            .map(|t| t.text.clone())
            .unwrap_or_default();
        citations.push(Citation {
            id: String::new(),
            turn_index,
            excerpt,
            source: CitationSource::Judge,
            category: None,
        });
    }

    citations.sort_by(|a, b| {
        (a.turn_index, a.source, a.category).cmp(&(b.turn_index, b.source, b.category))
    });
    citations.dedup_by(|a, b| {
        a.turn_index == b.turn_index
            && a.source == b.source
            && a.category == b.category
            && a.excerpt == b.excerpt
    });
    for (i, c) in citations.iter_mut().enumerate() {
        c.id = format!("C{}", i + 1);
    }
    citations
}

fn ids<'a>(citations: impl Iterator<Item = &'a Citation>) -> String {
    let ids: Vec<&str> = citations.map(|c| c.id.as_str()).collect();
    if ids.is_empty() {
        "no citation".to_string()
    } else {
        ids.join(", ")
    }
}

fn block_quote(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                ">".to_string()
            } else {
                format!("> {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn assemble(
    metadata: Option<&RunMetadata>,
    transcript: &Transcript,
    rule: &RuleVerdict,
    judge: &JudgeVerdict,
) -> Result<Memo, EngineError> {
    let citations = collect_citations(transcript, rule, judge);
    verify_citations(transcript, &citations)?;

    // Writing into a String cannot fail
    let mut out = String::new();
    let _ = writeln!(out, "# Evidentiary memo\n");

    let _ = writeln!(out, "## Run metadata\n");
    match metadata {
        Some(meta) => {
            let _ = writeln!(out, "- Run id: {}", meta.run_id);
            let _ = writeln!(out, "- Started at: {}", meta.started_at);
            let _ = writeln!(out, "- Target model: {}", meta.target_model);
            let _ = writeln!(out, "- Judge model: {}", meta.judge_model);
        }
        None => {
            let _ = writeln!(out, "- Run id: not recorded");
        }
    }
    let _ = writeln!(out, "- Scenario: {}", transcript.scenario);
    match &transcript.branch_label {
        Some(label) if transcript.label_matched => {
            let _ = writeln!(out, "- Branch label: {}", label);
        }
        Some(label) => {
            let _ = writeln!(
                out,
                "- Branch label: {} (matched no edge, default path used)",
                label
            );
        }
        None => {
            let _ = writeln!(out, "- Branch label: none (default path)");
        }
    }
    let _ = writeln!(out, "- Turns: {}\n", transcript.len());

    let _ = writeln!(out, "## Rule-based finding\n");
    let _ = writeln!(
        out,
        "Rule `{}` (digest `{}`).\n",
        rule.rule_version, rule.rule_digest
    );
    let _ = writeln!(out, "Rule-based flag: {}\n", rule.flag);
    for (category, present) in &rule.rule_inputs {
        if *present {
            let cited = citations
                .iter()
                .filter(|c| c.source == CitationSource::Rule && c.category == Some(*category));
            let _ = writeln!(out, "- {}: present ({})", category.label(), ids(cited));
        } else {
            let _ = writeln!(out, "- {}: not found", category.label());
        }
    }
    let _ = writeln!(out, "\n{}\n", rule.rationale);

    let _ = writeln!(out, "## Judge finding\n");
    let _ = writeln!(out, "Judge flag: {}\n", judge.flag);
    let _ = writeln!(out, "Judge rationale, as returned: {}\n", judge.rationale);
    if judge.cited_turns.is_empty() {
        let _ = writeln!(out, "The judge cited no turns.\n");
    } else {
        for &turn_index in &judge.cited_turns {
            let cited = citations
                .iter()
                .filter(|c| c.source == CitationSource::Judge && c.turn_index == turn_index);
            let _ = writeln!(out, "- Turn {} ({})", turn_index, ids(cited));
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Agreement\n");
    if rule.flag == judge.flag {
        let _ = writeln!(
            out,
            "The rule-based flag and the judge flag agree (both {}).\n",
            rule.flag
        );
    } else {
        let _ = writeln!(
            out,
            "The rule-based flag ({}) and the judge flag ({}) disagree. Both findings are reported as recorded; neither is treated as controlling.\n",
            rule.flag, judge.flag
        );
    }

    let _ = writeln!(out, "## Cited excerpts\n");
    if citations.is_empty() {
        let _ = writeln!(out, "No excerpts were cited.\n");
    }
    for c in &citations {
        let (speaker, phase) = transcript
            .get(c.turn_index)
            .map(|t| (t.speaker.to_string(), t.phase.to_string()))
            .unwrap_or_default();
        let origin = match (c.source, c.category) {
            (CitationSource::Rule, Some(category)) => format!("rule, {}", category.label()),
            (CitationSource::Rule, None) => "rule".to_string(),
            (CitationSource::Judge, _) => "judge".to_string(),
        };
        let _ = writeln!(
            out,
            "**{}** Turn {} ({}, {}; {})\n\n{}\n",
            c.id,
            c.turn_index,
            speaker,
            phase,
            origin,
            block_quote(&c.excerpt)
        );
    }

    let _ = writeln!(out, "## Counterarguments and limitations\n");
    for (i, item) in COUNTERARGUMENTS.iter().chain(LIMITATIONS.iter()).enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, item);
    }

    let _ = writeln!(out, "\n## Notes\n");
    let _ = writeln!(
        out,
        "This memo is generated for evaluation and logging purposes. It draws no legal conclusion and is not legal advice."
    );
    let _ = writeln!(
        out,
        "Excerpts are quoted verbatim from the stored transcript artifact and identified by turn index."
    );

    tracing::debug!(citations = citations.len(), "Rendered memo");

    Ok(Memo {
        text: out,
        citations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleEngine;
    use dossier_sdk::types::{FeatureMatch, Phase, Speaker};

    fn transcript() -> Transcript {
        let mut t = Transcript::new("demo", Some("ask_for_guidance".to_string()));
        t.label_matched = true;
        t.push(Speaker::User, Phase::Orientation, "u1", "I'm stuck.");
        t.push(
            Speaker::Assistant,
            Phase::ProceduralFollowUp,
            "a1",
            "Here is a step-by-step outline.\nFirst, write it down.",
        );
        t
    }

    fn matches() -> Vec<FeatureMatch> {
        vec![FeatureMatch {
            category: FeatureCategory::ProceduralGuidance,
            turn_index: 1,
            excerpt: "Here is a step-by-step outline.".to_string(),
            offset: 0,
            matched: "step-by-step".to_string(),
            rationale: "r".to_string(),
        }]
    }

    fn verdict(flag: bool, cited: &[usize]) -> JudgeVerdict {
        JudgeVerdict {
            flag,
            rationale: "Turn 1 contains structured steps.".to_string(),
            cited_turns: cited.iter().copied().collect(),
        }
    }

    #[test]
    fn test_citations_exist_in_transcript() {
        let t = transcript();
        let rule = RuleEngine::default().evaluate(&matches());
        let memo = render(&t, &rule, &verdict(true, &[1])).unwrap();

        assert_eq!(memo.citations.len(), 2);
        for c in &memo.citations {
            assert!(t.contains_excerpt(c.turn_index, &c.excerpt));
            assert!(memo.text.contains(&format!("**{}** Turn {}", c.id, c.turn_index)));
        }
        assert_eq!(memo.citations[0].source, CitationSource::Rule);
        assert_eq!(memo.citations[1].source, CitationSource::Judge);
    }

    #[test]
    fn test_disagreement_is_stated_neutrally() {
        let rule = RuleEngine::default().evaluate(&matches());
        assert!(!rule.flag);
        let memo = render(&transcript(), &rule, &verdict(true, &[1])).unwrap();
        assert!(memo.text.contains("disagree"));
        assert!(memo.text.contains("neither is treated as controlling"));
        assert!(memo.text.contains("not legal advice"));
    }

    #[test]
    fn test_multiline_excerpt_is_block_quoted() {
        let memo = render(
            &transcript(),
            &RuleEngine::default().evaluate(&[]),
            &verdict(false, &[1]),
        )
        .unwrap();
        assert!(memo
            .text
            .contains("> Here is a step-by-step outline.\n> First, write it down."));
    }

    #[test]
    fn test_paraphrased_excerpt_is_rejected() {
        let mut m = matches();
        m[0].excerpt = "Here is a step by step outline.".to_string();
        let rule = RuleEngine::default().evaluate(&m);
        let err = render(&transcript(), &rule, &verdict(false, &[])).unwrap_err();
        assert!(matches!(err, EngineError::CitationMismatch { turn_index: 1, .. }));
    }

    #[test]
    fn test_judge_turn_outside_transcript_is_rejected() {
        let rule = RuleEngine::default().evaluate(&[]);
        let err = render(&transcript(), &rule, &verdict(false, &[7])).unwrap_err();
        assert!(matches!(err, EngineError::CitationMismatch { turn_index: 7, .. }));
    }

    #[test]
    fn test_render_is_deterministic() {
        let t = transcript();
        let rule = RuleEngine::default().evaluate(&matches());
        let a = render(&t, &rule, &verdict(true, &[0, 1])).unwrap();
        let b = render(&t, &rule, &verdict(true, &[1, 0])).unwrap();
        assert_eq!(a, b);
    }
}
