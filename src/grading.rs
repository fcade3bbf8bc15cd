use serde::{Deserialize, Serialize};

use crate::config::GradingParams;
use crate::types::{
    GradedAnswer, InteractionType, Question, QuestionKind, Rating, SandboxResponse, SandboxSpec,
};

/// Everything the rating table needs about one retrieval attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalOutcome {
    pub passed: bool,
    pub attempt_count: u32,
    pub hints_used: u32,
    /// actual time / baseline time for the interaction.
    pub time_ratio: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeterministicScore {
    pub score: f64,
    pub passed: bool,
}

/// Grades a quiz answer and derives its recall-quality rating in one step.
pub fn grade_answer(
    question: &Question,
    raw_answer: &str,
    elapsed_ms: i64,
    params: &GradingParams,
) -> GradedAnswer {
    let is_correct = match question.kind {
        QuestionKind::MultipleChoice | QuestionKind::TrueFalse => {
            normalize(raw_answer) == normalize(&question.answer)
        }
        QuestionKind::OpenText => fuzzy_match(&question.answer, raw_answer, params),
    };

    let time_ratio = elapsed_ms as f64 / params.quiz_baseline_ms.max(1) as f64;
    let rating = derive_rating(
        &RetrievalOutcome {
            passed: is_correct,
            attempt_count: 1,
            hints_used: 0,
            time_ratio,
        },
        params,
    );

    GradedAnswer { is_correct, rating }
}

/// Four-level recall-quality table, evaluated strictly in order; the first
/// matching row wins.
pub fn derive_rating(outcome: &RetrievalOutcome, params: &GradingParams) -> Rating {
    if !outcome.passed || outcome.attempt_count > params.max_attempts_before_again {
        Rating::Again
    } else if outcome.hints_used > params.max_hints_before_hard
        || outcome.time_ratio > params.slow_time_ratio
    {
        Rating::Hard
    } else if outcome.hints_used == 0 && outcome.time_ratio < params.fast_time_ratio {
        Rating::Easy
    } else {
        Rating::Good
    }
}

/// Token-overlap heuristic for open-text recall: tokenize the canonical
/// answer, discard stop-length tokens, and require the learner's answer to
/// contain at least `ceil(min_token_overlap * kept)` of the rest.
pub fn fuzzy_match(canonical: &str, answer: &str, params: &GradingParams) -> bool {
    let kept = content_tokens(canonical, params);
    if kept.is_empty() {
        return normalize(answer) == normalize(canonical);
    }
    let required = (params.min_token_overlap * kept.len() as f64).ceil() as usize;
    matched_tokens(&kept, answer) >= required.max(1)
}

/// Fraction of kept canonical tokens present in the answer, in [0, 1]. Used
/// as the deterministic layer for free-text sandbox grading.
pub fn token_overlap(canonical: &str, answer: &str, params: &GradingParams) -> f64 {
    let kept = content_tokens(canonical, params);
    if kept.is_empty() {
        return if normalize(answer) == normalize(canonical) {
            1.0
        } else {
            0.0
        };
    }
    matched_tokens(&kept, answer) as f64 / kept.len() as f64
}

fn content_tokens(canonical: &str, params: &GradingParams) -> Vec<String> {
    normalize(canonical)
        .split_whitespace()
        .filter(|t| t.chars().count() > params.stop_token_max_len)
        .map(|t| t.to_string())
        .collect()
}

fn matched_tokens(kept: &[String], answer: &str) -> usize {
    let normalized_answer = normalize(answer);
    kept.iter()
        .filter(|t| normalized_answer.contains(t.as_str()))
        .count()
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic layer of sandbox grading. Zone accuracy for matching and
/// fill-in-blank, edit distance for sequencing, token overlap for free text
/// (the AI semantic judgment, when it runs, replaces the free-text score at
/// the engine layer).
pub fn score_sandbox(
    spec: &SandboxSpec,
    response: &SandboxResponse,
    params: &GradingParams,
) -> DeterministicScore {
    let score = match (spec.interaction, response) {
        (InteractionType::Matching | InteractionType::FillInBlank, SandboxResponse::Placements(placements)) => {
            zone_accuracy(spec, placements)
        }
        (InteractionType::Sequencing, SandboxResponse::Ordering(order)) => {
            sequence_accuracy(spec, order)
        }
        (InteractionType::FreeText, SandboxResponse::FreeText(text)) => {
            let canonical = spec
                .elements
                .iter()
                .map(|e| e.expected.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            token_overlap(&canonical, text, params)
        }
        // Response shape does not fit the interaction; nothing to credit.
        _ => 0.0,
    };

    DeterministicScore {
        score,
        passed: score >= spec.min_correct_percentage,
    }
}

/// Baseline completion time for a sandbox exercise: fixed per-interaction
/// component plus a per-element increment, both from configuration.
pub fn baseline_ms(interaction: InteractionType, element_count: usize, params: &GradingParams) -> i64 {
    params.sandbox_base_ms.for_interaction(interaction)
        + params.sandbox_per_element_ms * element_count as i64
}

fn zone_accuracy(spec: &SandboxSpec, placements: &[(String, String)]) -> f64 {
    if spec.elements.is_empty() {
        return 0.0;
    }
    let correct = spec
        .elements
        .iter()
        .filter(|element| {
            placements
                .iter()
                .find(|(id, _)| *id == element.id)
                .is_some_and(|(_, value)| normalize(value) == normalize(&element.expected))
        })
        .count();
    correct as f64 / spec.elements.len() as f64
}

fn sequence_accuracy(spec: &SandboxSpec, order: &[String]) -> f64 {
    if spec.elements.is_empty() {
        return 0.0;
    }
    let expected: Vec<&str> = spec.elements.iter().map(|e| e.id.as_str()).collect();
    let given: Vec<&str> = order.iter().map(|s| s.as_str()).collect();
    let max_len = expected.len().max(given.len());
    let distance = edit_distance(&expected, &given);
    1.0 - distance as f64 / max_len as f64
}

fn edit_distance(a: &[&str], b: &[&str]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, item_a) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, item_b) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(item_a != item_b);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }

    prev[b.len()]
}
