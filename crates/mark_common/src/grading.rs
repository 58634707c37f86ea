//! Criterion scoring and grade aggregation
//!
//! One LLM call per rubric criterion; the numeric score is pulled out of
//! the free-text reply with a regex scan. Extraction failure degrades to
//! a zero score with the raw reply kept as feedback, never an error.

use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, LlmClient};
use crate::rubric::RubricCriterion;

/// Outcome of scoring one criterion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub title: String,
    pub max_points: f64,
    pub awarded_points: f64,
    pub feedback: String,
}

/// Aggregated grade across all criteria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingResult {
    pub per_criterion: Vec<CriterionScore>,
    pub total_awarded: f64,
    pub total_possible: f64,
}

impl GradingResult {
    /// Feedback blocks joined with blank lines, ready to post as a
    /// submission comment
    pub fn feedback_text(&self) -> String {
        self.per_criterion
            .iter()
            .map(|score| {
                format!(
                    "{} ({} pts):\n{}",
                    score.title, score.max_points, score.feedback
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Display total: awarded to two decimals, possible to zero
    pub fn summary_line(&self) -> String {
        format!(
            "Total score: {:.2}/{:.0}",
            self.total_awarded, self.total_possible
        )
    }
}

/// Extract the first number followed by `/` or whitespace from the LLM
/// reply. Returns `None` when the text carries no such pattern.
pub fn extract_score(text: &str) -> Option<f64> {
    let re = regex::Regex::new(r"(\d+(\.\d+)?)[/\s]").unwrap();
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

fn scoring_prompt(submission: &str, criterion: &RubricCriterion) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Evaluate the following student submission according to this criterion:\n\n\
         Submission:\n{}\n\n\
         Criterion: {} ({} pts)\n\
         Description: {}\n\n\
         Return score (0 to full points) and 1-sentence feedback.",
        submission, criterion.title, criterion.max_points, criterion.description
    ))]
}

/// Score one criterion. The extracted value is clamped to
/// `[0, max_points]`; an LLM failure or an unparseable reply yields a
/// zero score with whatever text came back kept as feedback.
pub fn score_criterion(
    llm: &dyn LlmClient,
    submission: &str,
    criterion: &RubricCriterion,
) -> CriterionScore {
    let reply = match llm.complete(&scoring_prompt(submission, criterion)) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("LLM call failed for criterion '{}': {}", criterion.title, e);
            return CriterionScore {
                title: criterion.title.clone(),
                max_points: criterion.max_points,
                awarded_points: 0.0,
                feedback: format!("Scoring unavailable: {}", e),
            };
        }
    };

    let awarded = extract_score(&reply)
        .unwrap_or(0.0)
        .clamp(0.0, criterion.max_points);

    CriterionScore {
        title: criterion.title.clone(),
        max_points: criterion.max_points,
        awarded_points: awarded,
        feedback: reply,
    }
}

/// Grade a submission against every criterion in source order and sum
/// the totals. Handles the empty criteria list without special cases.
pub fn grade_submission(
    llm: &dyn LlmClient,
    submission: &str,
    criteria: &[RubricCriterion],
) -> GradingResult {
    let per_criterion: Vec<CriterionScore> = criteria
        .iter()
        .map(|criterion| score_criterion(llm, submission, criterion))
        .collect();

    let total_awarded = per_criterion.iter().map(|s| s.awarded_points).sum();
    let total_possible = per_criterion.iter().map(|s| s.max_points).sum();

    GradingResult {
        per_criterion,
        total_awarded,
        total_possible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FakeLlmClient;

    fn criterion(title: &str, max: f64) -> RubricCriterion {
        RubricCriterion {
            title: title.to_string(),
            description: format!("{} description", title),
            max_points: max,
        }
    }

    #[test]
    fn test_extract_score_slash_form() {
        assert_eq!(extract_score("Score: 18/20 - good work"), Some(18.0));
    }

    #[test]
    fn test_extract_score_whitespace_form() {
        assert_eq!(extract_score("17.5 out of 20"), Some(17.5));
    }

    #[test]
    fn test_extract_score_no_number() {
        assert_eq!(extract_score("Well done, no complaints."), None);
    }

    #[test]
    fn test_score_criterion_parses_reply() {
        let llm = FakeLlmClient::always("18/20. Strong argumentation throughout.");
        let score = score_criterion(&llm, "essay text", &criterion("Argument", 20.0));
        assert_eq!(score.awarded_points, 18.0);
        assert_eq!(score.max_points, 20.0);
        assert!(score.feedback.contains("Strong argumentation"));
    }

    #[test]
    fn test_score_criterion_unparseable_reply_is_zero() {
        let llm = FakeLlmClient::always("Great job overall!");
        let score = score_criterion(&llm, "essay", &criterion("Style", 10.0));
        assert_eq!(score.awarded_points, 0.0);
        assert_eq!(score.feedback, "Great job overall!");
    }

    #[test]
    fn test_score_criterion_clamps_to_max() {
        let llm = FakeLlmClient::always("Score: 25/20 excellent");
        let score = score_criterion(&llm, "essay", &criterion("Depth", 20.0));
        assert_eq!(score.awarded_points, 20.0);
    }

    #[test]
    fn test_score_criterion_llm_error_is_zero() {
        let llm = FakeLlmClient::always_error(crate::llm::LlmError::Timeout(60));
        let score = score_criterion(&llm, "essay", &criterion("Depth", 20.0));
        assert_eq!(score.awarded_points, 0.0);
        assert!(score.feedback.contains("Scoring unavailable"));
    }

    #[test]
    fn test_grade_submission_sums_totals() {
        let llm = FakeLlmClient::new(vec![
            Ok("20/25 solid thesis".to_string()),
            Ok("15/20 evidence could be stronger".to_string()),
        ]);
        let criteria = vec![criterion("Thesis", 25.0), criterion("Evidence", 20.0)];

        let result = grade_submission(&llm, "essay", &criteria);
        assert_eq!(result.total_awarded, 35.0);
        assert_eq!(result.total_possible, 45.0);
        assert_eq!(result.per_criterion.len(), 2);
        assert_eq!(llm.call_count(), 2);
    }

    #[test]
    fn test_grade_submission_empty_criteria() {
        let llm = FakeLlmClient::always("irrelevant");
        let result = grade_submission(&llm, "essay", &[]);
        assert_eq!(result.total_awarded, 0.0);
        assert_eq!(result.total_possible, 0.0);
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn test_feedback_text_blocks() {
        let result = GradingResult {
            per_criterion: vec![
                CriterionScore {
                    title: "Thesis".to_string(),
                    max_points: 25.0,
                    awarded_points: 20.0,
                    feedback: "Good thesis.".to_string(),
                },
                CriterionScore {
                    title: "Evidence".to_string(),
                    max_points: 20.0,
                    awarded_points: 15.0,
                    feedback: "More citations needed.".to_string(),
                },
            ],
            total_awarded: 35.0,
            total_possible: 45.0,
        };

        let text = result.feedback_text();
        assert!(text.contains("Thesis (25 pts):\nGood thesis."));
        assert!(text.contains("\n\nEvidence (20 pts):\n"));
        assert_eq!(result.summary_line(), "Total score: 35.00/45");
    }
}
