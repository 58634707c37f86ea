//! Intent router - natural language to grading intent mapping
//!
//! Three deterministic tiers, first match wins, ordered cheapest first:
//! literal command triggers, positional comma lists, then structured
//! `<word>_id: <digits>` patterns. Anything left over goes to the LLM,
//! whose reply is deserialized strictly and treated as best effort.

use mark_common::llm::{ChatMessage, LlmClient};
use serde::Deserialize;

/// User intent parsed from a chat utterance. Identifier fields are
/// optional; missing ones are filled from the session at dispatch time.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Preview the rubric attached to an assignment
    ViewRubric {
        course_id: Option<String>,
        assignment_id: Option<String>,
    },
    /// Load a rubric from an uploaded file
    LoadRubric { path: Option<String> },
    /// Fetch one student's submission
    FetchSubmission {
        course_id: Option<String>,
        assignment_id: Option<String>,
        student_id: Option<String>,
    },
    /// Grade the selected submission against the resolved rubric
    GradeSubmission {
        course_id: Option<String>,
        assignment_id: Option<String>,
        student_id: Option<String>,
    },
    /// Override the computed score
    ModifyGrade { score: Option<f64> },
    /// Replace the computed feedback
    ModifyFeedback { feedback: String },
    /// Post the current grade and feedback to Canvas
    SubmitGrade,
    /// Show the pending grade and feedback
    ShowFeedback,
    /// Leave the chat
    Exit,
    /// No deterministic match; carries the original utterance
    Unknown(String),
}

impl Intent {
    /// Stable name for turn logs
    pub fn label(&self) -> &'static str {
        match self {
            Intent::ViewRubric { .. } => "view_rubric",
            Intent::LoadRubric { .. } => "load_rubric",
            Intent::FetchSubmission { .. } => "fetch_submission",
            Intent::GradeSubmission { .. } => "grade_submission",
            Intent::ModifyGrade { .. } => "modify_grade",
            Intent::ModifyFeedback { .. } => "modify_feedback",
            Intent::SubmitGrade => "submit_grade",
            Intent::ShowFeedback => "show_feedback",
            Intent::Exit => "exit",
            Intent::Unknown(_) => "unknown",
        }
    }
}

/// Classify an utterance through the three deterministic tiers.
/// Pure function; unresolved input comes back as `Intent::Unknown`.
pub fn classify(input: &str) -> Intent {
    let lower = input.to_lowercase();

    // Tier 1: literal command triggers. Checked before any positional
    // parsing so "feedback: good job, 121,473,247" stays a feedback
    // edit instead of a comma-separated ID list.
    // Offsets come from a case-insensitive match on the original input
    // so the extracted text keeps its casing.
    if let Some(m) = regex::Regex::new(r"(?i)feedback:").unwrap().find(input) {
        let feedback = input[m.end()..].trim().to_string();
        return Intent::ModifyFeedback { feedback };
    }

    if lower.contains("modify grade") && lower.contains("score:") {
        if let Some(score) = parse_after(&lower, "score:") {
            return Intent::ModifyGrade { score: Some(score) };
        }
    }

    if lower.contains("submit grade to canvas") {
        return Intent::SubmitGrade;
    }

    if lower.contains("show feedback") {
        return Intent::ShowFeedback;
    }

    if let Some(m) = regex::Regex::new(r"(?i)load rubric").unwrap().find(input) {
        let rest = input[m.end()..].trim();
        return Intent::LoadRubric {
            path: if rest.is_empty() {
                None
            } else {
                Some(rest.to_string())
            },
        };
    }

    if matches!(lower.trim(), "exit" | "quit" | "bye" | "goodbye") {
        return Intent::Exit;
    }

    // Tier 2: positional comma list, e.g. "121,473" or "121,473,247".
    // Only when the utterance names no ID explicitly.
    if input.contains(',') && !contains_id_word(&lower) {
        let parts: Vec<&str> = input.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [course, assignment] => {
                return Intent::ViewRubric {
                    course_id: Some((*course).to_string()),
                    assignment_id: Some((*assignment).to_string()),
                };
            }
            [course, assignment, student] => {
                return Intent::FetchSubmission {
                    course_id: Some((*course).to_string()),
                    assignment_id: Some((*assignment).to_string()),
                    student_id: Some((*student).to_string()),
                };
            }
            // Any other arity falls through to tier 3/4
            _ => {}
        }
    }

    // Tier 3: structured "course_id: 121, assignment_id: 473" patterns
    let re = regex::Regex::new(r"(\w+)_id:\s*(\d+)").unwrap();
    let mut course = None;
    let mut assignment = None;
    let mut student = None;
    for caps in re.captures_iter(input) {
        let value = caps[2].to_string();
        match &caps[1] {
            "course" => course = Some(value),
            "assignment" => assignment = Some(value),
            "student" | "user" => student = Some(value),
            _ => {}
        }
    }

    if course.is_some() && assignment.is_some() {
        return Intent::ViewRubric {
            course_id: course,
            assignment_id: assignment,
        };
    }
    if student.is_some() {
        return Intent::FetchSubmission {
            course_id: course,
            assignment_id: assignment,
            student_id: student,
        };
    }

    Intent::Unknown(input.to_string())
}

/// Full classification: deterministic tiers first, then the LLM
/// fallback for whatever they could not place.
pub fn classify_with_llm(llm: &dyn LlmClient, input: &str) -> Intent {
    match classify(input) {
        Intent::Unknown(original) => llm_classify(llm, &original),
        intent => intent,
    }
}

fn contains_id_word(lower: &str) -> bool {
    ["course", "assignment", "student"]
        .iter()
        .any(|word| lower.contains(word))
}

fn parse_after(lower: &str, marker: &str) -> Option<f64> {
    lower
        .split(marker)
        .nth(1)
        .and_then(|rest| rest.trim().parse::<f64>().ok())
}

const INTENT_SYSTEM_PROMPT: &str = "\
You are an AI that understands user requests about grading assignments.
Extract the intent and any relevant IDs from the user's message.
Respond in JSON format with two fields:
1. \"intent\": One of [view_rubric, load_rubric, fetch_submission, grade_submission, modify_grade, modify_feedback, submit_grade, show_feedback, unknown]
2. \"entities\": Object containing any found course_id, assignment_id, student_id, score, or feedback

Example inputs and outputs:
\"Show rubric for course 121 assignment 473\"
{\"intent\": \"view_rubric\", \"entities\": {\"course_id\": \"121\", \"assignment_id\": \"473\"}}

\"Grade submission for student 247 in course 121, assignment 473\"
{\"intent\": \"grade_submission\", \"entities\": {\"course_id\": \"121\", \"assignment_id\": \"473\", \"student_id\": \"247\"}}

\"show feedback\"
{\"intent\": \"show_feedback\", \"entities\": {}}

Respond with the JSON object only.";

/// Typed shape of the LLM's classification reply. Anything that does
/// not deserialize cleanly becomes `Unknown` - the reply is data, never
/// evaluated.
#[derive(Debug, Deserialize)]
struct IntentReply {
    intent: String,
    #[serde(default)]
    entities: IntentEntities,
}

#[derive(Debug, Default, Deserialize)]
struct IntentEntities {
    #[serde(default, deserialize_with = "de_opt_string")]
    course_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    assignment_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    student_id: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    feedback: Option<String>,
}

/// Models emit IDs as either strings or bare numbers; accept both.
fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

fn llm_classify(llm: &dyn LlmClient, input: &str) -> Intent {
    let messages = [
        ChatMessage::system(INTENT_SYSTEM_PROMPT),
        ChatMessage::user(input),
    ];

    let reply = match llm.complete(&messages) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("LLM intent fallback failed: {}", e);
            return Intent::Unknown(input.to_string());
        }
    };

    let parsed: IntentReply = match serde_json::from_str(reply.trim()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!("LLM intent reply did not parse: {}", e);
            return Intent::Unknown(input.to_string());
        }
    };

    let e = parsed.entities;
    match parsed.intent.as_str() {
        "view_rubric" => Intent::ViewRubric {
            course_id: e.course_id,
            assignment_id: e.assignment_id,
        },
        "load_rubric" => Intent::LoadRubric { path: None },
        "fetch_submission" => Intent::FetchSubmission {
            course_id: e.course_id,
            assignment_id: e.assignment_id,
            student_id: e.student_id,
        },
        "grade_submission" => Intent::GradeSubmission {
            course_id: e.course_id,
            assignment_id: e.assignment_id,
            student_id: e.student_id,
        },
        "modify_grade" => Intent::ModifyGrade { score: e.score },
        "modify_feedback" => Intent::ModifyFeedback {
            feedback: e.feedback.unwrap_or_default(),
        },
        "submit_grade" => Intent::SubmitGrade,
        "show_feedback" => Intent::ShowFeedback,
        _ => Intent::Unknown(input.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mark_common::llm::FakeLlmClient;

    #[test]
    fn test_feedback_trigger_beats_comma_list() {
        // Three comma-separated numbers, but the literal trigger wins
        let intent = classify("feedback: good job, 121,473,247");
        assert_eq!(
            intent,
            Intent::ModifyFeedback {
                feedback: "good job, 121,473,247".to_string()
            }
        );
    }

    #[test]
    fn test_modify_grade_trigger() {
        assert_eq!(
            classify("modify grade score: 92.5"),
            Intent::ModifyGrade { score: Some(92.5) }
        );
    }

    #[test]
    fn test_modify_grade_unparseable_score_falls_through() {
        assert!(matches!(
            classify("modify grade score: lots"),
            Intent::Unknown(_)
        ));
    }

    #[test]
    fn test_submit_grade_trigger() {
        assert_eq!(classify("submit grade to canvas"), Intent::SubmitGrade);
        assert_eq!(
            classify("please submit grade to canvas now"),
            Intent::SubmitGrade
        );
    }

    #[test]
    fn test_show_feedback_trigger() {
        assert_eq!(classify("show feedback"), Intent::ShowFeedback);
    }

    #[test]
    fn test_load_rubric_with_path() {
        assert_eq!(
            classify("load rubric /tmp/rubric.json"),
            Intent::LoadRubric {
                path: Some("/tmp/rubric.json".to_string())
            }
        );
        assert_eq!(classify("load rubric"), Intent::LoadRubric { path: None });
    }

    #[test]
    fn test_exit_words() {
        assert_eq!(classify("exit"), Intent::Exit);
        assert_eq!(classify("quit"), Intent::Exit);
        assert_eq!(classify("goodbye"), Intent::Exit);
    }

    #[test]
    fn test_comma_pair_is_view_rubric() {
        assert_eq!(
            classify("121,473"),
            Intent::ViewRubric {
                course_id: Some("121".to_string()),
                assignment_id: Some("473".to_string()),
            }
        );
    }

    #[test]
    fn test_comma_triple_is_fetch_submission() {
        assert_eq!(
            classify("121, 473, 247"),
            Intent::FetchSubmission {
                course_id: Some("121".to_string()),
                assignment_id: Some("473".to_string()),
                student_id: Some("247".to_string()),
            }
        );
    }

    #[test]
    fn test_comma_quad_falls_through() {
        // Four parts skip tier 2; no _id patterns either, so Unknown
        assert!(matches!(classify("121,473,247,9"), Intent::Unknown(_)));
    }

    #[test]
    fn test_comma_list_with_id_word_skips_tier2() {
        assert!(matches!(
            classify("grade the course 121, assignment 473"),
            Intent::Unknown(_)
        ));
    }

    #[test]
    fn test_structured_course_and_assignment() {
        assert_eq!(
            classify("course_id: 121, assignment_id: 473"),
            Intent::ViewRubric {
                course_id: Some("121".to_string()),
                assignment_id: Some("473".to_string()),
            }
        );
    }

    #[test]
    fn test_structured_student_is_fetch() {
        assert_eq!(
            classify("student_id: 247"),
            Intent::FetchSubmission {
                course_id: None,
                assignment_id: None,
                student_id: Some("247".to_string()),
            }
        );
    }

    #[test]
    fn test_unknown_preserves_input() {
        if let Intent::Unknown(text) = classify("please help me") {
            assert_eq!(text, "please help me");
        } else {
            panic!("expected Unknown intent");
        }
    }

    #[test]
    fn test_llm_fallback_parses_reply() {
        let llm = FakeLlmClient::always(
            r#"{"intent": "grade_submission", "entities": {"course_id": 121, "assignment_id": "473", "student_id": "247"}}"#,
        );

        let intent = classify_with_llm(&llm, "grade the essay for that student");
        assert_eq!(
            intent,
            Intent::GradeSubmission {
                course_id: Some("121".to_string()),
                assignment_id: Some("473".to_string()),
                student_id: Some("247".to_string()),
            }
        );
        assert_eq!(llm.call_count(), 1);
    }

    #[test]
    fn test_llm_fallback_not_called_for_deterministic_match() {
        let llm = FakeLlmClient::always("should never be used");
        classify_with_llm(&llm, "121,473");
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn test_llm_fallback_garbage_reply_is_unknown() {
        let llm = FakeLlmClient::always("Sure! I think you want to grade something.");
        assert!(matches!(
            classify_with_llm(&llm, "do the thing"),
            Intent::Unknown(_)
        ));
    }

    #[test]
    fn test_llm_fallback_error_is_unknown() {
        let llm = FakeLlmClient::always_error(mark_common::llm::LlmError::Timeout(60));
        assert!(matches!(
            classify_with_llm(&llm, "do the thing"),
            Intent::Unknown(_)
        ));
    }
}
