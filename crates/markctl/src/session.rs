//! Conversation session state
//!
//! One mutable record per conversation, threaded explicitly through the
//! dispatch layer. Tracks a single grading target at a time; resolving
//! IDs for a new target overwrites the previous one.

use mark_common::rubric::RubricCriterion;

use crate::intent_router::Intent;

/// Everything a conversation carries between turns
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    pub course_id: Option<String>,
    pub assignment_id: Option<String>,
    pub student_id: Option<String>,

    /// Latest computed-but-not-yet-submitted grade and feedback
    pub current_grade: Option<f64>,
    pub current_feedback: Option<String>,
    /// Maximum points of the rubric the current grade was computed
    /// against; bounds grade overrides
    pub total_possible: Option<f64>,

    pub error_count: u32,
    pub last_error: Option<String>,

    /// User-supplied rubric; wins over anything fetched from the LMS
    pub uploaded_rubric: Option<Vec<RubricCriterion>>,
    /// Rubric last fetched from the LMS for the current target
    pub cached_rubric: Option<Vec<RubricCriterion>>,

    /// Cached submission for the current student
    pub submission_body: Option<String>,
    pub student_name: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge identifiers carried by an intent into the session. Applied
    /// once at the dispatch layer, never inside handlers. Changing
    /// target invalidates caches tied to the old one.
    pub fn absorb(&mut self, intent: &Intent) {
        match intent {
            Intent::ViewRubric {
                course_id,
                assignment_id,
            } => {
                self.set_assignment(course_id, assignment_id);
            }
            Intent::FetchSubmission {
                course_id,
                assignment_id,
                student_id,
            }
            | Intent::GradeSubmission {
                course_id,
                assignment_id,
                student_id,
            } => {
                self.set_assignment(course_id, assignment_id);
                if let Some(student) = student_id {
                    if self.student_id.as_deref() != Some(student.as_str()) {
                        self.student_id = Some(student.clone());
                        self.submission_body = None;
                        self.student_name = None;
                        self.current_grade = None;
                        self.current_feedback = None;
                        self.total_possible = None;
                    }
                }
            }
            _ => {}
        }
    }

    fn set_assignment(&mut self, course_id: &Option<String>, assignment_id: &Option<String>) {
        let changed = matches!(course_id, Some(c) if self.course_id.as_ref() != Some(c))
            || matches!(assignment_id, Some(a) if self.assignment_id.as_ref() != Some(a));

        if let Some(course) = course_id {
            self.course_id = Some(course.clone());
        }
        if let Some(assignment) = assignment_id {
            self.assignment_id = Some(assignment.clone());
        }
        if changed {
            self.cached_rubric = None;
        }
    }

    /// All three identifiers resolved
    pub fn has_target(&self) -> bool {
        self.course_id.is_some() && self.assignment_id.is_some() && self.student_id.is_some()
    }

    /// Drop grading-in-progress state after repeated failures.
    /// Resolved identifiers survive.
    pub fn clear_grading_progress(&mut self) {
        self.current_grade = None;
        self.current_feedback = None;
        self.total_possible = None;
        self.submission_body = None;
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
    }
}
