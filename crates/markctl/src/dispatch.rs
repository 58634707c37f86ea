//! Intent dispatch - the session state machine
//!
//! Routes classified intents to handlers over the LMS gateway and the
//! LLM. Entity merging, precondition checks, error counting, and the
//! bounded retry all live here so no handler re-implements them.

use mark_common::canvas::LmsGateway;
use mark_common::errors::GraderError;
use mark_common::grading;
use mark_common::llm::{ChatMessage, LlmClient};
use mark_common::rubric::{self, RubricCriterion};

use crate::intent_router::{classify_with_llm, Intent};
use crate::session::SessionState;

/// Outcome of one chat turn
#[derive(Debug, PartialEq)]
pub enum Turn {
    Reply(String),
    Exit,
}

impl Turn {
    pub fn reply_text(&self) -> &str {
        match self {
            Turn::Reply(text) => text,
            Turn::Exit => "",
        }
    }
}

const RESTART_MESSAGE: &str = "I keep running into errors with this request. \
     Let's start over: tell me the course, assignment, and student again.";

/// Dispatcher over the two external capabilities. Holds no state of its
/// own; the session is threaded through every call.
pub struct Dispatcher<'a> {
    gateway: &'a dyn LmsGateway,
    llm: &'a dyn LlmClient,
}

impl<'a> Dispatcher<'a> {
    pub fn new(gateway: &'a dyn LmsGateway, llm: &'a dyn LlmClient) -> Self {
        Self { gateway, llm }
    }

    /// Classify one utterance and route it
    pub fn handle_utterance(&self, input: &str, session: &mut SessionState) -> Turn {
        let intent = classify_with_llm(self.llm, input);
        tracing::debug!(intent = intent.label(), "classified utterance");
        self.route(intent, session)
    }

    /// Merge entities, enforce preconditions, dispatch to the handler.
    /// Guidance for unmet preconditions is produced here, before any
    /// network call.
    pub fn route(&self, intent: Intent, session: &mut SessionState) -> Turn {
        session.absorb(&intent);

        match &intent {
            Intent::Exit => return Turn::Exit,

            Intent::ModifyGrade { .. } if session.current_grade.is_none() => {
                return Turn::Reply(
                    "Please grade a submission first before trying to modify the grade."
                        .to_string(),
                );
            }

            Intent::ModifyFeedback { .. }
                if session.current_feedback.is_none() && session.current_grade.is_none() =>
            {
                return Turn::Reply(
                    "Please grade a submission first before trying to modify the feedback."
                        .to_string(),
                );
            }

            Intent::SubmitGrade if !session.has_target() => {
                return Turn::Reply(
                    "Please grade a submission first before trying to submit to Canvas."
                        .to_string(),
                );
            }

            Intent::ViewRubric { .. }
                if session.course_id.is_none() || session.assignment_id.is_none() =>
            {
                return Turn::Reply(self.clarification("view_rubric", session));
            }

            Intent::FetchSubmission { .. } | Intent::GradeSubmission { .. }
                if !session.has_target() =>
            {
                return Turn::Reply(self.clarification(intent.label(), session));
            }

            Intent::Unknown(_) => {
                return Turn::Reply(self.clarification("unknown", session));
            }

            _ => {}
        }

        Turn::Reply(self.dispatch_with_retry(&intent, session))
    }

    /// Run the handler with the bounded-retry policy: every failure
    /// increments the session error count; while the count stays at or
    /// below 3 the same step gets one automatic retry; past 3 the count
    /// resets, grading progress clears (identifiers survive), and the
    /// user is asked to restart. Errors never escape as panics or
    /// terminate the conversation.
    fn dispatch_with_retry(&self, intent: &Intent, session: &mut SessionState) -> String {
        let mut retried = false;

        loop {
            match self.run_handler(intent, session) {
                Ok(reply) => {
                    session.error_count = 0;
                    session.last_error = None;
                    return reply;
                }
                Err(e) => {
                    tracing::warn!(intent = intent.label(), error = %e, "handler failed");
                    session.record_error(e.to_string());

                    if session.error_count > 3 {
                        session.error_count = 0;
                        session.clear_grading_progress();
                        return RESTART_MESSAGE.to_string();
                    }

                    if !retried && e.is_retryable() {
                        retried = true;
                        continue;
                    }

                    return format!("Something went wrong: {}", e);
                }
            }
        }
    }

    fn run_handler(
        &self,
        intent: &Intent,
        session: &mut SessionState,
    ) -> Result<String, GraderError> {
        match intent {
            Intent::ViewRubric { .. } => self.preview_rubric(session),
            Intent::LoadRubric { path } => self.load_rubric(path.as_deref(), session),
            Intent::FetchSubmission { .. } => self.fetch_submission(session),
            Intent::GradeSubmission { .. } => self.grade_submission(session),
            Intent::ModifyGrade { score } => self.modify_grade(*score, session),
            Intent::ModifyFeedback { feedback } => self.modify_feedback(feedback, session),
            Intent::SubmitGrade => self.submit_grade(session),
            Intent::ShowFeedback => Ok(self.show_feedback(session)),
            // Routed before dispatch
            Intent::Exit | Intent::Unknown(_) => Err(GraderError::UnknownIntent),
        }
    }

    fn require<'s>(
        value: &'s Option<String>,
        name: &'static str,
    ) -> Result<&'s str, GraderError> {
        value
            .as_deref()
            .ok_or_else(|| GraderError::MissingParameter(name.to_string()))
    }

    fn preview_rubric(&self, session: &mut SessionState) -> Result<String, GraderError> {
        let course = Self::require(&session.course_id, "course_id")?.to_string();
        let assignment = Self::require(&session.assignment_id, "assignment_id")?.to_string();

        let raw = self.gateway.fetch_rubric(&course, &assignment)?;
        if raw.is_empty() {
            return Ok("No rubric found for this assignment.".to_string());
        }

        session.cached_rubric = Some(rubric::normalize(&raw));

        Ok(format!(
            "Rubric for assignment {}:\n\n{}\n\n\
             Provide a student ID (course,assignment,student) to fetch a submission.",
            assignment,
            rubric::format_preview(&raw)
        ))
    }

    fn load_rubric(
        &self,
        path: Option<&str>,
        session: &mut SessionState,
    ) -> Result<String, GraderError> {
        let path = match path {
            Some(path) => path,
            None => {
                return Ok(
                    "Please provide the rubric file path: 'load rubric <path>'".to_string()
                )
            }
        };

        let content = std::fs::read_to_string(path)
            .map_err(|e| GraderError::Parse(format!("could not read {}: {}", path, e)))?;

        let records = match serde_json::from_str::<Vec<serde_json::Value>>(&content) {
            Ok(records) => records,
            // Not JSON: have the LLM restructure the text into the
            // canonical upload shape
            Err(_) => self.restructure_rubric_text(&content)?,
        };

        let criteria = rubric::normalize(&records);
        if criteria.is_empty() {
            return Err(GraderError::Parse(format!(
                "no usable rubric criteria in {}",
                path
            )));
        }

        let total: f64 = criteria.iter().map(|c| c.max_points).sum();
        let count = criteria.len();
        session.uploaded_rubric = Some(criteria);

        Ok(format!(
            "Loaded rubric with {} criteria ({} points total). \
             It will be used instead of the Canvas rubric when grading.",
            count, total
        ))
    }

    /// Run free-form rubric text through the LLM to get upload-shape
    /// records. The reply must deserialize as a JSON array; anything
    /// else is a parse error.
    fn restructure_rubric_text(
        &self,
        content: &str,
    ) -> Result<Vec<serde_json::Value>, GraderError> {
        const SYSTEM: &str = "\
Convert the following rubric text into a structured JSON format suitable for grading. The format should be:
[{
    \"description\": \"Criterion Name\",
    \"points\": points_value,
    \"long_description\": \"Detailed description of the criterion\",
    \"ratings\": [
        {\"description\": \"Level name\", \"points\": points_value}
    ]
}]

Extract the criteria, point values, and rating levels from the text. If point values are not explicit, make reasonable assignments based on the content. Respond with the JSON array only.";

        let reply = self
            .llm
            .complete(&[ChatMessage::system(SYSTEM), ChatMessage::user(content)])
            .map_err(|e| GraderError::Parse(format!("rubric restructuring failed: {}", e)))?;

        serde_json::from_str(strip_code_fences(&reply))
            .map_err(|e| GraderError::Parse(format!("restructured rubric is not valid JSON: {}", e)))
    }

    fn fetch_submission(&self, session: &mut SessionState) -> Result<String, GraderError> {
        let course = Self::require(&session.course_id, "course_id")?.to_string();
        let assignment = Self::require(&session.assignment_id, "assignment_id")?.to_string();
        let student = Self::require(&session.student_id, "student_id")?.to_string();

        let submissions = self.gateway.fetch_submissions(&course, &assignment)?;
        let submission = submissions
            .into_iter()
            .find(|s| s.user_id.to_string() == student);

        let submission = match submission {
            Some(submission) => submission,
            None => return Ok("No submission found for the specified student.".to_string()),
        };

        let name = if submission.user.name.is_empty() {
            "Unknown".to_string()
        } else {
            submission.user.name.clone()
        };
        let body = submission.body.unwrap_or_default();

        session.student_name = Some(name.clone());

        if body.trim().is_empty() {
            return Ok(format!("The submission from {} is empty.", name));
        }

        session.submission_body = Some(body.clone());

        Ok(format!(
            "Submission from {}:\n\n{}\n\n\
             Say 'grade this submission' when you want me to score it.",
            name, body
        ))
    }

    /// Rubric resolution order: user upload, then the session cache,
    /// then Canvas, then the built-in single-criterion fallback.
    fn resolve_rubric(
        &self,
        session: &mut SessionState,
    ) -> Result<Vec<RubricCriterion>, GraderError> {
        if let Some(uploaded) = &session.uploaded_rubric {
            return Ok(uploaded.clone());
        }
        if let Some(cached) = &session.cached_rubric {
            return Ok(cached.clone());
        }

        let course = Self::require(&session.course_id, "course_id")?;
        let assignment = Self::require(&session.assignment_id, "assignment_id")?;
        let raw = self.gateway.fetch_rubric(course, assignment)?;
        let criteria = rubric::normalize(&raw);

        if criteria.is_empty() {
            tracing::info!("no rubric resolved, falling back to the default");
            return Ok(rubric::default_rubric());
        }

        session.cached_rubric = Some(criteria.clone());
        Ok(criteria)
    }

    fn grade_submission(&self, session: &mut SessionState) -> Result<String, GraderError> {
        if session.submission_body.is_none() {
            // Fetch quietly; the reply below carries the result
            let course = Self::require(&session.course_id, "course_id")?.to_string();
            let assignment = Self::require(&session.assignment_id, "assignment_id")?.to_string();
            let student = Self::require(&session.student_id, "student_id")?.to_string();

            let submissions = self.gateway.fetch_submissions(&course, &assignment)?;
            match submissions
                .into_iter()
                .find(|s| s.user_id.to_string() == student)
            {
                Some(submission) => {
                    session.student_name = Some(if submission.user.name.is_empty() {
                        "Unknown".to_string()
                    } else {
                        submission.user.name
                    });
                    session.submission_body = submission.body;
                }
                None => {
                    return Ok("No submission found for the specified student.".to_string())
                }
            }
        }

        let body = match session.submission_body.as_deref() {
            Some(body) if !body.trim().is_empty() => body.to_string(),
            _ => return Ok("The submission is empty; there is nothing to grade.".to_string()),
        };

        let criteria = self.resolve_rubric(session)?;
        let result = grading::grade_submission(self.llm, &body, &criteria);

        session.current_grade = Some(result.total_awarded);
        session.current_feedback = Some(result.feedback_text());
        session.total_possible = Some(result.total_possible);

        let name = session.student_name.clone().unwrap_or_else(|| "Unknown".to_string());

        Ok(format!(
            "Grade for {}:\n{}\n\nFeedback:\n{}\n\n\
             Next steps:\n\
             1. To modify the grade, type: 'modify grade score: XX'\n\
             2. To modify feedback, type: 'feedback: your new feedback'\n\
             3. To submit this grade to Canvas, type: 'submit grade to canvas'\n\
             4. To grade another submission, provide a new student ID",
            name,
            result.summary_line(),
            result.feedback_text()
        ))
    }

    fn modify_grade(
        &self,
        score: Option<f64>,
        session: &mut SessionState,
    ) -> Result<String, GraderError> {
        let score = match score {
            Some(score) => score,
            None => {
                return Ok(
                    "Please specify the new score: 'modify grade score: XX'".to_string()
                )
            }
        };

        let max = session.total_possible.unwrap_or(100.0);
        if score < 0.0 || score > max {
            return Ok(format!("Score must be between 0 and {:.0}.", max));
        }

        session.current_grade = Some(score);
        let score_line = format!("Overall Score: {:.2}/{:.0}", score, max);

        // Keep the score line in the feedback consistent with the override
        session.current_feedback = Some(match session.current_feedback.take() {
            Some(feedback) => {
                let mut lines: Vec<&str> = feedback.lines().collect();
                if lines.first().is_some_and(|l| l.starts_with("Overall Score:")) {
                    lines.remove(0);
                    format!("{}\n{}", score_line, lines.join("\n"))
                } else {
                    format!("{}\n{}", score_line, feedback)
                }
            }
            None => score_line.clone(),
        });

        let name = session.student_name.clone().unwrap_or_else(|| "the student".to_string());
        Ok(format!(
            "Score updated to {:.2}/{:.0} for {}.\n\nCurrent feedback:\n{}\n\n\
             Options:\n\
             - To modify feedback: 'feedback: your new feedback'\n\
             - To submit to Canvas: 'submit grade to canvas'",
            score,
            max,
            name,
            session.current_feedback.as_deref().unwrap_or("")
        ))
    }

    fn modify_feedback(
        &self,
        feedback: &str,
        session: &mut SessionState,
    ) -> Result<String, GraderError> {
        if feedback.trim().is_empty() {
            return Ok("Please provide the new feedback text.".to_string());
        }

        let new_feedback = match session.current_grade {
            Some(grade) => format!(
                "Overall Score: {:.2}/{:.0}\n\n{}",
                grade,
                session.total_possible.unwrap_or(100.0),
                feedback
            ),
            None => feedback.to_string(),
        };

        session.current_feedback = Some(new_feedback.clone());

        let name = session.student_name.clone().unwrap_or_else(|| "the student".to_string());
        Ok(format!(
            "Feedback updated for {}:\n{}\n\n\
             Options:\n\
             - To modify score: 'modify grade score: XX'\n\
             - To submit to Canvas: 'submit grade to canvas'",
            name, new_feedback
        ))
    }

    fn show_feedback(&self, session: &SessionState) -> String {
        if session.current_grade.is_none() && session.current_feedback.is_none() {
            return "No feedback available. Please grade a submission first.".to_string();
        }

        let name = session.student_name.as_deref().unwrap_or("the student");
        let mut parts = vec![format!("Current grade and feedback for {}:", name)];

        if let Some(grade) = session.current_grade {
            parts.push(format!(
                "Grade: {:.2}/{:.0}",
                grade,
                session.total_possible.unwrap_or(100.0)
            ));
        }

        parts.push(format!(
            "Feedback:\n{}",
            session.current_feedback.as_deref().unwrap_or("No feedback provided")
        ));
        parts.push(
            "Options:\n\
             - To modify score: 'modify grade score: XX'\n\
             - To modify feedback: 'feedback: your new feedback'\n\
             - To submit to Canvas: 'submit grade to canvas'"
                .to_string(),
        );

        parts.join("\n\n")
    }

    fn submit_grade(&self, session: &mut SessionState) -> Result<String, GraderError> {
        let course = Self::require(&session.course_id, "course_id")?;
        let assignment = Self::require(&session.assignment_id, "assignment_id")?;
        let student = Self::require(&session.student_id, "student_id")?;

        let grade = match session.current_grade {
            Some(grade) => grade,
            None => {
                return Ok("No grade to submit. Please grade the submission first.".to_string())
            }
        };
        let feedback = session.current_feedback.clone().unwrap_or_default();

        let confirmation =
            self.gateway
                .post_grade(student, course, assignment, grade, &feedback)?;

        Ok(format!(
            "{}\nGrade {:.2} is now recorded in Canvas for student {}.",
            confirmation, grade, student
        ))
    }

    /// Ask the LLM for a clarification message when identifiers are
    /// missing or the intent is unclear. Falls back to a fixed prompt
    /// when the LLM itself is unavailable.
    fn clarification(&self, intent: &str, session: &SessionState) -> String {
        const SYSTEM: &str = "\
You are a helpful AI grading assistant.
Generate a natural response based on the context provided.
Keep responses concise but friendly and informative.
If there's an error, explain what information is needed.";

        let context = serde_json::json!({
            "intent": intent,
            "course_id": session.course_id,
            "assignment_id": session.assignment_id,
            "student_id": session.student_id,
            "success": false,
            "error": session.last_error,
        });

        match self
            .llm
            .complete(&[ChatMessage::system(SYSTEM), ChatMessage::user(context.to_string())])
        {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!("clarification generation failed: {}", e);
                "I need a bit more information. Tell me the course and assignment \
                 (for the rubric) or course, assignment, and student IDs \
                 (to fetch a submission), e.g. '121,473' or '121,473,247'."
                    .to_string()
            }
        }
    }
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}
