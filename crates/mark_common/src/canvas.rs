//! Canvas LMS gateway
//!
//! The three REST operations the assistant needs: list submissions for
//! an assignment, fetch an assignment's rubric, and post a grade with
//! feedback. Behind a trait so the dispatch layer can be tested against
//! a scripted fake.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::CanvasSettings;
use crate::errors::GraderError;

/// Submission author as Canvas returns it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionUser {
    #[serde(default)]
    pub name: String,
}

/// One student submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub user_id: u64,
    /// Text body of an online-text-entry submission; absent for other types
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub user: SubmissionUser,
}

/// LMS operations consumed by the dispatch layer
pub trait LmsGateway: Send + Sync {
    /// List submissions for an assignment
    fn fetch_submissions(
        &self,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<Submission>, GraderError>;

    /// Fetch the raw rubric records attached to an assignment.
    /// Returns an empty list when the assignment has no rubric.
    fn fetch_rubric(
        &self,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<Value>, GraderError>;

    /// Post a grade and feedback comment for one student
    fn post_grade(
        &self,
        user_id: &str,
        course_id: &str,
        assignment_id: &str,
        grade: f64,
        feedback: &str,
    ) -> Result<String, GraderError>;
}

/// Real gateway over the Canvas REST API
pub struct CanvasClient {
    settings: CanvasSettings,
    client: reqwest::blocking::Client,
}

impl CanvasClient {
    pub fn new(settings: CanvasSettings) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create HTTP client: {}", e))?;

        Ok(Self { settings, client })
    }

    fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::blocking::Response, GraderError> {
        self.client
            .get(url)
            .bearer_auth(&self.settings.access_token)
            .query(query)
            .send()
            .map_err(|e| self.map_transport_error(e))
    }

    fn map_transport_error(&self, e: reqwest::Error) -> GraderError {
        if e.is_timeout() {
            GraderError::Timeout(self.settings.timeout_secs)
        } else {
            GraderError::Network(format!("request failed: {}", e))
        }
    }

    /// Canvas reports an expired token as a 401 with an error message in
    /// the body. Surface that as an auth error with a renewal hint.
    fn check_auth(&self, response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, GraderError> {
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body: Value = response.json().unwrap_or(Value::Null);
        let message = body
            .get("errors")
            .and_then(Value::as_array)
            .and_then(|errors| errors.first())
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("unknown error");

        if message.to_lowercase().contains("expired") {
            Err(GraderError::Auth(
                "your Canvas API token has expired; generate a new token in Canvas settings"
                    .to_string(),
            ))
        } else {
            Err(GraderError::Auth(format!(
                "failed to authenticate with Canvas: {}",
                message
            )))
        }
    }
}

impl LmsGateway for CanvasClient {
    fn fetch_submissions(
        &self,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<Submission>, GraderError> {
        let url = format!(
            "{}/courses/{}/assignments/{}/submissions",
            self.settings.base_url, course_id, assignment_id
        );

        let response = self.get(&url, &[("per_page", "100"), ("include[]", "user")])?;
        let response = self.check_auth(response)?;

        if !response.status().is_success() {
            return Err(GraderError::Network(format!(
                "HTTP {} fetching submissions",
                response.status()
            )));
        }

        response
            .json()
            .map_err(|e| GraderError::Parse(format!("bad submission payload: {}", e)))
    }

    fn fetch_rubric(
        &self,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<Value>, GraderError> {
        let url = format!(
            "{}/courses/{}/assignments/{}",
            self.settings.base_url, course_id, assignment_id
        );

        let response = self.get(&url, &[("include[]", "rubric")])?;
        let response = self.check_auth(response)?;

        if !response.status().is_success() {
            return Err(GraderError::Network(format!(
                "HTTP {} fetching assignment",
                response.status()
            )));
        }

        let assignment: Value = response
            .json()
            .map_err(|e| GraderError::Parse(format!("bad assignment payload: {}", e)))?;

        Ok(assignment
            .get("rubric")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    fn post_grade(
        &self,
        user_id: &str,
        course_id: &str,
        assignment_id: &str,
        grade: f64,
        feedback: &str,
    ) -> Result<String, GraderError> {
        let url = format!(
            "{}/courses/{}/assignments/{}/submissions/{}",
            self.settings.base_url, course_id, assignment_id, user_id
        );

        let params = [
            ("comment[text_comment]", feedback.to_string()),
            ("submission[posted_grade]", grade.to_string()),
        ];

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.settings.access_token)
            .form(&params)
            .send()
            .map_err(|e| self.map_transport_error(e))?;
        let response = self.check_auth(response)?;

        let status = response.status();
        if status.is_success() {
            Ok(format!("Submitted grade and feedback for user {}.", user_id))
        } else {
            let body = response.text().unwrap_or_default();
            Err(GraderError::Network(format!(
                "Canvas responded with {}: {}",
                status, body
            )))
        }
    }
}

/// Scripted gateway for tests. Each operation records its calls and
/// returns pre-loaded results.
#[derive(Default)]
pub struct FakeGateway {
    pub submissions: Vec<Submission>,
    pub rubric: Vec<Value>,
    pub post_result: Option<Result<String, GraderError>>,
    calls: std::sync::Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_submissions(mut self, submissions: Vec<Submission>) -> Self {
        self.submissions = submissions;
        self
    }

    pub fn with_rubric(mut self, rubric: Vec<Value>) -> Self {
        self.rubric = rubric;
        self
    }

    pub fn with_post_result(mut self, result: Result<String, GraderError>) -> Self {
        self.post_result = Some(result);
        self
    }

    /// Names of the operations invoked, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }
}

impl LmsGateway for FakeGateway {
    fn fetch_submissions(
        &self,
        _course_id: &str,
        _assignment_id: &str,
    ) -> Result<Vec<Submission>, GraderError> {
        self.record("fetch_submissions");
        Ok(self.submissions.clone())
    }

    fn fetch_rubric(
        &self,
        _course_id: &str,
        _assignment_id: &str,
    ) -> Result<Vec<Value>, GraderError> {
        self.record("fetch_rubric");
        Ok(self.rubric.clone())
    }

    fn post_grade(
        &self,
        user_id: &str,
        _course_id: &str,
        _assignment_id: &str,
        _grade: f64,
        _feedback: &str,
    ) -> Result<String, GraderError> {
        self.record("post_grade");
        match &self.post_result {
            Some(result) => result.clone(),
            None => Ok(format!("Submitted grade and feedback for user {}.", user_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_deserialization() {
        let json = r#"{"user_id": 247, "body": "My essay", "user": {"name": "Ada"}}"#;
        let sub: Submission = serde_json::from_str(json).unwrap();
        assert_eq!(sub.user_id, 247);
        assert_eq!(sub.body.as_deref(), Some("My essay"));
        assert_eq!(sub.user.name, "Ada");
    }

    #[test]
    fn test_submission_missing_optional_fields() {
        let json = r#"{"user_id": 247}"#;
        let sub: Submission = serde_json::from_str(json).unwrap();
        assert!(sub.body.is_none());
        assert!(sub.user.name.is_empty());
    }

    #[test]
    fn test_fake_gateway_records_calls() {
        let gateway = FakeGateway::new();
        gateway.fetch_submissions("1", "2").unwrap();
        gateway.fetch_rubric("1", "2").unwrap();
        assert_eq!(gateway.calls(), vec!["fetch_submissions", "fetch_rubric"]);
    }
}
