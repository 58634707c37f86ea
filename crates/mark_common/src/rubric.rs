//! Rubric normalization and display
//!
//! Canvas returns rubric criteria in one shape, user uploads arrive in
//! another. Both are folded into one canonical ordered list here so the
//! scorer never has to care where a rubric came from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One normalized rubric criterion. Immutable once built; source order
/// is preserved and titles are not guaranteed unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricCriterion {
    pub title: String,
    pub description: String,
    pub max_points: f64,
}

/// Normalize raw rubric records into an ordered criterion list.
///
/// Accepts both the Canvas API shape (`criterion_description` /
/// `description`, `long_description`, `points`) and the upload shape
/// (`description`, `long_description`, `points`, optional `ratings`).
/// A record that cannot be read is skipped with a warning; empty input
/// yields an empty list.
pub fn normalize(records: &[Value]) -> Vec<RubricCriterion> {
    let mut criteria = Vec::with_capacity(records.len());

    for (idx, record) in records.iter().enumerate() {
        if !record.is_object() {
            tracing::warn!("skipping rubric record {}: not an object", idx);
            continue;
        }

        let title = non_empty_str(record, "criterion_description")
            .or_else(|| non_empty_str(record, "description"))
            .unwrap_or("Untitled");

        let description = non_empty_str(record, "long_description")
            .or_else(|| non_empty_str(record, "description"))
            .unwrap_or("No description provided");

        let max_points = record.get("points").and_then(Value::as_f64).unwrap_or(0.0);

        if max_points < 0.0 {
            tracing::warn!("skipping rubric record {}: negative points", idx);
            continue;
        }

        criteria.push(RubricCriterion {
            title: title.to_string(),
            description: description.to_string(),
            max_points,
        });
    }

    criteria
}

fn non_empty_str<'a>(record: &'a Value, key: &str) -> Option<&'a str> {
    record
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Fallback rubric used when nothing can be resolved from an upload,
/// the session cache, or Canvas. Lets grading proceed on a single
/// holistic criterion.
pub fn default_rubric() -> Vec<RubricCriterion> {
    vec![RubricCriterion {
        title: "Overall Assessment".to_string(),
        description: "Evaluate the submission based on:\n\
                      - Content quality and depth\n\
                      - Organization and clarity\n\
                      - Evidence and support\n\
                      - Writing mechanics and style"
            .to_string(),
        max_points: 100.0,
    }]
}

/// Render raw rubric records for the chat surface: total points header,
/// bullet lines (Canvas embeds `<br/>` separators in descriptions), and
/// rating levels when the record carries them.
pub fn format_preview(records: &[Value]) -> String {
    let mut output = Vec::new();
    let mut total_points = 0.0;

    for record in records {
        let title = non_empty_str(record, "criterion_description")
            .or_else(|| non_empty_str(record, "description"))
            .unwrap_or("Untitled");
        let points = record.get("points").and_then(Value::as_f64).unwrap_or(0.0);
        total_points += points;

        output.push(format!("\n{} ({} points)", title, points));

        if let Some(description) = non_empty_str(record, "long_description") {
            for part in description.split("<br/>") {
                let part = part.trim();
                if !part.is_empty() {
                    output.push(format!("  - {}", part));
                }
            }
        }

        if let Some(ratings) = record.get("ratings").and_then(Value::as_array) {
            output.push("\n  Rating levels:".to_string());
            for rating in ratings {
                let desc = rating
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let pts = rating.get("points").and_then(Value::as_f64).unwrap_or(0.0);
                output.push(format!("  - {}: {} points", desc, pts));
            }
        }
    }

    output.insert(0, format!("Total points: {}", total_points));
    output.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_api_shape() {
        let records = vec![json!({
            "criterion_description": "Thesis",
            "long_description": "Clear and arguable thesis statement",
            "points": 25,
        })];

        let criteria = normalize(&records);
        assert_eq!(criteria.len(), 1);
        assert_eq!(criteria[0].title, "Thesis");
        assert_eq!(criteria[0].description, "Clear and arguable thesis statement");
        assert_eq!(criteria[0].max_points, 25.0);
    }

    #[test]
    fn test_normalize_upload_shape() {
        let records = vec![json!({
            "description": "Evidence",
            "points": 20,
            "ratings": [{"description": "Excellent", "points": 20}],
        })];

        let criteria = normalize(&records);
        assert_eq!(criteria[0].title, "Evidence");
        // description field doubles as the long description
        assert_eq!(criteria[0].description, "Evidence");
        assert_eq!(criteria[0].max_points, 20.0);
    }

    #[test]
    fn test_normalize_missing_points_is_zero() {
        let records = vec![json!({"description": "Style"})];
        let criteria = normalize(&records);
        assert_eq!(criteria[0].max_points, 0.0);
    }

    #[test]
    fn test_normalize_missing_title_and_description() {
        let records = vec![json!({"points": 10})];
        let criteria = normalize(&records);
        assert_eq!(criteria[0].title, "Untitled");
        assert_eq!(criteria[0].description, "No description provided");
    }

    #[test]
    fn test_normalize_skips_malformed_records() {
        let records = vec![
            json!("not an object"),
            json!({"description": "Valid", "points": 5}),
            json!(null),
        ];

        let criteria = normalize(&records);
        assert_eq!(criteria.len(), 1);
        assert_eq!(criteria[0].title, "Valid");
    }

    #[test]
    fn test_normalize_empty_input() {
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn test_normalize_preserves_source_order() {
        let records = vec![
            json!({"description": "B", "points": 1}),
            json!({"description": "A", "points": 2}),
        ];
        let criteria = normalize(&records);
        assert_eq!(criteria[0].title, "B");
        assert_eq!(criteria[1].title, "A");
    }

    #[test]
    fn test_default_rubric() {
        let rubric = default_rubric();
        assert_eq!(rubric.len(), 1);
        assert_eq!(rubric[0].title, "Overall Assessment");
        assert_eq!(rubric[0].max_points, 100.0);
    }

    #[test]
    fn test_format_preview_totals_and_ratings() {
        let records = vec![json!({
            "description": "Thesis",
            "long_description": "Part one<br/>Part two",
            "points": 25,
            "ratings": [{"description": "Good", "points": 20}],
        })];

        let text = format_preview(&records);
        assert!(text.starts_with("Total points: 25"));
        assert!(text.contains("Thesis (25 points)"));
        assert!(text.contains("- Part one"));
        assert!(text.contains("- Good: 20 points"));
    }
}
