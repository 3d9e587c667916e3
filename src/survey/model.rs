//! Survey entities.

use serde::Serialize;

/// Name of the seeded question type whose answers name a preferred class.
pub const FAVORITE_CLASS: &str = "Favorite Class";

/// Name of the seeded numeric rating question type.
pub const NUMERIC_RATING: &str = "Numeric Rating";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionType {
    pub id: i64,
    pub name: String,
    pub is_numeric: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Survey {
    pub id: i64,
    pub name: String,
    pub program_code: String,
}

/// A survey question joined with its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub id: i64,
    pub survey_id: i64,
    pub name: String,
    pub seq: i64,
    pub question_type: QuestionType,
}

impl Question {
    pub fn is_favorite_class(&self) -> bool {
        self.question_type.name == FAVORITE_CLASS
    }

    /// A numeric question asking for an overall rating of a class.
    pub fn is_overall_rating(&self) -> bool {
        self.question_type.is_numeric && self.name.to_lowercase().contains("overall")
    }
}

/// One answer to one question within a survey response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub id: i64,
    pub response_id: i64,
    pub question_id: i64,
    /// Class the answer is about, for per-class questions.
    pub class_id: Option<i64>,
    pub value: String,
}
