//! Program classes, sections, and enrollments.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A class offered in a program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassRecord {
    pub id: i64,
    pub program_code: String,
    pub title: String,
}

/// One scheduled section of a class. `idx` is 1-based within the class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub id: i64,
    pub class_id: i64,
    pub idx: i64,
}

/// How a user participates in a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentRole {
    Student,
    Teacher,
}

impl EnrollmentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentRole::Student => "student",
            EnrollmentRole::Teacher => "teacher",
        }
    }
}

/// Which enrolled members a class or section list addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Students,
    Teachers,
    /// Students and teachers together.
    Class,
}

impl Audience {
    /// Roles included in this audience.
    pub fn roles(&self) -> &'static [EnrollmentRole] {
        match self {
            Audience::Students => &[EnrollmentRole::Student],
            Audience::Teachers => &[EnrollmentRole::Teacher],
            Audience::Class => &[EnrollmentRole::Student, EnrollmentRole::Teacher],
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Audience::Students => "students",
            Audience::Teachers => "teachers",
            Audience::Class => "class",
        })
    }
}

impl FromStr for Audience {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "students" => Ok(Audience::Students),
            "teachers" => Ok(Audience::Teachers),
            "class" => Ok(Audience::Class),
            other => Err(format!("unknown audience: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_audience_covers_both_roles() {
        assert_eq!(
            Audience::Class.roles(),
            &[EnrollmentRole::Student, EnrollmentRole::Teacher]
        );
        assert_eq!(Audience::Teachers.roles(), &[EnrollmentRole::Teacher]);
    }

    #[test]
    fn audience_parses_list_suffix() {
        assert_eq!("teachers".parse::<Audience>().unwrap(), Audience::Teachers);
        assert!("parents".parse::<Audience>().is_err());
    }
}
