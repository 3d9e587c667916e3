//! Persisted recipient filters.
//!
//! A filter stores a [`UserQuery`] as JSON so the same recipient set can be
//! re-materialized whenever a message request is previewed or sent.

use serde::{Deserialize, Serialize};

use crate::program::Audience;

/// A reusable description of a set of users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserQuery {
    /// Every user on the site.
    All,
    /// Users with the given ids.
    Ids { ids: Vec<i64> },
    /// Users with the given usernames.
    Usernames { usernames: Vec<String> },
    /// Members enrolled in a class, optionally restricted to one section.
    Section {
        class_id: i64,
        #[serde(default)]
        section_index: Option<i64>,
        audience: Audience,
    },
}

/// A stored, named recipient filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientFilter {
    pub id: i64,
    pub name: String,
    pub query: UserQuery,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_json_is_tagged() {
        let q = UserQuery::Usernames {
            usernames: vec!["user1".into(), "user2".into()],
        };
        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["kind"], "usernames");
        assert_eq!(json["usernames"][1], "user2");
    }

    #[test]
    fn section_query_defaults_to_whole_class() {
        let q: UserQuery =
            serde_json::from_str(r#"{"kind":"section","class_id":3,"audience":"students"}"#)
                .unwrap();
        assert_eq!(
            q,
            UserQuery::Section {
                class_id: 3,
                section_index: None,
                audience: Audience::Students,
            }
        );
    }
}
