//! "Top classes" report over survey answers.
//!
//! A numeric overall-rating question ranks classes by mean rating. Surveys
//! without one can rank by Favorite Class tallies instead. A survey with
//! both still ranks by rating.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::model::{Answer, Question};
use crate::error::DatabaseError;
use crate::store::Database;

/// Which question's answers fed the ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingBasis {
    OverallRating,
    FavoriteClass,
    None,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TopClassesOptions {
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Classes whose mean rating is below this are left out. Ignored for tallies.
    #[serde(default)]
    pub min_rating: f64,
}

fn default_limit() -> usize {
    20
}

impl Default for TopClassesOptions {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            min_rating: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassRanking {
    pub class_id: i64,
    pub title: String,
    /// Mean rating, or number of votes for Favorite Class.
    pub score: f64,
    /// Answers counted toward this class.
    pub responses: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopClassesReport {
    pub survey_id: i64,
    pub basis: RankingBasis,
    pub question_id: Option<i64>,
    pub classes: Vec<ClassRanking>,
}

/// Choose the question to rank by: overall rating first, then Favorite Class.
pub fn select_ranking_question(questions: &[Question]) -> Option<(RankingBasis, &Question)> {
    questions
        .iter()
        .find(|q| q.is_overall_rating())
        .map(|q| (RankingBasis::OverallRating, q))
        .or_else(|| {
            questions
                .iter()
                .find(|q| q.is_favorite_class())
                .map(|q| (RankingBasis::FavoriteClass, q))
        })
}

/// A finite number, or `None`. "NaN" and "inf" parse as floats but are not ratings.
fn parse_rating(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|r| r.is_finite())
}

/// Mean numeric rating per class. Non-numeric answers and answers without a class are ignored.
fn mean_ratings(answers: &[Answer]) -> BTreeMap<i64, (f64, usize)> {
    let mut totals: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for answer in answers {
        let (Some(class_id), Some(rating)) = (answer.class_id, parse_rating(&answer.value)) else {
            continue;
        };
        let entry = totals.entry(class_id).or_default();
        entry.0 += rating;
        entry.1 += 1;
    }
    totals
        .into_iter()
        .map(|(id, (sum, n))| (id, (sum / n as f64, n)))
        .collect()
}

/// Votes per class. The class is the answer's `class_id`, else its value parsed as an id.
fn favorite_tallies(answers: &[Answer]) -> BTreeMap<i64, (f64, usize)> {
    let mut votes: BTreeMap<i64, usize> = BTreeMap::new();
    for answer in answers {
        let class_id = answer
            .class_id
            .or_else(|| answer.value.trim().parse::<i64>().ok());
        match class_id {
            Some(id) => *votes.entry(id).or_default() += 1,
            None => debug!(answer_id = answer.id, "Favorite Class answer names no class"),
        }
    }
    votes
        .into_iter()
        .map(|(id, n)| (id, (n as f64, n)))
        .collect()
}

/// Build the top-classes report for a survey.
pub async fn top_classes(
    db: &dyn Database,
    survey_id: i64,
    options: &TopClassesOptions,
) -> Result<TopClassesReport, DatabaseError> {
    if db.get_survey(survey_id).await?.is_none() {
        return Err(DatabaseError::NotFound {
            entity: "survey".into(),
            id: survey_id.to_string(),
        });
    }

    let questions = db.list_questions(survey_id).await?;
    let Some((basis, question)) = select_ranking_question(&questions) else {
        return Ok(TopClassesReport {
            survey_id,
            basis: RankingBasis::None,
            question_id: None,
            classes: Vec::new(),
        });
    };

    let answers = db.list_answers(question.id).await?;
    let scores: BTreeMap<i64, (f64, usize)> = match basis {
        RankingBasis::OverallRating => mean_ratings(&answers)
            .into_iter()
            .filter(|(_, (mean, _))| *mean >= options.min_rating)
            .collect(),
        _ => favorite_tallies(&answers),
    };

    // BTreeMap iteration is by class id, so a stable sort keeps ties in id order.
    let mut ranked: Vec<(i64, (f64, usize))> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.total_cmp(&a.1.0));

    let mut classes = Vec::new();
    for (class_id, (score, responses)) in ranked {
        if classes.len() >= options.limit {
            break;
        }
        match db.get_class(class_id).await? {
            Some(class) => classes.push(ClassRanking {
                class_id,
                title: class.title,
                score,
                responses,
            }),
            None => warn!(class_id, survey_id, "Survey answer references unknown class"),
        }
    }

    Ok(TopClassesReport {
        survey_id,
        basis,
        question_id: Some(question.id),
        classes,
    })
}
