//! Program surveys and the reports built from them.

pub mod model;
pub mod top_classes;

pub use top_classes::{RankingBasis, TopClassesOptions, TopClassesReport, top_classes};
