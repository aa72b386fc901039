// src/engine/jump.rs

//! Reserved jump codes and page-type tags.
//!
//! The numeric values are stored in the database and referenced by other
//! integrations, so they must never change.

use serde::{Deserialize, Serialize};

use super::LessonError;

/// Raw values of the reserved jump codes.
pub mod codes {
    pub const THIS_PAGE: i64 = 0;
    pub const NEXT_PAGE: i64 = -1;
    pub const END_OF_LESSON: i64 = -9;
    pub const PREVIOUS_PAGE: i64 = -40;
    pub const UNSEEN_BRANCH_PAGE: i64 = -50;
    pub const RANDOM_PAGE: i64 = -60;
    pub const RANDOM_BRANCH: i64 = -70;
    pub const CLUSTER_JUMP: i64 = -80;
}

/// Raw values of the page-type tags.
pub mod page_types {
    pub const SHORT_ANSWER: i32 = 1;
    pub const TRUE_FALSE: i32 = 2;
    pub const MULTICHOICE: i32 = 3;
    pub const MATCHING: i32 = 5;
    pub const NUMERICAL: i32 = 8;
    pub const ESSAY: i32 = 10;
    pub const BRANCH_TABLE: i32 = 20;
    pub const END_OF_BRANCH: i32 = 21;
    pub const CLUSTER: i32 = 30;
    pub const END_OF_CLUSTER: i32 = 31;
}

/// Where an answer sends the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum Jump {
    ThisPage,
    NextPage,
    PreviousPage,
    EndOfLesson,
    /// A random page inside the enclosing branch table.
    RandomPage,
    /// A random branch table not yet viewed since the flagged one.
    RandomBranch,
    /// An unseen page inside the enclosing branch table.
    UnseenBranchPage,
    ClusterJump,
    Page(i64),
}

impl Jump {
    /// Every reserved code, in catalogue order.
    pub const RESERVED: [Jump; 8] = [
        Jump::ThisPage,
        Jump::NextPage,
        Jump::PreviousPage,
        Jump::EndOfLesson,
        Jump::RandomPage,
        Jump::RandomBranch,
        Jump::UnseenBranchPage,
        Jump::ClusterJump,
    ];

    pub fn code(self) -> i64 {
        match self {
            Jump::ThisPage => codes::THIS_PAGE,
            Jump::NextPage => codes::NEXT_PAGE,
            Jump::PreviousPage => codes::PREVIOUS_PAGE,
            Jump::EndOfLesson => codes::END_OF_LESSON,
            Jump::RandomPage => codes::RANDOM_PAGE,
            Jump::RandomBranch => codes::RANDOM_BRANCH,
            Jump::UnseenBranchPage => codes::UNSEEN_BRANCH_PAGE,
            Jump::ClusterJump => codes::CLUSTER_JUMP,
            Jump::Page(id) => id,
        }
    }

    pub fn is_reserved(self) -> bool {
        !matches!(self, Jump::Page(_))
    }

    pub fn name(self) -> &'static str {
        match self {
            Jump::ThisPage => "this_page",
            Jump::NextPage => "next_page",
            Jump::PreviousPage => "previous_page",
            Jump::EndOfLesson => "end_of_lesson",
            Jump::RandomPage => "random_page",
            Jump::RandomBranch => "random_branch",
            Jump::UnseenBranchPage => "unseen_branch_page",
            Jump::ClusterJump => "cluster_jump",
            Jump::Page(_) => "page",
        }
    }
}

impl From<Jump> for i64 {
    fn from(jump: Jump) -> Self {
        jump.code()
    }
}

impl TryFrom<i64> for Jump {
    type Error = LessonError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            codes::THIS_PAGE => Ok(Jump::ThisPage),
            codes::NEXT_PAGE => Ok(Jump::NextPage),
            codes::END_OF_LESSON => Ok(Jump::EndOfLesson),
            codes::PREVIOUS_PAGE => Ok(Jump::PreviousPage),
            codes::UNSEEN_BRANCH_PAGE => Ok(Jump::UnseenBranchPage),
            codes::RANDOM_PAGE => Ok(Jump::RandomPage),
            codes::RANDOM_BRANCH => Ok(Jump::RandomBranch),
            codes::CLUSTER_JUMP => Ok(Jump::ClusterJump),
            id if id > 0 => Ok(Jump::Page(id)),
            other => Err(LessonError::InvalidInput(format!(
                "unknown jump code {}",
                other
            ))),
        }
    }
}

/// The outcome of a navigation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum Destination {
    Page(i64),
    EndOfLesson,
}

impl Destination {
    /// Page id 0 is the chain boundary and means the lesson is over.
    pub fn from_page_id(page_id: i64) -> Self {
        if page_id > 0 {
            Destination::Page(page_id)
        } else {
            Destination::EndOfLesson
        }
    }

    pub fn page_id(self) -> Option<i64> {
        match self {
            Destination::Page(id) => Some(id),
            Destination::EndOfLesson => None,
        }
    }

    pub fn is_end(self) -> bool {
        matches!(self, Destination::EndOfLesson)
    }
}

impl From<Destination> for i64 {
    fn from(dest: Destination) -> Self {
        match dest {
            Destination::Page(id) => id,
            Destination::EndOfLesson => codes::END_OF_LESSON,
        }
    }
}

impl TryFrom<i64> for Destination {
    type Error = LessonError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            codes::END_OF_LESSON => Ok(Destination::EndOfLesson),
            id if id > 0 => Ok(Destination::Page(id)),
            other => Err(LessonError::InvalidInput(format!(
                "{} is not a destination",
                other
            ))),
        }
    }
}

/// Page variants: question subtypes and structural subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum PageKind {
    ShortAnswer,
    TrueFalse,
    MultiChoice,
    Matching,
    Numerical,
    Essay,
    BranchTable,
    EndOfBranch,
    Cluster,
    EndOfCluster,
}

impl PageKind {
    pub const ALL: [PageKind; 10] = [
        PageKind::ShortAnswer,
        PageKind::TrueFalse,
        PageKind::MultiChoice,
        PageKind::Matching,
        PageKind::Numerical,
        PageKind::Essay,
        PageKind::BranchTable,
        PageKind::EndOfBranch,
        PageKind::Cluster,
        PageKind::EndOfCluster,
    ];

    pub fn code(self) -> i32 {
        match self {
            PageKind::ShortAnswer => page_types::SHORT_ANSWER,
            PageKind::TrueFalse => page_types::TRUE_FALSE,
            PageKind::MultiChoice => page_types::MULTICHOICE,
            PageKind::Matching => page_types::MATCHING,
            PageKind::Numerical => page_types::NUMERICAL,
            PageKind::Essay => page_types::ESSAY,
            PageKind::BranchTable => page_types::BRANCH_TABLE,
            PageKind::EndOfBranch => page_types::END_OF_BRANCH,
            PageKind::Cluster => page_types::CLUSTER,
            PageKind::EndOfCluster => page_types::END_OF_CLUSTER,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PageKind::ShortAnswer => "short_answer",
            PageKind::TrueFalse => "true_false",
            PageKind::MultiChoice => "multichoice",
            PageKind::Matching => "matching",
            PageKind::Numerical => "numerical",
            PageKind::Essay => "essay",
            PageKind::BranchTable => "branch_table",
            PageKind::EndOfBranch => "end_of_branch",
            PageKind::Cluster => "cluster",
            PageKind::EndOfCluster => "end_of_cluster",
        }
    }

    pub fn is_question(self) -> bool {
        matches!(
            self,
            PageKind::ShortAnswer
                | PageKind::TrueFalse
                | PageKind::MultiChoice
                | PageKind::Matching
                | PageKind::Numerical
                | PageKind::Essay
        )
    }

    /// Markers and clusters are never displayed to learners.
    pub fn is_marker(self) -> bool {
        matches!(
            self,
            PageKind::EndOfBranch | PageKind::Cluster | PageKind::EndOfCluster
        )
    }

    pub fn requires_manual_grading(self) -> bool {
        matches!(self, PageKind::Essay)
    }
}

impl From<PageKind> for i32 {
    fn from(kind: PageKind) -> Self {
        kind.code()
    }
}

impl TryFrom<i32> for PageKind {
    type Error = LessonError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        PageKind::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .ok_or_else(|| LessonError::InvalidInput(format!("unknown page type {}", code)))
    }
}

/// One entry of the published code catalogue.
#[derive(Debug, Clone, Serialize)]
pub struct CodeEntry {
    pub name: &'static str,
    pub value: i64,
}

/// The stable catalogue of jump codes and page types.
#[derive(Debug, Clone, Serialize)]
pub struct CodeCatalogue {
    pub jumps: Vec<CodeEntry>,
    pub page_types: Vec<CodeEntry>,
}

pub fn catalogue() -> CodeCatalogue {
    CodeCatalogue {
        jumps: Jump::RESERVED
            .into_iter()
            .map(|jump| CodeEntry {
                name: jump.name(),
                value: jump.code(),
            })
            .collect(),
        page_types: PageKind::ALL
            .into_iter()
            .map(|kind| CodeEntry {
                name: kind.name(),
                value: i64::from(kind.code()),
            })
            .collect(),
    }
}
