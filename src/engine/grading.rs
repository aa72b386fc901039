// src/engine/grading.rs

use std::collections::BTreeMap;

use serde::Serialize;

use super::{graph::PageGraph, jump::PageKind};
use crate::models::{
    attempt::{Attempt, EssayPayload, Grade},
    lesson::Lesson,
};

/// Score summary of one retry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GradeInfo {
    /// Distinct question pages with at least one counted attempt.
    pub questions_answered: i64,
    /// Counted attempts after per-page truncation.
    pub attempts_viewed: i64,
    /// Possible points.
    pub total: i64,
    pub earned: i64,
    /// 0 to 100, rounded to 5 decimals.
    pub percentage: f64,
    /// Essays that need (or needed) a teacher's mark.
    pub manual_count: i64,
    /// Points carried by those essays.
    pub manual_points: i64,
}

fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

fn essay_score(attempt: &Attempt) -> i64 {
    attempt
        .useranswer
        .as_deref()
        .and_then(|raw| serde_json::from_str::<EssayPayload>(raw).ok())
        .map(|payload| payload.score)
        .unwrap_or(0)
}

/// Grades one retry's attempts.
///
/// Attempts on pages that are no longer in the lesson are ignored. With
/// `maxattempts > 0` only the first `maxattempts` attempts per page count.
pub fn grade(lesson: &Lesson, graph: &PageGraph, attempts: &[Attempt]) -> GradeInfo {
    let mut by_page: BTreeMap<i64, Vec<&Attempt>> = BTreeMap::new();
    for attempt in attempts {
        if graph.contains(attempt.page_id) {
            by_page.entry(attempt.page_id).or_default().push(attempt);
        }
    }
    for list in by_page.values_mut() {
        list.sort_by(|a, b| a.timeseen.cmp(&b.timeseen).then(a.id.cmp(&b.id)));
        if lesson.maxattempts > 0 {
            list.truncate(lesson.maxattempts as usize);
        }
    }

    let mut info = GradeInfo {
        questions_answered: by_page.len() as i64,
        attempts_viewed: by_page.values().map(|l| l.len() as i64).sum(),
        ..GradeInfo::default()
    };

    if lesson.custom {
        for (page_id, list) in &by_page {
            let Some(last) = list.last() else {
                continue;
            };
            let answers = graph.answers(*page_id);
            let is_essay = graph
                .get(*page_id)
                .map(|p| p.kind == PageKind::Essay)
                .unwrap_or(false);
            if is_essay {
                let worth = answers.first().map(|a| a.score).unwrap_or(0);
                info.earned += essay_score(last);
                info.manual_count += 1;
                info.manual_points += worth;
            } else if let Some(chosen) = last
                .answer_id
                .and_then(|id| answers.iter().find(|a| a.id == id))
            {
                info.earned += chosen.score;
            }
            info.total += answers.iter().map(|a| a.score).max().unwrap_or(0);
        }
    } else {
        for (page_id, list) in &by_page {
            let is_essay = graph
                .get(*page_id)
                .map(|p| p.kind == PageKind::Essay)
                .unwrap_or(false);
            if is_essay {
                info.manual_count += 1;
                info.manual_points += 1;
            }
            // A marked essay is correct once it scored.
            info.earned += list.iter().filter(|a| a.correct).count() as i64;
        }
        info.total = info.attempts_viewed;
        if info.questions_answered < lesson.minquestions as i64 {
            info.total += lesson.minquestions as i64 - info.questions_answered;
        }
    }

    info.percentage = if info.total > 0 {
        round5(100.0 * info.earned as f64 / info.total as f64)
    } else {
        0.0
    };
    info
}

/// Combines per-retry grades: the best one, or the mean.
pub fn aggregate(grades: &[Grade], usemaxgrade: bool) -> Option<f64> {
    if grades.is_empty() {
        return None;
    }
    let value = if usemaxgrade {
        grades.iter().map(|g| g.grade).fold(f64::MIN, f64::max)
    } else {
        grades.iter().map(|g| g.grade).sum::<f64>() / grades.len() as f64
    };
    Some(round5(value))
}

/// The aggregate scaled to the lesson's maximum grade. Practice lessons
/// do not report to the gradebook.
pub fn gradebook_value(lesson: &Lesson, aggregate: Option<f64>) -> Option<f64> {
    if lesson.practice || lesson.grade <= 0 {
        return None;
    }
    aggregate.map(|value| round5(value * lesson.grade as f64 / 100.0))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::engine::graph::test_support::{answer, chain};
    use crate::engine::jump::Jump;
    use crate::engine::ledger::test_support::attempt;
    use PageKind::*;

    fn graph() -> PageGraph {
        PageGraph::load(
            1,
            chain(&[(1, TrueFalse), (2, TrueFalse), (3, TrueFalse), (4, Essay)]),
            vec![
                answer(10, 1, Jump::NextPage, 1),
                answer(11, 1, Jump::ThisPage, 0),
                answer(20, 2, Jump::NextPage, 2),
                answer(21, 2, Jump::ThisPage, 0),
                answer(30, 3, Jump::NextPage, 1),
                answer(31, 3, Jump::ThisPage, 0),
                answer(40, 4, Jump::NextPage, 5),
            ],
        )
    }

    fn graded(score: i64) -> Grade {
        Grade {
            id: 1,
            lesson_id: 1,
            user_id: 7,
            grade: score as f64,
            late: false,
            completed: Utc::now(),
        }
    }

    fn essay_attempt(id: i64, score: i64) -> Attempt {
        let payload = EssayPayload {
            answer: "<p>text</p>".to_string(),
            score,
            graded: score > 0,
            ..EssayPayload::default()
        };
        Attempt {
            useranswer: Some(serde_json::to_string(&payload).unwrap()),
            ..attempt(id, 4, Some(40), score > 0, id * 10)
        }
    }

    #[test]
    fn test_non_custom_two_of_three_correct() {
        let lesson = Lesson {
            custom: false,
            ..Lesson::default()
        };
        let attempts = vec![
            attempt(1, 1, Some(10), true, 10),
            attempt(2, 2, Some(21), false, 20),
            attempt(3, 3, Some(30), true, 30),
        ];
        let info = grade(&lesson, &graph(), &attempts);
        assert_eq!(info.earned, 2);
        assert_eq!(info.total, 3);
        assert_eq!(info.percentage, 66.66667);
    }

    #[test]
    fn test_min_questions_inflates_total() {
        let lesson = Lesson {
            custom: false,
            minquestions: 4,
            ..Lesson::default()
        };
        let attempts = vec![
            attempt(1, 1, Some(10), true, 10),
            attempt(2, 2, Some(20), true, 20),
        ];
        let info = grade(&lesson, &graph(), &attempts);
        assert_eq!(info.total, 4);
        assert_eq!(info.percentage, 50.0);
    }

    #[test]
    fn test_custom_uses_last_attempt_per_page() {
        let lesson = Lesson {
            custom: true,
            maxattempts: 0,
            ..Lesson::default()
        };
        let attempts = vec![
            attempt(1, 1, Some(11), false, 10),
            attempt(2, 1, Some(10), true, 20),
            attempt(3, 2, Some(21), false, 30),
        ];
        let info = grade(&lesson, &graph(), &attempts);
        // page 1: 1 of 1, page 2: 0 of 2
        assert_eq!(info.earned, 1);
        assert_eq!(info.total, 3);
        assert_eq!(info.attempts_viewed, 3);
        assert_eq!(info.questions_answered, 2);
    }

    #[test]
    fn test_attempts_beyond_max_are_ignored() {
        let lesson = Lesson {
            custom: true,
            maxattempts: 1,
            ..Lesson::default()
        };
        let attempts = vec![
            attempt(1, 1, Some(11), false, 10),
            attempt(2, 1, Some(10), true, 20),
        ];
        let info = grade(&lesson, &graph(), &attempts);
        assert_eq!(info.earned, 0);
        assert_eq!(info.attempts_viewed, 1);
    }

    #[test]
    fn test_grading_is_idempotent() {
        let lesson = Lesson::default();
        let attempts = vec![
            attempt(1, 1, Some(10), true, 10),
            attempt(2, 3, Some(31), false, 30),
        ];
        let graph = graph();
        assert_eq!(grade(&lesson, &graph, &attempts), grade(&lesson, &graph, &attempts));
    }

    #[test]
    fn test_attempts_on_deleted_pages_are_ignored() {
        let lesson = Lesson::default();
        let attempts = vec![attempt(1, 99, Some(990), true, 10)];
        let info = grade(&lesson, &graph(), &attempts);
        assert_eq!(info.attempts_viewed, 0);
        assert_eq!(info.percentage, 0.0);
    }

    #[test]
    fn test_custom_essay_counts_teacher_mark() {
        let lesson = Lesson::default();
        let ungraded = grade(&lesson, &graph(), &[essay_attempt(1, 0)]);
        assert_eq!(ungraded.manual_count, 1);
        assert_eq!(ungraded.manual_points, 5);
        assert_eq!(ungraded.total, 5);
        assert_eq!(ungraded.earned, 0);

        let marked = grade(&lesson, &graph(), &[essay_attempt(1, 4)]);
        assert_eq!(marked.earned, 4);
        assert_eq!(marked.percentage, 80.0);
    }

    #[test]
    fn test_custom_scores_against_best_answers() {
        let lesson = Lesson {
            custom: true,
            ..Lesson::default()
        };
        let graph = PageGraph::load(
            1,
            chain(&[(1, MultiChoice), (2, MultiChoice)]),
            vec![
                answer(10, 1, Jump::NextPage, 10),
                answer(11, 1, Jump::ThisPage, 0),
                answer(20, 2, Jump::NextPage, 5),
                answer(21, 2, Jump::ThisPage, 0),
            ],
        );
        let attempts = vec![
            attempt(1, 1, Some(10), true, 10),
            attempt(2, 2, Some(21), false, 20),
        ];
        let info = grade(&lesson, &graph, &attempts);
        assert_eq!(info.earned, 10);
        assert_eq!(info.total, 15);
        assert_eq!(info.percentage, 66.66667);
    }

    #[test]
    fn test_non_custom_essay_counts_each_marked_attempt() {
        let lesson = Lesson {
            custom: false,
            maxattempts: 0,
            ..Lesson::default()
        };
        let attempts = vec![essay_attempt(1, 3), essay_attempt(2, 0), essay_attempt(3, 1)];
        let info = grade(&lesson, &graph(), &attempts);
        assert_eq!(info.manual_count, 1);
        assert_eq!(info.attempts_viewed, 3);
        assert_eq!(info.earned, 2);
        assert_eq!(info.total, 3);
    }

    #[test]
    fn test_aggregate_and_gradebook() {
        let grades = vec![graded(40), graded(80)];
        assert_eq!(aggregate(&grades, false), Some(60.0));
        assert_eq!(aggregate(&grades, true), Some(80.0));
        assert_eq!(aggregate(&[], true), None);

        let lesson = Lesson {
            grade: 10,
            ..Lesson::default()
        };
        assert_eq!(gradebook_value(&lesson, Some(60.0)), Some(6.0));
        let practice = Lesson {
            practice: true,
            ..Lesson::default()
        };
        assert_eq!(gradebook_value(&practice, Some(60.0)), None);
    }
}
