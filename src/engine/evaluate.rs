// src/engine/evaluate.rs

//! Checks a learner's submission against the answers of a question page.

use std::collections::BTreeSet;

use regex::RegexBuilder;
use serde::Serialize;

use super::{
    LessonError, LessonResult,
    graph::PageGraph,
    jump::{Jump, PageKind},
    navigation::jumpto_is_correct,
};
use crate::{
    models::{
        attempt::{EssayPayload, SubmitAnswerRequest},
        lesson::Lesson,
        page::{Answer, Page},
    },
    utils::html::clean_html,
};

/// Short answer / numerical catch-all: used when nothing else matches.
pub const WRONG_ANSWER_MARKER: &str = "@#wronganswer#@";

const DEFAULT_CORRECT_FEEDBACK: &str = "That's the correct answer.";
const DEFAULT_WRONG_FEEDBACK: &str = "That's the wrong answer.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// The answer the submission resolved to, if any.
    pub answer_id: Option<i64>,
    pub correct: bool,
    pub jump: Jump,
    pub score: i64,
    pub feedback: Option<String>,
    /// Serialized learner input as stored on the attempt.
    pub user_response: Option<String>,
    pub is_essay: bool,
    /// Nothing usable was submitted. No attempt is recorded.
    pub no_answer: bool,
}

impl Evaluation {
    fn no_answer() -> Self {
        Self {
            answer_id: None,
            correct: false,
            jump: Jump::ThisPage,
            score: 0,
            feedback: None,
            user_response: None,
            is_essay: false,
            no_answer: true,
        }
    }
}

struct Checker<'a> {
    lesson: &'a Lesson,
    graph: &'a PageGraph,
    page: &'a Page,
}

impl Checker<'_> {
    fn is_correct(&self, answer: &Answer) -> LessonResult<bool> {
        if self.lesson.custom {
            Ok(answer.score > 0)
        } else {
            jumpto_is_correct(self.graph, self.page.id, answer.jumpto)
        }
    }

    fn feedback(&self, answer: Option<&Answer>, correct: bool) -> Option<String> {
        if let Some(answer) = answer {
            if !answer.response.trim().is_empty() {
                return Some(answer.response.clone());
            }
        }
        self.lesson.feedback.then(|| {
            if correct {
                DEFAULT_CORRECT_FEEDBACK.to_string()
            } else {
                DEFAULT_WRONG_FEEDBACK.to_string()
            }
        })
    }

    fn outcome(&self, answer: &Answer, user_response: Option<String>) -> LessonResult<Evaluation> {
        let correct = self.is_correct(answer)?;
        Ok(Evaluation {
            answer_id: Some(answer.id),
            correct,
            jump: answer.jumpto,
            score: answer.score,
            feedback: self.feedback(Some(answer), correct),
            user_response,
            is_essay: false,
            no_answer: false,
        })
    }

    /// No answer matched: stay on the page.
    fn unmatched(&self, user_response: String) -> Evaluation {
        Evaluation {
            answer_id: None,
            correct: false,
            jump: Jump::ThisPage,
            score: 0,
            feedback: self.feedback(None, false),
            user_response: Some(user_response),
            is_essay: false,
            no_answer: false,
        }
    }

    fn find<'b>(&self, answers: &'b [Answer], answer_id: i64) -> LessonResult<&'b Answer> {
        answers
            .iter()
            .find(|a| a.id == answer_id)
            .ok_or(LessonError::AnswerNotFound(answer_id))
    }
}

/// Evaluates `submission` on `page`.
pub fn evaluate(
    lesson: &Lesson,
    graph: &PageGraph,
    page: &Page,
    submission: &SubmitAnswerRequest,
) -> LessonResult<Evaluation> {
    let checker = Checker {
        lesson,
        graph,
        page,
    };
    let answers = graph.answers(page.id);

    match page.kind {
        PageKind::TrueFalse | PageKind::BranchTable => match submission.answer_id {
            Some(id) => checker.outcome(checker.find(answers, id)?, Some(id.to_string())),
            None => Ok(Evaluation::no_answer()),
        },
        PageKind::MultiChoice if page.qoption => evaluate_multi(&checker, answers, submission),
        PageKind::MultiChoice => match submission.answer_id {
            Some(id) => checker.outcome(checker.find(answers, id)?, Some(id.to_string())),
            None => Ok(Evaluation::no_answer()),
        },
        PageKind::ShortAnswer => {
            let input = submission.response.as_deref().unwrap_or("").trim();
            if input.is_empty() {
                return Ok(Evaluation::no_answer());
            }
            evaluate_short_answer(&checker, answers, input)
        }
        PageKind::Numerical => {
            let input = submission.response.as_deref().unwrap_or("").trim();
            match input.parse::<f64>() {
                Ok(value) if value.is_finite() => {
                    evaluate_numerical(&checker, answers, input, value)
                }
                _ => Ok(Evaluation::no_answer()),
            }
        }
        PageKind::Matching => evaluate_matching(&checker, answers, submission),
        PageKind::Essay => {
            let input = submission.response.as_deref().unwrap_or("").trim();
            if input.is_empty() {
                return Ok(Evaluation::no_answer());
            }
            let payload = EssayPayload {
                answer: clean_html(input),
                ..EssayPayload::default()
            };
            let first = answers.first();
            Ok(Evaluation {
                answer_id: first.map(|a| a.id),
                correct: false,
                jump: first.map(|a| a.jumpto).unwrap_or(Jump::NextPage),
                score: 0,
                feedback: None,
                user_response: Some(serde_json::to_string(&payload)?),
                is_essay: true,
                no_answer: false,
            })
        }
        PageKind::EndOfBranch | PageKind::Cluster | PageKind::EndOfCluster => {
            Err(LessonError::InvalidInput(format!(
                "page {} ({}) does not take answers",
                page.id,
                page.kind.name()
            )))
        }
    }
}

fn evaluate_multi(
    checker: &Checker<'_>,
    answers: &[Answer],
    submission: &SubmitAnswerRequest,
) -> LessonResult<Evaluation> {
    let chosen: BTreeSet<i64> = submission.answer_ids.iter().copied().collect();
    if chosen.is_empty() {
        return Ok(Evaluation::no_answer());
    }
    for id in &chosen {
        checker.find(answers, *id)?;
    }

    let mut correct_ids = BTreeSet::new();
    for answer in answers {
        if checker.is_correct(answer)? {
            correct_ids.insert(answer.id);
        }
    }
    let user_response = chosen
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let all_right = !correct_ids.is_empty() && chosen == correct_ids;
    let representative = if all_right {
        answers.iter().find(|a| correct_ids.contains(&a.id))
    } else {
        answers
            .iter()
            .find(|a| chosen.contains(&a.id) && !correct_ids.contains(&a.id))
            .or_else(|| answers.iter().find(|a| !correct_ids.contains(&a.id)))
            .or_else(|| answers.iter().find(|a| chosen.contains(&a.id)))
    };
    let Some(answer) = representative else {
        return Ok(checker.unmatched(user_response));
    };

    let mut evaluation = checker.outcome(answer, Some(user_response))?;
    evaluation.correct = all_right;
    evaluation.feedback = checker.feedback(Some(answer), all_right);
    Ok(evaluation)
}

/// `*` is the only wildcard; everything else matches literally.
fn short_answer_matches(pattern: &str, input: &str, case_sensitive: bool) -> bool {
    let escaped = regex::escape(pattern.trim()).replace(r"\*", ".*");
    RegexBuilder::new(&format!("^{}$", escaped))
        .case_insensitive(!case_sensitive)
        .build()
        .map(|re| re.is_match(input))
        .unwrap_or(false)
}

fn evaluate_short_answer(
    checker: &Checker<'_>,
    answers: &[Answer],
    input: &str,
) -> LessonResult<Evaluation> {
    let mut fallback = None;
    for answer in answers {
        if answer.answer == WRONG_ANSWER_MARKER {
            fallback.get_or_insert(answer);
            continue;
        }
        if short_answer_matches(&answer.answer, input, checker.page.qoption) {
            return checker.outcome(answer, Some(input.to_string()));
        }
    }
    match fallback {
        Some(answer) => checker.outcome(answer, Some(input.to_string())),
        None => Ok(checker.unmatched(input.to_string())),
    }
}

fn numeric_matches(expected: &str, value: f64) -> bool {
    match expected.split_once(':') {
        Some((min, max)) => match (min.trim().parse::<f64>(), max.trim().parse::<f64>()) {
            (Ok(min), Ok(max)) => value >= min && value <= max,
            _ => false,
        },
        None => expected
            .trim()
            .parse::<f64>()
            .map(|exact| exact == value)
            .unwrap_or(false),
    }
}

fn evaluate_numerical(
    checker: &Checker<'_>,
    answers: &[Answer],
    input: &str,
    value: f64,
) -> LessonResult<Evaluation> {
    let mut fallback = None;
    for answer in answers {
        if answer.answer == WRONG_ANSWER_MARKER {
            fallback.get_or_insert(answer);
            continue;
        }
        if numeric_matches(&answer.answer, value) {
            return checker.outcome(answer, Some(input.to_string()));
        }
    }
    match fallback {
        Some(answer) => checker.outcome(answer, Some(input.to_string())),
        None => Ok(checker.unmatched(input.to_string())),
    }
}

fn evaluate_matching(
    checker: &Checker<'_>,
    answers: &[Answer],
    submission: &SubmitAnswerRequest,
) -> LessonResult<Evaluation> {
    if submission.matches.is_empty() {
        return Ok(Evaluation::no_answer());
    }
    let [on_correct, on_wrong, pairs @ ..] = answers else {
        return Err(LessonError::DataIntegrity(format!(
            "matching page {} needs its two outcome answers",
            checker.page.id
        )));
    };

    let all_right = !pairs.is_empty()
        && pairs.iter().all(|pair| {
            submission
                .matches
                .get(&pair.id)
                .is_some_and(|chosen| chosen.trim() == pair.response.trim())
        });
    let answer = if all_right { on_correct } else { on_wrong };

    Ok(Evaluation {
        answer_id: Some(answer.id),
        correct: all_right,
        jump: answer.jumpto,
        score: answer.score,
        feedback: checker.feedback(Some(answer), all_right),
        user_response: Some(serde_json::to_string(&submission.matches)?),
        is_essay: false,
        no_answer: false,
    })
}
