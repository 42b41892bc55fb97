use std::collections::BTreeMap;

use log::info;
use serde::{Deserialize, Serialize};

use crate::classify::AnswerMap;
use crate::config::AnswerKey;
use crate::types::Choice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuestionOutcome {
    Correct,
    Incorrect,
    Unanswered,
}

/// Per-question grading detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDetail {
    pub outcome: QuestionOutcome,
    pub student_answer: Option<Choice>,
    pub correct_answer: Choice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingResult {
    pub total_questions: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub unanswered: u32,
    /// Number of correct answers.
    pub score: u32,
    /// Percentage of questions correct, rounded to two decimals.
    pub percentage: f32,
    pub per_question: BTreeMap<u32, QuestionDetail>,
}

/// Grade classified answers against the answer key.
///
/// The key defines which questions count: answers to questions outside the
/// key are ignored, and key questions missing from the answer map grade as
/// unanswered. An empty key grades to zero out of zero.
pub fn grade(answers: &AnswerMap, key: &AnswerKey) -> GradingResult {
    let mut correct = 0u32;
    let mut incorrect = 0u32;
    let mut unanswered = 0u32;
    let mut per_question = BTreeMap::new();

    for (&question, &correct_answer) in key {
        let student_answer = answers.get(&question).copied().flatten();
        let outcome = match student_answer {
            None => {
                unanswered += 1;
                QuestionOutcome::Unanswered
            }
            Some(choice) if choice == correct_answer => {
                correct += 1;
                QuestionOutcome::Correct
            }
            Some(_) => {
                incorrect += 1;
                QuestionOutcome::Incorrect
            }
        };
        per_question.insert(
            question,
            QuestionDetail {
                outcome,
                student_answer,
                correct_answer,
            },
        );
    }

    let total_questions = key.len() as u32;
    let percentage = if total_questions > 0 {
        round2(correct as f32 / total_questions as f32 * 100.0)
    } else {
        0.0
    };

    info!(
        "graded {}/{} correct ({}%)",
        correct, total_questions, percentage
    );

    GradingResult {
        total_questions,
        correct,
        incorrect,
        unanswered,
        score: correct,
        percentage,
        per_question,
    }
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(choices: &[(u32, &str)]) -> AnswerKey {
        choices
            .iter()
            .map(|&(q, letter)| (q, Choice::from(letter)))
            .collect()
    }

    fn answers(entries: &[(u32, Option<&str>)]) -> AnswerMap {
        entries
            .iter()
            .map(|&(q, letter)| (q, letter.map(Choice::from)))
            .collect()
    }

    #[test]
    fn mixed_sheet_grades_each_outcome() {
        // Scenario: 10 questions, 7 right, 2 wrong, 1 left blank.
        let key = key(&[
            (1, "A"),
            (2, "B"),
            (3, "C"),
            (4, "D"),
            (5, "A"),
            (6, "B"),
            (7, "C"),
            (8, "D"),
            (9, "A"),
            (10, "B"),
        ]);
        let answers = answers(&[
            (1, Some("A")),
            (2, Some("B")),
            (3, Some("C")),
            (4, Some("D")),
            (5, Some("A")),
            (6, Some("B")),
            (7, Some("C")),
            (8, Some("A")),
            (9, Some("C")),
            (10, None),
        ]);

        let result = grade(&answers, &key);
        assert_eq!(result.correct, 7);
        assert_eq!(result.incorrect, 2);
        assert_eq!(result.unanswered, 1);
        assert_eq!(result.score, 7);
        assert!((result.percentage - 70.0).abs() < f32::EPSILON);
        assert_eq!(result.per_question[&8].outcome, QuestionOutcome::Incorrect);
        assert_eq!(result.per_question[&10].outcome, QuestionOutcome::Unanswered);
        assert_eq!(result.per_question[&10].student_answer, None);
    }

    #[test]
    fn half_right_sheet_scores_fifty_percent() {
        let key = key(&[(1, "A"), (2, "B")]);
        let answers = answers(&[(1, Some("A")), (2, Some("C"))]);
        let result = grade(&answers, &key);
        assert_eq!(result.score, 1);
        assert!((result.percentage - 50.0).abs() < f32::EPSILON);
        assert_eq!(result.per_question[&1].outcome, QuestionOutcome::Correct);
        assert_eq!(result.per_question[&2].outcome, QuestionOutcome::Incorrect);
    }

    #[test]
    fn key_question_missing_from_answers_is_unanswered() {
        let key = key(&[(1, "A"), (2, "B")]);
        let answers = answers(&[(1, Some("A"))]);
        let result = grade(&answers, &key);
        assert_eq!(result.correct, 1);
        assert_eq!(result.unanswered, 1);
        assert_eq!(result.per_question[&2].outcome, QuestionOutcome::Unanswered);
    }

    #[test]
    fn answers_outside_the_key_are_ignored() {
        let key = key(&[(1, "A")]);
        let answers = answers(&[(1, Some("A")), (7, Some("D"))]);
        let result = grade(&answers, &key);
        assert_eq!(result.total_questions, 1);
        assert_eq!(result.correct, 1);
        assert!(!result.per_question.contains_key(&7));
    }

    #[test]
    fn empty_key_grades_to_zero() {
        let result = grade(&answers(&[(1, Some("A"))]), &AnswerKey::new());
        assert_eq!(result.total_questions, 0);
        assert_eq!(result.score, 0);
        assert_eq!(result.percentage, 0.0);
        assert!(result.per_question.is_empty());
    }

    #[test]
    fn percentage_rounds_to_two_decimals() {
        // 1 of 3 correct: 33.333...% rounds to 33.33.
        let key = key(&[(1, "A"), (2, "B"), (3, "C")]);
        let answers = answers(&[(1, Some("A")), (2, Some("A")), (3, Some("A"))]);
        let result = grade(&answers, &key);
        assert!((result.percentage - 33.33).abs() < 1e-4);
    }

    #[test]
    fn grading_result_serializes_in_camel_case() {
        let key = key(&[(1, "A")]);
        let result = grade(&answers(&[(1, Some("B"))]), &key);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"totalQuestions\":1"));
        assert!(json.contains("\"perQuestion\""));
        assert!(json.contains("\"incorrect\":1"));
    }

    proptest! {
        #[test]
        fn outcome_counts_always_partition_the_key(
            key_choices in proptest::collection::btree_map(1u32..50, 0usize..4, 0..30),
            answer_choices in proptest::collection::btree_map(1u32..50, proptest::option::of(0usize..4), 0..30),
        ) {
            let key: AnswerKey = key_choices
                .into_iter()
                .map(|(q, c)| (q, Choice::from_index(c).unwrap()))
                .collect();
            let answers: AnswerMap = answer_choices
                .into_iter()
                .map(|(q, c)| (q, c.and_then(Choice::from_index)))
                .collect();

            let result = grade(&answers, &key);
            prop_assert_eq!(
                result.correct + result.incorrect + result.unanswered,
                result.total_questions
            );
            prop_assert!(result.score <= result.total_questions);
            prop_assert!(result.percentage >= 0.0 && result.percentage <= 100.0);
            prop_assert_eq!(result.per_question.len() as u32, result.total_questions);
        }
    }
}
