use serde::{Deserialize, Serialize};

use super::{Question, SelectionMap};

pub const NOT_ANSWERED: &str = "Not answered";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionReview {
    pub question: String,
    pub options: Vec<String>,
    pub user_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    pub score: usize,
    pub total_questions: usize,
    pub results: Vec<QuestionReview>,
}

impl ScoreReport {
    pub fn accuracy_percent(&self) -> f64 {
        accuracy_percent(self.score, self.total_questions)
    }
}

/// Scores `selections` against the answer keys of `questions`.
///
/// Missing selections and selections that point outside a question's options
/// count as wrong and are reported as [`NOT_ANSWERED`].
pub fn score_answers(questions: &[Question], selections: &SelectionMap) -> ScoreReport {
    let results: Vec<QuestionReview> = questions
        .iter()
        .enumerate()
        .map(|(index, question)| {
            let chosen = selections
                .get(index)
                .and_then(|option| question.option_text(option).map(|text| (option, text)));

            QuestionReview {
                question: question.text.clone(),
                options: question.options.clone(),
                user_answer: chosen
                    .map(|(_, text)| text.to_string())
                    .unwrap_or_else(|| NOT_ANSWERED.to_string()),
                correct_answer: question.correct_option_text().to_string(),
                is_correct: chosen.is_some_and(|(option, _)| option == question.correct_answer),
            }
        })
        .collect();

    ScoreReport {
        score: results.iter().filter(|r| r.is_correct).count(),
        total_questions: questions.len(),
        results,
    }
}

pub fn accuracy_percent(score: usize, total_questions: usize) -> f64 {
    if total_questions == 0 {
        return 0.0;
    }
    (score as f64 / total_questions as f64) * 100.0
}

pub fn performance_message(score: usize, total_questions: usize) -> &'static str {
    let percentage = accuracy_percent(score, total_questions);
    if percentage >= 90.0 {
        "Excellent work! You nailed it!"
    } else if percentage >= 75.0 {
        "Great job! You did really well!"
    } else if percentage >= 50.0 {
        "Good effort! Keep practicing!"
    } else if percentage >= 25.0 {
        "Keep trying! You can do better!"
    } else {
        "Don't give up! Review and try again!"
    }
}
