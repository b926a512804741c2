use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod messages;
pub mod sampler;
pub mod scoring;
pub mod session;

pub use sampler::sample_questions;
pub use session::{
    QuizSession, SessionContext, SubmissionRecord, SubmissionSink, SubmitOutcome, SubmitTrigger,
    TickOutcome,
};

/// A multiple-choice question from the static pool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Position of the question in the pool.
    pub id: usize,
    #[serde(rename = "question")]
    pub text: String,
    pub options: Vec<String>,
    /// Always a valid index into `options`.
    pub correct_answer: usize,
}

impl Question {
    pub fn option_text(&self, index: usize) -> Option<&str> {
        self.options.get(index).map(String::as_str)
    }

    pub fn correct_option_text(&self) -> &str {
        self.option_text(self.correct_answer).unwrap_or_default()
    }
}

/// Chosen option per absolute question index. Entries are only ever added or overwritten.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct SelectionMap(BTreeMap<usize, usize>);

impl SelectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, question_index: usize, option_index: usize) {
        self.0.insert(question_index, option_index);
    }

    pub fn get(&self, question_index: usize) -> Option<usize> {
        self.0.get(&question_index).copied()
    }

    pub fn contains(&self, question_index: usize) -> bool {
        self.0.contains_key(&question_index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

}

impl FromIterator<(usize, usize)> for SelectionMap {
    fn from_iter<T: IntoIterator<Item = (usize, usize)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Question;

    /// Builds a pool where question `i` has four options and answer `i % 4`.
    pub fn pool(size: usize) -> Vec<Question> {
        (0..size)
            .map(|i| Question {
                id: i,
                text: format!("Question {}", i),
                options: (0..4).map(|o| format!("Option {}-{}", i, o)).collect(),
                correct_answer: i % 4,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_map_serializes_with_string_keys() {
        let selections: SelectionMap = [(0, 2), (11, 1)].into_iter().collect();
        let json = serde_json::to_value(&selections).unwrap();
        assert_eq!(json, serde_json::json!({"0": 2, "11": 1}));

        let back: SelectionMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, selections);
    }

    #[test]
    fn test_question_wire_shape() {
        let question = Question {
            id: 3,
            text: "What is 2+2?".to_string(),
            options: vec!["3".to_string(), "4".to_string()],
            correct_answer: 1,
        };
        let json = serde_json::to_value(&question).unwrap();
        assert_eq!(json["question"], "What is 2+2?");
        assert_eq!(json["correctAnswer"], 1);
        assert_eq!(question.correct_option_text(), "4");
    }
}
