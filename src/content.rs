use crate::config::{ContentConfig, ContentSourceType};
use crate::error::ContentError;
use crate::quiz::Question;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// A question as it appears in the pool document. `correctAnswer` may be a
/// number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuestion {
    question: String,
    options: Vec<String>,
    correct_answer: JsonValue,
}

pub struct QuestionPoolParser;

impl QuestionPoolParser {
    #[tracing::instrument(skip(content), fields(content.length = content.len()))]
    pub fn parse(content: &str) -> Result<Vec<Question>, ContentError> {
        let raw: Vec<RawQuestion> = serde_json::from_str(content)
            .map_err(|e| ContentError::Parse(format!("Failed to parse JSON: {}", e)))?;

        raw.into_iter()
            .enumerate()
            .map(|(position, raw)| Self::normalize(position, raw))
            .collect()
    }

    fn normalize(position: usize, raw: RawQuestion) -> Result<Question, ContentError> {
        let invalid = |reason: String| ContentError::InvalidQuestion { position, reason };

        if raw.options.len() < 2 {
            return Err(invalid(format!(
                "needs at least 2 options, found {}",
                raw.options.len()
            )));
        }

        let correct_answer = match &raw.correct_answer {
            JsonValue::Number(n) => n.as_u64().map(|n| n as usize),
            JsonValue::String(s) => s.trim().parse::<usize>().ok(),
            _ => None,
        }
        .ok_or_else(|| invalid(format!("unusable correctAnswer {}", raw.correct_answer)))?;

        if correct_answer >= raw.options.len() {
            return Err(invalid(format!(
                "correctAnswer {} is outside {} options",
                correct_answer,
                raw.options.len()
            )));
        }

        Ok(Question {
            id: position,
            text: raw.question,
            options: raw.options,
            correct_answer,
        })
    }
}

#[tracing::instrument(skip(config))]
async fn load_raw_content(config: &ContentConfig) -> Result<String, ContentError> {
    match config.source_type {
        ContentSourceType::File => {
            let file_path = config.file_path.as_ref().ok_or_else(|| {
                ContentError::Config("File path required for file source".to_string())
            })?;
            tracing::debug!(file.path = %file_path, "Loading question pool from file");
            tokio::fs::read_to_string(file_path)
                .await
                .map_err(|e| ContentError::FileRead {
                    path: file_path.clone(),
                    source: e,
                })
        }
        ContentSourceType::Http => {
            let url = config.http_url.as_ref().ok_or_else(|| {
                ContentError::Config("HTTP URL required for http source".to_string())
            })?;
            tracing::debug!(http.url = %url, "Fetching question pool from URL");
            let response = reqwest::get(url)
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| ContentError::HttpFetch {
                    url: url.clone(),
                    source: e,
                })?;

            response.text().await.map_err(|e| ContentError::HttpFetch {
                url: url.clone(),
                source: e,
            })
        }
    }
}

/// Loads the static question pool once. The result is shared read-only by every session.
#[tracing::instrument(skip(config), fields(
    content.source_type = ?config.source_type,
    content.file_path = ?config.file_path,
    content.http_url = ?config.http_url
))]
pub async fn load_question_pool(config: &ContentConfig) -> Result<Arc<Vec<Question>>, ContentError> {
    let raw_content = load_raw_content(config).await?;
    let questions = QuestionPoolParser::parse(&raw_content).map_err(|err| {
        tracing::error!(error = %err, "Failed to parse question pool");
        err
    })?;

    if questions.is_empty() {
        tracing::warn!("Question pool is empty, quizzes will have no questions");
    }
    tracing::info!(pool.size = questions.len(), "Loaded question pool");

    Ok(Arc::new(questions))
}
