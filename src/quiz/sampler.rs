use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;

use super::Question;

/// The questions drawn for one quiz attempt, split into fixed-size pages.
///
/// Built once when the attempt starts and never regenerated afterwards.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SampledQuestionSet {
    questions: Vec<Question>,
    questions_per_page: usize,
    total_pages: usize,
}

impl SampledQuestionSet {
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn questions_per_page(&self) -> usize {
        self.questions_per_page
    }

    /// Number of pages a user can actually visit. Short pools leave trailing
    /// pages empty, so those are not counted; there is always at least one page.
    pub fn page_count(&self) -> usize {
        self.questions
            .len()
            .div_ceil(self.questions_per_page)
            .clamp(1, self.total_pages)
    }

    /// Absolute question indices shown on `page`, clamped to the sampled length.
    pub fn page_range(&self, page: usize) -> std::ops::Range<usize> {
        let start = (page * self.questions_per_page).min(self.questions.len());
        let end = (start + self.questions_per_page).min(self.questions.len());
        start..end
    }

    pub fn page(&self, page: usize) -> &[Question] {
        &self.questions[self.page_range(page)]
    }

    pub fn get(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }
}

/// Draws `questions_per_page * total_pages` questions without replacement and
/// keeps the drawn order. A pool smaller than the sample yields all of it.
pub fn sample_questions<R: Rng + ?Sized>(
    pool: &[Question],
    questions_per_page: usize,
    total_pages: usize,
    rng: &mut R,
) -> SampledQuestionSet {
    let questions_per_page = questions_per_page.max(1);
    let total_pages = total_pages.max(1);
    let wanted = questions_per_page * total_pages;

    if pool.len() < wanted {
        tracing::warn!(
            pool.size = pool.len(),
            sample.size = wanted,
            "Question pool smaller than requested sample, using every question"
        );
    }

    let mut order: Vec<usize> = (0..pool.len()).collect();
    order.shuffle(rng);
    order.truncate(wanted);

    let questions: Vec<Question> = order.into_iter().map(|i| pool[i].clone()).collect();

    tracing::debug!(
        sample.size = questions.len(),
        questions_per_page,
        total_pages,
        "Sampled question set"
    );

    SampledQuestionSet {
        questions,
        questions_per_page,
        total_pages,
    }
}
