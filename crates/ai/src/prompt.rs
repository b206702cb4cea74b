//! Prompt templates, one per interaction type.
//!
//! Templates only format what they are given. Callers load any long text
//! (article bodies, summaries) from storage; job payloads never carry it.

use crate::schema::QuizQuestion;

const OUTLINE_SHAPE: &str = r#"{"sections": [{"title": string, "description": string, "articles": [{"title": string, "description": string}]}]}"#;
const ENRICHMENT_SHAPE: &str =
    r#"{"summary": string, "key_takeaways": [string], "further_reading": [string]}"#;
const QUIZ_SHAPE: &str = r#"{"questions": [{"prompt": string, "options": [string], "correct_index": number, "explanation": string}]}"#;
const EXAM_SHAPE: &str = r#"{"question_indices": [number]}"#;

/// Article bodies are clipped to keep quiz/enrichment prompts bounded.
const MAX_SOURCE_CHARS: usize = 12_000;

fn clip(text: &str) -> &str {
    match text.char_indices().nth(MAX_SOURCE_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn json_only(shape: &str) -> String {
    format!("Respond with JSON only, no commentary, matching exactly: {shape}")
}

pub fn outline(title: &str, description: &str, level: &str) -> String {
    format!(
        "Plan a {level} course titled {title:?}.\n\
         Course description: {description}\n\
         Split it into sections, each with a few focused articles.\n\
         {}",
        json_only(OUTLINE_SHAPE)
    )
}

pub fn article_content(
    course_title: &str,
    section_title: &str,
    article_title: &str,
    article_description: &str,
    level: &str,
) -> String {
    format!(
        "Write the article {article_title:?} for the {level} course {course_title:?}, \
         section {section_title:?}.\n\
         Scope: {article_description}\n\
         Respond in markdown. Do not wrap the whole answer in a code block."
    )
}

pub fn enrichment(article_title: &str, article_body: &str) -> String {
    format!(
        "Summarize the article {article_title:?} and list its key takeaways \
         and further reading.\n\
         Article:\n{}\n\n{}",
        clip(article_body),
        json_only(ENRICHMENT_SHAPE)
    )
}

pub fn article_quiz(article_title: &str, article_body: &str, questions: usize) -> String {
    format!(
        "Write {questions} multiple-choice questions testing the article {article_title:?}.\n\
         Article:\n{}\n\n{}",
        clip(article_body),
        json_only(QUIZ_SHAPE)
    )
}

pub fn section_quiz(section_title: &str, summaries: &[String], questions: usize) -> String {
    format!(
        "Write {questions} multiple-choice questions covering the section {section_title:?}.\n\
         Article summaries:\n- {}\n\n{}",
        summaries.join("\n- "),
        json_only(QUIZ_SHAPE)
    )
}

pub fn final_question_bank(course_title: &str, summaries: &[String], questions: usize) -> String {
    format!(
        "Build a question bank of {questions} multiple-choice questions for the \
         final assessment of the course {course_title:?}.\n\
         Article summaries:\n- {}\n\n{}",
        summaries.join("\n- "),
        json_only(QUIZ_SHAPE)
    )
}

pub fn final_exam(course_title: &str, bank: &[QuizQuestion], questions: usize) -> String {
    let listing = bank
        .iter()
        .enumerate()
        .map(|(idx, q)| format!("{idx}: {}", q.prompt))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Select {questions} questions from the bank below for the final exam of \
         {course_title:?}, balancing coverage across topics.\n\
         Bank:\n{listing}\n\n{}",
        json_only(EXAM_SHAPE)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_include_their_inputs() {
        let p = outline("Rust 101", "Ownership and borrowing", "beginner");
        assert!(p.contains("\"Rust 101\""));
        assert!(p.contains("beginner"));
        assert!(p.contains("\"sections\""));

        let p = section_quiz("Basics", &["one".into(), "two".into()], 5);
        assert!(p.contains("- one\n- two"));
    }

    #[test]
    fn long_article_bodies_are_clipped() {
        let body = "é".repeat(MAX_SOURCE_CHARS + 50);
        let p = enrichment("Big", &body);
        assert!(p.chars().filter(|c| *c == 'é').count() == MAX_SOURCE_CHARS);
    }
}
