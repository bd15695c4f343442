//! System prompt rendering
//!
//! The instruction sent with every request is a handlebars template. The
//! built-in one lives in `templates/question_prompt.hbs`; a file configured
//! through `llm.prompt_path` replaces it.

use handlebars::Handlebars;
use serde::Serialize;
use std::path::Path;

use super::GenerationError;

const DEFAULT_TEMPLATE: &str = include_str!("../../templates/question_prompt.hbs");

const TEMPLATE_NAME: &str = "question_prompt";

/// Question types for sets of two or more images
const MULTI_IMAGE_TYPES: &[&str] = &[
    "shape and appearance",
    "counting and arithmetic",
    "similarities and differences",
    "recommendation",
    "formatting as a list or table",
    "difficulty level and language",
    "association between the images",
    "association with everyday life",
];

/// Comparison and association make no sense for a lone image
const SINGLE_IMAGE_TYPES: &[&str] = &[
    "shape and appearance",
    "counting and arithmetic",
    "recommendation",
    "formatting as a list or table",
    "difficulty level and language",
];

/// Text part of the user message that carries the images
pub const USER_INSTRUCTION: &str =
    "Please write the questions a user would likely ask about the following image(s).";

#[derive(Debug, Serialize)]
struct PromptData {
    image_count: usize,
    multiple: bool,
    question_count: usize,
    question_types: &'static [&'static str],
}

/// Renders the system prompt for a given image count
pub struct PromptBuilder {
    handlebars: Handlebars<'static>,
    question_count: usize,
}

impl PromptBuilder {
    /// Builder using the built-in template
    pub fn new(question_count: usize) -> Result<Self, GenerationError> {
        let mut handlebars = Self::engine();
        handlebars
            .register_template_string(TEMPLATE_NAME, DEFAULT_TEMPLATE)
            .map_err(|e| GenerationError::Template(e.to_string()))?;
        Ok(Self {
            handlebars,
            question_count,
        })
    }

    /// Builder using a template file
    pub fn with_template(path: &Path, question_count: usize) -> Result<Self, GenerationError> {
        let mut handlebars = Self::engine();
        handlebars
            .register_template_file(TEMPLATE_NAME, path)
            .map_err(|e| GenerationError::Template(format!("{}: {e}", path.display())))?;
        Ok(Self {
            handlebars,
            question_count,
        })
    }

    fn engine() -> Handlebars<'static> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
    }

    /// Number of questions requested per set
    pub fn question_count(&self) -> usize {
        self.question_count
    }

    /// Question types to cover for a set of `image_count` images
    pub fn question_types(image_count: usize) -> &'static [&'static str] {
        if image_count <= 1 {
            SINGLE_IMAGE_TYPES
        } else {
            MULTI_IMAGE_TYPES
        }
    }

    /// Render the system prompt for a set of `image_count` images
    pub fn system_prompt(&self, image_count: usize) -> Result<String, GenerationError> {
        let data = PromptData {
            image_count,
            multiple: image_count > 1,
            question_count: self.question_count,
            question_types: Self::question_types(image_count),
        };
        self.handlebars
            .render(TEMPLATE_NAME, &data)
            .map_err(|e| GenerationError::Template(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_single_image_prompt_skips_comparisons() {
        let builder = PromptBuilder::new(5).unwrap();
        let prompt = builder.system_prompt(1).unwrap();

        assert!(prompt.contains("user_question5"));
        assert!(prompt.contains("recommendation"));
        assert!(!prompt.contains("similarities and differences"));
        assert!(prompt.contains("You will receive 1 image. Write exactly"));
    }

    #[test]
    fn test_multi_image_prompt() {
        let builder = PromptBuilder::new(8).unwrap();
        let prompt = builder.system_prompt(3).unwrap();

        assert!(prompt.contains("You will receive 3 images"));
        assert!(prompt.contains("similarities and differences"));
        assert!(prompt.contains("user_question8"));
    }

    #[test]
    fn test_custom_template_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Ask {{{{question_count}}}} things about {{{{image_count}}}} pictures").unwrap();

        let builder = PromptBuilder::with_template(file.path(), 4).unwrap();
        assert_eq!(
            builder.system_prompt(2).unwrap(),
            "Ask 4 things about 2 pictures"
        );
    }

    #[test]
    fn test_missing_template_file() {
        let err = PromptBuilder::with_template(Path::new("/nonexistent/prompt.hbs"), 4);
        assert!(matches!(err, Err(GenerationError::Template(_))));
    }
}
