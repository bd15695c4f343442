//! Preview page
//!
//! A single handlebars page that lets an operator trigger the pipeline and
//! claim a bundle through the same endpoints API clients use.

use axum::{extract::State, response::Html};
use handlebars::{Handlebars, RenderError, TemplateError};
use serde::Serialize;

use super::api::ApiError;
use super::server::AppState;
use crate::error::Error;
use crate::models::{MAX_SET_SIZE, MIN_SET_SIZE};

const INDEX_TEMPLATE: &str = include_str!("../../templates/index.hbs");

#[derive(Debug, Serialize)]
struct PageData {
    version: &'static str,
    image_counts: Vec<usize>,
}

/// Pre-registered preview page template
pub struct PreviewPage {
    handlebars: Handlebars<'static>,
}

impl PreviewPage {
    pub fn new() -> Result<Self, TemplateError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_template_string("index", INDEX_TEMPLATE)?;
        Ok(Self { handlebars })
    }

    pub fn render(&self) -> Result<String, RenderError> {
        let data = PageData {
            version: env!("CARGO_PKG_VERSION"),
            image_counts: (MIN_SET_SIZE..=MAX_SET_SIZE).collect(),
        };
        self.handlebars.render("index", &data)
    }
}

pub(super) async fn index(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    state
        .preview
        .render()
        .map(Html)
        .map_err(|e| ApiError(Error::with_source("Failed to render preview page", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_image_counts() {
        let page = PreviewPage::new().unwrap().render().unwrap();
        assert!(page.contains(r#"<option value="3">3</option>"#));
        assert!(page.contains("/v1/questions"));
        assert!(page.contains(env!("CARGO_PKG_VERSION")));
    }
}
