//! Prompt System - built-in templates and Handlebars rendering

mod render;
mod templates;

pub use render::PromptRenderer;
pub use templates::{DEFAULT_GRADING_TEMPLATE, NAMING_TEMPLATE};
