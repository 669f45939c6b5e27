//! [`ModelProvider`](flowlab_task_runtime::ModelProvider) implementations.
//!
//! - [`EchoProvider`] renders the prompt and returns it as the completion.
//!   Useful offline and in tests.
//! - [`OpenAiProvider`] sends the rendered prompt to any OpenAI-compatible
//!   `/chat/completions` endpoint.
//!
//! Both resolve `template_id` references through a [`TemplateLibrary`].

mod echo;
mod library;
mod openai;

pub use echo::EchoProvider;
pub use library::TemplateLibrary;
pub use openai::{OpenAiConfig, OpenAiProvider};
