//! Chat templating for the local engine.
//!
//! Renders a message list into the single prompt string a completion
//! endpoint expects. Templates use Tera syntax, which covers the Jinja subset
//! found in common model chat templates.

use std::path::Path;

use tera::{Context, Tera};

use super::Message;
use crate::error::BackendError;

const TEMPLATE_NAME: &str = "chat_template";

/// ChatML, with an empty thinking block when thinking is disabled.
pub const DEFAULT_CHAT_TEMPLATE: &str = "{% for message in messages %}<|im_start|>{{ message.role }}\n{{ message.content }}<|im_end|>\n{% endfor %}{% if add_generation_prompt %}<|im_start|>assistant\n{% if not enable_thinking %}<think>\n\n</think>\n\n{% endif %}{% endif %}";

/// A compiled chat template.
#[derive(Debug)]
pub struct ChatTemplate {
    tera: Tera,
}

impl ChatTemplate {
    /// Compile a template from source.
    pub fn new(source: &str) -> Result<Self, BackendError> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, source)?;
        Ok(Self { tera })
    }

    /// Load a template file.
    pub fn from_file(path: &Path) -> Result<Self, BackendError> {
        let source = std::fs::read_to_string(path)?;
        Self::new(&source)
    }

    /// Render `messages` into a prompt.
    ///
    /// `add_generation_prompt` opens an assistant turn for the model to fill;
    /// `enable_thinking` is passed through for reasoning-model templates.
    pub fn render(
        &self,
        messages: &[Message],
        add_generation_prompt: bool,
        enable_thinking: bool,
    ) -> Result<String, BackendError> {
        let mut context = Context::new();
        context.insert("messages", messages);
        context.insert("add_generation_prompt", &add_generation_prompt);
        context.insert("enable_thinking", &enable_thinking);
        context.insert("bos_token", "");
        context.insert("eos_token", "");
        Ok(self.tera.render(TEMPLATE_NAME, &context)?)
    }
}

impl Default for ChatTemplate {
    fn default() -> Self {
        let mut tera = Tera::default();
        // The built-in template is a constant and always compiles.
        if let Err(err) = tera.add_raw_template(TEMPLATE_NAME, DEFAULT_CHAT_TEMPLATE) {
            tracing::error!(error = %err, "Built-in chat template failed to compile");
        }
        Self { tera }
    }
}
