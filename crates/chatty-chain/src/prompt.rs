//! Prompt assembly.

use chatty_core::types::RetrievedPassage;

/// Default assistant name used in the prompt preamble.
pub const DEFAULT_ASSISTANT_NAME: &str = "Chatty";

/// Renders the fixed question-answering template.
///
/// Slot values are inserted verbatim with no escaping, so identical inputs
/// always produce byte-identical prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptAssembler {
    assistant_name: String,
}

impl PromptAssembler {
    pub fn new(assistant_name: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
        }
    }

    pub fn assistant_name(&self) -> &str {
        &self.assistant_name
    }

    pub fn assemble(&self, context: &str, history: &str, question: &str) -> String {
        format!(
            "You are {name}, a helpful and friendly AI assistant. Use the following pieces of context to answer the question at the end.\n\
             If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
             \n\
             Context: {context}\n\
             \n\
             Chat History: {history}\n\
             \n\
             Question: {question}\n\
             \n\
             Answer: ",
            name = self.assistant_name,
        )
    }
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_ASSISTANT_NAME)
    }
}

/// Join passage texts in rank order, separated by a blank line.
pub fn join_passages(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
