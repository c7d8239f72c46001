use crate::chunking::{estimate_token_count, split_into_chunks, ChunkingConfig};
use anyhow::Result;

const QA_TEMPLATE: &str = "Context information is below.\n\
---------------------\n\
{context}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the question: {query}\n";

const REFINE_TEMPLATE: &str = "The original question is as follows: {query}\n\
We have provided an existing answer: {existing_answer}\n\
We have the opportunity to refine the existing answer (only if needed) with some more context below.\n\
------------\n\
{context}\n\
------------\n\
Given the new context, refine the original answer to better answer the question. \
If the context isn't useful, return the original answer.";

/// Fits retrieved text into the model's prompt window
#[derive(Debug, Clone)]
pub struct PromptHelper {
    max_input_size: usize,
    num_output: usize,
    max_chunk_overlap: usize,
}

impl PromptHelper {
    pub fn new(max_input_size: usize, num_output: usize, max_chunk_overlap: usize) -> Self {
        PromptHelper {
            max_input_size,
            num_output,
            max_chunk_overlap,
        }
    }

    pub fn num_output(&self) -> usize {
        self.num_output
    }

    /// Tokens left for context once the template and the answer are accounted for
    pub fn context_budget(&self, template: &str) -> usize {
        self.max_input_size
            .saturating_sub(self.num_output)
            .saturating_sub(estimate_token_count(template))
    }

    /// Combine texts into as few blocks as fit within `budget` tokens each.
    ///
    /// Texts are joined with blank lines. A text larger than the budget is
    /// split into overlapping pieces first.
    pub fn repack<S: AsRef<str>>(&self, texts: &[S], budget: usize) -> Result<Vec<String>> {
        if budget == 0 {
            return Err(anyhow::anyhow!(
                "Prompt template leaves no room for context"
            ));
        }

        let config = ChunkingConfig {
            chunk_size: budget,
            chunk_overlap: self.max_chunk_overlap.min(budget.saturating_sub(1)),
        };

        let mut pieces = Vec::new();
        for text in texts {
            let text = text.as_ref().trim();
            if text.is_empty() {
                continue;
            }
            if estimate_token_count(text) <= budget {
                pieces.push(text.to_string());
            } else {
                pieces.extend(
                    split_into_chunks(text, "", &config)
                        .into_iter()
                        .map(|c| c.text),
                );
            }
        }

        let mut blocks = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0;

        for piece in pieces {
            let piece_tokens = estimate_token_count(&piece);
            if !current.is_empty() && current_tokens + piece_tokens > budget {
                blocks.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
            current_tokens += piece_tokens;
        }

        if !current.is_empty() {
            blocks.push(current);
        }

        Ok(blocks)
    }
}

/// The question-answering template without any substitutions
pub fn qa_template() -> &'static str {
    QA_TEMPLATE
}

/// The refine template without any substitutions
pub fn refine_template() -> &'static str {
    REFINE_TEMPLATE
}

pub fn qa_prompt(context: &str, query: &str) -> String {
    QA_TEMPLATE
        .replace("{context}", context)
        .replace("{query}", query)
}

pub fn refine_prompt(query: &str, existing_answer: &str, context: &str) -> String {
    REFINE_TEMPLATE
        .replace("{query}", query)
        .replace("{existing_answer}", existing_answer)
        .replace("{context}", context)
}
