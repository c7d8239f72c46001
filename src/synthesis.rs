use crate::database::RetrievedChunk;
use crate::openai::LanguageModel;
use crate::prompt::{qa_prompt, qa_template, refine_prompt, refine_template, PromptHelper};
use anyhow::Result;
use log::debug;

/// Returned when there is nothing to answer from
pub const EMPTY_RESPONSE: &str = "Empty Response";

/// Answers a query from retrieved chunks, refining the answer block by block
pub struct ResponseSynthesizer<M> {
    model: M,
    prompt_helper: PromptHelper,
}

impl<M: LanguageModel> ResponseSynthesizer<M> {
    pub fn new(model: M, prompt_helper: PromptHelper) -> Self {
        ResponseSynthesizer {
            model,
            prompt_helper,
        }
    }

    /// Pack the chunks into as few prompts as fit, answer from the first and
    /// refine the answer with each of the rest
    pub async fn synthesize(&self, query: &str, chunks: &[RetrievedChunk]) -> Result<String> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.chunk.text.as_str()).collect();

        let qa_budget = self
            .prompt_helper
            .context_budget(&format!("{} {}", qa_template(), query));
        // A refine prompt also carries the previous answer
        let refine_budget = self
            .prompt_helper
            .context_budget(&format!("{} {}", refine_template(), query))
            .saturating_sub(self.prompt_helper.num_output());

        let blocks = self
            .prompt_helper
            .repack(&texts, qa_budget.min(refine_budget))?;
        let mut blocks = blocks.into_iter();

        let first = match blocks.next() {
            Some(block) => block,
            None => return Ok(EMPTY_RESPONSE.to_string()),
        };

        let mut answer = self.model.complete(&qa_prompt(&first, query)).await?;

        for (i, block) in blocks.enumerate() {
            debug!("Refining answer with block {}", i + 2);
            let refined = self
                .model
                .complete(&refine_prompt(query, answer.trim(), &block))
                .await?;
            if !refined.trim().is_empty() {
                answer = refined;
            }
        }

        let answer = answer.trim();
        if answer.is_empty() {
            Ok(EMPTY_RESPONSE.to_string())
        } else {
            Ok(answer.to_string())
        }
    }
}
