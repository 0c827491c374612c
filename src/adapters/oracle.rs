//! LLM-backed quality oracle

use anyhow::Result;
use async_trait::async_trait;

use super::{ChatMessage, LlmClient, QualityOracle};

const JUDGE_ROLE: &str = "You are a quality-assurance assistant for a shop chatbot.";

pub fn judge_prompt(question: &str, answer: &str) -> String {
    format!(
        "The user asked: \"{}\"\n\
         The chatbot answered: \"{}\"\n\
         Does the answer address the question? Reply with JSON only: \
         {{\"match\":\"yes\"/\"no\",\"explanation\":\"...\"}}",
        question, answer
    )
}

pub struct LlmOracle {
    llm: LlmClient,
}

impl LlmOracle {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl QualityOracle for LlmOracle {
    async fn judge(&self, question: &str, answer: &str) -> Result<String> {
        let reply = self
            .llm
            .complete(&[
                ChatMessage::system(JUDGE_ROLE),
                ChatMessage::user(judge_prompt(question, answer)),
            ])
            .await?;
        Ok(reply.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_pair_and_format() {
        let prompt = judge_prompt("hi there", "Hello!");
        assert!(prompt.contains("\"hi there\""));
        assert!(prompt.contains("\"Hello!\""));
        assert!(prompt.contains(r#"{"match":"yes"/"no","explanation":"..."}"#));
    }
}
