use crate::database::RetrievedChunk;

/// Placeholder replaced by the retrieved context
const CONTEXT_SLOT: &str = "{context}";

const SYSTEM_TEMPLATE: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. \
If you don't know the answer, say that you don't know and give the user suggestions \
to ask questions like medical diseases. Use three sentences maximum and keep the answer \
concise. No preamble, just the answer.\n\n{context}\n";

/// A request ready for the chat model: instructions with context, plus the
/// user's question exactly as asked
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub question: String,
}

/// Merges retrieved chunks and a question into the fixed instruction template
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn assemble(&self, context: &[RetrievedChunk], question: &str) -> Prompt {
        let context_block = context
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<&str>>()
            .join("\n\n");

        Prompt {
            system: SYSTEM_TEMPLATE.replacen(CONTEXT_SLOT, &context_block, 1),
            question: question.to_string(),
        }
    }
}
