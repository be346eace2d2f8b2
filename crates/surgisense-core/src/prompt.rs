//! Grounding prompt and the fixed user-facing sentences of the RAG service.
//!
//! The model is told to answer only from the retrieved context and to reply
//! with [`NOT_SPECIFIED`] when the context does not contain the answer. A
//! black-box model can only be constrained by instruction, so the wording
//! here is part of the service contract and is covered by tests.

/// Returned by `ask` when no document has been ingested.
pub const NOT_READY: &str = "Please upload and scan a document first.";

/// The phrase the model must use when the context lacks the answer.
pub const NOT_SPECIFIED: &str = "The document does not specify.";

/// Returned by `ask` when the embedding or chat call fails.
pub const ANSWER_FAILED: &str = "An error occurred while generating the answer.";

/// Separator placed between retrieved chunks.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Join retrieved chunk texts (already in ascending-distance order).
pub fn join_context<S: AsRef<str>>(chunks: &[S]) -> String {
    chunks
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Build the single user prompt sent to the chat model.
pub fn grounding_prompt(retrieved_context: &str, question: &str) -> String {
    format!(
        "You are a clinical AI assistant for SurgiSense answering questions about a patient's medical document.\n\
         Use ONLY the following retrieved context to answer the doctor's question.\n\
         If the answer is not in the context, explicitly state \"{not_specified}\" Do not hallucinate.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question: {question}\n",
        not_specified = NOT_SPECIFIED,
        context = retrieved_context,
        question = question,
    )
}

/// Split a grounding prompt back into `(context, question)`.
///
/// Used by test doubles that play the model and must answer strictly from
/// what the prompt contains.
pub fn parse_grounding_prompt(prompt: &str) -> Option<(&str, &str)> {
    let (_, rest) = prompt.split_once("Context:\n")?;
    let (context, question) = rest.rsplit_once("\n\nQuestion: ")?;
    Some((context, question.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_contract() {
        let prompt = grounding_prompt("Amoxicillin 500mg", "What medication?");
        assert!(prompt.contains("Use ONLY the following retrieved context"));
        assert!(prompt.contains(NOT_SPECIFIED));
        assert!(prompt.contains("Do not hallucinate."));
        assert!(prompt.contains("Context:\nAmoxicillin 500mg"));
        assert!(prompt.ends_with("Question: What medication?\n"));
    }

    #[test]
    fn test_join_context_uses_blank_line() {
        assert_eq!(join_context(&["a", "b", "c"]), "a\n\nb\n\nc");
        assert_eq!(join_context::<&str>(&[]), "");
    }

    #[test]
    fn test_parse_roundtrips_multiline_context() {
        let context = "first chunk\n\nsecond chunk";
        let prompt = grounding_prompt(context, "When is follow-up?");
        let (c, q) = parse_grounding_prompt(&prompt).unwrap();
        assert_eq!(c, context);
        assert_eq!(q, "When is follow-up?");
    }
}
