use crate::storage::Record;

/// Default grounding instructions. Used whenever the caller does not supply
/// a system prompt; a caller-supplied prompt replaces this template entirely
/// rather than being appended to it.
const DEFAULT_TEMPLATE_HEADER: &str = "You are a helpful assistant that answers questions based on the provided context. If the context doesn't contain enough information to answer the question, say so clearly.";

const DEFAULT_TEMPLATE_FOOTER: &str = "Answer based only on the context provided above. If the context doesn't contain the answer, say \"I don't have enough information to answer this question based on the available context.\"";

/// Number retrieved texts in rank order, starting at 1.
pub fn format_context(records: &[Record]) -> String {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| format!("[{}] {}", index + 1, record.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Assemble the grounding prompt for a query. With no retrieved records the
/// context section is left empty; the model's own fallback phrasing handles
/// the no-information case, the pipeline never short-circuits it.
pub fn build_prompt(query: &str, records: &[Record], system_prompt: Option<&str>) -> String {
    match system_prompt {
        Some(prompt) => prompt.to_string(),
        None => format!(
            "{}\n\nContext:\n{}\n\nQuestion: {}\n\n{}",
            DEFAULT_TEMPLATE_HEADER,
            format_context(records),
            query,
            DEFAULT_TEMPLATE_FOOTER,
        ),
    }
}
