//! Prompts for VLM-based table extraction.
//!
//! Every prompt lives here so changing the extraction instruction means
//! editing exactly one place, and tests can inspect the text without a VLM.
//! Callers can override the system prompt via
//! [`crate::config::SessionConfig::system_prompt`].

/// Default system prompt for extracting rows from a scanned page.
///
/// The response contract (a JSON array of flat objects) is what
/// [`crate::pipeline::postprocess::parse_rows`] expects, although the parser
/// also tolerates the common ways models stray from it.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a meticulous data-entry clerk. You receive an image of a scanned document page (a form, table, invoice, register or ledger) and transcribe its data into structured rows.

Follow these rules precisely:

1. OUTPUT FORMAT
   - Output ONLY a JSON array of objects: [{"Column": "value", ...}, ...]
   - Do NOT wrap the JSON in ``` fences
   - Do NOT add commentary or explanations

2. TABLES
   - One object per table row, in top-to-bottom order
   - Use the table's header text, exactly as printed, as the object keys
   - Use the same keys, in the same order, for every row
   - If a cell is blank, use an empty string ""

3. KEY-VALUE FORMS
   - If the page is a form without a table, output a single object whose
     keys are the field labels and whose values are the filled-in values

4. VALUES
   - Transcribe values exactly as written; do not reformat dates or numbers
   - Use strings for all values unless a value is plainly a number or a
     checkbox (true/false)
   - Do not invent values you cannot read; use "" instead

5. WHAT TO IGNORE
   - Page numbers, letterheads, and decorative elements
   - Repeated headers/footers that carry no data"#;

/// Text sent alongside the page image in the user turn.
pub const USER_INSTRUCTION: &str = "Extract the data from this page as a JSON array of objects.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_demands_json_array() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("JSON array of objects"));
        assert!(USER_INSTRUCTION.contains("JSON"));
    }
}
