//! Prompt assembly for fix requests and cleanup of model responses.

/// Instructions given to the agent runtime.
pub const AGENT_INSTRUCTIONS: &str = "You are a helpful agent that debugs Python scripts by analyzing logs and fixing errors. Provide only the corrected Python code without explanations.";

/// System message for the direct chat completion call.
pub const CHAT_SYSTEM_PROMPT: &str = "You are an expert Python developer. Fix broken code and return only the corrected Python code without explanations or markdown.";

/// Build the correction prompt from the full script and the full failure log.
pub fn build_fix_prompt(source: &str, error_log: &str) -> String {
    format!(
        "Fix this Python script based on the error log. Return ONLY the corrected Python code without any explanations or markdown formatting.\n\
         \n\
         ORIGINAL SCRIPT:\n\
         {source}\n\
         \n\
         ERROR LOG:\n\
         {error_log}"
    )
}

/// Remove a surrounding markdown code fence from a model response.
///
/// Handles a leading ```` ```python ```` or bare ```` ``` ```` and a trailing
/// ```` ``` ````. The result is trimmed; text without fences only loses
/// surrounding whitespace.
pub fn strip_code_fences(response: &str) -> String {
    let mut code = response.trim();
    if let Some(rest) = code.strip_prefix("```python") {
        code = rest;
    } else if let Some(rest) = code.strip_prefix("```") {
        code = rest;
    }
    if let Some(rest) = code.strip_suffix("```") {
        code = rest;
    }
    code.trim().to_string()
}
