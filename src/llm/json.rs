//! Pulling a JSON object out of free-form model text

/// Extract JSON from response (handles markdown code blocks and chatter
/// around the object)
pub fn extract_json_from_response(response: &str) -> String {
    let trimmed = response.trim();

    // Markdown fences: ```json ... ``` or ``` ... ```
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(end) = rest.find("```") {
            return rest[..end].trim().to_string();
        }
    } else if trimmed.starts_with("```") {
        if let Some(start) = trimmed.find('\n') {
            let body = &trimmed[start + 1..];
            if let Some(end) = body.find("```") {
                return body[..end].trim().to_string();
            }
        }
    }

    // Outermost object boundaries
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}

/// Shorten model output for error messages
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}... (truncated, full length: {})", text.len())
}
