//! Extraction of a single balanced `{...}` JSON object out of mixed text.
//!
//! Sentiment-analysis replies frequently wrap their JSON answer in prose or
//! a fenced code block; this scans for the first `{` and walks forward,
//! string-escape aware, until braces balance.

/// Strip common LLM reply artifacts (code fences, stray control tokens)
/// before attempting extraction.
pub(crate) fn clean_reply_artifacts(content: &str) -> String {
    let mut cleaned = content
        .replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "");

    cleaned = cleaned
        .trim()
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();

    cleaned
}

/// Extract the first balanced JSON object found in `content`, if any.
pub(crate) fn extract_json_object(content: &str) -> Option<String> {
    let start_idx = content.find('{')?;
    extract_balanced_json(&content[start_idx..]).map(|(json_str, _)| json_str)
}

fn extract_balanced_json(text: &str) -> Option<(String, usize)> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let json_end = find_balanced_json_end(&chars)?;

    let json_chars: String = chars[0..=json_end].iter().collect();
    let json_byte_len = json_chars.len();
    let offset = text.len() - trimmed.len();
    Some((json_chars, offset + json_byte_len))
}

fn find_balanced_json_end(chars: &[char]) -> Option<usize> {
    let mut brace_count = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (char_idx, ch) in chars.iter().enumerate() {
        match ch {
            '"' if !escaped => in_string = !in_string,
            '\\' if in_string => escaped = !escaped,
            '{' if !in_string => brace_count += 1,
            '}' if !in_string => {
                brace_count -= 1;
                if brace_count == 0 {
                    return Some(char_idx);
                }
            }
            _ => escaped = false,
        }

        if *ch != '\\' {
            escaped = false;
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let content = r#"Sure, here you go: {"verdict": "positive", "rationale": "glowing"} hope that helps"#;
        let extracted = extract_json_object(content).unwrap();
        assert_eq!(extracted, r#"{"verdict": "positive", "rationale": "glowing"}"#);
    }

    #[test]
    fn handles_nested_braces() {
        let content = r#"{"outer": {"inner": 1}, "verdict": "neutral"}"#;
        let extracted = extract_json_object(content).unwrap();
        assert_eq!(extracted, content);
    }

    #[test]
    fn ignores_braces_inside_strings() {
        let content = r#"{"note": "use { and } carefully", "verdict": "negative"}"#;
        let extracted = extract_json_object(content).unwrap();
        assert_eq!(extracted, content);
    }

    #[test]
    fn returns_none_when_unbalanced() {
        assert!(extract_json_object("{\"verdict\": \"positive\"").is_none());
    }

    #[test]
    fn strips_code_fences_before_extraction() {
        let content = "```json\n{\"verdict\": \"neutral\"}\n```";
        let cleaned = clean_reply_artifacts(content);
        assert_eq!(extract_json_object(&cleaned).unwrap(), r#"{"verdict": "neutral"}"#);
    }
}
