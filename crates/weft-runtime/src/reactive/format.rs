//! `{0}` placeholder substitution for formatted bindings.

use weft_core::Value;

/// Substitute every `{0}` in `template` with the display form of `value`.
///
/// Other `{token}`s and unclosed braces are emitted unchanged.
#[must_use]
pub fn format_value(template: &str, value: &Value) -> String {
    let rendered = value.to_string();
    let mut result = String::with_capacity(template.len() + rendered.len());
    let mut chars = template.chars();

    while let Some(ch) = chars.next() {
        if ch != '{' {
            result.push(ch);
            continue;
        }
        let mut token = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            token.push(c);
        }
        match (closed, token.trim()) {
            (true, "0") => result.push_str(&rendered),
            (true, _) => {
                result.push('{');
                result.push_str(&token);
                result.push('}');
            }
            (false, _) => {
                result.push('{');
                result.push_str(&token);
            }
        }
    }

    result
}
