//! Token substitution for notification templates.
//!
//! Placeholders look like `{{ Name }}` or `{{.Name}}`; surrounding whitespace
//! and one leading dot are ignored. Every placeholder must name a token.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("template references unknown token {0:?}")]
    MissingToken(String),

    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),

    #[error("empty placeholder at byte {0}")]
    EmptyPlaceholder(usize),
}

pub fn render(template: &str, tokens: &BTreeMap<String, String>) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open
            .find("}}")
            .ok_or(RenderError::Unterminated(offset + start))?;

        let raw = after_open[..end].trim();
        let name = raw.strip_prefix('.').unwrap_or(raw).trim();
        if name.is_empty() {
            return Err(RenderError::EmptyPlaceholder(offset + start));
        }
        let value = tokens
            .get(name)
            .ok_or_else(|| RenderError::MissingToken(name.to_string()))?;
        out.push_str(value);

        let consumed = start + 2 + end + 2;
        rest = &rest[consumed..];
        offset += consumed;
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Name".to_string(), "Ann".to_string()),
            ("OTP".to_string(), "123456".to_string()),
        ])
    }

    #[test]
    fn substitutes_both_placeholder_styles() {
        let out = render("Hi {{ Name }}, your code is {{.OTP}}.", &tokens()).unwrap();
        assert_eq!(out, "Hi Ann, your code is 123456.");
    }

    #[test]
    fn text_without_placeholders_is_untouched() {
        assert_eq!(render("plain { text }", &tokens()).unwrap(), "plain { text }");
    }

    #[test]
    fn unknown_tokens_fail() {
        let err = render("Hello {{ Nobody }}", &tokens()).unwrap_err();
        assert_eq!(err, RenderError::MissingToken("Nobody".into()));
    }

    #[test]
    fn malformed_placeholders_fail() {
        assert_eq!(
            render("ok {{ Name }} then {{ OTP", &tokens()).unwrap_err(),
            RenderError::Unterminated(19)
        );
        assert_eq!(render("{{ . }}", &tokens()).unwrap_err(), RenderError::EmptyPlaceholder(0));
    }
}
