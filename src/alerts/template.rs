//! Named-placeholder template rendering for alert subjects and bodies.
//!
//! Supports `{preset}`, `{device_name}`, `{value}`, `{time}`. A template
//! referencing any other placeholder is an error; callers fall back to the
//! fixed default subject/body.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("unknown placeholder `{{{0}}}`")]
    UnknownPlaceholder(String),
    #[error("unclosed placeholder")]
    Unclosed,
}

/// Substitute `{name}` placeholders from the variable list. `{{` and `}}`
/// escape literal braces.
pub fn render_template(template: &str, vars: &[(&str, String)]) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(TemplateError::Unclosed),
                    }
                }
                match vars.iter().find(|(key, _)| *key == name) {
                    Some((_, value)) => out.push_str(value),
                    None => return Err(TemplateError::UnknownPlaceholder(name)),
                }
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                }
                out.push('}');
            }
            c => out.push(c),
        }
    }

    Ok(out)
}
