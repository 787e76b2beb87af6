//! Name templates.
//!
//! A template such as `"{name}-{task-id-hash}.{framework}"` is compiled into
//! a flat token sequence (literal | separator | variable) and later executed
//! against a context of already-sanitized values. Compilation validates
//! every literal segment against the active label scheme; execution fails
//! when a referenced variable is absent, which callers treat as "skip this
//! record" (expected for optional variables like `{version}`).

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::labels::LabelScheme;

/// Variable namespace a compiled template is executed against.
pub type Context = HashMap<String, String>;

/// Errors from template compilation and execution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// The template string is empty.
    #[error("invalid empty template")]
    Empty,

    /// A `{}` with no identifier inside.
    #[error("empty variable reference in template {0:?}")]
    EmptyVariable(String),

    /// A literal segment violates label syntax or separator placement.
    #[error("invalid template {template:?}: {reason}")]
    Invalid {
        /// The offending template string.
        template: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A referenced variable is absent or empty at execution time.
    #[error("variable {0:?} is not defined in context")]
    UndefinedVariable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Separator,
    Literal(String),
    Variable(String),
}

/// A compiled name template.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    source: String,
    tokens: Vec<Token>,
}

fn variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[\s\w:-]*\}").expect("variable regex"))
}

/// Checks a partial label against the scheme, honoring the underscore
/// convention for service labels (`_http`, `_tcp`). Labels adjacent to a
/// variable are padded with a placeholder character so that edge rules
/// (leading digit, leading hyphen) only apply at true name edges.
fn valid_partial_label(
    s: &str,
    first_in_block: bool,
    last_in_block: bool,
    first_in_pattern: bool,
    last_in_pattern: bool,
    spec: LabelScheme,
) -> bool {
    let trimmed = if (s.starts_with('_') && s != "_") || (s == "_" && !last_in_pattern) {
        s.trim_start_matches('_')
    } else {
        s
    };

    let pre = if first_in_block && !first_in_pattern { "a" } else { "" };
    let post = if last_in_block && !last_in_pattern { "a" } else { "" };

    let candidate = format!("{pre}{trimmed}{post}");
    spec.apply(&candidate) == candidate
}

/// Split the literal text between two variables (or a pattern edge) into
/// separator and literal tokens, validating each partial label.
fn push_literal_tokens(
    tokens: &mut Vec<Token>,
    source: &str,
    s: &str,
    first_in_pattern: bool,
    last_in_pattern: bool,
    spec: LabelScheme,
) -> Result<(), TemplateError> {
    if s.is_empty() {
        return Ok(());
    }
    if s == "." {
        tokens.push(Token::Separator);
        return Ok(());
    }

    let labels: Vec<&str> = s.split('.').collect();
    let last = labels.len() - 1;
    for (i, label) in labels.iter().enumerate() {
        let first_in_block = i == 0;
        let last_in_block = i == last;

        if i != 0 {
            tokens.push(Token::Separator);
        }

        // a dot at either edge of the block leaves an empty fragment
        if label.is_empty() && (first_in_block || last_in_block) {
            continue;
        }
        if label.is_empty() {
            return Err(TemplateError::Invalid {
                template: source.to_string(),
                reason: "consecutive separators".to_string(),
            });
        }

        if !valid_partial_label(
            label,
            first_in_block,
            last_in_block,
            first_in_pattern,
            last_in_pattern,
            spec,
        ) {
            return Err(TemplateError::Invalid {
                template: source.to_string(),
                reason: format!("substring {label:?} is no valid label"),
            });
        }
        tokens.push(Token::Literal((*label).to_string()));
    }
    Ok(())
}

/// Compile a template string under the given label scheme.
pub fn compile(template: &str, spec: LabelScheme) -> Result<CompiledTemplate, TemplateError> {
    if template.is_empty() {
        return Err(TemplateError::Empty);
    }

    let mut tokens = Vec::new();
    let mut old_right = 0;

    let matches: Vec<_> = variable_re().find_iter(template).collect();
    for (i, m) in matches.iter().enumerate() {
        let identifier = template[m.start() + 1..m.end() - 1].trim();
        if identifier.is_empty() {
            return Err(TemplateError::EmptyVariable(template.to_string()));
        }

        let leftmost = i == 0;
        push_literal_tokens(
            &mut tokens,
            template,
            &template[old_right..m.start()],
            leftmost,
            false,
            spec,
        )?;

        tokens.push(Token::Variable(identifier.to_string()));
        old_right = m.end();
    }

    let leftmost = matches.is_empty();
    push_literal_tokens(&mut tokens, template, &template[old_right..], leftmost, true, spec)?;

    if matches!(tokens.first(), Some(Token::Separator)) {
        return Err(TemplateError::Invalid {
            template: template.to_string(),
            reason: "template cannot start with a dot".to_string(),
        });
    }
    if matches!(tokens.last(), Some(Token::Separator)) {
        return Err(TemplateError::Invalid {
            template: template.to_string(),
            reason: "template cannot end with a dot".to_string(),
        });
    }

    Ok(CompiledTemplate {
        source: template.to_string(),
        tokens,
    })
}

impl CompiledTemplate {
    /// Interpolate the context into the compiled token sequence.
    pub fn execute(&self, ctx: &Context) -> Result<String, TemplateError> {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Separator => out.push('.'),
                Token::Literal(s) => out.push_str(s),
                Token::Variable(name) => match ctx.get(name) {
                    Some(value) if !value.is_empty() => out.push_str(value),
                    _ => return Err(TemplateError::UndefinedVariable(name.clone())),
                },
            }
        }
        Ok(out)
    }

    /// The original template string.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
