//! `${{ }}` interpolation with caching
//!
//! Tokenizes a template once (literal ranges + parsed expressions) and
//! caches the result, so every matrix cell reuses the same parse.

use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::error::FlowError;
use crate::expression::{Expr, Scope};

/// Token representing a parsed template fragment
#[derive(Debug, Clone)]
pub enum Token {
    /// Literal text (range in the original string)
    Literal(Range<usize>),
    /// `${{ expr }}`
    Expr(Arc<Expr>),
}

/// Template resolver with caching
pub struct TemplateResolver {
    cache: DashMap<String, Arc<Vec<Token>>>,
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateResolver {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Parse template into tokens (with caching)
    pub fn tokenize(&self, template: &str) -> Result<Arc<Vec<Token>>, FlowError> {
        if let Some(cached) = self.cache.get(template) {
            return Ok(Arc::clone(&cached));
        }

        let mut tokens = Vec::new();
        let mut cursor = 0;

        while let Some(offset) = template[cursor..].find("${{") {
            let open = cursor + offset;
            if open > cursor {
                tokens.push(Token::Literal(cursor..open));
            }
            let body_start = open + 3;
            let close = find_close(template, body_start).ok_or_else(|| {
                FlowError::UnterminatedTemplate {
                    template: template.to_string(),
                }
            })?;
            let expr = Expr::parse(template[body_start..close].trim())?;
            tokens.push(Token::Expr(Arc::new(expr)));
            cursor = close + 2;
        }

        if cursor < template.len() {
            tokens.push(Token::Literal(cursor..template.len()));
        }

        let tokens = Arc::new(tokens);
        self.cache.insert(template.to_string(), Arc::clone(&tokens));
        Ok(tokens)
    }

    /// Resolve template against a scope
    pub fn resolve(&self, template: &str, scope: &dyn Scope) -> Result<String, FlowError> {
        let tokens = self.tokenize(template)?;
        let mut result = String::with_capacity(template.len());

        for token in tokens.iter() {
            match token {
                Token::Literal(range) => result.push_str(&template[range.clone()]),
                Token::Expr(expr) => result.push_str(&expr.eval(scope)?.to_string()),
            }
        }

        Ok(result)
    }

    /// Whether the template contains any `${{ }}`
    pub fn has_expressions(template: &str) -> bool {
        template.contains("${{")
    }
}

/// Position of the `}}` closing an expression, skipping quoted strings
fn find_close(template: &str, from: usize) -> Option<usize> {
    let bytes = template.as_bytes();
    let mut in_string = false;
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_string = !in_string,
            b'}' if !in_string && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Global template resolver instance
pub static TEMPLATE_RESOLVER: Lazy<TemplateResolver> = Lazy::new(TemplateResolver::new);

/// Convenience function for resolving templates
pub fn resolve(template: &str, scope: &dyn Scope) -> Result<String, FlowError> {
    TEMPLATE_RESOLVER.resolve(template, scope)
}
