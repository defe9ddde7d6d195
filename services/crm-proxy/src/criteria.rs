//! CRM search criteria expressions
//!
//! The search API takes `(Field:operator:value)` terms joined with `and` /
//! `or`. Parentheses and commas in values are escaped with a backslash; the
//! query builder URL-encodes the finished expression.

/// Builder for an `and`-joined criteria expression.
#[derive(Debug, Default)]
pub struct Criteria {
    parts: Vec<String>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `(field:equals:value)`.
    pub fn equals(mut self, field: &str, value: &str) -> Self {
        self.parts.push(term(field, "equals", value));
        self
    }

    /// Add `(field:equals:value)` when `value` is present and non-blank.
    pub fn equals_opt(self, field: &str, value: Option<&str>) -> Self {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(value) => self.equals(field, value),
            None => self,
        }
    }

    /// Add `((f1:starts_with:s)or(f2:starts_with:s)...)` when `search` is
    /// non-blank. A single field skips the outer group.
    pub fn starts_with_any(mut self, fields: &[&str], search: Option<&str>) -> Self {
        let Some(search) = search.map(str::trim).filter(|s| !s.is_empty()) else {
            return self;
        };
        let terms: Vec<String> = fields
            .iter()
            .map(|field| term(field, "starts_with", search))
            .collect();
        match terms.len() {
            0 => {}
            1 => self.parts.extend(terms),
            _ => self.parts.push(format!("({})", terms.join("or"))),
        }
        self
    }

    pub fn build(&self) -> String {
        self.parts.join("and")
    }
}

fn term(field: &str, operator: &str, value: &str) -> String {
    format!("({field}:{operator}:{})", escape(value))
}

/// Backslash-escape the characters that delimit criteria terms.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | ',') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
