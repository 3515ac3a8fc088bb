//! URI template compilation and matching for resource lookup
//!
//! Resource registrations whose URI contains `{var}` placeholders are
//! templates. This module compiles such templates into anchored regular
//! expressions so a concrete URI can be matched against them and its
//! variable values extracted. Literal URIs (no `{`) compare by string
//! equality and never allocate a regex.

use std::collections::HashMap;

use regex::Regex;

use crate::error::{McpServerError, Result};

/// A compiled URI template.
///
/// Placeholders take the form `{name}` and match one path segment
/// (any run of characters except `/`). Everything outside placeholders is
/// matched literally.
///
/// # Examples
///
/// ```
/// use axon_mcp::uri_template::UriTemplate;
///
/// let t = UriTemplate::new("items/{id}").unwrap();
/// assert!(t.is_templated());
/// assert!(t.matches("items/42"));
/// assert!(!t.matches("other/42"));
///
/// let vars = t.extract_variables("items/42").unwrap();
/// assert_eq!(vars.get("id").map(String::as_str), Some("42"));
/// ```
#[derive(Debug, Clone)]
pub struct UriTemplate {
    template: String,
    variables: Vec<String>,
    /// `None` for literal (non-templated) URIs.
    pattern: Option<Regex>,
}

impl UriTemplate {
    /// Compile a URI template.
    ///
    /// # Errors
    ///
    /// Fails on unbalanced braces, empty or non-identifier variable names,
    /// and duplicate variable names.
    pub fn new(template: &str) -> Result<Self> {
        if !template.contains('{') {
            if template.contains('}') {
                return Err(McpServerError::Validation(format!(
                    "unbalanced '}}' in URI template '{}'",
                    template
                ))
                .into());
            }
            return Ok(Self {
                template: template.to_string(),
                variables: Vec::new(),
                pattern: None,
            });
        }

        let mut variables = Vec::new();
        let mut pattern = String::from("^");
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            let (literal, after_open) = rest.split_at(open);
            pattern.push_str(&regex::escape(literal));

            let after_open = &after_open[1..];
            let close = after_open.find('}').ok_or_else(|| {
                McpServerError::Validation(format!(
                    "unbalanced '{{' in URI template '{}'",
                    template
                ))
            })?;
            let name = &after_open[..close];

            let valid_start = name
                .chars()
                .next()
                .map(|c| c.is_ascii_alphabetic() || c == '_')
                .unwrap_or(false);
            if !valid_start || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(McpServerError::Validation(format!(
                    "invalid variable name '{{{}}}' in URI template '{}'",
                    name, template
                ))
                .into());
            }
            if variables.iter().any(|v| v == name) {
                return Err(McpServerError::Validation(format!(
                    "duplicate variable '{{{}}}' in URI template '{}'",
                    name, template
                ))
                .into());
            }

            pattern.push_str(&format!("(?P<{}>[^/]+)", name));
            variables.push(name.to_string());
            rest = &after_open[close + 1..];
        }

        if rest.contains('}') {
            return Err(McpServerError::Validation(format!(
                "unbalanced '}}' in URI template '{}'",
                template
            ))
            .into());
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        let compiled = Regex::new(&pattern).map_err(|e| {
            McpServerError::Validation(format!(
                "failed to compile URI template '{}': {}",
                template, e
            ))
        })?;

        Ok(Self {
            template: template.to_string(),
            variables,
            pattern: Some(compiled),
        })
    }

    /// The original template string.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Whether this template contains any `{var}` placeholder.
    pub fn is_templated(&self) -> bool {
        self.pattern.is_some()
    }

    /// Names of the template's variables, in order of appearance.
    pub fn variable_names(&self) -> &[String] {
        &self.variables
    }

    /// Whether `uri` matches this template (exact equality for literals).
    pub fn matches(&self, uri: &str) -> bool {
        match &self.pattern {
            Some(re) => re.is_match(uri),
            None => self.template == uri,
        }
    }

    /// Extract variable values from a matching URI.
    ///
    /// Returns `None` when the URI does not match. A literal template
    /// matching exactly yields an empty map.
    pub fn extract_variables(&self, uri: &str) -> Option<HashMap<String, String>> {
        match &self.pattern {
            Some(re) => {
                let caps = re.captures(uri)?;
                let mut out = HashMap::new();
                for name in &self.variables {
                    if let Some(m) = caps.name(name) {
                        out.insert(name.clone(), m.as_str().to_string());
                    }
                }
                Some(out)
            }
            None => (self.template == uri).then(HashMap::new),
        }
    }
}
