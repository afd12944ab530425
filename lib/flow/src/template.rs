//! `{{key}}` substitution for message templates.

use std::collections::HashMap;

pub const CONTACT_FIRST_NAME: &str = "contact_first_name";
pub const CONTACT_LAST_NAME: &str = "contact_last_name";
pub const CONTACT_EMAIL: &str = "contact_email";
pub const ORGANIZATION_NAME: &str = "organization_name";
pub const SENDER_FIRST_NAME: &str = "sender_first_name";
pub const SENDER_LAST_NAME: &str = "sender_last_name";

/// Values available to a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateContext {
    values: HashMap<String, String>,
}

impl TemplateContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value; `None` leaves the key unset.
    #[must_use]
    pub fn with(mut self, key: &str, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.values.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// Returns the value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Replaces every `{{key}}` with its value, or with nothing when unknown.
///
/// Whitespace inside the braces is ignored. An unterminated `{{` is copied
/// through literally.
#[must_use]
pub fn render(template: &str, context: &TemplateContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        if let Some(value) = context.get(after[..close].trim()) {
            out.push_str(value);
        }
        rest = &after[close + 2..];
    }

    out.push_str(rest);
    out
}
