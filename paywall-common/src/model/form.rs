use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};
use thiserror::Error;

/// Field-level validation failures of a submitted form, keyed by field name.
#[derive(Clone, Eq, PartialEq, Debug, Default, Serialize, Error)]
#[serde(transparent)]
pub struct FormErrors(BTreeMap<&'static str, String>);

impl FormErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Ok(value)` when no error was recorded.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl Display for FormErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Invalid form fields: ")?;
        for (index, (field, message)) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field} ({message})")?;
        }
        Ok(())
    }
}

/// Checks a text field's length, counted in characters after trimming.
pub(crate) fn check_length(
    errors: &mut FormErrors,
    field: &'static str,
    label: &str,
    value: &str,
    min: usize,
    max: usize,
) {
    let len = value.trim().chars().count();
    if len < min {
        errors.add(
            field,
            format!("{label} must be at least {min} characters long."),
        );
    } else if len > max {
        errors.add(field, format!("{label} must be at most {max} characters long."));
    }
}

#[cfg(test)]
mod tests {
    use crate::model::form::{FormErrors, check_length};

    #[test]
    fn keeps_first_message_per_field() {
        let mut errors = FormErrors::default();
        errors.add("title", "first");
        errors.add("title", "second");
        errors.add("content", "other");

        assert_eq!(errors.get("title"), Some("first"));
        assert_eq!(
            errors.to_string(),
            "Invalid form fields: content (other), title (first)"
        );
        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            serde_json::json!({ "title": "first", "content": "other" })
        );
    }

    #[test]
    fn length_ignores_surrounding_whitespace() {
        let mut errors = FormErrors::default();
        check_length(&mut errors, "title", "Title", "  abc   ", 5, 10);
        assert_eq!(
            errors.get("title"),
            Some("Title must be at least 5 characters long.")
        );

        let errors = FormErrors::default();
        assert_eq!(errors.into_result(1), Ok(1));
    }
}
