//! Declarative field projection.
//!
//! Every builder describes its output as a table of named fields, each with an
//! extractor and a visibility rule. Only listed fields are ever emitted.

use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::redaction::RedactionContext;

/// When a field may appear in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Always,
    /// Skipped for preview renderings.
    NotPreview,
    /// Only for staff viewers within the moderation range.
    Moderation,
    /// Only for staff viewers below the clear-IP clearance.
    BelowClearance,
}

pub struct ProjectionContext<'a> {
    pub redaction: &'a RedactionContext<'a>,
    pub preview: bool,
}

impl<'a> ProjectionContext<'a> {
    pub fn new(redaction: &'a RedactionContext<'a>) -> Self {
        Self {
            redaction,
            preview: false,
        }
    }

    pub fn preview(redaction: &'a RedactionContext<'a>) -> Self {
        Self {
            redaction,
            preview: true,
        }
    }

    fn allows(&self, rule: Rule) -> bool {
        match rule {
            Rule::Always => true,
            Rule::NotPreview => !self.preview,
            Rule::Moderation => self.redaction.is_moderation(),
            Rule::BelowClearance => self.redaction.shows_ranges(),
        }
    }
}

pub type Extractor<T> = fn(&T, &ProjectionContext<'_>) -> Option<Value>;

pub struct Field<T> {
    pub name: &'static str,
    pub rule: Rule,
    pub extract: Extractor<T>,
}

impl<T> Field<T> {
    pub const fn always(name: &'static str, extract: Extractor<T>) -> Self {
        Self {
            name,
            rule: Rule::Always,
            extract,
        }
    }

    pub const fn with_rule(name: &'static str, rule: Rule, extract: Extractor<T>) -> Self {
        Self {
            name,
            rule,
            extract,
        }
    }
}

/// Project `record` through `fields` into `target`. Extractors returning
/// `None` leave the field out.
pub fn project_into<T>(
    target: &mut Map<String, Value>,
    record: &T,
    fields: &[Field<T>],
    ctx: &ProjectionContext<'_>,
) {
    for field in fields {
        if !ctx.allows(field.rule) {
            continue;
        }
        if let Some(value) = (field.extract)(record, ctx) {
            target.insert(field.name.to_string(), value);
        }
    }
}

pub fn project<T>(record: &T, fields: &[Field<T>], ctx: &ProjectionContext<'_>) -> Map<String, Value> {
    let mut target = Map::new();
    project_into(&mut target, record, fields, ctx);
    target
}

pub(crate) fn text(value: &str) -> Option<Value> {
    Some(Value::String(value.to_string()))
}

pub(crate) fn optional_text(value: &Option<String>) -> Option<Value> {
    value.as_deref().and_then(text)
}

pub(crate) fn number(value: impl Into<u64>) -> Option<Value> {
    Some(Value::from(value.into()))
}

pub(crate) fn flag(value: bool) -> Option<Value> {
    Some(Value::Bool(value))
}

pub(crate) fn timestamp(value: &OffsetDateTime) -> Option<Value> {
    value.format(&Rfc3339).ok().map(Value::String)
}

pub(crate) fn optional_timestamp(value: &Option<OffsetDateTime>) -> Option<Value> {
    value.as_ref().and_then(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sample {
        name: String,
        secret: String,
    }

    const FIELDS: &[Field<Sample>] = &[
        Field::always("name", |sample, _| text(&sample.name)),
        Field::with_rule("secret", Rule::Moderation, |sample, _| text(&sample.secret)),
        Field::with_rule("full", Rule::NotPreview, |_, _| flag(true)),
        Field::always("missing", |_, _| None),
    ];

    fn sample() -> Sample {
        Sample {
            name: "anon".to_string(),
            secret: "hidden".to_string(),
        }
    }

    #[test]
    fn public_projection_honours_rules() {
        let redaction = RedactionContext::public();
        let projected = project(&sample(), FIELDS, &ProjectionContext::new(&redaction));

        let keys: Vec<&str> = projected.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["full", "name"]);
    }

    #[test]
    fn preview_drops_full_only_fields() {
        let redaction = RedactionContext::staff(0, "salt", 0);
        let projected = project(&sample(), FIELDS, &ProjectionContext::preview(&redaction));

        assert_eq!(projected.get("secret"), Some(&Value::from("hidden")));
        assert!(!projected.contains_key("full"));
    }
}
