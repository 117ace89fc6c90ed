//! Template Engine (C9): Liquid rendering for note titles and Telegram
//! messages, and the `{# photo: field #}` mirror directive.

use std::collections::BTreeMap;

use liquid::{Object, ParserBuilder, model::Value as LiquidValue};
use spacenote_common::{AppError, AppResult};
use spacenote_db::entities::{Note, Space, TypedValue};
use tracing::warn;

const DEFAULT_TITLE_TEMPLATE: &str = "Note #{{ note.number }}";

/// A rendering failure is never fatal: callers fall back to an empty
/// string (mirror/activity messages) or the default title.
fn render(template_str: &str, context: &Object) -> Option<String> {
    let parser = ParserBuilder::with_stdlib().build().ok()?;
    let template = parser.parse(template_str).ok()?;
    template.render(context).ok()
}

/// Validate that `key` is one of the recognized template keys and, for
/// `note:title`, that `content` parses as valid Liquid. Called before a
/// template is saved.
pub fn validate_key(space: &Space, key: &str, content: &str) -> AppResult<()> {
    if key == "note:title" {
        if !content.trim().is_empty() {
            let parser = ParserBuilder::with_stdlib()
                .build()
                .map_err(|e| AppError::Internal(format!("failed to build template parser: {e}")))?;
            parser
                .parse(content)
                .map_err(|e| AppError::ValidationFailure(format!("invalid Liquid template syntax: {e}")))?;
        }
        return Ok(());
    }
    if key == "web:note:detail" || key == "web_react:note:detail" {
        return Ok(());
    }
    for prefix in ["web:note:list:", "web_react:note:list:"] {
        if let Some(filter_name) = key.strip_prefix(prefix) {
            if filter_name.is_empty() || !space.filters.iter().any(|f| f.name == filter_name) {
                return Err(AppError::ValidationFailure(format!(
                    "filter '{filter_name}' not found"
                )));
            }
            return Ok(());
        }
    }
    if key.starts_with("telegram:") {
        if content.trim().is_empty() {
            return Ok(());
        }
        let (_photo_field, body) = parse_photo_directive(content);
        let parser = ParserBuilder::with_stdlib()
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build template parser: {e}")))?;
        parser
            .parse(&body)
            .map_err(|e| AppError::ValidationFailure(format!("invalid Liquid template syntax: {e}")))?;
        return Ok(());
    }
    Err(AppError::ValidationFailure(format!(
        "invalid template key: '{key}'"
    )))
}

/// Render a note's title from its space's `note:title` template, falling
/// back to `Note #{number}` on a missing template or a render error.
#[must_use]
pub fn render_note_title(space: &Space, note: &Note) -> String {
    let template_str = space
        .templates
        .get("note:title")
        .map_or(DEFAULT_TITLE_TEMPLATE, String::as_str);

    let context = liquid::object!({
        "note": note_object(note),
        "space": space_object(space),
    });

    render(template_str, &context).unwrap_or_else(|| {
        warn!(space_slug = %space.slug, number = note.number, "template_render_error");
        format!("Note #{}", note.number)
    })
}

/// Render a Telegram message template (`telegram:*` keys). Returns `None`
/// if the space has no template for `key`; a render failure logs and
/// returns `None` rather than falling back to partial text.
pub fn render_telegram(space: &Space, key: &str, payload: &Object) -> Option<String> {
    let template_str = space.templates.get(key)?;
    render_telegram_str(template_str, payload)
}

/// Render a raw Telegram template string (already resolved from the
/// space's templates, e.g. with the mirror's photo directive stripped)
/// against `payload`. A render failure logs and returns `None`.
pub fn render_telegram_str(template_str: &str, payload: &Object) -> Option<String> {
    let rendered = render(template_str, payload);
    if rendered.is_none() {
        warn!(template = %template_str, "template_render_error");
    }
    rendered
}

/// Split a mirror template's leading `{# photo: field #}` directive, if
/// present, from the rest of the template text. The directive must occupy
/// the entire first line.
#[must_use]
pub fn parse_photo_directive(template: &str) -> (Option<String>, String) {
    let mut lines = template.splitn(2, '\n');
    let first = lines.next().unwrap_or("").trim();
    let rest = lines.next().unwrap_or("");

    if let Some(field) = extract_photo_field(first) {
        return (Some(field), rest.trim_start_matches('\n').to_string());
    }
    (None, template.to_string())
}

fn extract_photo_field(first_line: &str) -> Option<String> {
    let inner = first_line.strip_prefix("{#")?.strip_suffix("#}")?.trim();
    let name = inner.strip_prefix("photo:")?.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some(name.to_string())
}

fn note_object(note: &Note) -> Object {
    let mut fields = Object::new();
    for (name, value) in &note.fields {
        fields.insert(name.clone().into(), typed_value_to_liquid(value));
    }
    liquid::object!({
        "space_slug": note.space_slug.clone(),
        "number": note.number,
        "author": note.author.clone(),
        "created_at": note.created_at.to_rfc3339(),
        "activity_at": note.activity_at.to_rfc3339(),
        "fields": fields,
    })
}

fn space_object(space: &Space) -> Object {
    liquid::object!({
        "slug": space.slug.clone(),
        "title": space.title.clone(),
    })
}

fn typed_value_to_liquid(value: &TypedValue) -> LiquidValue {
    match value {
        TypedValue::Null => LiquidValue::Nil,
        TypedValue::Bool(b) => LiquidValue::scalar(*b),
        TypedValue::Int(i) => LiquidValue::scalar(*i),
        TypedValue::Float(f) => LiquidValue::scalar(*f),
        TypedValue::Decimal(d) | TypedValue::Str(d) => LiquidValue::scalar(d.clone()),
        TypedValue::Tags(tags) => {
            LiquidValue::Array(tags.iter().map(|t| LiquidValue::scalar(t.clone())).collect())
        }
        TypedValue::DateTime(dt) => LiquidValue::scalar(dt.to_rfc3339()),
    }
}

/// Build the Liquid context payload for an activity or mirror task.
#[must_use]
pub fn task_payload(note: &Note, extra: BTreeMap<String, LiquidValue>) -> Object {
    let mut object = liquid::object!({ "note": note_object(note) });
    for (key, value) in extra {
        object.insert(key.into(), value);
    }
    object
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_note() -> Note {
        Note {
            space_slug: "s".to_string(),
            number: 42,
            author: "alice".to_string(),
            created_at: Utc::now(),
            edited_at: None,
            commented_at: None,
            activity_at: Utc::now(),
            fields: BTreeMap::new(),
        }
    }

    fn sample_space() -> Space {
        Space {
            slug: "s".to_string(),
            title: "S".to_string(),
            description: String::new(),
            members: Default::default(),
            fields: Vec::new(),
            filters: Vec::new(),
            hidden_fields_on_create: Vec::new(),
            editable_fields_on_comment: Vec::new(),
            templates: Default::default(),
            telegram: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn default_title_uses_note_number() {
        let note = sample_note();
        let space = sample_space();
        assert_eq!(render_note_title(&space, &note), "Note #42");
    }

    #[test]
    fn custom_title_template_renders() {
        let note = sample_note();
        let mut space = sample_space();
        space
            .templates
            .insert("note:title".to_string(), "Note by {{ note.author }}".to_string());
        assert_eq!(render_note_title(&space, &note), "Note by alice");
    }

    #[test]
    fn invalid_liquid_syntax_is_rejected() {
        let space = sample_space();
        assert!(validate_key(&space, "note:title", "{{ unterminated").is_err());
    }

    #[test]
    fn telegram_template_rejects_invalid_liquid_syntax() {
        let space = sample_space();
        assert!(validate_key(&space, "telegram:mirror", "{{ unterminated").is_err());
    }

    #[test]
    fn telegram_template_with_photo_directive_validates_remaining_body() {
        let space = sample_space();
        assert!(validate_key(&space, "telegram:mirror", "{# photo: cover #}\n{{ note.number }}").is_ok());
        assert!(validate_key(&space, "telegram:activity_created", "{# photo: cover #}\n{{ unterminated").is_err());
    }

    #[test]
    fn list_key_requires_existing_filter() {
        let space = sample_space();
        assert!(validate_key(&space, "web:note:list:missing", "x").is_err());
    }

    #[test]
    fn photo_directive_must_occupy_first_line() {
        let (field, rest) = parse_photo_directive("{# photo: cover #}\nCaption text");
        assert_eq!(field.as_deref(), Some("cover"));
        assert_eq!(rest, "Caption text");

        let (field, rest) = parse_photo_directive("Caption text\n{# photo: cover #}");
        assert_eq!(field, None);
        assert_eq!(rest, "Caption text\n{# photo: cover #}");
    }
}
