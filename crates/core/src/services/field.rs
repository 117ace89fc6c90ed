//! Field Registry (C1): per-type validators, raw→typed parsers, default
//! resolution.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use spacenote_common::{AppError, AppResult};
use spacenote_db::entities::{
    FieldDef, FieldType, NumericKind, PendingAttachment, Space, StringKind, TypedValue,
};

/// DATETIME accepted formats, tried in order; first match wins (§4.1).
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%SZ",
];

/// Context carried through a single create/update request's field parsing.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    pub current_user: Option<String>,
    pub raw: BTreeMap<String, String>,
    pub pending_attachments: BTreeMap<i64, PendingAttachment>,
}

/// Validate a `FieldDef`'s shape: options match its declared type, and its
/// default (if any) satisfies the same rules parsing would apply.
pub fn validate_def(field: &FieldDef, space: &Space) -> AppResult<()> {
    match field.field_type {
        FieldType::String => {
            if let (Some(min), Some(max)) = (field.options.min_length, field.options.max_length) {
                if min > max {
                    return Err(AppError::ValidationFailure(format!(
                        "field '{}': min_length must not exceed max_length",
                        field.name
                    )));
                }
            }
        }
        FieldType::Numeric => {
            if field.options.numeric_kind.is_none() {
                return Err(AppError::ValidationFailure(format!(
                    "field '{}': numeric fields require a kind",
                    field.name
                )));
            }
            if let (Some(min), Some(max)) = (field.options.min, field.options.max) {
                if min > max {
                    return Err(AppError::ValidationFailure(format!(
                        "field '{}': min must not exceed max",
                        field.name
                    )));
                }
            }
        }
        FieldType::Select => {
            if field.options.values.is_empty() {
                return Err(AppError::ValidationFailure(format!(
                    "field '{}': select fields require a non-empty values list",
                    field.name
                )));
            }
            if let Some(maps) = &field.options.value_maps {
                for (map_name, map) in maps {
                    let covered: std::collections::BTreeSet<_> = map.keys().cloned().collect();
                    let expected: std::collections::BTreeSet<_> =
                        field.options.values.iter().cloned().collect();
                    if covered != expected {
                        return Err(AppError::ValidationFailure(format!(
                            "field '{}': value_map '{map_name}' must cover exactly the declared values",
                            field.name
                        )));
                    }
                }
            }
        }
        FieldType::Image => {
            if let Some(max_width) = field.options.max_width {
                if max_width == 0 {
                    return Err(AppError::ValidationFailure(format!(
                        "field '{}': max_width must be positive",
                        field.name
                    )));
                }
            }
        }
        FieldType::Boolean | FieldType::Tags | FieldType::User | FieldType::Datetime => {}
    }

    if let Some(default) = &field.default {
        if !matches!(default, TypedValue::Str(s) if is_special_default(s)) {
            validate_value_shape(field, default, space)?;
        }
    }
    Ok(())
}

fn is_special_default(s: &str) -> bool {
    s == "$me" || s == "$now" || s.starts_with("$exif.created_at:")
}

fn validate_value_shape(field: &FieldDef, value: &TypedValue, space: &Space) -> AppResult<()> {
    match (field.field_type, value) {
        (FieldType::String, TypedValue::Str(_))
        | (FieldType::Boolean, TypedValue::Bool(_))
        | (FieldType::Datetime, TypedValue::DateTime(_)) => Ok(()),
        (FieldType::Numeric, TypedValue::Int(_) | TypedValue::Float(_) | TypedValue::Decimal(_)) => {
            Ok(())
        }
        (FieldType::Select, TypedValue::Str(s)) => {
            if field.options.values.iter().any(|v| v == s) {
                Ok(())
            } else {
                Err(AppError::ValidationFailure(format!(
                    "field '{}': default '{s}' is not one of the declared values",
                    field.name
                )))
            }
        }
        (FieldType::Tags, TypedValue::Tags(_)) => Ok(()),
        (FieldType::User, TypedValue::Str(username)) => {
            if space.members.contains(username) {
                Ok(())
            } else {
                Err(AppError::ValidationFailure(format!(
                    "field '{}': default user '{username}' is not a space member",
                    field.name
                )))
            }
        }
        (FieldType::Image, TypedValue::Int(_)) => Ok(()),
        _ => Err(AppError::ValidationFailure(format!(
            "field '{}': default value does not match its declared type",
            field.name
        ))),
    }
}

/// Turn a raw request string (or its absence) into the stored typed value.
pub fn parse(
    field: &FieldDef,
    space: &Space,
    raw: Option<&str>,
    ctx: &ParseContext,
) -> AppResult<TypedValue> {
    let is_empty = matches!(raw, None | Some(""));

    if is_empty {
        if field.required {
            return Err(AppError::ValidationFailure(format!(
                "field '{}' is required",
                field.name
            )));
        }
        return resolve_default(field, space, ctx);
    }

    let raw = raw.unwrap_or_default();
    parse_raw(field, space, raw, ctx)
}

fn resolve_default(field: &FieldDef, space: &Space, ctx: &ParseContext) -> AppResult<TypedValue> {
    let Some(default) = &field.default else {
        return Ok(TypedValue::Null);
    };

    if let TypedValue::Str(s) = default {
        if s == "$me" {
            let user = ctx.current_user.clone().ok_or_else(|| {
                AppError::ValidationFailure(format!(
                    "field '{}': no current user to resolve $me default",
                    field.name
                ))
            })?;
            return Ok(TypedValue::Str(user));
        }
        if s == "$now" {
            return Ok(TypedValue::DateTime(Utc::now()));
        }
        if let Some(rest) = s.strip_prefix("$exif.created_at:") {
            return resolve_exif_default(field, rest, ctx);
        }
    }
    Ok(default.clone())
}

fn resolve_exif_default(
    field: &FieldDef,
    spec: &str,
    ctx: &ParseContext,
) -> AppResult<TypedValue> {
    let (image_field, fallback) = match spec.split_once('|') {
        Some((a, b)) => (a, Some(b)),
        None => (spec, None),
    };

    let resolved = ctx
        .raw
        .get(image_field)
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(|number| ctx.pending_attachments.get(&number))
        .and_then(|pending| pending.meta.image.as_ref())
        .and_then(|image| image.exif_created_at);

    if let Some(dt) = resolved {
        return Ok(TypedValue::DateTime(dt));
    }

    match fallback {
        Some("$now") | None => Ok(TypedValue::DateTime(Utc::now())),
        Some(literal) => parse_datetime(literal)
            .map(TypedValue::DateTime)
            .map_err(|_| {
                AppError::ValidationFailure(format!(
                    "field '{}': invalid datetime fallback in default",
                    field.name
                ))
            }),
    }
}

fn parse_raw(field: &FieldDef, space: &Space, raw: &str, ctx: &ParseContext) -> AppResult<TypedValue> {
    match field.field_type {
        FieldType::String => parse_string(field, raw),
        FieldType::Boolean => parse_boolean(field, raw),
        FieldType::Numeric => parse_numeric(field, raw),
        FieldType::Select => parse_select(field, raw),
        FieldType::Tags => Ok(parse_tags(raw)),
        FieldType::User => parse_user(field, space, raw, ctx),
        FieldType::Datetime => parse_datetime_field(field, raw),
        FieldType::Image => parse_image(field, raw),
    }
}

fn parse_string(field: &FieldDef, raw: &str) -> AppResult<TypedValue> {
    if field.options.string_kind == Some(StringKind::Line) && raw.contains('\n') {
        return Err(AppError::ValidationFailure(format!(
            "field '{}': single-line string must not contain a newline",
            field.name
        )));
    }
    let len = raw.chars().count() as u32;
    if let Some(min) = field.options.min_length {
        if len < min {
            return Err(AppError::ValidationFailure(format!(
                "field '{}': value shorter than min_length {min}",
                field.name
            )));
        }
    }
    if let Some(max) = field.options.max_length {
        if len > max {
            return Err(AppError::ValidationFailure(format!(
                "field '{}': value longer than max_length {max}",
                field.name
            )));
        }
    }
    Ok(TypedValue::Str(raw.to_string()))
}

fn parse_boolean(field: &FieldDef, raw: &str) -> AppResult<TypedValue> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(TypedValue::Bool(true)),
        "false" | "0" | "no" | "off" => Ok(TypedValue::Bool(false)),
        other => Err(AppError::ValidationFailure(format!(
            "field '{}': '{other}' is not a recognized boolean literal",
            field.name
        ))),
    }
}

fn parse_numeric(field: &FieldDef, raw: &str) -> AppResult<TypedValue> {
    let kind = field.options.numeric_kind.unwrap_or(NumericKind::Int);
    let value = match kind {
        NumericKind::Int => raw
            .parse::<i64>()
            .map(TypedValue::Int)
            .map_err(|_| invalid_numeric(field, raw))?,
        NumericKind::Float => raw
            .parse::<f64>()
            .map(TypedValue::Float)
            .map_err(|_| invalid_numeric(field, raw))?,
        NumericKind::Decimal => {
            raw.parse::<f64>().map_err(|_| invalid_numeric(field, raw))?;
            TypedValue::Decimal(raw.to_string())
        }
    };

    let as_f64 = match &value {
        TypedValue::Int(i) => *i as f64,
        TypedValue::Float(f) => *f,
        TypedValue::Decimal(d) => d.parse::<f64>().unwrap_or(0.0),
        _ => unreachable!(),
    };
    if let Some(min) = field.options.min {
        if as_f64 < min {
            return Err(AppError::ValidationFailure(format!(
                "field '{}': value below minimum {min}",
                field.name
            )));
        }
    }
    if let Some(max) = field.options.max {
        if as_f64 > max {
            return Err(AppError::ValidationFailure(format!(
                "field '{}': value above maximum {max}",
                field.name
            )));
        }
    }
    Ok(value)
}

fn invalid_numeric(field: &FieldDef, raw: &str) -> AppError {
    AppError::ValidationFailure(format!(
        "field '{}': '{raw}' is not a valid number",
        field.name
    ))
}

fn parse_select(field: &FieldDef, raw: &str) -> AppResult<TypedValue> {
    if field.options.values.iter().any(|v| v == raw) {
        Ok(TypedValue::Str(raw.to_string()))
    } else {
        Err(AppError::ValidationFailure(format!(
            "field '{}': '{raw}' is not one of the declared values",
            field.name
        )))
    }
}

/// Split on `,`, trim, drop empties, de-duplicate preserving order.
#[must_use]
pub fn parse_tags(raw: &str) -> TypedValue {
    let mut seen = std::collections::BTreeSet::new();
    let mut tags = Vec::new();
    for part in raw.split(',') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            tags.push(trimmed.to_string());
        }
    }
    TypedValue::Tags(tags)
}

fn parse_user(field: &FieldDef, space: &Space, raw: &str, ctx: &ParseContext) -> AppResult<TypedValue> {
    if raw == "$me" {
        let user = ctx.current_user.clone().ok_or_else(|| {
            AppError::ValidationFailure(format!(
                "field '{}': no current user to resolve $me",
                field.name
            ))
        })?;
        return Ok(TypedValue::Str(user));
    }
    if space.members.contains(raw) {
        Ok(TypedValue::Str(raw.to_string()))
    } else {
        Err(AppError::ValidationFailure(format!(
            "field '{}': '{raw}' is not a member of this space",
            field.name
        )))
    }
}

fn parse_datetime_field(field: &FieldDef, raw: &str) -> AppResult<TypedValue> {
    if raw == "$now" {
        return Ok(TypedValue::DateTime(Utc::now()));
    }
    parse_datetime(raw).map(TypedValue::DateTime).map_err(|_| {
        AppError::ValidationFailure(format!(
            "field '{}': '{raw}' does not match any accepted datetime format",
            field.name
        ))
    })
}

/// Try each accepted DATETIME format in order; naive results are
/// interpreted as UTC.
pub fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, ()> {
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(())
}

fn parse_image(field: &FieldDef, raw: &str) -> AppResult<TypedValue> {
    raw.parse::<i64>().map(TypedValue::Int).map_err(|_| {
        AppError::ValidationFailure(format!(
            "field '{}': '{raw}' is not a valid pending attachment number",
            field.name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ParseContext {
        ParseContext::default()
    }

    #[test]
    fn tags_parsing_dedupes_and_trims() {
        let TypedValue::Tags(tags) = parse_tags("a, b ,a, ,b") else {
            unreachable!()
        };
        assert_eq!(tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn boolean_accepts_documented_literals() {
        let field = FieldDef {
            name: "flag".to_string(),
            field_type: FieldType::Boolean,
            required: true,
            options: Default::default(),
            default: None,
        };
        for literal in ["true", "1", "YES", "On"] {
            assert!(matches!(
                parse_boolean(&field, literal),
                Ok(TypedValue::Bool(true))
            ));
        }
        for literal in ["false", "0", "NO", "oFf"] {
            assert!(matches!(
                parse_boolean(&field, literal),
                Ok(TypedValue::Bool(false))
            ));
        }
        assert!(parse_boolean(&field, "maybe").is_err());
    }

    #[test]
    fn datetime_parses_every_documented_format() {
        let cases = [
            "2024-06-01T10:00:00",
            "2024-06-01T10:00",
            "2024-06-01 10:00:00",
            "2024-06-01",
            "2024-06-01T10:00:00.123456",
            "2024-06-01T10:00:00Z",
        ];
        for case in cases {
            assert!(parse_datetime(case).is_ok(), "failed to parse {case}");
        }
        assert!(parse_datetime("not a date").is_err());
    }

    #[test]
    fn datetime_canonical_string_round_trips() {
        let parsed = parse_datetime("2024-06-01T10:00:00").unwrap();
        let canonical = TypedValue::DateTime(parsed).canonical_string();
        let reparsed = parse_datetime(&canonical).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn required_omitted_is_an_error() {
        let field = FieldDef {
            name: "title".to_string(),
            field_type: FieldType::String,
            required: true,
            options: Default::default(),
            default: None,
        };
        let space = test_space();
        assert!(parse(&field, &space, None, &ctx()).is_err());
        assert!(parse(&field, &space, Some(""), &ctx()).is_err());
    }

    #[test]
    fn optional_omitted_falls_back_to_default_then_null() {
        let mut field = FieldDef {
            name: "nickname".to_string(),
            field_type: FieldType::String,
            required: false,
            options: Default::default(),
            default: None,
        };
        let space = test_space();
        assert_eq!(parse(&field, &space, None, &ctx()).unwrap(), TypedValue::Null);

        field.default = Some(TypedValue::Str("anon".to_string()));
        assert_eq!(
            parse(&field, &space, None, &ctx()).unwrap(),
            TypedValue::Str("anon".to_string())
        );
    }

    fn test_space() -> Space {
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
}
