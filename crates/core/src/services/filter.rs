//! Filter Engine (C4): saved filter validation, the adhoc query grammar,
//! and compilation to a MongoDB query document.
//!
//! ```text
//! query      = condition ("," condition)*
//! condition  = field_path ":" operator ":" value
//! ```
//! `,` separates conditions (AND), `|` separates array values for
//! in/nin/all, `%2C`/`%7C` escape literal `,`/`|` inside a value.

use bson::{Bson, doc};
use spacenote_common::{AppError, AppResult};
use spacenote_db::entities::{Condition, FieldRef, FieldType, FilterDef, Operator, SortSpec, Space, TypedValue};

/// Parse an adhoc query string into conditions, validated against `space`.
/// An empty or all-whitespace query yields no conditions.
pub fn parse_adhoc_query(query: &str, space: &Space) -> AppResult<Vec<Condition>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut conditions = Vec::new();
    for raw in query.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        conditions.push(parse_condition(raw, space)?);
    }
    Ok(conditions)
}

fn parse_condition(raw: &str, space: &Space) -> AppResult<Condition> {
    let mut parts = raw.splitn(3, ':');
    let (Some(field_path), Some(op_str), Some(value_raw)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(AppError::ValidationFailure(format!(
            "invalid condition syntax: '{raw}', expected field:operator:value"
        )));
    };

    let field_ref = FieldRef::parse(field_path)
        .ok_or_else(|| AppError::ValidationFailure(format!("unknown field: '{field_path}'")))?;
    let field_type = field_ref_type(&field_ref, space)
        .ok_or_else(|| AppError::ValidationFailure(format!("unknown field: '{field_path}'")))?;

    let op = Operator::parse(op_str)
        .ok_or_else(|| AppError::ValidationFailure(format!("unknown operator: '{op_str}'")))?;
    if !Operator::allowed_for(field_type).contains(&op) {
        return Err(AppError::ValidationFailure(format!(
            "operator '{op_str}' is not valid for field '{field_path}'"
        )));
    }

    let value = parse_value(value_raw, op)?;
    check_null_operator(&value, op)?;
    Ok(Condition { field_ref, op, value })
}

/// `null` is only a meaningful value with equality/inequality; any other
/// operator paired with `null` (e.g. `gt:null`) is rejected rather than
/// silently compiled into a `$gt: null` that Mongo happily accepts but that
/// means nothing.
fn check_null_operator(value: &TypedValue, op: Operator) -> AppResult<()> {
    if matches!(value, TypedValue::Null) && !matches!(op, Operator::Eq | Operator::Ne) {
        return Err(AppError::ValidationFailure(format!(
            "operator '{op:?}' cannot be used with a null value"
        )));
    }
    Ok(())
}

/// The implied field type of a system `FieldRef`, or the declared type of a
/// custom field looked up in `space`.
fn field_ref_type(field_ref: &FieldRef, space: &Space) -> Option<FieldType> {
    match field_ref {
        FieldRef::Number => Some(FieldType::Numeric),
        FieldRef::Author => Some(FieldType::User),
        FieldRef::CreatedAt | FieldRef::EditedAt | FieldRef::ActivityAt => Some(FieldType::Datetime),
        FieldRef::Field { name } => space.field(name).map(|f| f.field_type),
    }
}

fn parse_value(value_raw: &str, op: Operator) -> AppResult<TypedValue> {
    let decoded = url_decode(value_raw);

    if op.is_array_operator() {
        let items: Vec<String> = decoded.split('|').map(str::to_string).collect();
        return Ok(TypedValue::Tags(items));
    }
    Ok(coerce_simple_value(&decoded))
}

/// Decode the two escapes the grammar defines; anything else passes through
/// unchanged (this is not general percent-decoding).
fn url_decode(raw: &str) -> String {
    raw.replace("%2C", ",").replace("%7C", "|")
}

fn coerce_simple_value(value: &str) -> TypedValue {
    if value.eq_ignore_ascii_case("null") {
        return TypedValue::Null;
    }
    if value.eq_ignore_ascii_case("true") {
        return TypedValue::Bool(true);
    }
    if value.eq_ignore_ascii_case("false") {
        return TypedValue::Bool(false);
    }
    if is_integer(value) {
        if let Ok(i) = value.parse::<i64>() {
            return TypedValue::Int(i);
        }
    }
    if is_float(value) {
        if let Ok(f) = value.parse::<f64>() {
            return TypedValue::Float(f);
        }
    }
    TypedValue::Str(value.to_string())
}

fn is_integer(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_float(value: &str) -> bool {
    value.contains('.') && value.parse::<f64>().is_ok()
}

/// Validate that every field reference a `FilterDef` makes (conditions,
/// sort, default columns) resolves against `space`.
pub fn validate_filter_def(filter: &FilterDef, space: &Space) -> AppResult<()> {
    for column in &filter.default_columns {
        check_field_ref(column, space, &filter.name)?;
    }
    for condition in &filter.conditions {
        check_field_ref(&condition.field_ref, space, &filter.name)?;
        let field_type = field_ref_type(&condition.field_ref, space).expect("checked above");
        if !Operator::allowed_for(field_type).contains(&condition.op) {
            return Err(AppError::ValidationFailure(format!(
                "filter '{}': operator not valid for its field",
                filter.name
            )));
        }
        check_null_operator(&condition.value, condition.op)?;
    }
    for sort in &filter.sort {
        check_field_ref(&sort.field_ref, space, &filter.name)?;
    }
    Ok(())
}

fn check_field_ref(field_ref: &FieldRef, space: &Space, filter_name: &str) -> AppResult<()> {
    if field_ref_type(field_ref, space).is_some() {
        Ok(())
    } else {
        Err(AppError::ValidationFailure(format!(
            "filter '{filter_name}' references an unknown field"
        )))
    }
}

/// Compile conditions into a MongoDB query document scoped to `space_slug`,
/// resolving `$me` against `current_user`. Two conditions on the same
/// storage path are grouped under `$and` rather than overwriting each other.
pub fn compile(conditions: &[Condition], space_slug: &str, current_user: &str) -> AppResult<bson::Document> {
    let mut query = doc! { "space_slug": space_slug };
    let mut and_clauses: Vec<bson::Document> = Vec::new();

    for condition in conditions {
        let path = condition.field_ref.storage_path();
        let value = resolve_me(&condition.value, current_user);
        let expr = build_condition_bson(condition.op, &value)?;

        if let Some(existing) = query.remove(&path) {
            and_clauses.push(doc! { &path: existing });
            and_clauses.push(doc! { &path: expr });
        } else if and_clauses.iter().any(|c| c.contains_key(&path)) {
            and_clauses.push(doc! { &path: expr });
        } else {
            query.insert(path, expr);
        }
    }

    if !and_clauses.is_empty() {
        query.insert("$and", and_clauses);
    }
    Ok(query)
}

fn resolve_me(value: &TypedValue, current_user: &str) -> TypedValue {
    match value {
        TypedValue::Str(s) if s == "$me" => TypedValue::Str(current_user.to_string()),
        TypedValue::Tags(items) => TypedValue::Tags(
            items
                .iter()
                .map(|item| if item == "$me" { current_user.to_string() } else { item.clone() })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn build_condition_bson(op: Operator, value: &TypedValue) -> AppResult<Bson> {
    let bson_value = to_bson(value)?;
    Ok(match op {
        Operator::Eq => bson_value,
        Operator::Ne => Bson::Document(doc! { "$ne": bson_value }),
        Operator::Gt => Bson::Document(doc! { "$gt": bson_value }),
        Operator::Gte => Bson::Document(doc! { "$gte": bson_value }),
        Operator::Lt => Bson::Document(doc! { "$lt": bson_value }),
        Operator::Lte => Bson::Document(doc! { "$lte": bson_value }),
        Operator::In => Bson::Document(doc! { "$in": bson_value }),
        Operator::Nin => Bson::Document(doc! { "$nin": bson_value }),
        Operator::All => Bson::Document(doc! { "$all": bson_value }),
        Operator::Contains => regex_doc(&regex_escape(&scalar_string(value)?)),
        Operator::StartsWith => regex_doc(&format!("^{}", regex_escape(&scalar_string(value)?))),
        Operator::EndsWith => regex_doc(&format!("{}$", regex_escape(&scalar_string(value)?))),
    })
}

fn regex_doc(pattern: &str) -> Bson {
    Bson::Document(doc! { "$regex": pattern, "$options": "i" })
}

fn scalar_string(value: &TypedValue) -> AppResult<String> {
    match value {
        TypedValue::Str(s) => Ok(s.clone()),
        other => Ok(other.canonical_string()),
    }
}

fn regex_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if "\\.+*?()|[]{}^$".contains(ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn to_bson(value: &TypedValue) -> AppResult<Bson> {
    bson::to_bson(value).map_err(|e| AppError::Internal(format!("failed to encode filter value: {e}")))
}

/// Compile a sort spec list into MongoDB's `(path, direction)` pairs. An
/// empty list sorts by descending `created_at`, newest note first.
#[must_use]
pub fn compile_sort(sort: &[SortSpec]) -> Vec<(String, i32)> {
    if sort.is_empty() {
        return vec![("created_at".to_string(), -1)];
    }
    sort.iter()
        .map(|s| (s.field_ref.storage_path(), if s.descending { -1 } else { 1 }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use spacenote_db::entities::{FieldDef, FieldOptions};

    fn space_with_select_field() -> Space {
        Space {
            slug: "s".to_string(),
            title: "S".to_string(),
            description: String::new(),
            members: Default::default(),
            fields: vec![FieldDef {
                name: "status".to_string(),
                field_type: FieldType::Select,
                required: true,
                options: FieldOptions {
                    values: vec!["new".to_string(), "done".to_string()],
                    ..Default::default()
                },
                default: None,
            }],
            filters: vec![FilterDef::all_filter()],
            hidden_fields_on_create: Vec::new(),
            editable_fields_on_comment: Vec::new(),
            templates: Default::default(),
            telegram: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn parses_multiple_conditions_and_coerces_values() {
        let space = space_with_select_field();
        let conditions =
            parse_adhoc_query("note.fields.status:eq:new,note.number:gte:100", &space).unwrap();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].value, TypedValue::Str("new".to_string()));
        assert_eq!(conditions[1].value, TypedValue::Int(100));
    }

    #[test]
    fn array_operator_splits_on_pipe() {
        let space = space_with_select_field();
        let conditions = parse_adhoc_query("note.fields.status:in:new|done", &space).unwrap();
        assert_eq!(
            conditions[0].value,
            TypedValue::Tags(vec!["new".to_string(), "done".to_string()])
        );
    }

    #[test]
    fn rejects_operator_not_valid_for_field_type() {
        let space = space_with_select_field();
        assert!(parse_adhoc_query("note.fields.status:contains:x", &space).is_err());
    }

    #[test]
    fn rejects_unknown_field() {
        let space = space_with_select_field();
        assert!(parse_adhoc_query("note.fields.nope:eq:1", &space).is_err());
    }

    #[test]
    fn escape_sequences_restore_literal_comma_and_pipe() {
        assert_eq!(url_decode("a%2Cb%7Cc"), "a,b|c");
    }

    #[test]
    fn same_field_twice_groups_under_and() {
        let conditions = vec![
            Condition { field_ref: FieldRef::Number, op: Operator::Gte, value: TypedValue::Int(1) },
            Condition { field_ref: FieldRef::Number, op: Operator::Lt, value: TypedValue::Int(10) },
        ];
        let query = compile(&conditions, "s", "alice").unwrap();
        assert!(query.contains_key("$and"));
        assert!(!query.contains_key("number"));
    }

    #[test]
    fn me_resolves_to_current_user() {
        let conditions = vec![Condition {
            field_ref: FieldRef::Author,
            op: Operator::Eq,
            value: TypedValue::Str("$me".to_string()),
        }];
        let query = compile(&conditions, "s", "alice").unwrap();
        assert_eq!(query.get_str("author").unwrap(), "alice");
    }

    #[test]
    fn default_sort_is_descending_created_at() {
        assert_eq!(compile_sort(&[]), vec![("created_at".to_string(), -1)]);
    }

    #[test]
    fn null_value_rejected_for_non_equality_operator() {
        let space = space_with_select_field();
        assert!(parse_adhoc_query("note.fields.status:gt:null", &space).is_err());
    }

    #[test]
    fn null_value_accepted_for_equality_operators() {
        let space = space_with_select_field();
        assert!(parse_adhoc_query("note.fields.status:eq:null", &space).is_ok());
        assert!(parse_adhoc_query("note.fields.status:ne:null", &space).is_ok());
    }

    #[test]
    fn validate_filter_def_rejects_null_with_non_equality_operator() {
        let space = space_with_select_field();
        let filter = FilterDef {
            name: "bad".to_string(),
            conditions: vec![Condition {
                field_ref: FieldRef::Field { name: "status".to_string() },
                op: Operator::Gte,
                value: TypedValue::Null,
            }],
            sort: Vec::new(),
            default_columns: Vec::new(),
        };
        assert!(validate_filter_def(&filter, &space).is_err());
    }
}
