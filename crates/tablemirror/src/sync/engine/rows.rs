//! Turning records into rows.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::dataset::Row;
use crate::media::{MediaCache, MediaError};
use crate::remote::{Record, is_attachment_list, parse_attachments};
use crate::sync::RECORD_ID_COLUMN;

/// A rendered row and the cached files it links to.
pub(super) struct BuiltRow {
    pub row: Row,
    pub media: Vec<String>,
}

/// Render a scalar, or a nested value as compact JSON with sorted keys.
pub(super) fn stringify_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => sort_keys(value).to_string(),
    }
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_keys(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Render a field value for a cell.
///
/// Attachment lists go through the media cache; other lists are joined.
pub(super) async fn render_value(
    value: &Value,
    media: &MediaCache,
) -> Result<(String, Vec<String>), MediaError> {
    match value {
        Value::Array(items) if is_attachment_list(items) => {
            let resolved = media.resolve_all(parse_attachments(items)).await?;
            let tokens: Vec<&str> = resolved.iter().map(|r| r.token.as_str()).collect();
            let cell = tokens.join(",");
            let files = resolved.into_iter().filter_map(|r| r.local_filename).collect();
            Ok((cell, files))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(stringify_scalar)
                .filter(|s| !s.is_empty())
                .collect();
            Ok((parts.join(","), Vec::new()))
        }
        other => Ok((stringify_scalar(other), Vec::new())),
    }
}

/// Whether a "published" value means unpublished.
pub(super) fn is_falsy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
    }
}

fn push_unique(columns: &mut Vec<String>, seen: &mut HashSet<String>, column: &str) {
    if seen.insert(column.to_string()) {
        columns.push(column.to_string());
    }
}

/// Column order for a rebuilt dataset: record id, preferred columns, then
/// every other field in first-seen order.
pub(super) fn compute_columns(preferred: &[String], records: &[Record]) -> Vec<String> {
    merge_columns(&[], preferred, records)
}

/// Column order after a merge: record id, existing columns, missing
/// preferred columns, then new fields in first-seen order.
pub(super) fn merge_columns(
    existing: &[String],
    preferred: &[String],
    records: &[Record],
) -> Vec<String> {
    let mut columns = Vec::new();
    let mut seen = HashSet::new();

    push_unique(&mut columns, &mut seen, RECORD_ID_COLUMN);
    for column in existing.iter().chain(preferred) {
        push_unique(&mut columns, &mut seen, column);
    }
    for record in records {
        for name in record.fields.keys() {
            push_unique(&mut columns, &mut seen, name);
        }
    }

    columns
}

/// Render one record over `columns`.
pub(super) async fn build_row(
    record: &Record,
    columns: &[String],
    media: &MediaCache,
) -> Result<BuiltRow, MediaError> {
    let mut row = Row::new();
    let mut files = Vec::new();

    for column in columns {
        if column == RECORD_ID_COLUMN {
            row.insert(column.clone(), record.id.clone());
            continue;
        }

        let cell = match record.field(column) {
            Some(value) => {
                let (cell, used) = render_value(value, media).await?;
                files.extend(used);
                cell
            }
            None => String::new(),
        };
        row.insert(column.clone(), cell);
    }

    Ok(BuiltRow { row, media: files })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http::MockTransport;
    use crate::media::{MediaOptions, SharedMediaState};
    use serde_json::json;

    fn link_only_cache() -> MediaCache {
        MediaCache::new_with_transport(
            MediaOptions {
                enabled: false,
                ..MediaOptions::default()
            },
            Arc::new(SharedMediaState::new(None)),
            Arc::new(MockTransport::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_stringify_scalars() {
        assert_eq!(stringify_scalar(&json!(null)), "");
        assert_eq!(stringify_scalar(&json!(true)), "True");
        assert_eq!(stringify_scalar(&json!(false)), "False");
        assert_eq!(stringify_scalar(&json!(42)), "42");
        assert_eq!(stringify_scalar(&json!(1.5)), "1.5");
        assert_eq!(stringify_scalar(&json!("text")), "text");
    }

    #[test]
    fn test_objects_render_with_sorted_keys() {
        let value = json!({"b": 1, "a": {"d": true, "c": null}});
        assert_eq!(
            stringify_scalar(&value),
            r#"{"a":{"c":null,"d":true},"b":1}"#
        );
    }

    #[tokio::test]
    async fn test_lists_join_non_empty_items() {
        let cache = link_only_cache();
        let (cell, files) = render_value(&json!(["a", "", null, 3, false]), &cache)
            .await
            .unwrap();
        assert_eq!(cell, "a,3,False");
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_attachment_lists_render_tokens() {
        let cache = link_only_cache();
        let value = json!([
            {"id": "att1", "url": "https://dl.example.com/a.png", "filename": "a b.png"},
            {"id": "att2", "url": "https://dl.example.com/c.pdf", "filename": "c.pdf"}
        ]);
        let (cell, files) = render_value(&value, &cache).await.unwrap();
        assert_eq!(
            cell,
            "a_b.png (https://dl.example.com/a.png),c.pdf (https://dl.example.com/c.pdf)"
        );
        assert!(files.is_empty());
    }

    #[test]
    fn test_falsy_values() {
        assert!(is_falsy(None));
        assert!(is_falsy(Some(&json!(null))));
        assert!(is_falsy(Some(&json!(false))));
        assert!(is_falsy(Some(&json!(0))));
        assert!(is_falsy(Some(&json!(""))));
        assert!(is_falsy(Some(&json!([]))));
        assert!(!is_falsy(Some(&json!(true))));
        assert!(!is_falsy(Some(&json!("yes"))));
        assert!(!is_falsy(Some(&json!(1))));
    }

    #[test]
    fn test_compute_columns_orders_preferred_first() {
        let records = vec![
            Record::new("rec1", json!({"Zeta": 1, "Name": "a"})),
            Record::new("rec2", json!({"Alpha": 2})),
        ];
        let preferred = vec!["Name".to_string(), "Date".to_string()];

        assert_eq!(
            compute_columns(&preferred, &records),
            vec![RECORD_ID_COLUMN, "Name", "Date", "Zeta", "Alpha"]
        );
    }

    #[test]
    fn test_merge_columns_keeps_existing_order() {
        let existing = vec![
            RECORD_ID_COLUMN.to_string(),
            "Old".to_string(),
            "Name".to_string(),
        ];
        let records = vec![Record::new("rec1", json!({"Name": "a", "New": 1}))];

        assert_eq!(
            merge_columns(&existing, &["Name".to_string()], &records),
            vec![RECORD_ID_COLUMN, "Old", "Name", "New"]
        );
    }

    #[tokio::test]
    async fn test_build_row_fills_every_column() {
        let cache = link_only_cache();
        let record = Record::new("rec1", json!({"Name": "Launch", "Tags": ["a", "b"]}));
        let columns = vec![
            RECORD_ID_COLUMN.to_string(),
            "Name".to_string(),
            "Tags".to_string(),
            "Missing".to_string(),
        ];

        let built = build_row(&record, &columns, &cache).await.unwrap();
        assert_eq!(built.row[RECORD_ID_COLUMN], "rec1");
        assert_eq!(built.row["Tags"], "a,b");
        assert_eq!(built.row["Missing"], "");
    }
}
