//! Complete rebuild of a dataset.

use std::collections::BTreeSet;

use super::SyncOutcome;
use super::filter::published_filter;
use super::rows::{build_row, compute_columns, is_falsy};
use crate::dataset::Table;
use crate::fields::discover_field_from_records;
use crate::media::MediaCache;
use crate::remote::{FetchRequest, Record, RecordSource};
use crate::sync::cursor::{advance_cursor, format_cursor, max_timestamp};
use crate::sync::error::SyncError;
use crate::sync::{DatasetSpec, ProgressCallback, SyncMode, SyncProgress, emit};

/// Hints carried over from a previous run of the same source.
#[derive(Debug, Default)]
pub(super) struct FullHints {
    /// Published column, used as a server-side filter.
    pub published: Option<String>,
    /// Previous cursor; the new one never falls behind it.
    pub cursor: Option<String>,
}

async fn fetch<S: RecordSource + ?Sized>(
    source: &S,
    dataset: &DatasetSpec,
    filter: Option<&str>,
    on_progress: Option<&ProgressCallback>,
) -> crate::remote::Result<Vec<Record>> {
    source
        .fetch_all(
            FetchRequest {
                dataset: &dataset.name,
                table_id: &dataset.table_id,
                view_id: &dataset.view_id,
                filter,
            },
            on_progress,
        )
        .await
}

/// Fetch every (published) record and build a fresh row set.
pub(super) async fn run<S: RecordSource + ?Sized>(
    source: &S,
    media: &MediaCache,
    dataset: &DatasetSpec,
    hints: FullHints,
    on_progress: Option<&ProgressCallback>,
) -> Result<SyncOutcome, SyncError> {
    let mut published_hint = hints.published;
    let filter = published_hint.as_deref().map(published_filter);

    let records = match fetch(source, dataset, filter.as_deref(), on_progress).await {
        Ok(records) => records,
        Err(e) if e.is_unknown_field() && filter.is_some() => {
            tracing::warn!(
                dataset = %dataset.name,
                field = published_hint.as_deref().unwrap_or_default(),
                "Published field no longer exists, fetching without a filter"
            );
            emit(
                on_progress,
                SyncProgress::FilterRejected {
                    dataset: dataset.name.clone(),
                    filter: filter.clone().unwrap_or_default(),
                },
            );
            published_hint = None;
            fetch(source, dataset, None, on_progress).await?
        }
        Err(e) => return Err(e.into()),
    };

    let published = discover_field_from_records(&records, &dataset.published_candidates)
        .or(published_hint);
    let last_modified =
        discover_field_from_records(&records, &dataset.last_modified_candidates);

    let total = records.len();
    let kept: Vec<Record> = match published.as_deref() {
        Some(field) => records
            .into_iter()
            .filter(|record| !is_falsy(record.field(field)))
            .collect(),
        None => records,
    };
    if kept.len() < total {
        tracing::debug!(
            dataset = %dataset.name,
            dropped = total - kept.len(),
            "Dropped unpublished records"
        );
    }

    let mut table = Table::new(compute_columns(&dataset.preferred_columns, &kept));
    let mut media_in_use = BTreeSet::new();
    for record in &kept {
        let built = build_row(record, &table.columns, media).await?;
        media_in_use.extend(built.media);
        table.rows.insert(record.id.clone(), built.row);
    }

    let observed = last_modified
        .as_deref()
        .and_then(|field| max_timestamp(&kept, field));
    let cursor = format_cursor(advance_cursor(hints.cursor.as_deref(), observed));

    Ok(SyncOutcome {
        mode: SyncMode::Full,
        changed: table.len(),
        published_field: published,
        last_modified_field: last_modified,
        cursor,
        media_in_use,
        table,
    })
}
