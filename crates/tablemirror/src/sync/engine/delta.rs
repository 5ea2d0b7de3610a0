//! Incremental merge of changed records into the previous row set.

use std::collections::BTreeSet;
use std::fmt;

use super::SyncOutcome;
use super::filter::delta_filter;
use super::rows::{build_row, is_falsy, merge_columns};
use crate::dataset::{SyncMetadata, Table};
use crate::fields::resolve_field;
use crate::media::{MediaCache, MediaRefs};
use crate::remote::{FetchRequest, RecordSource};
use crate::sync::cursor::{advance_cursor, format_cursor, max_timestamp};
use crate::sync::error::SyncError;
use crate::sync::{DatasetSpec, ProgressCallback, SyncMode, SyncModeOverride, SyncOptions};

/// Why a dataset cannot be updated incrementally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaBlocked {
    /// A full rebuild was requested.
    ForcedFull,
    /// No previous output file, or it is empty.
    NoPriorFile,
    /// The previous file has no record identifier column.
    MissingRecordIdColumn,
    /// No readable metadata from a previous run.
    NoMetadata,
    /// The previous metadata has no cursor.
    NoCursor,
    /// No "last modified" column could be found.
    NoLastModifiedField,
    /// The previous file was written with caching switched the other way.
    CacheModeChanged { was_cached: bool },
    /// Local links in the previous file use another prefix.
    LinkPrefixChanged,
    /// The cached types or the size limit changed since the last run.
    MediaSelectionChanged,
    /// The previous run left attachments out because its budget ran out.
    MediaIncomplete,
    /// The previous file mirrors a different base, table or view.
    SourceChanged,
    /// A file linked from the previous output is missing from the cache.
    MissingMedia { file: String },
    /// The remote rejected the delta filter.
    FilterRejected,
}

impl fmt::Display for DeltaBlocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaBlocked::ForcedFull => f.write_str("full sync requested"),
            DeltaBlocked::NoPriorFile => f.write_str("no previous output file"),
            DeltaBlocked::MissingRecordIdColumn => {
                f.write_str("previous output has no record id column")
            }
            DeltaBlocked::NoMetadata => f.write_str("no previous metadata"),
            DeltaBlocked::NoCursor => f.write_str("previous metadata has no sync cursor"),
            DeltaBlocked::NoLastModifiedField => f.write_str("no last-modified field found"),
            DeltaBlocked::CacheModeChanged { was_cached: true } => {
                f.write_str("media caching was disabled since the last run")
            }
            DeltaBlocked::CacheModeChanged { was_cached: false } => {
                f.write_str("media caching was enabled since the last run")
            }
            DeltaBlocked::LinkPrefixChanged => {
                f.write_str("media link prefix changed since the last run")
            }
            DeltaBlocked::MediaSelectionChanged => {
                f.write_str("cached media types or size limit changed since the last run")
            }
            DeltaBlocked::MediaIncomplete => {
                f.write_str("previous run skipped attachments over the download budget")
            }
            DeltaBlocked::SourceChanged => {
                f.write_str("base, table or view changed since the last run")
            }
            DeltaBlocked::MissingMedia { file } => write!(f, "cached media file missing: {}", file),
            DeltaBlocked::FilterRejected => f.write_str("remote rejected the delta filter"),
        }
    }
}

/// Everything a delta run needs, established up front.
#[derive(Debug)]
pub(super) struct DeltaPlan {
    pub table: Table,
    pub cursor: String,
    pub last_modified: String,
    pub published: Option<String>,
}

/// Whether the previous metadata describes the same remote source.
pub(super) fn same_source(metadata: &SyncMetadata, dataset: &DatasetSpec, base_id: &str) -> bool {
    metadata.base_id == base_id
        && metadata.table_id == dataset.table_id
        && metadata.view_id == dataset.view_id
}

/// Whether cells rendered last time would render the same way now.
fn check_media_settings(metadata: &SyncMetadata, media: &MediaCache) -> Result<(), DeltaBlocked> {
    let prefix = metadata
        .media_link_prefix
        .as_deref()
        .map(|p| p.trim_end_matches('/'));
    if prefix != Some(media.link_prefix()) {
        return Err(DeltaBlocked::LinkPrefixChanged);
    }

    let options = media.options();
    let types = options.selection.to_string();
    if metadata.media_types.as_deref() != Some(types.as_str())
        || metadata.max_file_size_bytes != options.max_file_size
    {
        return Err(DeltaBlocked::MediaSelectionChanged);
    }

    if metadata.media_incomplete {
        return Err(DeltaBlocked::MediaIncomplete);
    }
    Ok(())
}

/// Check every delta precondition.
pub(super) async fn plan(
    dataset: &DatasetSpec,
    options: &SyncOptions,
    media: &MediaCache,
    table: Option<Table>,
    metadata: Option<&SyncMetadata>,
) -> Result<DeltaPlan, DeltaBlocked> {
    if options.mode == SyncModeOverride::Full {
        return Err(DeltaBlocked::ForcedFull);
    }

    let table = table.ok_or(DeltaBlocked::NoPriorFile)?;
    if !table.has_record_ids() {
        return Err(DeltaBlocked::MissingRecordIdColumn);
    }

    let metadata = metadata.ok_or(DeltaBlocked::NoMetadata)?;
    let cursor = metadata.cursor().ok_or(DeltaBlocked::NoCursor)?.to_string();

    if metadata.media_cached != media.is_enabled() {
        return Err(DeltaBlocked::CacheModeChanged {
            was_cached: metadata.media_cached,
        });
    }
    if !same_source(metadata, dataset, &options.base_id) {
        return Err(DeltaBlocked::SourceChanged);
    }
    if media.is_enabled() {
        check_media_settings(metadata, media)?;
    }

    let last_modified = resolve_field(
        &dataset.last_modified_candidates,
        &table.columns,
        metadata.last_modified_field.as_deref(),
    )
    .ok_or(DeltaBlocked::NoLastModifiedField)?;
    let published = resolve_field(
        &dataset.published_candidates,
        &table.columns,
        metadata.published_field.as_deref(),
    );

    if media.is_enabled() {
        let linked: BTreeSet<&str> = table
            .cells()
            .flat_map(|cell| media.link_pattern().find_all(cell))
            .collect();
        for file in linked {
            if !media.is_cached(file).await {
                return Err(DeltaBlocked::MissingMedia {
                    file: file.to_string(),
                });
            }
        }
    }

    Ok(DeltaPlan {
        table,
        cursor,
        last_modified,
        published,
    })
}

/// Fetch records changed since the cursor and merge them in.
pub(super) async fn run<S: RecordSource + ?Sized>(
    source: &S,
    media: &MediaCache,
    dataset: &DatasetSpec,
    plan: DeltaPlan,
    on_progress: Option<&ProgressCallback>,
) -> Result<SyncOutcome, SyncError> {
    let filter = delta_filter(&plan.last_modified, plan.published.as_deref(), &plan.cursor);
    tracing::debug!(dataset = %dataset.name, filter = %filter, "Fetching changed records");

    let records = source
        .fetch_all(
            FetchRequest {
                dataset: &dataset.name,
                table_id: &dataset.table_id,
                view_id: &dataset.view_id,
                filter: Some(&filter),
            },
            on_progress,
        )
        .await?;

    let pattern = media.link_pattern();
    let mut table = plan.table;
    let mut refs = MediaRefs::new();
    refs.add_links(pattern, table.cells());

    table.columns = merge_columns(&table.columns, &dataset.preferred_columns, &records);

    let mut changed = 0usize;
    for record in &records {
        let previous = table.rows.remove(&record.id);
        if let Some(previous) = &previous {
            refs.release_links(pattern, previous.values().map(String::as_str));
        }

        if let Some(published) = plan.published.as_deref()
            && is_falsy(record.field(published))
        {
            if previous.is_some() {
                tracing::debug!(dataset = %dataset.name, record = %record.id, "Removing unpublished record");
                changed += 1;
            }
            continue;
        }

        let built = build_row(record, &table.columns, media).await?;
        for file in built.media {
            refs.add(file);
        }
        table.rows.insert(record.id.clone(), built.row);
        changed += 1;
    }

    let observed = max_timestamp(&records, &plan.last_modified);
    let cursor = format_cursor(advance_cursor(Some(&plan.cursor), observed));

    Ok(SyncOutcome {
        mode: SyncMode::Delta,
        changed,
        published_field: plan.published,
        last_modified_field: Some(plan.last_modified),
        cursor,
        media_in_use: refs.in_use().map(str::to_string).collect(),
        table,
    })
}
