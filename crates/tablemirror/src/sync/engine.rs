//! Per-dataset sync engine.
//!
//! Each dataset is brought up to date in one of two ways:
//!
//! - **Delta**: when the previous output, its metadata and the media cache
//!   are all trustworthy, only records modified after the stored cursor (and
//!   unpublished ones) are fetched and merged into the previous rows.
//! - **Full**: otherwise every record is fetched and the rows are rebuilt.
//!
//! Every reason a delta sync is not possible is a [`DeltaBlocked`] value and
//! is logged; none of them is an error.
//!
//! # Example
//!
//! ```ignore
//! use tablemirror::sync::{DatasetSpec, SyncOptions, sync_dataset};
//!
//! let result = sync_dataset(&client, &media, &dataset, &options, None).await?;
//! println!("{}: {} rows ({} changed)", result.dataset, result.record_count, result.changed_count);
//! ```

mod delta;
mod filter;
mod full;
mod rows;

use std::collections::BTreeSet;

use chrono::Utc;

pub use delta::DeltaBlocked;

use super::cursor::format_cursor;
use super::error::SyncError;
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{DatasetSpec, DatasetSyncResult, SyncMode, SyncOptions};
use crate::dataset::{SyncMetadata, Table, read_metadata, read_table, write_metadata, write_table};
use crate::media::MediaCache;
use crate::remote::RecordSource;

/// Result of either strategy, before anything is written.
#[derive(Debug)]
struct SyncOutcome {
    table: Table,
    mode: SyncMode,
    changed: usize,
    published_field: Option<String>,
    last_modified_field: Option<String>,
    cursor: String,
    media_in_use: BTreeSet<String>,
}

/// Bring one dataset up to date and write its files.
///
/// Attachments deferred by the download budget while this call runs mark
/// the output incomplete, so datasets sharing `media` must run one at a time.
/// Files linked by the written rows are added to the run-wide in-use set of
/// `media`. On error nothing is written for this dataset.
pub async fn sync_dataset<S: RecordSource + ?Sized>(
    source: &S,
    media: &MediaCache,
    dataset: &DatasetSpec,
    options: &SyncOptions,
    on_progress: Option<&ProgressCallback>,
) -> Result<DatasetSyncResult, SyncError> {
    emit(
        on_progress,
        SyncProgress::DatasetStarted {
            dataset: dataset.name.clone(),
        },
    );

    let deferred_before = media.shared().deferred_count();
    let prior_table = read_table(&dataset.output_path).await?;
    let prior_metadata = read_metadata(&dataset.metadata_path).await?;

    let attempt = match delta::plan(
        dataset,
        options,
        media,
        prior_table,
        prior_metadata.as_ref(),
    )
    .await
    {
        Ok(plan) => match delta::run(source, media, dataset, plan, on_progress).await {
            Ok(outcome) => Ok(outcome),
            Err(SyncError::Remote(e)) if e.is_unknown_field() => {
                emit(
                    on_progress,
                    SyncProgress::FilterRejected {
                        dataset: dataset.name.clone(),
                        filter: "delta".to_string(),
                    },
                );
                Err(DeltaBlocked::FilterRejected)
            }
            Err(e) => return Err(e),
        },
        Err(blocked) => Err(blocked),
    };

    let (outcome, fallback_reason) = match attempt {
        Ok(outcome) => (outcome, None),
        Err(blocked) => {
            let reason = blocked.to_string();
            if blocked == DeltaBlocked::ForcedFull {
                tracing::info!(dataset = %dataset.name, "Running full sync: {}", reason);
            } else {
                tracing::warn!(dataset = %dataset.name, "Delta sync not possible, running full sync: {}", reason);
            }
            emit(
                on_progress,
                SyncProgress::DeltaFallback {
                    dataset: dataset.name.clone(),
                    reason: reason.clone(),
                },
            );

            let hints = full_hints(prior_metadata.as_ref(), dataset, options);
            let outcome = full::run(source, media, dataset, hints, on_progress).await?;
            (outcome, Some(reason))
        }
    };

    let incomplete = media.shared().deferred_count() > deferred_before;
    persist(
        media,
        dataset,
        options,
        outcome,
        fallback_reason,
        incomplete,
        on_progress,
    )
    .await
}

async fn persist(
    media: &MediaCache,
    dataset: &DatasetSpec,
    options: &SyncOptions,
    outcome: SyncOutcome,
    fallback_reason: Option<String>,
    incomplete: bool,
    on_progress: Option<&ProgressCallback>,
) -> Result<DatasetSyncResult, SyncError> {
    let SyncOutcome {
        table,
        mode,
        changed,
        published_field,
        last_modified_field,
        cursor,
        media_in_use,
    } = outcome;

    write_table(&dataset.output_path, &table).await?;

    let metadata = SyncMetadata {
        generated_at_utc: format_cursor(Utc::now()),
        dataset: dataset.name.clone(),
        record_count: table.len(),
        media_cached: media.is_enabled(),
        media_files_in_use: media_in_use.len(),
        media_link_prefix: Some(media.link_prefix().to_string()),
        media_types: Some(media.options().selection.to_string()),
        max_file_size_bytes: media.options().max_file_size,
        media_incomplete: media.is_enabled() && incomplete,
        base_id: options.base_id.clone(),
        table_id: dataset.table_id.clone(),
        view_id: dataset.view_id.clone(),
        sync_mode: Some(mode),
        changed_record_count: changed,
        published_field,
        last_modified_field,
        sync_cursor: Some(cursor.clone()),
    };
    write_metadata(&dataset.metadata_path, &metadata).await?;

    media.shared().mark_in_use(media_in_use.iter().cloned());
    if metadata.media_incomplete {
        tracing::warn!(
            dataset = %dataset.name,
            "Download budget ran out; the next run rebuilds this dataset"
        );
    }

    tracing::info!(
        dataset = %dataset.name,
        mode = %mode,
        records = table.len(),
        changed,
        cursor = %cursor,
        "Dataset written"
    );
    emit(
        on_progress,
        SyncProgress::DatasetWritten {
            dataset: dataset.name.clone(),
            mode,
            records: table.len(),
            changed,
        },
    );

    Ok(DatasetSyncResult {
        dataset: dataset.name.clone(),
        mode,
        fallback_reason,
        record_count: table.len(),
        changed_count: changed,
        media_in_use: media_in_use.len(),
        cursor,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::http::MockTransport;
    use crate::media::{MediaOptions, SharedMediaState};
    use crate::remote::{FetchRequest, Record, RemoteError};
    use crate::sync::{RECORD_ID_COLUMN, SyncModeOverride};

    /// Serves canned records per filter and records the filters it saw.
    #[derive(Default)]
    struct FakeSource {
        responses: Mutex<HashMap<Option<String>, Vec<Record>>>,
        unknown_fields: Mutex<Vec<String>>,
        seen: Mutex<Vec<Option<String>>>,
    }

    impl FakeSource {
        fn respond(&self, filter: Option<&str>, records: Vec<Record>) {
            self.responses
                .lock()
                .unwrap()
                .insert(filter.map(str::to_string), records);
        }

        fn reject(&self, filter: &str) {
            self.unknown_fields.lock().unwrap().push(filter.to_string());
        }

        fn filters(&self) -> Vec<Option<String>> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecordSource for FakeSource {
        async fn fetch_all(
            &self,
            request: FetchRequest<'_>,
            _on_progress: Option<&ProgressCallback>,
        ) -> crate::remote::Result<Vec<Record>> {
            let filter = request.filter.map(str::to_string);
            self.seen.lock().unwrap().push(filter.clone());

            if let Some(f) = &filter
                && self.unknown_fields.lock().unwrap().contains(f)
            {
                return Err(RemoteError::UnknownField {
                    message: "UNKNOWN_FIELD_NAME".to_string(),
                });
            }

            Ok(self
                .responses
                .lock()
                .unwrap()
                .get(&filter)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn dataset(dir: &Path) -> DatasetSpec {
        DatasetSpec::new(
            "events",
            "tblEvents",
            "viwGrid",
            dir.join("events.csv"),
            dir.join("events.json"),
        )
        .with_preferred_columns(["Name"])
    }

    fn options() -> SyncOptions {
        SyncOptions {
            base_id: "appBase".to_string(),
            ..SyncOptions::default()
        }
    }

    fn link_only_media() -> MediaCache {
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

    fn record(id: &str, fields: Value) -> Record {
        Record::new(id, fields)
    }

    #[tokio::test]
    async fn test_first_run_is_full_and_drops_unpublished() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default();
        source.respond(
            None,
            vec![
                record("recA", json!({"Name": "A", "Published": true, "Last Modified": "2024-01-01T00:00:00.000Z"})),
                record("recB", json!({"Name": "B", "Published": false, "Last Modified": "2024-02-01T00:00:00.000Z"})),
            ],
        );

        let media = link_only_media();
        let result = sync_dataset(&source, &media, &dataset(dir.path()), &options(), None)
            .await
            .unwrap();

        assert_eq!(result.mode, SyncMode::Full);
        assert_eq!(result.fallback_reason.as_deref(), Some("no previous output file"));
        assert_eq!(result.record_count, 1);
        assert_eq!(result.cursor, "2024-01-01T00:00:00.000Z");

        let table = read_table(&dir.path().join("events.csv")).await.unwrap().unwrap();
        assert_eq!(table.columns[0], RECORD_ID_COLUMN);
        assert_eq!(table.columns[1], "Name");
        assert!(table.rows.contains_key("recA"));

        let metadata = read_metadata(&dir.path().join("events.json")).await.unwrap().unwrap();
        assert_eq!(metadata.published_field.as_deref(), Some("Published"));
        assert_eq!(metadata.last_modified_field.as_deref(), Some("Last Modified"));
        assert_eq!(metadata.sync_mode, Some(SyncMode::Full));
    }

    #[tokio::test]
    async fn test_second_run_uses_delta_filter() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default();
        source.respond(
            None,
            vec![record("recA", json!({"Name": "A", "Last Modified": "2024-01-01T00:00:00.000Z"}))],
        );
        let media = link_only_media();
        let spec = dataset(dir.path());

        sync_dataset(&source, &media, &spec, &options(), None).await.unwrap();
        let second = sync_dataset(&source, &media, &spec, &options(), None).await.unwrap();

        assert_eq!(second.mode, SyncMode::Delta);
        assert_eq!(second.changed_count, 0);
        assert_eq!(second.record_count, 1);
        assert_eq!(
            source.filters().last().cloned().flatten().as_deref(),
            Some("IS_AFTER({Last Modified}, '2024-01-01T00:00:00.000Z')")
        );
    }

    #[tokio::test]
    async fn test_forced_full_skips_delta() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default();
        source.respond(
            None,
            vec![record("recA", json!({"Name": "A", "Last Modified": "2024-01-01T00:00:00.000Z"}))],
        );
        let media = link_only_media();
        let spec = dataset(dir.path());
        sync_dataset(&source, &media, &spec, &options(), None).await.unwrap();

        let forced = SyncOptions {
            mode: SyncModeOverride::Full,
            ..options()
        };
        let result = sync_dataset(&source, &media, &spec, &forced, None).await.unwrap();
        assert_eq!(result.mode, SyncMode::Full);
        assert_eq!(result.fallback_reason.as_deref(), Some("full sync requested"));
    }

    #[tokio::test]
    async fn test_rejected_delta_filter_falls_back_to_full() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default();
        source.respond(
            None,
            vec![record("recA", json!({"Name": "A", "Last Modified": "2024-01-01T00:00:00.000Z"}))],
        );
        let media = link_only_media();
        let spec = dataset(dir.path());
        sync_dataset(&source, &media, &spec, &options(), None).await.unwrap();

        source.reject("IS_AFTER({Last Modified}, '2024-01-01T00:00:00.000Z')");
        let result = sync_dataset(&source, &media, &spec, &options(), None).await.unwrap();

        assert_eq!(result.mode, SyncMode::Full);
        assert_eq!(result.fallback_reason.as_deref(), Some("remote rejected the delta filter"));
    }

    #[tokio::test]
    async fn test_rejected_published_filter_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let spec = dataset(dir.path());
        let metadata = SyncMetadata {
            base_id: "appBase".to_string(),
            table_id: "tblEvents".to_string(),
            view_id: "viwGrid".to_string(),
            published_field: Some("Gone".to_string()),
            ..SyncMetadata::default()
        };
        write_metadata(&spec.metadata_path, &metadata).await.unwrap();

        let source = FakeSource::default();
        source.reject("{Gone}");
        source.respond(None, vec![record("recA", json!({"Name": "A"}))]);

        let result = sync_dataset(&source, &link_only_media(), &spec, &options(), None)
            .await
            .unwrap();

        assert_eq!(result.record_count, 1);
        assert_eq!(source.filters(), vec![Some("{Gone}".to_string()), None]);
        let metadata = read_metadata(&spec.metadata_path).await.unwrap().unwrap();
        assert!(metadata.published_field.is_none());
    }

    #[tokio::test]
    async fn test_fetch_errors_leave_previous_files_untouched() {
        struct FailingSource;

        #[async_trait]
        impl RecordSource for FailingSource {
            async fn fetch_all(
                &self,
                _request: FetchRequest<'_>,
                _on_progress: Option<&ProgressCallback>,
            ) -> crate::remote::Result<Vec<Record>> {
                Err(RemoteError::api(500, "boom"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let spec = dataset(dir.path());
        let err = sync_dataset(&FailingSource, &link_only_media(), &spec, &options(), None)
            .await
            .expect_err("fetch failure is fatal");

        assert!(matches!(err, SyncError::Remote(RemoteError::Api { status: 500, .. })));
        assert!(!spec.output_path.exists());
        assert!(!spec.metadata_path.exists());
    }
}
