use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::dates::{parse_dt_from_logfile_name, DateError, DateRange};
use crate::decompress::{append_decompressed, DecompressError};
use crate::store::{Store, StoreError};
use crate::utils::{gen_month_prefixes, local_file_name};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Date(#[from] DateError),
    #[error("listing {prefix}: {source}")]
    List {
        prefix: String,
        #[source]
        source: StoreError,
    },
    #[error("downloading {key}: {source}")]
    Download {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Decompress(#[from] DecompressError),
    #[error("key '{0}' has no file name to stage locally")]
    NoFileName(String),
    #[error("removing temporary file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Order in which selected files are appended to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppendOrder {
    /// month order, then whatever order the store lists keys in
    #[default]
    Discovery,
    /// by embedded file name date, ties keep discovery order
    EmbeddedDate,
}

/// What to do with a key whose name carries no date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndatedPolicy {
    #[default]
    Abort,
    Skip,
}

/// Everything one run needs, passed explicitly through each stage.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub range: DateRange,
    pub destination: PathBuf,
    /// where downloads are staged before being appended
    pub staging_dir: PathBuf,
    pub order: AppendOrder,
    pub undated: UndatedPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub key: String,
    pub date: NaiveDate,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    pub months: usize,
    pub listed: usize,
    pub selected: usize,
    pub skipped_undated: usize,
    pub downloaded_bytes: u64,
    pub appended_bytes: u64,
}

pub async fn fetch_logs(store: &Store, job: &FetchJob) -> Result<FetchSummary, FetchError> {
    let mut summary = FetchSummary::default();

    let prefixes = gen_month_prefixes(&job.range);
    summary.months = prefixes.len();

    let keys = list_months(store, &prefixes).await?;
    summary.listed = keys.len();

    let (mut files, skipped) = select_in_range(keys, &job.range, job.undated)?;
    summary.skipped_undated = skipped;
    summary.selected = files.len();

    if job.order == AppendOrder::EmbeddedDate {
        // stable, so files sharing a date stay in listing order
        files.sort_by_key(|file| file.date);
    }

    log::info!(
        "{} of {} listed files fall within {} - {}",
        files.len(),
        summary.listed,
        job.range.start(),
        job.range.end()
    );

    for file in &files {
        let (downloaded, appended) = fetch_and_append(store, file, job).await?;
        summary.downloaded_bytes += downloaded;
        summary.appended_bytes += appended;
    }

    Ok(summary)
}

/// lists every month prefix in turn, keeping month order
pub async fn list_months(store: &Store, prefixes: &[String]) -> Result<Vec<String>, FetchError> {
    let mut all_files = Vec::new();
    for prefix in prefixes {
        let files_in_dir = store.list(prefix).await.map_err(|source| FetchError::List {
            prefix: prefix.clone(),
            source,
        })?;
        log::info!("listed {} files under {}", files_in_dir.len(), prefix);
        all_files.extend(files_in_dir);
    }
    Ok(all_files)
}

/// Keeps the keys whose embedded date lies in `range`, in their original order.
///
/// Returns the selected files and how many undated keys were skipped.
pub fn select_in_range(
    keys: Vec<String>,
    range: &DateRange,
    undated: UndatedPolicy,
) -> Result<(Vec<LogFile>, usize), FetchError> {
    let mut selected = Vec::new();
    let mut skipped = 0;

    for key in keys {
        let date = match parse_dt_from_logfile_name(&key) {
            Ok(date) => date,
            Err(e) if undated == UndatedPolicy::Skip => {
                log::warn!("skipping {}: {}", key, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if range.contains(date) {
            selected.push(LogFile { key, date });
        } else {
            log::debug!("{} ({}) is out of range", key, date);
        }
    }

    Ok((selected, skipped))
}

async fn fetch_and_append(
    store: &Store,
    file: &LogFile,
    job: &FetchJob,
) -> Result<(u64, u64), FetchError> {
    let name = local_file_name(&file.key).ok_or_else(|| FetchError::NoFileName(file.key.clone()))?;
    let local = job.staging_dir.join(name);

    let downloaded = store
        .download(&file.key, &local)
        .await
        .map_err(|source| FetchError::Download {
            key: file.key.clone(),
            source,
        })?;

    let appended = append_decompressed(&local, &job.destination)?;

    tokio::fs::remove_file(&local)
        .await
        .map_err(|e| FetchError::Io(local.clone(), e))?;

    log::info!("appended {} ({} bytes)", file.key, appended);
    Ok((downloaded, appended))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_date;
    use bytes::Bytes;
    use flate2::write::GzEncoder;
    use object_store::{memory::InMemory, path::Path, ObjectStore};
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::new(parse_date(start).unwrap(), parse_date(end).unwrap()).unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    async fn store_with(objects: Vec<(&str, Vec<u8>)>) -> Store {
        let memory = InMemory::new();
        for (key, data) in objects {
            memory.put(&Path::from(key), Bytes::from(data)).await.unwrap();
        }
        Store::from_object_store(Arc::new(memory))
    }

    fn job(dir: &TempDir, range: DateRange) -> FetchJob {
        let staging_dir = dir.path().join("staging");
        std::fs::create_dir(&staging_dir).unwrap();
        FetchJob {
            range,
            destination: dir.path().join("merged.log"),
            staging_dir,
            order: AppendOrder::Discovery,
            undated: UndatedPolicy::Abort,
        }
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn selects_inclusive_boundaries() {
        let (files, skipped) = select_in_range(
            keys(&[
                "201612/a-20161130.log.gz",
                "201612/a-20161201.log.gz",
                "201612/a-20161215.log.gz",
                "201612/a-20161220.log.gz",
                "201612/a-20161221.log.gz",
            ]),
            &range("20161201", "20161220"),
            UndatedPolicy::Abort,
        )
        .unwrap();

        let selected: Vec<_> = files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(
            selected,
            vec![
                "201612/a-20161201.log.gz",
                "201612/a-20161215.log.gz",
                "201612/a-20161220.log.gz",
            ]
        );
        assert_eq!(skipped, 0);
    }

    #[test]
    fn undated_key_aborts_by_default() {
        let err = select_in_range(
            keys(&["201612/a-20161201.log.gz", "201612/README"]),
            &range("20161201", "20161231"),
            UndatedPolicy::Abort,
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Date(DateError::NoEmbeddedDate(_))));
    }

    #[test]
    fn undated_key_can_be_skipped() {
        let (files, skipped) = select_in_range(
            keys(&["201612/a-20161201.log.gz", "201612/README"]),
            &range("20161201", "20161231"),
            UndatedPolicy::Skip,
        )
        .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn fetches_only_matching_files_across_months() {
        let store = store_with(vec![
            ("201611/worker1-20161128.log.gz", gzip(b"nov 28\n")),
            ("201611/worker1-20161130.log.gz", gzip(b"nov 30 a\nnov 30 b\n")),
            ("201612/worker1-20161201.log.gz", gzip(b"dec 01\n")),
            ("201612/worker2-20161203.log.gz", zstd::encode_all(&b"dec 03 zstd\n"[..], 0).unwrap()),
            ("201612/worker1-20161205.log.gz", gzip(b"dec 05\n")),
            ("201701/worker1-20170101.log.gz", gzip(b"jan 01\n")),
        ])
        .await;
        let dir = tempdir().unwrap();
        let job = job(&dir, range("20161129", "20161203"));

        let summary = fetch_logs(&store, &job).await.unwrap();

        let merged = std::fs::read(&job.destination).unwrap();
        assert_eq!(merged, b"nov 30 a\nnov 30 b\ndec 01\ndec 03 zstd\n");
        assert_eq!(summary.months, 2);
        assert_eq!(summary.listed, 5);
        assert_eq!(summary.selected, 3);
        assert_eq!(summary.appended_bytes, merged.len() as u64);
        assert_eq!(
            std::fs::metadata(&job.destination).unwrap().len(),
            (b"nov 30 a\nnov 30 b\n".len() + b"dec 01\n".len() + b"dec 03 zstd\n".len()) as u64
        );
        assert_eq!(std::fs::read_dir(&job.staging_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn root_level_keys_and_folder_markers() {
        let store = store_with(vec![
            ("201612/", Vec::new()),
            ("201612/archive/", Vec::new()),
            ("201612-worker3-20161202.log.gz", gzip(b"root dec 02\n")),
            ("201612/worker3-20161203.log.gz", gzip(b"dec 03\n")),
            ("20161201-worker3.log.gz", gzip(b"root dec 01\n")),
        ])
        .await;
        let dir = tempdir().unwrap();
        let job = job(&dir, range("20161201", "20161231"));

        let summary = fetch_logs(&store, &job).await.unwrap();

        assert_eq!(summary.listed, 3);
        assert_eq!(summary.selected, 3);
        assert_eq!(
            std::fs::read(&job.destination).unwrap(),
            b"root dec 02\ndec 03\nroot dec 01\n"
        );
    }

    #[tokio::test]
    async fn appends_to_existing_destination() {
        let store = store_with(vec![("201612/worker1-20161201.log.gz", gzip(b"new\n"))]).await;
        let dir = tempdir().unwrap();
        let job = job(&dir, range("20161201", "20161201"));
        std::fs::write(&job.destination, b"old\n").unwrap();

        let summary = fetch_logs(&store, &job).await.unwrap();

        assert_eq!(std::fs::read(&job.destination).unwrap(), b"old\nnew\n");
        assert_eq!(summary.downloaded_bytes, gzip(b"new\n").len() as u64);
        assert_eq!(summary.appended_bytes, 4);
    }

    #[tokio::test]
    async fn sorts_by_embedded_date_when_asked() {
        // listing order is lexical, so worker1 comes before worker2 regardless of date
        let store = store_with(vec![
            ("201612/worker1-20161205.log.gz", gzip(b"dec 05\n")),
            ("201612/worker2-20161201.log.gz", gzip(b"dec 01\n")),
        ])
        .await;
        let dir = tempdir().unwrap();
        let mut job = job(&dir, range("20161201", "20161231"));

        fetch_logs(&store, &job).await.unwrap();
        assert_eq!(std::fs::read(&job.destination).unwrap(), b"dec 05\ndec 01\n");

        std::fs::remove_file(&job.destination).unwrap();
        job.order = AppendOrder::EmbeddedDate;
        fetch_logs(&store, &job).await.unwrap();
        assert_eq!(std::fs::read(&job.destination).unwrap(), b"dec 01\ndec 05\n");
    }

    #[tokio::test]
    async fn corrupt_file_aborts_run() {
        let store = store_with(vec![
            ("201612/worker1-20161201.log.gz", gzip(b"dec 01\n")),
            ("201612/worker1-20161202.log.gz", b"not compressed".to_vec()),
            ("201612/worker1-20161203.log.gz", gzip(b"dec 03\n")),
        ])
        .await;
        let dir = tempdir().unwrap();
        let job = job(&dir, range("20161201", "20161231"));

        let err = fetch_logs(&store, &job).await.unwrap_err();

        assert!(matches!(err, FetchError::Decompress(DecompressError::UnknownFormat(_))));
        // already appended data stays
        assert_eq!(std::fs::read(&job.destination).unwrap(), b"dec 01\n");
    }

    #[tokio::test]
    async fn empty_months_produce_no_destination() {
        let store = store_with(vec![]).await;
        let dir = tempdir().unwrap();
        let job = job(&dir, range("20161201", "20170131"));

        let summary = fetch_logs(&store, &job).await.unwrap();

        assert_eq!(summary.months, 2);
        assert_eq!(summary.selected, 0);
        assert!(!job.destination.exists());
    }
}
