// ABOUTME: Per-day scan index for stateframe tables, used to keep scans whole inside chunks
// ABOUTME: Provides the lookup trait, the tab-separated IFDB file reader and a per-run cache

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::error::SyncError;
use crate::time::Timestamp;

/// One record of a day's flare database index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub scan_id: String,
    pub start: Timestamp,
    pub end: Timestamp,
}

impl ScanRecord {
    pub fn new(scan_id: &str, start: Timestamp, end: Timestamp) -> Self {
        Self {
            scan_id: scan_id.to_string(),
            start,
            end,
        }
    }
}

/// A scan's time extent, `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    pub id: String,
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Index records for one UTC day, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanIndex {
    pub day: NaiveDate,
    pub records: Vec<ScanRecord>,
}

impl ScanIndex {
    pub fn new(day: NaiveDate, records: Vec<ScanRecord>) -> Self {
        Self { day, records }
    }

    /// Scan boundaries of the day, in increasing start order.
    ///
    /// Records are grouped by the first occurrence of each scan id. The last
    /// group is a sentinel boundary when its id is blank; otherwise a
    /// synthetic terminal boundary follows it. Each scan but the last ends
    /// where the next one starts; the last ends just after its final record.
    ///
    /// # Errors
    ///
    /// `ScanIndexUnavailable` when scan starts are not strictly increasing or
    /// the final scan ends before it starts.
    pub fn scans(&self) -> Result<Vec<Scan>, SyncError> {
        let mut first_seen: HashMap<&str, usize> = HashMap::new();
        let mut bounds = Vec::new();
        for (idx, record) in self.records.iter().enumerate() {
            if !first_seen.contains_key(record.scan_id.as_str()) {
                first_seen.insert(record.scan_id.as_str(), idx);
                bounds.push(idx);
            }
        }

        let Some(&last_group) = bounds.last() else {
            return Ok(Vec::new());
        };
        // TODO: a blank terminal id may hide an off-by-one in how the index
        // is written; revisit once the index producer documents it.
        let final_end = if self.records[last_group].scan_id.trim().is_empty() {
            bounds.pop();
            last_group
        } else {
            self.records.len()
        };

        let mut scans: Vec<Scan> = Vec::with_capacity(bounds.len());
        for (i, &first) in bounds.iter().enumerate() {
            let start = self.records[first].start;
            if let Some(previous) = scans.last_mut() {
                if start <= previous.start {
                    return Err(self.unavailable(format!(
                        "scan '{}' starts at {} which does not follow scan '{}' at {}",
                        self.records[first].scan_id, start, previous.id, previous.start
                    )));
                }
                previous.end = start;
            }
            let end = if i + 1 == bounds.len() {
                self.records[final_end - 1].end.plus_seconds(1)
            } else {
                // Replaced by the next scan's start on the next iteration.
                start
            };
            scans.push(Scan {
                id: self.records[first].scan_id.clone(),
                start,
                end,
            });
        }

        if let Some(last) = scans.last() {
            if last.end <= last.start {
                return Err(self.unavailable(format!(
                    "scan '{}' ends at {} before it starts at {}",
                    last.id,
                    last.end.plus_seconds(-1),
                    last.start
                )));
            }
        }
        Ok(scans)
    }

    fn unavailable(&self, reason: String) -> SyncError {
        SyncError::ScanIndexUnavailable {
            day: self.day,
            reason,
        }
    }
}

/// Lookup of a day's scan index (the flare database index).
#[async_trait]
pub trait ScanIndexSource: Send + Sync {
    /// Index for `day`, or `None` when the day has no index.
    async fn scan_index(&self, day: NaiveDate) -> Result<Option<Arc<ScanIndex>>, SyncError>;
}

/// Directory of `IFDB<YYYYMMDD>.txt` files.
///
/// Each file is tab-separated with a header line naming at least the
/// `SCANID`, `ST_TS` and `EN_TS` columns (LabVIEW seconds).
pub struct ScanIndexDir {
    dir: PathBuf,
}

impl ScanIndexDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_name(day: NaiveDate) -> String {
        format!("IFDB{}.txt", day.format("%Y%m%d"))
    }

    /// Parse one day file.
    pub fn parse(day: NaiveDate, text: &str) -> Result<ScanIndex, SyncError> {
        let unavailable = |reason: String| SyncError::ScanIndexUnavailable { day, reason };

        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let header: Vec<&str> = lines
            .next()
            .ok_or_else(|| unavailable("empty index file".to_string()))?
            .split('\t')
            .map(str::trim)
            .collect();
        let position = |name: &str| {
            header
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .ok_or_else(|| unavailable(format!("header has no {} column", name)))
        };
        let (id_col, start_col, end_col) = (position("SCANID")?, position("ST_TS")?, position("EN_TS")?);

        let mut records = Vec::new();
        for (idx, line) in lines.enumerate() {
            let fields: Vec<&str> = line.split('\t').collect();
            let field = |col: usize| fields.get(col).map(|f| f.trim()).unwrap_or("");
            let time = |col: usize| {
                field(col)
                    .parse::<f64>()
                    .ok()
                    .and_then(Timestamp::from_lv_seconds)
                    .ok_or_else(|| {
                        unavailable(format!(
                            "record {} has invalid time '{}'",
                            idx + 1,
                            field(col)
                        ))
                    })
            };
            records.push(ScanRecord {
                scan_id: field(id_col).to_string(),
                start: time(start_col)?,
                end: time(end_col)?,
            });
        }
        Ok(ScanIndex::new(day, records))
    }
}

#[async_trait]
impl ScanIndexSource for ScanIndexDir {
    async fn scan_index(&self, day: NaiveDate) -> Result<Option<Arc<ScanIndex>>, SyncError> {
        let path = self.dir.join(Self::file_name(day));
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No scan index at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(SyncError::ScanIndexUnavailable {
                    day,
                    reason: format!("failed to read {}: {}", path.display(), e),
                })
            }
        };
        Self::parse(day, &text).map(|index| Some(Arc::new(index)))
    }
}

/// Fixed set of indexes held in memory.
#[derive(Default)]
pub struct MemoryScanIndex {
    days: HashMap<NaiveDate, Arc<ScanIndex>>,
}

impl MemoryScanIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: ScanIndex) {
        self.days.insert(index.day, Arc::new(index));
    }
}

#[async_trait]
impl ScanIndexSource for MemoryScanIndex {
    async fn scan_index(&self, day: NaiveDate) -> Result<Option<Arc<ScanIndex>>, SyncError> {
        Ok(self.days.get(&day).cloned())
    }
}

/// Remembers found indexes for the lifetime of one run.
///
/// Written once per day, then only read, so concurrent jobs share it.
/// Failures and missing days are not cached.
pub struct ScanIndexCache {
    inner: Arc<dyn ScanIndexSource>,
    days: RwLock<HashMap<NaiveDate, Arc<ScanIndex>>>,
}

impl ScanIndexCache {
    pub fn new(inner: Arc<dyn ScanIndexSource>) -> Self {
        Self {
            inner,
            days: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ScanIndexSource for ScanIndexCache {
    async fn scan_index(&self, day: NaiveDate) -> Result<Option<Arc<ScanIndex>>, SyncError> {
        if let Ok(days) = self.days.read() {
            if let Some(index) = days.get(&day) {
                return Ok(Some(Arc::clone(index)));
            }
        }
        let found = self.inner.scan_index(day).await?;
        if let Some(index) = &found {
            if let Ok(mut days) = self.days.write() {
                days.insert(day, Arc::clone(index));
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn rec(id: &str, start: i64, end: i64) -> ScanRecord {
        ScanRecord::new(id, Timestamp(start), Timestamp(end))
    }

    fn ids(scans: &[Scan]) -> Vec<(&str, i64, i64)> {
        scans
            .iter()
            .map(|s| (s.id.as_str(), s.start.0, s.end.0))
            .collect()
    }

    #[test]
    fn test_blank_terminal_is_sentinel() {
        let index = ScanIndex::new(
            day(),
            vec![
                rec("A", 100, 109),
                rec("A", 110, 119),
                rec("B", 130, 139),
                rec("B", 140, 149),
                rec("", 150, 150),
            ],
        );
        assert_eq!(
            ids(&index.scans().unwrap()),
            vec![("A", 100, 130), ("B", 130, 150)]
        );
    }

    #[test]
    fn test_non_blank_terminal_gets_synthetic_boundary() {
        let index = ScanIndex::new(
            day(),
            vec![rec("A", 100, 119), rec("B", 130, 139), rec("B", 140, 149)],
        );
        assert_eq!(
            ids(&index.scans().unwrap()),
            vec![("A", 100, 130), ("B", 130, 150)]
        );
    }

    #[test]
    fn test_non_monotonic_starts_rejected() {
        let index = ScanIndex::new(day(), vec![rec("A", 200, 209), rec("B", 100, 109)]);
        assert!(matches!(
            index.scans(),
            Err(SyncError::ScanIndexUnavailable { .. })
        ));
    }

    #[test]
    fn test_empty_and_sentinel_only_days() {
        assert!(ScanIndex::new(day(), vec![]).scans().unwrap().is_empty());
        let sentinel_only = ScanIndex::new(day(), vec![rec("", 10, 10)]);
        assert!(sentinel_only.scans().unwrap().is_empty());
    }

    #[test]
    fn test_parse_day_file() {
        let text = "SCANID\tST_TS\tEN_TS\tPROJECT\n\
                    240501120000\t3797323200.0\t3797323259.9\tNormalObserving\n\
                    240501120000\t3797323260.0\t3797323319.9\tNormalObserving\n\
                    \t3797323320.0\t3797323320.0\t\n";
        let index = ScanIndexDir::parse(day(), text).unwrap();
        assert_eq!(index.records.len(), 3);
        assert_eq!(index.records[0].start, Timestamp(3_797_323_200));
        assert_eq!(index.records[1].end, Timestamp(3_797_323_319));
        assert_eq!(index.records[2].scan_id, "");

        let scans = index.scans().unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].end, Timestamp(3_797_323_320));
    }

    #[test]
    fn test_parse_rejects_bad_header_and_times() {
        assert!(ScanIndexDir::parse(day(), "ID\tSTART\n").is_err());
        assert!(ScanIndexDir::parse(day(), "SCANID\tST_TS\tEN_TS\nA\tsoon\t1\n").is_err());
    }

    #[tokio::test]
    async fn test_dir_source_missing_day_is_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("IFDB20240501.txt"),
            "SCANID\tST_TS\tEN_TS\nA\t100\t199\n",
        )
        .unwrap();
        let source = ScanIndexDir::new(dir.path());

        let found = source.scan_index(day()).await.unwrap().unwrap();
        assert_eq!(found.records.len(), 1);
        let missing = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert!(source.scan_index(missing).await.unwrap().is_none());
    }

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ScanIndexSource for Counting {
        async fn scan_index(&self, day: NaiveDate) -> Result<Option<Arc<ScanIndex>>, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Arc::new(ScanIndex::new(day, vec![rec("A", 1, 2)]))))
        }
    }

    #[tokio::test]
    async fn test_cache_reads_each_day_once() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let cache = ScanIndexCache::new(inner.clone());
        cache.scan_index(day()).await.unwrap();
        cache.scan_index(day()).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
