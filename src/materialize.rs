//! Writes walk results into a destination tree
//!
//! Siblings are written concurrently. Every targeted blob advances the shared
//! counter exactly once, whether it was written or skipped, so progress ends
//! at the targeted total even when individual files fail.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tokio::task::JoinSet;

use crate::destination::Destination;
use crate::error::Error;
use crate::progress::{Progress, ProgressSink};
use crate::storage::BlobSource;
use crate::walk::{EntryKind, WalkNode, WalkResult};

/// Outcome of one materialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Blobs the walk targeted
    pub total: usize,
    pub written: usize,
    pub skipped: usize,
}

impl MaterializeReport {
    pub fn is_complete(&self) -> bool {
        self.written == self.total
    }
}

#[derive(Debug, Default)]
struct Counts {
    cur: usize,
    written: usize,
}

/// Shared counter for one materialization; emission happens under the lock so
/// the sink observes `cur` in increasing order
struct Tally {
    total: usize,
    counts: Mutex<Counts>,
    progress: Arc<dyn ProgressSink>,
}

impl Tally {
    fn new(total: usize, progress: Arc<dyn ProgressSink>) -> Self {
        Tally {
            total,
            counts: Mutex::new(Counts::default()),
            progress,
        }
    }

    fn record(&self, path: &str, written: bool) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.cur += 1;
        if written {
            counts.written += 1;
        }
        self.progress.on_progress(Progress::counted(
            counts.cur,
            self.total,
            format!("Write ({}/{}): {}", counts.cur, self.total, path),
        ));
    }

    fn skip_subtree(&self, node: &WalkNode) {
        match node.kind {
            EntryKind::Blob => self.record(&node.path, false),
            EntryKind::Tree => {
                for child in &node.children {
                    self.skip_subtree(child);
                }
            }
        }
    }

    fn report(&self) -> MaterializeReport {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        MaterializeReport {
            total: self.total,
            written: counts.written,
            skipped: counts.cur - counts.written,
        }
    }
}

type CopyTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Applies walk results against a destination, reading blobs from `source`
pub struct Materializer<S> {
    source: Arc<S>,
    progress: Arc<dyn ProgressSink>,
}

impl<S: BlobSource + 'static> Materializer<S> {
    pub fn new(source: Arc<S>, progress: Arc<dyn ProgressSink>) -> Self {
        Materializer { source, progress }
    }

    /// Write every retained entry of `walk` below `root`.
    ///
    /// Never fails: unreadable or unwritable files are logged and skipped.
    pub async fn materialize<D: Destination>(&self, root: D, walk: WalkResult) -> MaterializeReport {
        let tally = Arc::new(Tally::new(walk.total, Arc::clone(&self.progress)));

        copy_dir(
            Arc::clone(&self.source),
            Arc::new(root),
            walk.root,
            Arc::clone(&tally),
        )
        .await;

        if walk.total == 0 {
            self.progress
                .on_progress(Progress::counted(0, 0, "Nothing to write"));
        }

        let report = tally.report();
        if report.skipped > 0 {
            tracing::warn!(
                "Wrote {} of {} file(s), {} skipped",
                report.written,
                report.total,
                report.skipped
            );
        } else {
            tracing::info!("Wrote {} file(s)", report.written);
        }
        report
    }
}

fn copy_dir<S, D>(source: Arc<S>, dir: Arc<D>, node: WalkNode, tally: Arc<Tally>) -> CopyTask
where
    S: BlobSource + 'static,
    D: Destination,
{
    Box::pin(async move {
        let mut tasks = JoinSet::new();

        for child in node.children {
            let source = Arc::clone(&source);
            let dir = Arc::clone(&dir);
            let tally = Arc::clone(&tally);

            match child.kind {
                EntryKind::Tree => {
                    tasks.spawn(async move {
                        let name = child.name.clone();
                        let opened = tokio::task::spawn_blocking(move || dir.open_dir(&name))
                            .await
                            .map_err(anyhow::Error::from)
                            .and_then(|opened| opened);
                        match opened {
                            Ok(subdir) => copy_dir(source, Arc::new(subdir), child, tally).await,
                            Err(e) => {
                                tracing::warn!("Skipping directory {}: {:#}", child.path, e);
                                tally.skip_subtree(&child);
                            }
                        }
                    });
                }
                EntryKind::Blob => {
                    tasks.spawn_blocking(move || write_blob(&*source, &*dir, &child, &tally));
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Materialization task failed: {}", e);
            }
        }
    })
}

fn write_blob<S: BlobSource, D: Destination>(source: &S, dir: &D, node: &WalkNode, tally: &Tally) {
    let result: Result<()> = source.read_blob(&node.id).and_then(|content| match content {
        Some(bytes) => dir.write_file(&node.name, &bytes),
        None => Err(Error::MaterializationSkip {
            path: node.path.clone(),
            reason: format!("blob {} unavailable", node.id),
        }
        .into()),
    });

    let written = match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Skipping {}: {:#}", node.path, e);
            false
        }
    };
    tally.record(&node.path, written);
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use git2::{ObjectType, Oid};

    use super::*;
    use crate::storage::ContentId;

    struct MemorySource {
        blobs: HashMap<ContentId, Vec<u8>>,
    }

    impl BlobSource for MemorySource {
        fn read_blob(&self, id: &ContentId) -> Result<Option<Vec<u8>>> {
            Ok(self.blobs.get(id).cloned())
        }
    }

    #[derive(Clone)]
    struct MemoryDestination {
        prefix: String,
        files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
        fail_on: Arc<Vec<&'static str>>,
    }

    impl MemoryDestination {
        fn new(fail_on: Vec<&'static str>) -> Self {
            MemoryDestination {
                prefix: String::new(),
                files: Arc::new(Mutex::new(BTreeMap::new())),
                fail_on: Arc::new(fail_on),
            }
        }

        fn join(&self, name: &str) -> String {
            if self.prefix.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", self.prefix, name)
            }
        }

        fn files(&self) -> BTreeMap<String, Vec<u8>> {
            self.files.lock().unwrap().clone()
        }
    }

    impl Destination for MemoryDestination {
        fn open_dir(&self, name: &str) -> Result<Self> {
            if self.fail_on.contains(&name) {
                anyhow::bail!("permission denied: {}", name);
            }
            Ok(MemoryDestination {
                prefix: self.join(name),
                ..self.clone()
            })
        }

        fn write_file(&self, name: &str, content: &[u8]) -> Result<()> {
            if self.fail_on.contains(&name) {
                anyhow::bail!("disk full: {}", name);
            }
            self.files
                .lock()
                .unwrap()
                .insert(self.join(name), content.to_vec());
            Ok(())
        }
    }

    fn blob_id(content: &[u8]) -> ContentId {
        Oid::hash_object(ObjectType::Blob, content).unwrap().into()
    }

    fn blob(path: &str, content: &[u8]) -> WalkNode {
        WalkNode {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap().to_string(),
            kind: EntryKind::Blob,
            id: blob_id(content),
            children: Vec::new(),
        }
    }

    fn tree(path: &str, children: Vec<WalkNode>) -> WalkNode {
        WalkNode {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap().to_string(),
            kind: EntryKind::Tree,
            id: ContentId::empty_tree(),
            children,
        }
    }

    fn walk(children: Vec<WalkNode>) -> WalkResult {
        let mut root = tree("", children);
        root.name = String::new();
        let total = root.blob_count();
        WalkResult { root, total }
    }

    fn source(contents: &[&[u8]]) -> Arc<MemorySource> {
        Arc::new(MemorySource {
            blobs: contents
                .iter()
                .map(|content| (blob_id(content), content.to_vec()))
                .collect(),
        })
    }

    fn recorder() -> (Arc<Mutex<Vec<Progress>>>, Arc<dyn ProgressSink>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let sink: Arc<dyn ProgressSink> =
            Arc::new(move |p: Progress| sink_events.lock().unwrap().push(p));
        (events, sink)
    }

    fn assert_monotonic(events: &[Progress]) {
        for pair in events.windows(2) {
            assert!(
                pair[0].value <= pair[1].value,
                "progress went backwards: {:?}",
                pair
            );
        }
    }

    #[tokio::test]
    async fn test_writes_all_files() {
        let (events, sink) = recorder();
        let materializer = Materializer::new(source(&[b"1", b"2", b"3"]), sink);
        let dest = MemoryDestination::new(vec![]);

        let walk = walk(vec![
            tree("src", vec![blob("src/a.txt", b"1"), blob("src/b.txt", b"2")]),
            blob("top.txt", b"3"),
        ]);
        let report = materializer.materialize(dest.clone(), walk).await;

        assert_eq!(
            report,
            MaterializeReport {
                total: 3,
                written: 3,
                skipped: 0
            }
        );
        assert!(report.is_complete());

        let files = dest.files();
        assert_eq!(files.get("src/a.txt").map(Vec::as_slice), Some(&b"1"[..]));
        assert_eq!(files.get("src/b.txt").map(Vec::as_slice), Some(&b"2"[..]));
        assert_eq!(files.get("top.txt").map(Vec::as_slice), Some(&b"3"[..]));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_monotonic(&events);
        assert_eq!(events.last().unwrap().value, 1.0);
        assert!(events.last().unwrap().description.starts_with("Write (3/3): "));
    }

    #[tokio::test]
    async fn test_failed_write_is_skipped() {
        let (events, sink) = recorder();
        let materializer = Materializer::new(source(&[b"ok", b"bad", b"also ok"]), sink);
        let dest = MemoryDestination::new(vec!["bad.txt"]);

        let walk = walk(vec![
            blob("ok.txt", b"ok"),
            blob("bad.txt", b"bad"),
            tree("dir", vec![blob("dir/fine.txt", b"also ok")]),
        ]);
        let report = materializer.materialize(dest.clone(), walk).await;

        assert_eq!(report.total, 3);
        assert_eq!(report.written, 2);
        assert_eq!(report.skipped, 1);
        assert!(!report.is_complete());

        let files = dest.files();
        assert!(files.contains_key("ok.txt"));
        assert!(files.contains_key("dir/fine.txt"));
        assert!(!files.contains_key("bad.txt"));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_monotonic(&events);
        assert_eq!(events.last().unwrap().value, 1.0);
    }

    #[tokio::test]
    async fn test_unavailable_blob_writes_nothing() {
        let (_events, sink) = recorder();
        let materializer = Materializer::new(source(&[b"present"]), sink);
        let dest = MemoryDestination::new(vec![]);

        let walk = walk(vec![blob("here.txt", b"present"), blob("missing.txt", b"absent")]);
        let report = materializer.materialize(dest.clone(), walk).await;

        assert_eq!(report.written, 1);
        assert_eq!(report.skipped, 1);
        assert!(!dest.files().contains_key("missing.txt"));
    }

    #[tokio::test]
    async fn test_failed_directory_counts_its_blobs() {
        let (events, sink) = recorder();
        let materializer = Materializer::new(source(&[b"a", b"b", b"c"]), sink);
        let dest = MemoryDestination::new(vec!["locked"]);

        let walk = walk(vec![
            tree(
                "locked",
                vec![
                    blob("locked/a.txt", b"a"),
                    tree("locked/inner", vec![blob("locked/inner/b.txt", b"b")]),
                ],
            ),
            blob("c.txt", b"c"),
        ]);
        let report = materializer.materialize(dest.clone(), walk).await;

        assert_eq!(report.total, 3);
        assert_eq!(report.written, 1);
        assert_eq!(report.skipped, 2);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_monotonic(&events);
        assert_eq!(events.last().unwrap().value, 1.0);
    }

    #[tokio::test]
    async fn test_zero_work_reports_done() {
        let (events, sink) = recorder();
        let materializer = Materializer::new(source(&[]), sink);
        let dest = MemoryDestination::new(vec![]);

        let report = materializer
            .materialize(dest.clone(), WalkResult::empty(ContentId::empty_tree()))
            .await;

        assert_eq!(report.total, 0);
        assert!(report.is_complete());
        assert!(dest.files().is_empty());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, 1.0);
    }
}
