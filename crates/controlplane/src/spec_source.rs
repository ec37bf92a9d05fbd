// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Pipeline-spec event stream.
//!
//! The declarative document lives behind the [`SpecSource`] seam; the
//! in-tree backend watches a YAML file with a platform-native watcher and
//! replays `Add/Modify/Delete` events. Orchestrator-backed sources implement
//! the same contract externally.

use crate::error::Error;
use async_trait::async_trait;
use fbc_config::spec::PipelineSpecDoc;
use notify::{RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One observed change to the pipeline spec document.
#[derive(Debug, Clone)]
pub enum SpecEvent {
    /// The document appeared (or was seen on startup).
    Added(Box<PipelineSpecDoc>),
    /// The document changed. Consumers must still compare fingerprints; a
    /// modify event does not imply the desired state changed.
    Modified(Box<PipelineSpecDoc>),
    /// The document disappeared.
    Deleted,
}

/// A source of spec events.
#[async_trait]
pub trait SpecSource: Send + 'static {
    /// Emits events into `tx` until cancelled.
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<SpecEvent>,
        cancel: CancellationToken,
    ) -> Result<(), Error>;
}

/// File-backed spec source.
#[derive(Debug, Clone)]
pub struct FileSpecSource {
    path: PathBuf,
}

impl FileSpecSource {
    /// Watches the document at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> Option<PipelineSpecDoc> {
        match PipelineSpecDoc::load_file(&self.path) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "spec document unreadable");
                None
            }
        }
    }
}

#[async_trait]
impl SpecSource for FileSpecSource {
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<SpecEvent>,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher =
            notify::recommended_watcher(move |result: Result<notify::Event, notify::Error>| {
                match result {
                    Ok(_event) => {
                        let _ = raw_tx.send(());
                    }
                    Err(e) => tracing::warn!(error = %e, "spec watcher error"),
                }
            })
            .map_err(|e| Error::Watch {
                details: e.to_string(),
            })?;
        let watch_root = self
            .path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        watcher
            .watch(&watch_root, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Watch {
                details: e.to_string(),
            })?;

        // Initial sync.
        let mut present = match self.load() {
            Some(doc) => {
                if tx.send(SpecEvent::Added(Box::new(doc))).await.is_err() {
                    return Ok(());
                }
                true
            }
            None => false,
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                changed = raw_rx.recv() => {
                    if changed.is_none() {
                        return Ok(());
                    }
                    // Coalesce bursts of filesystem events.
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    while raw_rx.try_recv().is_ok() {}
                    let event = match (self.load(), present) {
                        (Some(doc), true) => SpecEvent::Modified(Box::new(doc)),
                        (Some(doc), false) => {
                            present = true;
                            SpecEvent::Added(Box::new(doc))
                        }
                        (None, true) => {
                            if self.path.exists() {
                                // Unparseable but still present; skip.
                                continue;
                            }
                            present = false;
                            SpecEvent::Deleted
                        }
                        (None, false) => continue,
                    };
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const DOC: &str = r#"
metadata:
  name: default
  generation: 1
spec:
  pipeline_version: "1.0.0"
  function_blocks: {}
"#;

    #[tokio::test]
    async fn emits_added_then_modified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, DOC).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let source = Box::new(FileSpecSource::new(path.clone()));
        let task = tokio::spawn(source.run(tx, cancel.clone()));

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timely event")
            .expect("event");
        assert!(matches!(first, SpecEvent::Added(_)));

        std::fs::write(&path, DOC.replace("generation: 1", "generation: 2")).unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timely event")
            .expect("event");
        match second {
            SpecEvent::Modified(doc) => assert_eq!(doc.metadata.generation, 2),
            other => panic!("expected Modified, got {other:?}"),
        }

        cancel.cancel();
        let _ = task.await;
    }
}
