use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::pipeline::{MarksCardPipeline, PipelineError, ProcessOutcome};
use crate::recognizer::TokenSource;

/// One entry per input image, in input order.
#[derive(Debug)]
pub struct BatchOutcome {
    pub path: PathBuf,
    pub output_dir: PathBuf,
    pub result: Result<ProcessOutcome, PipelineError>,
}

/// Process many images, one document per token-source handle at a time.
///
/// Each handle in `sources` serves one worker: it is moved into a blocking
/// task with its document and returned to the idle set when that document is
/// done, so no handle is ever used by two documents at once. Artifacts for
/// each image go to `<output_root>/<stem>/`.
pub async fn process_batch<S>(
    pipeline: Arc<MarksCardPipeline>,
    images: Vec<PathBuf>,
    output_root: &Path,
    sources: Vec<S>,
) -> Vec<BatchOutcome>
where
    S: TokenSource + 'static,
{
    let dirs = output_dirs(&images, output_root);
    let slots: Vec<(PathBuf, PathBuf)> = images.into_iter().zip(dirs).collect();
    let mut pending: VecDeque<usize> = (0..slots.len()).collect();
    let mut results: Vec<Option<BatchOutcome>> = slots.iter().map(|_| None).collect();

    let mut idle = sources;
    let mut workers = JoinSet::new();
    info!(documents = slots.len(), workers = idle.len(), "Batch started");

    loop {
        while !pending.is_empty() {
            let Some(mut source) = idle.pop() else { break };
            let Some(index) = pending.pop_front() else { break };
            let (path, output_dir) = slots[index].clone();
            let pipeline = Arc::clone(&pipeline);

            workers.spawn_blocking(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    pipeline.process_to_dir(&path, &mut source, &output_dir)
                }))
                .unwrap_or_else(|payload| Err(PipelineError::WorkerPanicked(panic_message(&*payload))))
                .map(|(outcome, _)| outcome);
                (index, source, BatchOutcome { path, output_dir, result })
            });
        }

        match workers.join_next().await {
            Some(Ok((index, source, outcome))) => {
                if let Err(e) = &outcome.result {
                    warn!(path = %outcome.path.display(), error = %e, "Document failed");
                }
                idle.push(source);
                results[index] = Some(outcome);
            }
            // The handle went down with the task; its slot is reported below.
            Some(Err(e)) => warn!(error = %e, "Batch worker lost"),
            None => break,
        }
    }

    results
        .into_iter()
        .zip(slots)
        .map(|(result, (path, output_dir))| {
            result.unwrap_or_else(|| BatchOutcome {
                path,
                output_dir,
                result: Err(PipelineError::WorkerPanicked(
                    "not processed: no token source handle left".to_string(),
                )),
            })
        })
        .collect()
}

/// `<root>/<stem>` per image, with `_2`, `_3`, … appended to repeated stems.
pub fn output_dirs(images: &[PathBuf], root: &Path) -> Vec<PathBuf> {
    let mut used = HashSet::new();
    images
        .iter()
        .map(|path| {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("document");
            let mut name = stem.to_string();
            let mut n = 1;
            while !used.insert(name.clone()) {
                n += 1;
                name = format!("{stem}_{n}");
            }
            root.join(name)
        })
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
