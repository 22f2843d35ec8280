use std::sync::Arc;
use std::thread;

use crossbeam::channel::{bounded, unbounded, Sender};
use tracing::debug;

use super::analyzer::Analyzer;
use crate::error::CuttleError;
use crate::models::{AnalysisResult, Document};
use crate::Result;

struct AnalysisJob {
    slot: usize,
    doc: Document,
    reply: Sender<(usize, Result<AnalysisResult>)>,
}

/// Fixed pool of analysis worker threads shared by all batches.
pub struct AnalysisQueue {
    tx: Option<Sender<AnalysisJob>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl AnalysisQueue {
    pub fn new(analyzer: Arc<dyn Analyzer>, workers: usize) -> Self {
        let (tx, rx) = unbounded::<AnalysisJob>();
        let handles = (0..workers.max(1))
            .map(|i| {
                let rx = rx.clone();
                let analyzer = analyzer.clone();
                thread::Builder::new()
                    .name(format!("cuttle-analysis-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            let result = analyzer.analyze(&job.doc);
                            let _ = job.reply.send((job.slot, result));
                        }
                    })
            })
            .filter_map(|h| h.ok())
            .collect::<Vec<_>>();

        debug!(workers = handles.len(), "analysis queue started");
        Self {
            tx: Some(tx),
            workers: handles,
        }
    }

    /// Analyze documents in parallel, results in input order
    pub fn analyze_all(&self, docs: Vec<Document>) -> Result<Vec<AnalysisResult>> {
        let tx = self.tx.as_ref().ok_or(CuttleError::Closed)?;
        if self.workers.is_empty() {
            return Err(CuttleError::Analysis("no analysis workers".into()));
        }

        let n = docs.len();
        let (reply_tx, reply_rx) = bounded(n.max(1));
        for (slot, doc) in docs.into_iter().enumerate() {
            tx.send(AnalysisJob {
                slot,
                doc,
                reply: reply_tx.clone(),
            })
            .map_err(|_| CuttleError::Closed)?;
        }
        drop(reply_tx);

        // every reply is drained so no worker blocks on a full channel
        let mut slots: Vec<Option<AnalysisResult>> = (0..n).map(|_| None).collect();
        let mut first_error: Option<(usize, CuttleError)> = None;
        for _ in 0..n {
            let (slot, result) = reply_rx
                .recv()
                .map_err(|_| CuttleError::Analysis("analysis worker exited".into()))?;
            match result {
                Ok(result) => slots[slot] = Some(result),
                Err(e) => {
                    if first_error.as_ref().map_or(true, |(s, _)| slot < *s) {
                        first_error = Some((slot, e));
                    }
                }
            }
        }
        if let Some((_, e)) = first_error {
            return Err(e);
        }
        Ok(slots.into_iter().flatten().collect())
    }
}

impl Drop for AnalysisQueue {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
