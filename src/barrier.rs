use crossbeam_channel::Receiver;
use rayon::ThreadPool;
use serde::Serialize;

use crate::domain::{RetrievalResult, RunAccession};
use crate::error::FetchError;

/// Tasks dispatched to a worker pool whose results have not all arrived yet.
pub struct PendingBatch {
    receiver: Receiver<(usize, RetrievalResult)>,
    accessions: Vec<RunAccession>,
    // Held so the workers outlive the dispatch call.
    _pool: Option<ThreadPool>,
}

impl PendingBatch {
    pub fn new(
        receiver: Receiver<(usize, RetrievalResult)>,
        accessions: Vec<RunAccession>,
    ) -> Self {
        Self {
            receiver,
            accessions,
            _pool: None,
        }
    }

    pub fn with_pool(mut self, pool: ThreadPool) -> Self {
        self._pool = Some(pool);
        self
    }

    pub fn len(&self) -> usize {
        self.accessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessions.is_empty()
    }
}

/// Every task of a batch in a terminal state, index-aligned with the tasks.
///
/// Only [`join`] builds one, which makes it the proof the registry
/// synchronizer asks for.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct CompletedBatch {
    results: Vec<RetrievalResult>,
}

impl CompletedBatch {
    pub fn results(&self) -> &[RetrievalResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<RetrievalResult> {
        self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|result| result.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }
}

pub fn join(pending: PendingBatch) -> Result<CompletedBatch, FetchError> {
    let total = pending.accessions.len();
    let mut slots: Vec<Option<RetrievalResult>> = vec![None; total];
    let mut remaining = total;

    while remaining > 0 {
        let (index, result) = pending.receiver.recv().map_err(|_| {
            FetchError::Barrier(format!("{remaining} of {total} task(s) never reported"))
        })?;
        let expected = pending
            .accessions
            .get(index)
            .ok_or_else(|| FetchError::Barrier(format!("result index {index} out of range")))?;
        if &result.accession != expected {
            return Err(FetchError::Barrier(format!(
                "result for {} reported at slot of {expected}",
                result.accession
            )));
        }
        if slots[index].replace(result).is_some() {
            return Err(FetchError::Barrier(format!("task {index} reported twice")));
        }
        remaining -= 1;
        tracing::debug!(index, remaining, "task reached terminal state");
    }

    Ok(CompletedBatch {
        results: slots.into_iter().flatten().collect(),
    })
}
