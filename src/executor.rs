use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::barrier::{self, CompletedBatch, PendingBatch};
use crate::domain::{RetrievalOutcome, RetrievalResult, RetrievalTask};
use crate::error::FetchError;
use crate::sra::SraConverter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    pub workers: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

pub struct Executor<C: SraConverter + 'static> {
    converter: Arc<C>,
    settings: ExecutorSettings,
}

impl<C: SraConverter + 'static> Executor<C> {
    pub fn new(converter: C, settings: ExecutorSettings) -> Self {
        Self::from_arc(Arc::new(converter), settings)
    }

    pub fn from_arc(converter: Arc<C>, settings: ExecutorSettings) -> Self {
        Self {
            converter,
            settings,
        }
    }

    /// Hands every task to the worker pool without waiting for any of them.
    pub fn dispatch(&self, tasks: &[RetrievalTask]) -> Result<PendingBatch, FetchError> {
        if self.settings.workers == 0 {
            return Err(FetchError::Configuration(
                "worker pool size must be at least 1".to_string(),
            ));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.settings.workers)
            .thread_name(|index| format!("sra-worker-{index}"))
            .build()
            .map_err(|err| FetchError::WorkerPool(err.to_string()))?;

        let (sender, receiver) = crossbeam_channel::unbounded();
        for (index, task) in tasks.iter().cloned().enumerate() {
            let sender = sender.clone();
            let converter = Arc::clone(&self.converter);
            pool.spawn(move || {
                let result = run_task(converter.as_ref(), &task);
                // The receiver only goes away if the caller dropped the batch.
                let _ = sender.send((index, result));
            });
        }
        drop(sender);

        tracing::info!(
            tasks = tasks.len(),
            workers = self.settings.workers,
            "dispatched retrieval tasks"
        );
        let accessions = tasks.iter().map(|task| task.accession.clone()).collect();
        Ok(PendingBatch::new(receiver, accessions).with_pool(pool))
    }

    pub fn execute(&self, tasks: &[RetrievalTask]) -> Result<CompletedBatch, FetchError> {
        barrier::join(self.dispatch(tasks)?)
    }
}

fn run_task<C: SraConverter + ?Sized>(converter: &C, task: &RetrievalTask) -> RetrievalResult {
    let start = Instant::now();
    tracing::info!(accession = %task.accession, destination = %task.destination, "retrieving run");
    let attempt = catch_unwind(AssertUnwindSafe(|| {
        converter.convert(&task.accession, &task.destination)
    }));
    let latency_ms = start.elapsed().as_millis() as u64;

    let outcome = match attempt {
        Ok(Ok(files)) => {
            tracing::info!(
                accession = %task.accession,
                files = files.len(),
                latency_ms,
                "run converted"
            );
            RetrievalOutcome::Success {
                location: task.destination.clone(),
            }
        }
        Ok(Err(err)) => {
            tracing::warn!(accession = %task.accession, error = %err, latency_ms, "run failed");
            RetrievalOutcome::Failure {
                reason: err.to_string(),
            }
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|message| message.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "converter panicked".to_string());
            tracing::warn!(accession = %task.accession, reason = %reason, "converter panicked");
            RetrievalOutcome::Failure { reason }
        }
    };

    RetrievalResult {
        accession: task.accession.clone(),
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use camino::{Utf8Path, Utf8PathBuf};

    use super::*;
    use crate::domain::RunAccession;

    #[derive(Default)]
    struct MockConverter {
        failing: HashSet<String>,
        panicking: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl SraConverter for MockConverter {
        fn convert(
            &self,
            accession: &RunAccession,
            _destination: &Utf8Path,
        ) -> Result<Vec<Utf8PathBuf>, FetchError> {
            self.calls.lock().unwrap().push(accession.to_string());
            // Later tasks finish first to shuffle completion order.
            let digits: u64 = accession.as_str()[3..].parse().unwrap_or(0);
            thread::sleep(Duration::from_millis(20u64.saturating_sub(digits * 5)));
            if self.panicking.contains(accession.as_str()) {
                panic!("converter exploded");
            }
            if self.failing.contains(accession.as_str()) {
                return Err(FetchError::Conversion("exit status: 3".to_string()));
            }
            Ok(vec![Utf8PathBuf::from(format!("{accession}_1.fastq"))])
        }
    }

    fn tasks(ids: &[&str]) -> Vec<RetrievalTask> {
        ids.iter()
            .map(|id| RetrievalTask {
                accession: id.parse().unwrap(),
                destination: Utf8PathBuf::from("/out"),
            })
            .collect()
    }

    #[test]
    fn results_align_with_tasks() {
        let executor = Executor::new(MockConverter::default(), ExecutorSettings { workers: 3 });
        let input = tasks(&["SRR1", "SRR2", "SRR3", "SRR4"]);
        let batch = executor.execute(&input).unwrap();
        assert_eq!(batch.len(), input.len());
        for (task, result) in input.iter().zip(batch.results()) {
            assert_eq!(task.accession, result.accession);
            assert_eq!(
                result.outcome,
                RetrievalOutcome::Success {
                    location: Utf8PathBuf::from("/out")
                }
            );
        }
    }

    #[test]
    fn failures_are_isolated() {
        let converter = MockConverter {
            failing: ["SRR2".to_string()].into_iter().collect(),
            panicking: ["SRR3".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let executor = Executor::new(converter, ExecutorSettings { workers: 2 });
        let batch = executor.execute(&tasks(&["SRR1", "SRR2", "SRR3", "SRR4"])).unwrap();

        let outcomes: Vec<bool> = batch.results().iter().map(|r| r.is_success()).collect();
        assert_eq!(outcomes, vec![true, false, false, true]);
        assert_matches!(
            &batch.results()[1].outcome,
            RetrievalOutcome::Failure { reason } if reason.contains("exit status: 3")
        );
        assert_matches!(
            &batch.results()[2].outcome,
            RetrievalOutcome::Failure { reason } if reason.contains("exploded")
        );
    }

    #[test]
    fn duplicates_run_once_each() {
        let converter = Arc::new(MockConverter::default());
        let executor = Executor::from_arc(Arc::clone(&converter), ExecutorSettings::default());
        let batch = executor.execute(&tasks(&["SRR1", "SRR1"])).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(converter.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn zero_workers_is_configuration_error() {
        let executor = Executor::new(MockConverter::default(), ExecutorSettings { workers: 0 });
        let err = executor.execute(&tasks(&["SRR1"])).unwrap_err();
        assert_matches!(err, FetchError::Configuration(_));
    }
}
