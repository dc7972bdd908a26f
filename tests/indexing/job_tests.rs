//! Worker pool delivery tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use cindex::server::{Job, StatusJob, StatusQuery};
use cindex::{JobOutcome, JobRunner, ParseOptions, Result};

use crate::common::TestRepo;

struct Counted {
    index: usize,
    runs: Arc<Vec<AtomicUsize>>,
}

impl Job for Counted {
    type Output = usize;

    fn name(&self) -> String {
        format!("counted {}", self.index)
    }

    fn execute(self) -> Result<usize> {
        self.runs[self.index].fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        Ok(self.index * 10)
    }
}

#[test]
fn test_three_jobs_on_two_workers_complete_once() {
    let runner = JobRunner::new("jobs", 2).unwrap();
    let runs = Arc::new((0..3).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());

    let handles: Vec<_> = (0..3)
        .map(|index| {
            runner.submit(Counted {
                index,
                runs: Arc::clone(&runs),
            })
        })
        .collect();

    let results: Vec<usize> = handles
        .into_iter()
        .map(|h| h.wait().into_result().unwrap())
        .collect();

    assert_eq!(results, vec![0, 10, 20]);
    assert!(runs.iter().all(|r| r.load(Ordering::SeqCst) == 1));
    assert_eq!(runner.in_flight(), 0);
}

#[test]
fn test_two_workers_run_in_parallel() {
    let runner = JobRunner::new("jobs", 2).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    // Each job waits for the other; only completes if both run at once
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            runner.spawn("rendezvous", move || {
                barrier.wait();
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        assert!(handle
            .wait_timeout(Duration::from_secs(10))
            .is_some_and(|outcome| outcome.is_completed()));
    }
}

#[test]
fn test_outcome_is_delivered_once() {
    let runner = JobRunner::new("jobs", 1).unwrap();
    let handle = runner.spawn("value", || Ok(5));
    assert_eq!(runner.drain(Duration::from_secs(10)), 0);

    assert!(matches!(handle.try_outcome(), Some(JobOutcome::Completed(5))));
    assert!(!matches!(handle.try_outcome(), Some(JobOutcome::Completed(_))));
}

#[test]
fn test_status_job_on_pool() {
    let repo = TestRepo::new();
    let file = repo.add_file("a.c", "int a;\n");
    let (store, _, registry) = repo.stub_store();
    store.add_source_file(&file, ParseOptions::NONE, &[]).unwrap();

    let runner = JobRunner::new("jobs", 1).unwrap();
    let report = runner
        .submit(StatusJob::new(
            StatusQuery::parse("units").unwrap(),
            registry,
            store,
            Vec::new(),
        ))
        .wait()
        .into_result()
        .unwrap();

    assert_eq!(report.unit_count, 1);
    let units = report.units.unwrap();
    assert_eq!(units[0].path, file);
    assert!(report.files.is_none());
}
