use criterion::{Criterion, criterion_group, criterion_main};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use verif_matrix::config::TestDescriptor;
use verif_matrix::core::context::RunContext;
use verif_matrix::core::execution::RunOutcome;
use verif_matrix::core::planner::{MatrixFilter, TimeoutPolicy, expand};
use verif_matrix::core::scheduler::{RetryPolicy, execute};
use verif_matrix::models::{Backend, JobResult, JobSpec, JobStatus, RuntimeClass};

fn descriptors(count: usize) -> Vec<TestDescriptor> {
    let axis = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
    (0..count)
        .map(|i| TestDescriptor {
            name: format!("tb_{i:03}"),
            path: PathBuf::from(format!("dv/tb_{i:03}")),
            backends: BTreeSet::from([Backend::Icarus, Backend::Verilator]),
            parameters: BTreeMap::from([
                ("corner".to_string(), axis(&["rtl", "gl"])),
                ("width".to_string(), axis(&["8", "16", "32", "64"])),
            ]),
            runtime: if i % 5 == 0 { RuntimeClass::Slow } else { RuntimeClass::Fast },
            tags: BTreeSet::new(),
            timeout_secs: None,
            env: BTreeMap::new(),
        })
        .collect()
}

fn bench_expand(c: &mut Criterion) {
    let descriptors = descriptors(100);
    c.bench_function("expand_1600_jobs", |b| {
        b.iter(|| {
            expand(&descriptors, &[], &MatrixFilter::default(), &TimeoutPolicy::default()).unwrap()
        });
    });
}

fn bench_schedule(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let jobs = expand(&descriptors(25), &[], &MatrixFilter::default(), &TimeoutPolicy::default()).unwrap();

    c.bench_function("schedule_400_noop_jobs", |b| {
        b.to_async(&rt).iter(|| async {
            let ctx = Arc::new(RunContext::new(Path::new("bench_runs"), PathBuf::from(".")));
            execute(jobs.clone(), 8, &RetryPolicy::default(), ctx, |spec: JobSpec, _ctx: Arc<RunContext>| async move {
                RunOutcome::Finished(JobResult::new(&spec, JobStatus::Pass, Duration::ZERO, PathBuf::new()))
            })
            .await
        });
    });
}

criterion_group!(benches, bench_expand, bench_schedule);
criterion_main!(benches);
