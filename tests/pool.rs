// tests/pool.rs

use forkpool::engine::{JoinMode, Orchestrator, PoolOptions};
use forkpool::errors::ForkpoolError;
use forkpool::value::Value;
use forkpool_test_utils::builders::{Recorder, recording_task};
use forkpool_test_utils::{TestEnv, fork_lock};

#[test]
fn filling_the_pool_runs_and_waits() {
    let _guard = fork_lock();
    let env = TestEnv::new("pool");
    let mut orch = env.orchestrator();
    orch.pool(2, JoinMode::Join).unwrap();

    let rec = Recorder::new();
    orch.add(recording_task(1, &rec), 0).unwrap();
    assert!(rec.is_empty());
    assert_eq!(orch.buffered(), (1, 0));

    orch.add(recording_task(2, &rec), 0).unwrap();
    assert_eq!(rec.len(), 2);
    assert_eq!(orch.buffered(), (0, 0));
    assert!(orch.active_groups().is_empty());

    orch.add(recording_task(3, &rec), 0).unwrap();
    assert_eq!(rec.len(), 2);

    orch.run(JoinMode::Join).unwrap();
    orch.wait(None).unwrap();
    let values: Vec<Value> = rec.snapshot().into_iter().map(|(v, _)| v).collect();
    assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

#[test]
fn pool_from_options() {
    let _guard = fork_lock();
    let env = TestEnv::new("pool-opts");
    let mut options = env.options();
    options.pool = Some(PoolOptions {
        size: 1,
        mode: JoinMode::Join,
    });
    let mut orch = Orchestrator::new(options).unwrap();

    let rec = Recorder::new();
    orch.add(recording_task("now", &rec), 0).unwrap();
    assert_eq!(rec.snapshot(), vec![(Value::from("now"), 0)]);
}

#[test]
fn zero_sized_pool_is_rejected() {
    let _guard = fork_lock();
    let env = TestEnv::new("pool-zero");
    let mut orch = env.orchestrator();
    assert!(matches!(
        orch.pool(0, JoinMode::Join),
        Err(ForkpoolError::InvalidArgument(_))
    ));
}
