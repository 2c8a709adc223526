// tests/run_group.rs

use std::cell::RefCell;
use std::rc::Rc;

use forkpool::channel::ShmChannel;
use forkpool::engine::JoinMode;
use forkpool::errors::ForkpoolError;
use forkpool::group::{GroupEnv, GroupStatus, MAX_GROUP_SIZE, RunGroup, TaskGroup};
use forkpool::registry::PidRegistry;
use forkpool::signal::SignalDispatcher;
use forkpool::task::{CallbackTask, TaskRef};
use forkpool::value::Value;
use forkpool_test_utils::{TestEnv, fork_lock};

fn group_env(env: &TestEnv) -> GroupEnv {
    GroupEnv {
        registry: PidRegistry::open(&env.pid_file).unwrap(),
        channel: ShmChannel::new(env.namespace.clone()),
    }
}

fn constant(value: i64) -> TaskRef {
    let task: Rc<RefCell<CallbackTask>> =
        CallbackTask::new(move |_, _| Ok(Value::Int(value))).into_ref();
    task
}

#[test]
fn empty_snapshot_is_rejected() {
    let env = TestEnv::new("group-empty");
    let err = TaskGroup::new(Vec::new(), JoinMode::Join, group_env(&env)).unwrap_err();
    assert!(matches!(err, ForkpoolError::InvalidArgument(_)));
}

#[test]
fn oversized_snapshot_is_rejected() {
    let env = TestEnv::new("group-big");
    let task = constant(1);
    let tasks: Vec<TaskRef> = (0..=MAX_GROUP_SIZE).map(|_| Rc::clone(&task)).collect();

    let err = TaskGroup::new(tasks, JoinMode::Join, group_env(&env)).unwrap_err();
    assert!(matches!(err, ForkpoolError::InvalidArgument(_)));
}

#[test]
fn lifecycle_moves_forward_only() {
    let _guard = fork_lock();
    let env = TestEnv::new("group-life");
    let mut signals = SignalDispatcher::default();

    let mut group =
        TaskGroup::new(vec![constant(3), constant(4)], JoinMode::Join, group_env(&env)).unwrap();
    assert_eq!(group.status(), GroupStatus::Init);
    assert_eq!(group.len(), 2);

    group.run().unwrap();
    assert_eq!(group.status(), GroupStatus::Started);
    assert_eq!(group.pids().len(), 2);
    assert!(matches!(group.run(), Err(ForkpoolError::Domain(_))));

    let summary = group.wait(&mut signals).unwrap();
    assert_eq!(summary.complete, 2);
    assert!(group.is_complete());

    let results: Vec<Value> = group
        .tasks()
        .iter()
        .map(|t| t.borrow().result().clone())
        .collect();
    assert_eq!(results, vec![Value::Int(3), Value::Int(4)]);

    assert!(matches!(
        group.stop(nix::sys::signal::Signal::SIGTERM),
        Err(ForkpoolError::Domain(_))
    ));
    assert_eq!(group.wait(&mut signals).unwrap().total(), 0);
}

#[test]
fn waiting_on_an_unstarted_group_returns_nothing() {
    let env = TestEnv::new("group-init");
    let mut signals = SignalDispatcher::default();
    let mut group = TaskGroup::new(vec![constant(1)], JoinMode::Detach, group_env(&env)).unwrap();

    assert_eq!(group.wait(&mut signals).unwrap().total(), 0);
    assert_eq!(group.status(), GroupStatus::Init);
}

#[test]
fn group_ids_are_unique() {
    let env = TestEnv::new("group-ids");
    let a = TaskGroup::new(vec![constant(1)], JoinMode::Join, group_env(&env)).unwrap();
    let b = TaskGroup::new(vec![constant(1)], JoinMode::Join, group_env(&env)).unwrap();
    assert!(b.id() > a.id());
}
