pub mod builders;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, Once};

use forkpool::engine::{Orchestrator, OrchestratorOptions};
use tempfile::TempDir;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();
static FORK_LOCK: Mutex<()> = Mutex::new(());
static NAMESPACE_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Serialise tests that fork.
///
/// The harness runs tests on several threads; forking while another test
/// reaps or installs signal handlers makes results nondeterministic.
pub fn fork_lock() -> MutexGuard<'static, ()> {
    FORK_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared-memory namespace unique to this test process and call.
pub fn unique_namespace(prefix: &str) -> String {
    let n = NAMESPACE_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{prefix}-{}-{n}", nix::unistd::getpid())
}

/// Pid file inside a fresh temporary directory.
///
/// Keep the returned [`TempDir`] alive for as long as the file is used.
pub fn temp_pid_file() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("run").join("forkpool.pid");
    (dir, path)
}

/// Everything an orchestrator needs in a test, cleaned up on drop.
pub struct TestEnv {
    pub dir: TempDir,
    pub pid_file: PathBuf,
    pub namespace: String,
}

impl TestEnv {
    pub fn new(prefix: &str) -> Self {
        init_tracing();
        let (dir, pid_file) = temp_pid_file();
        Self {
            dir,
            pid_file,
            namespace: unique_namespace(prefix),
        }
    }

    /// Options that leave the test process' cwd and umask alone.
    pub fn options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            pid_file: self.pid_file.clone(),
            shm_namespace: self.namespace.clone(),
            pool: None,
            reset_environment: false,
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.options()).expect("build orchestrator")
    }

    /// Path of a file inside the temp dir, for children to leave evidence in.
    pub fn marker(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}
