//! Helpers shared by unit tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::bridge::protocol::{ExecRequest, ExecResponse};
use crate::executor::{ExecutorError, PluginExecutor};
use crate::value::GenericValue;

static SPAWN_LOCK: Mutex<()> = Mutex::const_new(());

/// Serializes tests that write and spawn plugin scripts.
///
/// Exec of a freshly written script fails with ETXTBSY if another test forks
/// while the script's write handle is still open.
pub(crate) async fn spawn_lock() -> MutexGuard<'static, ()> {
    SPAWN_LOCK.lock().await
}

/// Write an executable `/bin/sh` plugin into `dir`.
pub(crate) fn write_plugin(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

type Reply = Box<dyn Fn(&ExecRequest) -> Result<ExecResponse, ExecutorError> + Send + Sync>;

/// Executor that records every call and answers from a closure.
pub(crate) struct MockExecutor {
    reply: Reply,
    calls: StdMutex<Vec<(PathBuf, ExecRequest)>>,
}

impl MockExecutor {
    pub(crate) fn new(
        reply: impl Fn(&ExecRequest) -> Result<ExecResponse, ExecutorError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reply: Box::new(reply),
            calls: StdMutex::new(Vec::new()),
        }
    }

    pub(crate) fn returning(response: ExecResponse) -> Self {
        Self::new(move |_| Ok(response.clone()))
    }

    pub(crate) fn with_result(result: GenericValue) -> Self {
        Self::returning(ExecResponse {
            result,
            ..Default::default()
        })
    }

    pub(crate) fn calls(&self) -> Vec<(PathBuf, ExecRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The request of the only call made so far.
    pub(crate) fn only_request(&self) -> ExecRequest {
        let calls = self.calls();
        assert_eq!(calls.len(), 1, "expected exactly one plugin call");
        calls[0].1.clone()
    }
}

#[async_trait]
impl PluginExecutor for MockExecutor {
    async fn execute(
        &self,
        plugin: &Path,
        request: &ExecRequest,
        _cancel: CancellationToken,
    ) -> Result<ExecResponse, ExecutorError> {
        self.calls
            .lock()
            .unwrap()
            .push((plugin.to_path_buf(), request.clone()));
        (self.reply)(request)
    }
}
