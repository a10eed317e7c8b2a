//! [`Inventory`] implementation driving the `govc` command-line client.
//!
//! Queries run to completion before returning. Mutating operations are
//! started as background processes and observed through
//! [`Inventory::poll_task`]: a task is running until its process exits, and
//! succeeds when the exit status is zero. Cancelling a task kills its
//! process.

mod error;
mod types;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use shell_escape::unix::escape;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use error::GovcError;
use types::LsResult;

use crate::inventory::{
    CloneSpec, Datacenter, Inventory, InventoryFuture, ManagedObject, ObjectKind, SnapshotRef,
    SnapshotRequest, TaskHandle, TaskPayload, TaskState,
};

/// Default `govc` binary name.
pub const DEFAULT_GOVC_BIN: &str = "govc";

/// Connection settings passed to every `govc` invocation.
#[derive(Clone, Eq, PartialEq)]
pub struct GovcConfig {
    /// Path to the `govc` executable.
    pub binary: String,
    /// Endpoint host name or URL (`GOVC_URL`).
    pub url: String,
    /// Login (`GOVC_USERNAME`).
    pub username: String,
    /// Password (`GOVC_PASSWORD`).
    pub password: String,
    /// Skip TLS verification (`GOVC_INSECURE`).
    pub insecure: bool,
}

impl GovcConfig {
    fn environment(&self) -> [(&'static str, &str); 4] {
        [
            ("GOVC_URL", self.url.as_str()),
            ("GOVC_USERNAME", self.username.as_str()),
            ("GOVC_PASSWORD", self.password.as_str()),
            ("GOVC_INSECURE", if self.insecure { "1" } else { "0" }),
        ]
    }
}

impl fmt::Debug for GovcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovcConfig")
            .field("binary", &self.binary)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("insecure", &self.insecure)
            .finish()
    }
}

#[derive(Debug)]
struct PendingTask {
    command: String,
    payload: Option<TaskPayload>,
    process: JoinHandle<std::io::Result<Output>>,
}

/// Management session backed by the `govc` CLI.
#[derive(Debug)]
pub struct GovcInventory {
    config: GovcConfig,
    tasks: Mutex<HashMap<String, PendingTask>>,
    next_task: AtomicU64,
}

impl GovcInventory {
    /// Creates a session using `config`.
    #[must_use]
    pub fn new(config: GovcConfig) -> Self {
        Self {
            config,
            tasks: Mutex::new(HashMap::new()),
            next_task: AtomicU64::new(0),
        }
    }

    /// Checks connectivity and credentials with `govc about`.
    ///
    /// # Errors
    ///
    /// Returns [`GovcError`] when the endpoint is unreachable or rejects the
    /// credentials.
    pub async fn about(&self) -> Result<String, GovcError> {
        self.run(vec![String::from("about")]).await
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<String, PendingTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.config.binary);
        command
            .args(args)
            .envs(self.config.environment())
            .stdin(Stdio::null());
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> GovcError {
        GovcError::Spawn {
            program: self.config.binary.clone(),
            source,
        }
    }

    async fn run(&self, args: Vec<String>) -> Result<String, GovcError> {
        let rendered = render_command(&self.config.binary, &args);
        debug!(command = %rendered, "running govc");
        let output = self
            .command(&args)
            .output()
            .await
            .map_err(|source| self.spawn_error(source))?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        Err(GovcError::CommandFailure {
            command: rendered,
            status_text: output
                .status
                .code()
                .map_or_else(|| String::from("unknown"), |code| code.to_string()),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }

    async fn list(&self, path: &str) -> Result<Vec<ManagedObject>, GovcError> {
        let args = ls_args(path);
        let stdout = self.run(args.clone()).await?;
        parse_ls(&stdout).map_err(|message| GovcError::Parse {
            command: render_command(&self.config.binary, &args),
            message,
        })
    }

    /// Records the managed object id of a freshly created snapshot.
    ///
    /// The new snapshot is the VM's current one. When the lookup fails the
    /// snapshot stays addressed by name.
    async fn identify_snapshot(&self, snapshot: SnapshotRef) -> SnapshotRef {
        let tree = match self.run(snapshot_tree_args(&snapshot.vm_id)).await {
            Ok(tree) => tree,
            Err(err) => {
                warn!(vm = %snapshot.vm_id, "cannot resolve snapshot id, using its name: {err}");
                return snapshot;
            }
        };
        match parse_current_snapshot_id(&tree, &snapshot.name) {
            Some(id) => {
                debug!(vm = %snapshot.vm_id, snapshot = %id, "resolved snapshot id");
                SnapshotRef {
                    id: Some(id),
                    ..snapshot
                }
            }
            None => {
                warn!(vm = %snapshot.vm_id, "current snapshot is not {}, using its name", snapshot.name);
                snapshot
            }
        }
    }

    fn start(
        &self,
        args: &[String],
        description: String,
        payload: Option<TaskPayload>,
    ) -> Result<TaskHandle, GovcError> {
        let rendered = render_command(&self.config.binary, args);
        let child = self
            .command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| self.spawn_error(source))?;
        let id = format!("govc-{}", self.next_task.fetch_add(1, Ordering::Relaxed) + 1);
        debug!(task = %id, command = %rendered, "started govc task");

        self.lock_tasks().insert(
            id.clone(),
            PendingTask {
                command: rendered,
                payload,
                process: tokio::spawn(child.wait_with_output()),
            },
        );
        Ok(TaskHandle { id, description })
    }
}

impl Inventory for GovcInventory {
    type Error = GovcError;

    fn find_datacenter<'a>(
        &'a self,
        name: &'a str,
    ) -> InventoryFuture<'a, Option<Datacenter>, Self::Error> {
        Box::pin(async move {
            let found = self
                .list("/")
                .await?
                .into_iter()
                .find(|object| object.kind == ObjectKind::Datacenter && object.name == name);
            Ok(found.map(datacenter_folders))
        })
    }

    fn list_children<'a>(
        &'a self,
        container: &'a ManagedObject,
    ) -> InventoryFuture<'a, Vec<ManagedObject>, Self::Error> {
        Box::pin(async move { self.list(&container.id).await })
    }

    fn is_assignable<'a>(
        &'a self,
        vm: &'a ManagedObject,
    ) -> InventoryFuture<'a, bool, Self::Error> {
        Box::pin(async move {
            let pool = self.run(resource_pool_args(vm)).await?;
            Ok(!pool.trim().is_empty())
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        vm: &'a ManagedObject,
        request: &'a SnapshotRequest,
    ) -> InventoryFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            let payload = TaskPayload::Snapshot(SnapshotRef {
                vm_id: vm.id.clone(),
                name: request.name.clone(),
                id: None,
            });
            self.start(
                &snapshot_create_args(vm, request),
                format!("snapshot {}", vm.name),
                Some(payload),
            )
        })
    }

    fn remove_snapshot<'a>(
        &'a self,
        snapshot: &'a SnapshotRef,
        remove_children: bool,
    ) -> InventoryFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            self.start(
                &snapshot_remove_args(snapshot, remove_children),
                format!("remove snapshot {} of {}", snapshot.name, snapshot.vm_id),
                None,
            )
        })
    }

    fn clone_as_template<'a>(
        &'a self,
        vm: &'a ManagedObject,
        spec: &'a CloneSpec,
    ) -> InventoryFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            let clone = ManagedObject::new(
                format!("{}/{}", spec.folder.id, spec.name),
                spec.name.clone(),
                ObjectKind::VirtualMachine,
            );
            self.start(
                &clone_args(vm, spec),
                format!("clone {} to {}", vm.name, spec.name),
                Some(TaskPayload::Object(clone)),
            )
        })
    }

    fn destroy<'a>(
        &'a self,
        object: &'a ManagedObject,
    ) -> InventoryFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            self.start(
                &destroy_args(object),
                format!("destroy {}", object.name),
                None,
            )
        })
    }

    fn poll_task<'a>(
        &'a self,
        task: &'a TaskHandle,
    ) -> InventoryFuture<'a, TaskState, Self::Error> {
        Box::pin(async move {
            let pending = {
                let mut tasks = self.lock_tasks();
                match tasks.get(&task.id).map(|pending| pending.process.is_finished()) {
                    None => return Err(GovcError::UnknownTask(task.id.clone())),
                    Some(false) => return Ok(TaskState::Running),
                    Some(true) => tasks.remove(&task.id),
                }
            }
            .ok_or_else(|| GovcError::UnknownTask(task.id.clone()))?;

            let output = pending
                .process
                .await
                .map_err(|err| GovcError::TaskLost {
                    task: task.id.clone(),
                    message: err.to_string(),
                })?
                .map_err(|source| self.spawn_error(source))?;
            debug!(task = %task.id, command = %pending.command, status = %output.status, "govc task finished");
            let state = match task_state(&output, pending.payload) {
                TaskState::Succeeded(Some(TaskPayload::Snapshot(snapshot))) => {
                    let snapshot = self.identify_snapshot(snapshot).await;
                    TaskState::Succeeded(Some(TaskPayload::Snapshot(snapshot)))
                }
                state => state,
            };
            Ok(state)
        })
    }

    fn cancel_task<'a>(&'a self, task: &'a TaskHandle) -> InventoryFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let pending = self
                .lock_tasks()
                .remove(&task.id)
                .ok_or_else(|| GovcError::UnknownTask(task.id.clone()))?;
            // Dropping the aborted wait drops the child, which kills it.
            pending.process.abort();
            debug!(task = %task.id, command = %pending.command, "cancelled govc task");
            Ok(())
        })
    }
}

fn datacenter_folders(object: ManagedObject) -> Datacenter {
    let vm_folder = ManagedObject::new(format!("{}/vm", object.id), "vm", ObjectKind::Folder);
    let datastore_folder = ManagedObject::new(
        format!("{}/datastore", object.id),
        "datastore",
        ObjectKind::Folder,
    );
    Datacenter {
        object,
        vm_folder,
        datastore_folder,
    }
}

fn task_state(output: &Output, payload: Option<TaskPayload>) -> TaskState {
    if output.status.success() {
        return TaskState::Succeeded(payload);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    if stderr.is_empty() {
        TaskState::Failed(format!("govc exited with {}", output.status))
    } else {
        TaskState::Failed(stderr)
    }
}

fn parse_ls(stdout: &str) -> Result<Vec<ManagedObject>, String> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<LsResult>(stdout)
        .map(LsResult::into_objects)
        .map_err(|err| err.to_string())
}

fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = escape(Cow::Borrowed(program)).into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&escape(Cow::Borrowed(arg.as_str())));
    }
    rendered
}

fn ls_args(path: &str) -> Vec<String> {
    vec![String::from("ls"), String::from("-json"), path.to_owned()]
}

fn resource_pool_args(vm: &ManagedObject) -> Vec<String> {
    vec![
        String::from("object.collect"),
        String::from("-s"),
        vm.id.clone(),
        String::from("resourcePool"),
    ]
}

fn snapshot_create_args(vm: &ManagedObject, request: &SnapshotRequest) -> Vec<String> {
    vec![
        String::from("snapshot.create"),
        String::from("-vm"),
        vm.id.clone(),
        format!("-m={}", request.include_memory),
        format!("-q={}", request.quiesce),
        request.name.clone(),
    ]
}

fn snapshot_remove_args(snapshot: &SnapshotRef, remove_children: bool) -> Vec<String> {
    vec![
        String::from("snapshot.remove"),
        String::from("-vm"),
        snapshot.vm_id.clone(),
        format!("-r={remove_children}"),
        snapshot.selector().to_owned(),
    ]
}

/// `govc vm.clone` never copies memory state, so `spec.memory` has no flag.
fn clone_args(vm: &ManagedObject, spec: &CloneSpec) -> Vec<String> {
    vec![
        String::from("vm.clone"),
        String::from("-vm"),
        vm.id.clone(),
        String::from("-snapshot"),
        spec.snapshot.selector().to_owned(),
        format!("-template={}", spec.template),
        String::from("-on=false"),
        String::from("-folder"),
        spec.folder.id.clone(),
        String::from("-ds"),
        spec.datastore.id.clone(),
        spec.name.clone(),
    ]
}

fn snapshot_tree_args(vm_id: &str) -> Vec<String> {
    vec![
        String::from("snapshot.tree"),
        String::from("-vm"),
        vm_id.to_owned(),
        String::from("-C"),
        String::from("-i"),
    ]
}

/// Extracts the id from `snapshot.tree -C -i` output such as
/// `[snapshot-17]  Pre-Backup`, provided the line names `name`.
fn parse_current_snapshot_id(tree: &str, name: &str) -> Option<String> {
    let line = tree.lines().map(str::trim).find(|line| !line.is_empty())?;
    let (id, rest) = line
        .split_whitespace()
        .find(|token| token.contains("snapshot-"))
        .map(|token| (token, line.replacen(token, "", 1)))?;
    if rest.trim() != name {
        return None;
    }
    Some(id.trim_matches(['[', ']']).to_owned())
}

fn destroy_args(object: &ManagedObject) -> Vec<String> {
    vec![String::from("vm.destroy"), object.id.clone()]
}
