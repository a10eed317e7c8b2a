//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::inventory::{
    CloneSpec, Datacenter, Inventory, InventoryFuture, ManagedObject, ObjectKind, SnapshotRef,
    SnapshotRequest, TaskHandle, TaskPayload, TaskState,
};

/// Mutating operations understood by [`FakeInventory`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FakeOperation {
    /// Snapshot creation.
    Snapshot,
    /// Snapshot removal.
    RemoveSnapshot,
    /// Clone to template.
    Clone,
    /// Destroy.
    Destroy,
}

impl fmt::Display for FakeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Snapshot => "snapshot",
            Self::RemoveSnapshot => "remove-snapshot",
            Self::Clone => "clone",
            Self::Destroy => "destroy",
        };
        f.write_str(label)
    }
}

/// A mutating call recorded by [`FakeInventory`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FakeCall {
    /// Operation that was submitted.
    pub operation: FakeOperation,
    /// Name of the object the operation targeted.
    pub target: String,
}

/// Errors returned by [`FakeInventory`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FakeInventoryError {
    /// Raised when polling a task id that was never issued.
    #[error("unknown task {0}")]
    UnknownTask(String),
    /// Raised when a submission was scripted to be rejected.
    #[error("{operation} rejected for {target}")]
    Rejected {
        /// Rejected operation.
        operation: FakeOperation,
        /// Target object name.
        target: String,
    },
    /// Raised when listing a container was scripted to fail.
    #[error("listing {0} failed")]
    ListFailed(String),
}

#[derive(Clone, Debug)]
enum Effect {
    AddSnapshot { vm_id: String, name: String },
    RemoveSnapshot { vm_id: String, name: String },
    AddChild { container: String, object: ManagedObject },
    RemoveObject { id: String },
}

#[derive(Clone, Debug)]
struct ScriptedTask {
    running_polls: usize,
    terminal: TaskState,
    effect: Option<Effect>,
    polls: usize,
}

#[derive(Debug, Default)]
struct FakeState {
    datacenters: Vec<Datacenter>,
    objects: HashMap<String, ManagedObject>,
    children: HashMap<String, Vec<String>>,
    unassignable: HashSet<String>,
    snapshots: HashMap<String, Vec<String>>,
    failing: HashSet<(FakeOperation, String)>,
    rejecting: HashSet<(FakeOperation, String)>,
    payloadless: HashSet<(FakeOperation, String)>,
    stalling: HashSet<(FakeOperation, String)>,
    failing_listings: HashSet<String>,
    task_latency: usize,
    tasks: HashMap<String, ScriptedTask>,
    next_task: u64,
    calls: Vec<FakeCall>,
    cancelled: Vec<String>,
}

impl FakeState {
    fn insert(&mut self, container: &str, object: ManagedObject) {
        self.children
            .entry(container.to_owned())
            .or_default()
            .push(object.id.clone());
        self.objects.insert(object.id.clone(), object);
    }

    fn remove(&mut self, id: &str) {
        self.objects.remove(id);
        for ids in self.children.values_mut() {
            ids.retain(|child| child != id);
        }
        self.snapshots.remove(id);
    }

    fn name_of(&self, id: &str) -> String {
        self.objects
            .get(id)
            .map_or_else(|| id.to_owned(), |object| object.name.clone())
    }

    fn submit(
        &mut self,
        operation: FakeOperation,
        target: &str,
        success: TaskState,
        effect: Option<Effect>,
    ) -> Result<TaskHandle, FakeInventoryError> {
        self.calls.push(FakeCall {
            operation,
            target: target.to_owned(),
        });
        let key = (operation, target.to_owned());
        if self.rejecting.contains(&key) {
            return Err(FakeInventoryError::Rejected {
                operation,
                target: target.to_owned(),
            });
        }

        let (terminal, effect) = if self.failing.contains(&key) {
            (
                TaskState::Failed(format!("simulated {operation} failure for {target}")),
                None,
            )
        } else if self.payloadless.contains(&key) {
            (TaskState::Succeeded(None), effect)
        } else {
            (success, effect)
        };

        let running_polls = if self.stalling.contains(&key) {
            usize::MAX
        } else {
            self.task_latency
        };
        self.next_task += 1;
        let id = format!("task-{}", self.next_task);
        self.tasks.insert(
            id.clone(),
            ScriptedTask {
                running_polls,
                terminal,
                effect,
                polls: 0,
            },
        );
        Ok(TaskHandle {
            id,
            description: format!("{operation} {target}"),
        })
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::AddSnapshot { vm_id, name } => {
                self.snapshots.entry(vm_id).or_default().push(name);
            }
            Effect::RemoveSnapshot { vm_id, name } => {
                if let Some(names) = self.snapshots.get_mut(&vm_id)
                    && let Some(position) = names.iter().position(|existing| *existing == name)
                {
                    names.remove(position);
                }
            }
            Effect::AddChild { container, object } => self.insert(&container, object),
            Effect::RemoveObject { id } => self.remove(&id),
        }
    }

    fn poll(&mut self, id: &str) -> Result<TaskState, FakeInventoryError> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| FakeInventoryError::UnknownTask(id.to_owned()))?;
        task.polls += 1;
        if task.polls <= task.running_polls {
            return Ok(TaskState::Running);
        }
        let terminal = task.terminal.clone();
        let effect = task.effect.take();
        if let (TaskState::Succeeded(_), Some(effect)) = (&terminal, effect) {
            self.apply(effect);
        }
        Ok(terminal)
    }
}

/// In-memory virtualization platform used to exercise the backup engine.
///
/// Tasks take effect when they are polled to completion, so a snapshot only
/// appears on its VM once its task has been observed as succeeded. Handles
/// share state, so clones of a `FakeInventory` observe the same platform.
#[derive(Clone, Debug, Default)]
pub struct FakeInventory {
    state: Arc<Mutex<FakeState>>,
}

impl FakeInventory {
    /// Creates an empty platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a datacenter with its `vm` and `datastore` root folders.
    pub fn add_datacenter(&self, name: &str) -> Datacenter {
        let datacenter = Datacenter {
            object: ManagedObject::new(format!("/{name}"), name, ObjectKind::Datacenter),
            vm_folder: ManagedObject::new(format!("/{name}/vm"), "vm", ObjectKind::Folder),
            datastore_folder: ManagedObject::new(
                format!("/{name}/datastore"),
                "datastore",
                ObjectKind::Folder,
            ),
        };
        let mut state = self.lock();
        for folder in [&datacenter.vm_folder, &datacenter.datastore_folder] {
            state.objects.insert(folder.id.clone(), folder.clone());
            state.children.entry(folder.id.clone()).or_default();
        }
        state.datacenters.push(datacenter.clone());
        datacenter
    }

    /// Adds an object of `kind` under `parent` and returns its handle.
    pub fn add_object(&self, parent: &ManagedObject, name: &str, kind: ObjectKind) -> ManagedObject {
        let object = ManagedObject::new(format!("{}/{name}", parent.id), name, kind);
        let mut state = self.lock();
        if kind == ObjectKind::Folder {
            state.children.entry(object.id.clone()).or_default();
        }
        state.insert(&parent.id, object.clone());
        object
    }

    /// Adds a folder under `parent`.
    pub fn add_folder(&self, parent: &ManagedObject, name: &str) -> ManagedObject {
        self.add_object(parent, name, ObjectKind::Folder)
    }

    /// Adds an assignable VM under `parent`.
    pub fn add_vm(&self, parent: &ManagedObject, name: &str) -> ManagedObject {
        self.add_object(parent, name, ObjectKind::VirtualMachine)
    }

    /// Adds a VM without a resource pool (a template) under `parent`.
    pub fn add_template(&self, parent: &ManagedObject, name: &str) -> ManagedObject {
        let template = self.add_vm(parent, name);
        self.lock().unassignable.insert(template.id.clone());
        template
    }

    /// Adds a datastore under `parent`.
    pub fn add_datastore(&self, parent: &ManagedObject, name: &str) -> ManagedObject {
        self.add_object(parent, name, ObjectKind::Datastore)
    }

    /// Places an existing snapshot on a VM.
    pub fn add_snapshot(&self, vm: &ManagedObject, name: &str) {
        self.lock()
            .snapshots
            .entry(vm.id.clone())
            .or_default()
            .push(name.to_owned());
    }

    /// Makes tasks of `operation` against the object named `target` fail.
    pub fn fail(&self, operation: FakeOperation, target: &str) {
        self.lock().failing.insert((operation, target.to_owned()));
    }

    /// Makes submission of `operation` against `target` return an error.
    pub fn reject(&self, operation: FakeOperation, target: &str) {
        self.lock().rejecting.insert((operation, target.to_owned()));
    }

    /// Makes tasks of `operation` against `target` succeed without a result.
    pub fn omit_payload(&self, operation: FakeOperation, target: &str) {
        self.lock().payloadless.insert((operation, target.to_owned()));
    }

    /// Makes tasks of `operation` against `target` run forever.
    pub fn stall(&self, operation: FakeOperation, target: &str) {
        self.lock().stalling.insert((operation, target.to_owned()));
    }

    /// Makes listing the children of `container` fail.
    pub fn fail_listing(&self, container: &ManagedObject) {
        self.lock().failing_listings.insert(container.id.clone());
    }

    /// Number of polls that report `running` before a task finishes.
    pub fn set_task_latency(&self, polls: usize) {
        self.lock().task_latency = polls;
    }

    /// Registers a task with a fixed id and terminal state, without effects.
    pub fn script_task(&self, id: &str, running_polls: usize, terminal: TaskState) {
        self.lock().tasks.insert(
            id.to_owned(),
            ScriptedTask {
                running_polls,
                terminal,
                effect: None,
                polls: 0,
            },
        );
    }

    /// Returns how many times the task with `id` was polled.
    #[must_use]
    pub fn poll_count(&self, id: &str) -> usize {
        self.lock().tasks.get(id).map_or(0, |task| task.polls)
    }

    /// Returns the names of the direct children of `container`.
    #[must_use]
    pub fn child_names(&self, container: &ManagedObject) -> Vec<String> {
        let state = self.lock();
        state
            .children
            .get(&container.id)
            .map(|ids| ids.iter().map(|id| state.name_of(id)).collect())
            .unwrap_or_default()
    }

    /// Returns the snapshot names currently present on `vm`.
    #[must_use]
    pub fn snapshots(&self, vm: &ManagedObject) -> Vec<String> {
        self.lock()
            .snapshots
            .get(&vm.id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the ids of cancelled tasks, in cancellation order.
    #[must_use]
    pub fn cancelled_tasks(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    /// Returns every mutating call submitted so far.
    #[must_use]
    pub fn calls(&self) -> Vec<FakeCall> {
        self.lock().calls.clone()
    }

    /// Returns the targets of calls for one operation, in submission order.
    #[must_use]
    pub fn targets_of(&self, operation: FakeOperation) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .map(|call| call.target.clone())
            .collect()
    }
}

impl Inventory for FakeInventory {
    type Error = FakeInventoryError;

    fn find_datacenter<'a>(
        &'a self,
        name: &'a str,
    ) -> InventoryFuture<'a, Option<Datacenter>, Self::Error> {
        Box::pin(async move {
            Ok(self
                .lock()
                .datacenters
                .iter()
                .find(|datacenter| datacenter.object.name == name)
                .cloned())
        })
    }

    fn list_children<'a>(
        &'a self,
        container: &'a ManagedObject,
    ) -> InventoryFuture<'a, Vec<ManagedObject>, Self::Error> {
        Box::pin(async move {
            let state = self.lock();
            if state.failing_listings.contains(&container.id) {
                return Err(FakeInventoryError::ListFailed(container.name.clone()));
            }
            Ok(state
                .children
                .get(&container.id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.objects.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn is_assignable<'a>(
        &'a self,
        vm: &'a ManagedObject,
    ) -> InventoryFuture<'a, bool, Self::Error> {
        Box::pin(async move { Ok(!self.lock().unassignable.contains(&vm.id)) })
    }

    fn create_snapshot<'a>(
        &'a self,
        vm: &'a ManagedObject,
        request: &'a SnapshotRequest,
    ) -> InventoryFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            let snapshot = SnapshotRef {
                vm_id: vm.id.clone(),
                name: request.name.clone(),
                id: None,
            };
            self.lock().submit(
                FakeOperation::Snapshot,
                &vm.name,
                TaskState::Succeeded(Some(TaskPayload::Snapshot(snapshot))),
                Some(Effect::AddSnapshot {
                    vm_id: vm.id.clone(),
                    name: request.name.clone(),
                }),
            )
        })
    }

    fn remove_snapshot<'a>(
        &'a self,
        snapshot: &'a SnapshotRef,
        _remove_children: bool,
    ) -> InventoryFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let target = state.name_of(&snapshot.vm_id);
            state.submit(
                FakeOperation::RemoveSnapshot,
                &target,
                TaskState::Succeeded(None),
                Some(Effect::RemoveSnapshot {
                    vm_id: snapshot.vm_id.clone(),
                    name: snapshot.name.clone(),
                }),
            )
        })
    }

    fn clone_as_template<'a>(
        &'a self,
        vm: &'a ManagedObject,
        spec: &'a CloneSpec,
    ) -> InventoryFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let snapshot_present = state
                .snapshots
                .get(&spec.snapshot.vm_id)
                .is_some_and(|names| names.contains(&spec.snapshot.name));
            let clone = ManagedObject::new(
                format!("{}/{}", spec.folder.id, spec.name),
                spec.name.clone(),
                ObjectKind::VirtualMachine,
            );
            let (success, effect) = if snapshot_present {
                (
                    TaskState::Succeeded(Some(TaskPayload::Object(clone.clone()))),
                    Some(Effect::AddChild {
                        container: spec.folder.id.clone(),
                        object: clone,
                    }),
                )
            } else {
                (
                    TaskState::Failed(format!("snapshot {} not found", spec.snapshot.name)),
                    None,
                )
            };
            if let Some(Effect::AddChild { object, .. }) = &effect
                && spec.template
            {
                state.unassignable.insert(object.id.clone());
            }
            state.submit(FakeOperation::Clone, &vm.name, success, effect)
        })
    }

    fn destroy<'a>(
        &'a self,
        object: &'a ManagedObject,
    ) -> InventoryFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            self.lock().submit(
                FakeOperation::Destroy,
                &object.name,
                TaskState::Succeeded(None),
                Some(Effect::RemoveObject {
                    id: object.id.clone(),
                }),
            )
        })
    }

    fn poll_task<'a>(
        &'a self,
        task: &'a TaskHandle,
    ) -> InventoryFuture<'a, TaskState, Self::Error> {
        Box::pin(async move { self.lock().poll(&task.id) })
    }

    fn cancel_task<'a>(&'a self, task: &'a TaskHandle) -> InventoryFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state
                .tasks
                .remove(&task.id)
                .ok_or_else(|| FakeInventoryError::UnknownTask(task.id.clone()))?;
            state.cancelled.push(task.id.clone());
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
