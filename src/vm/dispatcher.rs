// VM dispatcher
// One worker thread owns the Runtime and handles queued events in order.
// Other threads only enqueue, or enqueue and wait.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;

use super::events::Event;
use super::runtime::Runtime;
use super::sync::{Completion, Semaphore, WorkerToken};
use super::value::Value;
use crate::config::VmConfig;
use crate::error::{runtime_error, ErrorKind, VmError, VmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Created,
    Started,
    Running,
    ShuttingDown,
    Terminated,
}

struct Queue {
    events: VecDeque<Event>,
    state: VmState,
}

struct Shared {
    queue: Mutex<Queue>,
    /// One permit per queued event
    pending: Semaphore,
    /// First internal failure; the worker drains the queue and stops after it
    error: Mutex<Option<VmError>>,
}

impl Shared {
    /// Stop accepting events; the worker exits once the queue is empty
    fn begin_shutdown(&self, reason: &str) {
        let mut queue = self.queue.lock();
        if matches!(queue.state, VmState::Started | VmState::Running | VmState::Created) {
            queue.state = VmState::ShuttingDown;
        }
        info!("Shutting down ({}), {} events left to handle", reason, queue.events.len());
    }
}

/// Cloneable handle for enqueueing events from any thread
#[derive(Clone)]
pub struct VmHandle {
    shared: Arc<Shared>,
}

impl VmHandle {
    /// Queue `event`. Returns false once shutdown has been requested, in
    /// which case any waiter of the event is released with an error.
    pub fn add_event(&self, event: Event) -> bool {
        let mut queue = self.shared.queue.lock();
        if matches!(queue.state, VmState::ShuttingDown | VmState::Terminated) {
            let state = queue.state;
            drop(queue);
            debug!("Rejected {:?}: VM is {:?}", event, state);
            event.abandon();
            return false;
        }
        trace!("Queued {:?}", event);
        queue.events.push_back(event);
        drop(queue);
        self.shared.pending.signal();
        true
    }

    pub fn state(&self) -> VmState {
        self.shared.queue.lock().state
    }

    pub fn pending_events(&self) -> usize {
        self.shared.queue.lock().events.len()
    }

    pub fn last_error(&self) -> Option<VmError> {
        self.shared.error.lock().clone()
    }

    fn wait_for(&self, event: Event, completion: &Completion) -> VmResult<Value> {
        if !self.add_event(event) {
            return Err(runtime_error("The VM is not accepting events"));
        }
        completion.wait()
    }

    /// Run `action` on the worker and block until it has run. For threads
    /// other than the worker; code running on the worker holds the runtime
    /// and uses `Runtime::synchronize`, which runs in place.
    pub fn synchronize<F>(&self, action: F) -> VmResult<()>
    where
        F: FnOnce(&mut Runtime) + Send + 'static,
    {
        let (event, completion) = Event::synchronize(action);
        self.wait_for(event, &completion).map(|_| ())
    }

    /// Construct an instance of "pkg.Name" on the worker and wait for it.
    /// The worker itself uses `Runtime::construct_object`.
    pub fn construct_object(&self, class_name: &str, args: Vec<Value>) -> VmResult<Value> {
        let (event, completion) = Event::construct_object(class_name, args);
        self.wait_for(event, &completion)
    }
}

/// Held by a runtime while a dispatcher worker drives it
pub(crate) struct WorkerBinding {
    handle: VmHandle,
    token: WorkerToken,
}

/// The VM: a dispatcher plus the worker thread that owns the runtime
pub struct AbcVm {
    handle: VmHandle,
    config: VmConfig,
    worker: Option<JoinHandle<()>>,
}

impl AbcVm {
    pub fn new(config: VmConfig) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                events: VecDeque::new(),
                state: VmState::Created,
            }),
            pending: Semaphore::new(0),
            error: Mutex::new(None),
        });
        Self {
            handle: VmHandle { shared },
            config,
            worker: None,
        }
    }

    pub fn handle(&self) -> VmHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> VmState {
        self.handle.state()
    }

    pub fn start(&mut self) -> VmResult<()> {
        self.start_with(|_| {})
    }

    /// Spawn the worker; `setup` runs on it before the first event, the
    /// place to register host classes and functions
    pub fn start_with<F>(&mut self, setup: F) -> VmResult<()>
    where
        F: FnOnce(&mut Runtime) + Send + 'static,
    {
        self.config.validate()?;
        {
            let mut queue = self.handle.shared.queue.lock();
            if queue.state != VmState::Created {
                return Err(runtime_error(format!("Cannot start a VM that is {:?}", queue.state)));
            }
            queue.state = VmState::Started;
        }

        let handle = self.handle.clone();
        let config = self.config.clone();
        let worker = thread::Builder::new()
            .name("abcvm-worker".to_string())
            .spawn(move || {
                let mut rt = Runtime::new(config);
                setup(&mut rt);
                run_worker(handle, rt);
            })
            .map_err(|e| runtime_error(format!("Failed to spawn the VM worker: {}", e)))?;
        self.worker = Some(worker);
        info!("VM started");
        Ok(())
    }

    /// Request shutdown, wait for the worker to handle what is queued and
    /// report the first internal failure, if any
    pub fn shutdown(&mut self) -> VmResult<()> {
        let shared = &self.handle.shared;
        let wake = {
            let mut queue = shared.queue.lock();
            match queue.state {
                VmState::Started | VmState::Running => {
                    queue.state = VmState::ShuttingDown;
                    queue.events.push_back(Event::Shutdown);
                    true
                }
                _ => false,
            }
        };
        if wake {
            info!("VM shutdown requested");
            shared.pending.signal();
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("VM worker panicked");
                shared
                    .error
                    .lock()
                    .get_or_insert_with(|| runtime_error("VM worker panicked"));
            }
        }

        // Events queued before a start that never happened
        let leftover: Vec<Event> = {
            let mut queue = shared.queue.lock();
            queue.state = VmState::Terminated;
            queue.events.drain(..).collect()
        };
        if !leftover.is_empty() {
            info!("Releasing {} events of a VM that never started", leftover.len());
        }
        leftover.into_iter().for_each(Event::abandon);
        info!("VM terminated");

        match self.handle.last_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for AbcVm {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.shutdown() {
                warn!("VM stopped with an error: {}", e.message);
            }
        }
    }
}

fn run_worker(handle: VmHandle, mut rt: Runtime) {
    let shared = handle.shared.clone();
    let token = WorkerToken::new();
    rt.worker = Some(WorkerBinding { handle, token });
    {
        let mut queue = shared.queue.lock();
        if queue.state == VmState::Started {
            queue.state = VmState::Running;
        }
    }
    info!("VM worker running");

    loop {
        shared.pending.wait();
        let next = shared.queue.lock().events.pop_front();
        let Some(event) = next else {
            continue;
        };
        match event {
            Event::Shutdown => shared.begin_shutdown("shutdown event"),
            event => {
                trace!("Handling {:?}", event);
                if let Err(e) = rt.handle_event(token, event) {
                    error!("Internal failure while handling an event: {}", e.message);
                    shared.error.lock().get_or_insert(e);
                    shared.begin_shutdown("internal failure");
                }
            }
        }

        let queue = shared.queue.lock();
        if queue.events.is_empty() {
            if queue.state == VmState::ShuttingDown {
                break;
            }
            drop(queue);
            rt.maybe_collect();
        }
    }

    rt.worker = None;
    info!("VM worker stopped");
}

/// An error raised by the code an event ran aborts that event only
fn report_script_error<T>(kind: &str, result: VmResult<T>) {
    let Err(e) = result else {
        return;
    };
    match e.kind {
        ErrorKind::Unsupported => error!("Unsupported operation in {} event: {}", kind, e.message),
        k if k.is_catchable() => warn!("Uncaught script error in {} event: {}", kind, e.message),
        k => error!("{} in {} event: {}", k, kind, e.message),
    }
}

impl Runtime {
    /// Worker capability, present while a dispatcher worker drives this runtime
    pub fn worker_token(&self) -> Option<WorkerToken> {
        self.worker.as_ref().map(|binding| binding.token)
    }

    /// Raise an event from code running inside the VM. Synchronize and
    /// construct-object events run here and now; waiting for the queue
    /// from the worker would never return. A runtime without a dispatcher
    /// has no worker context and rejects every event.
    pub fn add_event(&mut self, event: Event) -> bool {
        let Some(binding) = &self.worker else {
            warn!("No dispatcher to queue {:?}", event);
            event.abandon();
            return false;
        };
        if !event.is_synchronous() {
            return binding.handle.add_event(event);
        }
        let token = binding.token;
        let kind = event.kind_name();
        trace!("Handling {} in place", kind);
        if let Err(e) = self.handle_event(token, event) {
            error!("In-place {} event failed: {}", kind, e.message);
        }
        true
    }

    /// Run `action` against this runtime from worker context, in place
    pub fn synchronize<F>(&mut self, action: F) -> VmResult<()>
    where
        F: FnOnce(&mut Runtime) + Send + 'static,
    {
        let (event, completion) = Event::synchronize(action);
        if !self.add_event(event) {
            return Err(runtime_error("No worker context to synchronize with"));
        }
        completion.wait().map(|_| ())
    }

    /// Construct an instance of "pkg.Name" from worker context, in place
    pub fn construct_object(&mut self, class_name: &str, args: Vec<Value>) -> VmResult<Value> {
        let (event, completion) = Event::construct_object(class_name, args);
        if !self.add_event(event) {
            return Err(runtime_error("No worker context to construct in"));
        }
        completion.wait()
    }

    /// Handle one event. Only failures of the dispatcher's own work come
    /// back as errors; whatever the event's code raises is reported here.
    pub(crate) fn handle_event(&mut self, _worker: WorkerToken, event: Event) -> VmResult<()> {
        let kind = event.kind_name();
        match event {
            Event::Shutdown => {}
            Event::BindClass { class_name, object, args } => {
                let id = self.class_by_name(&class_name)?;
                object.lock().class = Some(id);
                let result = self.handle_construction(id, &object, &args, true);
                report_script_error(kind, result);
            }
            Event::ConstructObject {
                class_name,
                args,
                completion,
            } => {
                let result = self
                    .class_by_name(&class_name)
                    .and_then(|id| self.construct(&Value::Class(id), &args));
                completion.complete(result.clone());
                report_script_error(kind, result);
            }
            Event::Synchronize { action, completion } => {
                action(self);
                completion.complete(Ok(Value::Undefined));
            }
            Event::InvokeFunction { function, this, args } => {
                let result = self.call(&function, this, &args, false);
                report_script_error(kind, result);
            }
            Event::InitContext { context } => {
                let result = self.exec(context);
                report_script_error(kind, result);
            }
            Event::ChangeFrame { target, frame } => {
                let result = target.change_frame(self, frame);
                report_script_error(kind, result);
            }
            Event::Dispatch { target, event } => {
                let result = self.dispatch_to_target(target, &event);
                report_script_error(kind, result);
            }
        }
        Ok(())
    }
}
