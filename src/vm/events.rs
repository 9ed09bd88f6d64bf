// VM events and the targets they are dispatched to

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::context::AbcContext;
use super::interner::intern;
use super::runtime::Runtime;
use super::sync::Completion;
use super::value::{FunctionRef, ObjectRef, Value};
use crate::error::VmResult;

/// Work run on the worker with exclusive access to the runtime
pub type SyncAction = Box<dyn FnOnce(&mut Runtime) + Send>;

/// Payload of a target dispatch
#[derive(Debug, Clone)]
pub struct ScriptEvent {
    pub event_type: Arc<str>,
    pub bubbles: bool,
    /// Passed to every listener as its only argument
    pub payload: Value,
}

impl ScriptEvent {
    pub fn new(event_type: &str, bubbles: bool, payload: Value) -> Self {
        Self {
            event_type: intern(event_type),
            bubbles,
            payload,
        }
    }
}

/// Something listeners can be attached to, with an optional parent that
/// bubbling events continue to
pub trait EventTarget: Send + Sync {
    /// Listeners for `event_type` in registration order
    fn listeners(&self, event_type: &str) -> Vec<FunctionRef>;
    fn parent(&self) -> Option<Arc<dyn EventTarget>>;
    /// `this` for listener calls
    fn receiver(&self) -> Value;
}

/// Timeline owner advanced by change-frame events
pub trait FrameTarget: Send + Sync {
    fn change_frame(&self, rt: &mut Runtime, frame: u32) -> VmResult<()>;
}

/// EventTarget backed by a listener table
pub struct ListenerTarget {
    receiver: Value,
    parent: Option<Arc<dyn EventTarget>>,
    listeners: Mutex<FxHashMap<Arc<str>, Vec<FunctionRef>>>,
}

impl ListenerTarget {
    pub fn new(receiver: Value, parent: Option<Arc<dyn EventTarget>>) -> Arc<Self> {
        Arc::new(Self {
            receiver,
            parent,
            listeners: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn add_listener(&self, event_type: &str, listener: FunctionRef) {
        self.listeners
            .lock()
            .entry(intern(event_type))
            .or_default()
            .push(listener);
    }

    pub fn remove_listener(&self, event_type: &str, listener: &FunctionRef) {
        if let Some(list) = self.listeners.lock().get_mut(event_type) {
            list.retain(|f| !Arc::ptr_eq(f, listener));
        }
    }
}

impl EventTarget for ListenerTarget {
    fn listeners(&self, event_type: &str) -> Vec<FunctionRef> {
        self.listeners.lock().get(event_type).cloned().unwrap_or_default()
    }

    fn parent(&self) -> Option<Arc<dyn EventTarget>> {
        self.parent.clone()
    }

    fn receiver(&self) -> Value {
        self.receiver.clone()
    }
}

pub enum Event {
    /// Run the constructor chain of a class on an object the host created
    BindClass {
        class_name: String,
        object: ObjectRef,
        args: Vec<Value>,
    },
    Shutdown,
    Synchronize {
        action: SyncAction,
        completion: Arc<Completion>,
    },
    InvokeFunction {
        function: FunctionRef,
        this: Value,
        args: Vec<Value>,
    },
    /// Declare and run the scripts of a loaded context
    InitContext { context: Arc<AbcContext> },
    ConstructObject {
        class_name: String,
        args: Vec<Value>,
        completion: Arc<Completion>,
    },
    ChangeFrame {
        target: Arc<dyn FrameTarget>,
        frame: u32,
    },
    Dispatch {
        target: Arc<dyn EventTarget>,
        event: ScriptEvent,
    },
}

impl Event {
    pub fn synchronize<F>(action: F) -> (Event, Arc<Completion>)
    where
        F: FnOnce(&mut Runtime) + Send + 'static,
    {
        let completion = Arc::new(Completion::new());
        let event = Event::Synchronize {
            action: Box::new(action),
            completion: completion.clone(),
        };
        (event, completion)
    }

    pub fn construct_object(class_name: &str, args: Vec<Value>) -> (Event, Arc<Completion>) {
        let completion = Arc::new(Completion::new());
        let event = Event::ConstructObject {
            class_name: class_name.to_string(),
            args,
            completion: completion.clone(),
        };
        (event, completion)
    }

    /// Raised on the worker, these run in place instead of being queued
    pub fn is_synchronous(&self) -> bool {
        matches!(self, Event::Synchronize { .. } | Event::ConstructObject { .. })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Event::BindClass { .. } => "bind-class",
            Event::Shutdown => "shutdown",
            Event::Synchronize { .. } => "synchronize",
            Event::InvokeFunction { .. } => "invoke-function",
            Event::InitContext { .. } => "init-context",
            Event::ConstructObject { .. } => "construct-object",
            Event::ChangeFrame { .. } => "change-frame",
            Event::Dispatch { .. } => "dispatch-to-target",
        }
    }

    /// Drop an event that will never be handled, releasing any waiter
    pub(crate) fn abandon(self) {
        match self {
            Event::Synchronize { completion, .. } | Event::ConstructObject { completion, .. } => {
                completion.abandon()
            }
            _ => {}
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::BindClass { class_name, .. } | Event::ConstructObject { class_name, .. } => {
                write!(f, "{}({})", self.kind_name(), class_name)
            }
            Event::InvokeFunction { function, .. } => write!(f, "{}({})", self.kind_name(), function.name),
            Event::InitContext { context } => write!(f, "{}({})", self.kind_name(), context.name),
            Event::ChangeFrame { frame, .. } => write!(f, "{}({})", self.kind_name(), frame),
            Event::Dispatch { event, .. } => write!(f, "{}({})", self.kind_name(), event.event_type),
            _ => write!(f, "{}", self.kind_name()),
        }
    }
}

impl Runtime {
    /// Call the listeners of `target` for `event`, then those of each parent
    /// when the event bubbles
    pub fn dispatch_to_target(&mut self, target: Arc<dyn EventTarget>, event: &ScriptEvent) -> VmResult<()> {
        let mut current = Some(target);
        while let Some(target) = current {
            let receiver = target.receiver();
            for listener in target.listeners(&event.event_type) {
                self.call(&listener, receiver.clone(), std::slice::from_ref(&event.payload), false)?;
            }
            if !event.bubbles {
                break;
            }
            current = target.parent();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::vm::function::Function;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> FunctionRef {
        let log = log.clone();
        Function::native(tag, move |_rt, _this, args| {
            let payload = args.first().map(|v| v.to_str().to_string()).unwrap_or_default();
            log.lock().push(format!("{}:{}", tag, payload));
            Ok(Value::Undefined)
        })
    }

    #[test]
    fn test_bubbling_reaches_parents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let root = ListenerTarget::new(Value::Null, None);
        let child = ListenerTarget::new(Value::Null, Some(root.clone() as Arc<dyn EventTarget>));
        root.add_listener("click", recorder(&log, "root"));
        child.add_listener("click", recorder(&log, "child"));
        child.add_listener("click", recorder(&log, "child2"));

        let mut rt = Runtime::new(VmConfig::default());
        let event = ScriptEvent::new("click", true, Value::Integer(1));
        rt.dispatch_to_target(child.clone(), &event).unwrap();
        assert_eq!(*log.lock(), vec!["child:1", "child2:1", "root:1"]);

        log.lock().clear();
        let event = ScriptEvent::new("click", false, Value::Integer(2));
        rt.dispatch_to_target(child, &event).unwrap();
        assert_eq!(*log.lock(), vec!["child:2", "child2:2"]);
    }

    #[test]
    fn test_remove_listener() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let target = ListenerTarget::new(Value::Null, None);
        let f = recorder(&log, "f");
        target.add_listener("tick", f.clone());
        target.remove_listener("tick", &f);
        assert!(target.listeners("tick").is_empty());
    }

    #[test]
    fn test_abandon_releases_waiter() {
        let (event, completion) = Event::construct_object("Object", Vec::new());
        assert!(event.is_synchronous());
        event.abandon();
        assert!(completion.wait().is_err());
    }
}
