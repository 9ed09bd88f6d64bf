// abcvm Virtual Machine
// Object model, linker, interpreter and the event-driven dispatcher

pub mod class;
pub mod context;
pub mod dispatcher;
pub mod events;
pub mod frame;
pub mod function;
pub mod gc;
pub mod interner;
pub mod interpreter;
pub mod multiname;
pub mod object;
pub mod runtime;
pub mod sync;
pub mod traits;
pub mod value;

pub use class::ClassId;
pub use context::AbcContext;
pub use dispatcher::{AbcVm, VmHandle, VmState};
pub use events::{Event, EventTarget, FrameTarget, ListenerTarget, ScriptEvent};
pub use gc::GcStats;
pub use multiname::ResolvedName;
pub use runtime::Runtime;
pub use value::Value;
