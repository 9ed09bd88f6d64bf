// Functions and the call contract
// Synthetic functions run ABC method bodies; native functions are host closures

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{trace, warn};

use super::class::ClassId;
use super::context::AbcContext;
use super::interpreter::{self, Bytecode};
use super::interner::intern;
use super::runtime::Runtime;
use super::value::{FunctionRef, Value};
use crate::error::{runtime_error, ErrorKind, VmError, VmResult};

/// Host function: (runtime, this, args) -> result
pub type NativeFn = Arc<dyn Fn(&mut Runtime, &Value, &[Value]) -> VmResult<Value> + Send + Sync>;

/// An ABC method shared by every closure created over it
pub struct MethodHandle {
    pub context: Arc<AbcContext>,
    pub index: u32,
    hit_count: AtomicU32,
}

impl MethodHandle {
    pub fn new(context: Arc<AbcContext>, index: u32) -> Arc<Self> {
        Arc::new(Self {
            context,
            index,
            hit_count: AtomicU32::new(0),
        })
    }

    /// Completed synchronous calls
    pub fn hit_count(&self) -> u32 {
        self.hit_count.load(Ordering::Relaxed)
    }
}

pub enum FunctionKind {
    Synthetic(Arc<MethodHandle>),
    Native(NativeFn),
}

/// State captured when the function was created
#[derive(Clone)]
pub struct Closure {
    /// Bound receiver
    pub this: Option<Value>,
    pub scope: Arc<[Value]>,
    /// Class whose trait declared the function; super lookups start above it
    pub level: Option<ClassId>,
}

impl Default for Closure {
    fn default() -> Self {
        Self {
            this: None,
            scope: Arc::from(Vec::new()),
            level: None,
        }
    }
}

pub struct Function {
    pub name: Arc<str>,
    pub kind: FunctionKind,
    pub closure: Closure,
}

impl Function {
    pub fn synthetic(name: Arc<str>, handle: Arc<MethodHandle>, closure: Closure) -> FunctionRef {
        Arc::new(Function {
            name,
            kind: FunctionKind::Synthetic(handle),
            closure,
        })
    }

    pub fn native<F>(name: &str, f: F) -> FunctionRef
    where
        F: Fn(&mut Runtime, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        Arc::new(Function {
            name: intern(name),
            kind: FunctionKind::Native(Arc::new(f)),
            closure: Closure::default(),
        })
    }

    /// Same code with a new bound receiver
    pub fn bind(&self, this: Value) -> FunctionRef {
        let kind = match &self.kind {
            FunctionKind::Synthetic(h) => FunctionKind::Synthetic(h.clone()),
            FunctionKind::Native(f) => FunctionKind::Native(f.clone()),
        };
        Arc::new(Function {
            name: self.name.clone(),
            kind,
            closure: Closure {
                this: Some(this),
                ..self.closure.clone()
            },
        })
    }

    pub fn method(&self) -> Option<&Arc<MethodHandle>> {
        match &self.kind {
            FunctionKind::Synthetic(h) => Some(h),
            FunctionKind::Native(_) => None,
        }
    }

    /// Declared parameter count, 0 for natives
    pub fn length(&self) -> usize {
        self.method()
            .and_then(|h| h.context.method(h.index).ok())
            .map(|m| m.param_count())
            .unwrap_or(0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FunctionKind::Synthetic(h) => write!(f, "Function({}, method {})", self.name, h.index),
            FunctionKind::Native(_) => write!(f, "Function({}, native)", self.name),
        }
    }
}

impl Runtime {
    /// Call `function`. A receiver bound into the closure replaces `this`
    /// unless `override_this` is set.
    pub fn call(
        &mut self,
        function: &FunctionRef,
        this: Value,
        args: &[Value],
        override_this: bool,
    ) -> VmResult<Value> {
        let this = match (&function.closure.this, override_this) {
            (Some(bound), false) => bound.clone(),
            _ => this,
        };
        match &function.kind {
            FunctionKind::Native(f) => {
                let f = f.clone();
                f(self, &this, args)
            }
            FunctionKind::Synthetic(handle) => {
                let handle = handle.clone();
                self.call_synthetic(function, &handle, this, args)
            }
        }
    }

    /// Call any callable value
    pub fn call_value(&mut self, callee: &Value, this: Value, args: &[Value]) -> VmResult<Value> {
        match callee {
            Value::Function(f) => self.call(f, this, args, false),
            // Calling a class converts its argument
            Value::Class(id) => {
                let id = *id;
                self.convert_to_class(id, args.first().cloned().unwrap_or(Value::Undefined))
            }
            other => Err(VmError::new(
                ErrorKind::TypeError,
                format!("{} is not a function", other.type_name()),
            )),
        }
    }

    fn call_synthetic(
        &mut self,
        function: &FunctionRef,
        handle: &Arc<MethodHandle>,
        this: Value,
        args: &[Value],
    ) -> VmResult<Value> {
        if self.depth >= self.config.max_call_depth {
            return Err(VmError::new(
                ErrorKind::StackOverflow,
                format!("Call depth limit of {} reached", self.config.max_call_depth),
            ));
        }

        let context = handle.context.clone();
        let body = context
            .body(handle.index)
            .ok_or_else(|| runtime_error(format!("Method {} has no body", function.name)))?;
        let locals = self.build_locals(function, &context, handle.index, this, args)?;

        let hit = handle.hit_count();
        let mut compiled = self.jit.get_compiled(&context, handle.index);
        if compiled.is_none()
            && self.jit.is_enabled()
            && (hit == self.config.hot_threshold || !self.config.use_interpreter)
        {
            match self.jit.compile(&context, handle.index) {
                Ok(c) => compiled = Some(c),
                Err(e) => warn!("Falling back to interpreter for {}: {}", function.name, e),
            }
        }

        trace!("Calling {} with {} arguments", function.name, args.len());
        self.depth += 1;
        let result = match &compiled {
            Some(code) => interpreter::execute(self, function, &context, body, locals, code.as_ref()),
            None => interpreter::execute(self, function, &context, body, locals, &Bytecode(&body.code)),
        };
        self.depth -= 1;
        handle.hit_count.fetch_add(1, Ordering::Relaxed);
        result
    }

    fn build_locals(
        &mut self,
        function: &FunctionRef,
        context: &Arc<AbcContext>,
        method: u32,
        this: Value,
        args: &[Value],
    ) -> VmResult<Vec<Value>> {
        let info = context.method(method)?;
        let body = context
            .body(method)
            .ok_or_else(|| runtime_error(format!("Method {} has no body", function.name)))?;

        let param_count = info.param_count();
        let passed = args.len().min(param_count);
        let missing = param_count - passed;
        // Fatal to the call, like a stack overflow; script handlers never see it
        if missing > info.options.len() {
            return Err(VmError::new(
                ErrorKind::StackOverflow,
                format!(
                    "{}() expects at least {} arguments, got {}",
                    function.name,
                    param_count - info.options.len(),
                    args.len()
                ),
            ));
        }

        let extra = usize::from(info.needs_rest() || info.needs_arguments());
        let size = (body.local_count as usize).max(param_count + 1 + extra);
        let mut locals = vec![Value::Undefined; size];
        locals[0] = this;
        locals[1..=passed].clone_from_slice(&args[..passed]);

        let first_option = info.options.len() - missing;
        for (i, opt) in info.options[first_option..].iter().enumerate() {
            locals[passed + 1 + i] = context.constant(opt.kind, opt.index);
        }

        if info.needs_rest() {
            let rest = args.get(param_count..).unwrap_or(&[]).to_vec();
            locals[param_count + 1] = self.new_array(rest);
        } else if info.needs_arguments() {
            let arguments = self.new_array(args.to_vec());
            if let Value::Object(o) = &arguments {
                o.lock().set_public(intern("callee"), Value::Function(function.clone()));
            }
            locals[param_count + 1] = arguments;
        }
        Ok(locals)
    }
}
