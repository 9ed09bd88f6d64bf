// abcvm Runtime
// Owns the class arena, the global object and the execution tiers, and
// implements the object model: property access, type tests and construction

use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;

use super::class::{ClassArena, ClassId};
use super::context::AbcContext;
use super::dispatcher::WorkerBinding;
use super::function::Function;
use super::gc::{GcHeap, GcStats};
use super::interner::intern;
use super::multiname::{local_name_of, NsNameAndKind, ResolvedName};
use super::object::{Binding, ScriptObject};
use super::value::{ObjectRef, Value};
use crate::abc::NamespaceKind;
use crate::config::VmConfig;
use crate::error::{corrupt, reference_error, type_error, unsupported, ErrorKind, VmError, VmResult};
use crate::jit::JitContext;

/// Ids of the classes every runtime registers at startup
#[derive(Debug, Clone, Copy, Default)]
pub struct Builtins {
    pub object: ClassId,
    pub class: ClassId,
    pub function: ClassId,
    pub namespace: ClassId,
    pub array: ClassId,
    pub string: ClassId,
    pub boolean: ClassId,
    pub int: ClassId,
    pub uint: ClassId,
    pub number: ClassId,
    pub error: ClassId,
    pub type_error: ClassId,
    pub argument_error: ClassId,
    pub reference_error: ClassId,
    pub range_error: ClassId,
}

pub struct Runtime {
    pub config: VmConfig,
    pub classes: ClassArena,
    pub global: ObjectRef,
    pub builtins: Builtins,
    pub(crate) jit: JitContext,
    /// Nested synthetic calls currently executing
    pub(crate) depth: usize,
    pub(crate) gc: GcHeap,
    /// Every context passed to `exec`, kept alive for the runtime's lifetime
    pub(crate) contexts: Vec<Arc<AbcContext>>,
    /// Set while the runtime is driven by a dispatcher worker
    pub(crate) worker: Option<WorkerBinding>,
    trace_sink: Option<Arc<Mutex<Vec<String>>>>,
    gc_roots: Vec<Value>,
}

impl Runtime {
    pub fn new(config: VmConfig) -> Self {
        let jit = JitContext::new(config.use_jit);
        let mut rt = Self {
            jit,
            classes: ClassArena::new(),
            global: Arc::new(Mutex::new(ScriptObject::new(None))),
            builtins: Builtins::default(),
            depth: 0,
            gc: GcHeap::new(config.gc.threshold),
            contexts: Vec::new(),
            worker: None,
            trace_sink: None,
            gc_roots: Vec::new(),
            config,
        };
        rt.builtins = crate::builtins::register_all(&mut rt);
        rt.global.lock().class = Some(rt.builtins.object);
        debug!("Runtime ready with {} builtin classes", rt.classes.len());
        rt
    }

    pub fn global_value(&self) -> Value {
        Value::Object(self.global.clone())
    }

    /// Bind a public name on the global object
    pub fn define_global(&mut self, name: &str, value: Value) {
        self.global.lock().set_public(intern(name), value);
    }

    /// Capture `trace` output instead of printing it
    pub fn set_trace_sink(&mut self, sink: Arc<Mutex<Vec<String>>>) {
        self.trace_sink = Some(sink);
    }

    pub(crate) fn emit_trace(&mut self, line: String) {
        match &self.trace_sink {
            Some(sink) => sink.lock().push(line),
            None => println!("{}", line),
        }
    }

    // ==================== Host registration ====================

    /// Register a host class under `package` (empty for top level) and
    /// publish it on the global object
    pub fn register_native_class(&mut self, package: &str, name: &str, super_class: Option<ClassId>) -> ClassId {
        let ns = NsNameAndKind::new(intern(package), NamespaceKind::Package);
        let id = self.classes.alloc(ns.clone(), intern(name), super_class);
        self.global
            .lock()
            .vars
            .insert(intern(name), ns, Binding::Value(Value::Class(id)));
        id
    }

    pub fn set_native_constructor<F>(&mut self, class: ClassId, f: F)
    where
        F: Fn(&mut Runtime, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        self.classes.get_mut(class).native_construct = Some(Arc::new(f));
    }

    /// Instance method shared by every object of `class`
    pub fn add_native_method<F>(&mut self, class: ClassId, name: &str, f: F)
    where
        F: Fn(&mut Runtime, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        let function = Function::native(name, f);
        self.classes.get_mut(class).instance_traits.insert(
            intern(name),
            NsNameAndKind::public(),
            Binding::Method(function),
        );
    }

    pub fn add_native_getter<F>(&mut self, class: ClassId, name: &str, f: F)
    where
        F: Fn(&mut Runtime, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        let getter = Function::native(name, f);
        self.classes.get_mut(class).instance_traits.insert(
            intern(name),
            NsNameAndKind::public(),
            Binding::Accessor {
                getter: Some(getter),
                setter: None,
            },
        );
    }

    pub fn add_static_method<F>(&mut self, class: ClassId, name: &str, f: F)
    where
        F: Fn(&mut Runtime, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        let function = Function::native(name, f);
        self.classes.get(class).object.lock().vars.insert(
            intern(name),
            NsNameAndKind::public(),
            Binding::Method(function),
        );
    }

    pub fn add_static_constant(&mut self, class: ClassId, name: &str, value: Value) {
        let object = self.classes.get(class).object.clone();
        let mut object = object.lock();
        let index = object.allocate_slot(0, value);
        object.vars.insert(
            intern(name),
            NsNameAndKind::public(),
            Binding::Slot { index, constant: true },
        );
    }

    /// Global host function such as `trace`
    pub fn register_native_function<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut Runtime, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        let function = Function::native(name, f);
        self.define_global(name, Value::Function(function));
    }

    // ==================== Allocation ====================

    pub(crate) fn alloc(&mut self, object: ScriptObject) -> ObjectRef {
        let object = Arc::new(Mutex::new(object));
        if self.config.gc.enabled {
            self.gc.track(&object);
        }
        object
    }

    pub fn new_object(&mut self) -> Value {
        let class = self.builtins.object;
        Value::Object(self.alloc(ScriptObject::new(Some(class))))
    }

    pub fn new_array(&mut self, elements: Vec<Value>) -> Value {
        let class = self.builtins.array;
        Value::Object(self.alloc(ScriptObject::array(Some(class), elements)))
    }

    /// Script-visible object for a VM error; the error's own value when it has one
    pub fn materialize_error(&mut self, err: &VmError) -> Value {
        if let Some(thrown) = &err.thrown {
            return thrown.clone();
        }
        let class = match err.kind {
            ErrorKind::TypeError => self.builtins.type_error,
            ErrorKind::ArgumentError => self.builtins.argument_error,
            ErrorKind::ReferenceError => self.builtins.reference_error,
            ErrorKind::RangeError => self.builtins.range_error,
            _ => self.builtins.error,
        };
        let name = self.classes.get(class).name.clone();
        let mut object = ScriptObject::new(Some(class));
        object.set_public(intern("message"), Value::string(&err.message));
        object.set_public(intern("name"), Value::String(name));
        Value::Object(self.alloc(object))
    }

    // ==================== Types ====================

    /// Class of a non-null value
    pub fn class_of(&self, value: &Value) -> Option<ClassId> {
        let b = &self.builtins;
        Some(match value {
            Value::Undefined | Value::Null => return None,
            Value::Boolean(_) => b.boolean,
            Value::Integer(_) => b.int,
            Value::UInteger(_) => b.uint,
            Value::Number(_) => b.number,
            Value::String(_) => b.string,
            Value::Namespace(_) => b.namespace,
            Value::Object(o) => o.lock().class.unwrap_or(b.object),
            Value::Function(_) => b.function,
            Value::Class(_) => b.class,
        })
    }

    pub fn is_error_class(&self, class: ClassId) -> bool {
        self.classes.is_subclass(class, self.builtins.error, None)
    }

    /// The `is` test
    pub fn is_type(&self, value: &Value, class: ClassId) -> bool {
        let b = &self.builtins;
        if value.is_nullish() {
            return false;
        }
        if class == b.object {
            return true;
        }
        if class == b.number {
            return value.is_numeric();
        }
        if class == b.int {
            return match value {
                Value::Integer(_) => true,
                Value::UInteger(u) => *u <= i32::MAX as u32,
                Value::Number(n) => n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64,
                _ => false,
            };
        }
        if class == b.uint {
            return match value {
                Value::Integer(i) => *i >= 0,
                Value::UInteger(_) => true,
                Value::Number(n) => n.fract() == 0.0 && *n >= 0.0 && *n <= u32::MAX as f64,
                _ => false,
            };
        }
        match self.class_of(value) {
            Some(c) => self.classes.is_subclass(c, class, Some(b.object)),
            None => false,
        }
    }

    /// The `coerce` instruction: numeric and boolean targets convert,
    /// everything else must already be of the type
    pub fn coerce(&mut self, value: Value, class: ClassId) -> VmResult<Value> {
        let b = self.builtins;
        if class == b.int {
            return Ok(Value::Integer(value.to_int32()));
        }
        if class == b.uint {
            return Ok(Value::UInteger(value.to_uint32()));
        }
        if class == b.number {
            return Ok(Value::Number(value.to_number()));
        }
        if class == b.boolean {
            return Ok(Value::Boolean(value.to_boolean()));
        }
        if value.is_nullish() {
            return Ok(Value::Null);
        }
        if class == b.string {
            return Ok(Value::String(self.string_of(&value)));
        }
        if self.is_type(&value, class) {
            return Ok(value);
        }
        Err(type_error(format!(
            "Type Coercion failed: cannot convert {} to {}",
            self.string_of(&value),
            self.classes.get(class).qualified_name()
        )))
    }

    /// A class called as a function
    pub fn convert_to_class(&mut self, class: ClassId, value: Value) -> VmResult<Value> {
        let b = self.builtins;
        if class == b.string {
            return Ok(Value::String(self.string_of(&value)));
        }
        if class == b.object {
            return Ok(if value.is_nullish() { self.new_object() } else { value });
        }
        if class == b.array || self.is_error_class(class) {
            let args: Vec<Value> = if value.is_nullish() && class != b.array {
                Vec::new()
            } else {
                vec![value]
            };
            return self.construct(&Value::Class(class), &args);
        }
        self.coerce(value, class)
    }

    /// String conversion that knows about classes and error objects
    pub fn string_of(&self, value: &Value) -> Arc<str> {
        match value {
            Value::Class(id) => Arc::from(format!("[class {}]", self.classes.get(*id).name)),
            Value::Object(o) => {
                let (class, is_array) = {
                    let o = o.lock();
                    (o.class, o.is_array())
                };
                match class {
                    Some(c) if !is_array && self.is_error_class(c) => {
                        let o = o.lock();
                        let name = o
                            .get_public("name")
                            .map(|v| v.to_str())
                            .unwrap_or_else(|| self.classes.get(c).name.clone());
                        let message = o.get_public("message").map(|v| v.to_str());
                        match message {
                            Some(m) if !m.is_empty() => Arc::from(format!("{}: {}", name, m)),
                            _ => name,
                        }
                    }
                    Some(c) if !is_array && c != self.builtins.object => {
                        Arc::from(format!("[object {}]", self.classes.get(c).name))
                    }
                    _ => value.to_str(),
                }
            }
            other => other.to_str(),
        }
    }

    // ==================== Property access ====================

    /// Binding stored directly on `object`; methods come back bound to `this`
    fn lookup_own(&mut self, object: &ObjectRef, this: &Value, name: &ResolvedName) -> VmResult<Option<Value>> {
        let key = name.key();
        loop {
            let found = {
                let o = object.lock();
                if o.is_array() {
                    if let Some(i) = name.name.as_index() {
                        return Ok(Some(o.elements.get(i).cloned().unwrap_or_default()));
                    }
                    if &*key == "length" {
                        return Ok(Some(length_value(o.elements.len())));
                    }
                }
                o.vars.find(&key, &name.namespaces).cloned()
            };
            return match found {
                None => Ok(None),
                Some(Binding::Slot { index, .. }) => Ok(Some(
                    object.lock().slots.get(index).cloned().unwrap_or_default(),
                )),
                Some(Binding::Value(v)) => Ok(Some(v)),
                Some(Binding::Method(f)) => Ok(Some(Value::Function(f.bind(this.clone())))),
                Some(Binding::Accessor { getter: Some(g), .. }) => self.call(&g, this.clone(), &[], false).map(Some),
                Some(Binding::Accessor { getter: None, .. }) => {
                    Err(reference_error(format!("Property {} is write-only", name)))
                }
                Some(Binding::Deferred(script)) => {
                    self.run_deferred(&script)?;
                    continue;
                }
            };
        }
    }

    /// Instance trait of `class` or one of its superclasses
    fn lookup_trait(&mut self, class: ClassId, this: &Value, name: &ResolvedName) -> VmResult<Option<Value>> {
        let key = name.key();
        let binding = match self.classes.find_instance_trait(class, &key, &name.namespaces) {
            Some((_, b)) => b.clone(),
            None => return Ok(None),
        };
        match binding {
            Binding::Method(f) => Ok(Some(Value::Function(f.bind(this.clone())))),
            Binding::Accessor { getter: Some(g), .. } => self.call(&g, this.clone(), &[], false).map(Some),
            Binding::Accessor { getter: None, .. } => Err(reference_error(format!("Property {} is write-only", name))),
            Binding::Value(v) => Ok(Some(v)),
            Binding::Slot { .. } | Binding::Deferred(_) => Err(corrupt(format!(
                "Instance trait table of {} holds data member {}",
                self.classes.get(class).qualified_name(),
                name
            ))),
        }
    }

    /// Properties primitives answer without a class lookup
    fn primitive_property(&self, value: &Value, name: &ResolvedName) -> Option<Value> {
        let key = name.key();
        match (value, &*key) {
            (Value::String(s), "length") => Some(length_value(s.chars().count())),
            (Value::Function(f), "length") => Some(length_value(f.length())),
            (Value::Namespace(ns), "uri") => Some(Value::String(ns.uri.clone())),
            _ => None,
        }
    }

    pub fn get_property(&mut self, target: &Value, name: &ResolvedName) -> VmResult<Value> {
        reject_attribute(name)?;
        match target {
            Value::Undefined | Value::Null => Err(type_error(format!(
                "Cannot access property {} of {}",
                name,
                target.to_str()
            ))),
            Value::Object(o) => {
                if let Some(v) = self.lookup_own(o, target, name)? {
                    return Ok(v);
                }
                let class = o.lock().class;
                if let Some(class) = class {
                    if let Some(v) = self.lookup_trait(class, target, name)? {
                        return Ok(v);
                    }
                    let class = self.classes.get(class);
                    if class.is_sealed {
                        return Err(reference_error(format!(
                            "Property {} not found on {} and there is no default value",
                            name,
                            class.qualified_name()
                        )));
                    }
                }
                Ok(Value::Undefined)
            }
            Value::Class(id) => {
                let object = self.classes.get(*id).object.clone();
                if let Some(v) = self.lookup_own(&object, target, name)? {
                    return Ok(v);
                }
                let class = self.builtins.class;
                Ok(self.lookup_trait(class, target, name)?.unwrap_or_default())
            }
            other => {
                if let Some(v) = self.primitive_property(other, name) {
                    return Ok(v);
                }
                match self.class_of(other) {
                    Some(class) => Ok(self.lookup_trait(class, target, name)?.unwrap_or_default()),
                    None => Ok(Value::Undefined),
                }
            }
        }
    }

    pub fn set_property(&mut self, target: &Value, name: &ResolvedName, value: Value) -> VmResult<()> {
        self.write_property(target, name, value, false)
    }

    /// Like `set_property`, but may also fill constant slots
    pub fn init_property(&mut self, target: &Value, name: &ResolvedName, value: Value) -> VmResult<()> {
        self.write_property(target, name, value, true)
    }

    fn write_property(&mut self, target: &Value, name: &ResolvedName, value: Value, init: bool) -> VmResult<()> {
        reject_attribute(name)?;
        match target {
            Value::Undefined | Value::Null => Err(type_error(format!(
                "Cannot set property {} of {}",
                name,
                target.to_str()
            ))),
            Value::Object(o) => {
                let class = o.lock().class;
                self.write_object(o, target, name, value, init, class)
            }
            Value::Class(id) => {
                let object = self.classes.get(*id).object.clone();
                let class = self.builtins.class;
                self.write_object(&object, target, name, value, init, Some(class))
            }
            other => Err(reference_error(format!(
                "Cannot create property {} on {}",
                name,
                other.type_name()
            ))),
        }
    }

    fn write_object(
        &mut self,
        object: &ObjectRef,
        this: &Value,
        name: &ResolvedName,
        value: Value,
        init: bool,
        class: Option<ClassId>,
    ) -> VmResult<()> {
        let key = name.key();
        let found = loop {
            let found = {
                let mut o = object.lock();
                if o.is_array() {
                    if let Some(i) = name.name.as_index() {
                        o.elements.set(i, value);
                        return Ok(());
                    }
                    if &*key == "length" {
                        o.elements.set_len(value.to_uint32() as usize);
                        return Ok(());
                    }
                }
                o.vars.find(&key, &name.namespaces).cloned()
            };
            match found {
                Some(Binding::Deferred(script)) => self.run_deferred(&script)?,
                other => break other,
            }
        };

        match found {
            Some(Binding::Slot { index, constant }) => {
                if constant && !init {
                    return Err(reference_error(format!("Illegal write to read-only property {}", name)));
                }
                let mut o = object.lock();
                match o.slots.get_mut(index) {
                    Some(slot) => *slot = value,
                    None => return Err(corrupt(format!("Slot of {} out of range", name))),
                }
                Ok(())
            }
            Some(Binding::Value(_)) => {
                let mut o = object.lock();
                if let Some(ns) = o.vars.matching_ns(&key, &name.namespaces) {
                    o.vars.insert(key, ns, Binding::Value(value));
                }
                Ok(())
            }
            Some(Binding::Accessor { setter: Some(s), .. }) => {
                self.call(&s, this.clone(), &[value], false)?;
                Ok(())
            }
            Some(_) => Err(reference_error(format!("Illegal write to read-only property {}", name))),
            None => {
                if let Some(class) = class {
                    let inherited = self
                        .classes
                        .find_instance_trait(class, &key, &name.namespaces)
                        .map(|(_, b)| b.clone());
                    match inherited {
                        Some(Binding::Accessor { setter: Some(s), .. }) => {
                            self.call(&s, this.clone(), &[value], false)?;
                            return Ok(());
                        }
                        Some(_) => {
                            return Err(reference_error(format!(
                                "Illegal write to read-only property {}",
                                name
                            )))
                        }
                        None => {}
                    }
                    let class = self.classes.get(class);
                    if class.is_sealed {
                        return Err(reference_error(format!(
                            "Cannot create property {} on {}",
                            name,
                            class.qualified_name()
                        )));
                    }
                }
                object.lock().vars.insert(key, dynamic_ns(name), Binding::Value(value));
                Ok(())
            }
        }
    }

    pub fn has_property(&mut self, target: &Value, name: &ResolvedName) -> VmResult<bool> {
        reject_attribute(name)?;
        let key = name.key();
        let (own, class) = match target {
            Value::Object(o) => {
                let o = o.lock();
                let element = o.is_array()
                    && (&*key == "length" || name.name.as_index().is_some_and(|i| i < o.elements.len()));
                (element || o.vars.contains(&key, &name.namespaces), o.class)
            }
            Value::Class(id) => {
                let own = self.classes.get(*id).object.lock().vars.contains(&key, &name.namespaces);
                (own, Some(self.builtins.class))
            }
            Value::Undefined | Value::Null => return Ok(false),
            other => (self.primitive_property(other, name).is_some(), self.class_of(other)),
        };
        Ok(own
            || class.is_some_and(|c| {
                self.classes
                    .find_instance_trait(c, &key, &name.namespaces)
                    .is_some()
            }))
    }

    /// Remove a dynamic property; fixed traits cannot be deleted
    pub fn delete_property(&mut self, target: &Value, name: &ResolvedName) -> VmResult<bool> {
        reject_attribute(name)?;
        let Value::Object(o) = target else {
            return Ok(false);
        };
        let key = name.key();
        let mut o = o.lock();
        if o.is_array() {
            if let Some(i) = name.name.as_index() {
                o.elements.clear_at(i);
                return Ok(true);
            }
        }
        match o.vars.find(&key, &name.namespaces) {
            Some(Binding::Value(_)) => {
                o.vars.remove(&key, &name.namespaces);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(true),
        }
    }

    fn slot_holder(&self, target: &Value) -> VmResult<ObjectRef> {
        match target {
            Value::Object(o) => Ok(o.clone()),
            Value::Class(id) => Ok(self.classes.get(*id).object.clone()),
            other => Err(type_error(format!("{} has no slots", other.type_name()))),
        }
    }

    pub fn get_slot(&mut self, target: &Value, slot_id: u32) -> VmResult<Value> {
        let holder = self.slot_holder(target)?;
        let value = holder.lock().slot(slot_id).cloned();
        value.ok_or_else(|| reference_error(format!("Slot {} out of range", slot_id)))
    }

    pub fn set_slot(&mut self, target: &Value, slot_id: u32, value: Value) -> VmResult<()> {
        let holder = self.slot_holder(target)?;
        if holder.lock().set_slot(slot_id, value) {
            Ok(())
        } else {
            Err(reference_error(format!("Slot {} out of range", slot_id)))
        }
    }

    // ==================== Super access ====================

    /// First class a super lookup searches: the superclass of the level
    /// the running method was declared at
    fn super_start(&self, level: Option<ClassId>, this: &Value) -> Option<ClassId> {
        match level {
            Some(l) => self.classes.get(l).super_class,
            None => self.class_of(this).and_then(|c| self.classes.get(c).super_class),
        }
    }

    pub fn get_super(&mut self, level: Option<ClassId>, this: &Value, name: &ResolvedName) -> VmResult<Value> {
        reject_attribute(name)?;
        if let Some(start) = self.super_start(level, this) {
            if let Some(v) = self.lookup_trait(start, this, name)? {
                return Ok(v);
            }
        }
        // Data members live on the instance itself
        if let Value::Object(o) = this {
            if let Some(v) = self.lookup_own(o, this, name)? {
                return Ok(v);
            }
        }
        Err(reference_error(format!("Property {} not found on super", name)))
    }

    pub fn set_super(
        &mut self,
        level: Option<ClassId>,
        this: &Value,
        name: &ResolvedName,
        value: Value,
    ) -> VmResult<()> {
        reject_attribute(name)?;
        let key = name.key();
        let inherited = self
            .super_start(level, this)
            .and_then(|start| self.classes.find_instance_trait(start, &key, &name.namespaces))
            .map(|(_, b)| b.clone());
        match inherited {
            Some(Binding::Accessor { setter: Some(s), .. }) => {
                self.call(&s, this.clone(), &[value], false)?;
                Ok(())
            }
            Some(_) => Err(reference_error(format!("Illegal write to read-only property {}", name))),
            None => self.set_property(this, name, value),
        }
    }

    pub fn call_super(
        &mut self,
        level: Option<ClassId>,
        this: &Value,
        name: &ResolvedName,
        args: &[Value],
    ) -> VmResult<Value> {
        let callee = self.get_super(level, this, name)?;
        self.call_value(&callee, this.clone(), args)
    }

    // ==================== Calls and construction ====================

    /// Look up `name` on `target` and call it with `target` as receiver
    pub fn call_property(&mut self, target: &Value, name: &ResolvedName, args: &[Value]) -> VmResult<Value> {
        let callee = self.get_property(target, name)?;
        if !matches!(callee, Value::Function(_) | Value::Class(_)) {
            return Err(type_error(format!("Property {} is not a function", name)));
        }
        self.call_value(&callee, target.clone(), args)
    }

    pub fn construct(&mut self, ctor: &Value, args: &[Value]) -> VmResult<Value> {
        match ctor {
            Value::Class(id) => {
                let id = *id;
                let class = self.classes.get(id);
                if class.is_interface {
                    return Err(type_error(format!(
                        "Interface {} cannot be instantiated",
                        class.qualified_name()
                    )));
                }
                let object = self.alloc(ScriptObject::new(Some(id)));
                self.handle_construction(id, &object, args, true)
            }
            Value::Function(f) => {
                let this = self.new_object();
                match self.call(f, this.clone(), args, true)? {
                    result @ Value::Object(_) => Ok(result),
                    _ => Ok(this),
                }
            }
            other => Err(type_error(format!("{} is not a constructor", other.type_name()))),
        }
    }

    /// Resolve "pkg.Name" to a class, running deferred scripts if needed
    pub fn class_by_name(&mut self, qualified: &str) -> VmResult<ClassId> {
        if let Some(id) = self.classes.lookup_qualified(qualified) {
            return Ok(id);
        }
        let (package, name) = match qualified.rfind('.') {
            Some(i) => (&qualified[..i], &qualified[i + 1..]),
            None => ("", qualified),
        };
        let ns = NsNameAndKind::new(intern(package), NamespaceKind::Package);
        self.find_class(&ResolvedName::qualified(ns, intern(name)))
    }

    // ==================== Enumeration ====================

    /// Keys visited by for-in: array indices, then dynamic public names
    fn enumerable_keys(&self, value: &Value) -> Vec<Value> {
        let Value::Object(o) = value else {
            return Vec::new();
        };
        let o = o.lock();
        let mut keys: Vec<Value> = if o.is_array() {
            o.elements.indices().into_iter().map(length_value).collect()
        } else {
            Vec::new()
        };
        let mut names: Vec<Arc<str>> = o
            .vars
            .iter()
            .filter(|(_, ns, b)| ns.is_public() && matches!(b, Binding::Value(_)))
            .map(|(name, _, _)| name.clone())
            .collect();
        names.sort();
        keys.extend(names.into_iter().map(Value::String));
        keys
    }

    /// Next 1-based enumeration index after `index`, 0 when done
    pub fn next_index(&self, value: &Value, index: u32) -> u32 {
        if (index as usize) < self.enumerable_keys(value).len() {
            index + 1
        } else {
            0
        }
    }

    pub fn enumerate_name(&self, value: &Value, index: u32) -> Value {
        let keys = self.enumerable_keys(value);
        (index as usize)
            .checked_sub(1)
            .and_then(|i| keys.get(i))
            .cloned()
            .unwrap_or_default()
    }

    pub fn enumerate_value(&mut self, value: &Value, index: u32) -> VmResult<Value> {
        let key = self.enumerate_name(value, index);
        if key.is_nullish() {
            return Ok(Value::Undefined);
        }
        let mut name = ResolvedName::public("");
        name.name = local_name_of(&key);
        self.get_property(value, &name)
    }

    // ==================== Cycle collection ====================

    /// Mark from a host-held value on every collection
    pub fn add_gc_root(&mut self, value: Value) {
        self.gc_roots.push(value);
    }

    /// Forget a root added with `add_gc_root`; false when it was not registered
    pub fn remove_gc_root(&mut self, value: &Value) -> bool {
        match self.gc_roots.iter().position(|root| root.same_reference(value)) {
            Some(i) => {
                self.gc_roots.swap_remove(i);
                true
            }
            None => false,
        }
    }

    fn gc_root_set(&self) -> Vec<Value> {
        let mut roots = vec![self.global_value()];
        for class in self.classes.iter() {
            roots.push(Value::Object(class.object.clone()));
            roots.extend(class.class_scope.iter().cloned());
            if let Some(ctor) = &class.constructor {
                roots.push(Value::Function(ctor.clone()));
            }
            for binding in class.instance_traits.values() {
                match binding {
                    Binding::Method(f) => roots.push(Value::Function(f.clone())),
                    Binding::Accessor { getter, setter } => {
                        roots.extend(getter.iter().chain(setter.iter()).map(|f| Value::Function(f.clone())))
                    }
                    _ => {}
                }
            }
        }
        roots.extend(self.gc_roots.iter().cloned());
        roots
    }

    pub fn collect_garbage(&mut self) -> GcStats {
        let roots = self.gc_root_set();
        self.gc.collect(&roots);
        self.gc.stats.clone()
    }

    /// Collect when enabled and the tracked count passed the threshold
    pub(crate) fn maybe_collect(&mut self) {
        if self.config.gc.enabled && self.gc.should_collect() {
            let stats = self.collect_garbage();
            info!(
                "Cycle collection #{}: {} objects tracked, {} cleared so far",
                stats.collections, stats.tracked_count, stats.cycles_broken
            );
        }
    }
}

/// Attribute names only address XML, which has no object model here
fn reject_attribute(name: &ResolvedName) -> VmResult<()> {
    if name.attribute {
        return Err(unsupported(format!("Attribute property access @{}", name)));
    }
    Ok(())
}

fn length_value(len: usize) -> Value {
    match i32::try_from(len) {
        Ok(i) => Value::Integer(i),
        Err(_) => Value::Number(len as f64),
    }
}

/// Namespace a dynamic property is created in
fn dynamic_ns(name: &ResolvedName) -> NsNameAndKind {
    if name.namespaces.is_empty() || name.namespaces.iter().any(|ns| ns.is_public()) {
        NsNameAndKind::public()
    } else {
        name.first_namespace()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> Runtime {
        Runtime::new(VmConfig::default())
    }

    #[test]
    fn test_dynamic_object_properties() {
        let mut rt = runtime();
        let obj = rt.new_object();
        let x = ResolvedName::public("x");
        assert!(matches!(rt.get_property(&obj, &x).unwrap(), Value::Undefined));
        assert!(!rt.has_property(&obj, &x).unwrap());

        rt.set_property(&obj, &x, Value::Integer(5)).unwrap();
        assert!(rt.has_property(&obj, &x).unwrap());
        assert_eq!(rt.get_property(&obj, &x).unwrap().to_int32(), 5);

        assert!(rt.delete_property(&obj, &x).unwrap());
        assert!(!rt.has_property(&obj, &x).unwrap());
    }

    #[test]
    fn test_null_receiver_is_type_error() {
        let mut rt = runtime();
        let err = rt.get_property(&Value::Null, &ResolvedName::public("x")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
        let err = rt
            .set_property(&Value::Undefined, &ResolvedName::public("x"), Value::Null)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn test_sealed_class_missing_property() {
        let mut rt = runtime();
        let object = rt.builtins.object;
        let sealed = rt.register_native_class("test", "Sealed", Some(object));
        rt.classes.get_mut(sealed).is_sealed = true;
        let obj = rt.construct(&Value::Class(sealed), &[]).unwrap();
        let name = ResolvedName::public("nope");
        assert_eq!(rt.get_property(&obj, &name).unwrap_err().kind, ErrorKind::ReferenceError);
        assert_eq!(
            rt.set_property(&obj, &name, Value::Integer(1)).unwrap_err().kind,
            ErrorKind::ReferenceError
        );
    }

    #[test]
    fn test_array_index_and_length() {
        let mut rt = runtime();
        let arr = rt.new_array(vec![Value::Integer(1), Value::Integer(2)]);
        let length = ResolvedName::public("length");
        assert_eq!(rt.get_property(&arr, &length).unwrap().to_int32(), 2);

        rt.set_property(&arr, &ResolvedName::public("4"), Value::Integer(9)).unwrap();
        assert_eq!(rt.get_property(&arr, &length).unwrap().to_int32(), 5);
        assert!(matches!(rt.get_property(&arr, &ResolvedName::public("3")).unwrap(), Value::Undefined));

        rt.set_property(&arr, &length, Value::Integer(1)).unwrap();
        assert_eq!(&*rt.string_of(&arr), "1");
    }

    #[test]
    fn test_far_array_writes_stay_sparse() {
        let mut rt = runtime();
        let arr = rt.new_array(vec![Value::Integer(1)]);
        let mut far = ResolvedName::public("");
        far.name = crate::vm::multiname::LocalName::Number(4_000_000_000.0);
        rt.set_property(&arr, &far, Value::Integer(7)).unwrap();
        assert_eq!(rt.get_property(&arr, &far).unwrap().to_int32(), 7);
        {
            let o = arr.as_object().unwrap().lock();
            assert_eq!(o.elements.len(), 4_000_000_001);
            assert_eq!(o.elements.stored().count(), 2);
        }

        let length = ResolvedName::public("length");
        rt.set_property(&arr, &length, Value::UInteger(u32::MAX)).unwrap();
        assert_eq!(rt.get_property(&arr, &length).unwrap().to_uint32(), u32::MAX);
        assert_eq!(arr.as_object().unwrap().lock().elements.stored().count(), 2);
    }

    #[test]
    fn test_collection_keeps_host_held_objects() {
        let mut config = VmConfig::default();
        config.gc.enabled = true;
        let mut rt = Runtime::new(config);
        let object = rt.builtins.object;
        let held = rt.construct(&Value::Class(object), &[]).unwrap();
        let kept = ResolvedName::public("kept");
        rt.set_property(&held, &kept, Value::Integer(5)).unwrap();

        let stats = rt.collect_garbage();
        assert_eq!(stats.cycles_broken, 0);
        assert_eq!(rt.get_property(&held, &kept).unwrap().to_int32(), 5);
    }

    #[test]
    fn test_gc_roots_can_be_removed() {
        let mut rt = runtime();
        let root = rt.new_object();
        rt.add_gc_root(root.clone());
        assert!(rt.remove_gc_root(&root));
        assert!(!rt.remove_gc_root(&root));
        assert!(rt.gc_roots.is_empty());
    }

    #[test]
    fn test_numeric_keys_are_not_interned() {
        let mut name = ResolvedName::public("");
        name.name = crate::vm::multiname::LocalName::Integer(918_273);
        let first = name.key();
        let second = name.key();
        assert_eq!(&*first, "918273");
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_type_tests() {
        let rt = runtime();
        let b = rt.builtins;
        assert!(rt.is_type(&Value::Integer(3), b.number));
        assert!(rt.is_type(&Value::Number(3.0), b.int));
        assert!(!rt.is_type(&Value::Number(3.5), b.int));
        assert!(!rt.is_type(&Value::Integer(-1), b.uint));
        assert!(rt.is_type(&Value::string("s"), b.object));
        assert!(!rt.is_type(&Value::Null, b.object));
        assert!(!rt.is_type(&Value::string("s"), b.number));
    }

    #[test]
    fn test_coercion() {
        let mut rt = runtime();
        let b = rt.builtins;
        assert!(matches!(rt.coerce(Value::Number(7.9), b.int).unwrap(), Value::Integer(7)));
        assert!(matches!(rt.coerce(Value::Undefined, b.string).unwrap(), Value::Null));
        assert!(matches!(rt.coerce(Value::Null, b.array).unwrap(), Value::Null));
        let err = rt.coerce(Value::Integer(1), b.array).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn test_materialized_error_object() {
        let mut rt = runtime();
        let v = rt.materialize_error(&type_error("bad cast"));
        assert!(rt.is_type(&v, rt.builtins.type_error));
        assert!(rt.is_type(&v, rt.builtins.error));
        assert_eq!(&*rt.string_of(&v), "TypeError: bad cast");
    }

    #[test]
    fn test_for_in_order() {
        let mut rt = runtime();
        let obj = rt.new_object();
        rt.set_property(&obj, &ResolvedName::public("b"), Value::Integer(2)).unwrap();
        rt.set_property(&obj, &ResolvedName::public("a"), Value::Integer(1)).unwrap();

        let mut index = 0;
        let mut seen = Vec::new();
        loop {
            index = rt.next_index(&obj, index);
            if index == 0 {
                break;
            }
            let name = rt.enumerate_name(&obj, index).to_str().to_string();
            let value = rt.enumerate_value(&obj, index).unwrap().to_int32();
            seen.push((name, value));
        }
        assert_eq!(seen, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn test_accessor_and_method_binding() {
        let mut rt = runtime();
        let object = rt.builtins.object;
        let class = rt.register_native_class("", "Point", Some(object));
        rt.add_native_getter(class, "twice", |rt, this, _| {
            let x = rt.get_property(this, &ResolvedName::public("x"))?;
            Ok(Value::Integer(x.to_int32() * 2))
        });
        rt.add_native_method(class, "self", |_rt, this, _| Ok(this.clone()));

        let p = rt.construct(&Value::Class(class), &[]).unwrap();
        rt.set_property(&p, &ResolvedName::public("x"), Value::Integer(4)).unwrap();
        assert_eq!(rt.get_property(&p, &ResolvedName::public("twice")).unwrap().to_int32(), 8);

        let method = rt.get_property(&p, &ResolvedName::public("self")).unwrap();
        let result = rt.call_value(&method, Value::Null, &[]).unwrap();
        assert!(result.same_reference(&p));
        let err = rt
            .set_property(&p, &ResolvedName::public("twice"), Value::Integer(1))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReferenceError);
    }

    #[test]
    fn test_class_by_qualified_name() {
        let mut rt = runtime();
        let object = rt.builtins.object;
        let id = rt.register_native_class("flash.events", "Event", Some(object));
        assert_eq!(rt.class_by_name("flash.events.Event").unwrap(), id);
        assert_eq!(rt.class_by_name("Array").unwrap(), rt.builtins.array);
        assert_eq!(
            rt.class_by_name("flash.events.Missing").unwrap_err().kind,
            ErrorKind::ReferenceError
        );
    }
}
