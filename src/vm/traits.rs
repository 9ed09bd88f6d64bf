// Trait building and class linking
// Turns ABC trait records into bindings on objects and class tables

use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use super::class::{ClassDefinition, ClassId};
use super::context::AbcContext;
use super::function::{Closure, Function, MethodHandle};
use super::interner::intern;
use super::multiname::{NsNameAndKind, ResolvedName, RuntimeOperands};
use super::object::{Binding, ScriptObject, VariableMap};
use super::runtime::Runtime;
use super::value::{FunctionRef, ObjectRef, Value};
use crate::abc::{TraitData, TraitInfo, TraitKind};
use crate::error::{corrupt, reference_error, type_error, unsupported, ErrorKind, VmError, VmResult};

/// A script whose traits were declared before its initializer ran
#[derive(Debug)]
pub struct DeferredScript {
    pub context: Arc<AbcContext>,
    pub index: u32,
}

/// Where a trait lands
#[derive(Clone)]
pub enum TraitTarget {
    /// Directly on an object; `owner` is the class whose level methods get
    Object {
        object: ObjectRef,
        owner: Option<ClassId>,
    },
    /// The instance trait table of a class
    Instance(ClassId),
}

impl TraitTarget {
    fn level(&self) -> Option<ClassId> {
        match self {
            TraitTarget::Object { owner, .. } => *owner,
            TraitTarget::Instance(id) => Some(*id),
        }
    }
}

/// Store a method or accessor half, merging getter and setter under one name
/// Whether `binding` is a member of the same kind as a `kind` trait
fn same_member_kind(kind: TraitKind, binding: &Binding) -> bool {
    match (kind, binding) {
        (TraitKind::Method, Binding::Method(_)) => true,
        (TraitKind::Getter, Binding::Accessor { getter, .. }) => getter.is_some(),
        (TraitKind::Setter, Binding::Accessor { setter, .. }) => setter.is_some(),
        _ => false,
    }
}

fn install(vars: &mut VariableMap, name: Arc<str>, ns: NsNameAndKind, kind: TraitKind, f: FunctionRef) {
    let binding = match (kind, vars.find_exact(&name, &ns)) {
        (TraitKind::Getter, Some(Binding::Accessor { setter, .. })) => Binding::Accessor {
            getter: Some(f),
            setter: setter.clone(),
        },
        (TraitKind::Setter, Some(Binding::Accessor { getter, .. })) => Binding::Accessor {
            getter: getter.clone(),
            setter: Some(f),
        },
        (TraitKind::Getter, _) => Binding::Accessor {
            getter: Some(f),
            setter: None,
        },
        (TraitKind::Setter, _) => Binding::Accessor {
            getter: None,
            setter: Some(f),
        },
        _ => Binding::Method(f),
    };
    vars.insert(name, ns, binding);
}

impl Runtime {
    /// Default value of an untyped slot declared with `type_name`
    fn slot_default(&self, context: &AbcContext, type_name: u32) -> VmResult<Value> {
        if type_name == 0 {
            return Ok(Value::Undefined);
        }
        let name = context.resolve(type_name, RuntimeOperands::None)?;
        if name.namespaces.len() != 1 || !name.namespaces[0].is_public() {
            return Ok(Value::Undefined);
        }
        Ok(match &*name.key() {
            "int" => Value::Integer(0),
            "uint" => Value::UInteger(0),
            "Number" => Value::Number(f64::NAN),
            _ => Value::Undefined,
        })
    }

    /// Whether `object` or its class chain already carries `name`
    fn carries(&self, object: &ObjectRef, name: &ResolvedName) -> bool {
        let key = name.key();
        let obj = object.lock();
        if obj.vars.contains(&key, &name.namespaces) {
            return true;
        }
        match obj.class {
            Some(class) => self
                .classes
                .find_instance_trait(class, &key, &name.namespaces)
                .is_some(),
            None => false,
        }
    }

    pub fn build_trait(
        &mut self,
        context: &Arc<AbcContext>,
        target: &TraitTarget,
        t: &TraitInfo,
        deferred: Option<&Arc<DeferredScript>>,
        scope: &Arc<[Value]>,
    ) -> VmResult<()> {
        let name = context.resolve(t.name, RuntimeOperands::None)?;
        let key = name.key();
        let ns = name.first_namespace();
        trace!("Building {:?} trait {}", t.kind, name);

        if let (Some(script), TraitTarget::Object { object, .. }) = (deferred, target) {
            if !self.carries(object, &name) {
                object
                    .lock()
                    .vars
                    .insert(key, ns, Binding::Deferred(script.clone()));
            }
            return Ok(());
        }

        match (&t.data, target) {
            (TraitData::Method { method, .. }, _) => {
                let handle = MethodHandle::new(context.clone(), *method);
                let f = Function::synthetic(
                    key.clone(),
                    handle,
                    Closure {
                        this: None,
                        scope: scope.clone(),
                        level: target.level(),
                    },
                );
                match target {
                    TraitTarget::Object { object, .. } => {
                        install(&mut object.lock().vars, key, ns, t.kind, f);
                    }
                    TraitTarget::Instance(id) => {
                        let id = *id;
                        install(
                            &mut self.classes.get_mut(id).instance_traits,
                            key.clone(),
                            ns.clone(),
                            t.kind,
                            f.clone(),
                        );
                        if t.is_override() {
                            self.rebind_protected_override(id, &key, &ns, t.kind, f);
                        }
                    }
                }
                Ok(())
            }
            (_, TraitTarget::Instance(_)) => Err(corrupt(format!(
                "{:?} trait {} cannot live in an instance trait table",
                t.kind, name
            ))),
            (data, TraitTarget::Object { object, .. }) => {
                if self.carries(object, &name) {
                    return Ok(());
                }
                let constant = t.kind == TraitKind::Const;
                let value = match data {
                    TraitData::Slot {
                        type_name, value, ..
                    } => match value {
                        Some(v) => context.constant(v.kind, v.index),
                        None => self.slot_default(context, *type_name)?,
                    },
                    TraitData::Function { function, .. } => Value::Function(Function::synthetic(
                        key.clone(),
                        MethodHandle::new(context.clone(), *function),
                        Closure {
                            this: None,
                            scope: scope.clone(),
                            level: None,
                        },
                    )),
                    _ => Value::Undefined,
                };
                let mut obj = object.lock();
                let index = obj.allocate_slot(t.slot_id(), value);
                obj.vars.insert(key, ns, Binding::Slot { index, constant });
                Ok(())
            }
        }
    }

    /// An override declared in the class's own protected namespace also
    /// replaces same-named members of the same kind in each ancestor's
    /// protected namespace
    fn rebind_protected_override(
        &mut self,
        id: ClassId,
        key: &Arc<str>,
        ns: &NsNameAndKind,
        kind: TraitKind,
        f: FunctionRef,
    ) {
        let class = self.classes.get(id);
        if class.protected_ns.as_ref() != Some(ns) {
            return;
        }
        let mut rebinds = Vec::new();
        let mut cur = class.super_class;
        while let Some(c) = cur {
            let ancestor = self.classes.get(c);
            if let Some(pns) = &ancestor.protected_ns {
                let matches = ancestor
                    .instance_traits
                    .find_exact(key, pns)
                    .is_some_and(|b| same_member_kind(kind, b));
                if matches && !rebinds.contains(pns) {
                    rebinds.push(pns.clone());
                }
            }
            cur = ancestor.super_class;
        }
        let traits = &mut self.classes.get_mut(id).instance_traits;
        for pns in rebinds {
            debug!("Rebinding protected override {} under {}", key, pns);
            install(traits, key.clone(), pns, kind, f.clone());
        }
    }

    /// Bind one interface member to the class's public implementation
    pub fn link_trait(&mut self, class: ClassId, context: &AbcContext, t: &TraitInfo) -> VmResult<()> {
        let method = match (&t.kind, &t.data) {
            (TraitKind::Method | TraitKind::Getter | TraitKind::Setter, TraitData::Method { method, .. }) => *method,
            _ => return Err(unsupported(format!("Interface trait of kind {:?}", t.kind))),
        };
        if context.body(method).is_some() {
            return Err(corrupt(format!("Interface method {} has a body", method)));
        }
        let name = context.resolve(t.name, RuntimeOperands::None)?;
        let key = name.key();
        let public = NsNameAndKind::public();

        let found = self
            .classes
            .find_instance_trait(class, &key, std::slice::from_ref(&public))
            .map(|(_, b)| b.clone());
        let f = match (t.kind, found) {
            (TraitKind::Method, Some(Binding::Method(f))) => f,
            (TraitKind::Getter, Some(Binding::Accessor { getter: Some(g), .. })) => g,
            (TraitKind::Setter, Some(Binding::Accessor { setter: Some(s), .. })) => s,
            _ => {
                return Err(VmError::new(
                    ErrorKind::NotLinkable,
                    format!(
                        "{} does not implement {:?} {}",
                        self.classes.get(class).qualified_name(),
                        t.kind,
                        name
                    ),
                ))
            }
        };
        install(
            &mut self.classes.get_mut(class).instance_traits,
            key,
            name.first_namespace(),
            t.kind,
            f,
        );
        Ok(())
    }

    /// Interfaces of `id` and, transitively, the interfaces they extend
    fn all_interfaces(&self, id: ClassId) -> Vec<ClassId> {
        let mut out = Vec::new();
        let mut work = self.classes.get(id).interfaces.clone();
        while let Some(i) = work.pop() {
            if !out.contains(&i) {
                out.push(i);
                work.extend(self.classes.get(i).interfaces.iter().copied());
            }
        }
        out
    }

    /// Link interface members into the class and each of its bases, bases first
    fn link_interfaces(&mut self, id: ClassId) -> VmResult<()> {
        for class in self.classes.chain(id).into_iter().rev() {
            for iface in self.all_interfaces(class) {
                let Some(def) = self.classes.get(iface).definition.clone() else {
                    continue;
                };
                let Some(instance) = def.context.file.instances.get(def.index as usize) else {
                    continue;
                };
                for t in &instance.traits {
                    match self.link_trait(class, &def.context, t) {
                        Ok(()) => {}
                        Err(e) if e.kind == ErrorKind::NotLinkable => warn!("{}", e.message),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(())
    }

    /// Find a class by name, running a deferred script that declares it
    pub fn find_class(&mut self, name: &ResolvedName) -> VmResult<ClassId> {
        if let Some(id) = self.classes.lookup(name) {
            return Ok(id);
        }
        let global = Value::Object(self.global.clone());
        if let Value::Class(id) = self.get_property(&global, name)? {
            return Ok(id);
        }
        self.classes
            .lookup(name)
            .ok_or_else(|| reference_error(format!("Class {} is not defined", name)))
    }

    /// Create and initialize the class described by instance/class record `index`
    pub fn new_class(
        &mut self,
        context: &Arc<AbcContext>,
        index: u32,
        base: Option<ClassId>,
        mut scope: Vec<Value>,
    ) -> VmResult<ClassId> {
        let instance = context
            .file
            .instances
            .get(index as usize)
            .ok_or_else(|| corrupt(format!("Class index {} out of range", index)))?;
        let class_info = &context.file.classes[index as usize];
        let name = context.resolve(instance.name, RuntimeOperands::None)?;
        if let Some(b) = base {
            if self.classes.get(b).is_interface {
                return Err(type_error(format!(
                    "{} cannot extend interface {}",
                    name,
                    self.classes.get(b).qualified_name()
                )));
            }
        }

        let id = self.classes.alloc(name.first_namespace(), name.key(), base);
        scope.push(Value::Class(id));
        let class_scope: Arc<[Value]> = Arc::from(scope);
        {
            let class = self.classes.get_mut(id);
            class.is_interface = instance.is_interface();
            class.is_sealed = instance.is_sealed();
            class.definition = Some(ClassDefinition {
                context: context.clone(),
                index,
            });
            if instance.uses_protected_ns() {
                class.protected_ns = Some(context.namespace(instance.protected_ns));
            }
            class.class_scope = class_scope.clone();
        }
        debug!("Linking class {} ({:?})", name, id);

        let statics = TraitTarget::Object {
            object: self.classes.get(id).object.clone(),
            owner: Some(id),
        };
        for t in &class_info.traits {
            self.build_trait(context, &statics, t, None, &class_scope)?;
        }
        let methods = TraitTarget::Instance(id);
        for t in &instance.traits {
            if matches!(t.kind, TraitKind::Method | TraitKind::Getter | TraitKind::Setter) {
                self.build_trait(context, &methods, t, None, &class_scope)?;
            }
        }

        if context.body(instance.init).is_some() {
            let ctor = Function::synthetic(
                name.key(),
                MethodHandle::new(context.clone(), instance.init),
                Closure {
                    this: None,
                    scope: class_scope.clone(),
                    level: Some(id),
                },
            );
            self.classes.get_mut(id).constructor = Some(ctor);
        }
        self.classes.get_mut(id).instance_traits.insert(
            intern("constructor"),
            NsNameAndKind::public(),
            Binding::Value(Value::Class(id)),
        );

        let mut interfaces = Vec::with_capacity(instance.interfaces.len());
        for iname in &instance.interfaces {
            let iname = context.resolve(*iname, RuntimeOperands::None)?;
            interfaces.push(self.find_class(&iname)?);
        }
        self.classes.get_mut(id).interfaces = interfaces;
        if !instance.is_interface() {
            self.link_interfaces(id)?;
        }

        if context.body(class_info.init).is_some() {
            let cinit = Function::synthetic(
                intern("cinit"),
                MethodHandle::new(context.clone(), class_info.init),
                Closure {
                    this: None,
                    scope: class_scope,
                    level: Some(id),
                },
            );
            self.call(&cinit, Value::Class(id), &[], false)?;
        }
        Ok(id)
    }

    /// Run the constructor chain of `id` on `this`: the first script or native
    /// constructor found walking up from `id`
    pub fn run_constructor(&mut self, id: ClassId, this: &Value, args: &[Value]) -> VmResult<Value> {
        let mut cur = Some(id);
        while let Some(c) = cur {
            let (ctor, native, super_class) = {
                let class = self.classes.get(c);
                (
                    class.constructor.clone(),
                    class.native_construct.clone(),
                    class.super_class,
                )
            };
            if let Some(ctor) = ctor {
                self.call(&ctor, this.clone(), args, true)?;
                return Ok(Value::Undefined);
            }
            if let Some(native) = native {
                return native(self, this, args);
            }
            cur = super_class;
        }
        Ok(Value::Undefined)
    }

    /// Build the data traits of every class in the chain, root first, then construct
    pub fn handle_construction(
        &mut self,
        id: ClassId,
        object: &ObjectRef,
        args: &[Value],
        build: bool,
    ) -> VmResult<Value> {
        if build {
            for class in self.classes.chain(id).into_iter().rev() {
                let Some(def) = self.classes.get(class).definition.clone() else {
                    continue;
                };
                let scope = self.classes.get(class).class_scope.clone();
                let target = TraitTarget::Object {
                    object: object.clone(),
                    owner: Some(class),
                };
                let Some(instance) = def.context.file.instances.get(def.index as usize) else {
                    continue;
                };
                for t in &instance.traits {
                    if !matches!(t.kind, TraitKind::Method | TraitKind::Getter | TraitKind::Setter) {
                        self.build_trait(&def.context, &target, t, None, &scope)?;
                    }
                }
            }
        }
        let this = Value::Object(object.clone());
        match self.run_constructor(id, &this, args)? {
            Value::Undefined => Ok(this),
            replaced => Ok(replaced),
        }
    }

    /// Declare every script on the global object and run the entry point
    pub fn exec(&mut self, context: Arc<AbcContext>) -> VmResult<()> {
        self.contexts.push(context.clone());
        let count = context.file.scripts.len() as u32;
        if count == 0 {
            return Ok(());
        }
        let target = TraitTarget::Object {
            object: self.global.clone(),
            owner: None,
        };
        let scope: Arc<[Value]> = Arc::from(Vec::new());
        let deferred_count = if context.lazy { count } else { count - 1 };
        for index in 0..deferred_count {
            let script = Arc::new(DeferredScript {
                context: context.clone(),
                index,
            });
            for t in &context.file.scripts[index as usize].traits {
                self.build_trait(&context, &target, t, Some(&script), &scope)?;
            }
        }
        if deferred_count < count {
            self.run_script(&context, count - 1)?;
        }
        Ok(())
    }

    fn run_script(&mut self, context: &Arc<AbcContext>, index: u32) -> VmResult<()> {
        let script = &context.file.scripts[index as usize];
        let global = Value::Object(self.global.clone());
        let scope: Arc<[Value]> = Arc::from(vec![global.clone()]);
        let target = TraitTarget::Object {
            object: self.global.clone(),
            owner: None,
        };
        for t in &script.traits {
            self.build_trait(context, &target, t, None, &scope)?;
        }
        debug!("Running script {} of {}", index, context.name);
        let init = Function::synthetic(
            intern("script"),
            MethodHandle::new(context.clone(), script.init),
            Closure::default(),
        );
        self.call(&init, global, &[], false)?;
        Ok(())
    }

    /// Run a deferred script the first time one of its names is touched
    pub fn run_deferred(&mut self, script: &Arc<DeferredScript>) -> VmResult<()> {
        self.global.lock().vars.remove_deferred(script);
        self.run_script(&script.context, script.index)
    }

    /// Plain object with `traits` as slots, used by activations and catch scopes
    pub fn new_trait_object(
        &mut self,
        context: &Arc<AbcContext>,
        traits: &[TraitInfo],
        scope: &Arc<[Value]>,
    ) -> VmResult<ObjectRef> {
        let object = Arc::new(Mutex::new(ScriptObject::new(None)));
        let target = TraitTarget::Object {
            object: object.clone(),
            owner: None,
        };
        for t in traits {
            self.build_trait(context, &target, t, None, scope)?;
        }
        Ok(object)
    }
}
