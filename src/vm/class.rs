// Linked classes
// Classes live in an arena and reference each other by ClassId

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::context::AbcContext;
use super::function::NativeFn;
use super::multiname::{NsNameAndKind, ResolvedName};
use super::object::{Binding, ScriptObject, VariableMap};
use super::value::{FunctionRef, ObjectRef, Value};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// Where a script class came from
#[derive(Clone, Debug)]
pub struct ClassDefinition {
    pub context: Arc<AbcContext>,
    /// Index into the instance/class tables
    pub index: u32,
}

pub struct Class {
    pub id: ClassId,
    pub ns: NsNameAndKind,
    pub name: Arc<str>,
    pub super_class: Option<ClassId>,
    pub interfaces: Vec<ClassId>,
    pub protected_ns: Option<NsNameAndKind>,
    pub is_interface: bool,
    pub is_sealed: bool,
    /// Static traits
    pub object: ObjectRef,
    /// Methods, getters and setters shared by every instance
    pub instance_traits: VariableMap,
    pub constructor: Option<FunctionRef>,
    /// Host constructor; a non-undefined result replaces the new object
    pub native_construct: Option<NativeFn>,
    pub definition: Option<ClassDefinition>,
    /// Scope captured by `newclass`, the class itself on top
    pub class_scope: Arc<[Value]>,
}

impl Class {
    pub fn qualified_name(&self) -> String {
        if self.ns.uri.is_empty() {
            self.name.to_string()
        } else {
            format!("{}.{}", self.ns.uri, self.name)
        }
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("name", &self.qualified_name())
            .field("super_class", &self.super_class)
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

#[derive(Default)]
pub struct ClassArena {
    classes: Vec<Class>,
    by_name: FxHashMap<(NsNameAndKind, Arc<str>), ClassId>,
}

impl ClassArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Allocate a class with empty trait tables
    pub fn alloc(&mut self, ns: NsNameAndKind, name: Arc<str>, super_class: Option<ClassId>) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.by_name.insert((ns.clone(), name.clone()), id);
        self.classes.push(Class {
            id,
            ns,
            name,
            super_class,
            interfaces: Vec::new(),
            protected_ns: None,
            is_interface: false,
            is_sealed: false,
            object: Arc::new(Mutex::new(ScriptObject::new(None))),
            instance_traits: VariableMap::new(),
            constructor: None,
            native_construct: None,
            definition: None,
            class_scope: Arc::from(Vec::new()),
        });
        id
    }

    pub fn get(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Class> {
        self.classes.iter()
    }

    /// Classes registered under `name` in any namespace of the set
    pub fn lookup(&self, name: &ResolvedName) -> Option<ClassId> {
        let key = name.key();
        if name.namespaces.is_empty() {
            return self
                .classes
                .iter()
                .find(|c| c.name == key)
                .map(|c| c.id);
        }
        name.namespaces
            .iter()
            .find_map(|ns| self.by_name.get(&(ns.clone(), key.clone())).copied())
    }

    /// Look up "pkg.Name" or "Name"
    pub fn lookup_qualified(&self, qualified: &str) -> Option<ClassId> {
        self.classes
            .iter()
            .find(|c| c.qualified_name() == qualified)
            .map(|c| c.id)
    }

    /// The class followed by its superclasses, most derived first
    pub fn chain(&self, id: ClassId) -> Vec<ClassId> {
        let mut out = vec![id];
        let mut cur = self.get(id).super_class;
        while let Some(c) = cur {
            out.push(c);
            cur = self.get(c).super_class;
        }
        out
    }

    /// Instance trait lookup through the super chain
    pub fn find_instance_trait(
        &self,
        id: ClassId,
        name: &str,
        namespaces: &[NsNameAndKind],
    ) -> Option<(ClassId, &Binding)> {
        let mut cur = Some(id);
        while let Some(c) = cur {
            let class = self.get(c);
            if let Some(binding) = class.instance_traits.find(name, namespaces) {
                return Some((c, binding));
            }
            cur = class.super_class;
        }
        None
    }

    /// Whether `a` is `b`, derives from it or implements it
    pub fn is_subclass(&self, a: ClassId, b: ClassId, object_class: Option<ClassId>) -> bool {
        if a == b || Some(b) == object_class {
            return true;
        }
        let class = self.get(a);
        if class
            .interfaces
            .iter()
            .any(|i| self.is_subclass(*i, b, object_class))
        {
            return true;
        }
        match class.super_class {
            Some(s) => self.is_subclass(s, b, object_class),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::interner::intern;

    #[test]
    fn test_chain_and_subclass() {
        let mut arena = ClassArena::new();
        let public = NsNameAndKind::public();
        let object = arena.alloc(public.clone(), intern("Object"), None);
        let a = arena.alloc(public.clone(), intern("A"), Some(object));
        let b = arena.alloc(public.clone(), intern("B"), Some(a));
        let iface = arena.alloc(public.clone(), intern("IThing"), None);
        arena.get_mut(a).interfaces.push(iface);

        assert_eq!(arena.chain(b), vec![b, a, object]);
        assert!(arena.is_subclass(b, a, Some(object)));
        assert!(arena.is_subclass(b, iface, Some(object)));
        assert!(arena.is_subclass(iface, object, Some(object)));
        assert!(!arena.is_subclass(a, b, Some(object)));
    }

    #[test]
    fn test_lookup_by_name() {
        let mut arena = ClassArena::new();
        let pkg = NsNameAndKind::new(intern("flash.display"), crate::abc::NamespaceKind::Package);
        let id = arena.alloc(pkg.clone(), intern("Sprite"), None);
        let name = ResolvedName::qualified(pkg, intern("Sprite"));
        assert_eq!(arena.lookup(&name), Some(id));
        assert_eq!(arena.lookup(&ResolvedName::public("Sprite")), None);
        assert_eq!(arena.lookup_qualified("flash.display.Sprite"), Some(id));
    }
}
