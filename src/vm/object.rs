// Script objects and their variable tables

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::class::ClassId;
use super::multiname::NsNameAndKind;
use super::traits::DeferredScript;
use super::value::{FunctionRef, Value};

/// What a (name, namespace) pair is bound to
#[derive(Clone, Debug)]
pub enum Binding {
    /// Index into the owning object's slot vector
    Slot { index: usize, constant: bool },
    /// Dynamic property created by assignment
    Value(Value),
    Method(FunctionRef),
    Accessor {
        getter: Option<FunctionRef>,
        setter: Option<FunctionRef>,
    },
    /// Declared by a script whose initializer has not run yet
    Deferred(Arc<DeferredScript>),
}

type Bucket = SmallVec<[(NsNameAndKind, Binding); 1]>;

/// Variables keyed by local name, each bucket holding one entry per namespace
#[derive(Clone, Debug, Default)]
pub struct VariableMap {
    map: FxHashMap<Arc<str>, Bucket>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// First entry whose namespace is in `namespaces`; an empty set matches any
    pub fn find(&self, name: &str, namespaces: &[NsNameAndKind]) -> Option<&Binding> {
        let bucket = self.map.get(name)?;
        if namespaces.is_empty() {
            return bucket.first().map(|(_, b)| b);
        }
        namespaces
            .iter()
            .find_map(|ns| bucket.iter().find(|(n, _)| n == ns).map(|(_, b)| b))
    }

    pub fn find_exact(&self, name: &str, ns: &NsNameAndKind) -> Option<&Binding> {
        self.find(name, std::slice::from_ref(ns))
    }

    pub fn find_exact_mut(&mut self, name: &str, ns: &NsNameAndKind) -> Option<&mut Binding> {
        self.map
            .get_mut(name)?
            .iter_mut()
            .find(|(n, _)| n == ns)
            .map(|(_, b)| b)
    }

    /// The namespace under which a match for `find` lives
    pub fn matching_ns(&self, name: &str, namespaces: &[NsNameAndKind]) -> Option<NsNameAndKind> {
        let bucket = self.map.get(name)?;
        if namespaces.is_empty() {
            return bucket.first().map(|(n, _)| n.clone());
        }
        namespaces
            .iter()
            .find(|ns| bucket.iter().any(|(n, _)| n == *ns))
            .cloned()
    }

    pub fn contains(&self, name: &str, namespaces: &[NsNameAndKind]) -> bool {
        self.find(name, namespaces).is_some()
    }

    /// Insert or replace
    pub fn insert(&mut self, name: Arc<str>, ns: NsNameAndKind, binding: Binding) {
        let bucket = self.map.entry(name).or_default();
        match bucket.iter_mut().find(|(n, _)| *n == ns) {
            Some(entry) => entry.1 = binding,
            None => bucket.push((ns, binding)),
        }
    }

    pub fn remove(&mut self, name: &str, namespaces: &[NsNameAndKind]) -> Option<Binding> {
        let ns = self.matching_ns(name, namespaces)?;
        let bucket = self.map.get_mut(name)?;
        let pos = bucket.iter().position(|(n, _)| *n == ns)?;
        let (_, binding) = bucket.remove(pos);
        if bucket.is_empty() {
            self.map.remove(name);
        }
        Some(binding)
    }

    /// Drop every placeholder left by `script`
    pub fn remove_deferred(&mut self, script: &Arc<DeferredScript>) {
        for bucket in self.map.values_mut() {
            bucket.retain(|(_, b)| !matches!(b, Binding::Deferred(d) if Arc::ptr_eq(d, script)));
        }
        self.map.retain(|_, bucket| !bucket.is_empty());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &NsNameAndKind, &Binding)> {
        self.map
            .iter()
            .flat_map(|(name, bucket)| bucket.iter().map(move |(ns, b)| (name, ns, b)))
    }

    pub fn values(&self) -> impl Iterator<Item = &Binding> {
        self.map.values().flat_map(|bucket| bucket.iter().map(|(_, b)| b))
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// Indices further than this past the dense part go to the sparse map
const DENSE_GAP: usize = 1024;

/// Highest valid array length
pub const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

/// Array elements: a dense prefix plus a sparse map for far indices, so a
/// single store or `length` write never allocates in proportion to the index
#[derive(Debug, Default, Clone)]
pub struct ArrayElements {
    dense: Vec<Value>,
    sparse: FxHashMap<usize, Value>,
    length: usize,
}

impl ArrayElements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        match self.dense.get(index) {
            Some(v) => Some(v),
            None => self.sparse.get(&index),
        }
    }

    /// Element at `index`, undefined for holes and indices past the end
    pub fn value_at(&self, index: usize) -> Value {
        self.get(index).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, index: usize, value: Value) {
        if index < self.dense.len() {
            self.dense[index] = value;
        } else if index <= self.dense.len() + DENSE_GAP {
            let start = self.dense.len();
            self.dense.resize(index + 1, Value::Undefined);
            if !self.sparse.is_empty() {
                for i in start..index {
                    if let Some(v) = self.sparse.remove(&i) {
                        self.dense[i] = v;
                    }
                }
                self.sparse.remove(&index);
            }
            self.dense[index] = value;
        } else {
            self.sparse.insert(index, value);
        }
        self.length = self.length.max(index + 1);
    }

    /// Truncate or extend; extending only records the new length
    pub fn set_len(&mut self, length: usize) {
        if length < self.dense.len() {
            self.dense.truncate(length);
        }
        if !self.sparse.is_empty() {
            self.sparse.retain(|&i, _| i < length);
        }
        self.length = length;
    }

    pub fn push(&mut self, value: Value) {
        self.set(self.length, value);
    }

    pub fn pop(&mut self) -> Option<Value> {
        let last = self.length.checked_sub(1)?;
        self.length = last;
        if last < self.dense.len() {
            self.dense.pop()
        } else {
            Some(self.sparse.remove(&last).unwrap_or_default())
        }
    }

    /// Reset an element to undefined without changing the length
    pub fn clear_at(&mut self, index: usize) {
        if let Some(v) = self.dense.get_mut(index) {
            *v = Value::Undefined;
        } else {
            self.sparse.remove(&index);
        }
    }

    /// Values actually stored, in no particular order
    pub fn stored(&self) -> impl Iterator<Item = &Value> {
        self.dense.iter().chain(self.sparse.values())
    }

    /// Indices that hold storage, ascending
    pub fn indices(&self) -> Vec<usize> {
        let mut far: Vec<usize> = self.sparse.keys().copied().collect();
        far.sort_unstable();
        (0..self.dense.len()).chain(far).collect()
    }

    /// Every element up to the length, holes as undefined
    pub fn to_vec(&self) -> Vec<Value> {
        (0..self.length).map(|i| self.value_at(i)).collect()
    }

    pub fn clear(&mut self) {
        self.dense.clear();
        self.sparse.clear();
        self.length = 0;
    }
}

impl From<Vec<Value>> for ArrayElements {
    fn from(dense: Vec<Value>) -> Self {
        Self {
            length: dense.len(),
            dense,
            sparse: FxHashMap::default(),
        }
    }
}

/// Element storage for arrays and arguments objects
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Plain,
    Array,
}

#[derive(Debug)]
pub struct ScriptObject {
    pub class: Option<ClassId>,
    pub kind: ObjectKind,
    pub vars: VariableMap,
    pub slots: Vec<Value>,
    pub elements: ArrayElements,
}

impl ScriptObject {
    pub fn new(class: Option<ClassId>) -> Self {
        Self {
            class,
            kind: ObjectKind::Plain,
            vars: VariableMap::new(),
            slots: Vec::new(),
            elements: ArrayElements::new(),
        }
    }

    pub fn array(class: Option<ClassId>, elements: Vec<Value>) -> Self {
        Self {
            class,
            kind: ObjectKind::Array,
            vars: VariableMap::new(),
            slots: Vec::new(),
            elements: ArrayElements::from(elements),
        }
    }

    pub fn is_array(&self) -> bool {
        self.kind == ObjectKind::Array
    }

    /// 1-based slot access as used by getslot/setslot
    pub fn slot(&self, slot_id: u32) -> Option<&Value> {
        self.slots.get((slot_id as usize).checked_sub(1)?)
    }

    pub fn set_slot(&mut self, slot_id: u32, value: Value) -> bool {
        match (slot_id as usize).checked_sub(1).and_then(|i| self.slots.get_mut(i)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Reserve the slot for `slot_id` (0 appends); returns the 0-based index
    pub fn allocate_slot(&mut self, slot_id: u32, value: Value) -> usize {
        let index = if slot_id == 0 {
            self.slots.len()
        } else {
            slot_id as usize - 1
        };
        if self.slots.len() <= index {
            self.slots.resize(index + 1, Value::Undefined);
        }
        self.slots[index] = value;
        index
    }

    /// Store a public dynamic value, replacing any plain value under that name
    pub fn set_public(&mut self, name: Arc<str>, value: Value) {
        self.vars.insert(name, NsNameAndKind::public(), Binding::Value(value));
    }

    /// Read a directly stored public value or slot
    pub fn get_public(&self, name: &str) -> Option<Value> {
        match self.vars.find_exact(name, &NsNameAndKind::public())? {
            Binding::Value(v) => Some(v.clone()),
            Binding::Slot { index, .. } => self.slots.get(*index).cloned(),
            _ => None,
        }
    }

    /// Drop every reference this object holds
    pub fn clear(&mut self) {
        self.vars.clear();
        self.slots.clear();
        self.elements.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::NamespaceKind;
    use crate::vm::interner::intern;

    fn ns(uri: &str) -> NsNameAndKind {
        NsNameAndKind::new(intern(uri), NamespaceKind::Protected)
    }

    #[test]
    fn test_namespace_buckets() {
        let mut vars = VariableMap::new();
        vars.insert(intern("x"), NsNameAndKind::public(), Binding::Value(Value::Integer(1)));
        vars.insert(intern("x"), ns("A"), Binding::Value(Value::Integer(2)));
        assert_eq!(vars.len(), 2);

        match vars.find("x", &[ns("A")]) {
            Some(Binding::Value(Value::Integer(2))) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(vars.find("x", &[ns("B")]).is_none());
        assert!(vars.find("x", &[]).is_some());

        vars.insert(intern("x"), ns("A"), Binding::Value(Value::Integer(3)));
        assert_eq!(vars.len(), 2);
        assert!(vars.remove("x", &[ns("A")]).is_some());
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn test_slot_allocation() {
        let mut obj = ScriptObject::new(None);
        assert_eq!(obj.allocate_slot(3, Value::Integer(7)), 2);
        assert_eq!(obj.slots.len(), 3);
        assert!(matches!(obj.slot(3), Some(Value::Integer(7))));
        assert!(matches!(obj.slot(1), Some(Value::Undefined)));
        assert_eq!(obj.allocate_slot(0, Value::Null), 3);
        assert!(obj.slot(0).is_none());
        assert!(!obj.set_slot(9, Value::Null));
    }

    #[test]
    fn test_far_index_goes_sparse() {
        let mut elements = ArrayElements::from(vec![Value::Integer(0)]);
        elements.set(4_000_000_000, Value::Integer(1));
        assert_eq!(elements.len(), 4_000_000_001);
        assert_eq!(elements.stored().count(), 2);
        assert_eq!(elements.value_at(4_000_000_000).to_int32(), 1);
        assert!(matches!(elements.value_at(17), Value::Undefined));

        elements.set_len(MAX_ARRAY_LENGTH);
        assert_eq!(elements.len(), MAX_ARRAY_LENGTH);
        assert_eq!(elements.stored().count(), 2);

        elements.set_len(10);
        assert_eq!(elements.stored().count(), 1);
        assert_eq!(elements.indices(), vec![0]);
    }

    #[test]
    fn test_sparse_entries_join_the_dense_prefix() {
        let mut elements = ArrayElements::new();
        elements.set(5000, Value::Integer(2));
        for i in 0..5000 {
            elements.set(i, Value::Integer(1));
        }
        elements.set(5001, Value::Null);
        assert_eq!(elements.stored().count(), 5002);
        assert_eq!(elements.value_at(5000).to_int32(), 2);
        assert!(matches!(elements.pop(), Some(Value::Null)));
        assert_eq!(elements.pop().map(|v| v.to_int32()), Some(2));
        assert_eq!(elements.len(), 5000);
    }

    #[test]
    fn test_pop_from_sparse_tail() {
        let mut elements = ArrayElements::new();
        elements.set(1_000_000, Value::Integer(9));
        assert_eq!(elements.pop().map(|v| v.to_int32()), Some(9));
        assert!(matches!(elements.pop(), Some(Value::Undefined)));
        assert_eq!(elements.len(), 999_999);
    }

    #[test]
    fn test_clear_releases_references() {
        let inner = Arc::new(parking_lot::Mutex::new(ScriptObject::new(None)));
        let mut outer = ScriptObject::new(None);
        outer.set_public(intern("child"), Value::Object(inner.clone()));
        assert_eq!(Arc::strong_count(&inner), 2);
        outer.clear();
        assert_eq!(Arc::strong_count(&inner), 1);
    }
}
