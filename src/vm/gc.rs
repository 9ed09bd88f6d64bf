// abcvm Cycle Collector
// Mark-and-sweep over script objects, layered on top of Arc reference counting
//
// Objects are tracked through weak references. A collection first marks
// everything reachable from the roots. The remaining tracked objects go
// through trial deletion: references held by other unmarked objects (and by
// the closures and scopes they own) are subtracted from each strong count.
// Whatever still has references left is held from outside, by the host or a
// live frame, and keeps everything it reaches. Only the rest is cleared.

use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use super::object::{Binding, ScriptObject};
use super::value::{FunctionRef, ObjectRef, Value};

const HEAP_GROW_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Objects ever tracked
    pub total_tracked: usize,
    /// Unreachable objects cleared
    pub cycles_broken: usize,
    pub tracked_count: usize,
    pub collections: usize,
}

pub struct GcHeap {
    /// Keyed by allocation address
    tracked: FxHashMap<usize, Weak<Mutex<ScriptObject>>>,
    /// Tracked count that triggers the next collection
    threshold: usize,
    min_threshold: usize,
    pub stats: GcStats,
}

/// Anything that can hold a strong reference in a cycle
enum Node {
    Object(ObjectRef),
    Function(FunctionRef),
    /// Scope chain shared by the closures created in one frame
    Scope(Arc<[Value]>),
}

impl Node {
    fn of(value: &Value) -> Option<Node> {
        match value {
            Value::Object(o) => Some(Node::Object(o.clone())),
            Value::Function(f) => Some(Node::Function(f.clone())),
            // Classes are owned by the arena
            _ => None,
        }
    }

    fn address(&self) -> usize {
        match self {
            Node::Object(o) => Arc::as_ptr(o) as usize,
            Node::Function(f) => Arc::as_ptr(f) as usize,
            Node::Scope(s) => Arc::as_ptr(s) as *const Value as usize,
        }
    }

    fn strong_count(&self) -> usize {
        match self {
            Node::Object(o) => Arc::strong_count(o),
            Node::Function(f) => Arc::strong_count(f),
            Node::Scope(s) => Arc::strong_count(s),
        }
    }

    /// One entry per strong reference this node holds
    fn edges(&self, out: &mut Vec<Node>) {
        match self {
            Node::Object(o) => {
                let mut values = Vec::new();
                children(&o.lock(), &mut values);
                out.extend(values.iter().filter_map(Node::of));
            }
            Node::Function(f) => {
                out.extend(f.closure.this.as_ref().and_then(Node::of));
                out.push(Node::Scope(f.closure.scope.clone()));
            }
            Node::Scope(s) => out.extend(s.iter().filter_map(Node::of)),
        }
    }
}

/// Every value directly referenced by `object`
fn children(object: &ScriptObject, out: &mut Vec<Value>) {
    for binding in object.vars.values() {
        match binding {
            Binding::Value(v) => out.push(v.clone()),
            Binding::Method(f) => out.push(Value::Function(f.clone())),
            Binding::Accessor { getter, setter } => {
                out.extend(getter.iter().chain(setter.iter()).map(|f| Value::Function(f.clone())))
            }
            Binding::Slot { .. } | Binding::Deferred(_) => {}
        }
    }
    out.extend(object.slots.iter().cloned());
    out.extend(object.elements.stored().cloned());
}

impl GcHeap {
    pub fn new(threshold: usize) -> Self {
        Self {
            tracked: FxHashMap::default(),
            threshold,
            min_threshold: threshold,
            stats: GcStats::default(),
        }
    }

    pub fn track(&mut self, object: &ObjectRef) {
        self.tracked.insert(Arc::as_ptr(object) as usize, Arc::downgrade(object));
        self.stats.total_tracked += 1;
        self.stats.tracked_count = self.tracked.len();
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn should_collect(&self) -> bool {
        self.tracked.len() >= self.threshold
    }

    pub fn collect(&mut self, roots: &[Value]) {
        // Phase 1: forget objects Arc already freed
        self.cleanup_dead();

        // Phase 2: mark
        let reachable = mark_from_roots(roots);

        // Phase 3: trial deletion over the unmarked rest
        let broken = self.break_cycles(&reachable);

        self.stats.collections += 1;
        self.stats.cycles_broken += broken;
        self.cleanup_dead();
        self.stats.tracked_count = self.tracked.len();

        let grown = (self.tracked.len() as f64 * HEAP_GROW_FACTOR) as usize;
        self.threshold = grown.max(self.min_threshold);
    }

    fn cleanup_dead(&mut self) {
        self.tracked.retain(|_, object| object.strong_count() > 0);
    }

    fn break_cycles(&mut self, reachable: &FxHashSet<usize>) -> usize {
        let mut nodes: Vec<Node> = Vec::new();
        let mut index: FxHashMap<usize, usize> = FxHashMap::default();
        for (addr, weak) in &self.tracked {
            if reachable.contains(addr) {
                continue;
            }
            if let Some(object) = weak.upgrade() {
                index.insert(*addr, nodes.len());
                nodes.push(Node::Object(object));
            }
        }

        // Closures and scopes owned by candidates join the graph
        let mut i = 0;
        while i < nodes.len() {
            let mut edges = Vec::new();
            nodes[i].edges(&mut edges);
            for edge in edges {
                if matches!(edge, Node::Object(_)) {
                    continue;
                }
                let addr = edge.address();
                if !reachable.contains(&addr) && !index.contains_key(&addr) {
                    index.insert(addr, nodes.len());
                    nodes.push(edge);
                }
            }
            i += 1;
        }

        // The handle in `nodes` is ours, so it does not count
        let mut external: Vec<isize> = nodes.iter().map(|n| n.strong_count() as isize - 1).collect();
        for node in &nodes {
            let mut edges = Vec::new();
            node.edges(&mut edges);
            for edge in &edges {
                if let Some(&j) = index.get(&edge.address()) {
                    external[j] -= 1;
                }
            }
        }

        // Anything held from outside keeps what it reaches
        let mut alive: Vec<bool> = external.iter().map(|&n| n > 0).collect();
        let mut worklist: Vec<usize> = (0..nodes.len()).filter(|&i| alive[i]).collect();
        while let Some(i) = worklist.pop() {
            let mut edges = Vec::new();
            nodes[i].edges(&mut edges);
            for edge in &edges {
                if let Some(&j) = index.get(&edge.address()) {
                    if !alive[j] {
                        alive[j] = true;
                        worklist.push(j);
                    }
                }
            }
        }

        let mut broken = 0;
        for (node, alive) in nodes.iter().zip(&alive) {
            let Node::Object(object) = node else {
                continue;
            };
            if *alive {
                continue;
            }
            // Drop the contents after releasing the lock
            let contents = {
                let mut guard = object.lock();
                let class = guard.class;
                mem::replace(&mut *guard, ScriptObject::new(class))
            };
            drop(contents);
            broken += 1;
        }
        broken
    }
}

/// Addresses of every object, function and scope reachable from `roots`
fn mark_from_roots(roots: &[Value]) -> FxHashSet<usize> {
    let mut reachable = FxHashSet::default();
    let mut worklist: Vec<Node> = roots.iter().filter_map(Node::of).collect();
    while let Some(node) = worklist.pop() {
        if reachable.insert(node.address()) {
            node.edges(&mut worklist);
        }
    }
    reachable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VmResult;
    use crate::vm::function::{Closure, Function, FunctionKind};
    use crate::vm::interner::intern;
    use crate::vm::runtime::Runtime;

    fn noop(_rt: &mut Runtime, _this: &Value, _args: &[Value]) -> VmResult<Value> {
        Ok(Value::Undefined)
    }

    fn object() -> ObjectRef {
        Arc::new(Mutex::new(ScriptObject::new(None)))
    }

    #[test]
    fn test_cleanup_dead() {
        let mut gc = GcHeap::new(100);
        {
            let o = object();
            gc.track(&o);
        }
        assert_eq!(gc.tracked_count(), 1);
        gc.collect(&[]);
        assert_eq!(gc.tracked_count(), 0);
        assert_eq!(gc.stats.cycles_broken, 0);
    }

    #[test]
    fn test_unreachable_cycle_is_broken() {
        let mut gc = GcHeap::new(100);
        let a = object();
        let b = object();
        a.lock().set_public(intern("next"), Value::Object(b.clone()));
        b.lock().set_public(intern("next"), Value::Object(a.clone()));
        gc.track(&a);
        gc.track(&b);

        let weak_a = Arc::downgrade(&a);
        drop(a);
        drop(b);
        assert!(weak_a.upgrade().is_some());

        gc.collect(&[]);
        assert!(weak_a.upgrade().is_none());
        assert_eq!(gc.stats.cycles_broken, 2);
        assert_eq!(gc.tracked_count(), 0);
    }

    #[test]
    fn test_reachable_cycle_survives() {
        let mut gc = GcHeap::new(100);
        let root = object();
        let a = object();
        let b = object();
        a.lock().set_public(intern("next"), Value::Object(b.clone()));
        b.lock().elements.push(Value::Object(a.clone()));
        root.lock().set_public(intern("child"), Value::Object(a.clone()));
        gc.track(&a);
        gc.track(&b);
        drop(b);

        gc.collect(&[Value::Object(root.clone())]);
        assert_eq!(gc.stats.cycles_broken, 0);
        assert!(a.lock().get_public("next").is_some());
    }

    #[test]
    fn test_host_held_object_survives() {
        let mut gc = GcHeap::new(100);
        let held = object();
        held.lock().set_public(intern("kept"), Value::Integer(5));
        gc.track(&held);

        gc.collect(&[]);
        assert_eq!(gc.stats.cycles_broken, 0);
        assert_eq!(held.lock().get_public("kept").map(|v| v.to_int32()), Some(5));
    }

    #[test]
    fn test_cycle_held_by_host_survives() {
        let mut gc = GcHeap::new(100);
        let a = object();
        let b = object();
        a.lock().set_public(intern("next"), Value::Object(b.clone()));
        b.lock().set_public(intern("next"), Value::Object(a.clone()));
        gc.track(&a);
        gc.track(&b);
        drop(b);

        // `a` is still held here, so the whole cycle stays
        gc.collect(&[]);
        assert_eq!(gc.stats.cycles_broken, 0);
        let next = a.lock().get_public("next");
        let b = next.as_ref().and_then(Value::as_object).unwrap().clone();
        assert!(b.lock().get_public("next").is_some());
    }

    #[test]
    fn test_closure_capturing_its_object_is_broken() {
        let mut gc = GcHeap::new(100);
        let owner = object();
        gc.track(&owner);
        let scope: Arc<[Value]> = Arc::from(vec![Value::Object(owner.clone())]);
        let closure = Closure {
            this: Some(Value::Object(owner.clone())),
            scope,
            level: None,
        };
        let method = Arc::new(Function {
            name: intern("listener"),
            kind: FunctionKind::Native(Arc::new(noop)),
            closure,
        });
        // A second closure sharing the scope
        let sibling = method.bind(Value::Null);
        owner.lock().set_public(intern("sibling"), Value::Function(sibling));
        owner.lock().set_public(intern("onFrame"), Value::Function(method));

        let weak = Arc::downgrade(&owner);
        drop(owner);
        gc.collect(&[]);
        assert!(weak.upgrade().is_none());
        assert_eq!(gc.stats.cycles_broken, 1);
    }

    #[test]
    fn test_threshold_grows() {
        let mut gc = GcHeap::new(2);
        let kept: Vec<ObjectRef> = (0..4).map(|_| object()).collect();
        for o in &kept {
            gc.track(o);
        }
        assert!(gc.should_collect());
        let roots: Vec<Value> = kept.iter().cloned().map(Value::Object).collect();
        gc.collect(&roots);
        assert!(!gc.should_collect());
        assert_eq!(gc.stats.collections, 1);
    }
}
