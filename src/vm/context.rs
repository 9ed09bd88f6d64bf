// ABC execution context
// Owns one loaded file, its interned strings and the multiname cache

use std::fmt;
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use super::interner::intern;
use super::multiname::{self, NsNameAndKind, ResolvedName, RuntimeOperands};
use super::value::Value;
use crate::abc::{AbcFile, ConstantKind, MethodBody, MethodInfo, MultinameInfo};
use crate::error::{corrupt, VmResult};

pub struct AbcContext {
    pub name: String,
    pub file: AbcFile,
    /// Deferred script initialization requested by the DoABC flags
    pub lazy: bool,
    strings: Vec<Arc<str>>,
    names: Mutex<Vec<Option<Arc<ResolvedName>>>>,
}

impl AbcContext {
    pub fn new(file: AbcFile, name: impl Into<String>) -> Arc<Self> {
        Self::with_lazy(file, name, false)
    }

    pub fn with_lazy(file: AbcFile, name: impl Into<String>, lazy: bool) -> Arc<Self> {
        let strings = file.pool.strings.iter().map(|s| intern(s)).collect();
        let names = vec![None; file.pool.multinames.len()];
        Arc::new(Self {
            name: name.into(),
            file,
            lazy,
            strings,
            names: Mutex::new(names),
        })
    }

    pub fn string(&self, index: u32) -> Arc<str> {
        self.strings.get(index as usize).cloned().unwrap_or_else(|| intern(""))
    }

    pub fn namespace(&self, index: u32) -> NsNameAndKind {
        multiname::pool_namespace(&self.file.pool, &self.strings, index)
    }

    pub fn multiname_info(&self, index: u32) -> VmResult<&MultinameInfo> {
        self.file
            .pool
            .multinames
            .get(index as usize)
            .ok_or_else(|| corrupt(format!("Multiname index {} out of range", index)))
    }

    /// Which runtime operands resolving `index` pops: (name, namespace)
    pub fn runtime_operands(&self, index: u32) -> VmResult<(bool, bool)> {
        if index == 0 {
            return Ok((false, false));
        }
        Ok(self.multiname_info(index)?.runtime_operands())
    }

    pub fn method(&self, index: u32) -> VmResult<&MethodInfo> {
        self.file
            .methods
            .get(index as usize)
            .ok_or_else(|| corrupt(format!("Method index {} out of range", index)))
    }

    pub fn body(&self, method: u32) -> Option<&MethodBody> {
        self.file.body_of(method)
    }

    /// Resolve multiname `index`; fixed kinds hand back the same cached `Arc`
    pub fn resolve(&self, index: u32, operands: RuntimeOperands) -> VmResult<Arc<ResolvedName>> {
        let mut names = self.names.lock();
        let slot = names
            .get_mut(index as usize)
            .ok_or_else(|| corrupt(format!("Multiname index {} out of range", index)))?;

        if index == 0 {
            return Ok(slot.get_or_insert_with(|| Arc::new(ResolvedName::any())).clone());
        }

        let info = &self.file.pool.multinames[index as usize];
        let entry = match slot.take() {
            Some(entry) => entry,
            None => {
                let resolved = multiname::resolve_static(&self.file.pool, &self.strings, info)?;
                trace!("Resolved multiname {} to {}", index, resolved);
                Arc::new(resolved)
            }
        };
        let entry = slot.insert(entry);

        if info.runtime_operands() != (false, false) {
            // The previous local name or namespace is dropped here, before the overwrite
            multiname::apply_operands(Arc::make_mut(entry), info, operands)?;
        }
        Ok(entry.clone())
    }

    /// Value of a constant referenced by (kind, index), as used by optional
    /// parameter defaults and slot initializers
    pub fn constant(&self, kind: ConstantKind, index: u32) -> Value {
        let pool = &self.file.pool;
        match kind {
            ConstantKind::Undefined => Value::Undefined,
            ConstantKind::Null => Value::Null,
            ConstantKind::True => Value::Boolean(true),
            ConstantKind::False => Value::Boolean(false),
            ConstantKind::Int => Value::Integer(pool.ints.get(index as usize).copied().unwrap_or(0)),
            ConstantKind::UInt => {
                Value::UInteger(pool.uints.get(index as usize).copied().unwrap_or(0))
            }
            ConstantKind::Double => {
                Value::Number(pool.doubles.get(index as usize).copied().unwrap_or(f64::NAN))
            }
            ConstantKind::Utf8 => Value::String(self.string(index)),
            ConstantKind::Namespace(_) => Value::Namespace(self.namespace(index)),
        }
    }
}

impl fmt::Debug for AbcContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbcContext")
            .field("name", &self.name)
            .field("methods", &self.file.methods.len())
            .field("scripts", &self.file.scripts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::load;
    use crate::abc::testing::AbcBuilder;
    use crate::abc::NamespaceKind;
    use crate::error::ErrorKind;
    use crate::vm::multiname::LocalName;
    use crate::vm::object::ScriptObject;

    fn context(b: &mut AbcBuilder) -> Arc<AbcContext> {
        let init = b.method(0, &[0x47]);
        b.script(init, vec![]);
        AbcContext::new(load(&b.bytes()).unwrap(), "test")
    }

    #[test]
    fn test_index_zero_is_any() {
        let mut b = AbcBuilder::new();
        let ctx = context(&mut b);
        let any = ctx.resolve(0, RuntimeOperands::None).unwrap();
        assert!(any.is_any());
    }

    #[test]
    fn test_fixed_kinds_cached() {
        let mut b = AbcBuilder::new();
        let q = b.public_qname("stage");
        let ctx = context(&mut b);
        let first = ctx.resolve(q, RuntimeOperands::None).unwrap();
        let second = ctx.resolve(q, RuntimeOperands::None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(&*first.key(), "stage");
        assert!(first.namespaces[0].is_public());
    }

    #[test]
    fn test_multiname_set_normalized() {
        let mut b = AbcBuilder::new();
        let a = b.namespace(NamespaceKind::Package, "flash.display");
        let p = b.public_ns();
        let dup = b.namespace(NamespaceKind::Namespace, "flash.display");
        let set = b.ns_set(&[a, p, dup]);
        let m = b.multiname(set, "Sprite");
        let ctx = context(&mut b);
        let name = ctx.resolve(m, RuntimeOperands::None).unwrap();
        let uris: Vec<&str> = name.namespaces.iter().map(|n| &*n.uri).collect();
        assert_eq!(uris, vec!["", "flash.display"]);
    }

    #[test]
    fn test_multiname_l_does_not_leak_objects() {
        let mut b = AbcBuilder::new();
        let p = b.public_ns();
        let set = b.ns_set(&[p]);
        let m = b.multiname_l(set);
        let ctx = context(&mut b);

        let first = Value::object(ScriptObject::new(None));
        let first_ref = first.as_object().unwrap().clone();
        let name = ctx.resolve(m, RuntimeOperands::Name(first)).unwrap();
        assert!(matches!(name.name, LocalName::Object(_)));
        drop(name);
        assert_eq!(Arc::strong_count(&first_ref), 2);

        let second = Value::object(ScriptObject::new(None));
        let name = ctx.resolve(m, RuntimeOperands::Name(second)).unwrap();
        assert_eq!(Arc::strong_count(&first_ref), 1);

        drop(name);
        let name = ctx.resolve(m, RuntimeOperands::Name(Value::Integer(4))).unwrap();
        assert!(matches!(name.name, LocalName::Integer(4)));
        assert_eq!(name.namespaces.len(), 1);
    }

    #[test]
    fn test_held_entry_is_not_mutated() {
        let mut b = AbcBuilder::new();
        let set = b.ns_set(&[]);
        let m = b.multiname_l(set);
        let ctx = context(&mut b);
        let held = ctx.resolve(m, RuntimeOperands::Name(Value::Integer(1))).unwrap();
        let next = ctx.resolve(m, RuntimeOperands::Name(Value::Integer(2))).unwrap();
        assert!(matches!(held.name, LocalName::Integer(1)));
        assert!(matches!(next.name, LocalName::Integer(2)));
    }

    #[test]
    fn test_rtq_name_namespace_each_call() {
        let mut b = AbcBuilder::new();
        let m = b.rtq_name("x");
        let ctx = context(&mut b);
        let ns = NsNameAndKind::new(intern("custom"), NamespaceKind::Namespace);
        let name = ctx
            .resolve(m, RuntimeOperands::Namespace(Value::Namespace(ns.clone())))
            .unwrap();
        assert_eq!(name.namespaces.as_slice(), &[ns]);
        assert_eq!(&*name.key(), "x");

        let err = ctx
            .resolve(m, RuntimeOperands::Namespace(Value::string("nope")))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn test_attribute_kind_resolves_like_plain() {
        let mut b = AbcBuilder::new();
        let name = b.string("id");
        let p = b.public_ns();
        let m = b.add_multiname(MultinameInfo::QName {
            ns: p,
            name,
            attribute: true,
        });
        let ctx = context(&mut b);
        let name = ctx.resolve(m, RuntimeOperands::None).unwrap();
        assert!(name.attribute);
        assert_eq!(&*name.key(), "id");
        assert!(name.namespaces[0].is_public());

        let mut rt = crate::vm::runtime::Runtime::new(crate::config::VmConfig::default());
        let target = rt.new_object();
        let err = rt.get_property(&target, &name).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
        let err = rt.set_property(&target, &name, Value::Integer(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
    }

    #[test]
    fn test_constants() {
        let mut b = AbcBuilder::new();
        let i = b.int(-7);
        let d = b.double(0.25);
        let s = b.string("hi");
        let ctx = context(&mut b);
        assert!(matches!(ctx.constant(ConstantKind::Int, i), Value::Integer(-7)));
        assert_eq!(ctx.constant(ConstantKind::Double, d).to_number(), 0.25);
        assert_eq!(&*ctx.constant(ConstantKind::Utf8, s).to_str(), "hi");
        assert!(matches!(ctx.constant(ConstantKind::Undefined, 0), Value::Undefined));
    }
}
