// Resolved names
// Multiname descriptors are turned into a namespace set plus one local name

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::interner::intern;
use super::value::Value;
use crate::abc::{ConstantPool, MultinameInfo, NamespaceKind};
use crate::error::{type_error, unsupported, VmResult};

/// A namespace as the runtime compares it: URI plus kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NsNameAndKind {
    pub uri: Arc<str>,
    pub kind: NamespaceKind,
}

impl NsNameAndKind {
    /// Package namespaces behave exactly like plain namespaces for lookup
    pub fn new(uri: Arc<str>, kind: NamespaceKind) -> Self {
        let kind = match kind {
            NamespaceKind::Package => NamespaceKind::Namespace,
            other => other,
        };
        Self { uri, kind }
    }

    pub fn public() -> Self {
        Self::new(intern(""), NamespaceKind::Namespace)
    }

    pub fn is_public(&self) -> bool {
        self.kind == NamespaceKind::Namespace && self.uri.is_empty()
    }
}

impl fmt::Display for NsNameAndKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.uri.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{}", self.uri)
        }
    }
}

pub type NsSet = SmallVec<[NsNameAndKind; 2]>;

/// The local part of a resolved name
#[derive(Debug, Clone)]
pub enum LocalName {
    String(Arc<str>),
    Integer(i32),
    Number(f64),
    /// An object used as a property key keeps its identity
    Object(Value),
}

impl LocalName {
    /// Element index when the name addresses an array slot
    pub fn as_index(&self) -> Option<usize> {
        match self {
            LocalName::Integer(i) if *i >= 0 => Some(*i as usize),
            LocalName::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n < u32::MAX as f64 => {
                Some(*n as usize)
            }
            LocalName::String(s) => s
                .parse::<u32>()
                .ok()
                .filter(|&i| i < u32::MAX && i.to_string() == **s)
                .map(|i| i as usize),
            _ => None,
        }
    }
}

/// Outcome of multiname resolution, shared through the per-descriptor cache
#[derive(Debug, Clone)]
pub struct ResolvedName {
    pub namespaces: NsSet,
    pub name: LocalName,
    /// Came from an attribute kind (`@name` in XML access)
    pub attribute: bool,
}

impl ResolvedName {
    pub fn any() -> Self {
        Self {
            namespaces: SmallVec::new(),
            name: LocalName::String(intern("*")),
            attribute: false,
        }
    }

    pub fn qualified(ns: NsNameAndKind, name: Arc<str>) -> Self {
        let mut namespaces = SmallVec::new();
        namespaces.push(ns);
        Self {
            namespaces,
            name: LocalName::String(name),
            attribute: false,
        }
    }

    pub fn public(name: &str) -> Self {
        Self::qualified(NsNameAndKind::public(), intern(name))
    }

    pub fn is_any(&self) -> bool {
        self.namespaces.is_empty() && matches!(&self.name, LocalName::String(s) if &**s == "*")
    }

    /// String key used by variable tables. Keys computed from runtime
    /// numbers are not interned.
    pub fn key(&self) -> Arc<str> {
        match &self.name {
            LocalName::String(s) => s.clone(),
            LocalName::Integer(i) => Arc::from(i.to_string()),
            LocalName::Number(n) => Arc::from(super::value::number_to_string(*n)),
            LocalName::Object(v) => v.to_str(),
        }
    }

    pub fn first_namespace(&self) -> NsNameAndKind {
        self.namespaces.first().cloned().unwrap_or_else(NsNameAndKind::public)
    }
}

impl fmt::Display for ResolvedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespaces.first() {
            Some(ns) if !ns.uri.is_empty() => write!(f, "{}::{}", ns.uri, self.key()),
            _ => write!(f, "{}", self.key()),
        }
    }
}

/// Values popped from the operand stack for runtime multiname kinds
#[derive(Debug, Clone)]
pub enum RuntimeOperands {
    None,
    Name(Value),
    Namespace(Value),
    NameAndNamespace { name: Value, ns: Value },
}

/// Sort by (uri, kind) and drop duplicates
pub fn normalize_set(set: &mut NsSet) {
    set.sort();
    set.dedup();
}

pub(crate) fn pool_namespace(pool: &ConstantPool, strings: &[Arc<str>], index: u32) -> NsNameAndKind {
    match pool.namespaces.get(index as usize) {
        Some(info) if index != 0 => NsNameAndKind::new(
            strings.get(info.name as usize).cloned().unwrap_or_else(|| intern("")),
            info.kind,
        ),
        _ => NsNameAndKind::public(),
    }
}

fn pool_ns_set(pool: &ConstantPool, strings: &[Arc<str>], index: u32) -> NsSet {
    let mut set: NsSet = pool
        .ns_sets
        .get(index as usize)
        .map(|s| {
            s.namespaces
                .iter()
                .map(|ns| pool_namespace(pool, strings, *ns))
                .collect()
        })
        .unwrap_or_default();
    normalize_set(&mut set);
    set
}

fn pool_string(strings: &[Arc<str>], index: u32) -> Arc<str> {
    if index == 0 {
        return intern("*");
    }
    strings.get(index as usize).cloned().unwrap_or_else(|| intern(""))
}

/// The part of a descriptor that never depends on runtime operands
pub(crate) fn resolve_static(
    pool: &ConstantPool,
    strings: &[Arc<str>],
    info: &MultinameInfo,
) -> VmResult<ResolvedName> {
    let mut resolved = match info {
        MultinameInfo::QName { ns, name, .. } => ResolvedName::qualified(
            pool_namespace(pool, strings, *ns),
            pool_string(strings, *name),
        ),
        MultinameInfo::Multiname { ns_set, name, .. } => ResolvedName {
            namespaces: pool_ns_set(pool, strings, *ns_set),
            name: LocalName::String(pool_string(strings, *name)),
            attribute: false,
        },
        MultinameInfo::MultinameL { ns_set, .. } => ResolvedName {
            namespaces: pool_ns_set(pool, strings, *ns_set),
            name: LocalName::String(intern("")),
            attribute: false,
        },
        MultinameInfo::RtqName { name, .. } => ResolvedName {
            namespaces: SmallVec::new(),
            name: LocalName::String(pool_string(strings, *name)),
            attribute: false,
        },
        MultinameInfo::RtqNameL { .. } => ResolvedName {
            namespaces: SmallVec::new(),
            name: LocalName::String(intern("")),
            attribute: false,
        },
        // Type parameters are ignored; Vector.<T> resolves as Vector
        MultinameInfo::TypeName { definition, .. } => match pool.multinames.get(*definition as usize) {
            Some(def @ MultinameInfo::QName { .. }) => resolve_static(pool, strings, def)?,
            _ => {
                return Err(unsupported(format!(
                    "TypeName over multiname {} is not a QName",
                    definition
                )))
            }
        },
    };
    resolved.attribute = info.is_attribute();
    Ok(resolved)
}

/// Local name taken from a popped operand according to its dynamic type
pub fn local_name_of(value: &Value) -> LocalName {
    match value {
        Value::Integer(i) => LocalName::Integer(*i),
        Value::UInteger(u) if *u <= i32::MAX as u32 => LocalName::Integer(*u as i32),
        Value::UInteger(u) => LocalName::Number(*u as f64),
        Value::Number(n) => LocalName::Number(*n),
        Value::String(s) => LocalName::String(s.clone()),
        Value::Object(_) | Value::Function(_) | Value::Class(_) => LocalName::Object(value.clone()),
        other => LocalName::String(other.to_str()),
    }
}

pub fn namespace_of(value: &Value) -> VmResult<NsNameAndKind> {
    match value {
        Value::Namespace(ns) => Ok(ns.clone()),
        other => Err(type_error(format!(
            "Runtime qualified name expects a Namespace, got {}",
            other.type_name()
        ))),
    }
}

/// Overwrite the runtime parts of a cached entry in place
pub(crate) fn apply_operands(
    name: &mut ResolvedName,
    info: &MultinameInfo,
    operands: RuntimeOperands,
) -> VmResult<()> {
    match (info, operands) {
        (MultinameInfo::MultinameL { .. }, RuntimeOperands::Name(value)) => {
            name.name = local_name_of(&value);
        }
        (MultinameInfo::RtqName { .. }, RuntimeOperands::Namespace(ns)) => {
            let ns = namespace_of(&ns)?;
            name.namespaces.clear();
            name.namespaces.push(ns);
        }
        (MultinameInfo::RtqNameL { .. }, RuntimeOperands::NameAndNamespace { name: n, ns }) => {
            let ns = namespace_of(&ns)?;
            name.namespaces.clear();
            name.namespaces.push(ns);
            name.name = local_name_of(&n);
        }
        (_, RuntimeOperands::None) => {}
        (info, _) => {
            return Err(crate::error::runtime_error(format!(
                "Operands do not match multiname kind 0x{:02x}",
                info.kind_byte()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_normalizes_to_namespace() {
        let a = NsNameAndKind::new(intern(""), NamespaceKind::Package);
        assert!(a.is_public());
        assert_eq!(a, NsNameAndKind::public());
    }

    #[test]
    fn test_set_sorted_and_deduped() {
        let mut set: NsSet = SmallVec::new();
        set.push(NsNameAndKind::new(intern("b"), NamespaceKind::Namespace));
        set.push(NsNameAndKind::new(intern("a"), NamespaceKind::Private));
        set.push(NsNameAndKind::new(intern("a"), NamespaceKind::Namespace));
        set.push(NsNameAndKind::new(intern("b"), NamespaceKind::Package));
        normalize_set(&mut set);
        let uris: Vec<&str> = set.iter().map(|n| &*n.uri).collect();
        assert_eq!(uris, vec!["a", "a", "b"]);
        assert_eq!(set[0].kind, NamespaceKind::Private);
        assert_eq!(set[1].kind, NamespaceKind::Namespace);
    }

    #[test]
    fn test_local_name_from_operands() {
        assert!(matches!(local_name_of(&Value::Integer(3)), LocalName::Integer(3)));
        assert!(matches!(local_name_of(&Value::Number(1.5)), LocalName::Number(_)));
        match local_name_of(&Value::Boolean(true)) {
            LocalName::String(s) => assert_eq!(&*s, "true"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(LocalName::String(intern("12")).as_index(), Some(12));
        assert_eq!(LocalName::Number(2.5).as_index(), None);
    }

    #[test]
    fn test_rtq_requires_namespace() {
        let info = MultinameInfo::RtqName {
            name: 1,
            attribute: false,
        };
        let mut name = ResolvedName::public("x");
        let err = apply_operands(&mut name, &info, RuntimeOperands::Namespace(Value::Integer(1)))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::TypeError);
    }
}
