// ABC binary format: primitives, constant pool, tables, instructions and tag framing

pub mod file;
pub mod opcode;
pub mod pool;
pub mod reader;
pub mod tables;
pub mod tag;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use file::{load, serialize, AbcFile, AbcSummary};
pub use pool::{ConstantKind, ConstantPool, MultinameInfo, NamespaceInfo, NamespaceKind, NsSetInfo};
pub use tables::{
    ClassInfo, ExceptionInfo, InstanceInfo, MethodBody, MethodInfo, ScriptInfo, TraitData,
    TraitInfo, TraitKind,
};
pub use tag::DoAbcTag;
