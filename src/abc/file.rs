// ABC file loader and serializer
// Reads the tables in their fixed order and links bodies to methods

use log::{debug, warn};
use rustc_hash::FxHashSet;
use serde::Serialize;

use super::pool::ConstantPool;
use super::reader::AbcReader;
use super::tables::{
    self, ClassInfo, InstanceInfo, MetadataInfo, MethodBody, MethodInfo,
    ScriptInfo, TableCounts, TraitData,
};
use super::writer::AbcWriter;
use crate::error::{corrupt, VmResult};

/// Methods flagged as implemented by the host
pub const NATIVE_METHOD: u8 = 0x20;

/// One deserialized ABC blob
#[derive(Debug, Clone, Serialize)]
pub struct AbcFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub pool: ConstantPool,
    pub methods: Vec<MethodInfo>,
    pub metadata: Vec<MetadataInfo>,
    pub instances: Vec<InstanceInfo>,
    pub classes: Vec<ClassInfo>,
    pub scripts: Vec<ScriptInfo>,
    pub bodies: Vec<MethodBody>,
}

/// Table sizes, printed by the CLI
#[derive(Debug, Clone, Serialize)]
pub struct AbcSummary {
    pub version: String,
    pub ints: usize,
    pub uints: usize,
    pub doubles: usize,
    pub strings: usize,
    pub namespaces: usize,
    pub ns_sets: usize,
    pub multinames: usize,
    pub methods: usize,
    pub metadata: usize,
    pub classes: usize,
    pub scripts: usize,
    pub bodies: usize,
    pub code_bytes: usize,
}

impl AbcFile {
    pub fn new() -> Self {
        Self {
            minor_version: 16,
            major_version: 46,
            pool: ConstantPool::default(),
            methods: Vec::new(),
            metadata: Vec::new(),
            instances: Vec::new(),
            classes: Vec::new(),
            scripts: Vec::new(),
            bodies: Vec::new(),
        }
    }

    pub fn body_of(&self, method: u32) -> Option<&MethodBody> {
        let info = self.methods.get(method as usize)?;
        info.body.and_then(|b| self.bodies.get(b as usize))
    }

    pub fn summary(&self) -> AbcSummary {
        AbcSummary {
            version: format!("{}.{}", self.major_version, self.minor_version),
            ints: self.pool.ints.len() - 1,
            uints: self.pool.uints.len() - 1,
            doubles: self.pool.doubles.len() - 1,
            strings: self.pool.strings.len() - 1,
            namespaces: self.pool.namespaces.len() - 1,
            ns_sets: self.pool.ns_sets.len() - 1,
            multinames: self.pool.multinames.len() - 1,
            methods: self.methods.len(),
            metadata: self.metadata.len(),
            classes: self.instances.len(),
            scripts: self.scripts.len(),
            bodies: self.bodies.len(),
            code_bytes: self.bodies.iter().map(|b| b.code.len()).sum(),
        }
    }

    /// Methods that may legitimately lack a body
    fn abstract_methods(&self) -> FxHashSet<u32> {
        let mut allowed = FxHashSet::default();
        for instance in self.instances.iter().filter(|i| i.is_interface()) {
            allowed.insert(instance.init);
            for t in &instance.traits {
                if let TraitData::Method { method, .. } = t.data {
                    allowed.insert(method);
                }
            }
        }
        for (i, m) in self.methods.iter().enumerate() {
            if m.flags & NATIVE_METHOD != 0 {
                allowed.insert(i as u32);
            }
        }
        allowed
    }

    fn link_bodies(&mut self) -> VmResult<()> {
        for (index, body) in self.bodies.iter().enumerate() {
            let method = &mut self.methods[body.method as usize];
            if method.body.is_some() {
                return Err(corrupt(format!(
                    "Method {} already has a body",
                    body.method
                )));
            }
            method.body = Some(index as u32);
        }

        let allowed = self.abstract_methods();
        for (i, m) in self.methods.iter().enumerate() {
            if m.body.is_none() && !allowed.contains(&(i as u32)) {
                return Err(corrupt(format!("Method {} has no body", i)));
            }
        }
        Ok(())
    }
}

impl Default for AbcFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Deserialize one ABC blob
pub fn load(bytes: &[u8]) -> VmResult<AbcFile> {
    let mut r = AbcReader::new(bytes);
    let minor_version = r.read_u16()?;
    let major_version = r.read_u16()?;
    debug!("Loading ABC {}.{} ({} bytes)", major_version, minor_version, bytes.len());

    let pool = ConstantPool::read(&mut r)?;
    let methods = tables::read_methods(&mut r, &pool)?;
    let metadata = tables::read_metadata(&mut r, &pool)?;
    let mut counts = TableCounts {
        methods: methods.len(),
        metadata: metadata.len(),
        classes: 0,
    };
    let (instances, classes) = tables::read_classes(&mut r, &pool, &mut counts)?;
    let scripts = tables::read_scripts(&mut r, &pool, &counts)?;
    let bodies = tables::read_bodies(&mut r, &pool, &counts)?;

    if !r.is_empty() {
        warn!("{} trailing bytes after the method body table", r.remaining());
    }

    let mut file = AbcFile {
        minor_version,
        major_version,
        pool,
        methods,
        metadata,
        instances,
        classes,
        scripts,
        bodies,
    };
    file.link_bodies()?;
    Ok(file)
}

/// Serialize a file back to bytes with minimal variable-length integers
pub fn serialize(file: &AbcFile) -> Vec<u8> {
    let mut w = AbcWriter::new();
    w.write_u16(file.minor_version);
    w.write_u16(file.major_version);
    file.pool.write(&mut w);
    tables::write_methods(&mut w, &file.methods);
    tables::write_metadata(&mut w, &file.metadata);
    tables::write_classes(&mut w, &file.instances, &file.classes);
    tables::write_scripts(&mut w, &file.scripts);
    tables::write_bodies(&mut w, &file.bodies);
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::testing::AbcBuilder;
    use crate::error::ErrorKind;

    #[test]
    fn test_minimal_file() {
        let mut b = AbcBuilder::new();
        let init = b.method(0, &[0x47]);
        b.script(init, vec![]);
        let file = load(&b.bytes()).unwrap();
        assert_eq!(file.methods.len(), 1);
        assert_eq!(file.methods[0].body, Some(0));
        assert_eq!(file.scripts.len(), 1);
        assert_eq!(file.body_of(0).unwrap().code, vec![0x47]);
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut b = AbcBuilder::new();
        let name = b.public_qname("answer");
        let int_index = b.int(42);
        let init = b.method(0, &[0xd0, 0x30, 0x47]);
        b.script(init, vec![AbcBuilder::const_trait(name, int_index)]);
        let bytes = b.bytes();
        let file = load(&bytes).unwrap();
        assert_eq!(serialize(&file), bytes);
    }

    #[test]
    fn test_method_count_exceeds_records() {
        // Three methods declared, only two encoded
        let mut w = AbcWriter::new();
        w.write_u16(16);
        w.write_u16(46);
        ConstantPool::default().write(&mut w);
        w.write_u30(3);
        for _ in 0..2 {
            w.write_u30(0); // params
            w.write_u30(0); // return type
            w.write_u30(0); // name
            w.write_u8(0); // flags
        }
        let err = load(&w.into_bytes()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptAbc);
    }

    #[test]
    fn test_duplicate_body_is_corrupt() {
        let mut b = AbcBuilder::new();
        let init = b.method(0, &[0x47]);
        b.script(init, vec![]);
        let mut file = load(&b.bytes()).unwrap();
        let extra = file.bodies[0].clone();
        file.bodies.push(extra);
        for m in &mut file.methods {
            m.body = None;
        }
        let err = load(&serialize(&file)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptAbc);
        assert!(err.message.contains("already has a body"));
    }

    #[test]
    fn test_method_without_body_is_corrupt() {
        let mut b = AbcBuilder::new();
        let init = b.method(0, &[0x47]);
        b.abstract_method(0);
        b.script(init, vec![]);
        let err = load(&b.bytes()).unwrap_err();
        assert!(err.message.contains("has no body"));
    }

    #[test]
    fn test_truncated_body() {
        let mut b = AbcBuilder::new();
        let init = b.method(0, &[0x47]);
        b.script(init, vec![]);
        let bytes = b.bytes();
        let err = load(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptAbc);
    }

    #[test]
    fn test_summary_counts() {
        let mut b = AbcBuilder::new();
        b.public_qname("x");
        let init = b.method(0, &[0x47]);
        b.script(init, vec![]);
        let summary = load(&b.bytes()).unwrap().summary();
        assert_eq!(summary.multinames, 1);
        assert_eq!(summary.methods, 1);
        assert_eq!(summary.code_bytes, 1);
        assert_eq!(summary.version, "46.16");
    }
}
