// ABC constant pool
// Seven 1-based index spaces; slot 0 of each is a reserved placeholder

use serde::Serialize;

use super::reader::AbcReader;
use super::writer::AbcWriter;
use crate::error::{corrupt, VmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NamespaceKind {
    Private,
    Namespace,
    Package,
    PackageInternal,
    Protected,
    Explicit,
    StaticProtected,
}

impl NamespaceKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x05 => NamespaceKind::Private,
            0x08 => NamespaceKind::Namespace,
            0x16 => NamespaceKind::Package,
            0x17 => NamespaceKind::PackageInternal,
            0x18 => NamespaceKind::Protected,
            0x19 => NamespaceKind::Explicit,
            0x1a => NamespaceKind::StaticProtected,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        match self {
            NamespaceKind::Private => 0x05,
            NamespaceKind::Namespace => 0x08,
            NamespaceKind::Package => 0x16,
            NamespaceKind::PackageInternal => 0x17,
            NamespaceKind::Protected => 0x18,
            NamespaceKind::Explicit => 0x19,
            NamespaceKind::StaticProtected => 0x1a,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NamespaceInfo {
    pub kind: NamespaceKind,
    /// String index, 0 for the "any" name
    pub name: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NsSetInfo {
    pub namespaces: Vec<u32>,
}

/// A multiname descriptor as stored in the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MultinameInfo {
    QName { ns: u32, name: u32, attribute: bool },
    RtqName { name: u32, attribute: bool },
    RtqNameL { attribute: bool },
    Multiname { ns_set: u32, name: u32, attribute: bool },
    MultinameL { ns_set: u32, attribute: bool },
    TypeName { definition: u32, params: Vec<u32> },
}

impl MultinameInfo {
    pub fn kind_byte(&self) -> u8 {
        match self {
            MultinameInfo::QName { attribute: false, .. } => 0x07,
            MultinameInfo::QName { attribute: true, .. } => 0x0d,
            MultinameInfo::RtqName { attribute: false, .. } => 0x0f,
            MultinameInfo::RtqName { attribute: true, .. } => 0x10,
            MultinameInfo::RtqNameL { attribute: false } => 0x11,
            MultinameInfo::RtqNameL { attribute: true } => 0x12,
            MultinameInfo::Multiname { attribute: false, .. } => 0x09,
            MultinameInfo::Multiname { attribute: true, .. } => 0x0e,
            MultinameInfo::MultinameL { attribute: false, .. } => 0x1b,
            MultinameInfo::MultinameL { attribute: true, .. } => 0x1c,
            MultinameInfo::TypeName { .. } => 0x1d,
        }
    }

    pub fn is_attribute(&self) -> bool {
        match self {
            MultinameInfo::QName { attribute, .. }
            | MultinameInfo::RtqName { attribute, .. }
            | MultinameInfo::RtqNameL { attribute }
            | MultinameInfo::Multiname { attribute, .. }
            | MultinameInfo::MultinameL { attribute, .. } => *attribute,
            MultinameInfo::TypeName { .. } => false,
        }
    }

    /// Operands this kind pops at run time: (name, namespace)
    pub fn runtime_operands(&self) -> (bool, bool) {
        match self {
            MultinameInfo::RtqName { .. } => (false, true),
            MultinameInfo::RtqNameL { .. } => (true, true),
            MultinameInfo::MultinameL { .. } => (true, false),
            _ => (false, false),
        }
    }

    fn read(r: &mut AbcReader<'_>) -> VmResult<Self> {
        let kind = r.read_u8()?;
        Ok(match kind {
            0x07 | 0x0d => MultinameInfo::QName {
                ns: r.read_u30()?,
                name: r.read_u30()?,
                attribute: kind == 0x0d,
            },
            0x0f | 0x10 => MultinameInfo::RtqName {
                name: r.read_u30()?,
                attribute: kind == 0x10,
            },
            0x11 | 0x12 => MultinameInfo::RtqNameL {
                attribute: kind == 0x12,
            },
            0x09 | 0x0e => MultinameInfo::Multiname {
                name: r.read_u30()?,
                ns_set: r.read_u30()?,
                attribute: kind == 0x0e,
            },
            0x1b | 0x1c => MultinameInfo::MultinameL {
                ns_set: r.read_u30()?,
                attribute: kind == 0x1c,
            },
            0x1d => {
                let definition = r.read_u30()?;
                let count = r.read_u30()?;
                let mut params = Vec::with_capacity(count.min(16) as usize);
                for _ in 0..count {
                    params.push(r.read_u30()?);
                }
                MultinameInfo::TypeName { definition, params }
            }
            other => return Err(corrupt(format!("Unknown multiname kind 0x{:02x}", other))),
        })
    }

    fn write(&self, w: &mut AbcWriter) {
        w.write_u8(self.kind_byte());
        match self {
            MultinameInfo::QName { ns, name, .. } => {
                w.write_u30(*ns);
                w.write_u30(*name);
            }
            MultinameInfo::RtqName { name, .. } => w.write_u30(*name),
            MultinameInfo::RtqNameL { .. } => {}
            MultinameInfo::Multiname { ns_set, name, .. } => {
                w.write_u30(*name);
                w.write_u30(*ns_set);
            }
            MultinameInfo::MultinameL { ns_set, .. } => w.write_u30(*ns_set),
            MultinameInfo::TypeName { definition, params } => {
                w.write_u30(*definition);
                w.write_u30(params.len() as u32);
                for p in params {
                    w.write_u30(*p);
                }
            }
        }
    }
}

/// Kind tag of a constant reference (trait values and optional parameters)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConstantKind {
    Undefined,
    Utf8,
    Int,
    UInt,
    Double,
    False,
    True,
    Null,
    Namespace(NamespaceKind),
}

impl ConstantKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => ConstantKind::Undefined,
            0x01 => ConstantKind::Utf8,
            0x03 => ConstantKind::Int,
            0x04 => ConstantKind::UInt,
            0x06 => ConstantKind::Double,
            0x0a => ConstantKind::False,
            0x0b => ConstantKind::True,
            0x0c => ConstantKind::Null,
            other => ConstantKind::Namespace(NamespaceKind::from_byte(other)?),
        })
    }

    pub fn as_byte(self) -> u8 {
        match self {
            ConstantKind::Undefined => 0x00,
            ConstantKind::Utf8 => 0x01,
            ConstantKind::Int => 0x03,
            ConstantKind::UInt => 0x04,
            ConstantKind::Double => 0x06,
            ConstantKind::False => 0x0a,
            ConstantKind::True => 0x0b,
            ConstantKind::Null => 0x0c,
            ConstantKind::Namespace(kind) => kind.as_byte(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstantPool {
    pub ints: Vec<i32>,
    pub uints: Vec<u32>,
    pub doubles: Vec<f64>,
    pub strings: Vec<String>,
    pub namespaces: Vec<NamespaceInfo>,
    pub ns_sets: Vec<NsSetInfo>,
    pub multinames: Vec<MultinameInfo>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self {
            ints: vec![0],
            uints: vec![0],
            doubles: vec![f64::NAN],
            strings: vec![String::new()],
            namespaces: vec![NamespaceInfo {
                kind: NamespaceKind::Namespace,
                name: 0,
            }],
            ns_sets: vec![NsSetInfo::default()],
            multinames: vec![MultinameInfo::QName {
                ns: 0,
                name: 0,
                attribute: false,
            }],
        }
    }
}

/// Reads `count - 1` entries; a stored count of 0 means the space is empty
fn read_space<T>(
    r: &mut AbcReader<'_>,
    out: &mut Vec<T>,
    mut read: impl FnMut(&mut AbcReader<'_>) -> VmResult<T>,
) -> VmResult<()> {
    let count = r.read_u30()?;
    for _ in 1..count.max(1) {
        out.push(read(r)?);
    }
    Ok(())
}

fn write_space<T>(w: &mut AbcWriter, items: &[T], mut write: impl FnMut(&mut AbcWriter, &T)) {
    // Slot 0 is never written
    let count = if items.len() <= 1 { 0 } else { items.len() as u32 };
    w.write_u30(count);
    for item in items.iter().skip(1) {
        write(w, item);
    }
}

impl ConstantPool {
    pub fn read(r: &mut AbcReader<'_>) -> VmResult<Self> {
        let mut pool = ConstantPool::default();
        read_space(r, &mut pool.ints, |r| Ok(r.read_s32()?))?;
        read_space(r, &mut pool.uints, |r| Ok(r.read_u32()?))?;
        read_space(r, &mut pool.doubles, |r| Ok(r.read_d64()?))?;
        read_space(r, &mut pool.strings, |r| Ok(r.read_string()?))?;
        read_space(r, &mut pool.namespaces, |r| {
            let byte = r.read_u8()?;
            let kind = NamespaceKind::from_byte(byte)
                .ok_or_else(|| corrupt(format!("Unknown namespace kind 0x{:02x}", byte)))?;
            Ok(NamespaceInfo {
                kind,
                name: r.read_u30()?,
            })
        })?;
        read_space(r, &mut pool.ns_sets, |r| {
            let count = r.read_u30()?;
            let mut namespaces = Vec::with_capacity(count.min(64) as usize);
            for _ in 0..count {
                namespaces.push(r.read_u30()?);
            }
            Ok(NsSetInfo { namespaces })
        })?;
        read_space(r, &mut pool.multinames, MultinameInfo::read)?;
        pool.validate()?;
        Ok(pool)
    }

    pub fn write(&self, w: &mut AbcWriter) {
        write_space(w, &self.ints, |w, v| w.write_s32(*v));
        write_space(w, &self.uints, |w, v| w.write_u32(*v));
        write_space(w, &self.doubles, |w, v| w.write_d64(*v));
        write_space(w, &self.strings, |w, v| w.write_string(v));
        write_space(w, &self.namespaces, |w, ns| {
            w.write_u8(ns.kind.as_byte());
            w.write_u30(ns.name);
        });
        write_space(w, &self.ns_sets, |w, set| {
            w.write_u30(set.namespaces.len() as u32);
            for ns in &set.namespaces {
                w.write_u30(*ns);
            }
        });
        write_space(w, &self.multinames, |w, m| m.write(w));
    }

    /// Cross-reference checks between the index spaces
    fn validate(&self) -> VmResult<()> {
        for (i, ns) in self.namespaces.iter().enumerate().skip(1) {
            self.check_string(ns.name, "namespace name")
                .map_err(|e| corrupt(format!("{} (namespace {})", e.message, i)))?;
        }
        for (i, set) in self.ns_sets.iter().enumerate().skip(1) {
            for ns in &set.namespaces {
                if *ns == 0 || *ns as usize >= self.namespaces.len() {
                    return Err(corrupt(format!(
                        "Namespace set {} references namespace {} out of range",
                        i, ns
                    )));
                }
            }
        }
        for (i, m) in self.multinames.iter().enumerate().skip(1) {
            let checked = match m {
                MultinameInfo::QName { ns, name, .. } => self
                    .check_namespace(*ns)
                    .and_then(|_| self.check_string(*name, "name")),
                MultinameInfo::RtqName { name, .. } => self.check_string(*name, "name"),
                MultinameInfo::RtqNameL { .. } => Ok(()),
                MultinameInfo::Multiname { ns_set, name, .. } => self
                    .check_ns_set(*ns_set)
                    .and_then(|_| self.check_string(*name, "name")),
                MultinameInfo::MultinameL { ns_set, .. } => self.check_ns_set(*ns_set),
                MultinameInfo::TypeName { definition, params } => {
                    let mut result = self.check_multiname(*definition);
                    for p in params {
                        result = result.and_then(|_| self.check_multiname(*p));
                    }
                    result
                }
            };
            checked.map_err(|e| corrupt(format!("{} (multiname {})", e.message, i)))?;
        }
        Ok(())
    }

    pub fn check_string(&self, index: u32, what: &str) -> VmResult<()> {
        if (index as usize) < self.strings.len() {
            Ok(())
        } else {
            Err(corrupt(format!("String index {} out of range for {}", index, what)))
        }
    }

    pub fn check_namespace(&self, index: u32) -> VmResult<()> {
        if (index as usize) < self.namespaces.len() {
            Ok(())
        } else {
            Err(corrupt(format!("Namespace index {} out of range", index)))
        }
    }

    pub fn check_ns_set(&self, index: u32) -> VmResult<()> {
        if index != 0 && (index as usize) < self.ns_sets.len() {
            Ok(())
        } else {
            Err(corrupt(format!("Namespace set index {} out of range", index)))
        }
    }

    pub fn check_multiname(&self, index: u32) -> VmResult<()> {
        if (index as usize) < self.multinames.len() {
            Ok(())
        } else {
            Err(corrupt(format!("Multiname index {} out of range", index)))
        }
    }

    /// Checks a (kind, index) constant reference
    pub fn check_constant(&self, kind: ConstantKind, index: u32) -> VmResult<()> {
        let i = index as usize;
        let in_range = match kind {
            ConstantKind::Int => i < self.ints.len(),
            ConstantKind::UInt => i < self.uints.len(),
            ConstantKind::Double => i < self.doubles.len(),
            ConstantKind::Utf8 => i < self.strings.len(),
            ConstantKind::Namespace(_) => i < self.namespaces.len(),
            _ => true,
        };
        if in_range {
            Ok(())
        } else {
            Err(corrupt(format!("Constant {:?} index {} out of range", kind, index)))
        }
    }

    pub fn string(&self, index: u32) -> &str {
        self.strings.get(index as usize).map(String::as_str).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(pool: &ConstantPool) -> ConstantPool {
        let mut w = AbcWriter::new();
        pool.write(&mut w);
        let bytes = w.into_bytes();
        let mut r = AbcReader::new(&bytes);
        let back = ConstantPool::read(&mut r).unwrap();
        assert!(r.is_empty());
        back
    }

    #[test]
    fn test_empty_pool() {
        let back = round_trip(&ConstantPool::default());
        assert_eq!(back.ints, vec![0]);
        assert_eq!(back.strings, vec![String::new()]);
        assert_eq!(back.multinames.len(), 1);
    }

    #[test]
    fn test_pool_round_trip() {
        let mut pool = ConstantPool::default();
        pool.ints.push(-7);
        pool.uints.push(4_000_000_000);
        pool.doubles.push(2.5);
        pool.strings.push("flash.display".into());
        pool.strings.push("Sprite".into());
        pool.namespaces.push(NamespaceInfo {
            kind: NamespaceKind::Package,
            name: 1,
        });
        pool.ns_sets.push(NsSetInfo {
            namespaces: vec![1],
        });
        pool.multinames.push(MultinameInfo::QName {
            ns: 1,
            name: 2,
            attribute: false,
        });
        pool.multinames.push(MultinameInfo::MultinameL {
            ns_set: 1,
            attribute: false,
        });
        pool.multinames.push(MultinameInfo::TypeName {
            definition: 1,
            params: vec![1],
        });
        let back = round_trip(&pool);
        assert_eq!(back.ints, pool.ints);
        assert_eq!(back.uints, pool.uints);
        assert_eq!(back.strings, pool.strings);
        assert_eq!(back.namespaces, pool.namespaces);
        assert_eq!(back.ns_sets, pool.ns_sets);
        assert_eq!(back.multinames, pool.multinames);
    }

    #[test]
    fn test_out_of_range_namespace_is_corrupt() {
        let mut pool = ConstantPool::default();
        pool.multinames.push(MultinameInfo::QName {
            ns: 9,
            name: 0,
            attribute: false,
        });
        let mut w = AbcWriter::new();
        pool.write(&mut w);
        let bytes = w.into_bytes();
        let err = ConstantPool::read(&mut AbcReader::new(&bytes)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::CorruptAbc);
    }

    #[test]
    fn test_unknown_multiname_kind() {
        // six empty spaces, one multiname of kind 0x42
        let bytes = [0, 0, 0, 0, 0, 0, 2, 0x42];
        let err = ConstantPool::read(&mut AbcReader::new(&bytes)).unwrap_err();
        assert!(err.message.contains("0x42"));
    }

    #[test]
    fn test_runtime_operands() {
        assert_eq!(
            MultinameInfo::RtqNameL { attribute: false }.runtime_operands(),
            (true, true)
        );
        assert_eq!(
            MultinameInfo::MultinameL {
                ns_set: 1,
                attribute: false
            }
            .runtime_operands(),
            (true, false)
        );
    }
}
