// Method compiler - bytecode to a pre-decoded instruction table

use log::debug;

use crate::abc::opcode::{self, Instr};
use crate::abc::MethodBody;
use crate::error::{corrupt, VmResult};
use crate::vm::interpreter::CodeSource;

/// A method body decoded once, indexed by byte offset
pub struct CompiledMethod {
    /// Instruction starting at each offset, with the offset of the next one
    table: Vec<Option<(Instr, usize)>>,
}

impl CompiledMethod {
    pub fn instruction_count(&self) -> usize {
        self.table.iter().filter(|e| e.is_some()).count()
    }
}

impl CodeSource for CompiledMethod {
    fn fetch(&self, pc: usize) -> VmResult<(Instr, usize)> {
        match self.table.get(pc) {
            Some(Some(entry)) => Ok(entry.clone()),
            Some(None) => Err(corrupt(format!("Offset {} is not an instruction boundary", pc))),
            None => Err(corrupt(format!("Execution ran past the end of the method at {}", pc))),
        }
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}

/// Decode every instruction of `body` and check that all branch and handler
/// targets land on instruction boundaries
pub fn compile_body(name: &str, body: &MethodBody) -> VmResult<CompiledMethod> {
    let code = &body.code;
    let mut table: Vec<Option<(Instr, usize)>> = vec![None; code.len()];
    let mut targets = Vec::new();

    let mut pc = 0;
    while pc < code.len() {
        let (instr, next) = opcode::decode(code, pc)?;
        targets.extend(instr.branch_targets(pc, next));
        table[pc] = Some((instr, next));
        pc = next;
    }
    targets.extend(body.exceptions.iter().map(|e| e.target as i64));

    for target in targets {
        let ok = target >= 0 && table.get(target as usize).is_some_and(|e| e.is_some());
        if !ok {
            return Err(corrupt(format!("{}: branch target {} is not an instruction", name, target)));
        }
    }

    let compiled = CompiledMethod { table };
    debug!("Compiled {} ({} instructions)", name, compiled.instruction_count());
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::testing::Asm;

    fn body(code: Vec<u8>) -> MethodBody {
        MethodBody {
            method: 0,
            max_stack: 4,
            local_count: 2,
            init_scope_depth: 0,
            max_scope_depth: 1,
            code,
            exceptions: Vec::new(),
            traits: Vec::new(),
        }
    }

    #[test]
    fn test_table_matches_decoder() {
        let code = Asm::new()
            .op(0x24)
            .u8(3)
            .branch(0x10, "end")
            .op(0x02)
            .label("end")
            .op(0x48)
            .finish();
        let compiled = compile_body("f", &body(code.clone())).unwrap();
        assert_eq!(compiled.instruction_count(), 4);
        let mut pc = 0;
        while pc < code.len() {
            let expected = opcode::decode(&code, pc).unwrap();
            assert_eq!(compiled.fetch(pc).unwrap(), expected);
            pc = expected.1;
        }
        assert!(compiled.fetch(1).is_err());
    }

    #[test]
    fn test_branch_into_operand_rejected() {
        // jump lands inside the pushbyte operand
        let code = vec![0x10, 0x01, 0x00, 0x00, 0x24, 0x05, 0x48];
        assert!(compile_body("f", &body(code)).is_err());
    }
}
