// Call frames
// A frame exclusively owns its locals, operand stack and local scope stack

use std::sync::Arc;

use log::warn;

use super::context::AbcContext;
use super::value::{FunctionRef, Value};
use crate::abc::MethodBody;
use crate::error::{corrupt, runtime_error, ErrorKind, VmError, VmResult};

#[derive(Debug, Clone)]
pub struct ScopeEntry {
    pub value: Value,
    /// Pushed by `pushwith`
    pub with: bool,
}

pub struct CallFrame<'a> {
    pub function: &'a FunctionRef,
    pub context: &'a Arc<AbcContext>,
    pub body: &'a MethodBody,
    pub locals: Vec<Value>,
    pub stack: Vec<Value>,
    pub scope_stack: Vec<ScopeEntry>,
    /// Offset of the instruction being executed
    pub pc: usize,
}

impl<'a> CallFrame<'a> {
    pub fn new(
        function: &'a FunctionRef,
        context: &'a Arc<AbcContext>,
        body: &'a MethodBody,
        locals: Vec<Value>,
    ) -> Self {
        Self {
            function,
            context,
            body,
            locals,
            stack: Vec::with_capacity(body.max_stack as usize),
            scope_stack: Vec::with_capacity(body.max_scope_depth as usize),
            pc: 0,
        }
    }

    pub fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() >= self.body.max_stack as usize {
            return Err(VmError::new(
                ErrorKind::StackOverflow,
                format!(
                    "Operand stack of {} exceeds max_stack {}",
                    self.function.name, self.body.max_stack
                ),
            ));
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or_else(|| {
            VmError::new(
                ErrorKind::EmptyStack,
                format!("Pop from empty operand stack in {}", self.function.name),
            )
        })
    }

    /// Pop `n` values, returned in push order
    pub fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        if self.stack.len() < n {
            return Err(VmError::new(
                ErrorKind::EmptyStack,
                format!("{} operands wanted, {} on the stack", n, self.stack.len()),
            ));
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    pub fn peek(&self) -> VmResult<&Value> {
        self.stack
            .last()
            .ok_or_else(|| VmError::new(ErrorKind::EmptyStack, "Peek at empty operand stack"))
    }

    pub fn local(&self, index: u32) -> VmResult<Value> {
        self.locals
            .get(index as usize)
            .cloned()
            .ok_or_else(|| corrupt(format!("Local register {} out of range", index)))
    }

    pub fn set_local(&mut self, index: u32, value: Value) -> VmResult<()> {
        match self.locals.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(corrupt(format!("Local register {} out of range", index))),
        }
    }

    pub fn push_scope(&mut self, value: Value, with: bool) {
        self.scope_stack.push(ScopeEntry { value, with });
    }

    pub fn pop_scope(&mut self) -> VmResult<ScopeEntry> {
        self.scope_stack
            .pop()
            .ok_or_else(|| runtime_error("popscope on an empty scope stack"))
    }

    /// Closure scope followed by the local scope stack, innermost last
    pub fn scope_chain(&self) -> Vec<Value> {
        let closure = &self.function.closure.scope;
        let mut chain = Vec::with_capacity(closure.len() + self.scope_stack.len());
        chain.extend(closure.iter().cloned());
        chain.extend(self.scope_stack.iter().map(|s| s.value.clone()));
        chain
    }

    pub fn captured_scope(&self) -> Arc<[Value]> {
        Arc::from(self.scope_chain())
    }

    /// Outermost scope object, normally the global object
    pub fn global_scope(&self) -> Option<Value> {
        self.function
            .closure
            .scope
            .first()
            .cloned()
            .or_else(|| self.scope_stack.first().map(|s| s.value.clone()))
    }

    /// Enter a catch block: drop operands and local scopes, then push the error
    pub fn enter_handler(&mut self, target: usize, error: Value) {
        self.stack.clear();
        self.scope_stack.clear();
        self.stack.push(error);
        self.pc = target;
    }

    /// Report operands still on the stack at return
    pub fn check_clean(&self) {
        if !self.stack.is_empty() {
            warn!(
                "{} values left on the operand stack of {}",
                self.stack.len(),
                self.function.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::load;
    use crate::abc::testing::AbcBuilder;
    use crate::vm::function::{Closure, Function, MethodHandle};
    use crate::vm::interner::intern;
    use crate::vm::object::ScriptObject;

    fn fixture() -> (Arc<AbcContext>, FunctionRef) {
        let mut b = AbcBuilder::new();
        let m = b.method(0, &[0x47]);
        b.body_mut(m).max_stack = 2;
        b.script(m, vec![]);
        let ctx = AbcContext::new(load(&b.bytes()).unwrap(), "t");
        let f = Function::synthetic(intern("f"), MethodHandle::new(ctx.clone(), m), Closure::default());
        (ctx, f)
    }

    #[test]
    fn test_push_limits() {
        let (ctx, f) = fixture();
        let body = ctx.body(0).unwrap();
        let mut frame = CallFrame::new(&f, &ctx, body, vec![Value::Undefined; 4]);
        frame.push(Value::Integer(1)).unwrap();
        frame.push(Value::Integer(2)).unwrap();
        let err = frame.push(Value::Integer(3)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StackOverflow);
        assert_eq!(frame.pop_n(2).unwrap().len(), 2);
        assert_eq!(frame.pop().unwrap_err().kind, ErrorKind::EmptyStack);
    }

    #[test]
    fn test_frame_releases_values_once() {
        let (ctx, f) = fixture();
        let body = ctx.body(0).unwrap();
        let object = Arc::new(parking_lot::Mutex::new(ScriptObject::new(None)));
        {
            let mut frame = CallFrame::new(&f, &ctx, body, vec![Value::Object(object.clone())]);
            frame.push(Value::Object(object.clone())).unwrap();
            frame.push_scope(Value::Object(object.clone()), false);
            assert_eq!(Arc::strong_count(&object), 4);
            frame.enter_handler(0, Value::Null);
            assert_eq!(Arc::strong_count(&object), 2);
        }
        assert_eq!(Arc::strong_count(&object), 1);
    }
}
