//! Operand stack and local variables of one executing method.

use crate::{
    runtime::{ObjectRef, Value},
    Error, Result,
};

/// Operand stack and locals of an interpreted frame.
///
/// `long` and `double` occupy one operand stack entry but two local slots; the
/// upper slot holds [`Value::Void`]. Stack manipulation instructions that care
/// about value categories count words, not entries.
#[derive(Debug)]
pub(crate) struct FrameState {
    stack: Vec<Value>,
    locals: Vec<Value>,
}

impl FrameState {
    /// Creates a frame whose locals start with `args`.
    pub(crate) fn new(max_locals: usize, args: Vec<Value>) -> Self {
        let mut locals = Vec::with_capacity(max_locals.max(args.len() * 2));
        for arg in args {
            let wide = arg.is_wide();
            locals.push(arg);
            if wide {
                locals.push(Value::Void);
            }
        }
        if locals.len() < max_locals {
            locals.resize(max_locals, Value::Void);
        }
        FrameState {
            stack: Vec::with_capacity(8),
            locals,
        }
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| Error::Linkage("operand stack underflow".into()))
    }

    pub(crate) fn pop_int(&mut self) -> Result<i32> {
        self.pop()?.as_int()
    }

    pub(crate) fn pop_long(&mut self) -> Result<i64> {
        self.pop()?.as_long()
    }

    pub(crate) fn pop_float(&mut self) -> Result<f32> {
        self.pop()?.as_float()
    }

    pub(crate) fn pop_double(&mut self) -> Result<f64> {
        self.pop()?.as_double()
    }

    pub(crate) fn pop_ref(&mut self) -> Result<Option<ObjectRef>> {
        Ok(self.pop()?.as_ref()?.cloned())
    }

    /// Pops `count` entries, returning them in push order.
    pub(crate) fn pop_n(&mut self, count: usize) -> Result<Vec<Value>> {
        if self.stack.len() < count {
            return Err(Error::Linkage("operand stack underflow".into()));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    pub(crate) fn clear_stack(&mut self) {
        self.stack.clear();
    }

    pub(crate) fn load(&self, index: u16) -> Result<Value> {
        self.locals
            .get(usize::from(index))
            .cloned()
            .ok_or_else(|| Error::Linkage(format!("local {index} out of range")))
    }

    pub(crate) fn store(&mut self, index: u16, value: Value) -> Result<()> {
        let index = usize::from(index);
        let needed = index + if value.is_wide() { 2 } else { 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, Value::Void);
        }
        if value.is_wide() {
            self.locals[index + 1] = Value::Void;
        }
        self.locals[index] = value;
        Ok(())
    }

    /// Number of entries that make up the top `words` words below the top `skip` entries.
    fn entries_for_words(&self, skip: usize, words: usize) -> Result<usize> {
        let mut counted = 0;
        let mut entries = 0;
        while counted < words {
            let position = self
                .stack
                .len()
                .checked_sub(skip + entries + 1)
                .ok_or_else(|| Error::Linkage("operand stack underflow".into()))?;
            counted += if self.stack[position].is_wide() { 2 } else { 1 };
            entries += 1;
        }
        if counted != words {
            return Err(Error::Linkage("stack operation splits a wide value".into()));
        }
        Ok(entries)
    }

    /// The `dup` family: duplicates the top `top_words` words and inserts the copy
    /// below the next `under_words` words.
    pub(crate) fn dup(&mut self, top_words: usize, under_words: usize) -> Result<()> {
        let top = self.entries_for_words(0, top_words)?;
        let under = if under_words == 0 {
            0
        } else {
            self.entries_for_words(top, under_words)?
        };
        let len = self.stack.len();
        let copy: Vec<Value> = self.stack[len - top..].to_vec();
        let at = len - top - under;
        self.stack.splice(at..at, copy);
        Ok(())
    }

    /// `pop` (1 word) or `pop2` (2 words).
    pub(crate) fn pop_words(&mut self, words: usize) -> Result<()> {
        let entries = self.entries_for_words(0, words)?;
        self.stack.truncate(self.stack.len() - entries);
        Ok(())
    }

    pub(crate) fn swap(&mut self) -> Result<()> {
        let len = self.stack.len();
        if len < 2 {
            return Err(Error::Linkage("operand stack underflow".into()));
        }
        self.stack.swap(len - 1, len - 2);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(state: &FrameState) -> Vec<String> {
        state.stack.iter().map(|v| format!("{v:?}")).collect()
    }

    #[test]
    fn test_wide_arguments_take_two_slots() {
        let state = FrameState::new(4, vec![Value::Long(5), Value::Int(1)]);
        assert!(matches!(state.load(0).unwrap(), Value::Long(5)));
        assert!(matches!(state.load(1).unwrap(), Value::Void));
        assert!(matches!(state.load(2).unwrap(), Value::Int(1)));
    }

    #[test]
    fn test_dup_forms() {
        let mut state = FrameState::new(0, vec![]);
        state.push(Value::Int(1));
        state.push(Value::Int(2));
        state.dup(1, 1).unwrap();
        assert_eq!(ints(&state), ["2", "1", "2"]);

        let mut state = FrameState::new(0, vec![]);
        state.push(Value::Int(1));
        state.push(Value::Long(9));
        state.dup(2, 1).unwrap();
        assert_eq!(ints(&state), ["9L", "1", "9L"]);

        let mut state = FrameState::new(0, vec![]);
        state.push(Value::Int(1));
        state.push(Value::Int(2));
        state.dup(2, 0).unwrap();
        assert_eq!(ints(&state), ["1", "2", "1", "2"]);
    }

    #[test]
    fn test_pop2_of_category_one_values() {
        let mut state = FrameState::new(0, vec![]);
        state.push(Value::Int(1));
        state.push(Value::Int(2));
        state.push(Value::Int(3));
        state.pop_words(2).unwrap();
        assert_eq!(ints(&state), ["1"]);
        assert!(state.pop_words(2).is_err());
    }
}
