use std::collections::HashMap;

/// Maximum number of distinct global bindings a single `VM` can hold — bounded
/// by the width of the `u16` operand `OP_GET_GLOBAL`/`OP_SET_GLOBAL` address.
pub const GLOBALS_MAX: usize = u16::MAX as usize + 1;

/// The global symbol table: a fixed-capacity, interned mapping from symbol
/// name to a global slot, plus the side arrays of runtime values the VM
/// indexes by that slot. Slot assignment is append-only for the lifetime of
/// a `VM` — once a name is given a slot, that slot never moves, so bytecode
/// compiled against an earlier `interpret` call on the same `VM` stays valid
/// for a later one.
#[derive(Debug, Default)]
pub struct SymbolTable {
    slots: HashMap<String, u16>,
    names: Vec<String>,
    values: Vec<crate::common::value::Value>,
    defined: Vec<bool>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Looks up an existing slot for `name` without creating one. Used to
    /// resolve a bare variable reference; unresolved here falls through to a
    /// compile error at the use site.
    pub fn resolve(&self, name: &str) -> Option<u16> {
        self.slots.get(name).copied()
    }

    /// Returns the slot for `name`, allocating a new one if this is the
    /// first time it's been declared (by a top-level `define` or a forward
    /// reference resolved by the compiler). Errors once every slot in the
    /// `u16` address space is in use.
    pub fn declare(&mut self, name: &str) -> Result<u16, &'static str> {
        if let Some(&slot) = self.slots.get(name) {
            return Ok(slot);
        }
        if self.names.len() >= GLOBALS_MAX {
            return Err("too many global variables");
        }
        let slot = self.names.len() as u16;
        self.slots.insert(name.to_string(), slot);
        self.names.push(name.to_string());
        self.values.push(crate::common::value::Value::Void);
        self.defined.push(false);
        Ok(slot)
    }

    pub fn name(&self, slot: u16) -> &str {
        &self.names[slot as usize]
    }

    /// `None` means the slot exists (it was declared, e.g. by a forward
    /// reference) but no value has been assigned to it yet.
    pub fn get(&self, slot: u16) -> Option<crate::common::value::Value> {
        if self.defined[slot as usize] {
            Some(self.values[slot as usize])
        } else {
            None
        }
    }

    pub fn set(&mut self, slot: u16, value: crate::common::value::Value) {
        self.values[slot as usize] = value;
        self.defined[slot as usize] = true;
    }

    pub fn mark_roots(&self, heap: &mut crate::object::Heap) {
        for value in &self.values {
            heap.mark_value(*value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::value::Value;

    #[test]
    fn slots_are_append_only() {
        let mut table = SymbolTable::new();
        let a = table.declare("x").unwrap();
        let b = table.declare("y").unwrap();
        let a_again = table.declare("x").unwrap();
        assert_eq!(a, a_again);
        assert_ne!(a, b);
    }

    #[test]
    fn undeclared_global_is_undefined() {
        let mut table = SymbolTable::new();
        let slot = table.declare("x").unwrap();
        assert_eq!(table.get(slot), None);
        table.set(slot, Value::Number(1.0));
        assert_eq!(table.get(slot), Some(Value::Number(1.0)));
    }

    #[test]
    fn resolve_without_declaring_fails() {
        let table = SymbolTable::new();
        assert_eq!(table.resolve("nope"), None);
    }
}
