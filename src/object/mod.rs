//! The heap: every object the VM allocates, and the tracing collector that
//! owns them.
//!
//! A C-style interpreter threads every live object into one intrusive linked
//! list (`Obj::next`) so sweep can walk it without a separate bookkeeping
//! structure. Safe Rust has no good way to build that list through the
//! objects themselves, so `Heap` instead holds a flat arena (`Vec<Slot>`)
//! addressed by `ObjRef` handles — sweep still walks one flat structure, it's
//! just indices instead of pointers.

use std::collections::HashMap;

use crate::common::chunk::Chunk;
use crate::common::frame::Frame;
use crate::common::value::Value;
use crate::scanner::TokenKind;

/// A handle to a heap-allocated object. `Copy`, small, and stable for the
/// lifetime of the object (slots are never moved, only freed and reused).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub u32);

#[derive(Debug, Clone)]
pub struct LString {
    pub chars: String,
}

#[derive(Debug, Clone)]
pub struct LSymbol {
    pub chars: String,
    pub kind: TokenKind,
    pub line: i32,
    pub column: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct Cons {
    pub car: Value,
    pub cdr: Value,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Chunk,
    pub id: u64,
    pub name: Option<ObjRef>,
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

#[derive(Debug, Clone, Copy)]
pub enum UpvalueLoc {
    /// Points at stack index `usize` — still live on the VM's value stack.
    Open(usize),
    /// The variable's slot has been popped; its last value lives here.
    Closed(Value),
}

#[derive(Debug, Clone)]
pub struct Upvalue {
    pub loc: UpvalueLoc,
    pub next_open: Option<ObjRef>,
}

pub type PrimitiveFn = fn(&mut crate::vm::VM, &[Value]) -> Result<Value, String>;

#[derive(Clone, Copy)]
pub struct Primitive {
    pub name: &'static str,
    pub func: PrimitiveFn,
}

impl std::fmt::Debug for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Primitive({})", self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Continuation {
    pub stack: Vec<Value>,
    pub frames: Vec<Frame>,
    pub open_upvalues: Option<ObjRef>,
}

/// The tagged union of everything that can live on the heap.
#[derive(Debug, Clone)]
pub enum Obj {
    String(LString),
    Symbol(LSymbol),
    Cons(Cons),
    Function(Function),
    Closure(Closure),
    Upvalue(Upvalue),
    Primitive(Primitive),
    Continuation(Continuation),
}

impl Obj {
    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Symbol(_) => "symbol",
            Obj::Cons(_) => "cons",
            Obj::Function(_) => "function",
            Obj::Closure(_) => "closure",
            Obj::Upvalue(_) => "upvalue",
            Obj::Primitive(_) => "primitive",
            Obj::Continuation(_) => "continuation",
        }
    }
}

struct Slot {
    obj: Obj,
    marked: bool,
    size: usize,
}

/// The allocator and tracing garbage collector. Every object the pipeline
/// ever creates — including compile-time reified `quote` data — lives here.
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    strings: HashMap<String, ObjRef>,
    symbols: HashMap<String, ObjRef>,
    gray: Vec<ObjRef>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub stress: bool,
    next_function_id: u64,
}

/// A program starts collecting once past 1 MiB of live objects; chosen to be
/// large enough that short scripts and the whole test suite never trigger a
/// cycle unless `stress` mode asks for one.
const INITIAL_NEXT_GC: usize = 1024 * 1024;
const GC_HEAP_GROW_FACTOR: usize = 2;

impl Heap {
    pub fn new() -> Heap {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            strings: HashMap::new(),
            symbols: HashMap::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
            stress: false,
            next_function_id: 0,
        }
    }

    fn alloc(&mut self, obj: Obj, size: usize) -> ObjRef {
        self.bytes_allocated += size;
        let slot = Slot { obj, marked: false, size };
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(slot);
            ObjRef(index)
        } else {
            self.slots.push(Some(slot));
            ObjRef((self.slots.len() - 1) as u32)
        }
    }

    pub fn get(&self, r: ObjRef) -> &Obj {
        &self.slots[r.0 as usize].as_ref().expect("dangling ObjRef").obj
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        &mut self.slots[r.0 as usize].as_mut().expect("dangling ObjRef").obj
    }

    /// Interns a string, returning the existing object if one with the same
    /// contents is already live. Two strings with equal bytes always share
    /// an `ObjRef` afterwards, so `Value` equality on strings is identity
    /// equality, matching spec `Eq`: content-unique.
    pub fn intern_string(&mut self, chars: &str) -> ObjRef {
        if let Some(&r) = self.strings.get(chars) {
            return r;
        }
        let size = std::mem::size_of::<LString>() + chars.len();
        let r = self.alloc(Obj::String(LString { chars: chars.to_string() }), size);
        self.strings.insert(chars.to_string(), r);
        r
    }

    /// Interns a symbol by name, the same way `intern_string` interns
    /// strings: two symbols with equal names always share an `ObjRef`
    /// afterwards, so `Value` equality on symbols is identity equality.
    /// `kind`/`line`/`column` are only recorded on the first intern of a
    /// given name.
    pub fn new_symbol(&mut self, chars: &str, kind: TokenKind, line: i32, column: i32) -> ObjRef {
        if let Some(&r) = self.symbols.get(chars) {
            return r;
        }
        let size = std::mem::size_of::<LSymbol>() + chars.len();
        let r = self.alloc(
            Obj::Symbol(LSymbol { chars: chars.to_string(), kind, line, column }),
            size,
        );
        self.symbols.insert(chars.to_string(), r);
        r
    }

    pub fn new_cons(&mut self, car: Value, cdr: Value) -> ObjRef {
        self.alloc(Obj::Cons(Cons { car, cdr }), std::mem::size_of::<Cons>())
    }

    pub fn new_function(&mut self, arity: u8) -> ObjRef {
        let id = self.next_function_id;
        self.next_function_id += 1;
        let size = std::mem::size_of::<Function>();
        self.alloc(
            Obj::Function(Function { arity, upvalue_count: 0, chunk: Chunk::new(), id, name: None }),
            size,
        )
    }

    pub fn new_closure(&mut self, function: ObjRef, upvalues: Vec<ObjRef>) -> ObjRef {
        let size = std::mem::size_of::<Closure>() + upvalues.len() * std::mem::size_of::<ObjRef>();
        self.alloc(Obj::Closure(Closure { function, upvalues }), size)
    }

    pub fn new_upvalue(&mut self, loc: UpvalueLoc) -> ObjRef {
        self.alloc(Obj::Upvalue(Upvalue { loc, next_open: None }), std::mem::size_of::<Upvalue>())
    }

    pub fn new_primitive(&mut self, name: &'static str, func: PrimitiveFn) -> ObjRef {
        self.alloc(Obj::Primitive(Primitive { name, func }), std::mem::size_of::<Primitive>())
    }

    pub fn new_continuation(&mut self, stack: Vec<Value>, frames: Vec<Frame>, open_upvalues: Option<ObjRef>) -> ObjRef {
        let size = std::mem::size_of::<Continuation>()
            + stack.len() * std::mem::size_of::<Value>()
            + frames.len() * std::mem::size_of::<Frame>();
        self.alloc(Obj::Continuation(Continuation { stack, frames, open_upvalues }), size)
    }

    // --- GC ---------------------------------------------------------------

    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(r) = value {
            self.mark_object(r);
        }
    }

    pub fn mark_object(&mut self, r: ObjRef) {
        let Some(slot) = self.slots.get_mut(r.0 as usize).and_then(|s| s.as_mut()) else {
            return;
        };
        if slot.marked {
            return;
        }
        slot.marked = true;
        log::trace!("gc: mark {:?} ({})", r, slot.obj.type_name());
        self.gray.push(r);
    }

    fn blacken(&mut self, r: ObjRef) {
        // Clone the shallow outgoing-reference set before recursing, since
        // `mark_object` needs `&mut self` too.
        let refs: Vec<ObjRef> = match self.get(r) {
            Obj::Closure(c) => {
                let mut v = vec![c.function];
                v.extend(&c.upvalues);
                v
            }
            Obj::Function(f) => f.name.into_iter().collect(),
            Obj::Continuation(cont) => {
                let mut v: Vec<ObjRef> = cont.frames.iter().map(|fr| fr.closure).collect();
                v.extend(cont.open_upvalues);
                v
            }
            Obj::Cons(_) | Obj::Upvalue(_) | Obj::Primitive(_) | Obj::String(_) | Obj::Symbol(_) => Vec::new(),
        };
        for sub in refs {
            self.mark_object(sub);
        }

        // Values embedded directly (constants, closed upvalues, cons cells)
        // need to mark through `Value`, not just `ObjRef`, so handle them
        // separately from the object-only refs above.
        match self.get(r).clone() {
            Obj::Function(f) => {
                for c in f.chunk.constants {
                    self.mark_value(c);
                }
            }
            Obj::Upvalue(u) => {
                if let UpvalueLoc::Closed(v) = u.loc {
                    self.mark_value(v);
                }
            }
            Obj::Cons(c) => {
                self.mark_value(c.car);
                self.mark_value(c.cdr);
            }
            Obj::Continuation(cont) => {
                for v in cont.stack {
                    self.mark_value(v);
                }
            }
            _ => {}
        }
    }

    fn trace_references(&mut self) {
        while let Some(r) = self.gray.pop() {
            self.blacken(r);
        }
    }

    fn sweep(&mut self) {
        for index in 0..self.slots.len() {
            let free_this = match &mut self.slots[index] {
                Some(slot) if slot.marked => {
                    slot.marked = false;
                    false
                }
                Some(_) => true,
                None => false,
            };
            if free_this {
                let slot = self.slots[index].take().unwrap();
                self.bytes_allocated -= slot.size;
                match &slot.obj {
                    Obj::String(s) => {
                        self.strings.remove(&s.chars);
                    }
                    Obj::Symbol(s) => {
                        self.symbols.remove(&s.chars);
                    }
                    _ => {}
                }
                log::trace!("gc: free slot {} ({})", index, slot.obj.type_name());
                self.free.push(index as u32);
            }
        }
    }

    /// Runs one full mark-sweep cycle. `roots` is every `Value` directly
    /// reachable from the VM (stack, globals) or compiler (in-progress
    /// function constants); callers are responsible for assembling that set,
    /// since only they know their own root structures (frame arrays,
    /// open-upvalue chains, the environment stack).
    pub fn collect_garbage(&mut self, roots: impl IntoIterator<Item = Value>, object_roots: impl IntoIterator<Item = ObjRef>) {
        log::trace!("gc: begin ({} bytes live)", self.bytes_allocated);
        for v in roots {
            self.mark_value(v);
        }
        for r in object_roots {
            self.mark_object(r);
        }
        self.trace_references();
        self.sweep();
        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;
        log::trace!("gc: end ({} bytes live, next at {})", self.bytes_allocated, self.next_gc);
    }

    /// Renders a `Value` for `display`/`displayln`/the REPL, recursing
    /// through cons cells the way a Scheme printer would.
    pub fn display(&self, value: Value) -> String {
        match value {
            Value::Obj(r) => match self.get(r) {
                Obj::String(s) => s.chars.clone(),
                Obj::Symbol(s) => s.chars.clone(),
                Obj::Cons(_) => self.display_list(value),
                Obj::Function(f) => format!("#<procedure {}>", f.id),
                Obj::Closure(c) => {
                    let Obj::Function(f) = self.get(c.function) else { unreachable!() };
                    format!("#<procedure {}>", f.id)
                }
                Obj::Primitive(p) => format!("#<primitive {}>", p.name),
                Obj::Continuation(_) => "#<continuation>".to_string(),
                Obj::Upvalue(_) => "#<upvalue>".to_string(),
            },
            other => other.to_string(),
        }
    }

    fn display_list(&self, mut value: Value) -> String {
        let mut parts = Vec::new();
        loop {
            match value {
                Value::Obj(r) => match self.get(r) {
                    Obj::Cons(c) => {
                        parts.push(self.display(c.car));
                        value = c.cdr;
                    }
                    _ => {
                        parts.push(".".to_string());
                        parts.push(self.display(value));
                        break;
                    }
                },
                Value::Null => break,
                other => {
                    parts.push(".".to_string());
                    parts.push(self.display(other));
                    break;
                }
            }
        }
        format!("({})", parts.join(" "))
    }
}

impl Default for Heap {
    fn default() -> Heap {
        Heap::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interning_is_content_unique() {
        let mut heap = Heap::new();
        let a = heap.intern_string("hello");
        let b = heap.intern_string("hello");
        assert_eq!(a, b);
    }

    #[test]
    fn symbols_intern_by_name_like_strings_do() {
        let mut heap = Heap::new();
        let a = heap.new_symbol("foo", TokenKind::Symbol, 1, 1);
        let b = heap.new_symbol("foo", TokenKind::Symbol, 2, 5);
        let c = heap.new_symbol("bar", TokenKind::Symbol, 1, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn unreachable_objects_are_swept() {
        let mut heap = Heap::new();
        let a = heap.new_cons(Value::Number(1.0), Value::Null);
        let before = heap.bytes_allocated;
        assert!(before > 0);
        drop(a);
        heap.collect_garbage(std::iter::empty(), std::iter::empty());
        assert_eq!(heap.bytes_allocated, 0);
    }

    #[test]
    fn reachable_objects_survive() {
        let mut heap = Heap::new();
        let a = heap.new_cons(Value::Number(1.0), Value::Null);
        heap.collect_garbage(vec![Value::Obj(a)], std::iter::empty());
        assert!(heap.bytes_allocated > 0);
        // a cycle is already fine via the mark bit, but a second collection
        // with the same root must still keep it alive (no premature free).
        heap.collect_garbage(vec![Value::Obj(a)], std::iter::empty());
        assert!(heap.bytes_allocated > 0);
    }

    #[test]
    fn cyclic_structures_are_collected_when_unreachable() {
        let mut heap = Heap::new();
        let a = heap.new_cons(Value::Null, Value::Null);
        let b = heap.new_cons(Value::Obj(a), Value::Null);
        if let Obj::Cons(c) = heap.get_mut(a) {
            c.cdr = Value::Obj(b);
        }
        heap.collect_garbage(std::iter::empty(), std::iter::empty());
        assert_eq!(heap.bytes_allocated, 0);
    }
}
