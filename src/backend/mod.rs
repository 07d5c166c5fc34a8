//! ARM backend: naive, non-optimizing codegen against a C runtime
//! (`printf`/`scanf`/`malloc`). Two passes: [`SymbolTable::build`] computes
//! field and stack layout, then [`emitter::emit_program`] walks each
//! method's flow graph and prints straight-line ARM text.

pub mod emitter;
pub mod flow;

use std::collections::HashMap;

use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::ir::{Ir3Program, Method3};
use crate::span::Position;
use crate::types::JLiteType;

/// Argument/variable registers available for naive allocation, in the
/// order they're handed out — also the hard cap on call arity (including
/// the implicit receiver).
pub const FUNCTION_REGS: &[&str] = &["a1", "a2", "a3", "a4", "v1", "v2", "v3", "v4", "v5", "v6", "v7"];

/// Bytes reserved at the bottom of every frame for `{fp, lr, v1..v5}`,
/// pushed by every prologue and popped by every epilogue. `add fp,sp,#24`
/// leaves `fp` four bytes short of the top of this block rather than past
/// it — a harmless naming quirk as long as every offset below is computed
/// relative to this same `fp`, which it is.
pub const SAVED_REGS_BYTES: i32 = 28;
pub const FP_DISPLACEMENT: i32 = 24;

#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub name: String,
    /// Field name, type, and its (already negative) offset from an object
    /// pointer: first field at 0, each subsequent field 4 bytes lower.
    pub fields: Vec<(String, JLiteType, i32)>,
    pub size_bytes: u32,
}

impl ClassInfo {
    pub fn field_offset(&self, name: &str) -> Option<i32> {
        self.fields.iter().find(|(n, _, _)| n == name).map(|(_, _, off)| *off)
    }

    pub fn field_type(&self, name: &str) -> Option<&JLiteType> {
        self.fields.iter().find(|(n, _, _)| n == name).map(|(_, ty, _)| ty)
    }
}

#[derive(Clone, Debug)]
pub struct StackSlot {
    pub ty: JLiteType,
    pub fp_offset: i32,
}

#[derive(Clone, Debug)]
pub struct MethodLayout {
    pub is_main: bool,
    pub has_receiver: bool,
    pub param_count: usize,
    pub return_ty: JLiteType,
    pub slots: HashMap<String, StackSlot>,
    pub frame_size: i32,
}

pub struct SymbolTable {
    pub classes: HashMap<String, ClassInfo>,
    pub methods: HashMap<String, MethodLayout>,
}

impl SymbolTable {
    pub fn build(program: &Ir3Program) -> Result<SymbolTable, Diagnostic> {
        let mut classes = HashMap::new();
        for class in &program.classes {
            let mut fields = Vec::with_capacity(class.fields.len());
            let mut offset = 0i32;
            for (name, ty) in &class.fields {
                fields.push((name.clone(), ty.clone(), offset));
                offset -= 4;
            }
            // An empty class would otherwise `malloc(0)`; every object gets
            // at least one word so its pointer is always a valid allocation.
            let size_bytes = (class.fields.len() as u32 * 4).max(4);
            classes.insert(class.name.clone(), ClassInfo { name: class.name.clone(), fields, size_bytes });
        }

        let mut methods = HashMap::new();
        for method in &program.methods {
            methods.insert(method.name.clone(), layout_method(method)?);
        }

        Ok(SymbolTable { classes, methods })
    }

    pub fn class(&self, name: &str) -> &ClassInfo {
        self.classes.get(name).expect("static checking guarantees every class name resolves")
    }

    pub fn method(&self, name: &str) -> &MethodLayout {
        self.methods.get(name).expect("every callee was lowered from the same program")
    }
}

fn layout_method(method: &Method3) -> Result<MethodLayout, Diagnostic> {
    let has_receiver = !method.is_main;
    let total_args = method.params.len() + has_receiver as usize;
    if total_args > FUNCTION_REGS.len() {
        return Err(Diagnostic::new(
            ErrorKind::NotImplemented,
            format!(
                "method '{}' takes {} argument(s) (including the receiver); at most {} are supported",
                method.name,
                total_args,
                FUNCTION_REGS.len()
            ),
            Position::dummy(),
        ));
    }

    let mut slots = HashMap::new();
    let mut offset = SAVED_REGS_BYTES;

    if has_receiver {
        let owner = method.owner_class.clone().expect("non-main methods are always lowered with an owner class");
        slots.insert("this".to_string(), StackSlot { ty: JLiteType::Class(owner), fp_offset: offset });
        offset += 4;
    }
    for (name, ty) in &method.params {
        slots.insert(name.clone(), StackSlot { ty: ty.clone(), fp_offset: offset });
        offset += 4;
    }
    for (name, ty) in &method.locals {
        slots.insert(name.clone(), StackSlot { ty: ty.clone(), fp_offset: offset });
        offset += 4;
    }

    Ok(MethodLayout {
        is_main: method.is_main,
        has_receiver,
        param_count: method.params.len(),
        return_ty: method.return_ty.clone(),
        slots,
        frame_size: offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker;
    use crate::ir::lower;
    use crate::lexer::Lexer;
    use crate::parser;
    use std::rc::Rc;

    fn build_table(src: &str) -> SymbolTable {
        let lexer = Lexer::new(src, "t.j");
        let tokens = lexer.tokenize().unwrap();
        let (_, mut program) = parser::parse(tokens, Rc::from("t.j")).unwrap();
        checker::check(&mut program).unwrap();
        let ir3 = lower::lower(&program).unwrap();
        SymbolTable::build(&ir3).unwrap()
    }

    #[test]
    fn test_empty_class_rounds_up_to_one_word() {
        let table = build_table("class Main { Void main() { println(1); } } class Empty {}");
        assert_eq!(table.class("Empty").size_bytes, 4);
    }

    #[test]
    fn test_field_offsets_descend_by_word() {
        let table = build_table("class Main { Void main() { println(1); } } class Pair { Int x; Int y; }");
        let pair = table.class("Pair");
        assert_eq!(pair.field_offset("x"), Some(0));
        assert_eq!(pair.field_offset("y"), Some(-4));
        assert_eq!(pair.size_bytes, 8);
    }

    #[test]
    fn test_receiver_slot_precedes_params_for_instance_methods() {
        let table = build_table(
            "class Main { Void main() { Foo f; f = new Foo(); f.set(1); } } \
             class Foo { Int x; Void set(Int v) { x = v; } }",
        );
        let layout = table.method("_Foo_set");
        assert!(layout.has_receiver);
        let this_offset = layout.slots.get("this").unwrap().fp_offset;
        let v_offset = layout.slots.get("v").unwrap().fp_offset;
        assert!(this_offset < v_offset);
        assert_eq!(this_offset, SAVED_REGS_BYTES);
    }

    #[test]
    fn test_main_has_no_receiver_slot() {
        let table = build_table("class Main { Void main() { println(1); } }");
        let layout = table.method("_Main_main");
        assert!(!layout.has_receiver);
        assert!(!layout.slots.contains_key("this"));
    }
}
