//! End-to-end scenarios: literal/width inference, dead branches, generic
//! monomorphization, reentrancy violations, foldable functions, and the
//! exported-global ABI gate.

mod common;

use common::*;
use vexel_front::VarMutability;
use vexel_parser::ast::StmtKind;

#[test]
fn literal_width_and_array_inference() {
    let outcome = compile_ok("^palette:#u8[3] = [1, 2, 255];\n&^main() -> #i32 { 0 }");
    let program = outcome.result.as_ref().unwrap();

    let palette = global_symbol(program, "palette");
    let info = program.symbol(palette);
    assert!(info.exported);
    assert_eq!(info.ty.as_ref().unwrap().to_string(), "u8[3]");
    assert_eq!(
        program.analysis.var_mutability.get(&palette),
        Some(&VarMutability::Constexpr),
        "a literal-initialized global is constexpr"
    );

    let main = func_symbol(program, "main");
    assert!(program.analysis.reachable.contains(&main));
}

#[test]
fn constexpr_dead_branch_is_accepted_and_collapsed() {
    // The dead branch has a mismatched type; the checker accepts it and
    // the residualizer removes it.
    let outcome = compile_ok("&^main() -> #i32 { (1 == 1) ? 42 : \"never\" }");
    let program = outcome.result.as_ref().unwrap();
    assert_int_literal(func_body(program, "main"), 42);
}

#[test]
fn runtime_conditional_branches_must_agree() {
    let err = compile_err("&^main(flag: #bool) -> #i32 { flag ? 42 : \"never\" }");
    assert!(err.message.contains("mismatch"), "got: {}", err.message);
}

#[test]
fn generic_monomorphization_produces_one_clone_per_signature() {
    let outcome =
        compile_ok("&add(a, b) { a + b }\n&^main() -> #i32 { add(1, 2) + add(1u8, 2u8) }");
    let program = outcome.result.as_ref().unwrap();

    // Two full-signature instantiations; the template itself is gone.
    assert_eq!(program.program().instantiations.len(), 2);
    let mut clones = Vec::new();
    for item in &program.merged().items {
        if let StmtKind::FuncDecl(func) = &item.stmt.kind {
            assert_ne!(func.qualified_name(), "add", "template must not be emitted");
            if func.qualified_name().starts_with("add_G_") {
                assert!(func.instantiated);
                clones.push(func.qualified_name());
            }
        }
    }
    clones.sort();
    assert_eq!(clones.len(), 2);
    assert_ne!(clones[0], clones[1], "distinct signatures, distinct clones");

    // Both clones are reachable from main (their calls are not folded:
    // functions with parameters are not foldable).
    for clone in &clones {
        let symbol = func_symbol(program, clone);
        assert!(
            program.analysis.reachable.contains(&symbol),
            "`{clone}` should be reachable"
        );
    }
}

#[test]
fn same_signature_reuses_the_instantiation() {
    let outcome =
        compile_ok("&add(a, b) { a + b }\n&^main() -> #i32 { add(1u8, 2u8) + add(3u8, 4u8) }");
    let program = outcome.result.as_ref().unwrap();
    assert_eq!(program.program().instantiations.len(), 1);
}

#[test]
fn reentrant_entry_calling_nonreentrant_external_is_an_error() {
    let err = compile_err(
        "[[nonreentrant]] &!puts(s: #str);\n\
         &helper() -> #u8 { puts(\"x\"); 1 }\n\
         [[reentrant]] &^main() -> #i32 { t = helper(); 0 }",
    );
    assert!(
        err.message.contains("reentrant entry `main`"),
        "error should reference the entry: {}",
        err.message
    );
    assert!(err.message.contains("puts"), "error should name the callee: {}", err.message);
    assert!(err.span.is_some(), "error should point at the entry declaration");
}

#[test]
fn foldable_function_is_replaced_by_its_value() {
    let outcome = compile_ok("&square() -> #i32 { 7 * 7 }\n&^main() -> #i32 { square() }");
    let program = outcome.result.as_ref().unwrap();

    let square = func_symbol(program, "square");
    assert!(
        program.optimization.foldable_functions.contains(&square),
        "zero-argument scalar-bodied function is foldable"
    );
    assert_int_literal(func_body(program, "main"), 49);
}

#[test]
fn functions_with_parameters_are_not_foldable() {
    let outcome =
        compile_ok("&twice(x: #u8) -> #u8 { x * 2u8 }\n&^main() -> #u8 { twice(21u8) }");
    let program = outcome.result.as_ref().unwrap();
    let twice = func_symbol(program, "twice");
    assert!(!program.optimization.foldable_functions.contains(&twice));
    assert_eq!(program.optimization.fold_skip_reasons.get(&twice), Some(&"has-params"));
    // The call survives residualization, so `twice` stays reachable.
    assert!(program.analysis.reachable.contains(&twice));
}

#[test]
fn exported_tuple_global_is_rejected_at_the_abi() {
    let err = compile_err("^t = (1, 2);");
    assert!(
        err.message.contains("exported or external boundary"),
        "got: {}",
        err.message
    );
}

#[test]
fn exported_global_must_be_compile_time_constant() {
    let err = compile_err(
        "&!rand() -> #u8;\n^seed:#u8 = rand();\n&^main() -> #i32 { 0 }",
    );
    assert!(err.message.contains("compile-time constant"), "got: {}", err.message);
}

#[test]
fn statement_conditional_with_known_false_condition_is_dropped() {
    let outcome = compile_ok("^debug:#bool = 0;\n&^main() -> #u8 { debug ? => 1; 2 }");
    let program = outcome.result.as_ref().unwrap();
    assert_int_literal(func_body(program, "main"), 2);
}

#[test]
fn dead_branch_may_call_unknown_targets_but_live_branch_may_not() {
    // The dead branch still resolves names; a genuinely undefined callee
    // is an error even there.
    let err = compile_err("&^main() -> #i32 { (1 == 1) ? 1 : nope() }");
    assert!(err.message.contains("undefined"), "got: {}", err.message);
}
