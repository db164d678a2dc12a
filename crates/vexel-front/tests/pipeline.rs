//! Pass-level behavior: widening and operator rules, records and methods,
//! tuples and multi-returns, iteration forms, casts, modules and imports,
//! compile-time evaluation limits, annotations, and strictness levels.

mod common;

use common::*;
use vexel_common::options::{Options, Strictness};
use vexel_front::VarMutability;
use vexel_parser::ast::{ExprKind, StmtKind};

// ── Literals, widening, operators ──────────────────────────────────────

#[test]
fn literal_narrowing_is_rejected() {
    let err = compile_err("^g:#u8 = 300;\n&^main() -> #i32 { 0 }");
    assert!(err.message.contains("expected `u8`"), "got: {}", err.message);
}

#[test]
fn suffixed_literal_must_fit() {
    let err = compile_err("&^main() -> #i32 { t = 300u8; 0 }");
    assert!(err.message.contains("does not fit"), "got: {}", err.message);
}

#[test]
fn cross_family_arithmetic_requires_a_cast() {
    let err = compile_err("&^main() -> #f64 { 1 + 1.5 }");
    assert!(err.message.contains("mismatch"), "got: {}", err.message);

    let outcome = compile_ok("&^main() -> #f64 { #f64(1) + 1.5 }");
    let program = outcome.result.as_ref().unwrap();
    assert!(matches!(func_body(program, "main").kind, ExprKind::Float(v) if v == 2.5));
}

#[test]
fn comparisons_and_logic_produce_bool() {
    let outcome = compile_ok("&^main() -> #bool { (1 < 2) && !(3 >= 4) }");
    let program = outcome.result.as_ref().unwrap();
    assert_int_literal(func_body(program, "main"), 1);
}

#[test]
fn bitwise_operators_require_unsigned_operands() {
    let err = compile_err("&^main() -> #i8 { x = -1; ~x }");
    assert!(err.message.contains("unsigned"), "got: {}", err.message);

    let outcome = compile_ok("&^main() -> #u8 { (0xF0u8 >> 4) | (1 << 1) }");
    let program = outcome.result.as_ref().unwrap();
    assert_int_literal(func_body(program, "main"), 0x0F | 0x02);
}

#[test]
fn negative_literals_pick_the_smallest_signed_width() {
    let outcome = compile_ok("^a:#i8 = -128;\n^b:#i16 = -129;\n&^main() -> #i32 { 0 }");
    let program = outcome.result.as_ref().unwrap();
    let a = global_symbol(program, "a");
    assert_eq!(program.symbol(a).ty.as_ref().unwrap().to_string(), "i8");
}

// ── Records, methods, operator overloading ─────────────────────────────

const VEC2: &str = "\
#Vec2 { x: #i16, y: #i16 }
&(lhs)#Vec2::+(rhs: #Vec2) -> #Vec2 { Vec2(lhs.x + rhs.x, lhs.y + rhs.y) }
";

#[test]
fn operator_overloading_dispatches_to_the_method() {
    let source = format!(
        "{VEC2}&^main() -> #i16 {{ a = Vec2(1, 2); b = Vec2(3, 4); c = a + b; c.x }}"
    );
    let outcome = compile_project(&[("main.vx", &source)]);
    let program = outcome.result.as_ref().expect("compiles");

    let plus = func_symbol(program, "Vec2::+");
    assert!(program.analysis.reachable.contains(&plus), "overload must be reachable");
    assert!(program.analysis.used_types.contains("Vec2"));
}

#[test]
fn unoverloaded_operator_on_a_record_is_an_error() {
    let source = format!("{VEC2}&^main() -> #i16 {{ a = Vec2(1, 2); t = a * a; 0 }}");
    let outcome = compile_project(&[("main.vx", &source)]);
    let err = outcome.result.err().expect("should fail");
    assert!(err.message.contains("overload"), "got: {}", err.message);
}

#[test]
fn receiver_mutation_is_inferred_through_forwarding() {
    let source = "\
#Counter { n: #u16 }
&(self)#Counter::bump() -> #u16 { self.n = self.n + 1u16; self.n }
&(c)#Counter::bump_twice() -> #u16 { t = (c).bump(); (c).bump() }
&^main() -> #u16 { ~c = Counter(0); (c).bump_twice() }
";
    let outcome = compile_source(source);
    let program = outcome.result.as_ref().expect("compiles");

    let bump = func_symbol(program, "Counter::bump");
    assert_eq!(program.analysis.receiver_mutates.get(&bump), Some(&vec![true]));
    let bump_twice = func_symbol(program, "Counter::bump_twice");
    assert_eq!(
        program.analysis.receiver_mutates.get(&bump_twice),
        Some(&vec![true]),
        "forwarding a receiver to a mutating position is itself mutating"
    );
    assert_eq!(program.analysis.is_pure.get(&bump), Some(&false));
}

#[test]
fn multi_receiver_calls_require_bare_identifiers() {
    let source = "\
#P { v: #u8 }
&(a, b)#P::swap() { t = a.v; a.v = b.v; b.v = t; }
&^main() -> #u8 { ~x = P(1); ~y = P(2); (x, y).swap(); x.v }
";
    let outcome = compile_source(source);
    assert!(outcome.result.is_ok(), "bare identifiers are fine: {:?}", outcome.result.err());

    let bad = "\
#P { v: #u8 }
&(a, b)#P::swap() { t = a.v; a.v = b.v; b.v = t; }
&ps() -> #P { P(1) }
&^main() -> #u8 { ~y = P(2); (ps(), y).swap(); y.v }
";
    let err = compile_source(bad).result.err().expect("should fail");
    assert!(err.message.contains("bare variable"), "got: {}", err.message);
}

// ── Tuples & multi-returns ─────────────────────────────────────────────

#[test]
fn tuples_synthesize_named_types_with_indexed_members() {
    let outcome = compile_ok("&^main() -> #u8 { t = (1u8, 2u16); t.__0 }");
    let program = outcome.result.as_ref().unwrap();
    assert!(program.tuple_types().contains_key("tuple2_u8_u16"));
}

#[test]
fn multi_return_desugars_to_a_temporary() {
    let source = "\
&pair() -> (#u8, #u16) { => (1, 2); }
&^main() -> #u16 { a, b = pair(); #u16(a) + b }
";
    let outcome = compile_source(source);
    let program = outcome.result.as_ref().expect("compiles");

    // The tuple type was forced into existence.
    assert!(program.tuple_types().contains_key("tuple2_u8_u16"));

    // Lowering rewrote the multi-assign into `__mrN = pair(); a = ...`.
    let body = func_body(program, "main");
    let ExprKind::Block { stmts, .. } = &body.kind else { panic!("expected a block body") };
    let has_temp = stmts.iter().any(|stmt| {
        let StmtKind::Expr(e) = &stmt.kind else { return false };
        let ExprKind::Block { stmts, .. } = &e.kind else { return false };
        stmts.iter().any(|s| matches!(&s.kind, StmtKind::VarDecl(d) if d.name.starts_with("__mr")))
    });
    assert!(has_temp, "multi-assign should desugar to a temporary");

    // A tuple-returning body is not scalar-foldable.
    let pair = func_symbol(program, "pair");
    assert_eq!(program.optimization.fold_skip_reasons.get(&pair), Some(&"non-scalar-body"));
}

// ── Iteration ──────────────────────────────────────────────────────────

#[test]
fn array_iteration_binds_the_loop_variable() {
    let source = "&^f() -> #u8 { ~t = 0u8; [1u8, 2u8, 3u8] @ { t = t + _; }; t }";
    let outcome = compile_ok(source);
    let program = outcome.result.as_ref().unwrap();
    assert_int_literal(func_body(program, "f"), 6);
}

#[test]
fn sorted_iteration_walks_a_sorted_copy() {
    let source = "\
&^f() -> #u8 { ~a = 0u8; [3u8, 1u8, 2u8] @@ { a = _; <<; }; ~b = 0u8; [3u8, 1u8, 2u8] @ { b = _; <<; }; a * 10u8 + b }
";
    let outcome = compile_ok(source);
    let program = outcome.result.as_ref().unwrap();
    // First element sorted is 1; unsorted is 3.
    assert_int_literal(func_body(program, "f"), 13);
}

#[test]
fn range_iteration_and_repeat_loops() {
    let outcome =
        compile_ok("&^f() -> #u8 { ~s = 0u8; 0..5 @ { s = s + _; }; (s < 20u8) @ { s = s + 5u8; }; s }");
    let program = outcome.result.as_ref().unwrap();
    // 0+1+2+3+4 = 10, then 10 -> 15 -> 20.
    assert_int_literal(func_body(program, "f"), 20);
}

#[test]
fn named_iteration_dispatches_through_the_iteration_method() {
    let source = "\
#Pair { a: #u8, b: #u8 }
&(self)#Pair::@($body) { [self.a, self.b] @ { body; }; }
&^main() -> #u8 { p = Pair(3, 4); ~s = 0u8; p @ { s = s + _; }; s }
";
    let outcome = compile_source(source);
    let program = outcome.result.as_ref().expect("compiles");
    let method = func_symbol(program, "Pair::@");
    assert!(program.analysis.reachable.contains(&method));
}

#[test]
fn iterating_a_record_without_an_iteration_method_is_an_error() {
    let err = compile_err("#P { v: #u8 }\n&^main() -> #u8 { p = P(1); p @ { t = _; }; 0 }");
    assert!(err.message.contains("not iterable"), "got: {}", err.message);
}

#[test]
fn the_loop_variable_is_read_only() {
    let err = compile_err("&^f() -> #u8 { [1u8] @ { _ = 2u8; }; 0 }");
    assert!(err.message.contains("read-only"), "got: {}", err.message);
}

// ── Casts ──────────────────────────────────────────────────────────────

#[test]
fn bool_array_casts_round_trip_bits() {
    let outcome = compile_ok("&^f() -> #u8 { bits = #bool[8](170u8); #u8(bits) }");
    let program = outcome.result.as_ref().unwrap();
    assert_int_literal(func_body(program, "f"), 170);
}

#[test]
fn bool_array_cast_size_must_match_the_width() {
    let err = compile_err("&^f() -> #u8 { bits = #bool[4](170u8); 0 }");
    assert!(err.message.contains("size mismatch"), "got: {}", err.message);
}

// ── Modules & instances ────────────────────────────────────────────────

#[test]
fn imports_resolve_and_inject_exported_names() {
    let math = "^half:#u8 = 2;\n&^twice(x: #u8) -> #u8 { x * half }\n";
    let main = "::util::math;\n&^main() -> #u8 { twice(21u8) }\n";
    let outcome = compile_project(&[("main.vx", main), ("util/math.vx", math)]);
    let program = outcome.result.as_ref().expect("compiles");

    let twice = func_symbol(program, "twice");
    assert!(program.analysis.reachable.contains(&twice));
    assert_eq!(program.symbol(twice).instance.0, 1, "twice lives in the imported instance");
    let half = global_symbol(program, "half");
    assert!(program.analysis.used_globals.contains(&half));
}

#[test]
fn missing_imports_are_reported_by_the_resolver() {
    let err = compile_err("::nope::mod;\n&^main() -> #i32 { 0 }");
    assert!(err.message.contains("cannot resolve import"), "got: {}", err.message);
}

#[test]
fn cyclic_imports_are_an_error() {
    let outcome = compile_project(&[
        ("a.vx", "::b;\n&^main() -> #i32 { 0 }"),
        ("b.vx", "::a;\n^k:#u8 = 1;"),
    ]);
    let err = outcome.result.err().expect("should fail");
    assert!(err.message.contains("cyclic import"), "got: {}", err.message);
}

#[test]
fn each_import_scope_gets_its_own_instance() {
    let counter = "^base:#u8 = 1;\n&^bump(x: #u8) -> #u8 { x + base }\n";
    let main = "\
::lib::counter;
&^main() -> #u8 { bump(1u8) }
";
    let other = "::lib::counter;\n&^other() -> #u8 { bump(2u8) }\n";
    let outcome = compile_project(&[
        ("main.vx", &format!("::side;\n{main}")),
        ("side.vx", other),
        ("lib/counter.vx", counter),
    ]);
    let program = outcome.result.as_ref().expect("compiles");
    // counter is instantiated once per importing scope: side's and main's.
    let counter_instances = program
        .program()
        .instances
        .iter()
        .filter(|inst| {
            program.program().module(inst.module).path.ends_with("lib/counter.vx")
        })
        .count();
    assert_eq!(counter_instances, 2);
}

// ── Scopes & mutability ────────────────────────────────────────────────

#[test]
fn shadowing_is_rejected_across_the_scope_chain() {
    let err = compile_err("^x:#u8 = 1;\n&^f() -> #u8 { x: #u8 = 2; x }");
    assert!(err.message.contains("shadows"), "got: {}", err.message);
}

#[test]
fn assignment_introduces_an_immutable_local() {
    // Single write: fine. A write to an immutable global is not.
    let err = compile_err("^x:#u8 = 1;\n&^f() -> #u8 { x = 2u8; x }");
    assert!(err.message.contains("immutable"), "got: {}", err.message);

    let outcome = compile_ok("&^f() -> #u8 { y = 1u8; y = 2u8; y }");
    let program = outcome.result.as_ref().unwrap();
    assert_int_literal(func_body(program, "f"), 2);
}

#[test]
fn runtime_initialized_globals_are_classified() {
    let source = "&!rand() -> #u8;\nz:#u8 = rand();\n&^main() -> #u8 { z }";
    let outcome = compile_source(source);
    let program = outcome.result.as_ref().expect("compiles");
    let z = global_symbol(program, "z");
    assert_eq!(
        program.analysis.var_mutability.get(&z),
        Some(&VarMutability::NonMutableRuntime)
    );
    // rand is rooted by the runtime initializer.
    let rand = func_symbol(program, "rand");
    assert!(program.analysis.reachable.contains(&rand));
}

// ── Compile-time evaluation ────────────────────────────────────────────

#[test]
fn constant_cycles_are_reported() {
    let err = compile_err("^a:#u8 = b;\n^b:#u8 = a;\n&^main() -> #i32 { 0 }");
    assert!(
        err.message.contains("compile-time constant"),
        "cycle surfaces at the exported-constant gate: {}",
        err.message
    );
}

#[test]
fn compile_time_recursion_is_bounded() {
    let source = "\
&rec(n: #u32) -> #u32 { rec(n + 1u32) }
&^main() -> #u32 { rec(0u32) }
";
    let outcome = compile_source(source);
    let program = outcome.result.as_ref().expect("bounded recursion must not hang compilation");
    let rec = func_symbol(program, "rec");
    assert!(program.analysis.reachable.contains(&rec));
}

#[test]
fn promoted_constants_seed_dependent_evaluation() {
    let source = "\
^base:#u8 = 4;
^derived:#u8 = base * 10u8;
&^main() -> #u8 { derived }
";
    let outcome = compile_ok(source);
    let program = outcome.result.as_ref().unwrap();
    let derived = global_symbol(program, "derived");
    assert_eq!(
        program.optimization.known_symbol_values.get(&derived).map(|v| v.to_string()),
        Some("40".to_string())
    );
    assert_int_literal(func_body(program, "main"), 40);
}

// ── Resources & processes ──────────────────────────────────────────────

#[test]
fn resources_embed_file_contents_at_compile_time() {
    let outcome = compile_project(&[
        ("main.vx", "^msg:#str = %\"data.txt\";\n&^main() -> #str { msg }"),
        ("data.txt", "hello"),
    ]);
    let program = outcome.result.as_ref().expect("compiles");
    let msg = global_symbol(program, "msg");
    assert_eq!(
        program.optimization.known_symbol_values.get(&msg).map(|v| v.to_string()),
        Some("\"hello\"".to_string())
    );
}

#[test]
fn process_expressions_require_the_opt_in() {
    let err = compile_err("&^main() -> #str { `echo hi` }");
    assert!(err.message.contains("allow-process"), "got: {}", err.message);
}

// ── Annotations ────────────────────────────────────────────────────────

#[test]
fn unknown_annotations_are_rejected() {
    let err = compile_err("[[sparkly]] &^main() -> #i32 { 0 }");
    assert!(err.message.contains("unknown annotation"), "got: {}", err.message);
}

#[test]
fn misplaced_known_annotations_only_warn() {
    let outcome = compile_source("[[hot]] ^x:#u8 = 1;\n&^main() -> #u8 { x }");
    assert!(outcome.result.is_ok());
    assert_eq!(outcome.sink.warnings().count(), 1);
}

// ── Strictness ─────────────────────────────────────────────────────────

#[test]
fn full_strictness_requires_annotated_parameters() {
    let source = "&add(a, b) { a + b }\n&^main() -> #i32 { add(1, 2) }";
    let relaxed = compile_project_with(&[("main.vx", source)], Options::default());
    assert!(relaxed.result.is_ok());

    let strict = compile_project_with(
        &[("main.vx", source)],
        Options { strictness: Strictness::Full, ..Options::default() },
    );
    let err = strict.result.err().expect("level 2 rejects untyped parameters");
    assert!(err.message.contains("type annotation"), "got: {}", err.message);
}
