//! Quantified invariants of the pipeline: idempotence, monotonic
//! compile-time promotion, reachability closure, reentrancy propagation,
//! type-use soundness, constexpr consistency, and ABI safety.

use std::path::PathBuf;

use tempfile::TempDir;
use vexel_common::options::Options;
use vexel_front::analysis::collect_calls;
use vexel_front::cte::{CtOutcome, Evaluator};
use vexel_front::session::AstView;
use vexel_front::types::is_abi_safe;
use vexel_front::{
    analysis, annotations, loader, lower, monomorph, optimizer, residual, resolver, typeck,
    typeuse, AnalysisFacts, BackendRequirements, OptimizationFacts, Session, SymbolKind,
};
use vexel_parser::ast::display::render_stmt;
use vexel_parser::ast::walk::for_each_expr_in_stmt;

/// Run the pipeline step by step so the tests can look between passes.
struct Stepper {
    #[allow(dead_code)]
    dir: TempDir,
    sess: Session,
    reqs: BackendRequirements,
}

fn stepper(files: &[(&str, &str)]) -> Stepper {
    let dir = TempDir::new().expect("temp dir");
    for (name, text) in files {
        std::fs::write(dir.path().join(name), text).expect("write source");
    }
    let entry: PathBuf = dir.path().join(files[0].0);
    let options = Options::default();
    let reqs =
        BackendRequirements::for_backend(&options.backend, &options.backend_options).unwrap();
    let mut sess = Session::new(options, dir.path().to_path_buf());

    loader::load_program(&entry, &mut sess).expect("load");
    resolver::resolve_program(&mut sess).expect("resolve");
    annotations::validate_annotations(&mut sess).expect("annotations");
    typeck::check_program(&mut sess).expect("typecheck");
    monomorph::monomorphize(&mut sess).expect("monomorphize");
    Stepper { dir, sess, reqs }
}

fn render_merged(sess: &Session) -> String {
    sess.merged
        .items
        .iter()
        .map(|item| format!("[{}] {}", item.instance.0, render_stmt(&item.stmt)))
        .collect::<Vec<_>>()
        .join("\n")
}

const RICH_PROGRAM: &str = "\
^limit:#u8 = 40 + 2;
&square() -> #i32 { 7 * 7 }
&twice(x: #u8) -> #u8 { x * 2u8 }
&helper(a: #u8) -> #u8 { (a > 0u8) ? twice(a) : 0 }
&^main() -> #i32 { t = helper(limit); (t > 0u8) ? square() : 0 }
";

#[test]
fn lowering_is_idempotent() {
    let mut s = stepper(&[("main.vx", RICH_PROGRAM)]);
    lower::lower_program(&mut s.sess).expect("lower");
    let first = render_merged(&s.sess);
    lower::lower_program(&mut s.sess).expect("lower again");
    let second = render_merged(&s.sess);
    assert_eq!(first, second, "a second lowering must change nothing");
}

#[test]
fn residualization_reaches_a_fixed_point_in_one_pass() {
    let mut s = stepper(&[("main.vx", RICH_PROGRAM)]);
    lower::lower_program(&mut s.sess).expect("lower");
    let facts = optimizer::optimize(&s.sess).expect("optimize");
    residual::residualize(&mut s.sess, &facts).expect("residualize");
    let after_first = render_merged(&s.sess);
    let changed = residual::residualize(&mut s.sess, &facts).expect("residualize again");
    assert!(!changed, "second residualization must be a no-op");
    assert_eq!(after_first, render_merged(&s.sess));
}

#[test]
fn compile_time_facts_are_deterministic_and_monotonic() {
    let mut s = stepper(&[("main.vx", RICH_PROGRAM)]);
    lower::lower_program(&mut s.sess).expect("lower");
    let first = optimizer::optimize(&s.sess).expect("optimize");
    let second = optimizer::optimize(&s.sess).expect("optimize again");

    assert_eq!(first.constexpr_values.len(), second.constexpr_values.len());
    for (key, value) in &first.constexpr_values {
        assert_eq!(second.constexpr_values.get(key), Some(value), "value drifted for {key:?}");
    }
    assert_eq!(
        first.known_symbol_values.len(),
        second.known_symbol_values.len(),
        "promoted constants must be stable across runs"
    );
}

#[test]
fn constexpr_values_reproduce_in_isolation() {
    // Checked before residualization, against the very expressions the
    // facts were derived from.
    let mut s = stepper(&[("main.vx", RICH_PROGRAM)]);
    lower::lower_program(&mut s.sess).expect("lower");
    let facts = optimizer::optimize(&s.sess).expect("optimize");

    let view = AstView {
        modules: &s.sess.program.modules,
        instantiations: &s.sess.program.instantiations,
    };
    let mut checked = 0usize;
    for item in &s.sess.merged.items {
        for_each_expr_in_stmt(&item.stmt, &mut |expr| {
            let Some(expected) = facts.constexpr_values.get(&(item.instance, expr.id)) else {
                return;
            };
            let mut eval =
                Evaluator::new(&s.sess, view).with_seeds(&facts.known_symbol_values);
            match eval.query(item.instance, expr) {
                CtOutcome::Known(value) => assert_eq!(
                    &value, expected,
                    "expression {:?} re-evaluated differently",
                    expr.id
                ),
                other => panic!("expression {:?} no longer evaluates: {other:?}", expr.id),
            }
            checked += 1;
        });
    }
    assert!(checked > 0, "the program should produce compile-time facts");
}

fn full_pipeline(files: &[(&str, &str)]) -> (Stepper, OptimizationFacts, AnalysisFacts) {
    let mut s = stepper(files);
    lower::lower_program(&mut s.sess).expect("lower");
    let opt = optimizer::optimize(&s.sess).expect("optimize");
    residual::residualize(&mut s.sess, &opt).expect("residualize");
    let facts = analysis::analyze(&s.sess, &opt, &s.reqs).expect("analyze");
    typeuse::validate_type_use(&s.sess, &facts, &opt).expect("type-use validation");
    (s, opt, facts)
}

#[test]
fn reachability_is_transitively_closed() {
    let (s, _opt, facts) = full_pipeline(&[("main.vx", RICH_PROGRAM)]);
    assert!(!facts.reachable.is_empty());
    for &symbol in &facts.reachable {
        if s.sess.symbols.get(symbol).external {
            continue;
        }
        let Some(item) = s.sess.merged.items.iter().find(|item| {
            s.sess.bindings.resolve(item.instance, item.stmt.id) == Some(symbol)
        }) else {
            continue;
        };
        for callee in collect_calls(&s.sess, item.instance, &item.stmt) {
            assert!(
                facts.reachable.contains(&callee),
                "`{}` is called from a reachable function but not reachable",
                s.sess.symbols.get(callee).name
            );
        }
    }
}

#[test]
fn reentrancy_flows_to_every_transitive_callee() {
    let source = "\
[[reentrant]] &^main() -> #u8 { a(1u8) }
&a(x: #u8) -> #u8 { b(x) }
&b(x: #u8) -> #u8 { x }
";
    let (s, _opt, facts) = full_pipeline(&[("main.vx", source)]);
    for name in ["main", "a", "b"] {
        let symbol = s
            .sess
            .symbols
            .iter()
            .find(|sym| sym.name == name && sym.kind == SymbolKind::Function)
            .map(|sym| sym.id)
            .expect("function exists");
        let variants = facts.reentrancy.get(&symbol).copied().unwrap_or_default();
        assert!(variants.reentrant, "`{name}` must carry the R variant");
    }
}

#[test]
fn type_use_soundness_holds_for_reachable_bodies() {
    let (s, opt, facts) = full_pipeline(&[("main.vx", RICH_PROGRAM)]);
    // The validator already ran inside full_pipeline; assert the concrete
    // property directly as well: every typed expression in a reachable
    // body resolves to a concrete type.
    for &symbol in &facts.reachable {
        let Some(item) = s.sess.merged.items.iter().find(|item| {
            s.sess.bindings.resolve(item.instance, item.stmt.id) == Some(symbol)
        }) else {
            continue;
        };
        for_each_expr_in_stmt(&item.stmt, &mut |expr| {
            if let Some(ty) = &expr.ty {
                assert!(
                    ty.is_concrete(),
                    "expression in `{}` has non-concrete type `{ty}`",
                    s.sess.symbols.get(symbol).name
                );
            }
        });
    }
    let _ = opt;
}

#[test]
fn exported_boundaries_are_abi_safe() {
    let source = "\
#Point { x: #i8, y: #i8 }
^origin:#Point = Point(0, 0);
^table:#u16[4] = [1, 2, 3, 4];
&^main() -> #i32 { 0 }
&^corner(p: #Point) -> #i8 { p.x }
";
    let (s, _opt, _facts) = full_pipeline(&[("main.vx", source)]);
    let lookup = |name: &str| {
        s.sess
            .fields_of(vexel_front::ENTRY_INSTANCE, name)
            .map(|fields| fields.into_iter().map(|(_, t)| t).collect::<Vec<_>>())
    };
    for symbol in s.sess.symbols.iter() {
        if !symbol.exported {
            continue;
        }
        match symbol.kind {
            SymbolKind::Function => {
                let sig = s.sess.sig(symbol.id).expect("signature");
                for ty in sig.receivers.iter().chain(&sig.params).filter_map(|p| p.ty.as_ref()) {
                    assert!(is_abi_safe(ty, &lookup), "param type `{ty}` must be ABI-safe");
                }
                if let Some(ret) = &sig.ret {
                    assert!(is_abi_safe(ret, &lookup), "return type `{ret}` must be ABI-safe");
                }
            }
            _ => {
                let ty = symbol.ty.as_ref().expect("exported global has a type");
                assert!(is_abi_safe(ty, &lookup), "global type `{ty}` must be ABI-safe");
            }
        }
    }
}
