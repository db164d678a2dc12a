//! Integration tests for the Vexel parser: statement forms, sigil
//! disambiguation, and the canonical rendering used for re-import checks.

use vexel_common::span::FileId;
use vexel_parser::ast::display::render_stmt;
use vexel_parser::ast::{
    decl_shape_eq, ExprKind, Linkage, Module, NodeIds, StmtKind,
};

fn parse(source: &str) -> Module {
    let mut ids = NodeIds::new();
    vexel_parser::parse(FileId(0), source, &mut ids)
        .unwrap_or_else(|e| panic!("parse failed: {e} in {source:?}"))
}

fn parse_err(source: &str) -> String {
    let mut ids = NodeIds::new();
    match vexel_parser::parse(FileId(0), source, &mut ids) {
        Ok(_) => panic!("expected parse error for {source:?}"),
        Err(e) => e.message,
    }
}

#[test]
fn exported_global_with_array_type() {
    let module = parse("^palette:#u8[3] = [1, 2, 255];");
    assert_eq!(module.statements.len(), 1);
    let StmtKind::VarDecl(decl) = &module.statements[0].kind else {
        panic!("expected var decl");
    };
    assert_eq!(decl.name, "palette");
    assert_eq!(decl.linkage, Linkage::Exported);
    assert!(!decl.mutable);
    assert!(decl.ty.is_some());
    let Some(init) = &decl.init else { panic!("expected initializer") };
    assert!(matches!(&init.kind, ExprKind::ArrayLit(elems) if elems.len() == 3));
}

#[test]
fn exported_function_with_block_body() {
    let module = parse("&^main() -> #i32 { 0 }");
    let StmtKind::FuncDecl(func) = &module.statements[0].kind else {
        panic!("expected func decl");
    };
    assert_eq!(func.name, "main");
    assert!(func.exported);
    assert!(!func.is_generic());
    let Some(body) = &func.body else { panic!("expected body") };
    assert!(matches!(&body.kind, ExprKind::Block { stmts, tail: Some(_) } if stmts.is_empty()));
}

#[test]
fn generic_function_detection() {
    let module = parse("&add(a, b) { a + b }");
    let StmtKind::FuncDecl(func) = &module.statements[0].kind else {
        panic!("expected func decl");
    };
    assert!(func.is_generic());
    assert_eq!(func.params.len(), 2);
    assert!(func.params.iter().all(|p| p.ty.is_none()));
}

#[test]
fn external_function_declaration() {
    let module = parse("[[nonreentrant]] &!puts(s: #str);");
    let stmt = &module.statements[0];
    assert_eq!(stmt.annotations.len(), 1);
    assert_eq!(stmt.annotations[0].name, "nonreentrant");
    let StmtKind::FuncDecl(func) = &stmt.kind else { panic!("expected func decl") };
    assert!(func.external);
    assert!(func.body.is_none());
}

#[test]
fn method_with_receiver_and_operator_name() {
    let module = parse("&(lhs)#Vec2::+(rhs: #Vec2) -> #Vec2 { lhs }");
    let StmtKind::FuncDecl(func) = &module.statements[0].kind else {
        panic!("expected func decl");
    };
    assert_eq!(func.name, "+");
    assert_eq!(func.type_ns.as_deref(), Some("Vec2"));
    assert_eq!(func.qualified_name(), "Vec2::+");
    assert_eq!(func.receivers.len(), 1);
}

#[test]
fn iteration_method_name() {
    let module = parse("&(self)#Grid::@($body) { 0 }");
    let StmtKind::FuncDecl(func) = &module.statements[0].kind else {
        panic!("expected func decl");
    };
    assert_eq!(func.name, "@");
}

#[test]
fn ternary_versus_conditional_statement() {
    let module = parse("&f(x: #bool) -> #u8 { y = x ? 1 : 2; x ? => 3; y }");
    let StmtKind::FuncDecl(func) = &module.statements[0].kind else {
        panic!("expected func decl");
    };
    let Some(body) = &func.body else { panic!() };
    let ExprKind::Block { stmts, tail } = &body.kind else { panic!() };
    assert_eq!(stmts.len(), 2);
    assert!(tail.is_some());
    let StmtKind::Expr(assign) = &stmts[0].kind else { panic!("expected assignment") };
    let ExprKind::Assign { value, .. } = &assign.kind else { panic!() };
    assert!(matches!(value.kind, ExprKind::Conditional { .. }));
    assert!(matches!(&stmts[1].kind, StmtKind::CondStmt { then, .. }
        if matches!(then.kind, StmtKind::Return(_))));
}

#[test]
fn statement_conditional_at_top_level() {
    let module = parse("~flag: #bool = 0;\n&^f() -> #u8 { flag ? << ; 1 }");
    assert_eq!(module.statements.len(), 2);
}

#[test]
fn iteration_and_sorted_iteration() {
    let module = parse("&f(xs: #u8[4]) -> #u8 { xs @ { t = _; }; xs @@ { u = _; }; 0 }");
    let StmtKind::FuncDecl(func) = &module.statements[0].kind else { panic!() };
    let ExprKind::Block { stmts, .. } = &func.body.as_ref().unwrap().kind else { panic!() };
    let StmtKind::Expr(first) = &stmts[0].kind else { panic!() };
    assert!(matches!(first.kind, ExprKind::Iterate { sorted: false, .. }));
    let StmtKind::Expr(second) = &stmts[1].kind else { panic!() };
    assert!(matches!(second.kind, ExprKind::Iterate { sorted: true, .. }));
}

#[test]
fn multi_assign_parses_to_tuple_target() {
    let module = parse("&f() { a, b = g(); a }");
    let StmtKind::FuncDecl(func) = &module.statements[0].kind else { panic!() };
    let ExprKind::Block { stmts, .. } = &func.body.as_ref().unwrap().kind else { panic!() };
    let StmtKind::Expr(assign) = &stmts[0].kind else { panic!() };
    let ExprKind::Assign { target, .. } = &assign.kind else { panic!() };
    assert!(matches!(&target.kind, ExprKind::TupleLit(elems) if elems.len() == 2));
}

#[test]
fn import_paths() {
    let module = parse("::util::math;");
    let StmtKind::Import { segments } = &module.statements[0].kind else { panic!() };
    assert_eq!(segments, &["util", "math"]);
}

#[test]
fn type_declaration() {
    let module = parse("#Point { x: #i8, y: #i8 }");
    let StmtKind::TypeDecl(decl) = &module.statements[0].kind else { panic!() };
    assert_eq!(decl.name, "Point");
    assert_eq!(decl.fields.len(), 2);
}

#[test]
fn cast_and_namespaced_call() {
    let module = parse("&f(x: #u16) -> #u8 { #u8(x) + #Point::origin().x }");
    let StmtKind::FuncDecl(func) = &module.statements[0].kind else { panic!() };
    let ExprKind::Block { tail: Some(tail), .. } = &func.body.as_ref().unwrap().kind else {
        panic!()
    };
    let ExprKind::Binary { lhs, rhs, .. } = &tail.kind else { panic!() };
    assert!(matches!(lhs.kind, ExprKind::Cast { .. }));
    let ExprKind::Member { base, .. } = &rhs.kind else { panic!() };
    assert!(matches!(&base.kind, ExprKind::Call { callee, .. } if callee == "Point::origin"));
}

#[test]
fn length_range_and_bitwise() {
    let module = parse("&f(xs: #u8[4]) -> #u8 { t = |xs|; r = 0..9; xs[0] & 3u8 }");
    let StmtKind::FuncDecl(func) = &module.statements[0].kind else { panic!() };
    let ExprKind::Block { stmts, tail } = &func.body.as_ref().unwrap().kind else { panic!() };
    assert_eq!(stmts.len(), 2);
    let ExprKind::Binary { op, .. } = &tail.as_ref().unwrap().kind else { panic!() };
    assert_eq!(op.symbol(), "&");
}

#[test]
fn multi_receiver_call() {
    let module = parse("&g() { (a, b).merge(1); }");
    let StmtKind::FuncDecl(func) = &module.statements[0].kind else { panic!() };
    let ExprKind::Block { stmts, .. } = &func.body.as_ref().unwrap().kind else { panic!() };
    let StmtKind::Expr(call) = &stmts[0].kind else { panic!() };
    let ExprKind::Call { callee, receivers, args } = &call.kind else { panic!() };
    assert_eq!(callee, "merge");
    assert_eq!(receivers.len(), 2);
    assert_eq!(args.len(), 1);
}

#[test]
fn tuple_versus_annotation_lookahead() {
    // `[[1, 2], [3, 4]]` must parse as a nested array literal, not an
    // annotation.
    let module = parse("&f() -> #u8 { m = [[1, 2], [3, 4]]; m[0][1] }");
    let StmtKind::FuncDecl(func) = &module.statements[0].kind else { panic!() };
    let ExprKind::Block { stmts, .. } = &func.body.as_ref().unwrap().kind else { panic!() };
    assert_eq!(stmts.len(), 1);
}

#[test]
fn dead_branch_scenario_parses() {
    let module = parse("&^main() -> #i32 { (1 == 1) ? 42 : \"never\" }");
    let StmtKind::FuncDecl(func) = &module.statements[0].kind else { panic!() };
    let ExprKind::Block { tail: Some(tail), .. } = &func.body.as_ref().unwrap().kind else {
        panic!()
    };
    assert!(matches!(tail.kind, ExprKind::Conditional { .. }));
}

#[test]
fn shape_equality_ignores_spans() {
    let a = parse("&square() -> #i32 { 7 * 7 }");
    let b = parse("  &square()   ->   #i32 {\n    7 * 7\n}");
    assert!(decl_shape_eq(&a.statements[0], &b.statements[0]));

    let c = parse("&square() -> #i32 { 7 * 8 }");
    assert!(!decl_shape_eq(&a.statements[0], &c.statements[0]));
}

#[test]
fn render_stmt_is_stable() {
    let module = parse("^t:#u8 = 1 + 2;");
    assert_eq!(render_stmt(&module.statements[0]), "^t: #u8 = (1 + 2);");
}

#[test]
fn process_and_resource_literals() {
    let module = parse("&f() -> #str { x = `ls`; y = %\"data.bin\"; \"\" }");
    let StmtKind::FuncDecl(func) = &module.statements[0].kind else { panic!() };
    let ExprKind::Block { stmts, .. } = &func.body.as_ref().unwrap().kind else { panic!() };
    assert_eq!(stmts.len(), 2);
}

#[test]
fn error_reports_location() {
    let message = parse_err("&f( { }");
    assert!(message.contains("expected"), "got: {message}");
}

#[test]
fn unknown_character_is_an_error() {
    let message = parse_err("&f() { \x07 }");
    assert!(message.contains("unexpected character"), "got: {message}");
}
