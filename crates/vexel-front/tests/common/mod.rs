//! Shared helpers: write sources into a temp project and run the frontend.

use std::path::PathBuf;

use tempfile::TempDir;
use vexel_common::diag::{CompileError, VecSink};
use vexel_common::options::Options;
use vexel_front::AnalyzedProgram;
use vexel_parser::ast::{ExprKind, Stmt, StmtKind};

pub struct Outcome {
    pub result: Result<AnalyzedProgram, CompileError>,
    pub sink: VecSink,
    /// Kept alive so resources stay readable while the program is used.
    #[allow(dead_code)]
    pub dir: TempDir,
}

pub fn compile_project_with(files: &[(&str, &str)], options: Options) -> Outcome {
    let dir = TempDir::new().expect("temp dir");
    for (name, text) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create dirs");
        }
        std::fs::write(&path, text).expect("write source");
    }
    let entry: PathBuf = dir.path().join(files[0].0);
    let mut sink = VecSink::new();
    let result = vexel_front::compile(&entry, dir.path(), options, &mut sink);
    Outcome { result, sink, dir }
}

pub fn compile_project(files: &[(&str, &str)]) -> Outcome {
    compile_project_with(files, Options::default())
}

pub fn compile_source(source: &str) -> Outcome {
    compile_project(&[("main.vx", source)])
}

pub fn compile_ok(source: &str) -> Outcome {
    let outcome = compile_source(source);
    if let Err(e) = &outcome.result {
        panic!("expected success, got `{e}`\nsource:\n{source}");
    }
    outcome
}

pub fn compile_err(source: &str) -> CompileError {
    match compile_source(source).result {
        Ok(_) => panic!("expected an error for:\n{source}"),
        Err(e) => e,
    }
}

/// Find a merged function declaration by (possibly mangled) name prefix.
pub fn find_func<'a>(
    program: &'a AnalyzedProgram,
    name: &str,
) -> (&'a Stmt, vexel_front::InstanceId) {
    for item in &program.merged().items {
        if let StmtKind::FuncDecl(func) = &item.stmt.kind {
            if func.qualified_name() == name {
                return (&item.stmt, item.instance);
            }
        }
    }
    panic!("no merged function named `{name}`");
}

pub fn func_symbol(program: &AnalyzedProgram, name: &str) -> vexel_front::SymbolId {
    let (stmt, instance) = find_func(program, name);
    program
        .binding_for(instance, stmt.id)
        .unwrap_or_else(|| panic!("`{name}` has no binding"))
        .id
}

pub fn global_symbol(program: &AnalyzedProgram, name: &str) -> vexel_front::SymbolId {
    for item in &program.merged().items {
        if let StmtKind::VarDecl(decl) = &item.stmt.kind {
            if decl.name == name {
                return program
                    .binding_for(item.instance, item.stmt.id)
                    .unwrap_or_else(|| panic!("`{name}` has no binding"))
                    .id;
            }
        }
    }
    panic!("no merged global named `{name}`");
}

/// The body of a merged function.
pub fn func_body<'a>(program: &'a AnalyzedProgram, name: &str) -> &'a vexel_parser::ast::Expr {
    let (stmt, _) = find_func(program, name);
    let StmtKind::FuncDecl(func) = &stmt.kind else { unreachable!() };
    func.body.as_ref().unwrap_or_else(|| panic!("`{name}` has no body"))
}

/// Assert that an expression is the integer literal `value`.
pub fn assert_int_literal(expr: &vexel_parser::ast::Expr, value: u64) {
    match &expr.kind {
        ExprKind::Int { value: v, .. } => assert_eq!(*v, value, "literal value"),
        other => panic!("expected literal {value}, got {other:?}"),
    }
}
