//! Module loader: parses the entry file and transitively loads everything
//! it imports.
//!
//! Imports are discovered by a structural walk of every statement, so a
//! nested `::a::b;` inside a function body is loaded too. Paths are
//! normalized lexically and duplicate loads are suppressed. A missing
//! import file is *not* an error here; the resolver reports it with a
//! symbol-level message when the import statement is bound.

use std::path::{Component, Path, PathBuf};

use log::debug;

use vexel_common::diag::CompileError;
use vexel_parser::ast::walk::for_each_stmt;
use vexel_parser::ast::StmtKind;

use crate::program::ModuleId;
use crate::session::Session;

/// Load the entry module and its transitive imports into the session.
pub fn load_program(entry: &Path, sess: &mut Session) -> Result<(), CompileError> {
    let entry = normalize(entry);
    load_module(&entry, None, sess)?;
    debug!("loaded {} module(s)", sess.program.modules.len());
    Ok(())
}

/// Lexical path normalization: strips `.` components and folds `..` into
/// the preceding component. No filesystem access.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn load_module(
    path: &Path,
    import_span: Option<vexel_common::span::Span>,
    sess: &mut Session,
) -> Result<ModuleId, CompileError> {
    if let Some(id) = sess.program.module_by_path(path) {
        return Ok(id);
    }

    let text = std::fs::read_to_string(path).map_err(|e| match import_span {
        Some(span) => CompileError::new(format!("cannot open `{}`: {e}", path.display()), span),
        None => CompileError::unlocated(format!("cannot open `{}`: {e}", path.display())),
    })?;
    let file = sess.sources.add(path.to_path_buf(), text);
    let source = sess.sources.get(file).text.clone();

    let module = vexel_parser::parse(file, &source, &mut sess.program.ids)?;
    let id = sess.program.add_module(path.to_path_buf(), module);
    debug!("loaded module {:?} from {}", id, path.display());

    // Discover imports anywhere in the module, then load them depth-first.
    let mut imports = Vec::new();
    {
        let info = sess.program.module(id);
        for stmt in &info.module.statements {
            for_each_stmt(stmt, &mut |s| {
                if let StmtKind::Import { segments } = &s.kind {
                    imports.push((s.id, segments.clone(), s.span));
                }
            });
        }
    }

    let importing_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    for (node, segments, span) in imports {
        let mut relative = PathBuf::new();
        for segment in &segments {
            relative.push(segment);
        }
        relative.set_extension("vx");

        // Relative to the importing file first, then to the project root.
        let candidates =
            [normalize(&importing_dir.join(&relative)), normalize(&sess.program.root.join(&relative))];
        let Some(found) = candidates.iter().find(|c| c.is_file()) else {
            debug!("import {:?} unresolved (deferred to resolver)", segments);
            continue;
        };
        let found = found.clone();
        let target = load_module(&found, Some(span), sess)?;
        sess.import_map.insert(node, target);
    }

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_lexical() {
        assert_eq!(normalize(Path::new("a/./b.vx")), PathBuf::from("a/b.vx"));
        assert_eq!(normalize(Path::new("a/c/../b.vx")), PathBuf::from("a/b.vx"));
        assert_eq!(normalize(Path::new("../b.vx")), PathBuf::from("../b.vx"));
        assert_eq!(normalize(Path::new("a//b.vx")), PathBuf::from("a/b.vx"));
    }
}
