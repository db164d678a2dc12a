//! The analysis report: a text summary of the frontend's facts, written
//! to `<stem>.analysis.txt`, with an optional JSON sibling.

use std::fmt::Write as _;

use serde_json::json;
use vexel_front::{AnalyzedProgram, SymbolId, VarMutability};

/// Render the human-readable report.
pub fn render_text(program: &AnalyzedProgram) -> String {
    let mut out = String::new();
    let name_of = |symbol: SymbolId| {
        let info = program.symbol(symbol);
        format!("{} @{}", info.name, info.instance.0)
    };
    let sorted = |set: &mut Vec<SymbolId>| {
        set.sort_by_key(|s| name_of(*s));
    };

    let _ = writeln!(out, "== reachable functions ==");
    let mut reachable: Vec<SymbolId> = program.analysis.reachable.iter().copied().collect();
    sorted(&mut reachable);
    for symbol in &reachable {
        let reentrancy = program
            .analysis
            .reentrancy
            .get(symbol)
            .map(|set| set.label())
            .unwrap_or("-");
        let refs = program
            .analysis
            .ref_variants
            .get(symbol)
            .map(|set| set.iter().cloned().collect::<Vec<_>>().join(","))
            .unwrap_or_default();
        let pure = program.analysis.is_pure.get(symbol).copied().unwrap_or(false);
        let writes = program.analysis.writes_global.get(symbol).copied().unwrap_or(false);
        let mut line = format!("  {:<32} variants={reentrancy}", name_of(*symbol));
        if !refs.is_empty() {
            let _ = write!(line, " refs={{{refs}}}");
        }
        if pure {
            line.push_str(" pure");
        }
        if writes {
            line.push_str(" writes-global");
        }
        let _ = writeln!(out, "{line}");
    }

    let _ = writeln!(out, "\n== variables ==");
    let mut vars: Vec<SymbolId> = program.analysis.var_mutability.keys().copied().collect();
    sorted(&mut vars);
    for symbol in &vars {
        let class = match program.analysis.var_mutability[symbol] {
            VarMutability::Constexpr => "constexpr",
            VarMutability::NonMutableRuntime => "non-mutable-runtime",
            VarMutability::Mutable => "mutable",
        };
        let used = if program.analysis.used_globals.contains(symbol) { " used" } else { "" };
        let _ = writeln!(out, "  {:<32} {class}{used}", name_of(*symbol));
    }

    let _ = writeln!(out, "\n== used types ==");
    let mut types: Vec<&String> = program.analysis.used_types.iter().collect();
    types.sort();
    for ty in types {
        let _ = writeln!(out, "  {ty}");
    }

    let _ = writeln!(out, "\n== foldable functions ==");
    let mut foldable: Vec<SymbolId> =
        program.optimization.foldable_functions.iter().copied().collect();
    sorted(&mut foldable);
    for symbol in &foldable {
        let _ = writeln!(out, "  {}", name_of(*symbol));
    }
    let mut skipped: Vec<(SymbolId, &str)> = program
        .optimization
        .fold_skip_reasons
        .iter()
        .map(|(s, r)| (*s, *r))
        .collect();
    skipped.sort_by_key(|(s, _)| name_of(*s));
    for (symbol, reason) in &skipped {
        let _ = writeln!(out, "  {:<32} skipped: {reason}", name_of(*symbol));
    }

    let _ = writeln!(out, "\n== compile-time facts ==");
    let _ = writeln!(
        out,
        "  {} stable value(s), {} constexpr condition(s), {} constexpr initializer(s), {} promoted constant(s)",
        program.optimization.constexpr_values.len(),
        program.optimization.constexpr_conditions.len(),
        program.optimization.constexpr_inits.len(),
        program.optimization.known_symbol_values.len(),
    );
    let mut promoted: Vec<SymbolId> =
        program.optimization.known_symbol_values.keys().copied().collect();
    sorted(&mut promoted);
    for symbol in &promoted {
        let _ = writeln!(
            out,
            "  {:<32} = {}",
            name_of(*symbol),
            program.optimization.known_symbol_values[symbol]
        );
    }

    out
}

/// Render the machine-readable variant.
pub fn render_json(program: &AnalyzedProgram) -> serde_json::Value {
    let name_of = |symbol: SymbolId| {
        let info = program.symbol(symbol);
        format!("{}@{}", info.name, info.instance.0)
    };
    let functions: Vec<serde_json::Value> = {
        let mut reachable: Vec<SymbolId> = program.analysis.reachable.iter().copied().collect();
        reachable.sort_by_key(|s| name_of(*s));
        reachable
            .iter()
            .map(|symbol| {
                json!({
                    "name": name_of(*symbol),
                    "reentrancy": program.analysis.reentrancy.get(symbol).map(|s| s.label()),
                    "ref_variants": program.analysis.ref_variants.get(symbol),
                    "receiver_mutates": program.analysis.receiver_mutates.get(symbol),
                    "pure": program.analysis.is_pure.get(symbol),
                    "writes_global": program.analysis.writes_global.get(symbol),
                    "foldable": program.optimization.foldable_functions.contains(symbol),
                    "fold_skip": program.optimization.fold_skip_reasons.get(symbol),
                })
            })
            .collect()
    };
    let variables: Vec<serde_json::Value> = {
        let mut vars: Vec<SymbolId> = program.analysis.var_mutability.keys().copied().collect();
        vars.sort_by_key(|s| name_of(*s));
        vars.iter()
            .map(|symbol| {
                json!({
                    "name": name_of(*symbol),
                    "mutability": format!("{:?}", program.analysis.var_mutability[symbol]),
                    "used": program.analysis.used_globals.contains(symbol),
                })
            })
            .collect()
    };
    let mut used_types: Vec<&String> = program.analysis.used_types.iter().collect();
    used_types.sort();
    json!({
        "functions": functions,
        "variables": variables,
        "used_types": used_types,
        "constexpr": {
            "values": program.optimization.constexpr_values.len(),
            "conditions": program.optimization.constexpr_conditions.len(),
            "initializers": program.optimization.constexpr_inits.len(),
            "promoted": program.optimization.known_symbol_values.len(),
        },
    })
}
