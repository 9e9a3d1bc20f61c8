//! Module compaction (spec §4.2): type deduplication followed by a
//! symbol-reachability sweep. The last step before code emission.

use crate::common::error::CompilerResult;
use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::common::hash_tree::HashTreeSet;
use crate::common::queue::Queue;
use crate::ir::module::IrModule;
use crate::ir::types::{structural_eq, structural_hash, NamedType, TypeId};
use crate::opt::operation::{Immediate, OperationFamily};
use crate::opt::trace;

/// Phase 1: replace every `TypeId` used anywhere in the module with the
/// canonical id of the first structurally-equal type seen, then physically
/// drop types no retained object still names.
///
/// Returns the old-id -> new-id remap actually applied, for callers that
/// want to report what collapsed.
fn dedup_types(module: &mut IrModule) -> FxHashMap<TypeId, TypeId> {
    let count = module.type_count();
    let mut canonical_by_hash: FxHashMap<u64, Vec<(TypeId, NamedType)>> = FxHashMap::default();
    let mut remap: FxHashMap<TypeId, TypeId> = FxHashMap::default();

    for i in 0..count {
        let id = TypeId(i as u32);
        let entries = module.type_entries(id).expect("id in 0..count always resolves").to_vec();
        let hash = structural_hash(&entries);
        let bucket = canonical_by_hash.entry(hash).or_default();
        if let Some((canonical_id, _)) = bucket.iter().find(|(_, e)| structural_eq(e, &entries)) {
            remap.insert(id, *canonical_id);
        } else {
            remap.insert(id, id);
            bucket.push((id, entries));
        }
    }

    remap
}

fn remap_type_id(remap: &FxHashMap<TypeId, TypeId>, id: TypeId) -> TypeId {
    remap.get(&id).copied().unwrap_or(id)
}

/// Rewrites every type reference reachable from the module to its canonical
/// id. Safe to run before the symbol sweep: it only renames ids, it does not
/// decide which objects survive.
fn rewrite_type_refs(module: &mut IrModule, remap: &FxHashMap<TypeId, TypeId>) {
    for (_, func) in module.functions.iter_mut() {
        for (_, instr) in func.instructions.iter_mut() {
            match &mut instr.operation.payload {
                OperationFamily::TypedOneRef { ty, .. } | OperationFamily::TypedTwoRef { ty, .. } => {
                    *ty = remap_type_id(remap, *ty);
                }
                _ => {}
            }
        }
        for (_, asm) in func.inline_asms.iter_mut() {
            for param in asm.parameters.iter_mut() {
                param.ty = remap_type_id(remap, param.ty);
            }
        }
    }
    for (_, data) in module.data.iter_mut() {
        data.type_id = remap_type_id(remap, data.type_id);
    }
}

/// Rebuilds the type table so only ids still named by a *surviving* object
/// remain, densely renumbered from zero in first-use order. Must run after
/// [`sweep_unreachable_symbols`]: otherwise a type named only by a function
/// the sweep is about to drop would be counted as referenced and kept,
/// leaving an orphan (spec §4.2's post-compaction invariant).
fn shrink_type_table(module: &mut IrModule) {
    let mut still_referenced: HashTreeSet<TypeId> = HashTreeSet::new();
    for (_, func) in module.functions.iter() {
        for (_, instr) in func.instructions.iter() {
            match &instr.operation.payload {
                OperationFamily::TypedOneRef { ty, .. } | OperationFamily::TypedTwoRef { ty, .. } => {
                    still_referenced.insert(*ty);
                }
                _ => {}
            }
        }
        for (_, asm) in func.inline_asms.iter() {
            for param in &asm.parameters {
                still_referenced.insert(param.ty);
            }
        }
    }
    for (_, data) in module.data.iter() {
        still_referenced.insert(data.type_id);
    }

    let mut densify: FxHashMap<TypeId, TypeId> = FxHashMap::default();
    let mut kept = Vec::new();
    for old_id in still_referenced.iter().copied() {
        let entries = module.type_entries(old_id).map(|s| s.to_vec()).unwrap_or_default();
        let new_id = TypeId(kept.len() as u32);
        densify.insert(old_id, new_id);
        kept.push(entries);
    }

    for (_, func) in module.functions.iter_mut() {
        for (_, instr) in func.instructions.iter_mut() {
            match &mut instr.operation.payload {
                OperationFamily::TypedOneRef { ty, .. } | OperationFamily::TypedTwoRef { ty, .. } => {
                    if let Some(new_id) = densify.get(ty) {
                        *ty = *new_id;
                    }
                }
                _ => {}
            }
        }
        for (_, asm) in func.inline_asms.iter_mut() {
            for param in asm.parameters.iter_mut() {
                if let Some(new_id) = densify.get(&param.ty) {
                    param.ty = *new_id;
                }
            }
        }
    }
    for (_, data) in module.data.iter_mut() {
        if let Some(new_id) = densify.get(&data.type_id) {
            data.type_id = *new_id;
        }
    }

    module.replace_type_table(kept);
}

/// Phase 2: compute the reachable-symbol set from exported identifiers,
/// weak exports, constructors, destructors, and global inline-asm
/// parameters/jump-targets, then drop everything else.
fn sweep_unreachable_symbols(module: &mut IrModule) {
    let mut roots: Vec<String> = Vec::new();
    for (name, sym) in module.symbols.iter() {
        if sym.scope.is_export() {
            roots.push(name.clone());
        }
    }
    for (name, flags) in module.function_flags.iter() {
        if flags.constructor || flags.destructor {
            roots.push(name.clone());
        }
    }
    for id in module.inline_asm_ids().collect::<Vec<_>>() {
        if let Some(record) = module.inline_asm(id) {
            for sym in record.referenced_symbols() {
                roots.push(sym.to_string());
            }
        }
    }

    let mut reachable: FxHashSet<String> = FxHashSet::default();
    let mut worklist: Queue<String> = Queue::new();
    for r in roots {
        if reachable.insert(r.clone()) {
            worklist.push(r);
        }
    }

    while let Some(name) = worklist.pop_first() {
        let mut referenced = Vec::new();

        if let Some(func) = module.functions.get(&name) {
            trace::trace(func, |instr| {
                if let Ok(node) = func.instr(instr) {
                    match &node.operation.payload {
                        OperationFamily::Variable { name, .. } => referenced.push(name.clone()),
                        OperationFamily::Call { call } => {
                            if let Some(call_node) = func.calls.get(*call) {
                                if let Some(decl) = module.declaration(call_node.declaration) {
                                    if let Some(decl_name) = &decl.name {
                                        referenced.push(decl_name.clone());
                                    }
                                }
                            }
                        }
                        OperationFamily::Immediate(Immediate::StringRef(s)) => referenced.push(s.clone()),
                        _ => {}
                    }
                }
            });
        }

        if let Some(data) = module.data.get(&name) {
            for sym in data.referenced_symbols() {
                referenced.push(sym.to_string());
            }
        }

        if let Some(sym) = module.symbols.get(&name) {
            if let Some(alias) = &sym.alias {
                referenced.push(alias.clone());
            }
        }

        for other in referenced {
            if reachable.insert(other.clone()) {
                worklist.push(other);
            }
        }
    }

    module.functions.retain(|name, _| reachable.contains(name));
    module.function_flags.retain(|name, _| reachable.contains(name));
    module.data.retain(|name, _| reachable.contains(name));
    module.symbols.retain(|name, sym| reachable.contains(name) || sym.scope.is_export());
}

/// Runs both compaction phases in order, exactly as spec §4.2 prescribes:
/// type dedup first (so every surviving reference names a canonical id),
/// then the symbol sweep, then the type-table shrink — the shrink must come
/// last so its referenced-type scan sees only objects the sweep kept.
pub fn compact(module: &mut IrModule) -> CompilerResult<()> {
    let remap = dedup_types(module);
    rewrite_type_refs(module, &remap);
    sweep_unreachable_symbols(module);
    shrink_type_table(module);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::data::{DataValue as DV, Initializers, NamedData};
    use crate::ir::symbol::{Scope, Symbol};
    use crate::ir::types::{TypeEntry, TypeOpcode};
    use crate::opt::builder::FunctionBuilder;
    use crate::opt::operation::{Immediate, Opcode, OperationFamily as OF};
    use pretty_assertions::assert_eq;

    #[test]
    fn symbol_liveness_trace_keeps_only_reachable() {
        // spec §8 scenario 6: f (exported) calls g; g references string s;
        // h is internal and unreferenced.
        let mut module = IrModule::new();
        module.symbols.insert("f".into(), Symbol::new("f", Scope::Export));
        module.symbols.insert("g".into(), Symbol::new("g", Scope::Local));
        module.symbols.insert("h".into(), Symbol::new("h", Scope::Local));
        module.symbols.insert("s".into(), Symbol::new("s", Scope::Local));

        let g_decl = module.declare_function(crate::ir::module::FunctionDeclaration {
            name: Some("g".into()),
            parameter_types: vec![],
            return_type: None,
            vararg: false,
            returns_twice: false,
        });

        let mut fb = FunctionBuilder::new("f");
        let call = fb.new_call(g_decl).unwrap();
        fb.push_control(Opcode::Call, OF::Call { call }, false).unwrap();
        fb.push_control(Opcode::Return, OF::Return(None), false).unwrap();
        module.functions.insert("f".into(), fb.finish());

        let mut gb = FunctionBuilder::new("g");
        let s = gb
            .push(Opcode::StringRefConst, OF::Immediate(Immediate::StringRef("s".into())))
            .unwrap();
        gb.push_control(Opcode::Return, OF::Return(Some(s)), false).unwrap();
        module.functions.insert("g".into(), gb.finish());

        // h's only typed instruction names a type nothing else in the module
        // uses, so the bug this test guards against (the orphaned-type-table
        // regression of dropping the type shrink before the symbol sweep)
        // would otherwise leave this type behind after h is swept away.
        let h_only_type = module.intern_type(vec![TypeEntry::scalar(TypeOpcode::Float64, 8)]);
        let mut hb = FunctionBuilder::new("h");
        let hv = hb
            .push(Opcode::IntConst, OF::Immediate(Immediate::Int(0)))
            .unwrap();
        hb.push(Opcode::Bitcast, OF::TypedOneRef { ty: h_only_type, index: 0, value: hv }).unwrap();
        hb.push_control(Opcode::Return, OF::Return(None), false).unwrap();
        module.functions.insert("h".into(), hb.finish());

        let s_type = module.intern_type(vec![TypeEntry::scalar(TypeOpcode::Int32, 4)]);
        let mut data = NamedData::new(s_type);
        data.initializers = {
            let mut init = Initializers::new();
            init.set(0, DV::String("literal".into()));
            init
        };
        module.data.insert("s".into(), data);

        let type_count_before = module.type_count();

        compact(&mut module).unwrap();

        assert!(module.functions.contains_key("f"));
        assert!(module.functions.contains_key("g"));
        assert!(module.data.contains_key("s"));
        assert!(!module.functions.contains_key("h"));
        // h's type is gone too: every surviving type is named by a retained
        // instruction or data initializer (spec §4.2's post-compaction
        // invariant), so the count must actually drop, not just stay dense.
        assert!(module.type_count() < type_count_before);
        for i in 0..module.type_count() {
            assert_ne!(module.type_entries(TypeId(i as u32)).unwrap(), &[TypeEntry::scalar(TypeOpcode::Float64, 8)][..]);
        }
    }

    #[test]
    fn type_dedup_collapses_structurally_equal_types() {
        let mut module = IrModule::new();
        let a = module.intern_type(vec![TypeEntry::scalar(TypeOpcode::Int32, 4)]);
        let b = module.intern_type(vec![TypeEntry::scalar(TypeOpcode::Int32, 4)]);
        assert_eq!(a, b);
        compact(&mut module).unwrap();
        assert_eq!(module.type_count(), 0);
    }

    /// Builds a module with `dup_count` structurally-identical copies of one
    /// type interned before a reachable exported function `f` that names the
    /// copy at `use_index` via a `Bitcast`.
    fn module_with_duplicate_types(dup_count: usize, use_index: usize) -> IrModule {
        let mut module = IrModule::new();
        module.symbols.insert("f".into(), Symbol::new("f", Scope::Export));
        let mut ids = Vec::new();
        for _ in 0..dup_count {
            ids.push(module.intern_type(vec![TypeEntry::scalar(TypeOpcode::Int32, 4)]));
        }
        let used = ids[use_index % ids.len()];

        let mut fb = FunctionBuilder::new("f");
        let v = fb.push(Opcode::IntConst, OF::Immediate(Immediate::Int(0))).unwrap();
        fb.push(Opcode::Bitcast, OF::TypedOneRef { ty: used, index: 0, value: v }).unwrap();
        fb.push_control(Opcode::Return, OF::Return(None), false).unwrap();
        module.functions.insert("f".into(), fb.finish());
        module
    }

    proptest::proptest! {
        /// spec §8 invariant: compaction is idempotent — once a module has
        /// been compacted, running it again is a no-op (type table and
        /// reachable-symbol set both stay fixed).
        #[test]
        fn compaction_is_idempotent(dup_count in 1usize..8, use_index in 0usize..8) {
            let mut module = module_with_duplicate_types(dup_count, use_index);
            compact(&mut module).unwrap();
            assert_eq!(module.type_count(), 1);

            let types_once: Vec<_> = (0..module.type_count())
                .map(|i| module.type_entries(TypeId(i as u32)).unwrap().to_vec())
                .collect();
            let functions_once: std::collections::BTreeSet<_> = module.functions.iter().map(|(n, _)| n.clone()).collect();

            compact(&mut module).unwrap();

            let types_twice: Vec<_> = (0..module.type_count())
                .map(|i| module.type_entries(TypeId(i as u32)).unwrap().to_vec())
                .collect();
            let functions_twice: std::collections::BTreeSet<_> = module.functions.iter().map(|(n, _)| n.clone()).collect();

            assert_eq!(types_once, types_twice);
            assert_eq!(functions_once, functions_twice);
        }
    }
}
