//! Array construction.
//!
//! ```text
//! v1 <- const 3
//! v2 <- new-array v1 int[]
//! aput v5, v2[v6]               v2 <- filled-new-array int[] {v5, v7, v9}
//! aput v7, v2[v8]         =>
//! aput v9, v2[v4]
//! ```
//!
//! Only small arrays of `int` or reference elements qualify, every element must be stored
//! exactly once, and the array must not be used by anything else before the last store.

use crate::{
    analysis::ir::{BlockId, IrCode, IrOp, ValueId},
    compiler::{
        passes::{constant_values, int_constant},
        EventKind, PassContext,
    },
    program::{ConstValue, TypeName},
    Result,
};

const MAX_FILLED_SIZE: i64 = 5;

struct Construction {
    new_array: usize,
    /// Instruction index of the store of each element
    stores: Vec<usize>,
    elements: Vec<ValueId>,
    dest: ValueId,
    ty: TypeName,
}

fn element_supported(array_type: &TypeName) -> bool {
    match array_type.element_type() {
        Some(element) => element == TypeName::int() || !element.is_primitive(),
        None => false,
    }
}

fn find_construction(
    instructions: &[IrOp],
    constants: &[Option<ConstValue>],
) -> Option<Construction> {
    'candidates: for (start, op) in instructions.iter().enumerate() {
        let IrOp::NewArray { dest, size, ty } = op else {
            continue;
        };
        let Some(size) = int_constant(constants, *size).filter(|n| (1..=MAX_FILLED_SIZE).contains(n))
        else {
            continue;
        };
        if !element_supported(ty) {
            continue;
        }
        let size = size as usize;
        let mut stores = vec![None; size];
        let mut elements = vec![None; size];
        let mut found = 0;
        for (offset, next) in instructions[start + 1..].iter().enumerate() {
            if found == size {
                break;
            }
            if let IrOp::ArrayPut {
                value,
                array,
                index,
                ..
            } = next
            {
                if array == dest && value != dest {
                    let slot = int_constant(constants, *index)
                        .and_then(|i| usize::try_from(i).ok())
                        .filter(|&i| i < size && stores[i].is_none());
                    let Some(slot) = slot else {
                        continue 'candidates;
                    };
                    stores[slot] = Some(start + 1 + offset);
                    elements[slot] = Some(*value);
                    found += 1;
                    continue;
                }
            }
            if next.is_terminator() || next.uses().contains(dest) {
                continue 'candidates;
            }
        }
        if found < size {
            continue;
        }
        return Some(Construction {
            new_array: start,
            stores: stores.into_iter().flatten().collect(),
            elements: elements.into_iter().flatten().collect(),
            dest: *dest,
            ty: ty.clone(),
        });
    }
    None
}

/// Replaces element-wise initialized small arrays by `filled-new-array`.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let constants = constant_values(code);
    let mut changed = false;
    for b in 0..code.block_count() {
        let block = BlockId::new(b);
        if !code.block(block).catch_handlers.is_empty() {
            continue;
        }
        while let Some(found) = find_construction(&code.block(block).instructions, &constants) {
            let last = found.stores.iter().copied().max().unwrap_or(found.new_array);
            let instructions = &mut code.block_mut(block).instructions;
            instructions[last] = IrOp::FilledNewArray {
                dest: Some(found.dest),
                ty: found.ty.clone(),
                args: found.elements,
            };
            let mut dropped: Vec<usize> = found
                .stores
                .iter()
                .copied()
                .filter(|&i| i != last)
                .chain(std::iter::once(found.new_array))
                .collect();
            dropped.sort_unstable();
            for index in dropped.into_iter().rev() {
                instructions.remove(index);
            }

            ctx.events
                .record(EventKind::ArrayConstructed)
                .at(ctx.method.id.clone(), found.new_array)
                .message(format!("filled-new-array {}", found.ty))
                .pass("arrays");
            changed = true;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{IrBuilder, RegisterIrBuilder},
        compiler::{CompilerOptions, EventLog},
        program::{EncodedMethod, ValueType},
        test::{method_from, program_with},
    };

    fn optimize(method: &EncodedMethod) -> (IrCode, bool) {
        let program = program_with(vec![method.clone()]);
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut ctx = PassContext::new(&program, &options, method, &events);
        let mut code = RegisterIrBuilder.build_ir(method).unwrap().unwrap();
        let changed = run(&mut code, &mut ctx).unwrap();
        code.verify_ssa().unwrap();
        (code, changed)
    }

    #[test]
    fn test_int_array_filled() {
        let method = method_from("p.A.pair(int,int)int[]", 5, |asm| {
            asm.const_int(2, 2)
                .new_array(3, 2, TypeName::new("int[]"))
                .const_int(4, 1)
                .array_put(1, 3, 4, ValueType::Int)
                .const_int(4, 0)
                .array_put(0, 3, 4, ValueType::Int)
                .return_value(3);
        });
        let (code, changed) = optimize(&method);
        assert!(changed);
        let args = code
            .instructions()
            .find_map(|(_, op)| match op {
                IrOp::FilledNewArray { args, .. } => Some(args.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(args, vec![ValueId::new(0), ValueId::new(1)]);
        assert!(!code
            .instructions()
            .any(|(_, op)| matches!(op, IrOp::NewArray { .. } | IrOp::ArrayPut { .. })));
    }

    #[test]
    fn test_array_read_before_filled() {
        let method = method_from("p.A.len(int)int", 4, |asm| {
            asm.const_int(1, 1)
                .new_array(2, 1, TypeName::new("int[]"))
                .array_length(3, 2)
                .const_int(1, 0)
                .array_put(0, 2, 1, ValueType::Int)
                .return_value(3);
        });
        let (_, changed) = optimize(&method);
        assert!(!changed);
    }

    #[test]
    fn test_long_elements_kept() {
        let method = method_from("p.A.one(long)long[]", 4, |asm| {
            asm.const_int(1, 1)
                .new_array(2, 1, TypeName::new("long[]"))
                .const_int(3, 0)
                .array_put(0, 2, 3, ValueType::Long)
                .return_value(2);
        });
        let (_, changed) = optimize(&method);
        assert!(!changed);
    }
}
