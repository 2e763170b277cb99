use codlua_bytecode::instruction::{Op, Target};
use rustc_hash::FxHashSet;

use crate::CfgError;

/// Discover basic block boundaries from a function's instruction stream.
///
/// A new block starts at:
/// - PC 0 (function entry)
/// - The target of any jump
/// - The instruction after any jump, return or skipping `LoadBool`
/// - Two past a conditional test (the test and its jump stay together)
/// - Each loop-step instruction, so loop control gets a block of its own
///
/// Returns a sorted list of block-start PCs.
pub fn discover_block_starts(instructions: &[Op]) -> Result<Vec<usize>, CfgError> {
    let len = instructions.len();
    let mut starts = FxHashSet::default();
    starts.insert(0);

    for (pc, op) in instructions.iter().enumerate() {
        match *op {
            Op::Compare { .. } | Op::Test { .. } => {
                if !matches!(instructions.get(pc + 1), Some(Op::Jump { .. })) {
                    return Err(CfgError::MissingBranchJump { pc });
                }
                starts.insert(pc + 2);
            }

            Op::Jump { target } => {
                starts.insert(checked_target(pc, target, len)?);
                starts.insert(pc + 1);
            }

            Op::LoadBool {
                skip_next: true, ..
            } => {
                starts.insert(pc + 1);
                starts.insert(pc + 2);
            }

            Op::Return { .. } | Op::TailCall { .. } => {
                starts.insert(pc + 1);
            }

            Op::ForNumPrep { loop_pc, .. } => {
                let loop_pc = checked_target(pc, loop_pc, len)?;
                if !matches!(instructions[loop_pc], Op::ForNumLoop { .. }) {
                    return Err(CfgError::MalformedLoop { pc });
                }
                starts.insert(pc + 1); // loop body start
                starts.insert(loop_pc); // step block
                starts.insert(loop_pc + 1); // after loop
            }

            Op::ForNumLoop { body, .. } => {
                starts.insert(checked_target(pc, body, len)?);
                starts.insert(pc);
                starts.insert(pc + 1);
            }

            Op::ForGenCall { .. } => {
                if !matches!(instructions.get(pc + 1), Some(Op::ForGenLoop { .. })) {
                    return Err(CfgError::MalformedLoop { pc });
                }
                starts.insert(pc);
            }

            Op::ForGenLoop { body, .. } => {
                if pc == 0 || !matches!(instructions[pc - 1], Op::ForGenCall { .. }) {
                    return Err(CfgError::MalformedLoop { pc });
                }
                starts.insert(checked_target(pc, body, len)?);
                starts.insert(pc + 1);
            }

            _ => {}
        }
    }

    let mut sorted: Vec<usize> = starts.into_iter().filter(|&pc| pc < len).collect();
    sorted.sort_unstable();
    Ok(sorted)
}

/// Compute block ranges from sorted start PCs and total instruction count.
/// Returns (start_pc, end_pc_exclusive) pairs.
pub fn block_ranges(starts: &[usize], instruction_count: usize) -> Vec<(usize, usize)> {
    starts
        .windows(2)
        .map(|w| (w[0], w[1]))
        .chain(std::iter::once((
            *starts.last().unwrap_or(&0),
            instruction_count,
        )))
        .collect()
}

pub(crate) fn checked_target(pc: usize, target: Target, len: usize) -> Result<usize, CfgError> {
    if target < 0 || target as usize >= len {
        return Err(CfgError::DanglingJumpTarget { pc, target });
    }
    Ok(target as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codlua_bytecode::instruction::{CmpOp, Literal, Operand, Reg};

    fn ret() -> Op {
        Op::Return {
            first: Reg(0),
            count: Some(0),
        }
    }

    fn load(dst: u8, v: i64) -> Op {
        Op::Load {
            dst: Reg(dst),
            value: Operand::Lit(Literal::Int(v)),
        }
    }

    #[test]
    fn straight_line_is_one_block() {
        let insns = vec![load(0, 1), load(1, 2), ret()];
        assert_eq!(discover_block_starts(&insns).unwrap(), vec![0]);
        assert_eq!(block_ranges(&[0], 3), vec![(0, 3)]);
    }

    #[test]
    fn test_and_jump_share_a_block() {
        // 0: LT; 1: JMP 4; 2: load; 3: RETURN; 4: load; 5: RETURN
        let insns = vec![
            Op::Compare {
                op: CmpOp::Lt,
                lhs: Operand::Reg(Reg(0)),
                rhs: Operand::Reg(Reg(1)),
                jump_when: true,
            },
            Op::Jump { target: 4 },
            load(2, 10),
            ret(),
            load(2, 20),
            ret(),
        ];
        assert_eq!(discover_block_starts(&insns).unwrap(), vec![0, 2, 4]);
    }

    #[test]
    fn jump_outside_function_is_rejected() {
        let insns = vec![Op::Jump { target: 7 }, ret()];
        assert_eq!(
            discover_block_starts(&insns),
            Err(CfgError::DanglingJumpTarget { pc: 0, target: 7 })
        );
        let insns = vec![Op::Jump { target: -1 }, ret()];
        assert!(discover_block_starts(&insns).is_err());
    }

    #[test]
    fn test_without_jump_is_rejected() {
        let insns = vec![
            Op::Test {
                value: Reg(0),
                copy_to: None,
                jump_when: false,
            },
            ret(),
        ];
        assert_eq!(
            discover_block_starts(&insns),
            Err(CfgError::MissingBranchJump { pc: 0 })
        );
    }

    #[test]
    fn numeric_loop_blocks() {
        // 0..2 loads, 3: FORPREP ->5, 4: body, 5: FORLOOP ->4, 6: RETURN
        let insns = vec![
            load(0, 1),
            load(1, 10),
            load(2, 1),
            Op::ForNumPrep {
                base: Reg(0),
                loop_pc: 5,
            },
            load(4, 0),
            Op::ForNumLoop {
                base: Reg(0),
                body: 4,
            },
            ret(),
        ];
        assert_eq!(discover_block_starts(&insns).unwrap(), vec![0, 4, 5, 6]);
    }
}
