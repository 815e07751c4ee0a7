//! Stack depth verification of compiled programs.

use super::compile::DEBUG_PINNER_FUNCTION_NAME;
use super::opcode::{listing, Op};
use crate::error::Error;

/// Verify the instruction list produced by the compiler.
///
/// Computes the stack depth before every instruction and checks that each
/// has enough operands to execute. Instructions reachable through multiple
/// paths (because of a jump) must be reached with the same depth on every
/// path. The depth after the last instruction must equal `end_depth`.
///
/// Returns the depth table: `depth[i]` is the stack size before instruction
/// `i`, `depth[ops.len()]` the final one.
pub fn depth_check(ops: &[Op], end_depth: i64) -> Result<Vec<i64>, Error> {
    let mut depth = vec![-1i64; ops.len() + 1];
    depth[0] = 0;

    let check_and_set = |depth: &mut Vec<i64>, j: usize, d: i64| -> Result<(), Error> {
        if depth[j] < 0 {
            depth[j] = d;
        }
        if d != depth[j] {
            return Err(Error::DepthMismatch {
                index: j,
                expected: d,
                actual: depth[j],
                listing: listing(Some(depth.as_slice()), ops),
            });
        }
        Ok(())
    };

    let mut debug_pinner_seen = false;

    for (i, op) in ops.iter().enumerate() {
        let (npop, npush) = op.arity();
        let (npop, npush) = (npop as i64, npush as i64);
        if depth[i] < npop {
            return Err(Error::StackUnderflow {
                index: i,
                expected: npop,
                actual: depth[i],
                listing: listing(Some(depth.as_slice()), ops),
            });
        }
        let d = depth[i] - npop + npush;
        check_and_set(&mut depth, i + 1, d)?;
        match op {
            Op::Jump { target, .. } => check_and_set(&mut depth, *target, d)?,
            Op::CallInjectionStartSpecial { .. } => debug_pinner_seen = true,
            Op::CallInjectionComplete {
                do_pinning: true, ..
            } if !debug_pinner_seen => {
                return Err(Error::PinningBeforeAcquire {
                    index: i,
                    fn_name: DEBUG_PINNER_FUNCTION_NAME,
                });
            }
            _ => {}
        }
    }

    if depth[ops.len()] != end_depth {
        return Err(Error::BadTerminalDepth {
            expected: end_depth,
            actual: depth[ops.len()],
            listing: listing(Some(depth.as_slice()), ops),
        });
    }
    Ok(depth)
}
