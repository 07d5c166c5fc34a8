use crate::ir::Stmt3;

/// A basic block as a half-open range `[start, end)` into a method's
/// statement list. Nothing downstream reorders blocks — the emitter walks
/// them in ascending id order, which is exactly program order — but
/// carving the method into leader-delimited blocks is itself a structural
/// property worth keeping visible and testable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub id: usize,
    pub start: usize,
    pub end: usize,
}

fn ends_block(stmt: &Stmt3) -> bool {
    matches!(stmt, Stmt3::Goto(_) | Stmt3::IfGoto { .. })
}

fn is_jump_target(stmt: &Stmt3) -> bool {
    matches!(stmt, Stmt3::Label(_))
}

/// Leader rule: the first statement, any statement that is a jump target
/// (a label), and any statement immediately following a jump.
pub fn leaders(stmts: &[Stmt3]) -> Vec<usize> {
    if stmts.is_empty() {
        return Vec::new();
    }
    let mut flags = vec![false; stmts.len()];
    flags[0] = true;
    for i in 0..stmts.len() {
        if is_jump_target(&stmts[i]) {
            flags[i] = true;
        }
        if i > 0 && ends_block(&stmts[i - 1]) {
            flags[i] = true;
        }
    }
    flags.into_iter().enumerate().filter_map(|(i, is_leader)| is_leader.then_some(i)).collect()
}

pub fn build_blocks(stmts: &[Stmt3]) -> Vec<Block> {
    let leader_idxs = leaders(stmts);
    let mut blocks = Vec::with_capacity(leader_idxs.len());
    for (id, &start) in leader_idxs.iter().enumerate() {
        let end = leader_idxs.get(id + 1).copied().unwrap_or(stmts.len());
        blocks.push(Block { id, start, end });
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Exp3, Un3};

    fn label(s: &str) -> Stmt3 {
        Stmt3::Label(s.to_string())
    }

    #[test]
    fn test_single_straight_line_block() {
        let stmts = vec![Stmt3::Println { value: Exp3::IntLit(1) }, Stmt3::Return(None)];
        let blocks = build_blocks(&stmts);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], Block { id: 0, start: 0, end: 2 });
    }

    #[test]
    fn test_if_goto_splits_into_three_blocks() {
        let stmts = vec![
            Stmt3::IfGoto { cond: Exp3::UnOp { op: Un3::Not, operand: Box::new(Exp3::BoolLit(true)) }, label: "L0".into() },
            Stmt3::Println { value: Exp3::IntLit(1) },
            Stmt3::Goto("L1".into()),
            label("L0"),
            Stmt3::Println { value: Exp3::IntLit(2) },
            label("L1"),
        ];
        let blocks = build_blocks(&stmts);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].start, 0);
        assert_eq!(blocks[1].start, 1);
        assert_eq!(blocks[2].start, 3);
        assert_eq!(blocks[3].start, 5);
    }
}
