//! Join ordering for multi-table SELECT
//!
//! Rows are produced by nested loops over the FROM tables. The planner picks
//! the loop order and decides, for each WHERE conjunct, the outermost loop
//! level at which every column it reads already has a current row. A
//! conjunct placed there filters as early as possible.

use crate::sql::{Expr, COST_UNAVAILABLE};

/// Up to this many tables every join order is tried; above it the FROM
/// order is used.
pub const MAX_PERMUTED_TABLES: usize = 6;

/// Fraction of rows a single conjunct is assumed to let through
const FILTER_DIVISOR: u64 = 4;

/// A chosen loop order and the conjuncts checked at each level
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    /// Scope indices of the tables, outermost loop first
    pub order: Vec<usize>,
    /// Conjuncts evaluated once the table at the same position of
    /// `order` has a current row
    pub filters: Vec<Vec<Expr>>,
    /// Conjuncts that read no table; checked once before any scan
    pub constant: Vec<Expr>,
    pub cost: u64,
}

/// Pick the cheapest loop order for tables with the given row counts.
/// `conjuncts` must already be bound to the same scope.
pub fn plan_joins(row_counts: &[u64], conjuncts: Vec<Expr>) -> JoinPlan {
    let table_count = row_counts.len();
    let none = vec![false; table_count];
    let (constant, conjuncts): (Vec<Expr>, Vec<Expr>) = conjuncts
        .into_iter()
        .partition(|c| c.cost(&none) != COST_UNAVAILABLE);

    let candidates = if table_count <= MAX_PERMUTED_TABLES {
        permutations(table_count)
    } else {
        vec![(0..table_count).collect()]
    };

    let mut best: Option<JoinPlan> = None;
    for order in candidates {
        let (filters, cost) = place_conjuncts(&order, row_counts, &conjuncts);
        if best.as_ref().map_or(true, |b| cost < b.cost) {
            best = Some(JoinPlan {
                order,
                filters,
                constant: Vec::new(),
                cost,
            });
        }
    }

    let mut plan = best.unwrap_or(JoinPlan {
        order: Vec::new(),
        filters: Vec::new(),
        constant: Vec::new(),
        cost: 0,
    });
    plan.constant = constant;
    plan
}

/// Assign each conjunct to the first level where its cost is known and
/// estimate the total work of the loop nest.
fn place_conjuncts(order: &[usize], row_counts: &[u64], conjuncts: &[Expr]) -> (Vec<Vec<Expr>>, u64) {
    let mut available = vec![false; row_counts.len()];
    let mut placed = vec![false; conjuncts.len()];
    let mut filters = vec![Vec::new(); order.len()];
    let mut rows: u64 = 1;
    let mut total: u64 = 0;

    for (level, &table) in order.iter().enumerate() {
        available[table] = true;
        rows = rows.saturating_mul(row_counts[table].max(1));

        let mut level_cost: u64 = 1;
        for (i, conjunct) in conjuncts.iter().enumerate() {
            if placed[i] {
                continue;
            }
            let cost = conjunct.cost(&available);
            let last = level + 1 == order.len();
            if cost != COST_UNAVAILABLE || last {
                placed[i] = true;
                level_cost = level_cost.saturating_add(cost.min(COST_UNAVAILABLE - 1));
                filters[level].push(conjunct.clone());
            }
        }

        total = total.saturating_add(rows.saturating_mul(level_cost));
        for _ in &filters[level] {
            rows = (rows / FILTER_DIVISOR).max(1);
        }
    }

    (filters, total)
}

/// All orderings of `0..n`, starting with the identity
fn permutations(n: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(n);
    let mut used = vec![false; n];
    permute(n, &mut current, &mut used, &mut out);
    out
}

fn permute(n: usize, current: &mut Vec<usize>, used: &mut [bool], out: &mut Vec<Vec<usize>>) {
    if current.len() == n {
        out.push(current.clone());
        return;
    }
    for i in 0..n {
        if !used[i] {
            used[i] = true;
            current.push(i);
            permute(n, current, used, out);
            current.pop();
            used[i] = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataType;
    use crate::sql::BinaryOp;
    use crate::storage::Value;

    fn col(table: usize, column: usize) -> Expr {
        Expr::BoundColumn {
            table,
            column,
            name: format!("c{}_{}", table, column),
            data_type: DataType::Integer,
        }
    }

    #[test]
    fn test_permutations() {
        assert_eq!(permutations(0), vec![Vec::<usize>::new()]);
        assert_eq!(permutations(3).len(), 6);
        assert_eq!(permutations(3)[0], vec![0, 1, 2]);
    }

    #[test]
    fn test_filtered_table_goes_first() {
        // t1.c0 = 5 filters the large table; the join condition needs both
        let filter = Expr::binary(BinaryOp::Eq, col(1, 0), Expr::Literal(Value::Integer(5)));
        let join = Expr::binary(BinaryOp::Eq, col(0, 0), col(1, 1));
        let plan = plan_joins(&[100, 1000], vec![join.clone(), filter.clone()]);

        assert_eq!(plan.order, vec![1, 0]);
        assert_eq!(plan.filters[0], vec![filter]);
        assert_eq!(plan.filters[1], vec![join]);
        assert!(plan.constant.is_empty());
    }

    #[test]
    fn test_constant_conjuncts() {
        let constant = Expr::binary(
            BinaryOp::Eq,
            Expr::Literal(Value::Integer(1)),
            Expr::Param(0),
        );
        let plan = plan_joins(&[10], vec![constant.clone()]);
        assert_eq!(plan.constant, vec![constant]);
        assert_eq!(plan.filters, vec![Vec::<Expr>::new()]);
    }

    #[test]
    fn test_many_tables_keep_from_order() {
        let counts = vec![1; MAX_PERMUTED_TABLES + 1];
        let plan = plan_joins(&counts, Vec::new());
        assert_eq!(plan.order, (0..counts.len()).collect::<Vec<_>>());
    }
}
