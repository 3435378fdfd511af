// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Minimum-cost bipartite assignment (Kuhn-Munkres).
//!
//! The implementation follows the formulation in "Parallel Computing Works"
//! by Fox, Williams and Messina, which handles rectangular matrices directly
//! instead of padding them square: we usually have far more resources
//! (columns) than requirements (rows).

use std::collections::BTreeSet;

/// Finds a minimum cost assignment for the given cost matrix. The matrix is
/// modified in an unspecified way. Returns, for each row, the index of the
/// column assigned to it, or `None` if no assignment is possible (more rows
/// than columns).
pub fn find_match(matrix: &mut [Vec<u64>]) -> Option<Vec<usize>> {
    let num_rows = matrix.len();
    if num_rows == 0 {
        return Some(Vec::new());
    }
    let num_cols = matrix[0].len();
    if num_rows > num_cols {
        return None;
    }

    // Step 0: row reduction. Relative costs stay the same, and subtracting
    // the row minimum creates zeroes to assign.
    for row in matrix.iter_mut() {
        let min_val = *row.iter().min().expect("rows are non-empty");
        if min_val != 0 {
            for cell in row.iter_mut() {
                *cell -= min_val;
            }
        }
    }

    // Step 1: greedy initial assignment.
    let mut row_assigned: Vec<Option<usize>> = vec![None; num_rows];
    let mut col_assigned: Vec<Option<usize>> = vec![None; num_cols];
    for (ri, row) in matrix.iter().enumerate() {
        for (ci, cell) in row.iter().enumerate() {
            if *cell == 0 && col_assigned[ci].is_none() {
                row_assigned[ri] = Some(ci);
                col_assigned[ci] = Some(ri);
                break;
            }
        }
    }

    let mut uncovered_rows: BTreeSet<usize> = BTreeSet::new();
    let mut uncovered_cols: BTreeSet<usize> = BTreeSet::new();
    let mut primed: Vec<Option<usize>> = Vec::new();
    let mut reinit = true;

    loop {
        if reinit {
            reinit = false;

            // Step 2: cover rows that contain an assignment; stop once every
            // row is assigned.
            uncovered_rows = row_assigned
                .iter()
                .enumerate()
                .filter_map(|(ri, ci)| ci.is_none().then_some(ri))
                .collect();
            if uncovered_rows.is_empty() {
                return Some(
                    row_assigned
                        .into_iter()
                        .map(|ci| ci.expect("all rows assigned"))
                        .collect(),
                );
            }
            uncovered_cols = (0..num_cols).collect();
            primed = vec![None; num_cols];
        }

        // Step 3: search for an uncovered zero.
        let found = uncovered_rows.iter().find_map(|&ri| {
            uncovered_cols
                .iter()
                .find(|&&ci| matrix[ri][ci] == 0)
                .map(|&ci| (ri, ci))
        });

        match found {
            Some((ri, ci)) => {
                primed[ci] = Some(ri);
                match col_assigned[ci] {
                    None => {
                        // Step 4: move assignments along the chain of primed
                        // zeroes, gaining one assignment.
                        let (mut ri, mut ci) = (ri, ci);
                        loop {
                            let next_ci = row_assigned[ri];
                            row_assigned[ri] = Some(ci);
                            col_assigned[ci] = Some(ri);
                            match next_ci {
                                None => break,
                                Some(next) => {
                                    ci = next;
                                    ri = primed[ci].expect("chain columns were primed");
                                }
                            }
                        }
                        reinit = true;
                    }
                    Some(assigned_ri) => {
                        // Flip the assignment's cover from row to column; the
                        // primed zero becomes covered.
                        uncovered_rows.insert(assigned_ri);
                        uncovered_cols.remove(&ci);
                    }
                }
            }
            None => {
                // Step 5: no uncovered zeroes left; create new ones by
                // shifting the minimum uncovered value. Assigned zeroes are
                // single-covered and stay untouched.
                let min_val = {
                    let matrix_ref: &[Vec<u64>] = matrix;
                    uncovered_rows
                        .iter()
                        .flat_map(|&ri| uncovered_cols.iter().map(move |&ci| matrix_ref[ri][ci]))
                        .min()
                        .expect("uncovered cells exist")
                };
                let covered_cols: Vec<usize> =
                    (0..num_cols).filter(|ci| !uncovered_cols.contains(ci)).collect();
                for (ri, row) in matrix.iter_mut().enumerate() {
                    if !uncovered_rows.contains(&ri) {
                        for &ci in &covered_cols {
                            row[ci] += min_val;
                        }
                    }
                }
                for &ri in &uncovered_rows {
                    for &ci in &uncovered_cols {
                        matrix[ri][ci] -= min_val;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    fn total_cost(matrix: &[Vec<u64>], assignment: &[usize]) -> u64 {
        assignment
            .iter()
            .enumerate()
            .map(|(ri, &ci)| matrix[ri][ci])
            .sum()
    }

    fn assert_valid(assignment: &[usize]) {
        let unique: BTreeSet<usize> = assignment.iter().copied().collect();
        assert_eq!(unique.len(), assignment.len(), "columns assigned twice");
    }

    #[test]
    fn empty_matrix_matches_trivially() {
        assert_eq!(find_match(&mut []), Some(vec![]));
    }

    #[test]
    fn more_rows_than_columns_is_unsatisfiable() {
        let mut matrix = vec![vec![1], vec![1]];
        assert_eq!(find_match(&mut matrix), None);
    }

    #[test]
    fn square_matrix_minimum() {
        let original = vec![vec![4, 1, 3], vec![2, 0, 5], vec![3, 2, 2]];
        let mut matrix = original.clone();
        let assignment = find_match(&mut matrix).unwrap();
        assert_valid(&assignment);
        // Optimal: (0,1)=1, (1,0)=2, (2,2)=2 -> 5.
        assert_eq!(total_cost(&original, &assignment), 5);
    }

    #[test]
    fn rectangular_matrix_skips_expensive_columns() {
        // Two specs, three resources with costs 1, 2, 2; an assignment
        // must take the cheap resource plus one of the others.
        let original = vec![vec![1, 2, 2], vec![1, 2, 2]];
        let mut matrix = original.clone();
        let assignment = find_match(&mut matrix).unwrap();
        assert_valid(&assignment);
        assert_eq!(total_cost(&original, &assignment), 3);
        assert!(assignment.contains(&0));
    }

    #[test]
    fn infinite_cells_are_avoided_when_possible() {
        let inf = 100;
        let original = vec![vec![inf, 1, inf, inf], vec![2, 3, inf, inf]];
        let mut matrix = original.clone();
        let assignment = find_match(&mut matrix).unwrap();
        assert_valid(&assignment);
        assert_eq!(assignment, vec![1, 0]);
    }

    #[test]
    fn refinement_reaches_optimum_where_greedy_fails() {
        // Greedy assigns (0,0) and then row 1 has no free zero; the
        // prime/flip refinement has to re-route.
        let original = vec![vec![0, 1], vec![0, 5]];
        let mut matrix = original.clone();
        let assignment = find_match(&mut matrix).unwrap();
        assert_valid(&assignment);
        assert_eq!(total_cost(&original, &assignment), 1);
        assert_eq!(assignment, vec![1, 0]);
    }
}
