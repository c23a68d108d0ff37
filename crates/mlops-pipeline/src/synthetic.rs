//! Deterministic synthetic classification data

use mlops_artifact::Table;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Label column written by [`generate_classification`]
pub const TARGET_COLUMN: &str = "target";

/// Two-class dataset with `features` numeric columns plus [`TARGET_COLUMN`]
///
/// Each class is a noisy cluster around its own centre; the clusters do not
/// overlap, so a nearest-centroid model separates them perfectly.
/// The same seed always yields the same table.
#[must_use]
pub fn generate_classification(rows: usize, features: usize, seed: u64) -> Table {
    let mut rng = StdRng::seed_from_u64(seed);
    let centres: [Vec<f64>; 2] = [
        (0..features).map(|_| -2.5 + rng.gen_range(-0.5..0.5)).collect(),
        (0..features).map(|_| 2.5 + rng.gen_range(-0.5..0.5)).collect(),
    ];

    let mut header: Vec<String> = (0..features).map(|i| format!("feature_{i}")).collect();
    header.push(TARGET_COLUMN.to_string());

    let data = (0..rows)
        .map(|_| {
            let label = usize::from(rng.gen_bool(0.5));
            let mut row: Vec<String> = centres[label]
                .iter()
                .map(|c| format!("{:.4}", c + rng.gen_range(-1.5..1.5)))
                .collect();
            row.push(label.to_string());
            row
        })
        .collect();
    Table::new(header, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn shape_and_labels() {
        let table = generate_classification(100, 4, 42);
        assert_eq!(table.row_count(), 100);
        assert_eq!(table.column_count(), 5);
        assert_eq!(table.header()[4], TARGET_COLUMN);
        assert!(table.integrity().is_ok());
        assert!(table.rows().iter().all(|r| r[4] == "0" || r[4] == "1"));
        assert_eq!(table.numeric_columns(), vec![0, 1, 2, 3, 4]);
    }

    proptest! {
        #[test]
        fn same_seed_same_bytes(seed in any::<u64>(), rows in 1usize..50) {
            prop_assert_eq!(
                generate_classification(rows, 3, seed).to_csv(),
                generate_classification(rows, 3, seed).to_csv()
            );
        }
    }
}
