//! Type representing an S-box and its difference distribution table.

use crate::error::{Error, Result};

/// The 4-bit S-box of the reference cipher.
pub const CIPHER_FOUR_SBOX: [u8; 16] = [6, 4, 12, 5, 0, 7, 2, 14, 1, 15, 3, 13, 8, 10, 9, 11];

/// One entry of the difference distribution table.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DifferentialEntry {
    pub input_diff: u8,
    pub output_diff: u8,
    pub count: usize,
}

impl DifferentialEntry {
    /// Probability of the differential over one S-box application.
    pub fn probability(&self) -> f64 {
        self.count as f64 / 16.0
    }
}

/// A structure that represents a 4-bit S-box together with its DDT.
#[derive(Clone, Debug)]
pub struct Sbox {
    table: [u8; 16],
    inverse: [u8; 16],
    ddt: Vec<Vec<usize>>,
    rows: Vec<Vec<DifferentialEntry>>,
}

impl Sbox {
    /// Creates a new S-box from its table description. Fails if the table
    /// is not a bijection on [0, 15].
    pub fn new(table: [u8; 16]) -> Result<Sbox> {
        let mut seen = [false; 16];

        for &v in &table {
            if v > 15 || seen[v as usize] {
                return Err(Error::InvariantViolation(format!(
                    "s-box table is not a bijection on [0, 15]: {:?}",
                    table
                )));
            }
            seen[v as usize] = true;
        }

        let mut inverse = [0u8; 16];

        for (x, &v) in table.iter().enumerate() {
            inverse[v as usize] = x as u8;
        }

        let ddt = Sbox::generate_ddt(&table);

        // Nonzero input differences only, sorted by descending count with
        // the smaller difference first on equal counts.
        let mut rows = vec![Vec::new(); 16];

        for input_diff in 1..16 {
            for output_diff in 1..16 {
                let count = ddt[input_diff][output_diff];

                if count > 0 {
                    rows[input_diff].push(DifferentialEntry {
                        input_diff: input_diff as u8,
                        output_diff: output_diff as u8,
                        count,
                    });
                }
            }
        }

        for row in rows.iter_mut() {
            row.sort_by_key(|e| (std::cmp::Reverse(e.count), e.output_diff));
        }

        Ok(Sbox {
            table,
            inverse,
            ddt,
            rows,
        })
    }

    /// Generates the DDT associated with the S-box.
    fn generate_ddt(table: &[u8; 16]) -> Vec<Vec<usize>> {
        let mut ddt = vec![vec![0; 16]; 16];

        for plaintext_0 in 0..16 {
            let ciphertext_0 = table[plaintext_0];

            for (in_diff, ddt_row) in ddt.iter_mut().enumerate() {
                let plaintext_1 = plaintext_0 ^ in_diff;
                let ciphertext_1 = table[plaintext_1];

                ddt_row[(ciphertext_0 ^ ciphertext_1) as usize] += 1;
            }
        }

        ddt
    }

    /// Applies the S-box to a nibble.
    #[inline(always)]
    pub fn apply(&self, x: u8) -> u8 {
        self.table[x as usize]
    }

    /// Applies the inverse S-box to a nibble.
    #[inline(always)]
    pub fn apply_inverse(&self, x: u8) -> u8 {
        self.inverse[x as usize]
    }

    /// Number of input pairs with difference `input_diff` mapping to
    /// `output_diff`.
    pub fn count(&self, input_diff: u8, output_diff: u8) -> usize {
        self.ddt[input_diff as usize][output_diff as usize]
    }

    /// Nonzero DDT entries for a fixed nonzero input difference, sorted by
    /// descending count.
    pub fn row(&self, input_diff: u8) -> &[DifferentialEntry] {
        &self.rows[input_diff as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_sbox_is_bijective() {
        assert!(Sbox::new(CIPHER_FOUR_SBOX).is_ok());
    }

    #[test]
    fn rejects_non_bijective_table() {
        let mut table = CIPHER_FOUR_SBOX;
        table[3] = table[7];

        assert!(Sbox::new(table).is_err());
    }

    #[test]
    fn inverse_round_trips() {
        let sbox = Sbox::new(CIPHER_FOUR_SBOX).unwrap();

        for x in 0..16 {
            assert_eq!(sbox.apply_inverse(sbox.apply(x)), x);
        }
    }

    #[test]
    fn rows_sum_to_sixteen() {
        let sbox = Sbox::new(CIPHER_FOUR_SBOX).unwrap();

        for input_diff in 1..16 {
            let sum: usize = (0..16).map(|o| sbox.count(input_diff, o)).sum();
            assert_eq!(sum, 16);
        }
    }

    #[test]
    fn input_diff_one_distribution() {
        let sbox = Sbox::new(CIPHER_FOUR_SBOX).unwrap();
        let row = sbox.row(1);

        let entries: Vec<(u8, usize)> = row.iter().map(|e| (e.output_diff, e.count)).collect();
        assert_eq!(entries, vec![(2, 6), (14, 4), (7, 2), (9, 2), (12, 2)]);
    }
}
