use crate::error::{MiningError, Result};
use crate::io::{scan, TransactionSource};

/// Per-item row counts over one pass of `source`.
/// `result[item]` is the number of rows containing `item`; slot 0 stays empty.
pub fn count_item_support<S: TransactionSource + ?Sized>(source: &mut S) -> Result<Vec<u64>> {
    let mut counts = vec![0u64; source.num_items() as usize + 1];
    scan(source, |row| {
        for &item in row {
            let slot = counts.get_mut(item as usize).ok_or_else(|| {
                MiningError::invalid(format!("item {} above the declared item count", item))
            })?;
            *slot += 1;
        }
        Ok(())
    })?;
    Ok(counts)
}

/// `floor(min_support * num_rows)`.
#[inline]
pub fn min_weight(min_support: f64, num_rows: u64) -> u64 {
    (min_support * num_rows as f64).floor() as u64
}

/// Threshold actually applied while mining: an itemset found in no row is
/// never frequent, even when `min_weight` rounds down to zero.
#[inline]
pub(crate) fn effective_min_weight(min_support: f64, num_rows: u64) -> u64 {
    min_weight(min_support, num_rows).max(1)
}

/// Accepts values in (0, 1].
pub fn validate_fraction(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(MiningError::invalid(format!("{} must be in (0, 1], got {}", name, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;

    #[test]
    fn test_count_item_support() {
        let mut src = MemorySource::from_rows(vec![vec![1, 2], vec![2], vec![2, 4]]).unwrap();
        assert_eq!(count_item_support(&mut src).unwrap(), vec![0, 1, 3, 0, 1]);
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(min_weight(0.6, 5), 3);
        assert_eq!(min_weight(0.01, 50), 0);
        assert_eq!(effective_min_weight(0.01, 50), 1);
        assert!(validate_fraction("min_support", 1.0).is_ok());
        assert!(validate_fraction("min_support", 0.0).is_err());
        assert!(validate_fraction("min_support", f64::NAN).is_err());
    }
}
