//! Derived columns computed across movement categories.

use crate::error::Result;
use crate::normalizer::labels::{ADJUSTED_PROJECTION, PROJECTED, RECEIVED};
use crate::table::{CanonicalTable, DIFFERENCE_COLUMN, PRECISION_COLUMN};
use tracing::debug;

/// Add `diferencia_ajustada` and `precision_proy` when the table has both
/// projected and received tonnage; otherwise return it unchanged.
pub fn add_derived_metrics(table: &CanonicalTable) -> Result<CanonicalTable> {
    if !table.has_column(PROJECTED) || !table.has_column(RECEIVED) {
        debug!("Projected or received tonnage missing; no derived metrics");
        return Ok(table.clone());
    }

    let projected = table.values(PROJECTED)?;
    let received = table.values(RECEIVED)?;
    let adjusted = if table.has_column(ADJUSTED_PROJECTION) {
        Some(table.values(ADJUSTED_PROJECTION)?)
    } else {
        None
    };

    let diff = difference(adjusted.as_deref(), &received);
    let ratio = precision(&received, &projected);

    table
        .with_column(DIFFERENCE_COLUMN, diff)?
        .with_column(PRECISION_COLUMN, ratio)
}

/// `adjusted - received`, pointwise.
///
/// An absent adjusted column counts as zero; a missing cell in a present
/// column stays missing.
pub fn difference(adjusted: Option<&[Option<f64>]>, received: &[Option<f64>]) -> Vec<Option<f64>> {
    match adjusted {
        Some(adjusted) => adjusted
            .iter()
            .zip(received)
            .map(|(a, r)| Some((*a)? - (*r)?))
            .collect(),
        None => received.iter().map(|r| r.map(|r| -r)).collect(),
    }
}

/// `received / projected * 100`, with infinities and NaN as missing.
pub fn precision(received: &[Option<f64>], projected: &[Option<f64>]) -> Vec<Option<f64>> {
    received
        .iter()
        .zip(projected)
        .map(|(r, p)| {
            let ratio = (*r)? / (*p)? * 100.0;
            ratio.is_finite().then_some(ratio)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DateAxis;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn table(with_adjusted: bool) -> CanonicalTable {
        let index = vec![
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        ];
        let mut columns = vec![
            (PROJECTED.to_string(), vec![Some(200.0), Some(0.0)]),
            (RECEIVED.to_string(), vec![Some(150.0), Some(40.0)]),
        ];
        if with_adjusted {
            columns.push((ADJUSTED_PROJECTION.to_string(), vec![Some(180.0), Some(50.0)]));
        }
        CanonicalTable::from_columns(index, columns, DateAxis::Calendar).unwrap()
    }

    #[test]
    fn test_adds_both_columns() {
        let result = add_derived_metrics(&table(true)).unwrap();

        assert_eq!(
            result.values(DIFFERENCE_COLUMN).unwrap(),
            vec![Some(30.0), Some(10.0)]
        );
        assert_eq!(
            result.values(PRECISION_COLUMN).unwrap(),
            vec![Some(75.0), None]
        );
        assert_eq!(result.category_columns().len(), 3);
    }

    #[test]
    fn test_absent_adjusted_counts_as_zero() {
        let result = add_derived_metrics(&table(false)).unwrap();
        assert_eq!(
            result.values(DIFFERENCE_COLUMN).unwrap(),
            vec![Some(-150.0), Some(-40.0)]
        );
    }

    #[test]
    fn test_missing_adjusted_cell_propagates() {
        let adjusted = [None, Some(5.0)];
        let received = [Some(1.0), Some(2.0)];
        assert_eq!(
            difference(Some(&adjusted[..]), &received),
            vec![None, Some(3.0)]
        );
    }

    #[test]
    fn test_precision_never_infinite() {
        let values = precision(
            &[Some(10.0), Some(-5.0), Some(0.0), None],
            &[Some(0.0), Some(0.0), Some(0.0), Some(1.0)],
        );
        assert_eq!(values, vec![None, None, None, None]);
    }

    #[test]
    fn test_without_projection_table_is_unchanged() {
        let index = vec![NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()];
        let base = CanonicalTable::from_columns(
            index,
            vec![(RECEIVED.to_string(), vec![Some(1.0)])],
            DateAxis::Calendar,
        )
        .unwrap();

        let result = add_derived_metrics(&base).unwrap();
        assert_eq!(result.column_names(), vec![RECEIVED.to_string()]);
    }
}
