use std::collections::{BTreeMap, BTreeSet};

use super::columns;
use super::model::{CellValue, Dataset};

// ---------------------------------------------------------------------------
// Filter predicate: which values are accepted per column
// ---------------------------------------------------------------------------

/// Per-column selection state: maps column_name → set of accepted values.
/// A column absent from the map is unconstrained; an empty set accepts nothing.
pub type FilterState = BTreeMap<String, BTreeSet<CellValue>>;

/// Filter selecting rows whose feature extraction succeeded.
pub fn success_filter() -> FilterState {
    let mut filters = FilterState::new();
    filters.insert(
        columns::STATUS.to_string(),
        BTreeSet::from([CellValue::from(columns::STATUS_SUCCESS)]),
    );
    filters
}

/// Filter selecting rows usable for reliability statistics: successful
/// extraction and a resolved stable/turbulent batch label.
pub fn analysis_filter() -> FilterState {
    let mut filters = success_filter();
    filters.insert(
        columns::BATCH_TYPE.to_string(),
        BTreeSet::from([
            CellValue::from(columns::BATCH_STABLE),
            CellValue::from(columns::BATCH_TURBULENT),
        ]),
    );
    filters
}

/// Filter selecting successful stable-batch rows (the reference population).
pub fn stable_filter() -> FilterState {
    let mut filters = analysis_filter();
    filters.insert(
        columns::BATCH_TYPE.to_string(),
        BTreeSet::from([CellValue::from(columns::BATCH_STABLE)]),
    );
    filters
}

/// Return indices of rows that pass all active filters.
///
/// A row passes a column filter when:
/// * The column is not present in `filters` → passes (no constraint)
/// * The filter set for that column is empty → nothing selected → fails
/// * The row's value for that column is in the selected set → passes
/// * The row lacks the column → passes only if `Null` is selected
pub fn filtered_indices(dataset: &Dataset, filters: &FilterState) -> Vec<usize> {
    dataset
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            filters.iter().all(|(col, selected)| {
                if selected.is_empty() {
                    return false;
                }
                match row.get(col) {
                    Some(val) => selected.contains(val),
                    None => selected.contains(&CellValue::Null),
                }
            })
        })
        .map(|(i, _)| i)
        .collect()
}
