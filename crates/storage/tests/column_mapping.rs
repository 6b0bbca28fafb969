use std::collections::HashSet;

use bitd_storage::Column;

#[test]
fn column_index_and_name_are_stable() {
    let mut names = HashSet::new();
    for (idx, column) in Column::ALL.iter().copied().enumerate() {
        assert_eq!(column.index(), idx);
        assert!(names.insert(column.as_str()), "duplicate name for {column:?}");
    }
    assert_eq!(names.len(), Column::ALL.len());
}
