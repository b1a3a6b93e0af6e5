use bytes::Bytes;

use crate::result::ResultSet;

fn sample() -> ResultSet {
    ResultSet::from_parts(
        vec!["Id".to_string(), "UserName".to_string()],
        vec![
            vec![Some(Bytes::from_static(b"1")), Some(Bytes::from_static(b"alice"))],
            vec![Some(Bytes::from_static(b"2")), None],
        ],
        0,
        0,
    )
}

#[test]
fn dimensions() {
    let result = sample();
    assert_eq!(result.row_count(), 2);
    assert_eq!(result.column_count(), 2);
}

#[test]
fn column_names_keep_original_case() {
    let result = sample();
    assert_eq!(result.column_name(0), "Id");
    assert_eq!(result.column_name(1), "UserName");
}

#[test]
fn column_index_is_case_insensitive() {
    let result = sample();
    assert_eq!(result.column_index("username"), Some(1));
    assert_eq!(result.column_index("USERNAME"), Some(1));
    assert_eq!(result.column_index("UserName"), Some(1));
    assert_eq!(result.column_index("Id"), result.column_index("id"));
    assert_eq!(result.column_index("missing"), None);
}

#[test]
fn value_and_length() {
    let result = sample();
    assert_eq!(result.value(0, 1), Some(&b"alice"[..]));
    assert_eq!(result.length(0, 1), 5);
    assert_eq!(result.str_value(0, 1).unwrap(), Some("alice"));
}

#[test]
fn null_cells() {
    let result = sample();
    assert!(result.is_null(1, 1));
    assert_eq!(result.value(1, 1), None);
    assert_eq!(result.length(1, 1), 0);
    assert_eq!(result.str_value(1, 1).unwrap(), None);
}

#[test]
#[should_panic(expected = "out of range")]
fn column_out_of_range_panics() {
    sample().value(0, 5);
}

#[test]
#[should_panic]
fn row_out_of_range_panics() {
    sample().value(9, 0);
}

#[test]
fn statement_metadata() {
    let result = ResultSet::from_parts(Vec::new(), Vec::new(), 3, 42);
    assert_eq!(result.row_count(), 0);
    assert_eq!(result.column_count(), 0);
    assert_eq!(result.affected_rows(), 3);
    assert_eq!(result.insert_id(), 42);
}

#[test]
fn invalid_utf8_reports_bad_usage() {
    let result = ResultSet::from_parts(
        vec!["blob".to_string()],
        vec![vec![Some(Bytes::from_static(&[0xFF, 0xFE]))]],
        0,
        0,
    );
    assert!(result.str_value(0, 0).is_err());
}
