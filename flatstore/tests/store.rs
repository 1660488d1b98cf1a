use flatstore::aggregate::{AggregateRequest, AggregateSpec};
use flatstore::store::bulk::{BulkOperationRequest, BulkResult};
use flatstore::value::fields_from_json;
use flatstore::{
    CancellationToken, FieldType, FlatStoreError, ListResult, Predicate, QueryOptions,
    RetryPolicy, Store, StoreConfig, Value,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use tempfile::TempDir;

fn setup(files: &[(&str, &str)]) -> (TempDir, Store) {
    let tmp = TempDir::new().unwrap();
    for (name, content) in files {
        std::fs::write(tmp.path().join(name), content).unwrap();
    }
    let mut config = StoreConfig::new(tmp.path());
    config.retry = RetryPolicy {
        enabled: true,
        max_retries: 10,
        base_delay_ms: 5,
    };
    let store = Store::open(config).unwrap();
    (tmp, store)
}

fn cancel() -> CancellationToken {
    CancellationToken::new()
}

fn list_all(store: &Store, collection: &str) -> ListResult {
    store
        .list(collection, &QueryOptions::new().page(0, usize::MAX), &cancel())
        .unwrap()
}

fn ids(result: &ListResult) -> Vec<String> {
    result.data.iter().map(|r| r.id.clone()).collect()
}

#[test]
fn test_create_get_round_trip() {
    let (_tmp, store) = setup(&[("users.csv", "id,name,email\n")]);
    let fields = fields_from_json(json!({"name": "Alice", "email": "a@test.com"}));
    let created = store.create("users", fields, &cancel()).unwrap();

    let fetched = store.get("users", &created.id, &cancel()).unwrap();
    assert_eq!(fetched.get("id"), Some(&Value::String(created.id.clone())));
    assert_eq!(fetched.get("name"), Some(&Value::from("Alice")));
    assert_eq!(fetched.get("email"), Some(&Value::from("a@test.com")));
}

#[test]
fn test_thousand_creates_have_distinct_ids() {
    let (_tmp, store) = setup(&[("events.csv", "id,kind\n")]);
    let mut seen = HashSet::new();
    for i in 0..1000 {
        let fields = fields_from_json(json!({"kind": format!("k{i}")}));
        let record = store.create("events", fields, &cancel()).unwrap();
        assert!(seen.insert(record.id));
    }
    assert_eq!(list_all(&store, "events").total, 1000);
}

#[test]
fn test_pagination_properties() {
    let rows: String = (1..=7).map(|i| format!("{i},n{i}\n")).collect();
    let content = format!("id,name\n{rows}");
    let (_tmp, store) = setup(&[("t.csv", content.as_str())]);

    for (offset, limit) in [(0, 3), (3, 3), (6, 3), (7, 3), (0, 7), (2, 0), (10, 1)] {
        let page = store
            .list("t", &QueryOptions::new().page(offset, limit), &cancel())
            .unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(page.has_more, offset + limit < 7, "offset={offset} limit={limit}");
        assert_eq!(page.data.len(), limit.min(7usize.saturating_sub(offset)));
    }

    let first = store.list("t", &QueryOptions::new().page(0, 3), &cancel()).unwrap();
    let second = store.list("t", &QueryOptions::new().page(3, 3), &cancel()).unwrap();
    assert_eq!(ids(&first), vec!["1", "2", "3"]);
    assert_eq!(ids(&second), vec!["4", "5", "6"]);
}

#[test]
fn test_filter_is_idempotent_and_empty_matches_all() {
    let (_tmp, store) = setup(&[("p.csv", "id,cat,price\n1,A,10\n2,A,20\n3,B,5\n")]);
    let filter = Predicate::from_json(&json!({"field": "price", "operator": "gte", "value": 10})).unwrap();
    let once = store
        .list("p", &QueryOptions::new().filter(filter.clone()), &cancel())
        .unwrap();
    let refiltered: Vec<_> = once.data.iter().filter(|r| filter.matches_record(r)).collect();
    assert_eq!(refiltered.len(), once.data.len());
    assert_eq!(ids(&once), vec!["1", "2"]);

    let all = store
        .list("p", &QueryOptions::new().filter(Predicate::from_json(&json!({})).unwrap()), &cancel())
        .unwrap();
    assert_eq!(all.total, 3);

    let err = Predicate::from_json(&json!({"field": "price", "operator": "between", "value": 1}))
        .unwrap_err();
    assert!(matches!(err, FlatStoreError::Argument(_)));
}

#[test]
fn test_aggregation_example() {
    let (_tmp, store) = setup(&[("p.csv", "id,cat,price\n1,A,10\n2,A,20\n3,B,5\n")]);
    let request = AggregateRequest {
        group_by: vec!["cat".into()],
        aggregates: vec![AggregateSpec::new("price", "sum")],
        ..Default::default()
    };
    let rows = store.aggregate("p", &request, &cancel()).unwrap();
    let sums: Vec<(String, Value)> = rows
        .iter()
        .map(|r| (r["cat"].to_text(), r["price_sum"].clone()))
        .collect();
    assert_eq!(
        sums,
        vec![
            ("A".to_string(), Value::Float(30.0)),
            ("B".to_string(), Value::Float(5.0))
        ]
    );

    let count = AggregateRequest {
        aggregates: vec![AggregateSpec::new("id", "count")],
        ..Default::default()
    };
    let rows = store.aggregate("p", &count, &cancel()).unwrap();
    assert_eq!(rows[0]["id_count"], Value::Integer(3));
}

#[test]
fn test_atomic_bulk_rolls_back() {
    let original = "id,name,qty\n1,bolt,10\n2,nut,20\n";
    let (tmp, store) = setup(&[("items.csv", original)]);
    let request = BulkOperationRequest {
        action: "update".into(),
        atomic: true,
        records: vec![
            fields_from_json(json!({"id": "1", "qty": 11})),
            fields_from_json(json!({"id": "404", "qty": 0})),
            fields_from_json(json!({"id": "2", "qty": 21})),
        ],
        update_data: None,
    };

    let result = store.bulk("items", &request, &cancel()).unwrap();
    let BulkResult::Atomic(outcome) = result else {
        panic!("expected atomic outcome");
    };
    assert!(!outcome.success);
    assert_eq!(outcome.failed_index, Some(1));
    assert_eq!((outcome.succeeded, outcome.failed), (0, 3));
    assert!(outcome.failed_error.unwrap().contains("404"));

    let on_disk = std::fs::read_to_string(tmp.path().join("items.csv")).unwrap();
    assert_eq!(on_disk, original);
}

#[test]
fn test_best_effort_bulk_partial_success() {
    let (_tmp, store) = setup(&[("items.csv", "id,name,qty\n1,bolt,10\n2,nut,20\n3,gear,5\n")]);
    let request = BulkOperationRequest {
        action: "update".into(),
        atomic: false,
        records: vec![
            fields_from_json(json!({"id": "1", "qty": 11})),
            fields_from_json(json!({"id": "missing", "qty": 0})),
            fields_from_json(json!({"id": "3", "qty": 6})),
        ],
        update_data: None,
    };

    let result = store.bulk("items", &request, &cancel()).unwrap();
    assert!(result.success());
    assert_eq!((result.succeeded(), result.failed()), (2, 1));

    assert_eq!(store.get("items", "1", &cancel()).unwrap().get("qty"), Some(&Value::from("11")));
    assert_eq!(store.get("items", "2", &cancel()).unwrap().get("qty"), Some(&Value::from("20")));
    assert_eq!(store.get("items", "3", &cancel()).unwrap().get("qty"), Some(&Value::from("6")));
}

#[test]
fn test_concurrent_creates_both_land() {
    let (tmp, store) = setup(&[("log.csv", "id,msg\n")]);

    std::thread::scope(|s| {
        for t in 0..2 {
            let store = &store;
            s.spawn(move || {
                for i in 0..20 {
                    let fields = fields_from_json(json!({"msg": format!("t{t}-{i}")}));
                    store.create("log", fields, &cancel()).unwrap();
                }
            });
        }
    });

    assert_eq!(list_all(&store, "log").total, 40);
    assert!(!tmp.path().join("log.csv.lock").exists());
}

#[test]
fn test_update_creates_sidecar_and_schema_round_trips() {
    let (tmp, store) = setup(&[("users.csv", "id,name\n1,Alice\n2,Bob\n")]);
    assert!(!tmp.path().join(".schema/users.json").exists());

    store
        .update("users", "1", fields_from_json(json!({"score": 9.5})), &cancel())
        .unwrap();
    assert!(tmp.path().join(".schema/users.json").exists());

    let schema = store.get_schema("users", &cancel()).unwrap();
    let names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "score"]);
    assert_eq!(schema.field("score").unwrap().field_type, FieldType::Float);

    let bob = store.get("users", "2", &cancel()).unwrap();
    assert_eq!(bob.get("score"), Some(&Value::from("0")));
}

#[test]
fn test_invalid_collection_names() {
    let (_tmp, store) = setup(&[]);
    for name in ["..", "a/b", "a\\b", "/etc/passwd", "", "   "] {
        let err = store.get(name, "1", &cancel()).unwrap_err();
        assert!(matches!(err, FlatStoreError::Argument(_)), "{name:?} gave {err}");
    }
}

#[test]
fn test_cancelled_write_leaves_file_untouched() {
    let original = "id,name\n1,Alice\n";
    let (tmp, store) = setup(&[("users.csv", original)]);
    let token = CancellationToken::new();
    token.cancel();

    let patch = fields_from_json(json!({"name": "Mallory"}));
    let err = store.update("users", "1", patch, &token).unwrap_err();
    assert!(matches!(err, FlatStoreError::Cancelled));
    let err = store.delete("users", "1", &token).unwrap_err();
    assert!(matches!(err, FlatStoreError::Cancelled));

    assert_eq!(read(tmp.path(), "users.csv"), original);
    assert!(!tmp.path().join("users.csv.lock").exists());
}

#[test]
fn test_delete_last_record_leaves_header() {
    let (tmp, store) = setup(&[("users.csv", "id,name\n1,Alice\n")]);
    store.delete("users", "1", &cancel()).unwrap();
    assert_eq!(read(tmp.path(), "users.csv"), "id,name\n");
    assert_eq!(list_all(&store, "users").total, 0);
}

#[test]
fn test_lock_contention_exhausts_retries() {
    let (tmp, _) = setup(&[("users.csv", "id,name\n1,Alice\n")]);
    std::fs::write(tmp.path().join("users.csv.lock"), "999").unwrap();
    let mut config = StoreConfig::new(tmp.path());
    config.retry.max_retries = 2;
    config.retry.base_delay_ms = 1;
    let store = Store::open(config).unwrap();

    let err = store.delete("users", "1", &cancel()).unwrap_err();
    assert!(matches!(err, FlatStoreError::Locked { .. }));
    assert_eq!(err.kind().as_str(), "locked");
    // Reads take no lock
    assert!(store.get("users", "1", &cancel()).is_ok());
}

fn read(dir: &Path, name: &str) -> String {
    std::fs::read_to_string(dir.join(name)).unwrap()
}
