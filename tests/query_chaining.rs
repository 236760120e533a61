use modelplus::{Database, Field, ModelplusError, Registry, Schema, Settings, Value};

fn setup() -> Vec<Database> {
    let registry = || {
        let item = Schema::builder("Item")
            .field(Field::string("color"))
            .field(Field::integer("size"))
            .field(Field::boolean("sold"))
            .build()
            .expect("item schema");
        Registry::builder().register(item).build().expect("registry")
    };
    let dbs = vec![
        Database::open(&Settings::default(), registry()).expect("memory database"),
        Database::open(&Settings::sqlite(":memory:"), registry()).expect("sqlite database"),
    ];
    for db in &dbs {
        let items = db.objects("Item").unwrap();
        for (color, size, sold) in [
            ("red", 1, false),
            ("blue", 2, true),
            ("red", 3, true),
            ("green", 2, false),
            ("red", 2, false),
        ] {
            items
                .create([
                    ("color", Value::from(color)),
                    ("size", Value::from(size)),
                    ("sold", Value::from(sold)),
                ])
                .expect("create item");
        }
    }
    dbs
}

#[test]
fn refinements_leave_the_base_untouched() {
    for db in setup() {
        let base = db.objects("Item").unwrap();
        let red = base.filter("color", "red");
        let small_red = red.filter("size", 2);
        assert_eq!(base.len().unwrap(), 5);
        assert_eq!(red.len().unwrap(), 3);
        assert_eq!(small_red.len().unwrap(), 1);
        let _ordered = red.order("-size");
        let _windowed = red.limit(Some(1), Some(0)).unwrap();
        assert_eq!(red.len().unwrap(), 3, "still unordered and unlimited");
    }
}

#[test]
fn booleans_filter() {
    for db in setup() {
        let items = db.objects("Item").unwrap();
        assert_eq!(items.filter("sold", true).len().unwrap(), 2);
        assert_eq!(items.filter("sold", false).exclude("color", "red").len().unwrap(), 1);
    }
}

#[test]
fn limit_needs_both_bounds() {
    for db in setup() {
        let items = db.objects("Item").unwrap();
        assert!(matches!(items.limit(Some(2), None), Err(ModelplusError::Config(_))));
        assert!(matches!(items.limit(None, Some(2)), Err(ModelplusError::Config(_))));
        let cleared = items.limit(Some(1), Some(0)).unwrap().limit(None, None).unwrap();
        assert_eq!(cleared.len().unwrap(), 5);
    }
}

#[test]
fn default_order_is_by_id() {
    for db in setup() {
        let first = db.objects("Item").unwrap().ids().unwrap();
        let second = db.objects("Item").unwrap().ids().unwrap();
        assert_eq!(first, second, "separate queries agree");
        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(first, sorted);
        let page: Vec<String> = db.objects("Item").unwrap().limit(Some(2), Some(2)).unwrap().ids().unwrap();
        assert_eq!(page, first[2..4].to_vec());
    }
}

#[test]
fn ties_are_broken_by_id() {
    for db in setup() {
        let items = db.objects("Item").unwrap();
        let twos: Vec<String> = items.filter("size", 2).ids().unwrap();
        let ordered = items.order("size").ids().unwrap();
        assert_eq!(ordered[1..4].to_vec(), twos, "equal sizes keep id order");
        let descending = items.order("-size").ids().unwrap();
        assert_eq!(descending[1..4].to_vec(), twos, "ties ascend even when descending");
    }
}

#[test]
fn resolution_is_cached_until_all() {
    for db in setup() {
        let items = db.objects("Item").unwrap();
        let red = items.filter("color", "red");
        assert_eq!(red.len().unwrap(), 3);
        items.create([("color", "red")]).unwrap();
        assert_eq!(red.len().unwrap(), 3, "resolved once");
        assert_eq!(red.all().len().unwrap(), 4, "a fresh copy sees the new record");
    }
}

#[test]
fn get_by_id_respects_filters() {
    for db in setup() {
        let items = db.objects("Item").unwrap();
        assert!(items.get_by_id("does-not-exist").unwrap().is_none());
        let blue = items.filter("color", "blue").first().unwrap().expect("blue");
        let id = blue.id().unwrap();
        assert!(items.get_by_id(id).unwrap().is_some());
        assert!(items.filter("color", "red").get_by_id(id).unwrap().is_none());
        assert!(items.exclude("color", "red").get_by_id(id).unwrap().is_some());
    }
}

#[test]
fn slicing_and_iteration() {
    for db in setup() {
        let items = db.objects("Item").unwrap().order("size");
        let sizes: Vec<i64> = items
            .iter()
            .unwrap()
            .map(|r| r.unwrap().get("size").and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert_eq!(sizes, vec![1, 2, 2, 2, 3]);
        assert_eq!(items.slice(3..10).unwrap().len(), 2);
        assert!(items.get(5).unwrap().is_none());
        assert!(items.get(4).unwrap().is_some());
    }
}

#[test]
fn get_by_id_skips_records_deleted_after_resolution() {
    for db in setup() {
        let items = db.objects("Item").unwrap();
        let reds = items.filter("color", "red");
        let mut first = reds.first().unwrap().expect("a red item");
        let id = first.id().unwrap().to_string();
        assert!(reds.contains_id(&id).unwrap());
        first.delete().unwrap();
        assert!(reds.get_by_id(&id).unwrap().is_none(), "deleted record is not found");
        assert!(items.get_by_id(&id).unwrap().is_none());
    }
}

#[test]
fn malformed_ids_are_not_found() {
    for db in setup() {
        let items = db.objects("Item").unwrap();
        for id in ["", "a:b", ":"] {
            assert!(items.get_by_id(id).unwrap().is_none(), "{id:?} is not found");
            assert!(items.filter("color", "red").get_by_id(id).unwrap().is_none());
            assert!(!db.exists("Item", id).unwrap());
        }
    }
}

#[test]
fn later_predicate_on_a_field_wins() {
    for db in setup() {
        let items = db.objects("Item").unwrap();
        let blue = items.filter("color", "red").filter("color", "blue");
        assert_eq!(blue.len().unwrap(), 1);
        let not_green = items.exclude("color", "red").exclude("color", "green");
        assert_eq!(not_green.len().unwrap(), 4);
        let mixed = items.filter("color", "red").filter("size", 2);
        assert_eq!(mixed.len().unwrap(), 1, "different fields still combine");
    }
}
