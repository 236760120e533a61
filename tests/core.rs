use modelplus::{Database, Field, ModelplusError, Registry, Schema, Settings, Value};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn person() -> Schema {
    Schema::builder("Person")
        .field(Field::string("first_name").required())
        .field(Field::string("last_name"))
        .field(Field::integer("age"))
        .field(Field::datetime("created_at").auto_now_add())
        .field(Field::string("nickname").unindexed())
        .computed_index("full_name", |p| {
            let first = p.get("first_name").map(|v| v.to_string()).unwrap_or_default();
            let last = p.get("last_name").map(|v| v.to_string()).unwrap_or_default();
            Value::from(format!("{} {}", first, last))
        })
        .build()
        .expect("person schema")
}

fn setup() -> Vec<Database> {
    init_tracing();
    let memory = Database::open(
        &Settings::default(),
        Registry::builder().register(person()).build().expect("registry"),
    )
    .expect("memory database");
    let sqlite = Database::open(
        &Settings::sqlite(":memory:"),
        Registry::builder().register(person()).build().expect("registry"),
    )
    .expect("sqlite database");
    vec![memory, sqlite]
}

fn seed(db: &Database) {
    let people = db.objects("Person").unwrap();
    for (first, last, age) in [("Granny", "Goose", 90), ("Clark", "Kent", 35), ("Granny", "Smith", 70)] {
        people
            .create([
                ("first_name", Value::from(first)),
                ("last_name", Value::from(last)),
                ("age", Value::from(age)),
            ])
            .expect("create person");
    }
}

#[test]
fn filter_and_exclude() {
    for db in setup() {
        seed(&db);
        let people = db.objects("Person").unwrap();
        assert_eq!(people.len().unwrap(), 3);
        let grannies = people.filter("first_name", "Granny");
        assert_eq!(grannies.len().unwrap(), 2, "two grannies");
        let others = people.exclude("first_name", "Granny");
        assert_eq!(others.len().unwrap(), 1, "only Clark is left");
        let clark = others.first().unwrap().expect("clark");
        assert_eq!(clark.get("last_name"), Some(&Value::from("Kent")));
        assert!(others.contains(&clark).unwrap());
        assert!(!grannies.contains(&clark).unwrap());
    }
}

#[test]
fn filter_and_exclude_commute() {
    for db in setup() {
        seed(&db);
        let people = db.objects("Person").unwrap();
        let a = people.filter("first_name", "Granny").exclude("last_name", "Smith");
        let b = people.exclude("last_name", "Smith").filter("first_name", "Granny");
        assert_eq!(a.ids().unwrap(), b.ids().unwrap());
        assert_eq!(a.len().unwrap(), 1);
    }
}

#[test]
fn computed_index_is_filterable() {
    for db in setup() {
        seed(&db);
        let people = db.objects("Person").unwrap();
        let found = people.filter("full_name", "Clark Kent");
        assert_eq!(found.len().unwrap(), 1);
        let ordered: Vec<Value> = people
            .order("full_name")
            .records()
            .unwrap()
            .iter()
            .map(|p| p.value_of("full_name").unwrap())
            .collect();
        assert_eq!(
            ordered,
            vec![
                Value::from("Clark Kent"),
                Value::from("Granny Goose"),
                Value::from("Granny Smith")
            ]
        );
    }
}

#[test]
fn order_and_window() {
    for db in setup() {
        seed(&db);
        let people = db.objects("Person").unwrap();
        let ages = |set: &modelplus::ModelSet| -> Vec<i64> {
            set.records()
                .unwrap()
                .iter()
                .map(|p| p.get("age").and_then(Value::as_i64).unwrap())
                .collect()
        };
        assert_eq!(ages(&people.order("age")), vec![35, 70, 90]);
        assert_eq!(ages(&people.order("-age")), vec![90, 70, 35]);
        let window = people.order("-age").limit(Some(2), Some(1)).unwrap();
        assert_eq!(ages(&window), vec![70, 35]);
        let past_end = people.order("age").limit(Some(5), Some(10)).unwrap();
        assert!(past_end.is_empty().unwrap());
    }
}

#[test]
fn unindexed_fields_cannot_be_queried() {
    for db in setup() {
        seed(&db);
        let people = db.objects("Person").unwrap();
        let err = people.filter("nickname", "Supes").len().unwrap_err();
        assert!(matches!(err, ModelplusError::AttributeNotIndexed { .. }), "got {err}");
        let err = people.order("-nickname").first().unwrap_err();
        assert!(matches!(err, ModelplusError::AttributeNotIndexed { .. }), "got {err}");
    }
}

#[test]
fn update_moves_between_filters() {
    for db in setup() {
        seed(&db);
        let people = db.objects("Person").unwrap();
        let mut clark = people.filter("first_name", "Clark").first().unwrap().expect("clark");
        clark.set("first_name", "Superman").unwrap();
        clark.save().expect("resave");
        assert!(people.all().filter("first_name", "Clark").is_empty().unwrap());
        let found = people.all().filter("first_name", "Superman").first().unwrap().expect("renamed");
        assert_eq!(found, clark, "same record, same id");
        assert_eq!(people.all().len().unwrap(), 3, "update did not create a record");
    }
}

#[test]
fn delete_removes_record() {
    for db in setup() {
        seed(&db);
        let people = db.objects("Person").unwrap();
        let mut granny = people.filter("last_name", "Smith").first().unwrap().expect("granny");
        let id = granny.id().unwrap().to_string();
        granny.delete().expect("delete");
        granny.delete().expect("second delete is harmless");
        assert!(!db.exists("Person", &id).unwrap());
        assert_eq!(people.all().len().unwrap(), 2);
        assert!(people.all().filter("last_name", "Smith").is_empty().unwrap());
    }
}

#[test]
fn reload_by_id_and_key() {
    for db in setup() {
        let people = db.objects("Person").unwrap();
        let created = people
            .create([("first_name", "Lois"), ("last_name", "Lane")])
            .expect("create");
        let id = created.id().unwrap().to_string();
        let loaded = people.get_by_id(&id).unwrap().expect("by id");
        assert_eq!(loaded.get("last_name"), Some(&Value::from("Lane")));
        assert_eq!(loaded.get("created_at"), created.get("created_at"));
        assert!(loaded.get("created_at").unwrap().as_datetime().is_some());
        let by_key = db.from_key(&format!("Person:{id}")).unwrap().expect("by key");
        assert_eq!(by_key, created);
        assert!(db.from_key("Person:nobody").unwrap().is_none());
        assert!(matches!(db.from_key("Ghost:1"), Err(ModelplusError::BadKey(_))));
        assert!(matches!(db.from_key("garbage"), Err(ModelplusError::BadKey(_))));
    }
}

#[test]
fn auto_now_add_is_kept_on_resave() {
    for db in setup() {
        let people = db.objects("Person").unwrap();
        let mut lois = people.create([("first_name", "Lois")]).expect("create");
        let created_at = lois.get("created_at").cloned().expect("stamped");
        lois.set("last_name", "Lane").unwrap();
        lois.save().unwrap();
        assert_eq!(lois.get("created_at"), Some(&created_at));
    }
}

#[test]
fn get_or_create_uses_indexed_attributes() {
    for db in setup() {
        seed(&db);
        let people = db.objects("Person").unwrap();
        let clark = people
            .get_or_create(&[
                ("first_name", Value::from("Clark")),
                ("nickname", Value::from("Supes")),
            ])
            .unwrap();
        assert_eq!(clark.get("last_name"), Some(&Value::from("Kent")), "found, not created");
        assert_eq!(people.all().len().unwrap(), 3);
        let bruce = people
            .get_or_create(&[
                ("first_name", Value::from("Bruce")),
                ("nickname", Value::from("Bats")),
            ])
            .unwrap();
        assert_eq!(bruce.get("nickname"), Some(&Value::from("Bats")), "created with every attribute");
        assert_eq!(people.all().len().unwrap(), 4);
    }
}

#[test]
fn validation_failure_writes_nothing() {
    for db in setup() {
        let people = db.objects("Person").unwrap();
        let err = people.create([("last_name", "Nobody")]).unwrap_err();
        assert_eq!(err.field_errors().len(), 1);
        assert_eq!(err.field_errors()[0].field, "first_name");
        assert_eq!(err.field_errors()[0].message, "required");
        assert!(people.all().is_empty().unwrap());

        let mut record = db.record("Person").unwrap();
        record.set("age", "old").unwrap();
        assert!(!record.is_valid());
        assert!(record.errors().iter().any(|e| e.field == "age" && e.message == "bad type"));
        assert!(record.save().is_err());
        assert!(record.is_new(), "failed save keeps the record new");
        assert!(matches!(record.id(), Err(ModelplusError::MissingId { .. })));
    }
}

#[test]
fn update_attributes_ignores_unknown_names() {
    for db in setup() {
        let mut record = db.record("Person").unwrap();
        record
            .update_attributes([("first_name", "Jimmy"), ("shoe_size", "44")])
            .unwrap();
        assert_eq!(record.get("first_name"), Some(&Value::from("Jimmy")));
        assert!(record.get("shoe_size").is_none());
        assert!(matches!(
            record.set("shoe_size", 44),
            Err(ModelplusError::UnknownField { .. })
        ));
        let attributes = record.attributes();
        assert!(!attributes.contains_key("id"));
        record.save().unwrap();
        assert!(record.attributes().contains_key("id"));
    }
}
