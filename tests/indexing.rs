use modelplus::indexer::Indexer;
use modelplus::{Database, FieldKind, Field, Registry, Schema, Settings, Value};

fn setup() -> Vec<Database> {
    let registry = || {
        let article = Schema::builder("Article")
            .field(Field::string("status"))
            .field(Field::list("keywords", FieldKind::String { max_length: None }))
            .field(Field::string("body").unindexed())
            .build()
            .expect("article schema");
        Registry::builder().register(article).build().expect("registry")
    };
    vec![
        Database::open(&Settings::default(), registry()).expect("memory database"),
        Database::open(&Settings::sqlite(":memory:"), registry()).expect("sqlite database"),
    ]
}

fn members(db: &Database, field: &str, value: impl Into<Value>) -> Vec<String> {
    let schema = db.schema("Article").unwrap();
    Indexer::new(db.store(), &schema)
        .members(field, &value.into())
        .unwrap()
        .into_iter()
        .collect()
}

#[test]
fn save_moves_index_entries() {
    for db in setup() {
        let mut article = db
            .objects("Article")
            .unwrap()
            .create([("status", "draft")])
            .unwrap();
        let id = article.id().unwrap().to_string();
        assert_eq!(members(&db, "status", "draft"), vec![id.clone()]);

        article.set("status", "published").unwrap();
        article.save().unwrap();
        assert!(members(&db, "status", "draft").is_empty(), "no stale entry survives");
        assert_eq!(members(&db, "status", "published"), vec![id.clone()]);
    }
}

#[test]
fn every_list_element_is_indexed() {
    for db in setup() {
        let mut article = db.record("Article").unwrap();
        article.set("keywords", vec!["rust", "orm"]).unwrap();
        article.save().unwrap();
        let id = article.id().unwrap().to_string();
        assert_eq!(members(&db, "keywords", "rust"), vec![id.clone()]);
        assert_eq!(members(&db, "keywords", "orm"), vec![id.clone()]);

        article.set("keywords", vec!["orm"]).unwrap();
        article.save().unwrap();
        assert!(members(&db, "keywords", "rust").is_empty());
        assert_eq!(members(&db, "keywords", "orm"), vec![id]);
    }
}

#[test]
fn delete_uses_recorded_membership() {
    for db in setup() {
        let mut article = db.record("Article").unwrap();
        article.set("status", "draft").unwrap();
        article.set("keywords", vec!["a", "b"]).unwrap();
        article.save().unwrap();
        let key = article.key().unwrap();
        let schema = db.schema("Article").unwrap();
        let indexer = Indexer::new(db.store(), &schema);
        assert_eq!(indexer.memberships(&key).unwrap().len(), 3);

        // changed in memory only, the stored entries still name "draft"
        article.set("status", "archived").unwrap();
        article.delete().unwrap();
        assert!(members(&db, "status", "draft").is_empty());
        assert!(members(&db, "keywords", "a").is_empty());
        assert!(members(&db, "keywords", "b").is_empty());
        assert!(indexer.memberships(&key).unwrap().is_empty());
        assert!(db.store().get_list(&key.child("keywords")).unwrap().is_empty());
    }
}

#[test]
fn index_keys_follow_current_values() {
    for db in setup() {
        let mut article = db.record("Article").unwrap();
        article.set("status", "draft").unwrap();
        article.set("keywords", vec!["x"]).unwrap();
        article.save().unwrap();
        let schema = db.schema("Article").unwrap();
        let keys: Vec<String> = Indexer::new(db.store(), &schema)
            .index_keys(&article)
            .unwrap()
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(keys, vec!["Article:status:draft", "Article:keywords:x"]);
    }
}

#[test]
fn unindexed_fields_have_no_entries() {
    for db in setup() {
        let schema = db.schema("Article").unwrap();
        let indexer = Indexer::new(db.store(), &schema);
        assert!(indexer.members("body", &Value::from("text")).is_err());
    }
}
