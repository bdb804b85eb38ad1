//! End-to-end ORM tests against an in-memory SQLite database.

#![cfg(feature = "sqlite")]

use phoebe_core::OrmError;
use phoebe_db::{ddl, DbExecutor, Field, JoinKind, Model, ModelBuilder, Registry, Value, DQ};
use phoebe_db_backends::SqliteDatabase;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Registers the User / Blog / Entry trio used throughout.
fn blog_models(registry: &Arc<Registry>) -> (Model, Model, Model) {
    let user = registry
        .register(ModelBuilder::new("User").field(Field::char("username", 80).unique()))
        .unwrap();
    let blog = registry
        .register(
            ModelBuilder::new("Blog")
                .field(Field::foreign_key("user", "User").related_name("blogs"))
                .field(Field::char("name", 120)),
        )
        .unwrap();
    let entry = registry
        .register(
            ModelBuilder::new("Entry")
                .field(Field::foreign_key("blog", "Blog").related_name("entries"))
                .field(Field::char("title", 200)),
        )
        .unwrap();
    (user, blog, entry)
}

async fn seeded_db(registry: &Arc<Registry>) -> SqliteDatabase {
    let db = SqliteDatabase::memory().unwrap();
    ddl::create_tables(&db, registry, false).await.unwrap();
    db
}

#[tokio::test]
async fn test_create_insert_and_select_round_trip() {
    let registry = Registry::new();
    let (user, _, _) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    let alice = user
        .create(&db, vec![("username", Value::from("alice"))])
        .await
        .unwrap();
    assert_eq!(alice.pk(), Some(&Value::Int(1)));

    let fetched = user
        .get(&db, vec![user.f("username").eq("alice")])
        .await
        .unwrap();
    assert_eq!(fetched.get("username"), Some(&Value::from("alice")));
    assert_eq!(fetched.pk(), Some(&Value::Int(1)));
}

#[tokio::test]
async fn test_get_raises_does_not_exist() {
    let registry = Registry::new();
    let (user, _, _) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    let err = user
        .get(&db, vec![user.f("username").eq("ghost")])
        .await
        .unwrap_err();
    match err {
        OrmError::DoesNotExist { model } => assert_eq!(model, "User"),
        other => panic!("expected DoesNotExist, got {other:?}"),
    }
}

#[tokio::test]
async fn test_save_updates_only_dirty_fields() {
    let registry = Registry::new();
    let user = registry
        .register(
            ModelBuilder::new("User")
                .field(Field::char("username", 80))
                .field(Field::integer("age").default(0)),
        )
        .unwrap();
    let db = SqliteDatabase::memory().unwrap();
    ddl::create_table(&db, &user, false).await.unwrap();

    let mut alice = user
        .create(
            &db,
            vec![("username", Value::from("alice")), ("age", Value::Int(30))],
        )
        .await
        .unwrap();

    alice.set("age", 31).unwrap();
    assert!(alice.is_dirty());
    alice.save(&db, false).await.unwrap();
    assert!(!alice.is_dirty());

    let reloaded = user.get(&db, vec![user.f("username").eq("alice")]).await.unwrap();
    assert_eq!(reloaded.get("age"), Some(&Value::Int(31)));
}

// Scenario A: a three-table join compiled and executed against live data.
#[tokio::test]
async fn test_three_table_join_end_to_end() {
    let registry = Registry::new();
    let (user, blog, entry) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    let alice = user.create(&db, vec![("username", Value::from("alice"))]).await.unwrap();
    let bob = user.create(&db, vec![("username", Value::from("bob"))]).await.unwrap();

    let alices_blog = blog
        .create(
            &db,
            vec![
                ("user", alice.pk().unwrap().clone()),
                ("name", Value::from("alice's blog")),
            ],
        )
        .await
        .unwrap();
    let bobs_blog = blog
        .create(
            &db,
            vec![
                ("user", bob.pk().unwrap().clone()),
                ("name", Value::from("bob's blog")),
            ],
        )
        .await
        .unwrap();

    for title in ["intro", "rust tips"] {
        entry
            .create(
                &db,
                vec![
                    ("blog", alices_blog.pk().unwrap().clone()),
                    ("title", Value::from(title)),
                ],
            )
            .await
            .unwrap();
    }
    entry
        .create(
            &db,
            vec![
                ("blog", bobs_blog.pk().unwrap().clone()),
                ("title", Value::from("unrelated")),
            ],
        )
        .await
        .unwrap();

    let query = entry
        .select()
        .join(&blog, JoinKind::Inner, None)
        .unwrap()
        .join(&user, JoinKind::Inner, None)
        .unwrap()
        .where_(user.f("username").eq("alice"));

    let compiler = phoebe_db::QueryCompiler::new(db.dialect());
    let (sql, _) = query.to_sql(&compiler).unwrap();
    assert!(sql.contains("\"t3\".\"username\""));

    let mut rows = query.execute(&db).await.unwrap();
    let titles: Vec<String> = rows
        .all()
        .unwrap()
        .iter()
        .map(|e| e.get("title").unwrap().to_string())
        .collect();
    assert_eq!(titles.len(), 2);
    assert!(titles.contains(&"intro".to_string()));
    assert!(titles.contains(&"rust tips".to_string()));
}

// Scenario B: get_or_create is idempotent.
#[tokio::test]
async fn test_get_or_create_idempotent() {
    let registry = Registry::new();
    let (user, _, _) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    let (first, created) = user
        .get_or_create(&db, vec![("username", Value::from("bob"))])
        .await
        .unwrap();
    assert!(created);

    let (second, created) = user
        .get_or_create(&db, vec![("username", Value::from("bob"))])
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(first.pk(), second.pk());

    assert_eq!(user.select().count(&db).await.unwrap(), 1);
}

// Scenario C: recursive delete with non-nullable and nullable dependents.
#[tokio::test]
async fn test_recursive_delete_cascades_non_nullable() {
    let registry = Registry::new();
    let (user, blog, entry) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    let alice = user.create(&db, vec![("username", Value::from("alice"))]).await.unwrap();
    let the_blog = blog
        .create(
            &db,
            vec![
                ("user", alice.pk().unwrap().clone()),
                ("name", Value::from("blog")),
            ],
        )
        .await
        .unwrap();
    entry
        .create(
            &db,
            vec![
                ("blog", the_blog.pk().unwrap().clone()),
                ("title", Value::from("post")),
            ],
        )
        .await
        .unwrap();

    alice.delete_instance(&db, true, false).await.unwrap();

    assert_eq!(user.select().count(&db).await.unwrap(), 0);
    assert_eq!(blog.select().count(&db).await.unwrap(), 0);
    assert_eq!(entry.select().count(&db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_recursive_delete_nulls_nullable_dependents() {
    let registry = Registry::new();
    let user = registry
        .register(ModelBuilder::new("User").field(Field::char("username", 80)))
        .unwrap();
    let photo = registry
        .register(
            ModelBuilder::new("Photo")
                .field(Field::foreign_key("owner", "User").null().related_name("photos"))
                .field(Field::char("path", 200)),
        )
        .unwrap();
    let db = seeded_db(&registry).await;

    let alice = user.create(&db, vec![("username", Value::from("alice"))]).await.unwrap();
    photo
        .create(
            &db,
            vec![
                ("owner", alice.pk().unwrap().clone()),
                ("path", Value::from("a.jpg")),
            ],
        )
        .await
        .unwrap();

    // delete_nullable = false: the nullable FK is set to NULL instead.
    alice.delete_instance(&db, true, false).await.unwrap();
    assert_eq!(user.select().count(&db).await.unwrap(), 0);
    assert_eq!(photo.select().count(&db).await.unwrap(), 1);
    let orphan = photo.select().get(&db).await.unwrap();
    assert_eq!(orphan.get("owner"), Some(&Value::Null));

    // delete_nullable = true: nullable dependents are deleted too.
    let bob = user.create(&db, vec![("username", Value::from("bob"))]).await.unwrap();
    photo
        .create(
            &db,
            vec![
                ("owner", bob.pk().unwrap().clone()),
                ("path", Value::from("b.jpg")),
            ],
        )
        .await
        .unwrap();
    bob.delete_instance(&db, true, true).await.unwrap();
    assert_eq!(photo.select().count(&db).await.unwrap(), 1);
}

/// Wraps a real database but reports no multi-row INSERT support and counts
/// the INSERT statements that reach the driver.
struct NoBulkInsertDb {
    inner: SqliteDatabase,
    inserts: AtomicUsize,
}

#[async_trait::async_trait]
impl DbExecutor for NoBulkInsertDb {
    fn dialect(&self) -> phoebe_db::Dialect {
        self.inner.dialect()
    }

    fn supports_insert_many(&self) -> bool {
        false
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> phoebe_core::OrmResult<u64> {
        self.inner.execute_sql(sql, params).await
    }

    async fn query_rows(&self, sql: &str, params: &[Value]) -> phoebe_core::OrmResult<Vec<phoebe_db::Row>> {
        self.inner.query_rows(sql, params).await
    }

    async fn insert_returning_id(
        &self,
        sql: &str,
        params: &[Value],
    ) -> phoebe_core::OrmResult<Value> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_returning_id(sql, params).await
    }
}

#[tokio::test]
async fn test_multi_row_insert_falls_back_to_sequential() {
    let registry = Registry::new();
    let (user, _, _) = blog_models(&registry);
    let inner = SqliteDatabase::memory().unwrap();
    ddl::create_tables(&inner, &registry, false).await.unwrap();
    let db = NoBulkInsertDb {
        inner,
        inserts: AtomicUsize::new(0),
    };

    let last_id = user
        .insert_many(vec![
            vec![("username", Value::from("a"))],
            vec![("username", Value::from("b"))],
            vec![("username", Value::from("c"))],
        ])
        .unwrap()
        .execute(&db)
        .await
        .unwrap();

    // Three sequential single-row statements; only the last id comes back.
    assert_eq!(db.inserts.load(Ordering::SeqCst), 3);
    assert_eq!(last_id, Value::Int(3));
    assert_eq!(user.select().count(&db).await.unwrap(), 3);
}

#[tokio::test]
async fn test_count_with_group_by_counts_groups() {
    let registry = Registry::new();
    let (user, blog, entry) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    let alice = user.create(&db, vec![("username", Value::from("alice"))]).await.unwrap();
    let blog_a = blog
        .create(&db, vec![("user", alice.pk().unwrap().clone()), ("name", Value::from("a"))])
        .await
        .unwrap();
    let blog_b = blog
        .create(&db, vec![("user", alice.pk().unwrap().clone()), ("name", Value::from("b"))])
        .await
        .unwrap();
    for (b, n) in [(&blog_a, 3), (&blog_b, 2)] {
        for i in 0..n {
            entry
                .create(
                    &db,
                    vec![
                        ("blog", b.pk().unwrap().clone()),
                        ("title", Value::from(format!("p{i}"))),
                    ],
                )
                .await
                .unwrap();
        }
    }

    // Five underlying rows, two groups.
    assert_eq!(entry.select().count(&db).await.unwrap(), 5);
    let grouped = entry.select().group_by(vec![entry.f("blog")]);
    assert_eq!(grouped.count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn test_filter_with_relation_traversal() {
    let registry = Registry::new();
    let (user, blog, _) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    let alice = user.create(&db, vec![("username", Value::from("alice"))]).await.unwrap();
    let bob = user.create(&db, vec![("username", Value::from("bob"))]).await.unwrap();
    for (owner, name) in [(&alice, "rust"), (&bob, "go")] {
        blog.create(
            &db,
            vec![
                ("user", owner.pk().unwrap().clone()),
                ("name", Value::from(name)),
            ],
        )
        .await
        .unwrap();
    }

    let mut rows = blog
        .select()
        .filter(DQ::new("user__username", "alice"))
        .unwrap()
        .execute(&db)
        .await
        .unwrap();
    let found = rows.all().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("name"), Some(&Value::from("rust")));
}

#[tokio::test]
async fn test_joined_selection_builds_object_graph() {
    let registry = Registry::new();
    let (user, blog, entry) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    let alice = user.create(&db, vec![("username", Value::from("alice"))]).await.unwrap();
    let the_blog = blog
        .create(
            &db,
            vec![
                ("user", alice.pk().unwrap().clone()),
                ("name", Value::from("alice's blog")),
            ],
        )
        .await
        .unwrap();
    entry
        .create(
            &db,
            vec![
                ("blog", the_blog.pk().unwrap().clone()),
                ("title", Value::from("hello")),
            ],
        )
        .await
        .unwrap();

    let projection = [entry.star(), blog.star(), user.star()].concat();
    let query = entry
        .select()
        .projection(projection)
        .join(&blog, JoinKind::Inner, None)
        .unwrap()
        .join(&user, JoinKind::Inner, None)
        .unwrap();

    let mut rows = query.execute(&db).await.unwrap();
    let mut found = rows.all().unwrap();
    assert_eq!(found.len(), 1);

    // The graph is reachable without further queries: the cached related
    // instances were wired from the joined row itself.
    let the_entry = &mut found[0];
    assert_eq!(the_entry.get("title"), Some(&Value::from("hello")));
    let related_blog = the_entry.related(&db, "blog").await.unwrap().unwrap();
    assert_eq!(related_blog.get("name"), Some(&Value::from("alice's blog")));
}

#[tokio::test]
async fn test_reverse_relation_prefiltered_select() {
    let registry = Registry::new();
    let (user, blog, _) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    let alice = user.create(&db, vec![("username", Value::from("alice"))]).await.unwrap();
    let bob = user.create(&db, vec![("username", Value::from("bob"))]).await.unwrap();
    for (owner, name) in [(&alice, "a1"), (&alice, "a2"), (&bob, "b1")] {
        blog.create(
            &db,
            vec![
                ("user", owner.pk().unwrap().clone()),
                ("name", Value::from(name)),
            ],
        )
        .await
        .unwrap();
    }

    let query = alice.reverse("blogs").unwrap();
    assert_eq!(query.count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn test_paginate_and_first_and_exists() {
    let registry = Registry::new();
    let (user, _, _) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    for name in ["a", "b", "c", "d", "e"] {
        user.create(&db, vec![("username", Value::from(name))]).await.unwrap();
    }

    let ordered = user.select().order_by(vec![user.f("username").asc()]);
    let page = ordered.paginate(2, 2);
    let mut rows = page.execute(&db).await.unwrap();
    let names: Vec<String> = rows
        .all()
        .unwrap()
        .iter()
        .map(|u| u.get("username").unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["c", "d"]);

    let first = ordered.first(&db).await.unwrap().unwrap();
    assert_eq!(first.get("username"), Some(&Value::from("a")));

    assert!(user.select().where_(user.f("username").eq("a")).exists(&db).await.unwrap());
    assert!(!user.select().where_(user.f("username").eq("zz")).exists(&db).await.unwrap());
}

#[tokio::test]
async fn test_one_is_strict_about_row_count() {
    let registry = Registry::new();
    let (user, _, _) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    let err = user.select().one(&db).await.unwrap_err();
    assert!(err.is_does_not_exist());

    user.create(&db, vec![("username", Value::from("a"))]).await.unwrap();
    assert!(user.select().one(&db).await.is_ok());

    user.create(&db, vec![("username", Value::from("b"))]).await.unwrap();
    let err = user.select().one(&db).await.unwrap_err();
    assert!(matches!(err, OrmError::MultipleObjectsReturned(_)));
}

#[tokio::test]
async fn test_update_and_delete_queries() {
    let registry = Registry::new();
    let (user, _, _) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    for name in ["a", "b"] {
        user.create(&db, vec![("username", Value::from(name))]).await.unwrap();
    }

    let updated = user
        .update(vec![("username", Value::from("renamed"))])
        .unwrap()
        .where_(user.f("username").eq("a"))
        .execute(&db)
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let deleted = user
        .delete()
        .where_(user.f("username").eq("b"))
        .execute(&db)
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(user.select().count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_compound_union_executes() {
    let registry = Registry::new();
    let (user, _, _) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    for name in ["a", "b", "c"] {
        user.create(&db, vec![("username", Value::from(name))]).await.unwrap();
    }

    let a = user
        .select()
        .projection(vec![user.f("username")])
        .where_(user.f("username").eq("a"));
    let b = user
        .select()
        .projection(vec![user.f("username")])
        .where_(user.f("username").eq("b"));
    let mut rows = (a | b).tuples(&db).await.unwrap();
    assert_eq!(rows.all().unwrap().len(), 2);
}

#[tokio::test]
async fn test_raw_query_round_trip() {
    let registry = Registry::new();
    let (user, _, _) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    user.create(&db, vec![("username", Value::from("alice"))]).await.unwrap();

    let mut rows = user
        .raw(
            "SELECT * FROM \"user\" WHERE \"username\" = ?",
            vec![Value::from("alice")],
        )
        .execute(&db)
        .await
        .unwrap();
    let found = rows.all().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("username"), Some(&Value::from("alice")));
}

#[tokio::test]
async fn test_transactions_commit_and_rollback() {
    use phoebe_db::{atomic, TransactionManager};

    let registry = Registry::new();
    let (user, _, _) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    let manager = TransactionManager::new(&db);
    atomic(&manager, async {
        user.create(&db, vec![("username", Value::from("kept"))]).await?;
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(user.select().count(&db).await.unwrap(), 1);

    let result: Result<(), OrmError> = atomic(&manager, async {
        user.create(&db, vec![("username", Value::from("discarded"))]).await?;
        Err(OrmError::DatabaseError("abort".to_string()))
    })
    .await;
    assert!(result.is_err());
    assert_eq!(user.select().count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_instance_refresh() {
    let registry = Registry::new();
    let (user, _, _) = blog_models(&registry);
    let db = seeded_db(&registry).await;

    let mut alice = user.create(&db, vec![("username", Value::from("alice"))]).await.unwrap();

    user.update(vec![("username", Value::from("renamed"))])
        .unwrap()
        .where_(user.f("id").eq(alice.pk().unwrap().clone()))
        .execute(&db)
        .await
        .unwrap();

    alice.refresh(&db).await.unwrap();
    assert_eq!(alice.get("username"), Some(&Value::from("renamed")));
}

#[tokio::test]
async fn test_upsert_insert_or_replace() {
    let registry = Registry::new();
    let user = registry
        .register(
            ModelBuilder::new("User")
                .field(Field::char("username", 80).primary_key())
                .field(Field::integer("age")),
        )
        .unwrap();
    let db = seeded_db(&registry).await;

    user.insert(vec![("username", Value::from("alice")), ("age", Value::Int(30))])
        .unwrap()
        .execute(&db)
        .await
        .unwrap();
    user.insert(vec![("username", Value::from("alice")), ("age", Value::Int(31))])
        .unwrap()
        .upsert()
        .execute(&db)
        .await
        .unwrap();

    assert_eq!(user.select().count(&db).await.unwrap(), 1);
    let alice = user.select().get(&db).await.unwrap();
    assert_eq!(alice.get("age"), Some(&Value::Int(31)));
}
