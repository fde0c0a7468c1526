//! Entity mapper acceptance tests.

use proptest::prelude::*;
use reldb_core::{params, ErrorKind, TableSchema};
use reldb_orm::{
    col, Attributes, Entity, EntityRef, Filter, Mapping, OrmError, OrmResult, Registry, Session,
    SessionConfig,
};
use reldb_testkit::prelude::*;
use std::sync::Arc;

fn seed_spongebob(store: &TestStore) -> i64 {
    let mut session = store.session();
    let user = session
        .add(User::new("spongebob", "Spongebob Squarepants"))
        .unwrap();
    session
        .append_related(&user, "addresses", Address::new("spongebob@sqlalchemy.org"))
        .unwrap();
    session.commit().unwrap();
    let id = user.borrow().id.unwrap();
    id
}

#[test]
fn same_key_same_instance() {
    let store = TestStore::users();
    let id = seed_spongebob(&store);

    let mut session = store.session();
    let by_get: EntityRef<User> = session.get(id).unwrap().unwrap();
    let by_query = session
        .query::<User>()
        .filter(col("name").eq("spongebob"))
        .one()
        .unwrap();
    let again: EntityRef<User> = session.get(id).unwrap().unwrap();
    assert!(EntityRef::ptr_eq(&by_get, &by_query));
    assert!(EntityRef::ptr_eq(&by_get, &again));

    by_get.borrow_mut().fullname = "SpongeBob".to_string();
    assert_eq!(by_query.borrow().fullname, "SpongeBob");

    let mut other = store.session();
    let elsewhere: EntityRef<User> = other.get(id).unwrap().unwrap();
    assert!(!EntityRef::ptr_eq(&by_get, &elsewhere));
    assert_eq!(elsewhere.borrow().fullname, "Spongebob Squarepants");
}

#[test]
fn new_parent_and_children_flush_parent_first() {
    let store = TestStore::users();
    let mut session = store.session();
    // Children are added before the parent exists in the table.
    let sandy = session.add(User::new("sandy", "Sandy Cheeks")).unwrap();
    let first = session
        .append_related(&sandy, "addresses", Address::new("sandy@sqlalchemy.org"))
        .unwrap();
    let second = session
        .append_related(&sandy, "addresses", Address::new("sandy@squirrelpower.org"))
        .unwrap();
    session.commit().unwrap();

    let user_id = sandy.borrow().id;
    assert!(user_id.is_some());
    assert_eq!(first.borrow().user_id, user_id);
    assert_eq!(second.borrow().user_id, user_id);

    let mut conn = store.connect().unwrap();
    assert_eq!(count_rows(&mut conn, "address"), 2);
}

#[test]
fn save_inserts_new_and_updates_loaded() {
    let store = TestStore::users();
    let id = seed_spongebob(&store);

    let mut session = store.session();
    let patrick = EntityRef::new(User::new("patrick", "Patrick Star"));
    session.save(&patrick).unwrap();
    let spongebob: EntityRef<User> = session.get(id).unwrap().unwrap();
    spongebob.borrow_mut().fullname = "Spongebob S.".to_string();
    session.save(&spongebob).unwrap();
    session.commit().unwrap();

    let mut conn = store.connect().unwrap();
    let names: Vec<String> = conn
        .execute("SELECT fullname FROM user_account ORDER BY id", ())
        .unwrap()
        .map(|row| row.try_get("fullname").unwrap())
        .collect();
    assert_eq!(names, vec!["Spongebob S.", "Patrick Star"]);
}

#[test]
fn save_attaches_detached_instance_to_its_row() {
    let store = TestStore::users();
    let id = seed_spongebob(&store);

    let mut session = store.session();
    let detached = EntityRef::new(User {
        id: Some(id),
        name: "spongebob".to_string(),
        fullname: "Spongebob S.".to_string(),
    });
    session.save(&detached).unwrap();
    let loaded: EntityRef<User> = session.get(id).unwrap().unwrap();
    assert!(EntityRef::ptr_eq(&loaded, &detached));
    session.commit().unwrap();

    let mut conn = store.connect().unwrap();
    assert_eq!(count_rows(&mut conn, "user_account"), 1);
    let names: Vec<String> = conn
        .execute("SELECT fullname FROM user_account", ())
        .unwrap()
        .map(|row| row.try_get("fullname").unwrap())
        .collect();
    assert_eq!(names, vec!["Spongebob S."]);
}

#[test]
fn save_rejects_second_instance_for_tracked_key() {
    let store = TestStore::users();
    let id = seed_spongebob(&store);

    let mut session = store.session();
    let _loaded: EntityRef<User> = session.get(id).unwrap().unwrap();
    let copy = EntityRef::new(User {
        id: Some(id),
        name: "spongebob".to_string(),
        fullname: "Impostor".to_string(),
    });
    let err = session.save(&copy).unwrap_err();
    assert_eq!(err.core_kind(), Some(ErrorKind::InvalidOperation));
    assert!(!session.contains(&copy));
}

#[test]
fn failed_commit_forgets_rolled_back_instances() {
    let store = TestStore::users();

    let mut a = store.session();
    let alice = a.add(User::new("alice", "Alice")).unwrap();
    a.flush().unwrap();
    assert_eq!(alice.borrow().id, Some(1));

    let mut b = store.connect().unwrap();
    b.execute(
        "INSERT INTO user_account (name, fullname) VALUES ('bob', 'Bob')",
        (),
    )
    .unwrap();
    b.commit().unwrap();

    let err = a.commit().unwrap_err();
    assert_eq!(err.core_kind(), Some(ErrorKind::Constraint));
    assert!(!a.in_transaction());
    assert!(a.is_empty());

    let found: EntityRef<User> = a.get(1).unwrap().unwrap();
    assert!(!EntityRef::ptr_eq(&found, &alice));
    assert_eq!(found.borrow().name, "bob");
}

#[test]
fn raw_filter_combines_with_generated_parameters() {
    let store = TestStore::users();
    seed_spongebob(&store);
    let mut session = store.session();
    session.add(User::new("sandy", "Sandy Cheeks")).unwrap();
    session.add(User::new("patrick", "Patrick Star")).unwrap();
    session.commit().unwrap();

    let found = session
        .query::<User>()
        .filter(col("name").eq("spongebob").or(Filter::raw(
            "fullname = :f0",
            [("f0", "Sandy Cheeks")],
        )))
        .order_by("id")
        .all()
        .unwrap();
    let names: Vec<String> = found.iter().map(|u| u.borrow().name.clone()).collect();
    assert_eq!(names, vec!["spongebob", "sandy"]);
}

#[test]
fn lazy_relationships_are_cached_per_session() {
    let store = TestStore::users();
    let id = seed_spongebob(&store);

    let mut session = store.session();
    let user: EntityRef<User> = session.get(id).unwrap().unwrap();
    let addresses: Vec<EntityRef<Address>> = session.related(&user, "addresses").unwrap();
    assert_eq!(addresses.len(), 1);

    // A row added behind the session's back is not seen by the cached collection.
    let mut conn = store.connect().unwrap();
    conn.execute(
        "INSERT INTO address (user_id, email_address) VALUES (:id, 'late@example.com')",
        params! { "id" => id },
    )
    .unwrap();
    conn.commit().unwrap();

    let cached: Vec<EntityRef<Address>> = session.related(&user, "addresses").unwrap();
    assert_eq!(cached.len(), 1);
    assert!(EntityRef::ptr_eq(&addresses[0], &cached[0]));

    let owner: EntityRef<User> = session
        .related_one(&addresses[0], "user")
        .unwrap()
        .unwrap();
    assert!(EntityRef::ptr_eq(&owner, &user));
}

#[test]
fn out_of_band_delete_makes_entity_stale() {
    let store = TestStore::users();
    let mut session = store.session();
    let squidward = session
        .add(User::new("squidward", "Squidward Tentacles"))
        .unwrap();
    session.commit().unwrap();
    let id = squidward.borrow().id.unwrap();

    let mut conn = store.connect().unwrap();
    conn.execute("DELETE FROM user_account WHERE id = :id", params! { "id" => id })
        .unwrap();
    conn.commit().unwrap();

    squidward.borrow_mut().fullname = "Squidward Q. Tentacles".to_string();
    let err = session.commit().unwrap_err();
    assert!(matches!(err, OrmError::StaleEntity { .. }), "{err}");
    assert!(!err.is_retryable());
    session.rollback().unwrap();
    assert!(session.is_empty());
}

#[derive(Debug)]
struct Nicknamed {
    id: Option<i64>,
    name: String,
    nickname: String,
}

impl Entity for Nicknamed {
    fn attributes(&self) -> Vec<(&'static str, reldb_core::Value)> {
        vec![
            ("id", self.id.into()),
            ("name", self.name.clone().into()),
            ("nickname", self.nickname.clone().into()),
        ]
    }

    fn from_attributes(attrs: &Attributes) -> OrmResult<Self> {
        Ok(Self {
            id: attrs.get("id")?,
            name: attrs.get("name")?,
            nickname: String::new(),
        })
    }
}

fn nickname_table() -> TableSchema {
    TableSchema::builder("nicknamed")
        .column(reldb_core::Column::new("id", reldb_core::SqlType::Integer).primary_key())
        .column(reldb_core::Column::new("name", reldb_core::SqlType::Text).not_null())
        .build()
        .unwrap()
}

#[test]
fn attribute_without_column_is_unmapped() {
    let store = TestStore::memory();
    let registry = Arc::new(
        Registry::new()
            .with::<Nicknamed>(Mapping::new(nickname_table()))
            .unwrap(),
    );
    registry.metadata().unwrap().create_all(&store).unwrap();
    let mut session = Session::new(&store, registry).unwrap();

    let err = session
        .add(Nicknamed {
            id: None,
            name: "patrick".into(),
            nickname: "pat".into(),
        })
        .unwrap_err();
    match err {
        OrmError::UnmappedAttribute { attribute, .. } => assert_eq!(attribute, "nickname"),
        other => panic!("unexpected error: {other}"),
    }

    let err = session
        .query::<Nicknamed>()
        .filter(col("nickname").eq("pat"))
        .all()
        .unwrap_err();
    assert!(matches!(err, OrmError::UnmappedAttribute { .. }));
}

#[test]
fn constraint_error_in_flush_surfaces_core_kind() {
    let store = TestStore::users();
    let mut session = store.session();
    session
        .add(Address::owned_by(404, "orphan@example.com"))
        .unwrap();
    let err = session.commit().unwrap_err();
    assert_eq!(err.core_kind(), Some(ErrorKind::Constraint));

    let err = session.connection().commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionAborted);
    session.rollback().unwrap();

    let mut conn = store.connect().unwrap();
    assert_eq!(count_rows(&mut conn, "address"), 0);
}

#[test]
fn queries_see_pending_writes_only_with_autoflush() {
    let store = TestStore::users();

    let mut session = store.session();
    session.add(User::new("gary", "Gary the Snail")).unwrap();
    assert_eq!(session.query::<User>().count().unwrap(), 1);
    session.rollback().unwrap();

    let mut manual = Session::with_config(
        &store,
        Arc::clone(&store.registry),
        SessionConfig::new().autoflush(false),
    )
    .unwrap();
    manual.add(User::new("gary", "Gary the Snail")).unwrap();
    assert_eq!(manual.query::<User>().count().unwrap(), 0);
    manual.flush().unwrap();
    assert_eq!(manual.query::<User>().count().unwrap(), 1);
}

#[test]
fn deleted_children_go_before_parents() {
    let store = TestStore::users();
    let id = seed_spongebob(&store);

    let mut session = store.session();
    let user: EntityRef<User> = session.get(id).unwrap().unwrap();
    let addresses: Vec<EntityRef<Address>> = session.related(&user, "addresses").unwrap();
    session.delete(&user).unwrap();
    for address in &addresses {
        session.delete(address).unwrap();
    }
    session.commit().unwrap();

    assert!(session.get::<User>(id).unwrap().is_none());
    let mut conn = store.connect().unwrap();
    assert_eq!(count_rows(&mut conn, "user_account"), 0);
    assert_eq!(count_rows(&mut conn, "address"), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn every_generated_graph_flushes_and_reloads(graph in users_with_addresses_strategy(4)) {
        let store = TestStore::users();
        let mut session = store.session();
        let mut expected = Vec::new();
        for (user, addresses) in graph {
            let name = user.name.clone();
            let owner = session.add(user).unwrap();
            let mut emails = Vec::new();
            for address in addresses {
                emails.push(address.email_address.clone());
                session.append_related(&owner, "addresses", address).unwrap();
            }
            expected.push((name, emails));
        }
        session.commit().unwrap();
        session.close().unwrap();

        let mut session = store.session();
        let users = session.query::<User>().order_by("id").all().unwrap();
        prop_assert_eq!(users.len(), expected.len());
        for (user, (name, emails)) in users.iter().zip(&expected) {
            prop_assert_eq!(&user.borrow().name, name);
            let loaded: Vec<EntityRef<Address>> = session.related(user, "addresses").unwrap();
            let loaded: Vec<String> = loaded.iter().map(|a| a.borrow().email_address.clone()).collect();
            prop_assert_eq!(&loaded, emails);
        }
    }
}
