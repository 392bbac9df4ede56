//! Integration tests for the four fetch modes against the in-memory store.

use quarry::tests_cfg::{member_def, seed_members, team_def};
use quarry::{
    EntityDef, FieldDef, FieldKind, MemoryStore, Predicate, QueryError, Record, Select, Store,
    Value,
};

#[test]
fn fetch_one_by_username_returns_exactly_that_member() {
    let store = MemoryStore::new();
    seed_members(&store);
    let member = member_def();

    let row = Select::from(&member)
        .filter(member.field("username").unwrap().eq("member3"))
        .build()
        .unwrap()
        .fetch_one(&store)
        .unwrap()
        .unwrap();
    assert_eq!(row.value("username"), Value::Text("member3".to_string()));
    assert_eq!(row.value("age"), Value::Int(30));
}

#[test]
fn fetch_one_with_duplicates_is_a_non_unique_error() {
    let store = MemoryStore::new();
    seed_members(&store);
    let member = member_def();
    store
        .persist(
            "member",
            Record::new()
                .with("id", 5)
                .with("username", "member1")
                .with("age", 50)
                .with("team_id", 1),
        )
        .unwrap();
    store.flush().unwrap();

    let err = Select::from(&member)
        .filter(member.field("username").unwrap().eq("member1"))
        .build()
        .unwrap()
        .fetch_one(&store)
        .unwrap_err();
    assert!(matches!(err, QueryError::NonUniqueResult { count: 2 }));
}

#[test]
fn chained_and_fragment_styles_return_identical_sequences() {
    let store = MemoryStore::new();
    seed_members(&store);
    let member = member_def();
    let username = member.field("username").unwrap();
    let team_id = member.field("team_id").unwrap();

    let chained = Select::from(&member)
        .filter(username.eq("member1").and(team_id.eq(1)))
        .build()
        .unwrap()
        .fetch_all(&store)
        .unwrap();

    let fragments = Select::from(&member)
        .filter_all([None, Some(username.eq("member1")), Some(team_id.eq(1))])
        .build()
        .unwrap()
        .fetch_all(&store)
        .unwrap();

    assert_eq!(chained, fragments);
    assert_eq!(chained.len(), 1);
}

#[test]
fn all_absent_fragments_mean_no_constraint() {
    let store = MemoryStore::new();
    seed_members(&store);
    let member = member_def();

    let rows = Select::from(&member)
        .filter_all([None, None])
        .build()
        .unwrap()
        .fetch_all(&store)
        .unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(Predicate::all([None, None]), None);
}

#[test]
fn null_usernames_sort_last_within_the_equal_age_group() {
    let store = MemoryStore::new();
    let member = member_def();
    store
        .persist("member", Record::new().with("age", 100))
        .unwrap();
    store
        .persist(
            "member",
            Record::new().with("username", "member5").with("age", 100),
        )
        .unwrap();
    store
        .persist(
            "member",
            Record::new().with("username", "member6").with("age", 100),
        )
        .unwrap();
    store.flush().unwrap();

    let rows = Select::from(&member)
        .order_by(member.field("age").unwrap().desc())
        .order_by(member.field("username").unwrap().asc().nulls_last())
        .build()
        .unwrap()
        .fetch_all(&store)
        .unwrap();
    let usernames: Vec<Value> = rows.iter().map(|r| r.value("username")).collect();
    assert_eq!(
        usernames,
        vec![
            Value::Text("member5".to_string()),
            Value::Text("member6".to_string()),
            Value::Null,
        ]
    );
}

#[test]
fn paged_fetch_reports_total_alongside_the_window() {
    let store = MemoryStore::new();
    seed_members(&store);
    let member = member_def();

    let query = Select::from(&member)
        .order_by(member.field("username").unwrap().desc())
        .offset(1)
        .limit(2)
        .build()
        .unwrap();

    let rows = query.fetch_all(&store).unwrap();
    assert_eq!(rows.len(), 2);

    let page = query.fetch_page(&store).unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.limit, 2);
    assert_eq!(page.offset, 1);
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.records, rows);
    assert_eq!(
        page.records[0].value("username"),
        Value::Text("member3".to_string())
    );
    assert_eq!(
        page.records[1].value("username"),
        Value::Text("member2".to_string())
    );
}

#[test]
fn executing_the_same_query_twice_is_idempotent() {
    let store = MemoryStore::new();
    seed_members(&store);
    let member = member_def();

    let query = Select::from(&member)
        .filter(member.field("team_id").unwrap().eq(2))
        .order_by(member.field("age").unwrap().asc())
        .build()
        .unwrap();
    let first = query.fetch_all(&store).unwrap();
    let second = query.fetch_all(&store).unwrap();
    assert_eq!(first, second);

    let page1 = query.fetch_page(&store).unwrap();
    let page2 = query.fetch_page(&store).unwrap();
    assert_eq!(page1, page2);
}

#[test]
fn zero_matches_are_absent_never_errors_or_defaults() {
    let store = MemoryStore::new();
    seed_members(&store);
    let member = member_def();

    let query = Select::from(&member)
        .filter(member.field("age").unwrap().eq(999))
        .build()
        .unwrap();
    assert_eq!(query.fetch_one(&store).unwrap(), None);
    assert_eq!(query.fetch_first(&store).unwrap(), None);
    assert!(query.fetch_all(&store).unwrap().is_empty());

    let page = query.fetch_page(&store).unwrap();
    assert!(page.records.is_empty());
    assert_eq!(page.total, 0);
}

#[test]
fn build_time_errors_fire_before_any_io() {
    let member = member_def();
    let team = team_def();

    // Unjoined relation field.
    let err = Select::from(&member)
        .filter(team.field("name").unwrap().eq("teamA"))
        .build()
        .unwrap_err();
    assert!(matches!(err, QueryError::FieldMismatch { .. }));

    // Ordering by a field without the Order capability.
    let flags = EntityDef::new(
        "flags",
        vec![FieldDef::new("active", FieldKind::Bool)],
    );
    let err = Select::from(&flags)
        .order_by(flags.field("active").unwrap().asc())
        .build()
        .unwrap_err();
    assert!(matches!(err, QueryError::Capability { .. }));
}

#[test]
fn joined_predicates_filter_members_through_their_team() {
    let store = MemoryStore::new();
    seed_members(&store);
    let member = member_def();
    let team = team_def();

    let rows = Select::from(&member)
        .join(
            &team,
            "team",
            member.field("team_id").unwrap(),
            team.field("id").unwrap(),
        )
        .filter(team.field("name").unwrap().eq("teamB"))
        .order_by(member.field("age").unwrap().desc())
        .build()
        .unwrap()
        .fetch_all(&store)
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value("username"), Value::Text("member4".to_string()));
    assert_eq!(rows[1].value("username"), Value::Text("member3".to_string()));
}
