//! Shared test fixture: the Member/Team dataset.
//!
//! Not part of the public API; exposed (hidden) so the integration suite and
//! doctests can reuse the same entity definitions and seed data.
//!
//! The canonical dataset is four members with ages 10/20/30/40, the first
//! two on `teamA` and the last two on `teamB`.

use crate::metadata::{EntityDef, FieldDef, FieldKind};
use crate::store::Store;
use crate::value::Record;
use once_cell::sync::Lazy;

static MEMBER: Lazy<EntityDef> = Lazy::new(|| {
    EntityDef::new(
        "member",
        vec![
            FieldDef::new("id", FieldKind::Int),
            FieldDef::new("username", FieldKind::Text).nullable(),
            FieldDef::new("age", FieldKind::Int),
            FieldDef::new("team_id", FieldKind::Int),
        ],
    )
});

static TEAM: Lazy<EntityDef> = Lazy::new(|| {
    EntityDef::new(
        "team",
        vec![
            FieldDef::new("id", FieldKind::Int),
            FieldDef::new("name", FieldKind::Text),
        ],
    )
});

pub fn member_def() -> EntityDef {
    MEMBER.clone()
}

pub fn team_def() -> EntityDef {
    TEAM.clone()
}

/// Seed the canonical dataset and flush.
///
/// Panics on store failure; fixture code only ever runs in tests.
pub fn seed_members<S: Store + ?Sized>(store: &S) {
    store
        .persist("team", Record::new().with("id", 1).with("name", "teamA"))
        .expect("persist teamA");
    store
        .persist("team", Record::new().with("id", 2).with("name", "teamB"))
        .expect("persist teamB");
    for (id, username, age, team_id) in [
        (1, "member1", 10, 1),
        (2, "member2", 20, 1),
        (3, "member3", 30, 2),
        (4, "member4", 40, 2),
    ] {
        store
            .persist(
                "member",
                Record::new()
                    .with("id", id)
                    .with("username", username)
                    .with("age", age)
                    .with("team_id", team_id),
            )
            .expect("persist member");
    }
    store.flush().expect("flush fixture");
}
