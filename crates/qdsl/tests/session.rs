//! End-to-end tests through the facade.

use qdsl::prelude::*;
use qdsl::{Error, ExecutorConfig, NullsAre, SchemaBundle};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn schema() -> SchemaBundle {
    SchemaBundle::new()
        .with_entity(
            EntityDef::new("Team", "id")
                .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String))),
        )
        .with_entity(
            EntityDef::new("Member", "id")
                .with_field(FieldDef::optional("username", ScalarType::String))
                .with_field(FieldDef::new("age", FieldType::scalar(ScalarType::Int32)))
                .with_field(FieldDef::reference("team", "Team")),
        )
        .with_relation(
            RelationDef::many_to_one("member_team", "Member", "team", "Team", "id")
                .with_inverse("members"),
        )
}

fn seed(session: &Session) {
    let team_a = session
        .insert(NewRecord::new("Team").with("name", "teamA"))
        .unwrap();
    let team_b = session
        .insert(NewRecord::new("Team").with("name", "teamB"))
        .unwrap();
    for (name, age, team) in [
        ("member1", 10, team_a),
        ("member2", 20, team_a),
        ("member3", 30, team_b),
        ("member4", 40, team_b),
    ] {
        session
            .insert(
                NewRecord::new("Member")
                    .with("username", name)
                    .with("age", age)
                    .with("team", team),
            )
            .unwrap();
    }
}

#[test]
fn test_session_round_trip() {
    init_tracing();
    let session = Session::from_bundle(schema()).unwrap();
    seed(&session);

    let member = session.path("Member").unwrap();
    let team = session.path("Team").unwrap();
    let result = session
        .select_from(&member)
        .join(&member.association("team").unwrap(), &team)
        .fetch_join()
        .filter(team.get("name").unwrap().eq("teamB").unwrap())
        .order_by([member.get("age").unwrap().desc()])
        .fetch_as::<EntityObject>()
        .unwrap();

    let names: Vec<_> = result.iter().filter_map(|m| m.get_str("username")).collect();
    assert_eq!(names, vec!["member4", "member3"]);
    assert!(result.iter().all(|m| m.is_loaded("team")));
}

#[test]
fn test_schema_from_json() {
    let json = schema().to_json().unwrap();
    let session = Session::from_json(&json).unwrap();
    seed(&session);

    let member = session.path("Member").unwrap();
    assert_eq!(session.select_from(&member).fetch_count().unwrap(), 4);
    assert_eq!(session.store().count("Team"), 2);
}

#[test]
fn test_invalid_schema_is_rejected() {
    let bundle = SchemaBundle::new().with_relation(RelationDef::many_to_one(
        "member_team",
        "Member",
        "team",
        "Team",
        "id",
    ));
    assert!(matches!(
        Session::from_bundle(bundle),
        Err(Error::UnknownEntity(_))
    ));
}

#[test]
fn test_configured_null_placement() {
    let catalog = Catalog::from_bundle(schema()).unwrap();
    let session = Session::with_config(
        catalog,
        ExecutorConfig::default().with_default_nulls(NullsAre::Largest),
    );
    seed(&session);
    session
        .insert(NewRecord::new("Member").with("age", 50))
        .unwrap();

    let member = session.path("Member").unwrap();
    let username = member.get("username").unwrap();
    let names = session
        .select([&username])
        .from([&member])
        .order_by([username.asc()])
        .fetch_as::<Option<String>>()
        .unwrap();

    assert_eq!(names.len(), 5);
    assert_eq!(names[0].as_deref(), Some("member1"));
    assert!(names[4].is_none());
}

#[test]
fn test_clones_share_the_store() {
    let session = Session::from_bundle(schema()).unwrap();
    let clone = session.clone();
    seed(&clone);

    let team = session.path("Team").unwrap();
    let names = session
        .select([team.get("name").unwrap()])
        .from([&team])
        .fetch_as::<String>()
        .unwrap();
    assert_eq!(names, vec!["teamA", "teamB"]);

    let subquery_team = session.path_as("Team", "t").unwrap();
    let value = session
        .select([subquery_team.get("name").unwrap()])
        .from([&subquery_team])
        .filter(subquery_team.get("name").unwrap().like("%B").unwrap())
        .fetch_one_as::<String>()
        .unwrap();
    assert_eq!(value.as_deref(), Some("teamB"));
}
