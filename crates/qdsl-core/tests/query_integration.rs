//! Integration tests for the query engine over the Member/Team fixture.

use std::sync::Arc;

use qdsl_core::catalog::{Catalog, EntityDef, FieldDef, FieldType, RelationDef, ScalarType};
use qdsl_core::query::{CaseBuilder, EntityPath, ExecutionAdapter, Expression, QueryFactory};
use qdsl_core::storage::{MemoryStore, NewRecord};
use qdsl_core::Error;
use qdsl_proto::{EntityObject, Reference, Tuple, Value};

struct TestContext {
    store: Arc<MemoryStore>,
    factory: QueryFactory,
    team_a: i64,
    team_b: i64,
}

impl TestContext {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let mut catalog = Catalog::new();
        catalog
            .register_entity(
                EntityDef::new("Team", "id")
                    .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String))),
            )
            .unwrap();
        catalog
            .register_entity(
                EntityDef::new("Member", "id")
                    .with_field(FieldDef::optional("username", ScalarType::String))
                    .with_field(FieldDef::new("age", FieldType::scalar(ScalarType::Int32)))
                    .with_field(FieldDef::reference("team", "Team")),
            )
            .unwrap();
        catalog
            .register_relation(
                RelationDef::many_to_one("member_team", "Member", "team", "Team", "id")
                    .with_inverse("members"),
            )
            .unwrap();
        let catalog = catalog.freeze();

        let store = Arc::new(MemoryStore::new(Arc::clone(&catalog)));
        let adapter: Arc<dyn ExecutionAdapter> = store.clone();
        let factory = QueryFactory::new(catalog, adapter);

        let team_a = store
            .insert(NewRecord::new("Team").with("name", "teamA"))
            .unwrap();
        let team_b = store
            .insert(NewRecord::new("Team").with("name", "teamB"))
            .unwrap();

        let ctx = Self {
            store,
            factory,
            team_a,
            team_b,
        };
        ctx.add_member(Some("member1"), 10, Some(team_a));
        ctx.add_member(Some("member2"), 20, Some(team_a));
        ctx.add_member(Some("member3"), 30, Some(team_b));
        ctx.add_member(Some("member4"), 40, Some(team_b));
        ctx
    }

    fn add_member(&self, username: Option<&str>, age: i32, team: Option<i64>) -> i64 {
        let mut record = NewRecord::new("Member").with("age", age);
        if let Some(username) = username {
            record = record.with("username", username);
        }
        if let Some(team) = team {
            record = record.with("team", team);
        }
        self.store.insert(record).unwrap()
    }

    fn member(&self) -> EntityPath {
        self.factory.catalog().path("Member").unwrap()
    }

    fn team(&self) -> EntityPath {
        self.factory.catalog().path("Team").unwrap()
    }

    fn member_sub(&self) -> EntityPath {
        self.factory.catalog().path_as("Member", "memberSub").unwrap()
    }
}

fn usernames(members: &[EntityObject]) -> Vec<Option<&str>> {
    members.iter().map(|m| m.get_str("username")).collect()
}

fn ages(members: &[EntityObject]) -> Vec<i64> {
    members.iter().filter_map(|m| m.get_i64("age")).collect()
}

fn entity_at(tuple: &Tuple, index: usize) -> Option<&EntityObject> {
    tuple.get(index).and_then(|cell| cell.as_entity())
}

#[test]
fn test_search_with_and_chain() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let username = member.get("username").unwrap();
    let age = member.get("age").unwrap();

    let found = ctx
        .factory
        .select_from(&member)
        .filter(username.eq("member1").unwrap().and(age.eq(10).unwrap()))
        .fetch_one_as::<EntityObject>()
        .unwrap()
        .unwrap();
    assert_eq!(found.get_str("username"), Some("member1"));

    let found = ctx
        .factory
        .select_from(&member)
        .filter_all([
            Some(username.eq("member1").unwrap()),
            None,
            Some(age.between(10, 30).unwrap()),
        ])
        .fetch_as::<EntityObject>()
        .unwrap();
    assert_eq!(usernames(&found), vec![Some("member1")]);
}

#[test]
fn test_sort_with_nulls_last() {
    let ctx = TestContext::new();
    ctx.add_member(None, 100, None);
    ctx.add_member(Some("member5"), 100, None);
    ctx.add_member(Some("member6"), 100, None);

    let member = ctx.member();
    let age = member.get("age").unwrap();
    let username = member.get("username").unwrap();
    let result = ctx
        .factory
        .select_from(&member)
        .filter(age.eq(100).unwrap())
        .order_by([age.desc(), username.asc().nulls_last()])
        .fetch_as::<EntityObject>()
        .unwrap();

    assert_eq!(
        usernames(&result),
        vec![Some("member5"), Some("member6"), None]
    );
}

#[test]
fn test_desc_nulls_last_puts_every_null_after() {
    let ctx = TestContext::new();
    ctx.add_member(None, 50, None);
    ctx.add_member(None, 60, None);

    let member = ctx.member();
    let username = member.get("username").unwrap();
    let names = ctx
        .factory
        .select([&username])
        .from([&member])
        .order_by([username.desc().nulls_last()])
        .fetch_as::<Option<String>>()
        .unwrap();

    assert_eq!(names.len(), 6);
    assert!(names[..4].iter().all(Option::is_some));
    assert!(names[4..].iter().all(Option::is_none));
    assert_eq!(names[0].as_deref(), Some("member4"));
}

#[test]
fn test_paging_with_total() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let query = ctx
        .factory
        .select_from(&member)
        .order_by([member.get("username").unwrap().desc()])
        .offset(1)
        .limit(2);

    let page = query.fetch_as::<EntityObject>().unwrap();
    assert_eq!(usernames(&page), vec![Some("member3"), Some("member2")]);

    let results = query.fetch_results_with_total().unwrap();
    assert_eq!(results.total, 4);
    assert_eq!(results.limit, Some(2));
    assert_eq!(results.offset, 1);
    assert_eq!(results.results.len(), 2);
}

#[test]
fn test_aggregation() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let age = member.get("age").unwrap();
    let tuples = ctx
        .factory
        .select([
            member.count(),
            age.sum().unwrap(),
            age.avg().unwrap(),
            age.max().unwrap(),
            age.min().unwrap(),
        ])
        .from([&member])
        .fetch_tuples()
        .unwrap();

    assert_eq!(tuples.len(), 1);
    let tuple = &tuples[0];
    assert_eq!(tuple.value(0), Some(&Value::Int64(4)));
    assert_eq!(tuple.value(1), Some(&Value::Int64(100)));
    assert_eq!(tuple.value(2), Some(&Value::Float64(25.0)));
    assert_eq!(tuple.value(3), Some(&Value::Int32(40)));
    assert_eq!(tuple.value(4), Some(&Value::Int32(10)));
}

#[test]
fn test_group_by_team() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let team = ctx.team();
    let team_name = team.get("name").unwrap();
    let avg_age = member.get("age").unwrap().avg().unwrap();

    let tuples = ctx
        .factory
        .select([&team_name, &avg_age])
        .from([&member])
        .join(&member.association("team").unwrap(), &team)
        .group_by([&team_name])
        .fetch_tuples()
        .unwrap();

    assert_eq!(tuples.len(), 2);
    assert_eq!(tuples[0].value_of(&team_name), Some(&Value::from("teamA")));
    assert_eq!(tuples[0].value_of(&avg_age), Some(&Value::Float64(15.0)));
    assert_eq!(tuples[1].value_of(&team_name), Some(&Value::from("teamB")));
    assert_eq!(tuples[1].value_of(&avg_age), Some(&Value::Float64(35.0)));
}

#[test]
fn test_having_filters_groups() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let team = ctx.team();
    let team_name = team.get("name").unwrap();
    let avg_age = member.get("age").unwrap().avg().unwrap();

    let names = ctx
        .factory
        .select([&team_name])
        .from([&member])
        .join(&member.association("team").unwrap(), &team)
        .group_by([&team_name])
        .having(avg_age.gt(20).unwrap())
        .fetch_as::<String>()
        .unwrap();

    assert_eq!(names, vec!["teamB".to_string()]);
}

#[test]
fn test_association_join() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let team = ctx.team();
    let result = ctx
        .factory
        .select_from(&member)
        .join(&member.association("team").unwrap(), &team)
        .filter(team.get("name").unwrap().eq("teamA").unwrap())
        .fetch_as::<EntityObject>()
        .unwrap();

    assert_eq!(usernames(&result), vec![Some("member1"), Some("member2")]);
}

#[test]
fn test_theta_join() {
    let ctx = TestContext::new();
    ctx.add_member(Some("teamA"), 0, None);
    ctx.add_member(Some("teamB"), 0, None);
    ctx.add_member(Some("teamC"), 0, None);

    let member = ctx.member();
    let team = ctx.team();
    let result = ctx
        .factory
        .select([&member])
        .from([&member, &team])
        .filter(
            member
                .get("username")
                .unwrap()
                .eq(team.get("name").unwrap())
                .unwrap(),
        )
        .fetch_as::<EntityObject>()
        .unwrap();

    assert_eq!(usernames(&result), vec![Some("teamA"), Some("teamB")]);
}

#[test]
fn test_left_join_with_on_filter() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let team = ctx.team();
    let tuples = ctx
        .factory
        .select([&member, &team])
        .from([&member])
        .left_join(&member.association("team").unwrap(), &team)
        .on(team.get("name").unwrap().eq("teamA").unwrap())
        .fetch_tuples()
        .unwrap();

    assert_eq!(tuples.len(), 4);
    for tuple in &tuples[..2] {
        let team = entity_at(tuple, 1).unwrap();
        assert_eq!(team.get_str("name"), Some("teamA"));
    }
    for tuple in &tuples[2..] {
        assert!(entity_at(tuple, 0).is_some());
        assert!(tuple.get(1).unwrap().is_null());
    }
}

#[test]
fn test_left_join_with_where_filter() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let team = ctx.team();
    let tuples = ctx
        .factory
        .select([&member, &team])
        .from([&member])
        .left_join(&member.association("team").unwrap(), &team)
        .filter(team.get("name").unwrap().eq("teamA").unwrap())
        .fetch_tuples()
        .unwrap();

    assert_eq!(tuples.len(), 2);
    for tuple in &tuples {
        let team = entity_at(tuple, 1).unwrap();
        assert_eq!(team.get_str("name"), Some("teamA"));
    }
}

#[test]
fn test_unrelated_left_join() {
    let ctx = TestContext::new();
    ctx.add_member(Some("teamA"), 0, None);
    ctx.add_member(Some("teamB"), 0, None);
    ctx.add_member(Some("teamC"), 0, None);

    let member = ctx.member();
    let team = ctx.team();
    let tuples = ctx
        .factory
        .select([&member, &team])
        .from([&member])
        .left_join_entity(&team)
        .on(member
            .get("username")
            .unwrap()
            .eq(team.get("name").unwrap())
            .unwrap())
        .fetch_tuples()
        .unwrap();

    assert_eq!(tuples.len(), 7);
    for tuple in &tuples {
        let member = entity_at(tuple, 0).unwrap();
        let team = entity_at(tuple, 1);
        match member.get_str("username") {
            Some(name @ ("teamA" | "teamB")) => {
                assert_eq!(team.and_then(|t| t.get_str("name")), Some(name));
            }
            _ => assert!(team.is_none()),
        }
    }
}

#[test]
fn test_unrelated_left_join_without_on_is_rejected() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let team = ctx.team();
    let query = ctx
        .factory
        .select([&member, &team])
        .from([&member])
        .left_join_entity(&team);

    assert!(matches!(query.fetch_tuples(), Err(Error::InvalidJoin(_))));
}

#[test]
fn test_fetch_join_loads_reference() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let team = ctx.team();
    let by_name = member.get("username").unwrap().eq("member1").unwrap();

    let plain = ctx
        .factory
        .select_from(&member)
        .filter(by_name.clone())
        .fetch_one_as::<EntityObject>()
        .unwrap()
        .unwrap();
    assert!(!plain.is_loaded("team"));
    assert_eq!(
        plain.reference("team"),
        Some(&Reference::Unloaded {
            entity: "Team".into(),
            id: ctx.team_a,
        })
    );

    let eager = ctx
        .factory
        .select_from(&member)
        .join(&member.association("team").unwrap(), &team)
        .fetch_join()
        .filter(by_name)
        .fetch_one_as::<EntityObject>()
        .unwrap()
        .unwrap();
    assert!(eager.is_loaded("team"));
    let loaded = eager.reference("team").and_then(Reference::loaded).unwrap();
    assert_eq!(loaded.get_str("name"), Some("teamA"));
}

#[test]
fn test_subquery_max_and_avg() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let member_sub = ctx.member_sub();
    let age = member.get("age").unwrap();
    let sub_age = member_sub.get("age").unwrap();

    let oldest = ctx
        .factory
        .select_from(&member)
        .filter(
            age.eq(ctx
                .factory
                .select([sub_age.max().unwrap()])
                .from([&member_sub])
                .as_subquery())
                .unwrap(),
        )
        .fetch_as::<EntityObject>()
        .unwrap();
    assert_eq!(ages(&oldest), vec![40]);

    let above_average = ctx
        .factory
        .select_from(&member)
        .filter(
            age.goe(ctx
                .factory
                .select([sub_age.avg().unwrap()])
                .from([&member_sub])
                .as_subquery())
                .unwrap(),
        )
        .fetch_as::<EntityObject>()
        .unwrap();
    assert_eq!(ages(&above_average), vec![30, 40]);
}

#[test]
fn test_in_subquery_is_subset() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let member_sub = ctx.member_sub();
    let sub_age = member_sub.get("age").unwrap();
    let older_than_ten = ctx
        .factory
        .select([&sub_age])
        .from([&member_sub])
        .filter(sub_age.gt(10).unwrap())
        .as_subquery();

    let all = ctx.factory.select_from(&member).fetch_as::<EntityObject>().unwrap();
    let result = ctx
        .factory
        .select_from(&member)
        .filter(member.get("age").unwrap().in_subquery(&older_than_ten).unwrap())
        .fetch_as::<EntityObject>()
        .unwrap();

    assert_eq!(ages(&result), vec![20, 30, 40]);
    assert!(result.iter().all(|m| all.contains(m)));
}

#[test]
fn test_in_subquery_rejects_two_columns() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let member_sub = ctx.member_sub();
    let two_columns = ctx
        .factory
        .select([member_sub.get("age").unwrap(), member_sub.id()])
        .from([&member_sub])
        .as_subquery();

    let result = member.get("age").unwrap().in_subquery(&two_columns);
    assert!(matches!(
        result,
        Err(Error::InvalidSubqueryShape { columns: 2 })
    ));
}

#[test]
fn test_correlated_subquery() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let member_sub = ctx.member_sub();
    let team_average = ctx
        .factory
        .select([member_sub.get("age").unwrap().avg().unwrap()])
        .from([&member_sub])
        .filter(
            member_sub
                .get("team")
                .unwrap()
                .eq(member.get("team").unwrap())
                .unwrap(),
        )
        .as_subquery();

    let result = ctx
        .factory
        .select_from(&member)
        .filter(member.get("age").unwrap().goe(&team_average).unwrap())
        .fetch_as::<EntityObject>()
        .unwrap();

    assert_eq!(usernames(&result), vec![Some("member2"), Some("member4")]);
}

#[test]
fn test_select_clause_subquery() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let member_sub = ctx.member_sub();
    let average = ctx
        .factory
        .select([member_sub.get("age").unwrap().avg().unwrap()])
        .from([&member_sub])
        .as_subquery()
        .to_expression()
        .unwrap();

    let tuples = ctx
        .factory
        .select([member.get("username").unwrap(), average])
        .from([&member])
        .fetch_tuples()
        .unwrap();

    assert_eq!(tuples.len(), 4);
    assert!(tuples
        .iter()
        .all(|t| t.value(1) == Some(&Value::Float64(25.0))));
}

#[test]
fn test_grouped_subquery_reading_ungrouped_column() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let team = ctx.team();
    let member_sub = ctx.member_sub();
    let team_name = team.get("name").unwrap();
    let older_count = ctx
        .factory
        .select([member_sub.count()])
        .from([&member_sub])
        .filter(
            member_sub
                .get("age")
                .unwrap()
                .gt(member.get("age").unwrap())
                .unwrap(),
        )
        .as_subquery()
        .to_expression()
        .unwrap();

    let result = ctx
        .factory
        .select([team_name.clone(), older_count])
        .from([&member])
        .join(&member.association("team").unwrap(), &team)
        .group_by([&team_name])
        .fetch_tuples();

    assert!(matches!(result, Err(Error::InvalidProjection(_))));
}

#[test]
fn test_simple_case() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let age = member.get("age").unwrap();
    let labels = ctx
        .factory
        .select([age
            .when(10)
            .then("ten")
            .when(20)
            .then("twenty")
            .otherwise("other")
            .unwrap()])
        .from([&member])
        .fetch_as::<String>()
        .unwrap();

    assert_eq!(labels, vec!["ten", "twenty", "other", "other"]);
}

#[test]
fn test_searched_case() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let age = member.get("age").unwrap();
    let bucket = CaseBuilder::new()
        .when(age.between(0, 20).unwrap())
        .then("0~20")
        .when(age.between(21, 30).unwrap())
        .then("21~30")
        .otherwise("other")
        .unwrap();

    let labels = ctx
        .factory
        .select([bucket])
        .from([&member])
        .fetch_as::<String>()
        .unwrap();

    assert_eq!(labels, vec!["0~20", "0~20", "21~30", "other"]);
}

#[test]
fn test_case_without_default_yields_null() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let age = member.get("age").unwrap();
    let labels = ctx
        .factory
        .select([age.when(10).then("ten").end().unwrap()])
        .from([&member])
        .fetch_as::<Option<String>>()
        .unwrap();

    assert_eq!(labels, vec![Some("ten".to_string()), None, None, None]);
}

#[test]
fn test_constant_projection() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let tuples = ctx
        .factory
        .select([member.get("username").unwrap(), Expression::constant("A")])
        .from([&member])
        .fetch_tuples()
        .unwrap();

    assert_eq!(tuples.len(), 4);
    assert!(tuples.iter().all(|t| t.value(1) == Some(&Value::from("A"))));
}

#[test]
fn test_concat_with_string_value() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let username = member.get("username").unwrap();
    let label = username
        .concat("_")
        .unwrap()
        .concat(member.get("age").unwrap().string_value())
        .unwrap();

    let result = ctx
        .factory
        .select([label])
        .from([&member])
        .filter(username.eq("member1").unwrap())
        .fetch_one_as::<String>()
        .unwrap();

    assert_eq!(result.as_deref(), Some("member1_10"));
}

#[test]
fn test_concat_rejects_non_string() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let username = member.get("username").unwrap();
    let result = username.concat(member.get("age").unwrap());
    assert!(matches!(result, Err(Error::TypeMismatch { .. })));
}

#[test]
fn test_fetch_one_and_fetch_first() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let query = ctx.factory.select_from(&member);

    assert!(matches!(
        query.fetch_one(),
        Err(Error::TooManyResults { found: 4 })
    ));
    assert!(query.fetch_first().unwrap().is_some());

    let nobody = query
        .clone()
        .filter(member.get("age").unwrap().gt(100).unwrap());
    assert!(nobody.fetch_one().unwrap().is_none());
    assert!(nobody.fetch_first().unwrap().is_none());
}

#[test]
fn test_literal_type_mismatch() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let age = member.get("age").unwrap();

    assert!(matches!(age.eq("ten"), Err(Error::TypeMismatch { .. })));
    assert!(matches!(
        member.get("username").unwrap().gt(10),
        Err(Error::TypeMismatch { .. })
    ));
    assert!(matches!(
        member.get("username").unwrap().sum(),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn test_count_matches_fetch() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let query = ctx.factory.select_from(&member);
    let fetched = query.fetch().unwrap();
    assert_eq!(query.fetch_count().unwrap(), fetched.len() as u64);

    let filtered = query.filter(member.get("age").unwrap().goe(20).unwrap());
    assert_eq!(filtered.fetch_count().unwrap(), 3);
}

#[test]
fn test_inverse_collection_tracks_reference_changes() {
    let ctx = TestContext::new();
    let member = ctx.member();
    let member1 = ctx
        .factory
        .select_from(&member)
        .filter(member.get("username").unwrap().eq("member1").unwrap())
        .fetch_one_as::<EntityObject>()
        .unwrap()
        .unwrap();

    ctx.store
        .change_reference("Member", member1.id, "team", Some(ctx.team_b))
        .unwrap();

    let team_a = ctx.store.members("Team", ctx.team_a, "members").unwrap();
    let team_b = ctx.store.members("Team", ctx.team_b, "members").unwrap();
    assert_eq!(usernames(&team_a), vec![Some("member2")]);
    assert_eq!(
        usernames(&team_b),
        vec![Some("member1"), Some("member3"), Some("member4")]
    );
    assert!(ctx.store.verify_inverse_index());

    let team = ctx.team();
    let in_team_b = ctx
        .factory
        .select_from(&member)
        .join(&member.association("team").unwrap(), &team)
        .filter(team.get("name").unwrap().eq("teamB").unwrap())
        .fetch_count()
        .unwrap();
    assert_eq!(in_team_b, 3);
}
