mod support;

use bson::doc;
use std::sync::Arc;
use unirank::gateway::{Condition, ConditionOp, ListRequest, SearchSpec};
use unirank::schema::{ListedRecord, ReviewLayout};
use unirank::{Gateway, GatewayConfig, GatewayError, MemoryStore};

fn ids(records: &[ListedRecord]) -> Vec<String> {
    records.iter().map(|r| r.id().unwrap_or_default().to_string()).collect()
}

fn names(records: &[ListedRecord]) -> Vec<String> {
    records.iter().filter_map(|r| r.as_entity().and_then(|e| e.name.clone())).collect()
}

#[test]
fn text_search_and_offset_scenario() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed("universities", vec![doc! { "_id": "a", "country": "Austria" }, doc! { "_id": "b", "country": "Germany" }])
        .unwrap();
    let gw = Gateway::with_store(store, GatewayConfig::default()).unwrap();

    let first = gw.list_entities(&ListRequest::new(Some(1), Some(0), SearchSpec::text("aust"))).unwrap();
    assert_eq!(ids(&first), vec!["a"]);
    assert_eq!(first[0].as_entity().and_then(|e| e.country.as_deref()), Some("Austria"));

    let second = gw.list_entities(&ListRequest::new(Some(1), Some(1), SearchSpec::text(""))).unwrap();
    assert_eq!(ids(&second), vec!["b"]);
}

#[test]
fn text_search_keeps_surrounding_whitespace() {
    let store = Arc::new(MemoryStore::new());
    store.seed("universities", vec![doc! { "_id": "a", "name": "TU Wien" }, doc! { "_id": "b", "name": "LMU" }]).unwrap();
    let gw = Gateway::with_store(store, GatewayConfig::default()).unwrap();
    let list = |token: &str| ids(&gw.list_entities(&ListRequest::new(Some(10), None, SearchSpec::text(token))).unwrap());
    assert!(list("wien ").is_empty());
    assert_eq!(list(" "), vec!["a"]);
    assert_eq!(list(""), vec!["a", "b"]);
}

#[test]
fn search_is_case_insensitive_across_name_country_and_city() {
    let (_, gw) = support::gateway();
    let by_city = gw.list_entities(&ListRequest::new(Some(10), None, SearchSpec::text("BERLIN"))).unwrap();
    assert_eq!(ids(&by_city), vec!["u2"]);
    let by_name = gw.list_entities(&ListRequest::new(Some(10), None, SearchSpec::text("universität"))).unwrap();
    assert_eq!(by_name.len(), 2);
    let none = gw.list_entities(&ListRequest::new(Some(10), None, SearchSpec::text("atlantis"))).unwrap();
    assert!(none.is_empty());
}

#[test]
fn universities_default_to_name_order_and_ids_are_strings() {
    let (_, gw) = support::gateway();
    let all = gw.list_entities(&ListRequest::default()).unwrap();
    assert_eq!(names(&all), vec!["ETH Zürich", "TU Berlin", "Universität Graz", "Universität Wien"]);
    assert_eq!(all[0].id(), Some(support::ETH_OID));
}

#[test]
fn cities_default_to_best_experience_first() {
    let (_, gw) = support::gateway();
    let req = ListRequest { collection: Some("cities".into()), ..ListRequest::default() };
    let all = gw.list_entities(&req).unwrap();
    assert_eq!(names(&all), vec!["Berlin", "Vienna", "Graz"]);
    let rating = all[0].as_entity().and_then(|e| e.experience_rating.as_ref()).and_then(|a| a.value);
    assert_eq!(rating, Some(4.8));
}

#[test]
fn requested_sort_overrides_default() {
    let (_, gw) = support::gateway();
    let req = ListRequest { sort: Some("votes:desc".into()), ..ListRequest::new(Some(2), None, SearchSpec::default()) };
    let top = gw.list_entities(&req).unwrap();
    assert_eq!(ids(&top), vec!["u1".to_string(), support::ETH_OID.to_string()]);
}

#[test]
fn projection_limits_returned_fields() {
    let (_, gw) = support::gateway();
    let req = ListRequest { projection: Some(vec!["name".into()]), ..ListRequest::new(Some(1), None, SearchSpec::text("berlin")) };
    let out = gw.list_entities(&req).unwrap();
    let e = out[0].as_entity().unwrap();
    assert_eq!(e.id.as_deref(), Some("u2"));
    assert_eq!(e.name.as_deref(), Some("TU Berlin"));
    assert_eq!(e.country, None);
    assert!(e.languages.is_empty());

    let bad = ListRequest { projection: Some(vec![]), ..ListRequest::default() };
    assert!(matches!(gw.list_entities(&bad), Err(GatewayError::MalformedSpecification(_))));
}

#[test]
fn embedded_reviews_are_normalised() {
    let (_, gw) = support::gateway();
    let out = gw.list_entities(&ListRequest::new(Some(1), None, SearchSpec::text("wien"))).unwrap();
    let reviews = out[0].as_entity().and_then(|e| e.reviews.clone()).unwrap();
    assert_eq!(reviews.len(), 2);
    assert_eq!(reviews[0].id.as_deref(), Some("r1"));
    assert_eq!(reviews[1].votes, Some(5));
}

#[test]
fn conditions_are_anded_and_sorted() {
    let (_, gw) = support::gateway();
    let search = SearchSpec::Conditions(vec![
        Condition::new("country", ConditionOp::Eq, serde_json::json!("Austria")),
        Condition::new("votes", ConditionOp::Gte, serde_json::json!(1)),
    ]);
    let out = gw.list_entities(&ListRequest::new(None, None, search)).unwrap();
    assert_eq!(names(&out), vec!["Universität Graz", "Universität Wien"]);

    let langs = SearchSpec::Conditions(vec![Condition::new("languages.name", ConditionOp::In, serde_json::json!(["English"]))]);
    let out = gw.list_entities(&ListRequest::new(Some(5), None, langs)).unwrap();
    assert_eq!(ids(&out), vec!["u1"]);
}

#[test]
fn conditions_outside_the_allowlist_are_rejected() {
    let (_, gw) = support::gateway();
    let search = SearchSpec::Conditions(vec![Condition::new("password", ConditionOp::Eq, serde_json::json!("x"))]);
    let err = gw.list_entities(&ListRequest::new(Some(5), None, search)).unwrap_err();
    assert!(matches!(err, GatewayError::MalformedSpecification(_)));
}

#[test]
fn pipelines_need_a_limit_and_honour_declared_sort() {
    let (_, gw) = support::gateway();
    let stages = r#"[{"$match": {"country": "Austria"}}]"#;
    let missing = gw.list_entities(&ListRequest::new(None, None, SearchSpec::Pipeline(stages.into()))).unwrap_err();
    assert!(matches!(missing, GatewayError::InvalidPagination(_)));

    let req = ListRequest { sort: Some("name".into()), ..ListRequest::new(Some(1), Some(0), SearchSpec::Pipeline(stages.into())) };
    let out = gw.list_entities(&req).unwrap();
    assert_eq!(names(&out), vec!["Universität Graz"]);

    let broken = gw.list_entities(&ListRequest::new(Some(1), None, SearchSpec::Pipeline("{not json".into())));
    assert!(matches!(broken, Err(GatewayError::MalformedSpecification(_))));
}

#[test]
fn pipelines_can_be_disabled() {
    let config = GatewayConfig { allow_raw_pipelines: false, ..GatewayConfig::default() };
    let gw = Gateway::with_store(support::seeded_store(), config).unwrap();
    let err = gw.list_entities(&ListRequest::new(Some(1), None, SearchSpec::Pipeline("[]".into()))).unwrap_err();
    assert!(matches!(err, GatewayError::MalformedSpecification(_)));
}

#[test]
fn invalid_bounds() {
    let (_, gw) = support::gateway();
    let neg_skip = gw.list_entities(&ListRequest::new(Some(1), Some(-1), SearchSpec::default()));
    assert!(matches!(neg_skip, Err(GatewayError::InvalidPagination(_))));
    let neg_first = gw.list_entities(&ListRequest::new(Some(-3), None, SearchSpec::default()));
    assert!(matches!(neg_first, Err(GatewayError::InvalidPagination(_))));
    assert!(gw.list_entities(&ListRequest::new(Some(0), None, SearchSpec::default())).unwrap().is_empty());
    assert!(gw.list_entities(&ListRequest::new(Some(5), Some(100), SearchSpec::default())).unwrap().is_empty());
}

#[test]
fn reviews_collection_only_listable_in_standalone_layout() {
    let store = support::seeded_store();
    let embedded = support::gateway_over(store.clone(), ReviewLayout::Embedded);
    let req = ListRequest { collection: Some("reviews".into()), ..ListRequest::default() };
    assert!(matches!(embedded.list_entities(&req), Err(GatewayError::MalformedSpecification(_))));

    let standalone = support::gateway_over(store, ReviewLayout::Standalone);
    let out = standalone.list_entities(&req).unwrap();
    assert!(out.iter().all(|r| matches!(r, ListedRecord::Review(_))));
    assert_eq!(out.len(), 2);
    let Some(ListedRecord::Review(s2)) = out.iter().find(|r| r.id() == Some("s2")) else {
        panic!("s2 missing from {out:?}");
    };
    assert_eq!(s2.workload, Some(3.0));
    assert_eq!(s2.languages, vec!["German"]);
    assert_eq!(s2.cost_of_rent, Some(620.0));
}

#[test]
fn unknown_collection_is_rejected() {
    let (_, gw) = support::gateway();
    let req = ListRequest { collection: Some("secrets".into()), ..ListRequest::default() };
    assert!(matches!(gw.list_entities(&req), Err(GatewayError::MalformedSpecification(_))));
}
