#![allow(dead_code)]

use bson::oid::ObjectId;
use bson::{Document, doc};
use std::path::Path;
use std::sync::Arc;
use unirank::schema::ReviewLayout;
use unirank::{Gateway, GatewayConfig, MemoryStore};

pub const ETH_OID: &str = "65a1b2c3d4e5f60718293a4b";

pub fn universities() -> Vec<Document> {
    let eth = ObjectId::parse_str(ETH_OID).unwrap();
    vec![
        doc! {
            "_id": "u1", "name": "Universität Wien", "country": "Austria", "city": "Vienna",
            "review_count": 3_i64, "votes": 10_i64,
            "languages": [{ "name": "German", "count": 4 }, { "name": "English", "count": 2 }],
            "area_of_study": [{ "name": "Law", "count": 2 }],
            "reviews": [
                { "_id": "r1", "votes": 2_i64, "platform": "web", "area_of_study": "Law" },
                { "_id": "r2", "votes": 5_i64, "platform": "app", "area_of_study": "History" },
            ],
        },
        doc! {
            "_id": "u2", "name": "TU Berlin", "country": "Germany", "city": "Berlin",
            "review_count": 5_i64, "votes": 4_i64,
            "languages": [{ "name": "German", "count": 6 }],
            "area_of_study": [{ "name": "Engineering", "count": 3 }],
        },
        doc! {
            "_id": "u3", "name": "Universität Graz", "country": "Austria", "city": "Graz",
            "review_count": 0_i64, "votes": 1_i64,
            "languages": [{ "name": "German", "count": 1 }],
        },
        doc! { "_id": eth, "name": "ETH Zürich", "country": "Switzerland", "city": "Zurich", "votes": 7_i64 },
    ]
}

pub fn cities() -> Vec<Document> {
    vec![
        doc! { "_id": "c1", "name": "Vienna", "country": "Austria", "experience_rating": { "value": 4.5, "count": 10 } },
        doc! { "_id": "c2", "name": "Berlin", "country": "Germany", "experience_rating": { "value": 4.8, "count": 3 } },
        doc! { "_id": "c3", "name": "Graz", "country": "Austria", "experience_rating": { "value": 3.9, "count": 2 } },
    ]
}

pub fn standalone_reviews() -> Vec<Document> {
    vec![
        doc! { "_id": "s1", "university_id": "u1", "votes": 1_i64, "platform": "web" },
        doc! {
            "_id": "s2", "university_id": "u2", "votes": 3_i64, "platform": "app",
            "workload": 3, "languages": ["German"], "cost_of_rent": "620",
        },
    ]
}

pub fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed("universities", universities()).unwrap();
    store.seed("cities", cities()).unwrap();
    store.seed("reviews", standalone_reviews()).unwrap();
    store
}

pub fn gateway_over(store: Arc<MemoryStore>, layout: ReviewLayout) -> Gateway {
    let config = GatewayConfig { review_layout: layout, ..GatewayConfig::default() };
    Gateway::with_store(store, config).unwrap()
}

pub fn gateway() -> (Arc<MemoryStore>, Gateway) {
    let store = seeded_store();
    let gw = gateway_over(store.clone(), ReviewLayout::Embedded);
    (store, gw)
}

/// Write `docs` as `dir/<collection>.ndjson` in relaxed extended JSON.
pub fn write_ndjson(dir: &Path, collection: &str, docs: &[Document]) {
    let lines: Vec<String> = docs
        .iter()
        .map(|d| bson::Bson::Document(d.clone()).into_relaxed_extjson().to_string())
        .collect();
    std::fs::write(dir.join(format!("{collection}.ndjson")), lines.join("\n")).unwrap();
}
