#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    let Ok(s) = std::str::from_utf8(data) else { return };
    let Ok(stages) = unirank::gateway::filter::parse_stages(s) else { return };
    let docs = vec![
        bson::doc! { "_id": "u1", "name": "Uni Wien", "country": "Austria", "review_count": 3 },
        bson::doc! { "_id": "u2", "name": "TU Berlin", "country": "Germany", "review_count": 5, "tags": ["a", "b"] },
        bson::doc! { "_id": "u3", "review_count": 0.5 },
    ];
    let _ = unirank::query::run_pipeline("fuzz", docs, &stages);
});
