#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(filter) = unirank::query::parse_filter_json(s) {
            let docs = [
                bson::doc! { "_id": "u1", "name": "Uni Wien", "country": "Austria", "review_count": 3 },
                bson::doc! { "_id": "u2", "reviews": [{ "_id": "r1", "votes": 2 }], "nested": { "z": 3 } },
                bson::doc! { "languages": [{ "name": "German", "count": 4 }] },
            ];
            for d in &docs {
                let _ = unirank::query::eval_filter(d, &filter);
            }
        }
    }
});
