#![no_main]
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    if data.len() > 16384 { return; }
    let store = unirank::MemoryStore::new();
    let _ = store.load_ndjson("fuzz", Cursor::new(data));
});
