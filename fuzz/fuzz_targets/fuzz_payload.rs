#![no_main]
use challenge_core::payload::{RemoteEvent, ValidatedEvent};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else { return };

    // Arbitrary JSON must never panic, and anything accepted must carry a key
    if let Ok(event) = RemoteEvent::parse(text) {
        assert!(!event.key().is_empty());
        if let ValidatedEvent::IdSet { owner, ids, .. } = &event {
            assert!(!owner.is_empty());
            assert!(ids.iter().all(|id| !id.is_empty()));
        }
    }
});
