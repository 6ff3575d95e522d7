#![no_main]
use challenge_core::rank::{classify, floor_days, DEFAULT_RANK_TABLE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (f64, f64)| {
    let (a, b) = input;

    // Total: every input maps to a tier without panicking
    let tier_a = classify(a);
    let tier_b = classify(b);

    // The chosen tier always contains the floored day count
    assert!(tier_a.contains(floor_days(a)));

    // Monotonic: more days never means a lower tier
    if !a.is_nan() && !b.is_nan() && a <= b {
        let ia = DEFAULT_RANK_TABLE.index_of(a);
        let ib = DEFAULT_RANK_TABLE.index_of(b);
        assert!(ia <= ib, "tier regressed: {} -> {}", tier_a.title, tier_b.title);
    }
});
