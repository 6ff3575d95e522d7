#![no_main]
use arbitrary::Arbitrary;
use challenge_core::challenge::ChallengeStatus;
use challenge_core::rank::{aggregate, ChallengeRecord, RankTable};
use chrono::{DateTime, TimeZone, Utc};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct RecordInput {
    user: u8,
    status: u8,
    started_at: Option<u32>,
    ended_at: Option<u32>,
}

#[derive(Arbitrary, Debug)]
struct LeaderboardInput {
    records: Vec<RecordInput>,
    now: u32,
}

fn ts(secs: u32) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs as i64, 0).single()
}

fuzz_target!(|input: LeaderboardInput| {
    if input.records.len() > 256 {
        return;
    }

    let records: Vec<ChallengeRecord> = input
        .records
        .iter()
        .map(|r| ChallengeRecord {
            user_id: format!("u{}", r.user % 16),
            status: match r.status % 4 {
                0 => ChallengeStatus::Active,
                1 => ChallengeStatus::PendingPayment,
                2 => ChallengeStatus::Completed,
                _ => ChallengeStatus::Failed,
            },
            started_at: r.started_at.and_then(ts),
            ended_at: r.ended_at.and_then(ts),
        })
        .collect();

    let Some(now) = ts(input.now) else { return };
    let board = aggregate(&records, now, &RankTable::default());

    for (i, entry) in board.entries().iter().enumerate() {
        assert_eq!(entry.rank, i + 1);
        assert!(entry.challenge_count > 0);
        assert!((0.0..=100.0).contains(&entry.success_rate));
        assert!(entry.average_time >= 0.0);
    }
    for pair in board.entries().windows(2) {
        assert!(pair[0].average_time >= pair[1].average_time);
    }
});
