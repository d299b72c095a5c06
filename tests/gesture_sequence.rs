use std::time::{Duration, Instant};

use sos_sentinel::classify::fixtures::{fist_over_thumb, open_palm, relaxed, thumb_tucked};
use sos_sentinel::{
    Decision, GestureConfig, GestureState, GestureStateMachine, LandmarkSnapshot, ResetCause,
    ThumbCheck,
};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Drives open -> tucked -> fist -> tucked with the final tucked frame
/// arriving `cycle` after the first one.
fn run_sequence(m: &mut GestureStateMachine, t0: Instant, cycle: Duration) -> Decision {
    assert_eq!(m.observe(&open_palm(), t0), Decision::Pending);
    assert_eq!(m.state(), GestureState::Phase1Open);

    let start = t0 + ms(100);
    assert_eq!(m.observe(&thumb_tucked(), start), Decision::Pending);
    assert_eq!(m.state(), GestureState::Phase2ThumbFold);

    assert_eq!(m.observe(&fist_over_thumb(), start + ms(800)), Decision::Pending);
    assert_eq!(m.state(), GestureState::Phase3AllFold);

    m.observe(&thumb_tucked(), start + cycle)
}

#[test]
fn sequence_within_window_is_confirmed() {
    let mut m = GestureStateMachine::default();
    let decision = run_sequence(&mut m, Instant::now(), ms(2900));
    assert_eq!(decision, Decision::Confirmed { elapsed: ms(2900) });
    assert_eq!(m.state(), GestureState::Idle);
    assert!(m.cycle_start().is_none());
    assert!(m.cycle_end().is_none());
}

#[test]
fn sequence_over_window_is_reset() {
    let mut m = GestureStateMachine::default();
    let decision = run_sequence(&mut m, Instant::now(), ms(3100));
    assert!(matches!(decision, Decision::Reset(_)), "{decision:?}");
    assert_eq!(m.state(), GestureState::Idle);
    assert!(m.cycle_start().is_none());
}

#[test]
fn exactly_at_window_is_not_confirmed() {
    // Stale only past the window; confirmation needs strictly less than it.
    let mut m = GestureStateMachine::default();
    let decision = run_sequence(&mut m, Instant::now(), ms(3000));
    assert_eq!(
        decision,
        Decision::Reset(ResetCause::TooSlow { elapsed: ms(3000) })
    );
}

#[test]
fn watchdog_expires_phase1_without_phase2() {
    let mut m = GestureStateMachine::default();
    let t0 = Instant::now();
    m.observe(&open_palm(), t0);

    assert_eq!(m.observe(&relaxed(), t0 + ms(2900)), Decision::Pending);
    assert_eq!(m.state(), GestureState::Phase1Open);

    let decision = m.observe(&relaxed(), t0 + ms(3100));
    assert_eq!(
        decision,
        Decision::Reset(ResetCause::Stale {
            phase: GestureState::Phase1Open
        })
    );
    assert_eq!(m.state(), GestureState::Idle);
}

#[test]
fn watchdog_fires_without_a_hand_in_view() {
    let mut m = GestureStateMachine::default();
    let t0 = Instant::now();
    m.observe(&open_palm(), t0);
    m.observe(&thumb_tucked(), t0 + ms(100));

    assert_eq!(m.tick(t0 + ms(2000)), Decision::Pending);
    assert_eq!(m.state(), GestureState::Phase2ThumbFold);
    assert!(matches!(
        m.tick(t0 + ms(3200)),
        Decision::Reset(ResetCause::Stale {
            phase: GestureState::Phase2ThumbFold
        })
    ));
    assert_eq!(m.state(), GestureState::Idle);
}

#[test]
fn watchdog_runs_before_the_transition_table() {
    // A tucked thumb would complete the sequence, but the cycle is already stale.
    let mut m = GestureStateMachine::default();
    let t0 = Instant::now();
    m.observe(&open_palm(), t0);
    m.observe(&thumb_tucked(), t0);
    m.observe(&fist_over_thumb(), t0 + ms(500));
    let decision = m.observe(&thumb_tucked(), t0 + ms(3100));
    assert_eq!(
        decision,
        Decision::Reset(ResetCause::Stale {
            phase: GestureState::Phase3AllFold
        })
    );
}

#[test]
fn never_advances_more_than_one_phase_per_call() {
    let shapes: [fn() -> LandmarkSnapshot; 4] = [open_palm, thumb_tucked, fist_over_thumb, relaxed];
    let mut m = GestureStateMachine::default();
    let t0 = Instant::now();
    // Deterministic pseudo-random walk over the shapes, all at one instant so
    // only the table can move the machine.
    let mut seed: u32 = 0x2545_f491;
    for _ in 0..500 {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        let before = m.state();
        let decision = m.observe(&shapes[(seed % 4) as usize](), t0);
        let after = m.state();
        match decision {
            Decision::Confirmed { .. } | Decision::Reset(_) => {
                assert_eq!(before, GestureState::Phase3AllFold);
                assert_eq!(after, GestureState::Idle);
            }
            Decision::Pending => {
                let step = phase_index(after) as i32 - phase_index(before) as i32;
                assert!(step == 0 || step == 1, "{before:?} -> {after:?}");
            }
        }
    }
}

#[test]
fn open_palm_repeated_stays_in_phase1() {
    let mut m = GestureStateMachine::default();
    let t0 = Instant::now();
    for i in 0..10 {
        m.observe(&open_palm(), t0 + ms(i * 10));
    }
    assert_eq!(m.state(), GestureState::Phase1Open);
}

#[test]
fn extended_thumb_check_rejects_hooked_thumb_for_phase1() {
    use sos_sentinel::landmarks::{Landmark, THUMB_MCP};

    let hooked = open_palm().with_point(THUMB_MCP, Landmark::new(0.30, 0.40, 0.0));
    let mut lenient = GestureStateMachine::default();
    let mut strict = GestureStateMachine::new(GestureConfig {
        thumb_check: ThumbCheck::Extended,
        ..GestureConfig::default()
    });
    let t0 = Instant::now();
    lenient.observe(&hooked, t0);
    strict.observe(&hooked, t0);
    assert_eq!(lenient.state(), GestureState::Phase1Open);
    assert_eq!(strict.state(), GestureState::Idle);
}

#[test]
fn shorter_window_is_honoured() {
    let mut m = GestureStateMachine::new(GestureConfig {
        confirm_window: ms(1500),
        ..GestureConfig::default()
    });
    let decision = run_sequence(&mut m, Instant::now(), ms(1400));
    assert!(decision.is_confirmed());
}

fn phase_index(state: GestureState) -> u8 {
    match state {
        GestureState::Idle => 0,
        GestureState::Phase1Open => 1,
        GestureState::Phase2ThumbFold => 2,
        GestureState::Phase3AllFold => 3,
        GestureState::Phase4ThumbFoldConfirm => 4,
    }
}
