use super::*;

fn idle_state() -> (KinematicState, Animation) {
    (KinematicState::default(), Animation::default())
}

#[test]
fn yaw_normalizes_into_half_open_range() {
    assert_eq!(normalize_yaw(0.0), 0.0);
    assert_eq!(normalize_yaw(180.0), 180.0);
    assert_eq!(normalize_yaw(-180.0), 180.0);
    assert_eq!(normalize_yaw(190.0), -170.0);
    assert_eq!(normalize_yaw(-190.0), 170.0);
    assert_eq!(normalize_yaw(540.0), 180.0);
    for deg in [-720.5, -361.0, -180.0, -0.1, 0.0, 179.9, 180.0, 359.0, 1234.5] {
        let n = normalize_yaw(deg);
        assert!(n > -180.0 && n <= 180.0, "{deg} normalized to {n}");
    }
}

#[test]
fn shortest_yaw_diff_never_exceeds_half_turn() {
    assert_eq!(shortest_yaw_diff(-340.0), 20.0);
    assert_eq!(shortest_yaw_diff(340.0), -20.0);
    assert_eq!(shortest_yaw_diff(180.0), 180.0);
    for diff in [-1000.0, -350.0, -181.0, -90.0, 0.0, 90.0, 181.0, 350.0, 1000.0] {
        let d = shortest_yaw_diff(diff);
        assert!(d.abs() <= 180.0, "{diff} shortened to {d}");
    }
}

#[test]
fn speed_driven_motion_integrates_and_clamps() {
    let (mut state, mut animation) = idle_state();
    state.speed = Angles::new(100.0, 100.0, 100.0);
    for _ in 0..40 {
        tick(&mut state, &mut animation, 1.0, TICK_SECONDS);
        assert!(state.position.pitch >= -PITCH_LIMIT_DEG && state.position.pitch <= PITCH_LIMIT_DEG);
        assert!(state.position.roll >= -ROLL_LIMIT_DEG && state.position.roll <= ROLL_LIMIT_DEG);
        assert!(state.position.yaw > -180.0 && state.position.yaw <= 180.0);
    }
    // 40 ticks at 100 deg/s is 200 deg of travel; pitch and roll pin at the
    // mechanical envelope while yaw keeps wrapping.
    assert_eq!(state.position.pitch, PITCH_LIMIT_DEG);
    assert_eq!(state.position.roll, ROLL_LIMIT_DEG);
}

#[test]
fn speed_boost_doubles_integration() {
    let (mut state, mut animation) = idle_state();
    state.speed = Angles::new(10.0, 0.0, 0.0);
    state.speed_boost = true;
    tick(&mut state, &mut animation, 1.0, TICK_SECONDS);
    assert!((state.position.pitch - 10.0 * TICK_SECONDS * SPEED_BOOST_FACTOR).abs() < 1e-12);
}

#[test]
fn homing_takes_the_short_yaw_path_and_converges_in_seven_ticks() {
    let mut state = KinematicState::default();
    state.position.yaw = 170.0;
    let mut animation = Animation::start(Angles::new(0.0, 0.0, -170.0));

    let rate = BASE_HOMING_SPEED_DEG_S * 1.0 * TICK_SECONDS;
    let mut previous = state.position.yaw;
    for _ in 0..7 {
        tick(&mut state, &mut animation, 1.0, TICK_SECONDS);
        let step = shortest_yaw_diff(state.position.yaw - previous);
        assert!(
            step.abs() <= rate + 1e-9,
            "single-tick yaw jump {step} exceeds the per-tick rate {rate}"
        );
        // The short path from 170 to -170 rotates positively through 180.
        assert!(step >= 0.0, "interpolation went the long way around");
        previous = state.position.yaw;
    }

    assert!(shortest_yaw_diff(state.position.yaw - (-170.0)).abs() <= ARRIVAL_TOLERANCE_DEG);
    assert!(animation.active, "clears on the tick after arrival");
    tick(&mut state, &mut animation, 1.0, TICK_SECONDS);
    assert!(!animation.active);
    assert!(state.position.yaw > -180.0 && state.position.yaw <= 180.0);
}

#[test]
fn multiplier_is_read_fresh_each_tick() {
    let mut state = KinematicState::default();
    let mut animation = Animation::start(Angles::new(30.0, 0.0, 0.0));

    tick(&mut state, &mut animation, 1.0, TICK_SECONDS);
    assert!((state.position.pitch - 3.0).abs() < 1e-12);

    // Doubling the multiplier mid-flight doubles the very next step.
    tick(&mut state, &mut animation, 2.0, TICK_SECONDS);
    assert!((state.position.pitch - 9.0).abs() < 1e-12);
}

#[test]
fn animating_overrides_speed_driven_motion() {
    let mut state = KinematicState::default();
    state.speed = Angles::new(100.0, 0.0, 0.0);
    let mut animation = Animation::start(Angles::ZERO);
    assert_eq!(phase(&state, &animation), MotionPhase::Animating);

    tick(&mut state, &mut animation, 1.0, TICK_SECONDS);
    // Position stays at the (already reached) target; commanded speed is not
    // integrated while the animation is in flight.
    assert_eq!(state.position, Angles::ZERO);
    assert!(!animation.active);

    tick(&mut state, &mut animation, 1.0, TICK_SECONDS);
    assert_eq!(phase(&state, &animation), MotionPhase::SpeedDriven);
    assert!(state.position.pitch > 0.0);

    state.speed = Angles::ZERO;
    assert_eq!(phase(&state, &animation), MotionPhase::Idle);
}

#[test]
fn non_yaw_axes_snap_exactly_to_target() {
    let mut state = KinematicState::default();
    state.position = Angles::new(2.0, -1.0, 0.0);
    let mut animation = Animation::start(Angles::ZERO);
    for _ in 0..2 {
        tick(&mut state, &mut animation, 1.0, TICK_SECONDS);
    }
    assert_eq!(state.position.pitch, 0.0);
    assert_eq!(state.position.roll, 0.0);
}
