//! Autonomous motion for simulated participants

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, FRAC_PI_8, PI, TAU};

use rand::Rng;
use tokio::time::Instant;

use super::participant::SimulatedBody;

/// Side length of the square arena, centred at the origin
pub const ARENA_SIZE: f64 = 500.0;

/// Angular noise added on every wall bounce
const BOUNCE_NOISE: f64 = 0.2;

/// Seconds between scheduled turns
const TURN_INTERVAL_SECS: (f64, f64) = (1.0, 5.0);

/// Range of base speeds handed out at creation
pub const BASE_SPEED_RANGE: (f64, f64) = (40.0, 80.0);

/// Parameters the engine reads each step
#[derive(Debug, Clone, Copy)]
pub struct MotionParams {
    /// Chance of an unscheduled small turn per applied update
    pub turn_probability: f64,
    /// Half the arena side
    pub half_extent: f64,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            turn_probability: 0.01,
            half_extent: ARENA_SIZE / 2.0,
        }
    }
}

/// Motion step failure
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Invalid tick delta: {0}")]
    InvalidDelta(f64),

    #[error("Non-finite position for {id}")]
    NonFinite { id: String },
}

/// Random interval until the next scheduled turn
pub fn next_turn_delay<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(TURN_INTERVAL_SECS.0..=TURN_INTERVAL_SECS.1)
}

fn random_sign<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    if rng.gen_bool(0.5) {
        1.0
    } else {
        -1.0
    }
}

/// Advance one simulated participant by `dt` seconds.
///
/// Returns whether anything a client can see has changed: activation, a
/// heading change or a non-zero displacement.
pub fn advance<R: Rng + ?Sized>(
    body: &mut SimulatedBody,
    now: Instant,
    dt: f64,
    params: &MotionParams,
    rng: &mut R,
) -> Result<bool, SimulationError> {
    if !dt.is_finite() || dt < 0.0 {
        return Err(SimulationError::InvalidDelta(dt));
    }

    if !body.active {
        if now >= body.activation_time {
            body.active = true;
            return Ok(true);
        }
        return Ok(false);
    }

    body.active_elapsed += dt;
    // Throttled ticks are not lost: the next applied update covers them
    let step = match body.last_applied {
        Some(last) => {
            let since = now.saturating_duration_since(last);
            if since < body.update_interval {
                return Ok(false);
            }
            since.as_secs_f64()
        }
        None => dt,
    };
    body.last_applied = Some(now);

    let mut heading_changed = false;

    if body.active_elapsed >= body.next_turn_at {
        let turn = rng.gen_range(FRAC_PI_4..=FRAC_PI_2);
        body.heading = (body.heading + random_sign(rng) * turn).rem_euclid(TAU);
        body.next_turn_at = body.active_elapsed + next_turn_delay(rng);
        heading_changed = true;
    } else if rng.gen_bool(params.turn_probability.clamp(0.0, 1.0)) {
        let turn = rng.gen_range(FRAC_PI_8..=FRAC_PI_4);
        body.heading = (body.heading + random_sign(rng) * turn).rem_euclid(TAU);
        heading_changed = true;
    }

    let (old_x, old_z) = (body.x, body.z);
    body.x += body.heading.sin() * body.speed * step;
    body.z += body.heading.cos() * body.speed * step;

    let half = params.half_extent;
    if body.x.abs() > half {
        body.x = half.copysign(body.x);
        body.heading = PI - body.heading + rng.gen_range(-BOUNCE_NOISE..=BOUNCE_NOISE);
        heading_changed = true;
    }
    if body.z.abs() > half {
        body.z = half.copysign(body.z);
        body.heading = -body.heading + rng.gen_range(-BOUNCE_NOISE..=BOUNCE_NOISE);
        heading_changed = true;
    }
    body.heading = body.heading.rem_euclid(TAU);

    let moved = (body.x - old_x).hypot(body.z - old_z);
    Ok(moved > 0.0 || heading_changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::participant::tests::test_body;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::time::Duration;

    fn quiet_params() -> MotionParams {
        MotionParams {
            turn_probability: 0.0,
            ..Default::default()
        }
    }

    /// Shortest angular distance between two headings
    fn angle_between(a: f64, b: f64) -> f64 {
        let diff = (a - b).rem_euclid(TAU);
        diff.min(TAU - diff)
    }

    #[test]
    fn test_inactive_until_activation_time() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut body = test_body(false);
        let now = Instant::now();
        body.activation_time = now + Duration::from_secs(1);

        let changed = advance(&mut body, now, 0.1, &quiet_params(), &mut rng).unwrap();
        assert!(!changed);
        assert!(!body.active);

        let changed = advance(
            &mut body,
            now + Duration::from_secs(1),
            0.1,
            &quiet_params(),
            &mut rng,
        )
        .unwrap();
        assert!(changed);
        assert!(body.active);
        // Activation tick does no motion
        assert_eq!((body.x, body.z), (0.0, 0.0));
    }

    #[test]
    fn test_moves_along_heading() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut body = test_body(true);
        body.heading = FRAC_PI_2;

        let changed = advance(&mut body, Instant::now(), 0.1, &quiet_params(), &mut rng).unwrap();

        assert!(changed);
        assert!((body.x - 5.0).abs() < 1e-9);
        assert!(body.z.abs() < 1e-9);
    }

    #[test]
    fn test_throttle_skips_updates() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut body = test_body(true);
        let now = Instant::now();

        assert!(advance(&mut body, now, 0.05, &quiet_params(), &mut rng).unwrap());
        let (x, z) = (body.x, body.z);

        let later = now + Duration::from_millis(50);
        assert!(!advance(&mut body, later, 0.05, &quiet_params(), &mut rng).unwrap());
        assert_eq!((body.x, body.z), (x, z));

        let much_later = now + Duration::from_millis(100);
        assert!(advance(&mut body, much_later, 0.05, &quiet_params(), &mut rng).unwrap());
    }

    #[test]
    fn test_throttled_time_is_not_lost() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut body = test_body(true);
        body.heading = FRAC_PI_2;
        let now = Instant::now();

        advance(&mut body, now, 0.1, &quiet_params(), &mut rng).unwrap();
        assert!((body.x - 5.0).abs() < 1e-9);

        // A tick lands just short of the interval and is skipped
        let early = now + Duration::from_millis(95);
        assert!(!advance(&mut body, early, 0.095, &quiet_params(), &mut rng).unwrap());

        // The next one moves for the whole 190ms since the last update
        let next = now + Duration::from_millis(190);
        assert!(advance(&mut body, next, 0.095, &quiet_params(), &mut rng).unwrap());
        assert!((body.x - (5.0 + 50.0 * 0.19)).abs() < 1e-6);
    }

    #[test]
    fn test_x_boundary_clamps_and_reflects() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut body = test_body(true);
        body.x = 260.0;
        body.heading = 0.3;

        advance(&mut body, Instant::now(), 0.1, &quiet_params(), &mut rng).unwrap();

        assert_eq!(body.x, 250.0);
        let expected = (PI - 0.3).rem_euclid(TAU);
        assert!(angle_between(body.heading, expected) <= BOUNCE_NOISE + 1e-9);
        assert!((0.0..TAU).contains(&body.heading));
    }

    #[test]
    fn test_z_boundary_clamps_and_reflects() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut body = test_body(true);
        body.z = -255.0;
        body.heading = PI;

        advance(&mut body, Instant::now(), 0.1, &quiet_params(), &mut rng).unwrap();

        assert_eq!(body.z, -250.0);
        let expected = (-PI).rem_euclid(TAU);
        assert!(angle_between(body.heading, expected) <= BOUNCE_NOISE + 1e-9);
    }

    #[test]
    fn test_scheduled_turn() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let mut body = test_body(true);
        body.next_turn_at = 0.0;

        advance(&mut body, Instant::now(), 0.1, &quiet_params(), &mut rng).unwrap();

        let turned = angle_between(body.heading, 0.0);
        assert!(turned >= FRAC_PI_4 - 1e-9 && turned <= FRAC_PI_2 + 1e-9);
        assert!(body.next_turn_at >= 0.1 + 1.0 && body.next_turn_at <= 0.1 + 5.0);
    }

    #[test]
    fn test_random_turn_when_probability_is_one() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut body = test_body(true);
        let params = MotionParams {
            turn_probability: 1.0,
            ..Default::default()
        };

        advance(&mut body, Instant::now(), 0.0, &params, &mut rng).unwrap();

        let turned = angle_between(body.heading, 0.0);
        assert!(turned >= FRAC_PI_8 - 1e-9 && turned <= FRAC_PI_4 + 1e-9);
    }

    #[test]
    fn test_rejects_negative_delta() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let mut body = test_body(true);
        let result = advance(&mut body, Instant::now(), -1.0, &quiet_params(), &mut rng);
        assert!(matches!(result, Err(SimulationError::InvalidDelta(_))));
    }
}
