//! Sole writer of the acceleration cell (§4.3). Synthesizes a stylized
//! thrust signal from the current motor PWMs plus Gaussian noise.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::error;
use rand::Rng;

use crate::state::{ActorId, Accel, SharedRecord};

const TICK: Duration = Duration::from_millis(10);
const THRUST_PER_MOTOR: f32 = 9.81 * 2.0;

/// Two independent uniform `(0, 1]` draws turned into one standard-normal
/// sample via Box–Muller, matching the reference's hand-rolled
/// `gauss_noise` rather than a packaged distribution (§4.3, §9).
fn gauss_noise<R: Rng>(rng: &mut R, std_dev: f32) -> f32 {
    let u1: f32 = 1.0 - rng.gen::<f32>(); // excludes 0 so ln() stays finite
    let u2: f32 = rng.gen::<f32>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    z0 * std_dev
}

pub fn run(record: &SharedRecord, shutdown: Arc<AtomicBool>) {
    let mut rng = rand::thread_rng();

    while !shutdown.load(Ordering::Relaxed) {
        let motors = match record.pwm.lock() {
            Ok(guard) => guard.motors,
            Err(e) => {
                error!(target: "accelerometer", "pwm mutex lock failed, exiting: {e}");
                return;
            }
        };
        let [m0, m1, m2, m3] = motors;

        let z = (m0 + m1 + m2 + m3) * THRUST_PER_MOTOR - 9.81 + gauss_noise(&mut rng, 0.05);
        let x = (m1 + m3 - m0 - m2) * THRUST_PER_MOTOR * 0.2 + gauss_noise(&mut rng, 0.02);
        let y = (m2 + m3 - m0 - m1) * THRUST_PER_MOTOR * 0.2 + gauss_noise(&mut rng, 0.02);

        match record.accel.lock() {
            Ok(mut guard) => *guard = Accel { x, y, z },
            Err(e) => {
                error!(target: "accelerometer", "accel mutex lock failed, exiting: {e}");
                return;
            }
        }

        record.heartbeats.tick(ActorId::Accelerometer);
        std::thread::sleep(TICK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauss_noise_is_bounded_in_practice() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let n = gauss_noise(&mut rng, 0.05);
            assert!(n.abs() < 1.0, "noise sample {n} implausibly large for std_dev 0.05");
        }
    }

    #[test]
    fn zero_pwm_yields_gravity_compensated_z_near_negative_g() {
        // With all motors at 0, z = -9.81 + small noise.
        let mut rng = rand::thread_rng();
        let z: f32 = -9.81 + gauss_noise(&mut rng, 0.05);
        assert!(z < -9.0 && z > -10.5);
    }
}
