//! Stage controller.
//!
//! Owns one open link, the gear ratios and the logical position. Every
//! operation encodes one [`Command`], writes it, reads the single reply line
//! and reports the firmware status. Commands are fire-and-forget with respect
//! to physical motion: a reply only acknowledges reception.
//!
//! ## Example
//!
//! ```rust,no_run
//! use oquam::{GearRatio, NativePort, SerialConfig, StageController};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyACM0", 115200))?;
//!     let mut stage = StageController::new(port, GearRatio::new(1, 100, 1)?);
//!
//!     stage.enable(true)?;
//!     stage.move_axis_y(5, None)?;
//!     println!("{}", stage.position());
//!
//!     stage.close()?;
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{Axis, Command, HomingOrder, Identification, Reply};
use crate::stage::{GearRatio, PositionPolicy, StagePosition};
use log::{debug, trace};
use std::time::Duration;

/// Shortest duration sent with an automatically timed axis move.
pub const MIN_MOVE_DURATION: i64 = 10;

/// Default timeout for the identify exchange.
pub const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(1);

/// Duration used when the caller does not give one: the motor-step distance,
/// never less than [`MIN_MOVE_DURATION`].
pub fn auto_duration(motor_steps: i64) -> i64 {
    motor_steps
        .saturating_abs()
        .max(MIN_MOVE_DURATION)
}

/// Controller for one stage, bound to one serial link.
pub struct StageController<P: Port> {
    port: Option<P>,
    name: String,
    gears: GearRatio,
    position: StagePosition,
    policy: PositionPolicy,
}

impl<P: Port> StageController<P> {
    /// Create a controller on an already opened port, at position (0, 0, 0).
    pub fn new(port: P, gears: GearRatio) -> Self {
        let name = port.name().to_string();
        Self {
            port: Some(port),
            name,
            gears,
            position: StagePosition::default(),
            policy: PositionPolicy::default(),
        }
    }

    /// Choose when relative axis moves are added to the position.
    #[must_use]
    pub fn with_position_policy(mut self, policy: PositionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Gear ratios.
    pub fn gears(&self) -> GearRatio {
        self.gears
    }

    /// Logical position in stage steps.
    pub fn position(&self) -> StagePosition {
        self.position
    }

    /// Name of the port the controller is bound to.
    pub fn port_name(&self) -> &str {
        &self.name
    }

    /// Whether [`close`](Self::close) has released the link.
    pub fn is_closed(&self) -> bool {
        self.port.is_none()
    }

    fn port_mut(&mut self) -> Result<&mut P> {
        self.port.as_mut().ok_or(Error::LinkClosed)
    }

    fn transmit(&mut self, command: &Command) -> Result<()> {
        let port = self.port_mut()?;
        port.clear_buffers()?;
        port.write_line(&command.encode())
    }

    fn receive(&mut self, command: &Command) -> Result<Reply> {
        let line = self.port_mut()?.read_line()?;
        Reply::parse_for(command, &line)?.into_result()
    }

    /// Send a command and return its successful reply.
    pub fn send(&mut self, command: &Command) -> Result<Reply> {
        self.transmit(command)?;
        self.receive(command)
    }

    /// Enable (`true`) or disable (`false`) the motors.
    pub fn enable(&mut self, flag: bool) -> Result<()> {
        debug!("{} motors", if flag { "Enabling" } else { "Disabling" });
        self.send(&Command::Enable(flag))?;
        Ok(())
    }

    /// Absolute move in motor steps. The logical position is not touched.
    pub fn move_to(&mut self, t: i64, x: i64, y: i64, z: i64) -> Result<()> {
        self.send(&Command::MoveTo { t, x, y, z })?;
        Ok(())
    }

    /// Relative move in motor steps. The logical position is not touched.
    pub fn move_relative(&mut self, dt: i64, dx: i64, dy: i64, dz: i64) -> Result<()> {
        self.send(&Command::Move { dt, dx, dy, dz })?;
        Ok(())
    }

    /// Move one axis by `delta` stage steps.
    ///
    /// The displacement is converted to motor steps with the axis gear ratio.
    /// Without `dt` the duration is derived with [`auto_duration`]; an
    /// explicit `dt` is sent as its absolute value.
    pub fn move_axis(&mut self, axis: Axis, delta: i64, dt: Option<i64>) -> Result<()> {
        let motor = delta
            .checked_mul(i64::from(self.gears.get(axis)))
            .ok_or_else(|| Error::InvalidArgument(format!("{axis} displacement {delta} overflows")))?;
        let dt = match dt {
            Some(dt) => dt.checked_abs(),
            None => motor.checked_abs().map(|_| auto_duration(motor)),
        }
        .ok_or_else(|| Error::InvalidArgument("move duration overflows".into()))?;
        let target = self
            .position
            .get(axis)
            .checked_add(delta)
            .ok_or_else(|| Error::InvalidArgument(format!("{axis} position overflows")))?;

        let mut deltas = [0i64; 3];
        deltas[axis.index()] = motor;
        let command = Command::Move {
            dt,
            dx: deltas[0],
            dy: deltas[1],
            dz: deltas[2],
        };

        // Nothing is recorded if the frame could not be written.
        self.transmit(&command)?;
        let outcome = self.receive(&command);

        if self.policy.records(outcome.is_ok()) {
            *self.position.get_mut(axis) = target;
            trace!("{axis} moved by {delta} stage steps ({motor} motor steps)");
        }

        outcome.map(drop)
    }

    /// Move the X axis by `dx` stage steps.
    pub fn move_axis_x(&mut self, dx: i64, dt: Option<i64>) -> Result<()> {
        self.move_axis(Axis::X, dx, dt)
    }

    /// Move the Y axis by `dy` stage steps.
    pub fn move_axis_y(&mut self, dy: i64, dt: Option<i64>) -> Result<()> {
        self.move_axis(Axis::Y, dy, dt)
    }

    /// Move the Z axis by `dz` stage steps.
    pub fn move_axis_z(&mut self, dz: i64, dt: Option<i64>) -> Result<()> {
        self.move_axis(Axis::Z, dz, dt)
    }

    /// Pause after the ongoing move.
    pub fn pause(&mut self) -> Result<()> {
        self.send(&Command::Pause)?;
        Ok(())
    }

    /// Continue after a pause.
    pub fn resume(&mut self) -> Result<()> {
        self.send(&Command::Continue)?;
        Ok(())
    }

    /// Configure the order in which [`home`](Self::home) visits the axes.
    pub fn set_homing_order(&mut self, order: HomingOrder) -> Result<()> {
        self.send(&Command::SetHoming(order))?;
        Ok(())
    }

    /// Start homing.
    ///
    /// Returns once the firmware acknowledges the request, not when the axes
    /// have reached their home switches.
    pub fn home(&mut self) -> Result<()> {
        debug!("Homing started on {}", self.name);
        self.send(&Command::Homing)?;
        Ok(())
    }

    /// Idle query; returns the liveness flag at reply index 1.
    pub fn ping(&mut self) -> Result<bool> {
        let reply = self.send(&Command::Idle)?;
        Ok(reply.int_at(1)? != 0)
    }

    /// Identify exchange with a bounded read timeout.
    ///
    /// Input already pending (a boot banner, the tail of an earlier reply)
    /// is discarded first. The previous timeout is restored whatever the
    /// outcome.
    pub fn identify(&mut self, timeout: Duration) -> Result<Identification> {
        let port = self.port_mut()?;
        let previous = port.timeout();
        port.set_timeout(timeout)?;

        let exchange = port
            .clear_buffers()
            .and_then(|()| exchange_line(port, &Command::Identify.encode()));
        let restored = port.set_timeout(previous);

        let line = exchange?;
        restored?;
        Identification::parse(&line)
    }

    /// Release the link. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        match self.port.take() {
            Some(mut port) => {
                debug!("Closing link on {}", self.name);
                port.close()
            },
            None => Ok(()),
        }
    }
}

impl<P: Port> Drop for StageController<P> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn exchange_line<P: Port>(port: &mut P, frame: &str) -> Result<String> {
    port.write_line(frame)?;
    port.read_line()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;

    fn stage(port: MockPort) -> StageController<MockPort> {
        StageController::new(port, GearRatio::new(2, 3, 4).unwrap())
    }

    #[test]
    fn test_move_axis_x_uses_gear_and_updates_x() {
        let port = MockPort::new("/dev/ttyFAKE").with_reply("#M[0]");
        let log = port.log();
        let mut stage = stage(port);

        stage.move_axis_x(10, None).unwrap();

        assert_eq!(log.last_frame().as_deref(), Some("M[20,20,0,0]"));
        assert_eq!(stage.position().x, 10);
    }

    #[test]
    fn test_move_axis_y_uses_gear_and_updates_y() {
        let port = MockPort::new("/dev/ttyFAKE").with_reply("#M[0]");
        let log = port.log();
        let mut stage = stage(port);

        stage.move_axis_y(5, None).unwrap();

        assert_eq!(log.last_frame().as_deref(), Some("M[15,0,15,0]"));
        assert_eq!(stage.position().y, 5);
    }

    #[test]
    fn test_move_axis_z_uses_gear_and_updates_z() {
        let port = MockPort::new("/dev/ttyFAKE").with_reply("#M[0]");
        let log = port.log();
        let mut stage = stage(port);

        stage.move_axis_z(-3, None).unwrap();

        assert_eq!(log.last_frame().as_deref(), Some("M[12,0,0,-12]"));
        assert_eq!(stage.position().z, -3);
        assert_eq!(stage.position().x, 0);
    }

    #[test]
    fn test_auto_duration_floor() {
        assert_eq!(auto_duration(0), 10);
        assert_eq!(auto_duration(-4), 10);
        assert_eq!(auto_duration(10), 10);
        assert_eq!(auto_duration(-250), 250);

        let port = MockPort::new("/dev/ttyFAKE").with_reply("#M[0]");
        let log = port.log();
        let mut stage = stage(port);
        stage.move_axis_x(1, None).unwrap();
        assert_eq!(log.last_frame().as_deref(), Some("M[10,2,0,0]"));
    }

    #[test]
    fn test_explicit_duration_is_absolute() {
        let port = MockPort::new("/dev/ttyFAKE")
            .with_reply("#M[0]")
            .with_reply("#M[0]");
        let log = port.log();
        let mut stage = stage(port);

        stage.move_axis_y(2, Some(-500)).unwrap();
        stage.move_axis_y(2, Some(3)).unwrap();

        assert_eq!(
            log.frames(),
            vec!["M[500,0,6,0]".to_string(), "M[3,0,6,0]".to_string()]
        );
        assert_eq!(stage.position().y, 4);
    }

    #[test]
    fn test_moves_accumulate() {
        let port = MockPort::new("/dev/ttyFAKE")
            .with_reply("#M[0]")
            .with_reply("#M[0]")
            .with_reply("#M[0]");
        let mut stage = stage(port);

        stage.move_axis_x(10, None).unwrap();
        stage.move_axis_x(-4, None).unwrap();
        stage.move_axis_z(7, None).unwrap();

        assert_eq!(
            stage.position(),
            StagePosition { x: 6, y: 0, z: 7 }
        );
    }

    #[test]
    fn test_write_failure_leaves_position_unchanged() {
        let port = MockPort::new("/dev/ttyFAKE").failing_writes();
        let mut stage = stage(port);

        let err = stage.move_axis_x(10, None).unwrap_err();
        assert!(err.is_transport());
        assert_eq!(stage.position(), StagePosition::default());
    }

    #[test]
    fn test_device_error_still_updates_position_on_send() {
        let port = MockPort::new("/dev/ttyFAKE").with_reply("#M[3]");
        let mut stage = stage(port);

        let err = stage.move_axis_y(5, None).unwrap_err();
        assert!(matches!(err, Error::Device { code: 3, .. }));
        assert_eq!(stage.position().y, 5);
    }

    #[test]
    fn test_reply_timeout_still_updates_position_on_send() {
        let port = MockPort::new("/dev/ttyFAKE").with_timeout_reply();
        let log = port.log();
        let mut stage = stage(port);

        let err = stage.move_axis_x(3, None).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(log.frames(), vec!["M[10,6,0,0]"]);
        assert_eq!(stage.position().x, 3);
    }

    #[test]
    fn test_stale_tail_is_discarded_before_next_command() {
        let port = MockPort::new("/dev/ttyFAKE")
            .with_stale_input(",1]\n")
            .with_reply("#E[0]");
        let log = port.log();
        let mut stage = stage(port);

        stage.enable(true).unwrap();
        assert_eq!(log.clears(), 1);
    }

    #[test]
    fn test_device_error_with_confirmed_policy() {
        let port = MockPort::new("/dev/ttyFAKE")
            .with_reply("#M[3]")
            .with_reply("#M[0]");
        let mut stage = stage(port).with_position_policy(PositionPolicy::OnConfirmed);

        assert!(stage.move_axis_y(5, None).is_err());
        assert_eq!(stage.position().y, 0);

        stage.move_axis_y(5, None).unwrap();
        assert_eq!(stage.position().y, 5);
    }

    #[test]
    fn test_overflowing_move_is_rejected_before_sending() {
        let port = MockPort::new("/dev/ttyFAKE");
        let log = port.log();
        let mut stage = stage(port);

        let err = stage.move_axis_z(i64::MAX, None).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(log.frames().is_empty());
    }

    #[test]
    fn test_low_level_moves_do_not_track_position() {
        let port = MockPort::new("/dev/ttyFAKE")
            .with_reply("#m[0]")
            .with_reply("#M[0]");
        let log = port.log();
        let mut stage = stage(port);

        stage.move_to(100, 1, 2, 3).unwrap();
        stage.move_relative(50, 10, 20, 30).unwrap();

        assert_eq!(
            log.frames(),
            vec!["m[100,1,2,3]".to_string(), "M[50,10,20,30]".to_string()]
        );
        assert_eq!(stage.position(), StagePosition::default());
    }

    #[test]
    fn test_control_commands() {
        let port = MockPort::new("/dev/ttyFAKE")
            .with_reply("#E[0]")
            .with_reply("#p[0]")
            .with_reply("#c[0]")
            .with_reply("#h[0]")
            .with_reply("#H[0]")
            .with_reply("#E[0]");
        let log = port.log();
        let mut stage = stage(port);

        stage.enable(true).unwrap();
        stage.pause().unwrap();
        stage.resume().unwrap();
        stage
            .set_homing_order(HomingOrder::from_indices(1, 0, -1).unwrap())
            .unwrap();
        stage.home().unwrap();
        stage.enable(false).unwrap();

        assert_eq!(
            log.frames(),
            vec!["E[1]", "p", "c", "h[1,0,-1]", "H", "E[0]"]
        );
    }

    #[test]
    fn test_ping_returns_liveness_flag() {
        let port = MockPort::new("/dev/ttyFAKE")
            .with_reply("#I[0,1]")
            .with_reply("#I[0,0]")
            .with_reply("#I[0]");
        let mut stage = stage(port);

        assert!(stage.ping().unwrap());
        assert!(!stage.ping().unwrap());
        assert!(stage.ping().unwrap_err().is_protocol());
    }

    #[test]
    fn test_malformed_reply_is_protocol_error() {
        let port = MockPort::new("/dev/ttyFAKE").with_reply("garbage");
        let mut stage = stage(port);
        assert!(stage.enable(true).unwrap_err().is_protocol());
    }

    #[test]
    fn test_identify_restores_timeout() {
        let port = MockPort::new("/dev/ttyFAKE").with_reply("#?[0,\"Oquam-Stage-1\"]");
        let log = port.log();
        let mut stage = stage(port);

        let id = stage.identify(Duration::from_secs(1)).unwrap();
        assert_eq!(id.device(), "Oquam-Stage-1");
        assert_eq!(log.frames(), vec!["?"]);
        assert_eq!(
            log.timeouts(),
            vec![Duration::from_secs(1), Duration::from_secs(5)]
        );
    }

    #[test]
    fn test_identify_skips_boot_banner() {
        let port = MockPort::new("/dev/ttyFAKE")
            .with_stale_input("Oquam firmware boot\n")
            .with_reply("#?[0,\"Oquam-Stage-1\"]");
        let log = port.log();
        let mut stage = stage(port);

        let id = stage.identify(Duration::from_secs(1)).unwrap();
        assert_eq!(id.device(), "Oquam-Stage-1");
        assert_eq!(log.clears(), 1);
    }

    #[test]
    fn test_identify_timeout_still_restores() {
        let port = MockPort::new("/dev/ttyFAKE").with_timeout_reply();
        let log = port.log();
        let mut stage = stage(port);

        let err = stage.identify(Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(log.timeouts().last(), Some(&Duration::from_secs(5)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let port = MockPort::new("/dev/ttyFAKE");
        let log = port.log();
        let mut stage = stage(port);

        stage.close().unwrap();
        stage.close().unwrap();
        assert!(stage.is_closed());
        drop(stage);

        assert_eq!(log.closes(), 1);
    }

    #[test]
    fn test_drop_closes_link() {
        let port = MockPort::new("/dev/ttyFAKE");
        let log = port.log();
        drop(stage(port));
        assert_eq!(log.closes(), 1);
    }

    #[test]
    fn test_operations_after_close_fail() {
        let port = MockPort::new("/dev/ttyFAKE");
        let mut stage = stage(port);
        stage.close().unwrap();

        assert!(matches!(stage.enable(true), Err(Error::LinkClosed)));
        assert!(matches!(stage.move_axis_x(1, None), Err(Error::LinkClosed)));
        assert_eq!(stage.position(), StagePosition::default());
    }
}
