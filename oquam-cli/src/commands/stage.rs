//! Stage operations: identify, ping, enable, motion, homing, pause/resume.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use oquam::{Axis, HomingOrder, NativePort, StageController};
use std::io::IsTerminal;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::serial::{ConnectOptions, connect};
use crate::{CliError, use_fancy_output, was_interrupted};

/// Run `action` on a connected stage and release the link afterwards.
fn with_stage<T>(
    options: &ConnectOptions,
    config: &mut Config,
    action: impl FnOnce(&mut StageController<NativePort>) -> Result<T>,
) -> Result<T> {
    let mut stage = connect(options, config)?;
    let outcome = action(&mut stage);
    let closed = stage.close().context("failed to close the serial link");
    let value = outcome?;
    closed?;
    Ok(value)
}

fn done(options: &ConnectOptions, message: &str) {
    if !options.quiet {
        eprintln!("{} {message}", style("✓").green());
    }
}

pub(crate) fn cmd_identify(options: &ConnectOptions, config: &mut Config) -> Result<()> {
    let identification = with_stage(options, config, |stage| {
        Ok(stage.identify(options.discovery.handshake_timeout)?)
    })?;
    println!("{}", identification.device());
    debug!("Identification reply: {}", identification.raw());
    Ok(())
}

pub(crate) fn cmd_ping(options: &ConnectOptions, config: &mut Config) -> Result<()> {
    let alive = with_stage(options, config, |stage| Ok(stage.ping()?))?;
    println!("{}", if alive { "alive" } else { "not alive" });
    Ok(())
}

pub(crate) fn cmd_enable(options: &ConnectOptions, config: &mut Config, flag: bool) -> Result<()> {
    with_stage(options, config, |stage| Ok(stage.enable(flag)?))?;
    done(
        options,
        if flag {
            "Motors enabled"
        } else {
            "Motors disabled"
        },
    );
    Ok(())
}

/// Relative stage-step displacement per axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AxisMoves {
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub z: Option<i64>,
}

impl AxisMoves {
    /// Requested moves in X, Y, Z order.
    pub(crate) fn requested(&self) -> Vec<(Axis, i64)> {
        [(Axis::X, self.x), (Axis::Y, self.y), (Axis::Z, self.z)]
            .into_iter()
            .filter_map(|(axis, delta)| delta.map(|d| (axis, d)))
            .collect()
    }
}

pub(crate) fn cmd_move(
    options: &ConnectOptions,
    config: &mut Config,
    moves: AxisMoves,
    dt: Option<i64>,
) -> Result<()> {
    let requested = moves.requested();
    if requested.is_empty() {
        return Err(CliError::Usage("give at least one of --x, --y, --z".into()).into());
    }

    let position = with_stage(options, config, |stage| {
        for (axis, delta) in requested {
            stage
                .move_axis(axis, delta, dt)
                .with_context(|| format!("move along {axis} by {delta} failed"))?;
        }
        Ok(stage.position())
    })?;

    done(options, "Move sent");
    println!("{position}");
    Ok(())
}

pub(crate) fn cmd_move_to(
    options: &ConnectOptions,
    config: &mut Config,
    t: i64,
    target: [i64; 3],
) -> Result<()> {
    let [x, y, z] = target;
    with_stage(options, config, |stage| Ok(stage.move_to(t, x, y, z)?))?;
    done(options, &format!("Absolute move to [{x}, {y}, {z}] sent"));
    Ok(())
}

pub(crate) fn cmd_pause(options: &ConnectOptions, config: &mut Config) -> Result<()> {
    with_stage(options, config, |stage| Ok(stage.pause()?))?;
    done(options, "Motion paused");
    Ok(())
}

pub(crate) fn cmd_resume(options: &ConnectOptions, config: &mut Config) -> Result<()> {
    with_stage(options, config, |stage| Ok(stage.resume()?))?;
    done(options, "Motion resumed");
    Ok(())
}

/// Parse a homing order like `2,-1,-1` or `z`, `x,y,z`.
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn parse_homing_order(s: &str) -> Result<HomingOrder, String> {
    let parts: Vec<&str> = s
        .split(',')
        .map(str::trim)
        .collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(format!(
            "invalid homing order '{s}', expected up to three of x, y, z, 0, 1, 2, -1"
        ));
    }

    let mut slots = [-1i64; 3];
    for (slot, part) in slots.iter_mut().zip(&parts) {
        *slot = match Axis::from_name(part) {
            Some(axis) => axis.index() as i64,
            None => part
                .parse()
                .map_err(|_| format!("invalid homing slot '{part}'"))?,
        };
    }

    HomingOrder::from_indices(slots[0], slots[1], slots[2]).map_err(|e| e.to_string())
}

pub(crate) fn cmd_home(
    options: &ConnectOptions,
    config: &mut Config,
    order: Option<HomingOrder>,
    wait: Option<u64>,
    yes: bool,
) -> Result<()> {
    let order = order.unwrap_or_default();

    if !yes {
        if options.non_interactive || !std::io::stdin().is_terminal() {
            return Err(CliError::Usage(
                "homing moves the stage to its end stops; pass --yes to confirm".into(),
            )
            .into());
        }
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Home the stage now? Axes will move to their end stops")
            .default(false)
            .interact()
            .context("confirmation prompt failed")?;
        if !confirmed {
            return Err(oquam::Error::Cancelled.into());
        }
    }

    with_stage(options, config, |stage| {
        stage.set_homing_order(order)?;
        stage.home()?;
        Ok(())
    })?;
    done(options, "Homing started");

    // The firmware only acknowledges the command; motion continues afterwards
    if let Some(secs) = wait {
        wait_for(options, Duration::from_secs(secs))?;
    }
    Ok(())
}

fn wait_for(options: &ConnectOptions, duration: Duration) -> Result<()> {
    let bar = if options.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(duration.as_secs());
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Waiting for homing [{bar:30.cyan/blue}] {pos}/{len}s")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        bar
    };

    let start = Instant::now();
    while start.elapsed() < duration {
        if was_interrupted() {
            bar.abandon();
            return Err(oquam::Error::Cancelled.into());
        }
        bar.set_position(start.elapsed().as_secs());
        thread::sleep(Duration::from_millis(100));
    }
    bar.finish_and_clear();
    Ok(())
}
