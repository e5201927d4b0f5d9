//! Interactive keyboard jogging.
//!
//! - ←/→: X -/+
//! - ↓/↑: Y -/+
//! - PgDn/PgUp: Z -/+
//! - `[`/`]`: smaller/larger step
//! - `q`, Esc, Ctrl+C: quit

use anyhow::{Context, Result};
use console::style;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use oquam::Axis;
use std::io::{self, IsTerminal, Write as _};
use std::time::Duration;

use crate::CliError;
use crate::config::Config;
use crate::serial::{ConnectOptions, connect};

/// Selectable step sizes, in stage steps.
const STEP_SIZES: &[i64] = &[1, 10, 100, 1000];

/// Key poll interval.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What a key press asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JogAction {
    /// Move one step along an axis; the sign gives the direction.
    Move(Axis, i64),
    /// Next smaller step size.
    Finer,
    /// Next larger step size.
    Coarser,
    /// Leave jog mode.
    Quit,
}

/// Map a key press to a jog action.
pub(crate) fn key_action(key: KeyEvent) -> Option<JogAction> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(JogAction::Quit),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Left => Some(JogAction::Move(Axis::X, -1)),
        KeyCode::Right => Some(JogAction::Move(Axis::X, 1)),
        KeyCode::Down => Some(JogAction::Move(Axis::Y, -1)),
        KeyCode::Up => Some(JogAction::Move(Axis::Y, 1)),
        KeyCode::PageDown => Some(JogAction::Move(Axis::Z, -1)),
        KeyCode::PageUp => Some(JogAction::Move(Axis::Z, 1)),
        KeyCode::Char('[') => Some(JogAction::Finer),
        KeyCode::Char(']') => Some(JogAction::Coarser),
        KeyCode::Char('q') | KeyCode::Esc => Some(JogAction::Quit),
        _ => None,
    }
}

/// Step index after a size change, clamped to the available sizes.
fn next_step(index: usize, action: JogAction) -> usize {
    match action {
        JogAction::Finer => index.saturating_sub(1),
        JogAction::Coarser => (index + 1).min(STEP_SIZES.len() - 1),
        _ => index,
    }
}

/// Restores cooked terminal mode on drop.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to enter raw terminal mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

// Raw mode needs explicit carriage returns
fn status_line(message: &str) {
    eprint!("\r\x1b[2K{message}");
    io::stderr().flush().ok();
}

pub(crate) fn cmd_jog(options: &ConnectOptions, config: &mut Config, dt: Option<i64>) -> Result<()> {
    if !io::stdin().is_terminal() {
        return Err(CliError::Usage("jog needs an interactive terminal".into()).into());
    }

    let mut stage = connect(options, config)?;
    eprintln!(
        "{}",
        style("←/→ X   ↓/↑ Y   PgDn/PgUp Z   [/] step size   q quit").dim()
    );

    let mut step_index = 1;
    let outcome = (|| -> Result<()> {
        let _raw = RawModeGuard::enable()?;
        status_line(&format!("step {}  {}", STEP_SIZES[step_index], stage.position()));

        loop {
            if !event::poll(POLL_INTERVAL)? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }

            match key_action(key) {
                Some(JogAction::Quit) => break,
                Some(JogAction::Move(axis, sign)) => {
                    let delta = sign * STEP_SIZES[step_index];
                    if let Err(e) = stage.move_axis(axis, delta, dt) {
                        status_line(&format!("{} {e}", style("move failed:").red()));
                        // A closed or broken link ends the session
                        if e.is_transport() {
                            return Err(e.into());
                        }
                        continue;
                    }
                },
                Some(action) => step_index = next_step(step_index, action),
                None => continue,
            }

            status_line(&format!("step {}  {}", STEP_SIZES[step_index], stage.position()));
        }
        Ok(())
    })();
    eprintln!();

    let closed = stage.close();
    outcome?;
    closed?;
    Ok(())
}
