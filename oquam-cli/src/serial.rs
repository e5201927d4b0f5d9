//! Stage connection.
//!
//! An explicit port is opened directly and confirmed with one identify
//! exchange. Otherwise the serial ports are scanned on a background worker
//! while a spinner runs; Ctrl-C cancels the scan.

use {
    crate::{Cli, CliError, config::Config, use_fancy_output, was_interrupted},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, theme::ColorfulTheme},
    indicatif::{ProgressBar, ProgressStyle},
    log::debug,
    oquam::{
        DiscoveryConfig, GearRatio, NativePort, Scanner, SerialConfig, StageController,
        port::DEFAULT_BAUD,
    },
    std::{io::IsTerminal, time::Duration},
};

/// Poll interval of the scan result while the spinner runs.
const SCAN_POLL: Duration = Duration::from_millis(100);

/// Settings resolved from flags, environment and configuration.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Explicit port; skips discovery.
    pub port: Option<String>,
    /// Gear ratios.
    pub gears: GearRatio,
    /// Discovery settings, serial settings included.
    pub discovery: DiscoveryConfig,
    /// Never prompt.
    pub non_interactive: bool,
    /// Suppress status lines.
    pub quiet: bool,
}

impl ConnectOptions {
    /// Resolve options; command-line values win over configuration.
    pub fn resolve(cli: &Cli, config: &Config) -> Self {
        let baud = cli
            .baud
            .or(config.connection.baud)
            .unwrap_or(DEFAULT_BAUD);
        let gears = cli
            .gears
            .or(config.stage.gears)
            .unwrap_or_default();

        let mut discovery = config
            .discovery_config()
            .with_serial(SerialConfig::new(String::new(), baud));
        if let Some(ms) = cli.handshake_timeout_ms {
            discovery = discovery.with_handshake_timeout(Duration::from_millis(ms));
        }

        Self {
            port: cli.port.clone(),
            gears,
            discovery,
            non_interactive: cli.non_interactive,
            quiet: cli.quiet,
        }
    }
}

/// Connect to the stage.
pub fn connect(options: &ConnectOptions, config: &mut Config) -> Result<StageController<NativePort>> {
    match &options.port {
        Some(port) => connect_explicit(port, options),
        None => connect_discovered(options, config),
    }
}

fn connect_explicit(port: &str, options: &ConnectOptions) -> Result<StageController<NativePort>> {
    let serial = options.discovery.serial.for_port(port);
    let mut stage = oquam::connect_stage(&serial, options.gears)
        .map_err(|e| CliError::DeviceNotFound(format!("cannot open {port}: {e}")))?;

    let identification = stage
        .identify(options.discovery.handshake_timeout)
        .map_err(|e| {
            CliError::DeviceNotFound(format!("{port} is not an Oquam stage controller: {e}"))
        })?;

    if !options.quiet {
        eprintln!(
            "{} Connected to {} on {}",
            style("✓").green(),
            style(identification.device()).bold(),
            style(port).cyan()
        );
    }
    Ok(stage)
}

fn connect_discovered(
    options: &ConnectOptions,
    config: &mut Config,
) -> Result<StageController<NativePort>> {
    let scanner = Scanner::new();
    let mut handle = scanner.start_native(options.gears, options.discovery.clone())?;

    let spinner = scan_spinner(options.quiet);
    let result = loop {
        if was_interrupted() && !handle.is_cancelled() {
            spinner.set_message("Cancelling...");
            handle.cancel();
        }
        if let Some(result) = handle.wait_timeout(SCAN_POLL) {
            break result;
        }
    };
    spinner.finish_and_clear();

    let found = result?;
    if !options.quiet {
        eprintln!(
            "{} Connected to {} on {} ({} port(s) tried)",
            style("✓").green(),
            style(found.identification.device()).bold(),
            style(&found.candidate.name).cyan(),
            found.tried
        );
    }

    ask_remember_port(&found.candidate.name, options, config);
    Ok(found.controller)
}

fn scan_spinner(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    spinner.set_message("Scanning serial ports for the stage controller...");
    spinner.enable_steady_tick(SCAN_POLL);
    spinner
}

/// Offer to remember a newly discovered port as the preferred device.
fn ask_remember_port(port: &str, options: &ConnectOptions, config: &mut Config) {
    if config.connection.serial.as_deref() == Some(port) {
        return;
    }
    if options.non_interactive || !std::io::stdin().is_terminal() {
        debug!("Not prompting to remember {port} (non-interactive)");
        return;
    }

    let remember = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {port} as the stage port?"))
        .default(true)
        .interact();

    match remember {
        Ok(true) => match config.remember_port(port) {
            Ok(path) => eprintln!(
                "{} Saved to {}",
                style("✓").green(),
                style(path.display()).dim()
            ),
            Err(e) => eprintln!("{} Could not save port: {e:#}", style("Warning:").yellow()),
        },
        Ok(false) => {},
        Err(e) => debug!("Prompt failed: {e}"),
    }
}
