//! weflyup CLI - Command-line tool for updating Wefly radio-link firmware.
//!
//! ## Features
//!
//! - Install a firmware archive (`.rar`) or an `.mcs` / `.hex` image pair
//! - Identify the connected transmitter or receiver
//! - Inspect record files without a device
//! - Interactive serial port selection
//! - Simulated device for trying the tool without hardware
//! - Shell completion generation
//! - Environment variable support
//! - Internationalization (i18n) support

use {
    anyhow::Result,
    clap::{Parser, Subcommand, ValueEnum},
    clap_complete::Shell,
    console::style,
    env_logger::Env,
    log::debug,
    rust_i18n::t,
    std::{
        env,
        path::PathBuf,
        sync::{
            LazyLock,
            atomic::{AtomicBool, Ordering},
        },
    },
    weflyup::{CancelToken, Port, SimulatedDevice, SimulatedPort, Target, Updater},
};

mod archive;
mod commands;
mod config;
mod help;
mod serial;

use {
    config::Config,
    help::{build_localized_command, detect_locale},
    serial::{SerialOptions, ask_remember_port, select_serial_port},
};

// Initialize i18n with locale files from the locales directory
rust_i18n::i18n!("locales", fallback = "en");

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Cancellation shared with the running update, triggered by Ctrl-C.
static CANCEL: LazyLock<CancelToken> = LazyLock::new(CancelToken::new);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Token cancelled by Ctrl-C.
pub(crate) fn cancel_token() -> CancelToken {
    CANCEL.clone()
}

/// Errors raised by the CLI itself, classified for the exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or an ambiguous choice the user must resolve.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration.
    #[error("{0}")]
    Config(String),
    /// No serial port to talk to.
    #[error("{0}")]
    NoDevice(String),
    /// The user aborted.
    #[error("{0}")]
    Cancelled(String),
}

/// Exit codes.
pub(crate) mod exit {
    /// Generic failure.
    pub const FAILURE: i32 = 1;
    /// Usage error.
    pub const USAGE: i32 = 2;
    /// Configuration error.
    pub const CONFIG: i32 = 3;
    /// Device or port not found, busy or not answering.
    pub const DEVICE: i32 = 4;
    /// Interrupted by the user.
    pub const CANCELLED: i32 = 130;
}

/// Map an error to the process exit code.
pub(crate) fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => exit::USAGE,
                CliError::Config(_) => exit::CONFIG,
                CliError::NoDevice(_) => exit::DEVICE,
                CliError::Cancelled(_) => exit::CANCELLED,
            };
        }
        if let Some(lib_err) = cause.downcast_ref::<weflyup::Error>() {
            return match lib_err.root() {
                weflyup::Error::Cancelled => exit::CANCELLED,
                weflyup::Error::PortBusy(_) | weflyup::Error::Serial(_) => exit::DEVICE,
                e if e.is_device_unresponsive() => exit::DEVICE,
                _ => exit::FAILURE,
            };
        }
    }
    exit::FAILURE
}

/// weflyup - Update the firmware of Wefly radio-link devices.
///
/// Environment variables:
///   WEFLYUP_PORT              - Default serial port
///   WEFLYUP_BAUD              - Default baud rate (default: 921600)
///   WEFLYUP_LANG              - Language/locale (en, zh-CN)
///   WEFLYUP_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
///   WEFLYUP_SIMULATE          - Talk to a simulated device
#[derive(Parser)]
#[command(name = "weflyup")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "WEFLYUP_PORT")]
    port: Option<String>,

    /// Baud rate (default: 921600).
    #[arg(short, long, global = true, env = "WEFLYUP_BAUD")]
    baud: Option<u32>,

    /// Language/locale for messages (e.g., en, zh-CN).
    #[arg(long, global = true, env = "WEFLYUP_LANG")]
    lang: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "WEFLYUP_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// Offer all available ports, not only CH340 adapters.
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Talk to a simulated device instead of a serial port.
    #[arg(long, global = true, env = "WEFLYUP_SIMULATE")]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Image kind selectable on the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub(crate) enum TargetArg {
    /// FPGA configuration (.mcs).
    Fpga,
    /// MCU firmware (.hex).
    Mcu,
}

impl From<TargetArg> for Target {
    fn from(target: TargetArg) -> Self {
        match target {
            TargetArg::Fpga => Target::Fpga,
            TargetArg::Mcu => Target::Mcu,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Install firmware on the connected device.
    Update {
        /// Firmware archive (wefly_vXX_NN.rar); searched in the current directory if omitted.
        #[arg(conflicts_with_all = ["mcs", "hex"])]
        archive: Option<PathBuf>,

        /// FPGA image, used instead of an archive.
        #[arg(long, requires = "hex", value_name = "FILE")]
        mcs: Option<PathBuf>,

        /// MCU image, used instead of an archive.
        #[arg(long, requires = "mcs", value_name = "FILE")]
        hex: Option<PathBuf>,

        /// Keep the extracted images after a successful update.
        #[arg(long)]
        keep_extracted: bool,
    },

    /// Show the kind and firmware version of the connected device.
    Identify {
        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show what would be sent for record files.
    Inspect {
        /// Record files (.mcs or .hex).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Treat every file as this image kind instead of guessing from the extension.
        #[arg(long, value_enum)]
        target: Option<TargetArg>,

        /// Output the summary as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

impl Commands {
    /// Whether stdout carries machine-readable output.
    fn is_json(&self) -> bool {
        matches!(
            self,
            Self::Identify { json: true }
                | Self::Inspect { json: true, .. }
                | Self::ListPorts { json: true }
        )
    }
}

impl Cli {
    /// Effective baud rate: argument, then config, then the protocol default.
    pub(crate) fn baud(&self, config: &Config) -> u32 {
        self.baud
            .or(config.connection.baud)
            .unwrap_or(weflyup::port::DEFAULT_BAUD)
    }

    /// Whether human-oriented messages are suppressed.
    pub(crate) fn is_quiet(&self) -> bool {
        self.quiet || self.command.is_json()
    }
}

fn main() {
    // Inspect raw args early to support localized --help handling and early --lang
    let raw_args: Vec<String> = env::args().collect();

    // Extract --lang if provided early so help text is localized
    let mut early_lang: Option<String> = env::var("WEFLYUP_LANG").ok();
    for (i, arg) in raw_args.iter().enumerate() {
        if let Some(val) = arg.strip_prefix("--lang=") {
            early_lang = Some(val.to_string());
        } else if arg == "--lang" && i + 1 < raw_args.len() {
            early_lang = Some(raw_args[i + 1].clone());
        }
    }

    let locale = early_lang.unwrap_or_else(detect_locale);
    rust_i18n::set_locale(&locale);

    // NO_COLOR and TTY detection
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Print localized help ourselves so section headings are translated.
    let wants_help = raw_args.iter().any(|a| a == "-h" || a == "--help");
    let no_args = raw_args.len() <= 1;

    if wants_help || no_args {
        let mut app = build_localized_command();

        let subcmd_names: Vec<String> = app
            .get_subcommands()
            .map(|s| s.get_name().to_string())
            .collect();
        let found = raw_args
            .iter()
            .skip(1)
            .find(|token| subcmd_names.iter().any(|n| n == token.as_str()));

        let printed = match found.and_then(|name| app.find_subcommand_mut(name)) {
            Some(sub) => sub.print_help(),
            None => app.print_help(),
        };
        std::process::exit(if printed.is_ok() { 0 } else { exit::FAILURE });
    }

    let cli = Cli::parse();

    // JSON output keeps stderr free of progress chatter.
    let log_level = if cli.is_quiet() {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "weflyup v{} (verbose level: {}, locale: {locale})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // First Ctrl-C stops the update after the current frame, a second one exits.
    if let Err(e) = ctrlc::set_handler(|| {
        if CANCEL.is_cancelled() {
            std::process::exit(exit::CANCELLED);
        }
        CANCEL.cancel();
    }) {
        debug!("Could not install Ctrl-C handler: {e}");
    }

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Update {
            archive,
            mcs,
            hex,
            keep_extracted,
        } => {
            let source = match (mcs, hex) {
                (Some(mcs), Some(hex)) => commands::update::ImageSource::Files {
                    mcs: mcs.clone(),
                    hex: hex.clone(),
                },
                _ => commands::update::ImageSource::Archive(archive.clone()),
            };
            commands::update::cmd_update(cli, &mut config, &source, *keep_extracted)
        },
        Commands::Identify { json } => commands::identify::cmd_identify(cli, &mut config, *json),
        Commands::Inspect {
            files,
            target,
            json,
        } => commands::inspect::cmd_inspect(files, target.map(Target::from), *json),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else if let Some(shell) = shell {
                commands::completions::cmd_completions(*shell);
                Ok(())
            } else {
                Err(CliError::Usage(t!("completions.shell_required").to_string()).into())
            }
        },
    }
}

/// Get serial port from CLI args, config or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Open an updater on the selected port, or on a simulated device.
pub(crate) fn open_updater(cli: &Cli, config: &mut Config) -> Result<Updater<Box<dyn Port>>> {
    let port: Box<dyn Port> = if cli.simulate {
        if !cli.is_quiet() {
            eprintln!(
                "{} {}",
                style("🧪").cyan(),
                t!("common.using_simulator")
            );
        }
        Box::new(SimulatedPort::new(SimulatedDevice::default()))
    } else {
        let port = get_port(cli, config)?;
        let baud = cli.baud(config);
        if !cli.is_quiet() {
            eprintln!(
                "{} {}",
                style("🔌").cyan(),
                t!("common.using_port", port = port, baud = baud)
            );
        }
        Box::new(weflyup::NativePort::open_exclusive(
            &weflyup::SerialConfig::new(port, baud),
        )?)
    };

    Ok(Updater::new(port).with_cancel(cancel_token()))
}
