//! Interactive serial port selection.
//!
//! Ports are chosen in this order:
//! - the `--port` argument or `WEFLYUP_PORT`
//! - the port remembered in a config file
//! - the only CH340/CH341 adapter present, without prompting
//! - an interactive selection (or a usage error in non-interactive mode)

use {
    crate::{
        CliError,
        config::{Config, LOCAL_CONFIG_FILE},
    },
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    rust_i18n::t,
    std::{cmp::Ordering, io::IsTerminal, path::Path},
    weflyup::{NativePortEnumerator, PortEnumerator, PortInfo},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Offer every port, not only known adapters.
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
    /// Force confirmation even for a single recognised adapter.
    pub confirm_port: bool,
}

/// Result of port selection.
#[derive(Debug)]
pub struct SelectedPort {
    /// The selected port.
    pub port: PortInfo,
    /// Whether the port was explicitly named or is a known adapter.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn no_device_err(message: &str) -> anyhow::Error {
    CliError::NoDevice(message.to_string()).into()
}

/// Serial ports reported by the system, or none if enumeration fails.
pub fn available_ports() -> Vec<PortInfo> {
    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Port enumeration failed: {e}");
            Vec::new()
        },
    }
}

/// Label of a port for listings and prompts.
pub fn describe_port(port: &PortInfo) -> String {
    let adapter = if port.is_wefly_adapter() {
        format!(" [{}]", style("CH340").yellow())
    } else {
        String::new()
    };
    let vid_pid = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();
    format!("{}{adapter}{vid_pid}{product}", port.name)
}

fn select_non_interactive_port(selection_ports: Vec<PortInfo>) -> Result<SelectedPort> {
    // Exactly one candidate is a valid auto-selection; anything else is a
    // usage problem and never prompts.
    let mut ports = selection_ports.into_iter();
    match (ports.next(), ports.next()) {
        (Some(port), None) => Ok(SelectedPort {
            is_known: port.is_wefly_adapter(),
            port,
        }),
        (Some(_), Some(_)) => Err(usage_err(t!("serial.multiple_ports").as_ref())),
        (None, _) => Err(no_device_err(t!("serial.no_ports_available").as_ref())),
    }
}

/// Select a serial port from the ports present on this machine.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    select_from(available_ports(), options, config)
}

/// Select a serial port among `ports`.
pub fn select_from(
    ports: Vec<PortInfo>,
    options: &SerialOptions,
    config: &Config,
) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(&ports, port_name, true));
    }

    if let Some(port_name) = &config.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(&ports, port_name, true));
    }

    if ports.is_empty() {
        return Err(no_device_err(t!("serial.no_ports_found").as_ref()));
    }

    let known_ports: Vec<PortInfo> = ports
        .iter()
        .filter(|p| p.is_wefly_adapter())
        .cloned()
        .collect();

    let selection_ports = if options.list_all_ports || known_ports.is_empty() {
        ports
    } else {
        known_ports
    };

    if options.non_interactive {
        return select_non_interactive_port(selection_ports);
    }

    match selection_ports.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(selection_ports)
        },
        Ordering::Equal => {
            let mut ports = selection_ports;
            let port = ports.remove(0);
            if port.is_wefly_adapter() && !options.confirm_port {
                info!("Auto-selected port: {} [CH340]", port.name);
                Ok(SelectedPort {
                    port,
                    is_known: true,
                })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        Ordering::Less => Err(no_device_err(t!("serial.no_ports_available").as_ref())),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(t!("serial.interactive_requires_tty").to_string()).into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled(t!("serial.selection_cancelled").to_string()).into()
            } else {
                CliError::Usage(t!("serial.prompt_failed").to_string()).into()
            }
        },
    }
}

/// Look a port up by name, falling back to a bare entry for unlisted ports.
fn find_port_by_name(ports: &[PortInfo], name: &str, is_known: bool) -> SelectedPort {
    let found = ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)));

    let port = found.cloned().unwrap_or_else(|| PortInfo {
        name: name.to_string(),
        vid: None,
        pid: None,
        manufacturer: None,
        product: None,
    });
    SelectedPort { port, is_known }
}

fn select_port_interactive(mut ports: Vec<PortInfo>) -> Result<SelectedPort> {
    eprintln!(
        "{} {}",
        style("ℹ").blue(),
        t!("serial.detected_ports", count = ports.len())
    );
    eprintln!("{}", style(t!("serial.known_devices_hint")).dim());

    ports.sort_by_key(|p| !p.is_wefly_adapter());

    // Truncate labels to the terminal width so they do not wrap.
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|port| {
            let label = describe_port(port);
            console::truncate_str(&label, max_item_width, "\u{2026}").into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("serial.select_prompt").to_string())
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            let is_known = port.is_wefly_adapter();
            Ok(SelectedPort { port, is_known })
        },
        None => Err(CliError::Cancelled(t!("serial.selection_cancelled").to_string()).into()),
    }
}

/// Confirm use of a single unrecognised port.
fn confirm_single_port(port: PortInfo) -> Result<SelectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(
            t!(
                "serial.confirm_use",
                port = port.name.clone(),
                info = product_info
            )
            .to_string(),
        )
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(CliError::Cancelled(t!("serial.selection_cancelled").to_string()).into())
    }
}

/// Offer to store the chosen port in the local config file.
pub fn ask_remember_port(port: &PortInfo, config: &mut Config) -> Result<()> {
    if config.connection.serial.as_deref() == Some(port.name.as_str()) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("serial.remember_prompt", file = LOCAL_CONFIG_FILE).to_string())
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(&port.name, Path::new(LOCAL_CONFIG_FILE)) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, vid: Option<u16>) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid,
            pid: vid.map(|_| 0x7523),
            manufacturer: None,
            product: None,
        }
    }

    fn non_interactive() -> SerialOptions {
        SerialOptions {
            non_interactive: true,
            ..Default::default()
        }
    }

    fn assert_usage(result: Result<SelectedPort>) {
        let err = result.expect_err("expected error");
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_explicit_port_wins() {
        let options = SerialOptions {
            port: Some("COM9".to_string()),
            ..non_interactive()
        };
        let mut config = Config::default();
        config.connection.serial = Some("COM3".to_string());

        let selected = select_from(vec![port("COM3", None)], &options, &config).unwrap();
        assert_eq!(selected.port.name, "COM9");
        assert!(selected.is_known);
    }

    #[test]
    fn test_explicit_port_matches_case_insensitively() {
        let options = SerialOptions {
            port: Some("com4".to_string()),
            ..non_interactive()
        };
        let ports = vec![port("COM4", Some(0x1A86))];
        let selected = select_from(ports, &options, &Config::default()).unwrap();
        assert_eq!(selected.port.name, "COM4");
        assert_eq!(selected.port.vid, Some(0x1A86));
    }

    #[test]
    fn test_config_port_used_when_no_argument() {
        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyUSB3".to_string());
        let selected = select_from(Vec::new(), &non_interactive(), &config).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyUSB3");
    }

    #[test]
    fn test_single_adapter_among_others_is_selected() {
        let ports = vec![port("/dev/ttyS0", None), port("/dev/ttyUSB0", Some(0x1A86))];
        let selected = select_from(ports, &non_interactive(), &Config::default()).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyUSB0");
        assert!(selected.is_known);
    }

    #[test]
    fn test_list_all_ports_makes_choice_ambiguous() {
        let ports = vec![port("/dev/ttyS0", None), port("/dev/ttyUSB0", Some(0x1A86))];
        let options = SerialOptions {
            list_all_ports: true,
            ..non_interactive()
        };
        assert_usage(select_from(ports, &options, &Config::default()));
    }

    #[test]
    fn test_non_interactive_multiple_ports_returns_usage_error() {
        let ports = vec![port("/dev/ttyUSB0", None), port("/dev/ttyUSB1", None)];
        assert_usage(select_non_interactive_port(ports));
    }

    #[test]
    fn test_no_ports_is_a_device_error() {
        for result in [
            select_non_interactive_port(Vec::new()),
            select_from(Vec::new(), &non_interactive(), &Config::default()),
        ] {
            let err = result.expect_err("expected error");
            assert!(matches!(
                err.downcast_ref::<CliError>(),
                Some(CliError::NoDevice(_))
            ));
        }
    }

    #[test]
    fn test_non_interactive_single_unknown_port_is_selected() {
        let selected = select_non_interactive_port(vec![port("/dev/ttyUSB0", None)]).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyUSB0");
        assert!(!selected.is_known);
    }

    #[test]
    fn test_describe_port() {
        console::set_colors_enabled(false);
        let mut info = port("/dev/ttyUSB0", Some(0x1A86));
        info.product = Some("USB Serial".to_string());
        assert_eq!(
            describe_port(&info),
            "/dev/ttyUSB0 [CH340] (1A86:7523) - USB Serial"
        );
        assert_eq!(describe_port(&port("COM1", None)), "COM1");
    }
}
