//! Shell completion generation and installation.

use {
    crate::Cli,
    anyhow::{Context, Result},
    clap::CommandFactory,
    clap_complete::{Shell, generate},
    console::style,
    directories::BaseDirs,
    rust_i18n::t,
    std::{
        env, fs,
        io::{self, Write as _},
        path::{Path, PathBuf},
    },
};

const BIN_NAME: &str = env!("CARGO_BIN_NAME");

/// Line added to `.zshrc` so `~/.zfunc` is searched.
const ZSH_FPATH_LINE: &str = "fpath=(~/.zfunc $fpath)";

/// Render the completion script for `shell`.
fn completion_script(shell: Shell) -> Vec<u8> {
    let mut buf = Vec::new();
    generate(shell, &mut Cli::command(), BIN_NAME, &mut buf);
    buf
}

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    generate(shell, &mut Cli::command(), BIN_NAME, &mut io::stdout());
}

/// Detect the user's current shell from environment.
pub(crate) fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }
    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }
    None
}

/// Map a shell binary path to its `Shell`.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let name = Path::new(shell_path).file_name()?.to_str()?;
    match name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

/// File the completion script for `shell` is installed to.
fn install_path(shell: Shell, dirs: &BaseDirs) -> Result<PathBuf> {
    let path = match shell {
        Shell::Bash => dirs
            .data_local_dir()
            .join("bash-completion")
            .join("completions")
            .join(BIN_NAME),
        Shell::Zsh => dirs.home_dir().join(".zfunc").join(format!("_{BIN_NAME}")),
        Shell::Fish => dirs
            .config_dir()
            .join("fish")
            .join("completions")
            .join(format!("{BIN_NAME}.fish")),
        Shell::PowerShell => {
            let dir = env::var_os("PROFILE")
                .and_then(|profile| PathBuf::from(profile).parent().map(Path::to_path_buf))
                .unwrap_or_else(|| dirs.config_dir().join("powershell").join("completions"));
            dir.join(format!("{BIN_NAME}.ps1"))
        },
        Shell::Elvish => dirs
            .config_dir()
            .join("elvish")
            .join("lib")
            .join(format!("{BIN_NAME}.elv")),
        _ => anyhow::bail!("{}", t!("completions.unsupported_shell")),
    };
    Ok(path)
}

/// Make sure `.zshrc` puts `~/.zfunc` on the function path.
fn ensure_zsh_fpath(home: &Path) -> Result<()> {
    let zshrc = home.join(".zshrc");
    let present = fs::read_to_string(&zshrc).is_ok_and(|content| content.contains(ZSH_FPATH_LINE));
    if present {
        return Ok(());
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&zshrc)
        .with_context(|| format!("Failed to update {}", zshrc.display()))?;
    writeln!(file, "\n# {BIN_NAME} completions")?;
    writeln!(file, "{ZSH_FPATH_LINE}")?;
    writeln!(file, "autoload -Uz compinit && compinit")?;
    eprintln!(
        "{} {}",
        style("✓").green().bold(),
        t!("completions.fpath_added", file = zshrc.display())
    );
    Ok(())
}

/// Install shell completions automatically.
pub(crate) fn cmd_completions_install(shell_arg: Option<Shell>) -> Result<()> {
    let shell = match shell_arg {
        Some(s) => s,
        None => detect_shell_type().context(t!("completions.detect_failed").to_string())?,
    };

    let dirs = BaseDirs::new().context(t!("completions.no_home").to_string())?;
    let path = install_path(shell, &dirs)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, completion_script(shell))
        .with_context(|| format!("Failed to write completion file: {}", path.display()))?;

    eprintln!(
        "{} {}",
        style("✓").green().bold(),
        t!(
            "completions.installed",
            shell = style(shell).cyan(),
            path = style(path.display()).yellow()
        )
    );

    eprintln!();
    match shell {
        Shell::Bash => eprintln!(
            "{}",
            t!(
                "completions.bash_hint",
                command = style(format!("source {}", path.display())).cyan()
            )
        ),
        Shell::Zsh => {
            ensure_zsh_fpath(dirs.home_dir())?;
            eprintln!(
                "{}",
                t!("completions.zsh_hint", command = style("exec zsh").cyan())
            );
        },
        Shell::PowerShell => eprintln!(
            "{}",
            t!(
                "completions.powershell_hint",
                command = style(format!("Import-Module {}", path.display())).cyan()
            )
        ),
        _ => eprintln!("{}", t!("completions.auto_loaded")),
    }

    Ok(())
}
