//! Localized help output for the CLI.
//!
//! clap stays the single source of truth for the command structure; this
//! module swaps every user-visible string (section headings, command and
//! argument descriptions) for its translation.

use {crate::Cli, clap::CommandFactory, rust_i18n::t};

/// Supported locales for i18n.
pub(crate) const SUPPORTED_LOCALES: &[&str] = &["en", "zh-CN"];

/// Map a system locale such as `zh_CN.UTF-8`, `zh` or `en_US` to a supported one.
///
/// Any Chinese variant selects `zh-CN`; everything else falls back to `en`.
pub(crate) fn normalize_locale(raw: &str) -> String {
    let locale = raw.split('.').next().unwrap_or(raw).replace('_', "-");

    if SUPPORTED_LOCALES.contains(&locale.as_str()) {
        return locale;
    }

    let lang = locale.split('-').next().unwrap_or(&locale);
    if lang.eq_ignore_ascii_case("zh") {
        "zh-CN".to_string()
    } else {
        "en".to_string()
    }
}

/// Detect the best matching locale from system settings.
pub(crate) fn detect_locale() -> String {
    sys_locale::get_locale().map_or_else(|| "en".to_string(), |raw| normalize_locale(&raw))
}

/// Translation of `key`, or `None` when the locale files lack it.
fn lookup(key: &str) -> Option<String> {
    let text = t!(key).to_string();
    (text != key).then_some(text)
}

/// Leak a translated heading; clap wants `'static` headings and the CLI runs once.
fn leak(key: &str) -> &'static str {
    Box::leak(t!(key).to_string().into_boxed_str())
}

/// Give `arg` its localized help and the right section heading.
fn localize_arg(arg: clap::Arg, args_heading: &'static str, opts_heading: &'static str) -> clap::Arg {
    let key = format!("arg.{}.help", arg.get_id());
    let positional = arg.get_short().is_none() && arg.get_long().is_none();
    let arg = match lookup(&key) {
        Some(help) => arg.help(help),
        None => arg,
    };
    arg.help_heading(if positional {
        args_heading
    } else {
        opts_heading
    })
}

/// Build a clap `Command` with fully localized help output.
pub(crate) fn build_localized_command() -> clap::Command {
    let args_heading = leak("help.arguments_heading");
    let opts_heading = leak("help.options_heading");
    let usage_heading = t!("help.usage_heading");

    let template = format!(
        "{{bin}} {{version}}\n\n{{about}}\n\n\
         {usage_heading}:\n  {{usage}}\n\n\
         {commands_heading}:\n{{subcommands}}\n\n\
         {opts_heading}:\n{{options}}\n\n\
         {{after-help}}\n",
        commands_heading = t!("help.commands_heading"),
    );
    let sub_template = format!(
        "{{bin}} {{version}}\n\n{{about}}\n\n\
         {usage_heading}:\n  {{usage}}\n\n\
         {{all-args}}\n"
    );

    Cli::command()
        .help_template(template)
        .about(t!("app.about").to_string())
        .after_help(t!("app.after_help").to_string())
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            clap::Arg::new("help")
                .short('h')
                .long("help")
                .help(t!("arg.help_flag.help").to_string())
                .action(clap::ArgAction::Help)
                .global(true),
        )
        .arg(
            clap::Arg::new("version")
                .short('V')
                .long("version")
                .help(t!("arg.version_flag.help").to_string())
                .action(clap::ArgAction::Version)
                .global(true),
        )
        .mut_args(move |arg| localize_arg(arg, args_heading, opts_heading))
        .mut_subcommands(move |sub| {
            let about_key = format!("cmd.{}.about", sub.get_name().replace('-', "_"));
            let sub = match lookup(&about_key) {
                Some(about) => sub.about(about),
                None => sub,
            };
            sub.help_template(sub_template.clone())
                .mut_args(move |arg| localize_arg(arg, args_heading, opts_heading))
        })
        .disable_help_subcommand(true)
}
