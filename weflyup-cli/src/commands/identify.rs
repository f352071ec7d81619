//! Identify command implementation.

use {
    crate::{Cli, config::Config, open_updater},
    anyhow::Result,
    console::style,
    rust_i18n::t,
    weflyup::Port as _,
};

/// Identify command implementation.
pub(crate) fn cmd_identify(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let mut updater = open_updater(cli, config)?;
    let port_name = updater.port().name().to_string();

    let identified = updater.identify();
    updater.close()?;
    let session = identified?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "port": port_name,
                "kind": session.kind,
                "version": session.version,
                "raw_response": session.raw_response,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!(
        "{} {}",
        style("✓").green(),
        t!(
            "common.identified",
            kind = session.kind,
            version = &session.version
        )
    );
    // The bare version goes to stdout for scripts.
    println!("{}", session.version);
    Ok(())
}
