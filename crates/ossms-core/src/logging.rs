use crate::{errors::Error, Result};

/// Initialize logging/tracing for the relay.
///
/// Default: info for the workspace crates, warn for everything else.
/// Can be overridden with `RUST_LOG`.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(service_name)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| Error::Config(format!("logging init failed: {e}")))
}

fn default_directives(service_name: &str) -> String {
    let crate_name = service_name.replace('-', "_");
    format!(
        "warn,ossms_core=info,ossms_http=info,ossms_telegram=info,ossms_twilio=info,{crate_name}=info,tower_http=info"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_use_crate_style_names() {
        let d = default_directives("ossms");
        assert!(d.starts_with("warn,"));
        assert!(d.contains("ossms=info"));
        assert!(d.contains("ossms_core=info"));
    }
}
