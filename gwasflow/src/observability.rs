//! Tracing setup and the startup banner.

use crate::config::Verbosity;
use tracing_subscriber::EnvFilter;

/// Initialises the global tracing subscriber from the configured
/// verbosity. `RUST_LOG` still wins when set. Safe to call twice; the
/// second call is a no-op.
pub fn init_tracing(verbosity: Verbosity) {
    let default_directive = match verbosity {
        Verbosity::Quiet => "warn",
        Verbosity::Normal => "info",
        Verbosity::Chatty => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// The startup banner printed before the run begins.
#[must_use]
pub fn banner(project: &str, pipeline: &str, author: Option<&str>) -> String {
    let mut lines = vec![
        "================================================================".to_string(),
        format!(" gwasflow v{}", env!("CARGO_PKG_VERSION")),
        format!(" project:  {project}"),
        format!(" pipeline: {pipeline}"),
    ];
    if let Some(author) = author {
        lines.push(format!(" author:   {author}"));
    }
    lines.push("================================================================".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_includes_names() {
        let text = banner("kidney_gwas", "quickstart", Some("L. Magosi"));
        assert!(text.contains("kidney_gwas"));
        assert!(text.contains("quickstart"));
        assert!(text.contains("L. Magosi"));
    }

    #[test]
    fn banner_omits_missing_author() {
        let text = banner("p", "q", None);
        assert!(!text.contains("author"));
    }

    #[test]
    fn init_is_idempotent() {
        init_tracing(Verbosity::Quiet);
        init_tracing(Verbosity::Chatty);
    }
}
