//! Node configuration: datasource resolution and membership parsing.

use snafu::Snafu;

/// Environment variable consulted when `--dsn` is not given. The name is
/// kept for compatibility with existing deployment tooling.
pub const DSN_ENV: &str = "POSTGRES_DSN";

/// Default seconds between heartbeat sweeps.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 5;

/// Default per-RPC timeout inside the coordinator, in seconds.
pub const DEFAULT_COORD_TIMEOUT_SECS: u64 = 10;

/// Configuration errors are fatal at startup.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("datasource is required: set --dsn or {DSN_ENV}"))]
    MissingDatasource,

    #[snafu(display("bind address is required"))]
    MissingAddress,
}

/// Resolve the datasource from the CLI value, falling back to [`DSN_ENV`].
pub fn resolve_dsn(cli: Option<String>) -> Result<String, ConfigError> {
    if let Some(dsn) = cli.filter(|d| !d.trim().is_empty()) {
        return Ok(dsn);
    }
    match std::env::var(DSN_ENV) {
        Ok(dsn) if !dsn.trim().is_empty() => Ok(dsn),
        _ => Err(ConfigError::MissingDatasource),
    }
}

/// Split a comma-separated membership list, trimming entries and dropping
/// empties.
pub fn parse_peers(nodes: &str) -> Vec<String> {
    nodes
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Mask credentials in a DSN so it can be shown on dashboards and logs.
pub fn mask_dsn(dsn: &str) -> String {
    if dsn.is_empty() {
        return String::new();
    }

    if let Some(scheme_end) = dsn.find("://") {
        let rest = &dsn[scheme_end + 3..];
        if let Some(at) = rest.find('@') {
            let user = rest[..at].split(':').next().unwrap_or("");
            return format!("{}://{}:****@{}", &dsn[..scheme_end], user, &rest[at + 1..]);
        }
        return dsn.to_string();
    }

    match dsn.find('@') {
        Some(at) if at > 0 => format!("****@{}", &dsn[at + 1..]),
        _ => dsn.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peers_are_trimmed_and_empties_dropped() {
        assert_eq!(
            parse_peers(" a:1, b:2 ,,c:3 "),
            vec!["a:1", "b:2", "c:3"]
        );
        assert!(parse_peers("").is_empty());
    }

    #[test]
    fn cli_dsn_wins_over_environment() {
        assert_eq!(
            resolve_dsn(Some("data/node.db".into())).unwrap(),
            "data/node.db"
        );
    }

    #[test]
    fn dsn_credentials_are_masked() {
        assert_eq!(
            mask_dsn("postgres://alice:secret@db:5432/app"),
            "postgres://alice:****@db:5432/app"
        );
        assert_eq!(mask_dsn("user:pw@host"), "****@host");
        assert_eq!(mask_dsn("data/node.db"), "data/node.db");
        assert_eq!(mask_dsn(""), "");
    }
}
