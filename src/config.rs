use crate::application::RefreshMode;
use crate::domain::value_objects::{UpstreamUrl, UrlError};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

/// Why `UPSTREAMS` could not be turned into a set of base urls.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamsError {
    #[error("env.UPSTREAMS is missing")]
    Missing,
    #[error("{url} is not a valid URL")]
    InvalidUrl {
        url: String,
        #[source]
        source: UrlError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Upstreams(#[from] UpstreamsError),
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub upstreams: HashSet<UpstreamUrl>,
    pub listen_addr: String,
    pub max_connections_per_upstream: usize,
    /// Admission timeout
    pub timeout: Duration,
    /// Admission poll interval
    pub wait_for: Duration,
    pub probe_timeout: Duration,
    /// Zero disables the periodic refresh
    pub refresh_interval: Duration,
    pub refresh_mode: RefreshMode,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstreams: HashSet::new(),
            listen_addr: "0.0.0.0:8000".to_string(),
            max_connections_per_upstream: 1,
            timeout: Duration::from_millis(600_000),
            wait_for: Duration::from_millis(5_000),
            probe_timeout: Duration::from_millis(5_000),
            refresh_interval: Duration::from_secs(30),
            refresh_mode: RefreshMode::Awaited,
            debug: false,
        }
    }
}

impl Config {
    /// Build a config from `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let upstreams = parse_upstreams(lookup("UPSTREAMS").as_deref())?;

        let listen_addr = var("LISTEN_ADDR")
            .map(|v| v.trim().to_string())
            .unwrap_or(defaults.listen_addr);

        let max_connections_per_upstream = match var("MAX_CONNECT_PER_UPSTREAM") {
            Some(v) => parse_number::<usize>("MAX_CONNECT_PER_UPSTREAM", &v)
                .and_then(|n| at_least_one("MAX_CONNECT_PER_UPSTREAM", &v, n))?,
            None => defaults.max_connections_per_upstream,
        };

        let timeout = match var("TIMEOUT") {
            Some(v) => Duration::from_millis(parse_number("TIMEOUT", &v)?),
            None => defaults.timeout,
        };

        let wait_for = match var("WAIT_FOR") {
            Some(v) => Duration::from_millis(
                parse_number("WAIT_FOR", &v).and_then(|n| at_least_one("WAIT_FOR", &v, n))?,
            ),
            None => defaults.wait_for,
        };

        let probe_timeout = match var("PROBE_TIMEOUT") {
            Some(v) => Duration::from_millis(parse_number("PROBE_TIMEOUT", &v)?),
            None => defaults.probe_timeout,
        };

        let refresh_interval = match var("REFRESH_INTERVAL") {
            Some(v) => Duration::from_secs(parse_number("REFRESH_INTERVAL", &v)?),
            None => defaults.refresh_interval,
        };

        let refresh_mode = match var("REFRESH_MODE") {
            Some(v) => match v.trim().to_lowercase().as_str() {
                "awaited" => RefreshMode::Awaited,
                "background" => RefreshMode::Background,
                _ => return Err(invalid("REFRESH_MODE", &v, "awaited or background")),
            },
            None => defaults.refresh_mode,
        };

        let debug = match var("DEBUG") {
            Some(v) => match v.trim().to_lowercase().as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                _ => return Err(invalid("DEBUG", &v, "1, true, 0 or false")),
            },
            None => defaults.debug,
        };

        Ok(Config {
            upstreams,
            listen_addr,
            max_connections_per_upstream,
            timeout,
            wait_for,
            probe_timeout,
            refresh_interval,
            refresh_mode,
            debug,
        })
    }
}

pub fn load_config() -> Result<Config, ConfigError> {
    Config::from_lookup(|name| std::env::var(name).ok())
}

/// Parse a comma-separated list of upstream base urls.
///
/// Whitespace around each entry is ignored and duplicates collapse. The
/// first invalid entry fails the whole list.
pub fn parse_upstreams(raw: Option<&str>) -> Result<HashSet<UpstreamUrl>, UpstreamsError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(UpstreamsError::Missing)?;

    raw.split(',')
        .map(str::trim)
        .map(|url| {
            UpstreamUrl::parse(url).map_err(|source| UpstreamsError::InvalidUrl {
                url: url.to_string(),
                source,
            })
        })
        .collect()
}

fn invalid(name: &'static str, value: &str, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        expected,
    }
}

fn parse_number<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(name, value, "a non-negative integer"))
}

fn at_least_one<T>(name: &'static str, value: &str, n: T) -> Result<T, ConfigError>
where
    T: PartialOrd + From<u8>,
{
    if n < T::from(1) {
        return Err(invalid(name, value, "at least 1"));
    }
    Ok(n)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::error::Error;

    fn url(s: &str) -> UpstreamUrl {
        UpstreamUrl::parse(s).unwrap()
    }

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    fn invalid_url(raw: &str) -> (String, UrlError) {
        match parse_upstreams(Some(raw)) {
            Err(UpstreamsError::InvalidUrl { url, source }) => (url, source),
            other => panic!("expected invalid url, got {:?}", other),
        }
    }

    // ===== parse_upstreams =====

    #[test]
    fn test_parse_upstreams_into_set() {
        let result = parse_upstreams(Some("http://llama.ai:6666,http://falcon.ai:6667")).unwrap();
        let expected: HashSet<UpstreamUrl> = [url("http://llama.ai:6666"), url("http://falcon.ai:6667")]
            .into_iter()
            .collect();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_parse_upstreams_tolerates_spaces() {
        let result =
            parse_upstreams(Some(" http://llama.ai:6666, http://falcon.ai:6667 ")).unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.contains(&url("http://llama.ai:6666")));
        assert!(result.contains(&url("http://falcon.ai:6667")));
    }

    #[test]
    fn test_parse_upstreams_tolerates_trailing_slash() {
        let result =
            parse_upstreams(Some(" http://llama.ai:6666/, http://falcon.ai:6667/ ")).unwrap();
        assert!(result.contains(&url("http://llama.ai:6666")));
        assert!(result.contains(&url("http://falcon.ai:6667")));
    }

    #[test]
    fn test_parse_upstreams_collapses_duplicates() {
        let result =
            parse_upstreams(Some("http://llama.ai:6666,http://llama.ai:6666/")).unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_parse_upstreams_missing() {
        assert!(matches!(parse_upstreams(None), Err(UpstreamsError::Missing)));
        assert!(matches!(parse_upstreams(Some("")), Err(UpstreamsError::Missing)));
        assert!(matches!(parse_upstreams(Some("   ")), Err(UpstreamsError::Missing)));
        assert_eq!(
            UpstreamsError::Missing.to_string(),
            "env.UPSTREAMS is missing"
        );
    }

    #[test]
    fn test_parse_upstreams_not_comma_separated() {
        let (bad, source) = invalid_url("http://llama.ai:6666http://falcon.ai:6667");
        assert_eq!(bad, "http://llama.ai:6666http://falcon.ai:6667");
        assert!(matches!(source, UrlError::Parse(_)));
    }

    #[test]
    fn test_parse_upstreams_bracket_syntax() {
        let (bad, source) = invalid_url("[http://llama.ai:6666,http://falcon.ai:6667]");
        assert_eq!(bad, "[http://llama.ai:6666");
        assert!(matches!(source, UrlError::Parse(_)));
    }

    #[test]
    fn test_parse_upstreams_empty_host() {
        let (bad, _) = invalid_url("http://");
        assert_eq!(bad, "http://");

        let (bad, _) = invalid_url("http://llama.ai:6666,http://");
        assert_eq!(bad, "http://");
    }

    #[test]
    fn test_parse_upstreams_unsupported_scheme() {
        let err = parse_upstreams(Some("http://llama.ai:6666,websocket://8.8.8.8:6666")).unwrap_err();
        assert_eq!(err.to_string(), "websocket://8.8.8.8:6666 is not a valid URL");
        assert_eq!(
            err.source().map(|s| s.to_string()),
            Some("websocket:// is not supported".to_string())
        );
    }

    #[test]
    fn test_parse_upstreams_path_not_allowed() {
        let (bad, source) = invalid_url("http://8.8.8.9:6667,http://8.8.8.8:6666/not-allowed");
        assert_eq!(bad, "http://8.8.8.8:6666/not-allowed");
        assert_eq!(source, UrlError::PathNotAllowed("/not-allowed".to_string()));
    }

    // ===== Config =====

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8000");
        assert_eq!(cfg.max_connections_per_upstream, 1);
        assert_eq!(cfg.timeout, Duration::from_secs(600));
        assert_eq!(cfg.wait_for, Duration::from_secs(5));
        assert_eq!(cfg.refresh_mode, RefreshMode::Awaited);
        assert!(!cfg.debug);
    }

    #[test]
    fn test_config_from_minimal_env() {
        let cfg = config_from(&[("UPSTREAMS", "http://llama.ai:6666")]).unwrap();
        assert_eq!(cfg.upstreams.len(), 1);
        assert_eq!(cfg.listen_addr, "0.0.0.0:8000");
        assert_eq!(cfg.probe_timeout, Duration::from_secs(5));
        assert_eq!(cfg.refresh_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_config_requires_upstreams() {
        assert!(matches!(
            config_from(&[]),
            Err(ConfigError::Upstreams(UpstreamsError::Missing))
        ));
    }

    #[test]
    fn test_config_with_all_settings() {
        let cfg = config_from(&[
            ("UPSTREAMS", "http://llama.ai:6666,http://falcon.ai:6667"),
            ("LISTEN_ADDR", "127.0.0.1:9000"),
            ("MAX_CONNECT_PER_UPSTREAM", "3"),
            ("TIMEOUT", "1000"),
            ("WAIT_FOR", "50"),
            ("PROBE_TIMEOUT", "250"),
            ("REFRESH_INTERVAL", "0"),
            ("REFRESH_MODE", "Background"),
            ("DEBUG", "true"),
        ])
        .unwrap();

        assert_eq!(cfg.upstreams.len(), 2);
        assert_eq!(cfg.listen_addr, "127.0.0.1:9000");
        assert_eq!(cfg.max_connections_per_upstream, 3);
        assert_eq!(cfg.timeout, Duration::from_secs(1));
        assert_eq!(cfg.wait_for, Duration::from_millis(50));
        assert_eq!(cfg.probe_timeout, Duration::from_millis(250));
        assert_eq!(cfg.refresh_interval, Duration::ZERO);
        assert_eq!(cfg.refresh_mode, RefreshMode::Background);
        assert!(cfg.debug);
    }

    #[test]
    fn test_config_debug_flag() {
        let on = config_from(&[("UPSTREAMS", "http://a.ai:1"), ("DEBUG", "1")]).unwrap();
        let off = config_from(&[("UPSTREAMS", "http://a.ai:1"), ("DEBUG", "false")]).unwrap();
        assert!(on.debug);
        assert!(!off.debug);
    }

    #[test]
    fn test_config_rejects_malformed_numbers() {
        let err = config_from(&[("UPSTREAMS", "http://a.ai:1"), ("TIMEOUT", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "TIMEOUT", .. }));

        let err =
            config_from(&[("UPSTREAMS", "http://a.ai:1"), ("MAX_CONNECT_PER_UPSTREAM", "-1")])
                .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { name: "MAX_CONNECT_PER_UPSTREAM", .. }
        ));
    }

    #[test]
    fn test_config_rejects_zero_where_positive_required() {
        let err =
            config_from(&[("UPSTREAMS", "http://a.ai:1"), ("MAX_CONNECT_PER_UPSTREAM", "0")])
                .unwrap_err();
        assert_eq!(
            err.to_string(),
            "MAX_CONNECT_PER_UPSTREAM must be at least 1, got \"0\""
        );

        let err = config_from(&[("UPSTREAMS", "http://a.ai:1"), ("WAIT_FOR", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "WAIT_FOR", .. }));
    }

    #[test]
    fn test_config_rejects_unknown_enum_values() {
        let err =
            config_from(&[("UPSTREAMS", "http://a.ai:1"), ("REFRESH_MODE", "lazy")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "REFRESH_MODE", .. }));

        let err = config_from(&[("UPSTREAMS", "http://a.ai:1"), ("DEBUG", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "DEBUG", .. }));
    }

    #[test]
    fn test_config_blank_values_use_defaults() {
        let cfg = config_from(&[("UPSTREAMS", "http://a.ai:1"), ("TIMEOUT", "  ")]).unwrap();
        assert_eq!(cfg.timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_load_config_reads_process_env() {
        std::env::set_var("UPSTREAMS", "http://llama.ai:6666/");
        let cfg = load_config();
        std::env::remove_var("UPSTREAMS");

        let cfg = cfg.unwrap();
        assert!(cfg.upstreams.contains(&url("http://llama.ai:6666")));
    }

    #[test]
    fn test_config_clone() {
        let cfg = Config::default();
        let cloned = cfg.clone();
        assert_eq!(cfg.listen_addr, cloned.listen_addr);
    }
}
