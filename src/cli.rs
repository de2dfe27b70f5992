//! CLI argument definitions using clap derive macros.

use clap::Parser;

use requestor::PollingStrategy;

/// Send an HTTP request and print every response it produces.
///
/// Supports retries on selected outcomes and short or long polling.
#[derive(Parser, Debug)]
#[command(name = "requestor")]
#[command(author, version, about)]
pub struct Args {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS, ...)
    pub method: String,

    /// Target URL
    pub url: String,

    /// Request header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Request body, sent as is
    #[arg(short = 'd', long)]
    pub data: Option<String>,

    /// Per-attempt deadline in milliseconds (1-3600000)
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..=3_600_000))]
    pub timeout: Option<u64>,

    /// Retry delays in milliseconds, one per retry (e.g. 100,200,400)
    #[arg(long, value_delimiter = ',')]
    pub retry: Vec<u64>,

    /// Events triggering a retry (e.g. error,5xx,429)
    #[arg(long, value_delimiter = ',', default_value = "error")]
    pub retry_on: Vec<String>,

    /// Poll with the given strategy (short or long)
    #[arg(long)]
    pub poll: Option<PollingStrategy>,

    /// Polling interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub interval: u64,

    /// Maximum polling cycles (0 polls until interrupted)
    #[arg(long, default_value_t = 0)]
    pub limit: u32,

    /// Print response headers
    #[arg(short = 'i', long)]
    pub include: bool,

    /// Show download progress on stderr
    #[arg(long)]
    pub progress: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_minimal_args_parse_successfully() {
        let args = Args::try_parse_from(["requestor", "GET", "http://localhost/"]).unwrap();
        assert_eq!(args.method, "GET");
        assert_eq!(args.url, "http://localhost/");
        assert!(args.headers.is_empty());
        assert!(args.retry.is_empty());
        assert_eq!(args.retry_on, vec!["error".to_string()]);
        assert!(args.poll.is_none());
        assert_eq!(args.interval, 1000);
        assert_eq!(args.limit, 0);
    }

    #[test]
    fn test_cli_output_flags_parse() {
        let args =
            Args::try_parse_from(["requestor", "GET", "http://a", "-i", "--progress"]).unwrap();
        assert!(args.include);
        assert!(args.progress);
        assert!(!args.quiet);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["requestor", "GET", "http://a", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_missing_url_returns_error() {
        let result = Args::try_parse_from(["requestor", "GET"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["requestor", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    // ==================== Retry Tests ====================

    #[test]
    fn test_cli_retry_delays_are_comma_separated() {
        let args = Args::try_parse_from([
            "requestor",
            "GET",
            "http://a",
            "--retry",
            "100,200,400",
            "--retry-on",
            "timeout,5xx",
        ])
        .unwrap();
        assert_eq!(args.retry, vec![100, 200, 400]);
        assert_eq!(args.retry_on, vec!["timeout".to_string(), "5xx".to_string()]);
    }

    #[test]
    fn test_cli_timeout_zero_rejected() {
        let err = Args::try_parse_from(["requestor", "GET", "http://a", "-t", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    // ==================== Polling Tests ====================

    #[test]
    fn test_cli_poll_strategy_parses() {
        let args = Args::try_parse_from([
            "requestor",
            "GET",
            "http://a",
            "--poll",
            "long",
            "--interval",
            "50",
            "--limit",
            "3",
        ])
        .unwrap();
        assert_eq!(args.poll, Some(PollingStrategy::Long));
        assert_eq!(args.interval, 50);
        assert_eq!(args.limit, 3);
    }

    #[test]
    fn test_cli_unknown_poll_strategy_rejected() {
        let result = Args::try_parse_from(["requestor", "GET", "http://a", "--poll", "medium"]);
        assert!(result.is_err());
    }
}
