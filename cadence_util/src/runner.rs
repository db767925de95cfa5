//! Build and run a reactor app with configuration parsed from the
//! command line.
//!
//! ## Example
//!
//! ```rust,ignore
//! fn main() -> anyhow::Result<()> {
//!     cadence_util::runner::build_and_run_app("my_app", |app| {
//!         // assemble reactors here
//!         Ok(())
//!     })
//! }
//! ```

use anyhow::Context;
use cadence_runtime::{App, Config, TimeUnit, TimeValue};
use clap::Parser;

#[derive(clap::Parser)]
struct Args {
    /// Skip waiting for physical time to catch up with logical time
    #[arg(long, short)]
    fast: bool,

    /// Keep running while the queues are empty, waiting for asynchronous
    /// events
    #[arg(long)]
    keepalive: bool,

    /// Shut down this long after startup, e.g. `--timeout 5 sec`
    #[arg(long, num_args = 2, value_names = ["N", "UNIT"])]
    timeout: Option<Vec<String>>,

    /// Log level filter, e.g. `info` or `cadence_runtime=debug`
    #[arg(long, default_value = "info")]
    logging: String,
}

fn parse_timeout(parts: &[String]) -> anyhow::Result<TimeValue> {
    let value: u64 = parts[0]
        .parse()
        .context("timeout expects a non-negative integer count")?;
    let unit: TimeUnit = parts[1].parse()?;
    TimeValue::from_unit(value, unit).map_err(Into::into)
}

/// Assemble the scheduler configuration from the parsed arguments.
fn config_from_args(args: &Args) -> anyhow::Result<Config> {
    Ok(Config {
        fast: args.fast,
        keep_alive: args.keepalive,
        timeout: args
            .timeout
            .as_deref()
            .map(parse_timeout)
            .transpose()
            .context("invalid --timeout")?,
    })
}

/// Build and run a reactor app named `name`.
///
/// Configuration is parsed from the command line (`--fast`,
/// `--keepalive`, `--timeout <N> <UNIT>`, `--logging <LEVEL>`); `build`
/// assembles the topology on the fresh [`App`]. Returns an error on an
/// uncaught reaction failure or a dependency cycle, which a `main`
/// returning `anyhow::Result` maps to a nonzero exit code.
pub fn build_and_run_app(
    name: &str,
    build: impl FnOnce(&mut App) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&args.logging)
                .context("invalid --logging filter")?,
        )
        .init();

    let config = config_from_args(&args)?;
    let mut app = App::new(name, config);
    build(&mut app).context("error assembling the reactor hierarchy")?;
    app.run().context("execution failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        let parts = ["500".to_owned(), "msec".to_owned()];
        assert_eq!(
            parse_timeout(&parts).unwrap(),
            TimeValue::new(0, 500_000_000)
        );
        assert!(parse_timeout(&["x".to_owned(), "sec".to_owned()]).is_err());
        assert!(parse_timeout(&["1".to_owned(), "lightyear".to_owned()]).is_err());
    }
}
