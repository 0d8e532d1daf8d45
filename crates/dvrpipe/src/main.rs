mod exit;
mod logging;
mod signals;

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use dvrpipe_core::{ChannelConfig, DecoderCommand, SessionConfig, Supervisor, MAX_CHANNELS};
use dvrpipe_proto::{Credentials, DEFINED_CHANNELS};

use crate::exit::{CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::logging::{init_logging, LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "dvrpipe",
    version,
    about = "Pipe DVR camera channels into named pipes for external decoding"
)]
struct Cli {
    /// DVR hostname or IP address.
    #[arg(short, long, value_name = "HOST")]
    server: String,

    /// DVR media port.
    #[arg(short, long, value_name = "PORT", default_value_t = 9000)]
    port: u16,

    /// Channel to stream, zero-based. Repeatable for multiple channels.
    #[arg(short, long = "channel", value_name = "N", required = true)]
    channel: Vec<usize>,

    /// Login user name.
    #[arg(short, long, value_name = "NAME", env = "DVRPIPE_USER", default_value = "admin")]
    user: String,

    /// Login password.
    #[arg(long, value_name = "PASS", env = "DVRPIPE_PASS", default_value = "kathryn")]
    pass: String,

    /// Directory the per-channel named pipes are created in.
    #[arg(long, value_name = "DIR", default_value = "/tmp")]
    pipe_dir: PathBuf,

    /// Base name of the per-channel named pipes; the channel index is
    /// appended.
    #[arg(long, value_name = "NAME", default_value = "dvrpipe")]
    pipe_name: String,

    /// Directory the decoder writes its image artifacts to.
    #[arg(long, value_name = "DIR", default_value = "/var/www/html")]
    artifact_dir: PathBuf,

    /// Decoder command template; {pipe}, {channel} and {artifact} are
    /// substituted per channel.
    #[arg(long, value_name = "CMD")]
    decoder: Option<String>,

    /// Socket receive timeout in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    read_timeout: u64,

    /// Wait between reconnect attempts after a network failure, in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    backoff: u64,

    /// Pipe idle age in seconds beyond which the stream is reset.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    stale_after: u64,

    /// Idle ages beyond this many seconds are ignored as clock skew.
    #[arg(long, value_name = "SECS", default_value_t = 3600)]
    stale_ceiling: u64,

    /// Lower bound of the corrupt-artifact size window, in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = 10)]
    corrupt_min: u64,

    /// Upper bound of the corrupt-artifact size window, in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = 2500)]
    corrupt_max: u64,

    /// Force a full stream reset every this many seconds.
    #[arg(long, value_name = "SECS")]
    reset_every: Option<u64>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

fn run(cli: Cli) -> CliResult<i32> {
    let channels = validate_channels(&cli.channel)?;
    let server = resolve_server(&cli.server, cli.port)?;

    let credentials = Credentials {
        username: cli.user.clone(),
        password: cli.pass.clone(),
    };
    credentials
        .validate()
        .map_err(|err| CliError::new(USAGE, err.to_string()))?;

    let specs: Vec<ChannelConfig> = channels
        .iter()
        .map(|&channel| {
            let mut session = SessionConfig::new(server);
            session.read_timeout = Duration::from_secs(cli.read_timeout);

            let mut spec = ChannelConfig::new(
                channel,
                cli.pipe_dir.join(format!("{}{channel}", cli.pipe_name)),
                cli.artifact_dir.join(format!("{}.jpg", channel + 1)),
                session,
            );
            spec.credentials = credentials.clone();
            if let Some(template) = &cli.decoder {
                spec.decoder = DecoderCommand::new(template);
            }
            spec.backoff = Duration::from_secs(cli.backoff);
            spec.health.stale_after = Duration::from_secs(cli.stale_after);
            spec.health.stale_ceiling = Duration::from_secs(cli.stale_ceiling);
            spec.health.corrupt_min = cli.corrupt_min;
            spec.health.corrupt_max = cli.corrupt_max;
            spec.reset_every = cli.reset_every.map(Duration::from_secs);
            spec
        })
        .collect();

    let mut supervisor = Supervisor::new(specs);
    signals::install(supervisor.shutdown_flag())?;

    info!(server = %server, channels = ?channels, "starting");
    supervisor
        .start()
        .map_err(|err| CliError::new(FAILURE, err.to_string()))?;
    supervisor.run(signals::pending_control);

    Ok(SUCCESS)
}

/// Reject undefined channels up front instead of failing every handshake.
fn validate_channels(requested: &[usize]) -> CliResult<Vec<usize>> {
    let mut channels = requested.to_vec();
    channels.sort_unstable();
    channels.dedup();

    if channels.len() > MAX_CHANNELS {
        return Err(CliError::new(
            USAGE,
            format!("at most {MAX_CHANNELS} channels may be configured"),
        ));
    }
    for &channel in &channels {
        if channel >= DEFINED_CHANNELS {
            return Err(CliError::new(
                USAGE,
                format!(
                    "channel {channel} is not defined by the protocol \
                     (valid channels are 0..{DEFINED_CHANNELS})"
                ),
            ));
        }
    }
    Ok(channels)
}

fn resolve_server(host: &str, port: u16) -> CliResult<SocketAddr> {
    let target = format!("{host}:{port}");
    target
        .to_socket_addrs()
        .map_err(|err| CliError::new(FAILURE, format!("cannot resolve {target}: {err}")))?
        .next()
        .ok_or_else(|| CliError::new(FAILURE, format!("no addresses for {target}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let cli = Cli::try_parse_from(["dvrpipe", "--server", "10.0.0.5", "-c", "0"])
            .expect("minimal args should parse");

        assert_eq!(cli.server, "10.0.0.5");
        assert_eq!(cli.port, 9000);
        assert_eq!(cli.channel, vec![0]);
        assert_eq!(cli.pipe_name, "dvrpipe");
    }

    #[test]
    fn parses_repeated_channels() {
        let cli = Cli::try_parse_from([
            "dvrpipe", "--server", "dvr.local", "-c", "0", "-c", "2", "-c", "1",
        ])
        .expect("repeated channels should parse");

        assert_eq!(cli.channel, vec![0, 2, 1]);
    }

    #[test]
    fn requires_a_channel() {
        let err = Cli::try_parse_from(["dvrpipe", "--server", "dvr.local"])
            .expect_err("missing channel should fail");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn validate_channels_dedups_and_sorts() {
        let channels = validate_channels(&[2, 0, 2, 1]).expect("defined channels should pass");
        assert_eq!(channels, vec![0, 1, 2]);
    }

    #[test]
    fn validate_channels_rejects_undefined_index() {
        let err = validate_channels(&[0, 3]).expect_err("channel 3 has no selector");
        assert_eq!(err.code, USAGE);
        assert!(err.message.contains("channel 3"));
    }

    #[test]
    fn resolve_server_accepts_literal_addresses() {
        let addr = resolve_server("127.0.0.1", 9000).expect("literal should resolve");
        assert_eq!(addr, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn overlong_credentials_are_a_usage_error() {
        let cli = Cli::try_parse_from([
            "dvrpipe",
            "--server",
            "127.0.0.1",
            "-c",
            "0",
            "--user",
            &"x".repeat(200),
        ])
        .expect("long user still parses");

        let err = run(cli).expect_err("overlong username must be rejected");
        assert_eq!(err.code, USAGE);
    }
}
