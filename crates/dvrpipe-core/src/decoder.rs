//! External decoder subprocess handling.
//!
//! The decoder is an opaque external program (ffmpeg in the reference
//! deployment) that reads the hand-off FIFO and writes a timestamped image
//! artifact. It is launched at most once per hand-off open event and torn
//! down together with the hand-off channel, pipe side first, so a decoder is
//! never left attached to a closed pipe.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::DecoderError;

/// Shell command template for launching the decoder.
///
/// Placeholders: `{pipe}` (hand-off FIFO path), `{channel}` (zero-based
/// channel index) and `{artifact}` (output image path).
#[derive(Debug, Clone)]
pub struct DecoderCommand {
    template: String,
}

impl DecoderCommand {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// The reference deployment's ffmpeg invocation: one raw h264 stream in,
    /// a periodically refreshed still image out.
    pub fn default_ffmpeg() -> Self {
        Self::new(
            "ffmpeg -y -f h264 -framerate 1 -i {pipe} -s 390x220 -r 1/2 -update 1 -f image2 {artifact}",
        )
    }

    /// Render the template for one channel.
    pub fn render(&self, pipe: &Path, channel: usize, artifact: &Path) -> String {
        self.template
            .replace("{pipe}", &pipe.display().to_string())
            .replace("{channel}", &channel.to_string())
            .replace("{artifact}", &artifact.display().to_string())
    }
}

impl Default for DecoderCommand {
    fn default() -> Self {
        Self::default_ffmpeg()
    }
}

/// Handle to a running decoder subprocess, owned by one channel worker.
#[derive(Debug)]
pub struct DecoderProcess {
    child: Child,
    pid: u32,
}

impl DecoderProcess {
    /// Spawn the decoder for a channel via the shell.
    pub fn spawn(
        command: &DecoderCommand,
        pipe: &Path,
        channel: usize,
        artifact: &Path,
    ) -> Result<Self, DecoderError> {
        let rendered = command.render(pipe, channel, artifact);
        if rendered.trim().is_empty() {
            return Err(DecoderError::EmptyTemplate);
        }

        let child = Command::new("sh")
            .arg("-c")
            .arg(&rendered)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(DecoderError::Spawn)?;
        let pid = child.id();

        info!(channel, pid, command = %rendered, "decoder launched");
        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the decoder is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop the decoder: give it a grace period to exit on its own (it sees
    /// EOF once the pipe writer closes), then kill and reap it.
    pub fn shutdown(mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid = self.pid, %status, "decoder exited");
                    return;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(err) => {
                    warn!(pid = self.pid, error = %err, "decoder wait failed");
                    break;
                }
            }
        }

        if let Err(err) = self.child.kill() {
            warn!(pid = self.pid, error = %err, "decoder kill failed");
        }
        match self.child.wait() {
            Ok(status) => debug!(pid = self.pid, %status, "decoder reaped"),
            Err(err) => warn!(pid = self.pid, error = %err, "decoder reap failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_all_placeholders() {
        let cmd = DecoderCommand::new("decode {pipe} --ch {channel} --out {artifact}");
        let rendered = cmd.render(Path::new("/tmp/pipe0"), 0, Path::new("/srv/1.jpg"));
        assert_eq!(rendered, "decode /tmp/pipe0 --ch 0 --out /srv/1.jpg");
    }

    #[test]
    fn default_template_embeds_pipe_and_artifact() {
        let rendered =
            DecoderCommand::default_ffmpeg().render(Path::new("/tmp/dvrpipe2"), 2, Path::new("/var/www/html/3.jpg"));
        assert!(rendered.contains("/tmp/dvrpipe2"));
        assert!(rendered.contains("/var/www/html/3.jpg"));
        assert!(!rendered.contains('{'));
    }

    #[test]
    fn empty_template_is_rejected() {
        let cmd = DecoderCommand::new("   ");
        let err = DecoderProcess::spawn(&cmd, Path::new("/tmp/p"), 0, Path::new("/tmp/a")).unwrap_err();
        assert!(matches!(err, DecoderError::EmptyTemplate));
    }

    #[test]
    fn shutdown_reaps_voluntary_exit() {
        let cmd = DecoderCommand::new("true");
        let decoder =
            DecoderProcess::spawn(&cmd, Path::new("/tmp/p"), 0, Path::new("/tmp/a")).unwrap();
        // `true` exits immediately; the grace window is plenty.
        decoder.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn shutdown_kills_lingering_process() {
        let cmd = DecoderCommand::new("sleep 60");
        let mut decoder =
            DecoderProcess::spawn(&cmd, Path::new("/tmp/p"), 0, Path::new("/tmp/a")).unwrap();
        assert!(decoder.is_running());

        let started = Instant::now();
        decoder.shutdown(Duration::from_millis(50));
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "shutdown must not wait for the full sleep"
        );
    }
}
