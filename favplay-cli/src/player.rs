//! [`PlaybackElement`] backed by an external player process.
//!
//! The process only ever plays; pausing kills it and remembers the position,
//! resuming spawns it again with `{start}` set to that position.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use playback_session::{ElementError, ElementEvent, PlaybackElement};
use reqwest::header::RANGE;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::PlayerCommand;

const TIME_UPDATE_INTERVAL: Duration = Duration::from_secs(1);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Keep the player from opening a console window on Windows.
trait NoWindowExt {
    fn no_window(&mut self) -> &mut Self;
}

impl NoWindowExt for Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

fn player_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.no_window()
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Substitute `{url}`, `{start}` and `{volume}` in every argument.
pub fn render_args(template: &[String], url: &str, start_secs: f64, volume_percent: u8) -> Vec<String> {
    let start = format!("{:.3}", start_secs.max(0.0));
    let volume = volume_percent.to_string();
    template
        .iter()
        .map(|arg| {
            arg.replace("{url}", url)
                .replace("{start}", &start)
                .replace("{volume}", &volume)
        })
        .collect()
}

struct Running {
    token: CancellationToken,
    started: Instant,
}

pub struct ProcessElement {
    command: PlayerCommand,
    probe: reqwest::Client,
    events: mpsc::UnboundedSender<ElementEvent>,
    source: Option<Url>,
    volume: f32,
    muted: bool,
    /// Playback position at the last spawn or pause.
    offset_secs: f64,
    running: Option<Running>,
    probe_token: Option<CancellationToken>,
}

impl ProcessElement {
    pub fn new(
        command: PlayerCommand,
        events: mpsc::UnboundedSender<ElementEvent>,
    ) -> Result<Self, ElementError> {
        let probe = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| ElementError::Failed(format!("failed to build probe client: {e}")))?;

        Ok(Self {
            command,
            probe,
            events,
            source: None,
            volume: 1.0,
            muted: false,
            offset_secs: 0.0,
            running: None,
            probe_token: None,
        })
    }

    fn volume_percent(&self) -> u8 {
        if self.muted {
            0
        } else {
            (self.volume.clamp(0.0, 1.0) * 100.0).round() as u8
        }
    }

    fn position(&self) -> f64 {
        match &self.running {
            Some(running) => self.offset_secs + running.started.elapsed().as_secs_f64(),
            None => self.offset_secs,
        }
    }

    fn spawn_player(&mut self) -> Result<(), ElementError> {
        let url = self.source.as_ref().ok_or(ElementError::NoSource)?;
        let args = render_args(
            &self.command.args,
            url.as_str(),
            self.offset_secs,
            self.volume_percent(),
        );

        let child = player_command(&self.command.program)
            .args(&args)
            .spawn()
            .map_err(|e| {
                ElementError::Failed(format!("failed to start {}: {e}", self.command.program))
            })?;
        debug!(program = %self.command.program, start = self.offset_secs, "Spawned player");

        let token = CancellationToken::new();
        spawn_player_waiter(child, token.clone(), self.events.clone(), self.offset_secs);
        self.running = Some(Running {
            token,
            started: Instant::now(),
        });
        Ok(())
    }

    /// Kill the running process, keeping its position.
    fn halt(&mut self) {
        self.offset_secs = self.position();
        if let Some(running) = self.running.take() {
            running.token.cancel();
        }
    }

    fn cancel_probe(&mut self) {
        if let Some(token) = self.probe_token.take() {
            token.cancel();
        }
    }

    fn restart_if_running(&mut self) {
        if self.running.is_none() {
            return;
        }
        self.halt();
        if let Err(e) = self.spawn_player() {
            warn!("Failed to restart player: {}", e);
            let _ = self.events.send(ElementEvent::Error {
                message: e.to_string(),
            });
        }
    }
}

impl Drop for ProcessElement {
    fn drop(&mut self) {
        self.cancel_probe();
        self.halt();
    }
}

/// Wait for the player to exit, reporting progress while it runs.
///
/// Cancelling the token kills the process silently; only a natural exit
/// produces `Ended` or `Error`.
fn spawn_player_waiter(
    mut child: Child,
    token: CancellationToken,
    events: mpsc::UnboundedSender<ElementEvent>,
    start_secs: f64,
) {
    tokio::spawn(async move {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(TIME_UPDATE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let status = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    let _ = child.kill().await;
                    return;
                }
                status = child.wait() => break status,
                _ = ticker.tick() => {
                    let position_secs = start_secs + started.elapsed().as_secs_f64();
                    let _ = events.send(ElementEvent::TimeUpdate { position_secs });
                }
            }
        };

        if token.is_cancelled() {
            return;
        }
        let event = match status {
            Ok(status) if status.success() => ElementEvent::Ended,
            Ok(status) => {
                warn!("Player exited with {}", status);
                ElementEvent::Error {
                    message: format!("player exited with {status}"),
                }
            }
            Err(e) => {
                error!("Error waiting for player: {}", e);
                ElementEvent::Error {
                    message: e.to_string(),
                }
            }
        };
        let _ = events.send(event);
    });
}

async fn probe_source(client: &reqwest::Client, url: Url) -> Result<(), String> {
    let response = client
        .get(url)
        .header(RANGE, "bytes=0-0")
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("source returned HTTP {status}"));
    }
    Ok(())
}

#[async_trait]
impl PlaybackElement for ProcessElement {
    async fn set_source(&mut self, url: &Url) -> Result<(), ElementError> {
        self.cancel_probe();
        self.halt();
        self.source = Some(url.clone());
        self.offset_secs = 0.0;
        Ok(())
    }

    async fn clear_source(&mut self) {
        self.cancel_probe();
        self.halt();
        self.source = None;
        self.offset_secs = 0.0;
    }

    /// Readiness is a one-byte range request against the source.
    async fn load(&mut self) {
        self.cancel_probe();
        self.halt();
        self.offset_secs = 0.0;

        let Some(url) = self.source.clone() else {
            return;
        };
        let token = CancellationToken::new();
        self.probe_token = Some(token.clone());
        let client = self.probe.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                result = probe_source(&client, url) => match result {
                    Ok(()) => ElementEvent::CanPlay,
                    Err(message) => ElementEvent::Error { message },
                },
            };
            if !token.is_cancelled() {
                let _ = events.send(event);
            }
        });
    }

    async fn play(&mut self) -> Result<(), ElementError> {
        if self.running.is_some() {
            return Ok(());
        }
        self.spawn_player()
    }

    async fn pause(&mut self) {
        self.halt();
    }

    async fn seek(&mut self, position_secs: f64) -> Result<(), ElementError> {
        if self.source.is_none() {
            return Err(ElementError::NoSource);
        }
        let was_running = self.running.is_some();
        self.halt();
        self.offset_secs = position_secs.max(0.0);
        if was_running {
            self.spawn_player()?;
        }
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        self.restart_if_running();
    }

    async fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.restart_if_running();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    fn shell(script: &str) -> PlayerCommand {
        PlayerCommand {
            program: "sh".to_string(),
            args: template(&["-c", script]),
        }
    }

    async fn next_terminal(rx: &mut mpsc::UnboundedReceiver<ElementEvent>) -> ElementEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("no event within 5s")
                .expect("channel closed");
            if !matches!(event, ElementEvent::TimeUpdate { .. }) {
                return event;
            }
        }
    }

    #[test]
    fn renders_placeholders() {
        let args = render_args(
            &template(&["-ss", "{start}", "-volume", "{volume}", "-i", "{url}"]),
            "http://localhost:4000/",
            12.5,
            40,
        );
        assert_eq!(
            args,
            ["-ss", "12.500", "-volume", "40", "-i", "http://localhost:4000/"]
        );
    }

    #[tokio::test]
    async fn play_without_source_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut element = ProcessElement::new(shell("exit 0"), tx).unwrap();
        assert_eq!(element.play().await, Err(ElementError::NoSource));
        assert_eq!(element.seek(3.0).await, Err(ElementError::NoSource));
    }

    #[test]
    fn muting_zeroes_volume() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut element = ProcessElement::new(shell("exit 0"), tx).unwrap();
        element.volume = 0.456;
        assert_eq!(element.volume_percent(), 46);
        element.muted = true;
        assert_eq!(element.volume_percent(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_exit_reports_ended() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut element = ProcessElement::new(shell("exit 0"), tx).unwrap();
        let url = Url::parse("http://127.0.0.1:1/").unwrap();
        element.set_source(&url).await.unwrap();
        element.play().await.unwrap();

        assert_eq!(next_terminal(&mut rx).await, ElementEvent::Ended);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_exit_reports_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut element = ProcessElement::new(shell("exit 3"), tx).unwrap();
        let url = Url::parse("http://127.0.0.1:1/").unwrap();
        element.set_source(&url).await.unwrap();
        element.play().await.unwrap();

        match next_terminal(&mut rx).await {
            ElementEvent::Error { message } => assert!(message.contains('3'), "{message}"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pause_kills_silently_and_keeps_position() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut element = ProcessElement::new(shell("sleep 5"), tx).unwrap();
        let url = Url::parse("http://127.0.0.1:1/").unwrap();
        element.set_source(&url).await.unwrap();
        element.seek(30.0).await.unwrap();
        element.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        element.pause().await;

        assert!(element.running.is_none());
        assert!(element.position() >= 30.1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, ElementEvent::TimeUpdate { .. }), "{event:?}");
        }
    }

    #[tokio::test]
    async fn unreachable_source_fails_to_load() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut element = ProcessElement::new(shell("exit 0"), tx).unwrap();
        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        element.set_source(&url).await.unwrap();
        element.load().await;

        assert!(matches!(
            next_terminal(&mut rx).await,
            ElementEvent::Error { .. }
        ));
    }
}
