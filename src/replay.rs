//! JSON Lines replay driver
//!
//! Feeds a recorded backend conversation through an engine and prints what
//! the UI would have been asked to do. Each input line is either a backend
//! message or a control line:
//!
//! ```text
//! {"type":"assistant_delta","session_id":"S1","content":"Hel"}
//! {"control":"switch","session_id":"S2"}     active session changes, view rebuilt
//! {"control":"advance","ms":5000}            clock moves forward
//! ```
//!
//! Output is one JSON object per line: render requests and queue releases
//! as they happen, then a final health report.

use crate::bus::{Payload, Topic};
use crate::collaborators::{
    ActiveSession, ActiveSessionCell, OutboundQueue, ReleaseReason, RenderSurfaces,
    SurfaceRegistry,
};
use crate::engine::{Collaborators, Engine, EngineOptions, HealthReport};
use crate::events::{ReconstructRequest, RenderRequest, SessionId};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub active: Option<SessionId>,
    /// Honour `advance` lines by sleeping, and tick on a timer
    pub realtime: bool,
    pub tick_interval: Duration,
}

/// One parsed input line
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayLine {
    Message(serde_json::Value),
    Switch(ReconstructRequest),
    Advance(Duration),
    Blank,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "control", rename_all = "snake_case")]
enum Control {
    Switch {
        #[serde(flatten)]
        request: ReconstructRequest,
    },
    Advance {
        ms: u64,
    },
}

impl ReplayLine {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(Self::Blank);
        }
        let value: serde_json::Value = serde_json::from_str(line).context("not valid JSON")?;
        if value.get("control").is_none() {
            return Ok(Self::Message(value));
        }
        match serde_json::from_value(value).context("malformed control line")? {
            Control::Switch { request } => {
                if request.session_id.is_none() {
                    bail!("switch needs a session_id");
                }
                Ok(Self::Switch(request))
            }
            Control::Advance { ms } => Ok(Self::Advance(Duration::from_millis(ms))),
        }
    }
}

/// What the replay prints, one per line
#[derive(Debug, Serialize)]
#[serde(tag = "output", rename_all = "snake_case")]
pub enum ReplayOutput {
    Render {
        request: RenderRequest,
    },
    Release {
        session_id: Option<SessionId>,
        reason: ReleaseReason,
    },
    Health {
        report: HealthReport,
    },
}

/// Outbound queue that reports releases to the replay output
struct ReleaseSink(mpsc::UnboundedSender<ReplayOutput>);

impl OutboundQueue for ReleaseSink {
    fn release_next(&self, session_id: Option<&SessionId>, reason: ReleaseReason) {
        let sent = self.0.send(ReplayOutput::Release {
            session_id: session_id.cloned(),
            reason,
        });
        if sent.is_err() {
            tracing::debug!(session_id = ?session_id, reason = ?reason, "Replay output closed, release not reported");
        }
    }
}

/// Wall clock plus however far `advance` lines have pushed it
struct ReplayClock {
    skew: Duration,
}

impl ReplayClock {
    fn now(&self) -> Instant {
        Instant::now() + self.skew
    }
}

pub struct Replay {
    engine: Engine,
    active: Arc<ActiveSessionCell>,
    surfaces: Arc<SurfaceRegistry>,
    output: mpsc::UnboundedReceiver<ReplayOutput>,
    clock: ReplayClock,
    options: ReplayOptions,
    skipped_lines: usize,
}

impl Replay {
    pub fn new(engine_options: EngineOptions, options: ReplayOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let active = Arc::new(ActiveSessionCell::new(options.active.clone()));
        let surfaces = Arc::new(SurfaceRegistry::new());
        let engine = Engine::new(
            engine_options,
            Collaborators {
                active: active.clone(),
                surfaces: surfaces.clone(),
                outbound: Arc::new(ReleaseSink(tx.clone())),
            },
        );

        engine.bus().on(Topic::Render, move |envelope| {
            if let Payload::Render(request) = &envelope.data {
                tx.send(ReplayOutput::Render {
                    request: request.clone(),
                })
                .context("replay output closed")?;
            }
            Ok(())
        });

        Self {
            engine,
            active,
            surfaces,
            output: rx,
            clock: ReplayClock {
                skew: Duration::ZERO,
            },
            options,
            skipped_lines: 0,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Lines that could not be parsed and were skipped
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Replay every line of `input`, writing output to `out`
    pub async fn run<R, W>(&mut self, input: R, out: &mut W) -> Result<HealthReport>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        let period = self.options.tick_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut line_no = 0usize;

        loop {
            tokio::select! {
                next = lines.next_line() => {
                    let Some(line) = next.context("failed to read replay input")? else {
                        break;
                    };
                    line_no += 1;
                    match ReplayLine::parse(&line) {
                        Ok(parsed) => self.apply(parsed).await,
                        Err(e) => {
                            tracing::warn!(line = line_no, error = %e, "Skipping replay line");
                            self.skipped_lines += 1;
                        }
                    }
                    if !self.options.realtime {
                        self.engine.tick(self.clock.now());
                    }
                }
                _ = ticker.tick(), if self.options.realtime => {
                    self.engine.tick(self.clock.now());
                }
            }
            self.flush(out)?;
        }

        self.engine.tick(self.clock.now());
        self.flush(out)?;

        let report = self.engine.health();
        write_line(
            out,
            &ReplayOutput::Health {
                report: report.clone(),
            },
        )?;
        tracing::info!(
            lines = line_no,
            skipped = self.skipped_lines,
            sessions = report.sessions,
            "Replay finished"
        );
        Ok(report)
    }

    async fn apply(&mut self, line: ReplayLine) {
        match line {
            ReplayLine::Message(value) => {
                self.engine.deliver(value);
            }
            ReplayLine::Switch(request) => {
                tracing::info!(session_id = ?request.session_id, "Switching active session");
                // The UI tears down the old chat view on switch
                if let Some(previous) = self.active.active_session_id() {
                    self.surfaces.close(&previous);
                }
                self.active.set(request.session_id.clone());
                self.engine.request_reconstruct(request);
            }
            ReplayLine::Advance(by) => {
                if self.options.realtime {
                    tokio::time::sleep(by).await;
                } else {
                    self.clock.skew += by;
                }
            }
            ReplayLine::Blank => {}
        }
    }

    fn flush<W: Write>(&mut self, out: &mut W) -> Result<()> {
        while let Ok(item) = self.output.try_recv() {
            write_line(out, &item)?;
        }
        Ok(())
    }
}

fn write_line<W: Write>(out: &mut W, item: &ReplayOutput) -> Result<()> {
    serde_json::to_writer(&mut *out, item).context("failed to encode replay output")?;
    out.write_all(b"\n").context("failed to write replay output")?;
    Ok(())
}
