//! # Progress Tracking
//!
//! The pipeline pushes [`ProgressEvent`]s on an unbounded channel and never
//! waits on the consumer. A [`ProgressTracker`] folds those events into
//! per-session snapshots with stage completion, ETA and error lists.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Weight kept from the previous stage average when a new timing arrives
const AVERAGE_DECAY: f64 = 0.8;

/// Processing stages reported for every image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Upload,
    Preprocessing,
    Ocr,
    Classification,
    Extraction,
    Validation,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Upload,
        Stage::Preprocessing,
        Stage::Ocr,
        Stage::Classification,
        Stage::Extraction,
        Stage::Validation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Preprocessing => "preprocessing",
            Stage::Ocr => "ocr",
            Stage::Classification => "classification",
            Stage::Extraction => "extraction",
            Stage::Validation => "validation",
        }
    }

    /// Typical stage duration used before real timings exist
    pub fn default_duration(&self) -> Duration {
        Duration::from_millis(match self {
            Stage::Upload => 1000,
            Stage::Preprocessing => 2000,
            Stage::Ocr => 5000,
            Stage::Classification => 500,
            Stage::Extraction => 300,
            Stage::Validation => 200,
        })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    SessionStarted {
        session: String,
        total_files: usize,
    },
    StageCompleted {
        session: String,
        file_index: usize,
        file_name: String,
        stage: Stage,
        elapsed: Duration,
        error: Option<String>,
    },
    FileCompleted {
        session: String,
        file_index: usize,
        elapsed: Duration,
        success: bool,
    },
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Fire-and-forget handle the pipeline reports through.
/// A missing or closed channel is ignored.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: Option<ProgressSender>,
    session: String,
}

impl ProgressReporter {
    pub fn new(sender: Option<ProgressSender>, session: impl Into<String>) -> Self {
        Self {
            sender,
            session: session.into(),
        }
    }

    /// Reporter that drops every event
    pub fn disabled() -> Self {
        Self::new(None, "")
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                debug!(session = %self.session, "Progress consumer gone, dropping event");
            }
        }
    }

    pub fn start(&self, total_files: usize) {
        self.send(ProgressEvent::SessionStarted {
            session: self.session.clone(),
            total_files,
        });
    }

    pub fn stage(&self, file_index: usize, file_name: &str, stage: Stage, elapsed: Duration, error: Option<String>) {
        self.send(ProgressEvent::StageCompleted {
            session: self.session.clone(),
            file_index,
            file_name: file_name.to_string(),
            stage,
            elapsed,
            error,
        });
    }

    pub fn file_done(&self, file_index: usize, elapsed: Duration, success: bool) {
        self.send(ProgressEvent::FileCompleted {
            session: self.session.clone(),
            file_index,
            elapsed,
            success,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageError {
    pub file_index: usize,
    pub file_name: String,
    pub stage: Stage,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageProgress {
    pub stage: Stage,
    pub completed: usize,
    pub total: usize,
    pub percent: u32,
    pub average_ms: u64,
    pub last_ms: Option<u64>,
}

/// Point-in-time view of one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub session: String,
    pub overall_percent: u32,
    pub files_processed: usize,
    pub total_files: usize,
    pub current_file: usize,
    pub current_file_name: String,
    pub elapsed_ms: u64,
    pub estimated_remaining_ms: u64,
    pub stages: Vec<StageProgress>,
    pub errors: Vec<StageError>,
    /// Milliseconds of wall time per processed file
    pub processing_rate_ms: u64,
    pub success: bool,
    pub is_complete: bool,
}

#[derive(Debug)]
struct Session {
    started: Instant,
    total_files: usize,
    processed: usize,
    current_file: usize,
    current_file_name: String,
    completed: HashMap<Stage, usize>,
    last_stage_time: HashMap<Stage, Duration>,
    file_times: Vec<Duration>,
    errors: Vec<StageError>,
}

impl Session {
    fn new(total_files: usize) -> Self {
        Self {
            started: Instant::now(),
            total_files,
            processed: 0,
            current_file: 0,
            current_file_name: String::new(),
            completed: HashMap::new(),
            last_stage_time: HashMap::new(),
            file_times: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn is_complete(&self) -> bool {
        self.processed >= self.total_files
    }
}

/// Consumes progress events and keeps per-session state.
/// Stage averages are shared across sessions so estimates improve over time.
#[derive(Debug)]
pub struct ProgressTracker {
    sessions: HashMap<String, Session>,
    stage_averages: HashMap<Stage, f64>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let stage_averages = Stage::ALL
            .iter()
            .map(|stage| (*stage, stage.default_duration().as_secs_f64() * 1000.0))
            .collect();
        Self {
            sessions: HashMap::new(),
            stage_averages,
        }
    }

    pub fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::SessionStarted { session, total_files } => {
                info!(session = %session, total_files, "Progress session started");
                self.sessions.insert(session, Session::new(total_files));
            }
            ProgressEvent::StageCompleted {
                session,
                file_index,
                file_name,
                stage,
                elapsed,
                error,
            } => {
                let Some(state) = self.sessions.get_mut(&session) else {
                    warn!(session = %session, "Progress for unknown session");
                    return;
                };
                let done = state.completed.entry(stage).or_insert(0);
                *done = (*done).max((file_index + 1).min(state.total_files));
                state.last_stage_time.insert(stage, elapsed);
                state.current_file = file_index;
                state.current_file_name = file_name.clone();
                if let Some(error) = error {
                    state.errors.push(StageError {
                        file_index,
                        file_name,
                        stage,
                        error,
                    });
                }

                let average = self.stage_averages.entry(stage).or_insert(0.0);
                *average = *average * AVERAGE_DECAY + elapsed.as_secs_f64() * 1000.0 * (1.0 - AVERAGE_DECAY);
            }
            ProgressEvent::FileCompleted {
                session,
                file_index,
                elapsed,
                success,
            } => {
                let Some(state) = self.sessions.get_mut(&session) else {
                    warn!(session = %session, "Progress for unknown session");
                    return;
                };
                state.processed += 1;
                state.file_times.push(elapsed);
                for stage in Stage::ALL {
                    let done = state.completed.entry(stage).or_insert(0);
                    *done = (*done).max((file_index + 1).min(state.total_files));
                }
                debug!(session = %session, file_index, success, "File completed");
                if state.is_complete() {
                    info!(
                        session = %session,
                        files = state.processed,
                        errors = state.errors.len(),
                        elapsed_ms = state.started.elapsed().as_millis() as u64,
                        "Progress session completed"
                    );
                }
            }
        }
    }

    /// Average time of one stage in milliseconds
    pub fn stage_average_ms(&self, stage: Stage) -> f64 {
        self.stage_averages.get(&stage).copied().unwrap_or(0.0)
    }

    fn estimated_remaining(&self, session: &Session) -> Duration {
        let remaining_files = session.total_files.saturating_sub(session.processed) as u32;
        if session.file_times.is_empty() {
            let per_file: f64 = Stage::ALL.iter().map(|s| self.stage_average_ms(*s)).sum();
            return Duration::from_secs_f64(per_file / 1000.0) * remaining_files;
        }
        let total: Duration = session.file_times.iter().sum();
        let mean = total / session.file_times.len() as u32;
        mean * remaining_files
    }

    pub fn snapshot(&self, session_id: &str) -> Option<ProgressSnapshot> {
        let session = self.sessions.get(session_id)?;
        let elapsed = session.started.elapsed();
        let total = session.total_files.max(1);

        let stages: Vec<StageProgress> = Stage::ALL
            .iter()
            .map(|stage| {
                let completed = session.completed.get(stage).copied().unwrap_or(0);
                StageProgress {
                    stage: *stage,
                    completed,
                    total: session.total_files,
                    percent: ((completed as f64 / total as f64) * 100.0).round() as u32,
                    average_ms: self.stage_average_ms(*stage).round() as u64,
                    last_ms: session.last_stage_time.get(stage).map(|d| d.as_millis() as u64),
                }
            })
            .collect();

        let completed_steps: usize = stages.iter().map(|s| s.completed).sum();
        let total_steps = total * Stage::ALL.len();
        let overall = ((completed_steps as f64 / total_steps as f64) * 100.0).min(100.0).round() as u32;

        let processing_rate_ms = if session.processed > 0 {
            elapsed.as_millis() as u64 / session.processed as u64
        } else {
            0
        };

        Some(ProgressSnapshot {
            session: session_id.to_string(),
            overall_percent: overall,
            files_processed: session.processed,
            total_files: session.total_files,
            current_file: session.current_file + 1,
            current_file_name: session.current_file_name.clone(),
            elapsed_ms: elapsed.as_millis() as u64,
            estimated_remaining_ms: self.estimated_remaining(session).as_millis() as u64,
            stages,
            errors: session.errors.clone(),
            processing_rate_ms,
            success: session.errors.is_empty(),
            is_complete: session.is_complete(),
        })
    }

    /// Forget a finished session
    pub fn remove_session(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Drain the channel until every sender is dropped
    pub async fn run(mut self, mut receiver: ProgressReceiver) -> Self {
        while let Some(event) = receiver.recv().await {
            self.apply(event);
        }
        self
    }
}
