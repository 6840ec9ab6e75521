//! Single-line terminal progress display for a check run

use crate::proxy::counters::{ProgressSnapshot, RunCounters};
use crossterm::{
    cursor::MoveToColumn,
    execute,
    style::Print,
    terminal::{Clear, ClearType},
};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::debug;

/// How often the counters are polled
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Number of cells in the progress bar
const BAR_WIDTH: usize = 50;

/// Render one progress line, e.g.
/// `Progress: [=====>      ] 10.0% (5/50) available: 2`
pub fn render_line(snapshot: &ProgressSnapshot) -> String {
    let percent = snapshot.percent();
    let filled = ((percent / 100.0 * BAR_WIDTH as f64) as usize).min(BAR_WIDTH - 1);
    let bar = format!("{}>", "=".repeat(filled));

    format!(
        "Progress: [{:<width$}] {:.1}% ({}/{}) available: {}",
        bar,
        percent,
        snapshot.attempted,
        snapshot.total,
        snapshot.available,
        width = BAR_WIDTH
    )
}

/// Background task redrawing the progress line until stopped
#[derive(Debug)]
pub struct ProgressReporter {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    /// Start polling `counters` and drawing to stderr
    pub fn spawn(counters: Arc<RunCounters>) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => draw(&counters.snapshot()),
                }
            }

            draw(&counters.snapshot());
            eprintln!();
        });

        Self { stop_tx, handle }
    }

    /// Draw the final state and wait for the task to finish
    pub async fn stop(self) {
        // The task may already be gone if drawing panicked
        let _ = self.stop_tx.send(());
        if let Err(e) = self.handle.await {
            debug!("progress reporter ended abnormally: {}", e);
        }
    }
}

fn draw(snapshot: &ProgressSnapshot) {
    let mut stderr = io::stderr();
    let drawn = execute!(
        stderr,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(render_line(snapshot))
    )
    .and_then(|_| stderr.flush());

    if let Err(e) = drawn {
        debug!("failed to draw progress: {}", e);
    }
}
