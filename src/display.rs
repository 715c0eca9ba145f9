//! Colored terminal transcript of the conversation.

use std::collections::HashMap;
use std::io::{self, Write};

use crossterm::style::{Color, Stylize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::scheduler::{SchedulerEvent, StopReason};

/// Parse a color name such as `"magenta"` or `"dark_cyan"`.
pub fn parse_color(name: &str) -> Option<Color> {
    Color::try_from(name.trim().to_lowercase().as_str()).ok()
}

pub struct Transcript {
    colors: HashMap<String, Color>,
    verbose: bool,
}

impl Transcript {
    /// Colors pair up with participants by position. Unknown names print uncolored.
    pub fn new(participants: &[String], colors: &[String]) -> Self {
        let colors = participants
            .iter()
            .zip(colors)
            .filter_map(|(p, c)| parse_color(c).map(|color| (p.clone(), color)))
            .collect();
        Self {
            colors,
            verbose: false,
        }
    }

    /// Also show writing flags, run changes and anomalies.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn color_for(&self, participant: &str) -> Color {
        self.colors.get(participant).copied().unwrap_or(Color::Reset)
    }

    /// The line printed for `event`, if any.
    pub fn render(&self, event: &SchedulerEvent) -> Option<String> {
        match event {
            SchedulerEvent::TurnPublished { turn, .. } => {
                let color = self.color_for(&turn.sender);
                let mut line = format!("{}> {}", turn.sender, turn.text.as_str().with(color));
                if let Some(image) = &turn.image {
                    line.push_str(&format!(" [{}]", image.alt).with(color).to_string());
                }
                Some(line)
            }
            SchedulerEvent::Stopped(reason) => Some(
                match reason {
                    StopReason::Cancelled => "-- conversation cancelled",
                    StopReason::RunBudgetExhausted => "-- all runs finished",
                    StopReason::ReplayFinished => "-- replay finished",
                }
                .to_string(),
            ),
            _ if !self.verbose => None,
            SchedulerEvent::WritingChanged {
                participant,
                writing: true,
            } => Some(format!("   {} is writing...", participant).dark_grey().to_string()),
            SchedulerEvent::WritingChanged { .. } => None,
            SchedulerEvent::RunStarted { seed, length } => Some(
                format!("-- new run ({} turns): {}", length, seed.trim_end())
                    .dark_grey()
                    .to_string(),
            ),
            SchedulerEvent::InvalidGeneration { .. } => {
                Some("   (discarded an invalid generation)".dark_yellow().to_string())
            }
            SchedulerEvent::ImageStarved {
                participant,
                attempt,
            } => Some(
                format!("   waiting for a selfie of {} ({})", participant, attempt)
                    .dark_yellow()
                    .to_string(),
            ),
        }
    }

    /// Print events until the scheduler drops its sender.
    pub fn spawn(self, mut rx: mpsc::UnboundedReceiver<SchedulerEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Some(line) = self.render(&event) {
                    let mut out = io::stdout().lock();
                    let _ = writeln!(out, "{}", line);
                    let _ = out.flush();
                }
            }
        })
    }
}
