//! Console output for published snapshots.

use std::{
    fmt::Write as _,
    io::{self, Write},
    time::SystemTime,
};

use serde::Serialize;

use crate::{
    config::OutputFormat,
    dto::{
        format_system_time,
        leaderboard::{RankedEntry, Snapshot},
    },
};

/// Receives every snapshot the controller publishes.
pub trait SnapshotRenderer: Send + Sync {
    /// Render `snapshot`. Failures are logged by the caller and never stop observation.
    fn render(&self, snapshot: &Snapshot) -> io::Result<()>;
}

/// Writes snapshots to standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleRenderer {
    format: OutputFormat,
}

#[derive(Serialize)]
struct JsonFrame<'a> {
    rendered_at: String,
    #[serde(flatten)]
    snapshot: &'a Snapshot,
}

impl ConsoleRenderer {
    /// Renderer writing `format` frames.
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Format `snapshot` without writing it anywhere.
    pub fn format(&self, snapshot: &Snapshot) -> io::Result<String> {
        match self.format {
            OutputFormat::Text => Ok(format_text(snapshot)),
            OutputFormat::Json => {
                let frame = JsonFrame {
                    rendered_at: format_system_time(SystemTime::now()),
                    snapshot,
                };
                let mut line = serde_json::to_string(&frame).map_err(io::Error::other)?;
                line.push('\n');
                Ok(line)
            }
        }
    }
}

impl SnapshotRenderer for ConsoleRenderer {
    fn render(&self, snapshot: &Snapshot) -> io::Result<()> {
        let text = self.format(snapshot)?;
        let mut out = io::stdout().lock();
        out.write_all(text.as_bytes())?;
        out.flush()
    }
}

fn format_text(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    write_section(&mut out, "Most recent scores", &snapshot.recent_scores);
    out.push('\n');
    write_section(&mut out, "Highest scores", &snapshot.top_scores);
    out.push('\n');
    out
}

fn write_section(out: &mut String, title: &str, entries: &[RankedEntry]) {
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "-".repeat(title.len()));
    for entry in entries {
        let marker = if entry.online { " **" } else { "" };
        let _ = writeln!(out, "{}\t{}{marker}", entry.player, entry.score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(player: &str, timestamp: i64, score: i32, online: bool) -> RankedEntry {
        RankedEntry {
            player: player.into(),
            timestamp,
            score,
            online,
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            recent_scores: vec![entry("bob", 200, 30, true), entry("alice", 100, 10, false)],
            top_scores: vec![entry("bob", 200, 30, true)],
        }
    }

    #[test]
    fn text_lists_both_projections_and_marks_online_players() {
        let text = ConsoleRenderer::new(OutputFormat::Text)
            .format(&snapshot())
            .unwrap();

        assert_eq!(
            text,
            "Most recent scores\n\
             ------------------\n\
             bob\t30 **\n\
             alice\t10\n\
             \n\
             Highest scores\n\
             --------------\n\
             bob\t30 **\n\
             \n"
        );
    }

    #[test]
    fn empty_snapshot_still_prints_headers() {
        let text = ConsoleRenderer::default()
            .format(&Snapshot::default())
            .unwrap();
        assert!(text.starts_with("Most recent scores\n------------------\n\nHighest scores"));
    }

    #[test]
    fn json_frame_is_a_single_line_with_timestamp() {
        let line = ConsoleRenderer::new(OutputFormat::Json)
            .format(&snapshot())
            .unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert!(value["rendered_at"].as_str().is_some());
        assert_eq!(value["recent_scores"][0]["player"], "bob");
        assert_eq!(value["recent_scores"][0]["online"], true);
        assert_eq!(value["top_scores"].as_array().unwrap().len(), 1);
    }
}
