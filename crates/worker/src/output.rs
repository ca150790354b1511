// Output formatting for CLI

use anyhow::Result;
use scout_durable::{MatchDetail, RankedMatch, TaskProgress, TaskSnapshot};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn print_value<T: Serialize>(&self, value: &T) -> Result<()> {
        if let OutputFormat::Json = self {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        Ok(())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, OutputFormat::Text)
    }
}

/// Print a simple key-value pair for text output
pub fn print_field(label: &str, value: &str) {
    println!("{:<14} {}", format!("{}:", label), value);
}

pub fn progress_line(snapshot: &TaskSnapshot) -> String {
    let progress = match snapshot.progress {
        TaskProgress::ContributorsMatch {
            sources_done,
            sources_total,
        } => format!("sources {sources_done}/{sources_total}"),
        TaskProgress::ProfilesMatch { page, companies } => {
            format!("page {page}, {companies} companies")
        }
    };
    format!(
        "{} {}: {} matches, {}",
        snapshot.kind, snapshot.status, snapshot.indexed_count, progress
    )
}

pub fn print_snapshot(snapshot: &TaskSnapshot) {
    print_field("Task", &snapshot.task_id.to_string());
    print_field("Query", &snapshot.query_id.to_string());
    print_field("Kind", snapshot.kind);
    print_field("Status", snapshot.status.as_str());
    print_field("Matches", &snapshot.indexed_count.to_string());
    print_field("Progress", &progress_line(snapshot));
}

pub fn print_matches(matches: &[RankedMatch]) {
    if matches.is_empty() {
        println!("No matches.");
        return;
    }

    for (rank, m) in matches.iter().enumerate() {
        let (title, link) = match &m.detail {
            MatchDetail::Contributor(c) => (
                c.profile.name.clone().unwrap_or_else(|| m.subject.clone()),
                c.profile.html_url.as_str(),
            ),
            MatchDetail::Profile(p) => (p.full_name.clone(), p.html_url.as_str()),
        };
        let rating = m
            .rating
            .map(|r| format!("{r:.1}"))
            .unwrap_or_else(|| "-".to_string());

        println!("{:>3}. {title} [{rating}] {link}", rank + 1);
        if let MatchDetail::Contributor(c) = &m.detail {
            if let Some(email) = &c.profile.email {
                println!("     {email}, {} contributions", c.total_contributions);
            }
        }
        if let Some(summary) = m.summary.as_deref().filter(|s| !s.is_empty()) {
            println!("     {summary}");
        }
    }
}
