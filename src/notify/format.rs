//! HTML message formatting for chat notifications.

use crate::control::ActionOutcome;
use crate::event::{PlaybackStatus, PresenceSnapshot};
use chrono::{DateTime, Local, Utc};

/// Escape text for HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Friendlier label for well-known player ids.
pub fn source_app_label(source_app: Option<&str>) -> String {
    match source_app {
        None => "Unknown App 💻".to_string(),
        Some(app) if app.contains("Spotify") => "Spotify 💚".to_string(),
        Some(app) => app.to_string(),
    }
}

/// `dd/mm/YYYY HH:MM:SS` in the machine's local zone.
pub fn local_time(timestamp: &DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%d/%m/%Y %H:%M:%S")
        .to_string()
}

fn status_line(status: PlaybackStatus) -> String {
    match status {
        PlaybackStatus::Playing => "<b><i>Playing ▶️</i></b>".to_string(),
        PlaybackStatus::Paused => "<b><i>Paused ⏸️</i></b>".to_string(),
        other => format!("<b><i>{}</i></b>", other),
    }
}

/// Presence notification body.
pub fn presence_html(prefix: &str, host: Option<&str>, snapshot: &PresenceSnapshot) -> String {
    let mut lines = Vec::new();

    if let Some(status) = snapshot.playback_status {
        lines.push(status_line(status));
    }

    let title = snapshot.title.as_deref().unwrap_or("Unknown title");
    lines.push(format!("<b>{}</b> {}", escape_html(prefix), escape_html(title)));

    if let Some(artist) = &snapshot.artist {
        lines.push(format!("🎤 <i>{}</i>", escape_html(artist)));
    }

    lines.push(String::new());
    lines.push(format!(
        "<b>App:</b> {}",
        escape_html(&source_app_label(snapshot.source_app.as_deref()))
    ));
    if let Some(host) = host {
        lines.push(format!("<b>Host:</b> <code>{}</code>", escape_html(host)));
    }
    lines.push(format!("🕑 {}", local_time(&snapshot.timestamp)));

    lines.join("\n")
}

/// Control action notification body.
pub fn outcome_html(prefix: &str, outcome: &ActionOutcome) -> String {
    let mut text = format!(
        "<b>{}</b>\n{}",
        escape_html(prefix),
        escape_html(&outcome.summary())
    );
    if let Some(by) = &outcome.issued_by {
        text.push_str(&format!("\n👤 <code>{}</code>", escape_html(by)));
    }
    text.push_str(&format!("\n🕑 {}", local_time(&Utc::now())));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Action;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b>&c"), "a&lt;b&gt;&amp;c");
    }

    #[test]
    fn test_source_app_label() {
        assert_eq!(source_app_label(None), "Unknown App 💻");
        assert_eq!(source_app_label(Some("Spotify.exe")), "Spotify 💚");
        assert_eq!(source_app_label(Some("vlc")), "vlc");
    }

    #[test]
    fn test_presence_html_layout() {
        let snapshot = PresenceSnapshot {
            title: Some("Rock & Roll".to_string()),
            artist: Some("Band".to_string()),
            playback_status: Some(PlaybackStatus::Playing),
            ..PresenceSnapshot::now()
        };

        let html = presence_html("[NowPlaying]", Some("desk-01"), &snapshot);
        let lines: Vec<&str> = html.lines().collect();

        assert_eq!(lines[0], "<b><i>Playing ▶️</i></b>");
        assert_eq!(lines[1], "<b>[NowPlaying]</b> Rock &amp; Roll");
        assert_eq!(lines[2], "🎤 <i>Band</i>");
        assert!(html.contains("<b>App:</b> Unknown App 💻"));
        assert!(html.contains("<code>desk-01</code>"));
        assert!(html.contains("🕑 "));
    }

    #[test]
    fn test_presence_html_without_metadata() {
        let html = presence_html("[P]", None, &PresenceSnapshot::now());
        assert!(html.starts_with("<b>[P]</b> Unknown title"));
        assert!(!html.contains("🎤"));
        assert!(!html.contains("Host:"));
    }

    #[test]
    fn test_outcome_html_mentions_actor() {
        let outcome = ActionOutcome {
            host: "desk-01".to_string(),
            action: Action::Wake,
            issued_by: Some("telegram:42".to_string()),
            succeeded: true,
        };
        let html = outcome_html("[AdminPC]", &outcome);
        assert!(html.contains("NOT unlocked"));
        assert!(html.contains("<code>telegram:42</code>"));
    }
}
