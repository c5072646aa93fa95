use anyhow::{Result, bail};
use console::style;

use crate::core::terminal::GuideSection;

/// Splits buffered SSE text into complete `data:` payloads, leaving any
/// partial line in `buffer`.
pub(crate) fn drain_events(buffer: &mut String) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(data) = line.strip_prefix("data:") {
            out.push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
    }
    out
}

pub async fn follow_logs(host: &str, port: u16) -> Result<()> {
    let url = format!("http://{}:{}/api/logs", host, port);
    let mut response = match reqwest::get(&url).await {
        Ok(res) if res.status().is_success() => res,
        Ok(res) => bail!("Log stream refused: HTTP {}", res.status()),
        Err(_) => {
            GuideSection::new("Live Logs")
                .text("The host is not running.")
                .blank()
                .text(&format!(
                    "Run {} to start it.",
                    style("bidpilot serve").cyan().bold()
                ))
                .print();
            println!();
            return Ok(());
        }
    };

    GuideSection::new("Live Logs")
        .text(&format!(
            "Following {} - press {} to stop.",
            style(&url).cyan(),
            style("Ctrl+C").bold().yellow()
        ))
        .print();
    println!();

    let mut buffer = String::new();
    while let Some(chunk) = response.chunk().await? {
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        for line in drain_events(&mut buffer) {
            if !line.is_empty() {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::drain_events;

    #[test]
    fn complete_data_lines_are_extracted() {
        let mut buffer = "data: first\n\ndata: sec".to_string();
        assert_eq!(drain_events(&mut buffer), vec!["first"]);
        assert_eq!(buffer, "data: sec");

        buffer.push_str("ond\r\n: keep-alive\n\n");
        assert_eq!(drain_events(&mut buffer), vec!["second"]);
        assert!(buffer.is_empty());
    }
}
