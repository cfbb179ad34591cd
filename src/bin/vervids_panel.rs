//! Terminal front end for vervids.
//! Confirms the relay and the background API are up (starting them if
//! needed), runs `vervids` once, then reads commands from stdin.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use vervids_relay::config::{config_dir, PanelConfig};
use vervids_relay::history::HISTORY_FILE;
use vervids_relay::panel::{help_lines, render_project, LineKind, OutputLine, PanelSession};
use vervids_relay::project_path::ProjectPath;

#[derive(Debug, Parser)]
#[command(name = "vervids-panel", author, version, about)]
struct Cli {
    /// Raw result of the host bridge's getProjectFilePath()
    #[arg(long, env = "VERVIDS_PROJECT")]
    project: Option<String>,

    #[arg(long, env = "VERVIDS_RELAY_URL")]
    relay_url: Option<String>,

    #[arg(long, env = "VERVIDS_API_URL")]
    api_url: Option<String>,

    /// Extension install directory, used to find the relay binary
    #[arg(long, env = "VERVIDS_EXTENSION_DIR")]
    extension_dir: Option<std::path::PathBuf>,

    /// Probes per liveness cycle
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Run a single command and exit instead of reading stdin
    #[arg(long, short)]
    command: Option<String>,

    /// Don't persist command history
    #[arg(long)]
    no_history: bool,
}

impl Cli {
    fn apply(&self, mut config: PanelConfig) -> PanelConfig {
        if let Some(url) = &self.relay_url {
            config.relay_url = url.clone();
        }
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if let Some(dir) = &self.extension_dir {
            config.extension_dir = Some(dir.clone());
        }
        if let Some(n) = self.max_attempts {
            config.max_attempts = n;
        }
        config
    }
}

fn print_lines(lines: &[OutputLine]) {
    let mut out = std::io::stdout().lock();
    for line in lines {
        let marker = match line.kind {
            LineKind::Info => "  ",
            LineKind::Success => "✓ ",
            LineKind::Error => "✗ ",
        };
        for (i, text) in line.text.lines().enumerate() {
            let prefix = if i == 0 { marker } else { "  " };
            let _ = writeln!(out, "{prefix}{text}");
        }
        if line.text.is_empty() {
            let _ = writeln!(out);
        }
    }
    let _ = out.flush();
}

fn prompt() {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "vervids> ");
    let _ = out.flush();
}

#[tokio::main]
async fn main() -> Result<()> {
    vervids_relay::init_tracing("warn");

    let cli = Cli::parse();
    let config = cli.apply(PanelConfig::load());
    let project = ProjectPath::parse(cli.project.as_deref().unwrap_or("null"));
    let history_path = (!cli.no_history).then(|| config_dir().join(HISTORY_FILE));

    let mut session = PanelSession::new(config, project.clone(), history_path)
        .map_err(anyhow::Error::msg)
        .context("invalid panel configuration")?;

    print_lines(&render_project(&project));
    let (conn, lines) = session.connect().await;
    print_lines(&lines);

    if let Some(command) = &cli.command {
        let reply = session.submit(command).await;
        print_lines(&reply.lines);
        return Ok(());
    }

    if conn.relay {
        print_lines(&session.execute("vervids").await);
    }
    print_lines(&help_lines());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let line = tokio::select! {
            line = stdin.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let reply = session.submit(&line).await;
        print_lines(&reply.lines);
        if reply.quit {
            break;
        }
    }
    Ok(())
}
