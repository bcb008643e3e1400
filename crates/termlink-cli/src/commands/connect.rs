//! `termlink connect [url]`: line-mode interactive session.
//!
//! Connects, opens a PTY sized to the local terminal and attaches to it.
//! Every line typed is sanitized and sent to the attached session with a
//! trailing newline. Lines starting with `:` are local commands (`:help`
//! lists them); start a line with `::` to send a literal leading colon.

use std::io::Write;

use anyhow::{Context, Result};
use termlink_client::{
    InputMode, SessionEvent, SessionId, SessionOptions, SessionTransport, TransportConfig,
    TransportEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

const HELP: &str = "\
local commands:
  :new               open a new session and attach to it
  :attach <id>       attach to a session (buffered output is replayed)
  :detach            stop showing output
  :sessions          list sessions
  :close [id]        close a session (default: the attached one)
  :exec <command>    run a command via the host's command channel
  :raw <text>        send text WITHOUT sanitization
  :score <command>   show the advisory safety score
  :audit [json]      show recent sanitizer decisions
  :quit              disconnect and exit";

/// A parsed input line.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Input(&'a str),
    New,
    Attach(&'a str),
    Detach,
    Sessions,
    Close(Option<&'a str>),
    Exec(&'a str),
    Raw(&'a str),
    Score(&'a str),
    Audit { json: bool },
    Help,
    Quit,
    Unknown(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn parse_line(line: &str) -> Line<'_> {
    if line.starts_with("::") {
        // Keep one colon.
        return Line::Input(&line[1..]);
    }
    let Some(rest) = line.strip_prefix(':') else {
        return Line::Input(line);
    };
    let (cmd, arg) = match rest.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (rest.trim(), ""),
    };
    match (cmd, arg) {
        ("new", _) => Line::New,
        ("attach", id) if !id.is_empty() => Line::Attach(id),
        ("detach", _) => Line::Detach,
        ("sessions" | "ls", _) => Line::Sessions,
        ("close", "") => Line::Close(None),
        ("close", id) => Line::Close(Some(id)),
        ("exec", command) if !command.is_empty() => Line::Exec(command),
        ("raw", text) => Line::Raw(text),
        ("score", command) => Line::Score(command),
        ("audit", "json") => Line::Audit { json: true },
        ("audit", _) => Line::Audit { json: false },
        ("help" | "h" | "?", _) => Line::Help,
        ("quit" | "q" | "exit", _) => Line::Quit,
        (other, _) => Line::Unknown(other),
    }
}

/// Run the interactive loop until `:quit`, end of input, or a fatal
/// connection error.
pub async fn run(config: TransportConfig, options: SessionOptions) -> Result<()> {
    let url = config.url.clone();
    let (transport, mut events) =
        SessionTransport::new(config).context("invalid transport configuration")?;

    info!(url = %url, "connecting");
    transport
        .connect()
        .await
        .with_context(|| format!("failed to connect to {url}"))?;

    let session = open_session(&transport, &options).await?;
    eprintln!("[connected to {url}, session {session} attached; :help for commands]");
    let mut current = Some(session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                match handle_line(&transport, &mut current, &options, &line).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => break,
                    Err(e) => eprintln!("termlink: {e:#}"),
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if render(&event, &mut current) == Flow::Quit {
                    break;
                }
            }
        }
    }

    transport.disconnect().await?;
    Ok(())
}

async fn open_session(transport: &SessionTransport, options: &SessionOptions) -> Result<SessionId> {
    let session = transport
        .create_session(options.clone())
        .await
        .context("failed to create session")?;
    transport.attach(&session).await?;
    Ok(session)
}

fn require(current: &Option<SessionId>) -> Result<&SessionId> {
    current
        .as_ref()
        .context("no session attached (use :new or :attach <id>)")
}

async fn handle_line(
    transport: &SessionTransport,
    current: &mut Option<SessionId>,
    options: &SessionOptions,
    line: &str,
) -> Result<Flow> {
    match parse_line(line) {
        Line::Input(text) => {
            let session = require(current)?;
            transport
                .send_input(session, &format!("{text}\n"), InputMode::Sanitized)
                .await?;
        }
        Line::Raw(text) => {
            let session = require(current)?;
            transport
                .send_input(session, &format!("{text}\n"), InputMode::Raw)
                .await?;
        }
        Line::Exec(command) => {
            let session = require(current)?;
            transport.execute(session, command).await?;
        }
        Line::New => {
            let session = open_session(transport, options).await?;
            eprintln!("[session {session} attached]");
            *current = Some(session);
        }
        Line::Attach(id) => {
            let session = SessionId::new(id);
            transport.attach(&session).await?;
            eprintln!("[session {session} attached]");
            *current = Some(session);
        }
        Line::Detach => {
            if let Some(session) = transport.detach().await? {
                eprintln!("[session {session} detached]");
            }
            *current = None;
        }
        Line::Sessions => {
            for info in transport.sessions().await? {
                let marker = if info.attached { "*" } else { " " };
                let status = match (info.closed, info.exit_code) {
                    (false, _) => "running".to_string(),
                    (true, Some(code)) => format!("exited ({code})"),
                    (true, None) => "exited".to_string(),
                };
                eprintln!(
                    "{marker} {:<16} {}x{}  {status}  buffered={}",
                    info.session_id.as_str(),
                    info.cols,
                    info.rows,
                    info.buffered_chunks
                );
            }
        }
        Line::Close(id) => {
            let session = match id {
                Some(id) => SessionId::new(id),
                None => require(current)?.clone(),
            };
            transport.close_session(&session).await?;
            eprintln!("[session {session} closed]");
            if current.as_ref() == Some(&session) {
                *current = None;
            }
        }
        Line::Score(command) => {
            eprintln!("safety score: {}/100", transport.safety_score(command));
        }
        Line::Audit { json: true } => {
            let jsonl = transport
                .sanitizer()
                .export_audit_log()
                .context("failed to export audit log")?;
            print!("{jsonl}");
        }
        Line::Audit { json: false } => {
            for entry in transport.audit_log().iter().rev().take(20) {
                let verdict = if entry.blocked { "blocked" } else { "allowed" };
                eprintln!(
                    "{} {verdict:<8} {:?} {}",
                    entry.timestamp.format("%H:%M:%S"),
                    entry.original,
                    entry.reason.as_deref().unwrap_or("")
                );
            }
            let stats = transport.sanitizer().audit_stats();
            eprintln!("{} checked, {} blocked", stats.total, stats.blocked);
        }
        Line::Help => eprintln!("{HELP}"),
        Line::Quit => return Ok(Flow::Quit),
        Line::Unknown(cmd) => anyhow::bail!("unknown command :{cmd} (try :help)"),
    }
    Ok(Flow::Continue)
}

fn render(event: &TransportEvent, current: &mut Option<SessionId>) -> Flow {
    match event {
        TransportEvent::PtyOutput { data, .. } => {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(data.as_bytes());
            let _ = stdout.flush();
        }
        TransportEvent::SessionClosed {
            session_id,
            exit_code,
            signal,
        } => {
            let how = match (exit_code, signal) {
                (_, Some(signal)) => format!("killed by {signal}"),
                (Some(code), None) => format!("exit code {code}"),
                (None, None) => "no exit status".to_string(),
            };
            eprintln!("[session {session_id} exited: {how}]");
            if current.as_ref() == Some(session_id) {
                eprintln!("[use :close to discard it, :new for a fresh one]");
            }
        }
        TransportEvent::Reconnecting { attempt, delay } => {
            eprintln!("[connection lost; retry {attempt} in {delay:?}]");
        }
        TransportEvent::Reconnected { .. } => eprintln!("[reconnected]"),
        TransportEvent::Error { message, fatal } => {
            eprintln!("[error: {message}]");
            if *fatal {
                *current = None;
                return Flow::Quit;
            }
        }
        TransportEvent::Session(SessionEvent::Error { message, .. }) => {
            eprintln!("[host error: {message}]");
        }
        TransportEvent::Session(SessionEvent::CommandResult {
            output, exit_code, ..
        }) => {
            if let Some(output) = output {
                print!("{output}");
                let _ = std::io::stdout().flush();
            }
            if let Some(code) = exit_code.filter(|c| *c != 0) {
                eprintln!("[command exited with {code}]");
            }
        }
        other => debug!(event = other.name(), "event"),
    }
    Flow::Continue
}
