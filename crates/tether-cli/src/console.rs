//! Interactive prompt.
//!
//! One command per line. Requests run one at a time; the prompt waits for
//! each result before reading the next line.

use std::io::{self, Write};
use std::time::Instant;

use tether_net::{ConnectionManager, RequestKind};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

const HELP: &str = "\
commands:
  count   ask the server for its counter
  time    ask the server for its clock
  status  show the connection state
  help    show this text
  quit    log out and exit";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a request of the given kind.
    Request(RequestKind),
    /// Print the connection snapshot.
    Status,
    /// Print the command list.
    Help,
    /// Log out and leave.
    Quit,
    /// Blank line.
    Empty,
    /// Anything else.
    Unknown(String),
}

/// Parse one input line. Case and surrounding whitespace are ignored.
pub fn parse_command(line: &str) -> Command {
    let word = line.trim().to_ascii_lowercase();
    match word.as_str() {
        "" => Command::Empty,
        "count" => Command::Request(RequestKind::Count),
        "time" => Command::Request(RequestKind::Time),
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(word),
    }
}

/// Log in as `identity`, asking whether to retry after each failure.
///
/// Returns `false` when the user declines to retry or input ends.
pub async fn login_with_retry<R, W>(
    manager: &ConnectionManager,
    identity: &str,
    input: &mut Lines<R>,
    out: &mut W,
) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    loop {
        match manager.login(identity).await {
            Ok(info) => {
                writeln!(out, "logged in as {identity} on {}", info.endpoint)?;
                return Ok(true);
            }
            Err(e) => {
                write!(out, "login failed: {e}\nretry? [y/N] ")?;
                out.flush()?;
                let answer = input.next_line().await?.unwrap_or_default();
                if !answer.trim().eq_ignore_ascii_case("y") {
                    return Ok(false);
                }
            }
        }
    }
}

/// Run the prompt until `quit` or end of input, then log out.
pub async fn run<R, W>(manager: &ConnectionManager, input: &mut Lines<R>, out: &mut W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "type 'help' for commands")?;
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = input.next_line().await? else {
            writeln!(out)?;
            break;
        };

        match parse_command(&line) {
            Command::Empty => {}
            Command::Request(kind) => {
                let started = Instant::now();
                let result = manager.request(kind, Default::default()).await;
                let elapsed = started.elapsed().as_millis();
                match result {
                    Ok(response) => writeln!(out, "{response} ({elapsed} ms)")?,
                    Err(e) => writeln!(out, "{kind} failed: {e} ({elapsed} ms)")?,
                }
            }
            Command::Status => {
                let info = manager.info();
                writeln!(
                    out,
                    "state: {:?}\nidentity: {}\nendpoint: {}\ngeneration: {}\nresets: {}\npending: {}",
                    info.state,
                    info.identity.as_deref().unwrap_or("-"),
                    info.endpoint,
                    info.generation,
                    manager.reset_count(),
                    manager.pending_len(),
                )?;
                if let Some(error) = manager.last_error() {
                    writeln!(out, "last error: {error}")?;
                }
            }
            Command::Help => writeln!(out, "{HELP}")?,
            Command::Unknown(word) => writeln!(out, "unknown command {word:?}\n{HELP}")?,
            Command::Quit => break,
        }
    }

    manager.logout();
    tracing::info!("Console closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tether_log::NullEventLog;
    use tether_net::ClientConfig;
    use tokio::io::BufReader;
    use tokio::net::TcpListener;

    fn lines(text: &'static str) -> Lines<BufReader<&'static [u8]>> {
        BufReader::new(text.as_bytes()).lines()
    }

    fn idle_manager() -> ConnectionManager {
        ConnectionManager::new(ClientConfig::default(), Arc::new(NullEventLog))
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("count"), Command::Request(RequestKind::Count));
        assert_eq!(parse_command("  TIME \n"), Command::Request(RequestKind::Time));
        assert_eq!(parse_command("status"), Command::Status);
        assert_eq!(parse_command("help"), Command::Help);
        assert_eq!(parse_command("quit"), Command::Quit);
        assert_eq!(parse_command("exit"), Command::Quit);
        assert_eq!(parse_command("   "), Command::Empty);
        assert_eq!(
            parse_command("login"),
            Command::Unknown("login".to_string())
        );
    }

    #[tokio::test]
    async fn test_session_reports_errors_and_help() {
        let manager = idle_manager();
        let mut out = Vec::new();
        run(&manager, &mut lines("count\nbogus\nstatus\nquit\ncount\n"), &mut out)
            .await
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("count failed: not logged in"));
        assert!(text.contains("unknown command \"bogus\""));
        assert!(text.contains("state: Disconnected"));
        // Nothing after quit is executed.
        assert_eq!(text.matches("failed").count(), 1);
    }

    #[tokio::test]
    async fn test_end_of_input_logs_out() {
        let manager = idle_manager();
        let mut out = Vec::new();
        run(&manager, &mut lines("help\n"), &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("ask the server for its clock"));
        assert!(!manager.is_logged_in());
    }

    #[tokio::test]
    async fn test_declined_retry_gives_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let manager = ConnectionManager::new(
            ClientConfig {
                endpoint: addr.to_string(),
                connect_timeout: Duration::from_secs(1),
                ..Default::default()
            },
            Arc::new(NullEventLog),
        );

        let mut out = Vec::new();
        let logged_in = login_with_retry(&manager, "alice", &mut lines("y\nn\n"), &mut out)
            .await
            .unwrap();

        assert!(!logged_in);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("login failed").count(), 2);
    }
}
