//! Operator commands read from the server's stdin.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::broadcast::Dispatcher;
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;

#[derive(Debug, PartialEq, Eq)]
pub enum AdminCommand {
    Help,
    Users,
    Say(String),
    Stop,
}

pub fn parse_admin_command(line: &str) -> Result<AdminCommand, String> {
    let mut parts = line.trim().splitn(2, ' ');

    let cmd = parts.next().unwrap_or("").to_lowercase();

    let rest = parts.next().map(str::trim);

    match cmd.as_str() {
        "/help" => Ok(AdminCommand::Help),
        "/users" => Ok(AdminCommand::Users),
        "/stop" => Ok(AdminCommand::Stop),
        "/say" => {
            let text = rest.filter(|t| !t.is_empty()).ok_or("usage: /say <text>")?;

            Ok(AdminCommand::Say(text.to_string()))
        }
        _ => Err(format!("unknown command: {cmd} (try /help)")),
    }
}

const HELP: &str = "Commands:\n\
                    /users        - list online users\n\
                    /say <text>   - announce to everyone\n\
                    /stop         - shut the relay down\n";

/// Serve operator commands until `/stop` or end of input.
pub async fn run<R, W>(
    input: R,
    mut out: W,
    registry: SessionRegistry,
    dispatcher: Dispatcher,
    shutdown: ShutdownCoordinator,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let cmd = match parse_admin_command(&line) {
            Ok(c) => c,
            Err(e) => {
                out.write_all(format!("[error] {e}\n").as_bytes()).await?;
                continue;
            }
        };

        match cmd {
            AdminCommand::Help => out.write_all(HELP.as_bytes()).await?,

            AdminCommand::Users => {
                let users = registry.usernames();
                out.write_all(
                    format!("online ({}): {}\n", users.len(), users.join(", ")).as_bytes(),
                )
                .await?;
            }

            AdminCommand::Say(text) => {
                let delivery = dispatcher.announce(&text, None);
                out.write_all(format!("[ok] sent to {} session(s)\n", delivery.delivered).as_bytes())
                    .await?;
            }

            AdminCommand::Stop => {
                out.write_all(b"[ok] shutting down\n").await?;
                out.flush().await?;
                shutdown.shutdown();
                return Ok(());
            }
        }

        out.flush().await?;
    }

    Ok(())
}
