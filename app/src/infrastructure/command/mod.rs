mod local;
mod ssh_proxy;

use std::io;
use std::process::Stdio;

use domain::{error::TransportError, service::CommandOutput};
use tokio::{io::AsyncWriteExt, process::Command};

pub use self::{local::LocalTransport, ssh_proxy::SshTransport};

/// Run `command` to completion, feeding `stdin` if given.
///
/// Only a failure to launch or to talk to the process is an error; the exit
/// code is part of the output.
async fn run(
    mut command: Command,
    stdin: Option<&str>,
    display: &str,
) -> Result<CommandOutput, TransportError> {
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| TransportError::Launch {
        command: display.to_owned(),
        source,
    })?;

    // Written from a separate task so a chatty process cannot block on a full stdout pipe.
    let writer = child
        .stdin
        .take()
        .zip(stdin.map(str::to_owned))
        .map(|(mut pipe, input)| {
            tokio::spawn(async move { pipe.write_all(input.as_bytes()).await })
        });

    let output = child.wait_with_output().await?;
    if let Some(writer) = writer {
        match writer.await.map_err(io::Error::other)? {
            Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e.into()),
            _ => (),
        }
    }

    Ok(CommandOutput::new(
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    ))
}
