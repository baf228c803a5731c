use anyhow::Result;
use log::debug;
use std::io::{self, BufRead, Write};
use tokio::sync::mpsc;

use crate::{
    api::GenerationRequest,
    http::ImageApi,
    tracker::CancelFlag,
    workflow,
};

use super::print_result;

/// Read prompts line by line and generate each one synchronously.
///
/// The loop ends on `quit`, `exit`, end of input or `cancel`. Generation
/// errors are reported and the loop carries on; only I/O errors on
/// `input`/`output` end it early.
pub async fn interactive<A, R, W>(
    api: &A,
    input: R,
    output: &mut W,
    cancel: &CancelFlag,
) -> Result<()>
where
    A: ImageApi,
    R: BufRead + Send + 'static,
    W: Write,
{
    writeln!(output, "Enter a prompt to generate images, or 'quit' to exit.")?;

    let mut lines = spawn_line_reader(input);
    loop {
        write!(output, "prompt> ")?;
        output.flush()?;

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = lines.recv() => next,
        };
        let line = match next {
            Some(line) => line?,
            None => {
                writeln!(output)?;
                break;
            }
        };
        let prompt = line.trim();

        if is_exit_command(prompt) {
            break;
        }
        if prompt.is_empty() {
            writeln!(output, "Please enter a non-empty prompt.")?;
            continue;
        }

        debug!("Interactive prompt: {}", prompt);
        writeln!(output, "Generating...")?;
        let request = GenerationRequest::new(prompt);
        let generated = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                writeln!(output)?;
                break;
            }
            generated = workflow::generate_sync(api, &request) => generated,
        };
        match generated {
            Ok(result) => print_result(output, &result)?,
            Err(e) => writeln!(output, "Generation failed: {:#}", e)?,
        }
    }

    writeln!(output, "Bye.")?;
    Ok(())
}

/// Reads `input` on a detached thread; a read still blocked when the loop
/// ends does not hold up runtime shutdown.
fn spawn_line_reader<R>(input: R) -> mpsc::Receiver<io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        for line in input.lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn is_exit_command(input: &str) -> bool {
    input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit")
}
