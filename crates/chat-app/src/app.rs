use chatline_core::LoadingState;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use crate::chat::{ChatSession, render_item, render_loading};

enum Step {
    Event { more: bool },
    LoadingChanged,
    Interrupted,
}

/// Line-oriented chat shell: one question per input line, the answer and the loading
/// line written to `output`.
pub struct ChatApp {
    session: ChatSession,
    loading_rx: watch::Receiver<LoadingState>,
    // Rendered text of every item already written, used to find the first changed one.
    printed: Vec<String>,
}

impl ChatApp {
    pub fn new(session: ChatSession) -> Self {
        let loading_rx = session.subscribe_loading();
        Self {
            session,
            loading_rx,
            printed: Vec::new(),
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Runs until EOF or Ctrl-C while idle. Ctrl-C during an answer stops that answer.
    pub async fn run<R, W>(&mut self, input: R, output: &mut W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
        // One listener for the whole run; tokio keeps SIGINT routed to it from now on.
        let listener = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if interrupt_tx.send(()).is_err() {
                    break;
                }
            }
        });

        let result = self.run_with_interrupts(input, output, interrupt_rx).await;
        listener.abort();
        result
    }

    /// Same as [`ChatApp::run`] with interrupts delivered through `interrupts`.
    pub async fn run_with_interrupts<R, W>(
        &mut self,
        input: R,
        output: &mut W,
        mut interrupts: mpsc::UnboundedReceiver<()>,
    ) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                Some(()) = interrupts.recv() => {
                    tracing::info!("interrupted while idle, exiting");
                    break;
                }
            };
            let Some(line) = line else {
                break;
            };

            let question = line.trim();
            if question.is_empty() {
                continue;
            }

            match self.session.submit(question) {
                Ok(_) => self.drive(output, &mut interrupts).await?,
                Err(error) => {
                    tracing::warn!("question rejected: {error}");
                    write_line(output, &format!("error: {error}")).await?;
                }
            }
            self.print_changed_items(output).await?;
        }

        self.session.flush_records().await;
        output.flush().await
    }

    async fn drive<W>(
        &mut self,
        output: &mut W,
        interrupts: &mut mpsc::UnboundedReceiver<()>,
    ) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let initial = self.loading_rx.borrow_and_update().clone();
        if let Some(line) = render_loading(&initial) {
            write_line(output, &line).await?;
        }

        loop {
            let step = tokio::select! {
                more = self.session.pump() => Step::Event { more },
                changed = self.loading_rx.changed() => match changed {
                    Ok(()) => Step::LoadingChanged,
                    Err(_) => Step::Event { more: false },
                },
                Some(()) = interrupts.recv() => Step::Interrupted,
            };

            match step {
                Step::Event { more: true } => {}
                Step::Event { more: false } => break,
                Step::LoadingChanged => {
                    let state = self.loading_rx.borrow_and_update().clone();
                    if let Some(line) = render_loading(&state) {
                        write_line(output, &line).await?;
                    }
                }
                Step::Interrupted => {
                    if self.session.stop() {
                        tracing::info!("answer stopped by user");
                    }
                }
            }
        }

        if let Some(message) = self.session.last_error() {
            write_line(output, &format!("error: {message}")).await?;
        }
        Ok(())
    }

    // Surplus payloads move to the newest turn, so an already printed item can change;
    // everything from the first changed item onward is written again.
    async fn print_changed_items<W>(&mut self, output: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let rendered = self
            .session
            .rendered()
            .iter()
            .map(render_item)
            .collect::<Vec<_>>();
        let unchanged = self
            .printed
            .iter()
            .zip(&rendered)
            .take_while(|(printed, current)| printed == current)
            .count();

        for line in &rendered[unchanged..] {
            write_line(output, line).await?;
        }
        self.printed = rendered;
        output.flush().await
    }
}

async fn write_line<W>(output: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await
}
