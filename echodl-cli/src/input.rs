use std::io::IsTerminal;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    terminal,
};
use lecture_engine::CancellationToken;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Listens for `q` (or Ctrl-C, which raw mode turns into a key press) and
/// cancels `token`. Returns `None` when stdin is not a terminal.
///
/// The listener stops on its own once the token is cancelled, restoring the
/// terminal mode.
pub fn spawn_input_handler(token: CancellationToken) -> Option<JoinHandle<()>> {
    if !std::io::stdin().is_terminal() {
        return None;
    }
    Some(tokio::task::spawn_blocking(move || listen(token)))
}

fn listen(token: CancellationToken) {
    if terminal::enable_raw_mode().is_err() {
        info!("Failed to enable raw mode. Press Ctrl-C to stop.");
        return;
    }

    while !token.is_cancelled() {
        if let Ok(true) = event::poll(Duration::from_millis(100))
            && let Ok(Event::Key(KeyEvent {
                code, modifiers, ..
            })) = event::read()
        {
            let quit = matches!(code, KeyCode::Char('q') | KeyCode::Esc)
                || (code == KeyCode::Char('c') && modifiers.contains(KeyModifiers::CONTROL));
            if quit {
                warn!("Cancellation requested, finishing in-flight transfers...");
                token.cancel();
            }
        }
    }

    if terminal::disable_raw_mode().is_err() {
        info!("Failed to disable raw mode.");
    }
}

/// Cancels `token` on Ctrl-C when the terminal is not in raw mode.
pub fn spawn_signal_handler(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    warn!("Interrupted, finishing in-flight transfers...");
                    token.cancel();
                }
            }
        }
    })
}
