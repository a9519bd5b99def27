//! Terminal consumer of workflow progress updates.

use livecopy_workflow::{ProgressState, ProgressUpdate};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};

/// Print progress from `rx` until every sender is gone. Returns the final
/// folded state.
pub fn spawn_printer(rx: Receiver<ProgressUpdate>) -> JoinHandle<ProgressState> {
    thread::spawn(move || {
        let mut state = ProgressState::default();
        let mut last_line = String::new();
        for update in rx {
            state.apply_update(update);
            let line = render(&state);
            if line != last_line {
                println!("{}", line);
                last_line = line;
            }
        }
        state
    })
}

/// One status line; overall percent is bucketed to 5 % steps to keep the
/// output readable on long copies.
pub fn render(state: &ProgressState) -> String {
    let percent = state.overall_percent / 5 * 5;
    let marker = if state.error.is_some() {
        "❌"
    } else if state.is_complete {
        "✅"
    } else {
        "▶"
    };
    format!("{} [{:>3}%] {}", marker, percent, state.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecopy_workflow::Phase;
    use std::path::PathBuf;
    use std::sync::mpsc;

    #[test]
    fn render_buckets_percent() {
        let mut state = ProgressState::default();
        state.apply_update(ProgressUpdate::PhaseStarted(Phase::Copy));
        state.apply_update(ProgressUpdate::Overall(43));
        assert_eq!(render(&state), format!("▶ [ 40%] {}...", Phase::Copy.name()));
    }

    #[test]
    fn printer_returns_final_state() {
        let (tx, rx) = mpsc::channel();
        let handle = spawn_printer(rx);
        tx.send(ProgressUpdate::DeviceStarted {
            device: PathBuf::from("/dev/sdb"),
            index: 0,
            count: 1,
        })
        .unwrap();
        tx.send(ProgressUpdate::Error("format failed".to_string()))
            .unwrap();
        drop(tx);

        let state = handle.join().unwrap();
        assert_eq!(state.error.as_deref(), Some("format failed"));
        assert!(render(&state).starts_with("❌"));
    }
}
