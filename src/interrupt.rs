//! Ctrl-C at the prompt ends the session the same way end of input does.

#[cfg(unix)]
const FAREWELL_LINE: &[u8] = b"\nGoodbye!\n";

/// Installs a SIGINT handler that prints the farewell line and exits with status 0.
#[cfg(unix)]
pub fn exit_on_interrupt() -> nix::Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler only calls write(2) and _exit(2), both async-signal-safe.
    unsafe { sigaction(Signal::SIGINT, &action) }.map(|_| ())
}

#[cfg(not(unix))]
pub fn exit_on_interrupt() -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
extern "C" fn on_interrupt(_signal: libc::c_int) {
    unsafe {
        libc::write(
            libc::STDOUT_FILENO,
            FAREWELL_LINE.as_ptr().cast(),
            FAREWELL_LINE.len(),
        );
        libc::_exit(0);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::repl::FAREWELL;

    #[test]
    fn 割り込み時の表示は通常の終了と同じ() {
        assert_eq!(FAREWELL_LINE, format!("\n{}\n", FAREWELL).as_bytes());
    }
}
