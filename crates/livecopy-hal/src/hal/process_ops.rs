//! Process execution helpers.
//!
//! External commands are considered "world-touching" and must go through the HAL so we can
//! test workflows without spawning real processes.

use crate::{HalError, HalResult};
use std::time::Duration;

/// Exit code plus combined stdout/stderr of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into `HalError::CommandFailed`.
    pub fn into_result(self, program: &str) -> HalResult<String> {
        if self.success() {
            return Ok(self.output);
        }
        Err(HalError::CommandFailed {
            program: program.to_string(),
            code: self.code,
            output: self.output.trim().to_string(),
        })
    }
}

/// Process execution trait (external command runner).
pub trait ProcessOps {
    /// Run a command to completion and capture its combined output.
    fn command_output(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> HalResult<CommandOutput>;

    /// Run a command, handing every output line to `on_line` as it is produced.
    ///
    /// Both `\n` and `\r` terminate a line, since progress-reporting tools
    /// redraw their status with carriage returns.
    fn command_stream(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
        on_line: &mut dyn FnMut(&str),
    ) -> HalResult<CommandOutput>;

    fn command_status(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<()> {
        self.command_output(program, args, timeout)?
            .into_result(program)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_result_keeps_output_on_failure() {
        let out = CommandOutput {
            code: Some(2),
            output: "syslinux: not a fat filesystem\n".to_string(),
        };
        match out.into_result("syslinux") {
            Err(HalError::CommandFailed { program, code, output }) => {
                assert_eq!(program, "syslinux");
                assert_eq!(code, Some(2));
                assert_eq!(output, "syslinux: not a fat filesystem");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
