//! Command specification
//!
//! The program and arguments the relay spawns under the PTY, parsed
//! positionally from argv. Everything after the program name belongs to
//! the child, so no flag parsing happens here.

use std::ffi::{OsStr, OsString};
use std::fmt;

use crate::error::{Error, Result};

/// The command to run: program path plus its arguments, in order
///
/// Immutable once parsed. Stored as `OsString`s so non-UTF-8 argv
/// entries survive the trip to `exec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandSpec {
    /// Build from an iterator over argv entries, program name first
    ///
    /// Returns `Error::Usage` if the iterator yields nothing.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut iter = args.into_iter().map(Into::into);
        let program = iter.next().ok_or(Error::Usage)?;
        Ok(Self {
            program,
            args: iter.collect(),
        })
    }

    /// The program to execute
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// The arguments passed to the program, in order
    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program_and_args() {
        let spec = CommandSpec::from_args(["/bin/echo", "hello", "world"])
            .expect("Failed to parse command");
        assert_eq!(spec.program(), OsStr::new("/bin/echo"));
        assert_eq!(spec.args().len(), 2);
        assert_eq!(spec.args()[0], OsString::from("hello"));
        assert_eq!(spec.args()[1], OsString::from("world"));
    }

    #[test]
    fn test_parse_program_only() {
        let spec = CommandSpec::from_args(["/bin/true"]).expect("Failed to parse command");
        assert_eq!(spec.program(), OsStr::new("/bin/true"));
        assert!(spec.args().is_empty());
    }

    #[test]
    fn test_empty_argv_is_usage_error() {
        let err = CommandSpec::from_args(Vec::<OsString>::new()).unwrap_err();
        assert!(matches!(err, Error::Usage));
    }

    #[test]
    fn test_display_joins_with_spaces() {
        let spec = CommandSpec::from_args(["sh", "-c", "exit 0"]).expect("Failed to parse command");
        assert_eq!(spec.to_string(), "sh -c exit 0");
    }
}
