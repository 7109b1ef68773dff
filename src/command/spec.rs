//! Typed argument vectors
//!
//! Callers never format command lines. Each argument is pushed as a discrete
//! value and handed to the OS as its own `argv` entry, so user input can not
//! change the shape of a command.

use std::collections::BTreeMap;
use std::fmt;

/// External binaries the agent is allowed to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    Zfs,
    Ssh,
}

impl Program {
    pub const fn name(&self) -> &'static str {
        match self {
            Program::Zfs => "zfs",
            Program::Ssh => "ssh",
        }
    }
}

/// The `zfs` subcommands this agent issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZfsSubcommand {
    Create,
    Destroy,
    List,
    Get,
    Set,
    Inherit,
    Snapshot,
    Rollback,
    Clone,
    Promote,
    Rename,
    Bookmark,
    Mount,
    Unmount,
    Share,
    Unshare,
    Diff,
    Allow,
    Unallow,
    Send,
    Receive,
}

impl ZfsSubcommand {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ZfsSubcommand::Create => "create",
            ZfsSubcommand::Destroy => "destroy",
            ZfsSubcommand::List => "list",
            ZfsSubcommand::Get => "get",
            ZfsSubcommand::Set => "set",
            ZfsSubcommand::Inherit => "inherit",
            ZfsSubcommand::Snapshot => "snapshot",
            ZfsSubcommand::Rollback => "rollback",
            ZfsSubcommand::Clone => "clone",
            ZfsSubcommand::Promote => "promote",
            ZfsSubcommand::Rename => "rename",
            ZfsSubcommand::Bookmark => "bookmark",
            ZfsSubcommand::Mount => "mount",
            ZfsSubcommand::Unmount => "unmount",
            ZfsSubcommand::Share => "share",
            ZfsSubcommand::Unshare => "unshare",
            ZfsSubcommand::Diff => "diff",
            ZfsSubcommand::Allow => "allow",
            ZfsSubcommand::Unallow => "unallow",
            ZfsSubcommand::Send => "send",
            ZfsSubcommand::Receive => "receive",
        }
    }
}

impl fmt::Display for ZfsSubcommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Command Spec
// =============================================================================

/// A program plus its argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: Program,
    args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            args: Vec::new(),
        }
    }

    /// Start a `zfs <subcommand>` invocation
    pub fn zfs(subcommand: ZfsSubcommand) -> Self {
        Self::new(Program::Zfs).arg(subcommand.as_str())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Push `flag` only when `enabled`
    pub fn flag(self, enabled: bool, flag: &str) -> Self {
        if enabled {
            self.arg(flag)
        } else {
            self
        }
    }

    /// Push `flag value` when a value is present
    pub fn option<V: Into<String>>(self, flag: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.arg(flag).arg(value),
            None => self,
        }
    }

    /// Push `flag key=value` for each property, in key order
    pub fn properties(mut self, flag: &str, properties: &BTreeMap<String, String>) -> Self {
        for (key, value) in properties {
            self.args.push(flag.to_string());
            self.args.push(format!("{}={}", key, value));
        }
        self
    }

    pub fn program(&self) -> Program {
        self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// First argument containing a NUL byte, if any
    pub(crate) fn find_nul(&self) -> Option<&str> {
        self.args.iter().map(String::as_str).find(|a| a.contains('\0'))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program.name())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_arguments_discrete() {
        let mut props = BTreeMap::new();
        props.insert("quota".to_string(), "10G".to_string());
        props.insert("compression".to_string(), "lz4".to_string());

        let spec = CommandSpec::zfs(ZfsSubcommand::Create)
            .flag(true, "-p")
            .flag(false, "-u")
            .option("-V", Some("1G"))
            .option::<String>("-b", None)
            .properties("-o", &props)
            .arg("tank/my vol; rm -rf /");

        assert_eq!(spec.program(), Program::Zfs);
        assert_eq!(
            spec.arguments(),
            [
                "create",
                "-p",
                "-V",
                "1G",
                "-o",
                "compression=lz4",
                "-o",
                "quota=10G",
                "tank/my vol; rm -rf /",
            ]
        );
    }

    #[test]
    fn test_display_quotes_whitespace() {
        let spec = CommandSpec::zfs(ZfsSubcommand::Snapshot).arg("tank/a b@s");
        assert_eq!(spec.to_string(), "zfs snapshot \"tank/a b@s\"");
    }

    #[test]
    fn test_find_nul() {
        let spec = CommandSpec::zfs(ZfsSubcommand::Get).arg("ok").arg("bad\0arg");
        assert_eq!(spec.find_nul(), Some("bad\0arg"));
        assert_eq!(CommandSpec::new(Program::Ssh).find_nul(), None);
    }
}
