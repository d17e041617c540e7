use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use tokio::process::Command;

/// Specification for a command to execute in the sandbox.
///
/// All process execution goes through this type to ensure argv-style
/// invocation: arguments are discrete `OsString` elements, never shell
/// strings, so shell metacharacters in generated code or file names are
/// not interpreted.
///
/// # Example
///
/// ```rust
/// use codeforge_sandbox::CommandSpec;
///
/// let cmd = CommandSpec::new("python3")
///     .arg("main.py")
///     .cwd("/tmp/workspace");
/// assert_eq!(cmd.args.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// The program to execute.
    pub program: OsString,
    /// Arguments as discrete elements (NOT shell strings).
    pub args: Vec<OsString>,
    /// Optional working directory.
    pub cwd: Option<PathBuf>,
    /// Environment for the child. When set, the child environment is
    /// cleared and replaced by exactly this map.
    pub env: Option<HashMap<OsString, OsString>>,
}

impl CommandSpec {
    /// Create a new `CommandSpec` for the given program.
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: None,
        }
    }

    /// Build a spec from an argv vector. Returns `None` for an empty
    /// vector, which has no program to run.
    #[must_use]
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, rest) = argv.split_first()?;
        Some(Self::new(program).args(rest.iter().cloned()))
    }

    /// Append a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append multiple arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set one environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Convert into a `tokio::process::Command`.
    ///
    /// When an environment map is present the child environment is
    /// cleared first, so nothing leaks from the parent process beyond
    /// what the map names.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        if let Some(ref env) = self.env {
            cmd.env_clear();
            for (key, value) in env {
                cmd.env(key, value);
            }
        }

        cmd
    }
}
