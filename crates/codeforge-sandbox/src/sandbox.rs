use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, warn};

use codeforge_utils::error::SandboxError;

use crate::command_spec::CommandSpec;

/// Marker prefix for synthesized timeout stderr.
///
/// This is the only path where the sandbox writes stderr itself instead of
/// capturing it verbatim; the bracketed prefix keeps it distinguishable
/// from anything a child program could plausibly emit on its own.
pub const TIMEOUT_MARKER: &str = "[sandbox] execution timed out";

/// Sentinel return code for timeouts and process-level failures.
pub const TIMEOUT_RETURN_CODE: i32 = -1;

/// Default wall-clock budget for one execution.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Environment variables inherited from the parent process by default.
const DEFAULT_ENV_PASSLIST: &[&str] = &["PATH", "HOME", "LANG"];

/// Result of one sandboxed execution.
///
/// Immutable once constructed. The four fields `stdout`, `stderr`,
/// `return_code`, and `execution_time` are a stable external contract:
/// downstream tooling (log shippers, result stores) depends on these
/// exact names and types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error (synthesized only on timeout/spawn failure).
    pub stderr: String,
    /// Child exit code; [`TIMEOUT_RETURN_CODE`] for timeouts, spawn
    /// failures, and signal-terminated children.
    pub return_code: i32,
    /// Wall-clock duration in seconds.
    pub execution_time: f64,
    /// When the result was produced.
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    fn new(stdout: String, stderr: String, return_code: i32, started: Instant) -> Self {
        Self {
            stdout,
            stderr,
            return_code,
            execution_time: started.elapsed().as_secs_f64(),
            timestamp: Utc::now(),
        }
    }

    /// Whether the child exited successfully.
    #[must_use]
    pub fn success(&self) -> bool {
        self.return_code == 0
    }

    /// Whether this result was synthesized by the timeout path.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.return_code == TIMEOUT_RETURN_CODE && self.stderr.starts_with(TIMEOUT_MARKER)
    }
}

/// Configuration for a sandbox instance.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Wall-clock budget per execution.
    pub timeout: Duration,
    /// Interpreter for the default invocation. When `None`, resolved from
    /// `PATH` (`python3`, then `python`).
    pub interpreter: Option<PathBuf>,
    /// Name of the entry file the payload is written to.
    pub entry_file: String,
    /// Parent-process environment variables passed through to the child.
    pub env_passlist: Vec<String>,
    /// Explicit environment overrides, applied after the passlist.
    pub extra_env: BTreeMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            interpreter: None,
            entry_file: "main.py".to_string(),
            env_passlist: DEFAULT_ENV_PASSLIST.iter().map(ToString::to_string).collect(),
            extra_env: BTreeMap::new(),
        }
    }
}

impl SandboxConfig {
    /// Set the execution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pin the interpreter instead of resolving it from `PATH`.
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Add an environment override for the child.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }
}

/// Unittest harness appended when executing code together with tests.
/// Exit code 0 signifies that every test passed.
const TEST_HARNESS: &str = r#"
if __name__ == "__main__":
    import sys
    import unittest

    suite = unittest.TestLoader().loadTestsFromModule(sys.modules[__name__])
    result = unittest.TextTestRunner(verbosity=2).run(suite)
    sys.exit(0 if result.wasSuccessful() else 1)
"#;

/// Isolated execution environment for generated code.
///
/// Each instance owns a freshly provisioned temporary directory that is
/// released on [`close`](Sandbox::close) or on drop. The working
/// directory is shared across calls on the same instance; callers that
/// need isolation between unrelated runs must allocate a new instance.
pub struct Sandbox {
    config: SandboxConfig,
    workspace: TempDir,
}

impl Sandbox {
    /// Provision a sandbox with a fresh working directory.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Provision` if the temporary directory
    /// cannot be created. This is the one sandbox failure treated as
    /// fatal; everything after provisioning degrades into synthetic
    /// results instead.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let workspace = tempfile::Builder::new()
            .prefix("codeforge-sandbox-")
            .tempdir()
            .map_err(|e| SandboxError::Provision {
                reason: e.to_string(),
            })?;
        debug!(path = %workspace.path().display(), "sandbox provisioned");
        Ok(Self { config, workspace })
    }

    /// Path of the working directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.workspace.path()
    }

    /// Execute a code payload with optional auxiliary files.
    ///
    /// `code` is written to the configured entry file; `files` are written
    /// relative to the workspace (directories created as needed). When
    /// `command` is `None` the default invocation is
    /// `<interpreter> <entry_file>`.
    ///
    /// This method never fails: spawn errors, I/O errors, and timeouts all
    /// come back as an [`ExecutionResult`] with
    /// [`TIMEOUT_RETURN_CODE`] and explanatory stderr.
    pub async fn execute(
        &self,
        code: &str,
        files: &BTreeMap<String, String>,
        command: Option<&[String]>,
    ) -> ExecutionResult {
        let started = Instant::now();

        if let Err(e) = self.write_payload(code, files).await {
            return ExecutionResult::new(
                String::new(),
                format!("[sandbox] workspace write failed: {e}"),
                TIMEOUT_RETURN_CODE,
                started,
            );
        }

        let spec = match self.build_command(command) {
            Ok(spec) => spec,
            Err(reason) => {
                return ExecutionResult::new(
                    String::new(),
                    format!("[sandbox] {reason}"),
                    TIMEOUT_RETURN_CODE,
                    started,
                );
            }
        };

        self.run(spec, started).await
    }

    /// Execute a payload together with test code.
    ///
    /// The primary code, the test code, and a unittest runner harness are
    /// concatenated into one module and executed through the normal path;
    /// exit code 0 signifies all tests passed.
    pub async fn execute_tests(&self, code: &str, test_code: &str) -> ExecutionResult {
        let combined = format!("# Main code\n{code}\n\n# Test code\n{test_code}\n{TEST_HARNESS}");
        self.execute(&combined, &BTreeMap::new(), None).await
    }

    /// Release the working directory explicitly.
    ///
    /// Dropping the sandbox releases it implicitly; this surfaces removal
    /// errors instead of swallowing them.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Io` if the directory cannot be removed.
    pub fn close(self) -> Result<(), SandboxError> {
        self.workspace.close().map_err(SandboxError::Io)
    }

    async fn write_payload(
        &self,
        code: &str,
        files: &BTreeMap<String, String>,
    ) -> std::io::Result<()> {
        for (rel_path, content) in files {
            let path = self.resolve_member(rel_path)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content).await?;
        }

        let entry = self.resolve_member(&self.config.entry_file)?;
        tokio::fs::write(&entry, code).await
    }

    /// Join a relative member path to the workspace, rejecting absolute
    /// paths and parent traversal.
    fn resolve_member(&self, rel_path: &str) -> std::io::Result<PathBuf> {
        let rel = Path::new(rel_path);
        let escapes = rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
        if escapes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("path '{rel_path}' escapes the sandbox workspace"),
            ));
        }
        Ok(self.workspace.path().join(rel))
    }

    fn build_command(&self, command: Option<&[String]>) -> Result<CommandSpec, String> {
        let mut spec = match command {
            Some(argv) => CommandSpec::from_argv(argv)
                .ok_or_else(|| "empty command override".to_string())?,
            None => {
                let interpreter = self.resolve_interpreter()?;
                CommandSpec::new(interpreter).arg(&self.config.entry_file)
            }
        };

        spec = spec.cwd(self.workspace.path());
        for (key, value) in self.child_env() {
            spec = spec.env(key, value);
        }
        Ok(spec)
    }

    fn resolve_interpreter(&self) -> Result<PathBuf, String> {
        if let Some(ref interpreter) = self.config.interpreter {
            return Ok(interpreter.clone());
        }
        which::which("python3")
            .or_else(|_| which::which("python"))
            .map_err(|_| "no python interpreter found on PATH".to_string())
    }

    /// Child environment: cleared, then passlisted parent variables, then
    /// explicit overrides, then the workspace on `PYTHONPATH`.
    fn child_env(&self) -> Vec<(OsString, OsString)> {
        let mut env: Vec<(OsString, OsString)> = Vec::new();
        for key in &self.config.env_passlist {
            if let Some(value) = std::env::var_os(key) {
                env.push((key.into(), value));
            }
        }
        for (key, value) in &self.config.extra_env {
            env.push((key.into(), value.into()));
        }
        env.push((
            OsString::from("PYTHONPATH"),
            self.workspace.path().as_os_str().to_os_string(),
        ));
        env
    }

    async fn run(&self, spec: CommandSpec, started: Instant) -> ExecutionResult {
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout must kill and reap the
            // child, not leave it running against a vanished workspace.
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::new(
                    String::new(),
                    format!("[sandbox] failed to spawn '{}': {e}", spec.program.to_string_lossy()),
                    TIMEOUT_RETURN_CODE,
                    started,
                );
            }
        };

        match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => ExecutionResult::new(
                String::from_utf8_lossy(&output.stdout).into_owned(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
                output.status.code().unwrap_or(TIMEOUT_RETURN_CODE),
                started,
            ),
            Ok(Err(e)) => ExecutionResult::new(
                String::new(),
                format!("[sandbox] failed to collect child output: {e}"),
                TIMEOUT_RETURN_CODE,
                started,
            ),
            Err(_elapsed) => {
                warn!(
                    timeout_secs = self.config.timeout.as_secs(),
                    "sandbox execution timed out, killing child"
                );
                ExecutionResult::new(
                    String::new(),
                    format!("{TIMEOUT_MARKER} after {}s", self.config.timeout.as_secs()),
                    TIMEOUT_RETURN_CODE,
                    started,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        Sandbox::new(SandboxConfig::default()).expect("sandbox provisioning")
    }

    #[tokio::test]
    async fn executes_trivial_payload() {
        let sb = sandbox();
        let result = sb.execute(r#"print("ok")"#, &BTreeMap::new(), None).await;
        assert_eq!(result.return_code, 0, "stderr: {}", result.stderr);
        assert_eq!(result.stdout, "ok\n");
        assert!(!result.timed_out());
    }

    #[tokio::test]
    async fn auxiliary_files_are_importable() {
        let sb = sandbox();
        let mut files = BTreeMap::new();
        files.insert(
            "helper.py".to_string(),
            "def greet():\n    return 'hello'\n".to_string(),
        );
        let result = sb
            .execute("import helper\nprint(helper.greet())", &files, None)
            .await;
        assert_eq!(result.return_code, 0, "stderr: {}", result.stderr);
        assert_eq!(result.stdout, "hello\n");
    }

    #[tokio::test]
    async fn nested_file_paths_create_directories() {
        let sb = sandbox();
        let mut files = BTreeMap::new();
        files.insert("pkg/__init__.py".to_string(), String::new());
        files.insert("pkg/mod.py".to_string(), "VALUE = 3\n".to_string());
        let result = sb
            .execute("from pkg.mod import VALUE\nprint(VALUE)", &files, None)
            .await;
        assert_eq!(result.return_code, 0, "stderr: {}", result.stderr);
        assert_eq!(result.stdout, "3\n");
    }

    #[tokio::test]
    async fn infinite_loop_hits_timeout() {
        let config = SandboxConfig::default().with_timeout(Duration::from_secs(1));
        let sb = Sandbox::new(config).unwrap();
        let started = Instant::now();
        let result = sb
            .execute("while True:\n    pass", &BTreeMap::new(), None)
            .await;
        assert!(result.timed_out());
        assert_eq!(result.return_code, TIMEOUT_RETURN_CODE);
        assert!(result.stderr.starts_with(TIMEOUT_MARKER));
        // Bounded grace period: well under the 30s default, near the 1s budget.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn command_override_bypasses_interpreter() {
        let sb = sandbox();
        let argv = vec!["echo".to_string(), "override".to_string()];
        let result = sb.execute("ignored", &BTreeMap::new(), Some(&argv)).await;
        assert_eq!(result.return_code, 0);
        assert_eq!(result.stdout, "override\n");
    }

    #[tokio::test]
    async fn spawn_failure_is_synthetic_result_not_error() {
        let sb = sandbox();
        let argv = vec!["codeforge-no-such-binary-xyz".to_string()];
        let result = sb.execute("", &BTreeMap::new(), Some(&argv)).await;
        assert_eq!(result.return_code, TIMEOUT_RETURN_CODE);
        assert!(result.stderr.contains("failed to spawn"));
        assert!(!result.timed_out());
    }

    #[tokio::test]
    async fn env_not_on_passlist_is_absent_in_child() {
        // SAFETY: test-local variable name, no other thread reads it.
        unsafe { std::env::set_var("CODEFORGE_SECRET_TEST_VAR", "leaky") };
        let sb = sandbox();
        let result = sb
            .execute(
                "import os\nprint(os.environ.get('CODEFORGE_SECRET_TEST_VAR', 'absent'))",
                &BTreeMap::new(),
                None,
            )
            .await;
        assert_eq!(result.stdout, "absent\n", "stderr: {}", result.stderr);
    }

    #[tokio::test]
    async fn path_traversal_in_files_is_rejected() {
        let sb = sandbox();
        let mut files = BTreeMap::new();
        files.insert("../escape.py".to_string(), "x = 1".to_string());
        let result = sb.execute("print('never runs')", &files, None).await;
        assert_eq!(result.return_code, TIMEOUT_RETURN_CODE);
        assert!(result.stderr.contains("escapes the sandbox workspace"));
    }

    #[tokio::test]
    async fn passing_tests_exit_zero_failing_tests_nonzero() {
        let sb = sandbox();
        let code = "def add(a, b):\n    return a + b\n";
        let good = "import unittest\nclass T(unittest.TestCase):\n    def test_add(self):\n        self.assertEqual(add(2, 2), 4)\n";
        let result = sb.execute_tests(code, good).await;
        assert_eq!(result.return_code, 0, "stderr: {}", result.stderr);

        let bad = "import unittest\nclass T(unittest.TestCase):\n    def test_add(self):\n        self.assertEqual(add(2, 2), 5)\n";
        let result = sb.execute_tests(code, bad).await;
        assert_ne!(result.return_code, 0);
    }

    #[tokio::test]
    async fn close_releases_workspace() {
        let sb = sandbox();
        let path = sb.path().to_path_buf();
        assert!(path.exists());
        sb.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn result_serializes_with_stable_field_names() {
        let result = ExecutionResult {
            stdout: "ok\n".into(),
            stderr: String::new(),
            return_code: 0,
            execution_time: 0.25,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("stdout").is_some());
        assert!(json.get("stderr").is_some());
        assert!(json.get("return_code").is_some());
        assert!(json.get("execution_time").is_some());
    }
}
