//! Remote execution abstraction. Every host-side read/write and every
//! compose/migration/backup command runs through this trait so the Engine
//! can be driven against an in-memory double in tests.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X64,
    Arm64,
}

impl Architecture {
    pub fn as_str(self) -> &'static str {
        match self {
            Architecture::X64 => "x64",
            Architecture::Arm64 => "arm64",
        }
    }

    fn from_uname(raw: &str) -> Self {
        match raw.trim() {
            "aarch64" | "arm64" => Architecture::Arm64,
            _ => Architecture::X64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Failure taxonomy for the Remote Executor. `NonZeroExit` is deliberately
/// absent: a non-zero exit is reported in [`ExecResult`], never raised.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("transport failed connecting to {host}: {message}")]
    TransportFailed { host: String, message: String },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(String),
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn exec(&self, command: &str, working_dir: Option<&str>) -> Result<ExecResult, ExecutorError> {
        self.exec_timeout(command, working_dir, DEFAULT_TIMEOUT).await
    }

    async fn exec_timeout(
        &self,
        command: &str,
        working_dir: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecResult, ExecutorError>;

    async fn file_exists(&self, path: &str) -> Result<bool, ExecutorError>;
    async fn dir_exists(&self, path: &str) -> Result<bool, ExecutorError>;
    async fn make_dir(&self, path: &str) -> Result<(), ExecutorError>;
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ExecutorError>;

    /// Atomic write: write to a sibling temp path then rename over the
    /// target, so a crash mid-write never leaves a partial file.
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ExecutorError>;

    async fn list_files(&self, dir: &str, glob: &str) -> Result<Vec<String>, ExecutorError>;
    async fn is_executable(&self, path: &str) -> Result<bool, ExecutorError>;
    async fn architecture(&self) -> Result<Architecture, ExecutorError>;
}

/// Authentication variant for [`SshExecutor::connect`]. Hidden behind the
/// `Executor` trait; test doubles never need to construct one.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    Password(String),
    PrivateKey { path: String },
    PrivateKeyWithPassphrase { path: String, passphrase: String },
    PrivateKeyThenPassword { path: String, password: String },
}

pub mod ssh {
    use super::*;
    use openssh::{KnownHosts, Session, SessionBuilder};
    use tracing::debug;

    /// Production executor: one SSH session per host, commands run via
    /// `bash -c`, filesystem operations shelled out through `test`/`cat`/
    /// `mv`, matching the write-temp-then-rename discipline used
    /// throughout this system's state and backup persistence.
    pub struct SshExecutor {
        session: Session,
        host: String,
    }

    impl SshExecutor {
        pub async fn connect(
            user: &str,
            host: &str,
            port: Option<u16>,
            _auth: &AuthMethod,
        ) -> Result<Self, ExecutorError> {
            debug!("connecting to {}@{}", user, host);

            let mut builder = SessionBuilder::default();
            builder.known_hosts_check(KnownHosts::Accept);
            builder.user(user.to_string());
            if let Some(port) = port {
                builder.port(port);
            }

            let session = builder
                .connect(host)
                .await
                .map_err(|e| ExecutorError::TransportFailed {
                    host: host.to_string(),
                    message: e.to_string(),
                })?;

            Ok(Self {
                session,
                host: host.to_string(),
            })
        }

        pub fn host(&self) -> &str {
            &self.host
        }
    }

    #[async_trait]
    impl Executor for SshExecutor {
        async fn exec_timeout(
            &self,
            command: &str,
            working_dir: Option<&str>,
            timeout: Duration,
        ) -> Result<ExecResult, ExecutorError> {
            let full_command = match working_dir {
                Some(dir) => format!("cd {} && {}", dir, command),
                None => command.to_string(),
            };
            debug!("[{}] exec: {}", self.host, command);

            let fut = self
                .session
                .command("bash")
                .arg("-c")
                .arg(&full_command)
                .output();

            let output = tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| ExecutorError::Timeout(timeout))?
                .map_err(|e| ExecutorError::Io(e.to_string()))?;

            Ok(ExecResult {
                command: full_command,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code().unwrap_or(-1),
            })
        }

        async fn file_exists(&self, path: &str) -> Result<bool, ExecutorError> {
            Ok(self.exec(&format!("test -f {}", path), None).await?.success())
        }

        async fn dir_exists(&self, path: &str) -> Result<bool, ExecutorError> {
            Ok(self.exec(&format!("test -d {}", path), None).await?.success())
        }

        async fn make_dir(&self, path: &str) -> Result<(), ExecutorError> {
            self.exec(&format!("mkdir -p {}", path), None).await?;
            Ok(())
        }

        async fn read_file(&self, path: &str) -> Result<Vec<u8>, ExecutorError> {
            let result = self.exec(&format!("cat {}", path), None).await?;
            Ok(result.stdout.into_bytes())
        }

        async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ExecutorError> {
            let tmp = format!("{}.tmp.{}", path, uuid::Uuid::new_v4());
            let escaped = String::from_utf8_lossy(contents).replace('\'', "'\\''");
            self.exec(
                &format!("cat > {} << 'AUTOUPDATER_EOF'\n{}\nAUTOUPDATER_EOF", tmp, escaped),
                None,
            )
            .await?;
            self.exec(&format!("mv -f {} {}", tmp, path), None).await?;
            Ok(())
        }

        async fn list_files(&self, dir: &str, glob: &str) -> Result<Vec<String>, ExecutorError> {
            let result = self
                .exec(&format!("ls -1 {}/{} 2>/dev/null", dir, glob), None)
                .await?;
            Ok(result
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect())
        }

        async fn is_executable(&self, path: &str) -> Result<bool, ExecutorError> {
            Ok(self.exec(&format!("test -x {}", path), None).await?.success())
        }

        async fn architecture(&self) -> Result<Architecture, ExecutorError> {
            let result = self.exec("uname -m", None).await?;
            Ok(Architecture::from_uname(&result.stdout))
        }
    }
}

pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory test double: a scripted exec-response table plus a
    /// HashMap-backed filesystem. Lets engine tests drive every branch of
    /// the update state machine deterministically without a real host.
    pub struct InMemoryExecutor {
        files: Mutex<HashMap<String, Vec<u8>>>,
        exec_responses: Mutex<HashMap<String, ExecResult>>,
        default_exit_code: i32,
        architecture: Architecture,
        pub log: Mutex<Vec<String>>,
    }

    impl InMemoryExecutor {
        pub fn new(architecture: Architecture) -> Self {
            Self {
                files: Mutex::new(HashMap::new()),
                exec_responses: Mutex::new(HashMap::new()),
                default_exit_code: 0,
                architecture,
                log: Mutex::new(Vec::new()),
            }
        }

        /// Pre-seed a file as if it existed on the host.
        pub fn seed_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
            self.files.lock().unwrap().insert(path.to_string(), contents.into());
        }

        /// Script the exact exit code/stdout/stderr returned for a command
        /// whose trimmed text equals `command`.
        pub fn script(&self, command: &str, exit_code: i32, stdout: &str, stderr: &str) {
            self.exec_responses.lock().unwrap().insert(
                command.to_string(),
                ExecResult {
                    command: command.to_string(),
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                    exit_code,
                },
            );
        }

        pub fn files_snapshot(&self) -> HashMap<String, Vec<u8>> {
            self.files.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor for InMemoryExecutor {
        async fn exec_timeout(
            &self,
            command: &str,
            working_dir: Option<&str>,
            _timeout: Duration,
        ) -> Result<ExecResult, ExecutorError> {
            let full = match working_dir {
                Some(dir) => format!("cd {} && {}", dir, command),
                None => command.to_string(),
            };
            self.log.lock().unwrap().push(full.clone());

            if let Some(scripted) = self.exec_responses.lock().unwrap().get(command).cloned() {
                return Ok(scripted);
            }
            if let Some(scripted) = self.exec_responses.lock().unwrap().get(full.as_str()).cloned() {
                return Ok(scripted);
            }

            Ok(ExecResult {
                command: full,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: self.default_exit_code,
            })
        }

        async fn file_exists(&self, path: &str) -> Result<bool, ExecutorError> {
            Ok(self.files.lock().unwrap().contains_key(path))
        }

        async fn dir_exists(&self, path: &str) -> Result<bool, ExecutorError> {
            let prefix = format!("{}/", path.trim_end_matches('/'));
            Ok(self.files.lock().unwrap().keys().any(|k| k.starts_with(&prefix)))
        }

        async fn make_dir(&self, _path: &str) -> Result<(), ExecutorError> {
            Ok(())
        }

        async fn read_file(&self, path: &str) -> Result<Vec<u8>, ExecutorError> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| ExecutorError::Io(format!("no such file: {}", path)))
        }

        async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ExecutorError> {
            self.files.lock().unwrap().insert(path.to_string(), contents.to_vec());
            Ok(())
        }

        async fn list_files(&self, dir: &str, glob: &str) -> Result<Vec<String>, ExecutorError> {
            let prefix = format!("{}/", dir.trim_end_matches('/'));
            let pattern = glob_to_regex(glob);
            let files = self.files.lock().unwrap();
            let mut matches: Vec<String> = files
                .keys()
                .filter_map(|k| k.strip_prefix(&prefix))
                .filter(|name| !name.contains('/') && pattern.is_match(name))
                .map(|name| format!("{}{}", prefix, name))
                .collect();
            matches.sort();
            Ok(matches)
        }

        async fn is_executable(&self, path: &str) -> Result<bool, ExecutorError> {
            Ok(self.files.lock().unwrap().contains_key(path))
        }

        async fn architecture(&self) -> Result<Architecture, ExecutorError> {
            Ok(self.architecture)
        }
    }

    fn glob_to_regex(glob: &str) -> regex::Regex {
        let mut pattern = String::from("^");
        for c in glob.chars() {
            match c {
                '*' => pattern.push_str(".*"),
                '.' => pattern.push_str("\\."),
                other => pattern.push(other),
            }
        }
        pattern.push('$');
        regex::Regex::new(&pattern).unwrap()
    }
}
