//! 외부 명령 실행 추상화 -- git, 규칙 컴파일러, sigma CLI
//!
//! 엔진은 [`CommandRunner`] trait을 통해 서브프로세스를 실행합니다.
//! 운영 환경은 [`ProcessRunner`], 테스트는 [`MockCommandRunner`]를 사용합니다.
//!
//! ```text
//! ┌────────────┐     ┌───────────────┐     ┌──────────────────┐
//! │   Engine   │ ──▶ │ CommandRunner │ ──▶ │ tokio::process   │
//! └────────────┘     └───────────────┘     └──────────────────┘
//!                           │
//!                           └──────────▶ MockCommandRunner (테스트)
//! ```
//!
//! 0이 아닌 종료 코드는 에러가 아닙니다. 호출자가 [`CommandOutput::success`]로 판단합니다.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tracing::debug;

use rulekeeper_core::error::EngineError;

/// 실행할 명령
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// 표준 입력으로 보낼 텍스트
    pub stdin: Option<String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            current_dir: None,
        }
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

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// 명령 실행 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout과 stderr를 합친 출력
    pub output: String,
    /// 종료 코드 (시그널로 종료되면 `None`)
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl CommandOutput {
    /// 종료 코드가 0인지 확인합니다.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// 서브프로세스 실행 trait
pub trait CommandRunner: Send + Sync + 'static {
    /// 명령을 실행하고 끝날 때까지 기다립니다.
    ///
    /// 프로세스를 시작하지 못한 경우에만 에러를 반환합니다.
    fn run(
        &self,
        spec: &CommandSpec,
    ) -> impl Future<Output = Result<CommandOutput, EngineError>> + Send;
}

// ─── ProcessRunner ───────────────────────────────────────────────────

/// `tokio::process` 기반 실행기
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, EngineError> {
        let started = Instant::now();

        let mut command = tokio::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| EngineError::Transport(format!("failed to start '{spec}': {e}")))?;

        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| EngineError::Transport(format!("failed to write stdin: {e}")))?;
            // stdin을 닫아야 EOF가 전달됨
            drop(stdin);
        }

        let out = child
            .wait_with_output()
            .await
            .map_err(|e| EngineError::Transport(format!("failed to wait for '{spec}': {e}")))?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));

        let result = CommandOutput {
            output,
            exit_code: out.status.code(),
            duration: started.elapsed(),
        };
        debug!(
            command = %spec,
            exit_code = ?result.exit_code,
            duration_secs = result.duration.as_secs_f64(),
            "command finished"
        );
        Ok(result)
    }
}

// ─── MockCommandRunner ───────────────────────────────────────────────

#[derive(Debug, Clone)]
struct MockResponse {
    pattern: String,
    output: String,
    exit_code: Option<i32>,
    once: bool,
}

/// 테스트용 명령 실행기
///
/// 명령 문자열에 패턴이 포함된 첫 번째 응답을 돌려줍니다. 일치하는 응답이 없으면
/// 빈 출력의 성공입니다. 모든 호출은 기록됩니다.
#[derive(Debug, Default)]
pub struct MockCommandRunner {
    calls: Mutex<Vec<CommandSpec>>,
    responses: Mutex<Vec<MockResponse>>,
    unavailable: bool,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 패턴에 일치하는 명령에 항상 같은 응답을 돌려줍니다.
    pub fn with_response(self, pattern: &str, output: &str, exit_code: i32) -> Self {
        self.push(pattern, output, exit_code, false);
        self
    }

    /// 한 번만 사용되는 응답을 추가합니다. 같은 패턴의 고정 응답보다 먼저 소비됩니다.
    pub fn with_response_once(self, pattern: &str, output: &str, exit_code: i32) -> Self {
        self.push(pattern, output, exit_code, true);
        self
    }

    /// 모든 명령이 시작조차 못 하도록 합니다.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// 기록된 호출 목록
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// 명령 문자열에 패턴이 포함된 호출 수
    pub fn count_calls(&self, pattern: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.to_string().contains(pattern))
            .count()
    }

    fn push(&self, pattern: &str, output: &str, exit_code: i32, once: bool) {
        if let Ok(mut responses) = self.responses.lock() {
            let response = MockResponse {
                pattern: pattern.to_owned(),
                output: output.to_owned(),
                exit_code: Some(exit_code),
                once,
            };
            if once {
                responses.insert(0, response);
            } else {
                responses.push(response);
            }
        }
    }

    fn respond(&self, line: &str) -> MockResponse {
        let Ok(mut responses) = self.responses.lock() else {
            return default_response();
        };
        match responses.iter().position(|r| line.contains(&r.pattern)) {
            Some(idx) if responses[idx].once => responses.remove(idx),
            Some(idx) => responses[idx].clone(),
            None => default_response(),
        }
    }
}

fn default_response() -> MockResponse {
    MockResponse {
        pattern: String::new(),
        output: String::new(),
        exit_code: Some(0),
        once: false,
    }
}

impl CommandRunner for MockCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, EngineError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        if self.unavailable {
            return Err(EngineError::Transport(format!(
                "failed to start '{spec}': not available"
            )));
        }

        let response = self.respond(&spec.to_string());
        Ok(CommandOutput {
            output: response.output,
            exit_code: response.exit_code,
            duration: Duration::from_millis(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_display_joins_program_and_args() {
        let spec = CommandSpec::new("python3")
            .arg("/opt/compile_yara.py")
            .arg("/opt/rules");
        assert_eq!(spec.to_string(), "python3 /opt/compile_yara.py /opt/rules");
    }

    #[tokio::test]
    async fn mock_records_calls_and_defaults_to_success() {
        let runner = MockCommandRunner::new();
        let out = runner.run(&CommandSpec::new("git").arg("status")).await.unwrap();
        assert!(out.success());
        assert!(out.output.is_empty());
        assert_eq!(runner.count_calls("git status"), 1);
    }

    #[tokio::test]
    async fn mock_once_response_is_consumed_before_sticky() {
        let runner = MockCommandRunner::new()
            .with_response("rev-parse", "bbb", 0)
            .with_response_once("rev-parse", "aaa", 0);

        let spec = CommandSpec::new("git").args(["rev-parse", "HEAD"]);
        assert_eq!(runner.run(&spec).await.unwrap().output, "aaa");
        assert_eq!(runner.run(&spec).await.unwrap().output, "bbb");
        assert_eq!(runner.run(&spec).await.unwrap().output, "bbb");
    }

    #[tokio::test]
    async fn mock_failure_response_keeps_exit_code() {
        let runner = MockCommandRunner::new().with_response("python3", "syntax error", 1);
        let out = runner
            .run(&CommandSpec::new("python3").arg("compile.py"))
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, Some(1));
        assert_eq!(out.output, "syntax error");
    }

    #[tokio::test]
    async fn unavailable_mock_fails_to_start() {
        let runner = MockCommandRunner::new().unavailable();
        let err = runner.run(&CommandSpec::new("sigma")).await.unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn process_runner_passes_stdin() {
        let out = ProcessRunner
            .run(&CommandSpec::new("cat").stdin("hello"))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.output, "hello");
    }
}
