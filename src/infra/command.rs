//! # Command Execution Module / 命令执行模块
//!
//! Spawns a simulator process, streams its merged output into a log file and
//! waits for it under a timeout and a cancellation token. Whatever happens,
//! the process (and on Unix its whole process group) is killed and reaped
//! before this module returns.
//!
//! 派生一个仿真器进程，将其合并输出流式写入日志文件，并在超时和取消令牌的约束下等待。
//! 无论发生什么，进程（在 Unix 上包括整个进程组）都会在本模块返回前被终止并回收。

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Upper bound for draining output pipes after the process is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const SEPARATOR_WIDTH: usize = 60;
/// A line only replaces a buffered one it extends by more than this many bytes.
const PROGRESSIVE_MIN_GROWTH: usize = 2;

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B[@-_][0-?]*[ -/]*[@-~]").expect("valid ANSI regex"));

/// Lines that are written to the log but never echoed to the console.
static NOISE: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"^-v\s+/",
        r"docker\.io/",
        r"What's next:",
        r"docker scout",
        r"View a summary of image",
        r"platform.*does not match",
        r"DeprecationWarning",
        r"RuntimeWarning",
        r"^\*+$",
        r"^\*\*\s",
        r"^\s+\*\*",
        r"cocotb\.scheduler\.add",
        r"/usr/local/lib/python.*\.py:\d+:",
        r"^\s+cocotb\.(scheduler|log)",
        r"===WARNING===.*sky130",
        r"^VCD info:",
        r"^\s+self\.",
        r"^/opt/homebrew/",
        r"gpi_embed\.cpp",
        r"GpiCommon\.cpp",
        r"in gpi_print_registered",
        r"in set_program_name_in_venv",
        r"VPI registered",
        r"pytest not found",
    ])
    .expect("valid noise patterns")
});

/// How a captured process ended.
#[derive(Debug)]
pub enum Termination {
    /// The process exited on its own.
    Exited(ExitStatus),
    /// The timeout elapsed; the process was killed.
    TimedOut,
    /// The cancellation token fired; the process was killed.
    Cancelled,
    /// The process could not be spawned or waited on.
    Failed(String),
}

#[derive(Debug)]
pub struct CapturedRun {
    pub termination: Termination,
    pub elapsed: Duration,
}

/// Removes ANSI color and cursor sequences.
pub fn strip_ansi(line: &str) -> std::borrow::Cow<'_, str> {
    ANSI_ESCAPE.replace_all(line, "")
}

/// The simulator output of a captured log, without the `command:` header.
/// Logs that carry no header are returned whole.
pub fn log_body(log: &str) -> &str {
    let separator = format!("\n{}\n", "-".repeat(SEPARATOR_WIDTH));
    match log.find(&separator) {
        Some(at) if log.starts_with("command:") => &log[at + separator.len()..],
        _ => log,
    }
}

pub fn is_noise(line: &str) -> bool {
    line.trim().is_empty() || NOISE.is_match(line)
}

/// Collapses progressive output for the console: when one line is a strict
/// prefix of the next (or the reverse), only the longer one is shown.
///
/// 合并渐进式输出：当一行是相邻行的严格前缀时，只显示较长的那一行。
#[derive(Debug, Default)]
pub struct ProgressiveFilter {
    buffered: Option<String>,
}

impl ProgressiveFilter {
    /// Offers a line; returns the previously buffered line once it is final.
    pub fn push(&mut self, line: &str) -> Option<String> {
        match self.buffered.as_deref() {
            Some(previous) if is_progressive(previous, line) => {
                if line.len() > previous.len() {
                    self.buffered = Some(line.to_string());
                }
                None
            }
            _ => self.buffered.replace(line.to_string()),
        }
    }

    /// Releases whatever is still buffered.
    pub fn finish(&mut self) -> Option<String> {
        self.buffered.take()
    }
}

fn is_progressive(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let (shorter, longer) = if a.len() < b.len() { (a, b) } else { (b, a) };
    longer.starts_with(shorter) && longer.len() > shorter.len() + PROGRESSIVE_MIN_GROWTH
}

/// The job log shared by the output readers. The first failed write is
/// reported once; later failures are counted silently.
///
/// 输出读取任务共享的任务日志。首次写入失败会报告一次，之后的失败不再重复报告。
#[derive(Debug)]
pub struct LogSink {
    writer: Mutex<BufWriter<File>>,
    path: std::path::PathBuf,
    write_failed: AtomicBool,
}

impl LogSink {
    pub async fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path).await?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
            write_failed: AtomicBool::new(false),
        })
    }

    pub async fn write_raw(&self, bytes: &[u8]) -> std::io::Result<()> {
        let result = self.writer.lock().await.write_all(bytes).await;
        if let Err(e) = &result {
            self.report_failure(e);
        }
        result
    }

    pub async fn append_line(&self, line: &str) {
        let mut writer = self.writer.lock().await;
        let result = match writer.write_all(line.as_bytes()).await {
            Ok(()) => writer.write_all(b"\n").await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.report_failure(&e);
        }
    }

    pub async fn flush(&self) {
        if let Err(e) = self.writer.lock().await.flush().await {
            self.report_failure(&e);
        }
    }

    /// Whether any write to the log has failed so far.
    pub fn write_failed(&self) -> bool {
        self.write_failed.load(Ordering::Relaxed)
    }

    fn report_failure(&self, e: &std::io::Error) {
        if !self.write_failed.swap(true, Ordering::Relaxed) {
            tracing::warn!(log = %self.path.display(), "simulation log is incomplete, write failed: {e}");
        }
    }
}

/// Spawns `cmd`, appending its merged stdout/stderr to `log_path`.
///
/// The log starts with a `command:` header followed by `display_command` and
/// a separator line. Output lines are ANSI-stripped before being written.
///
/// Returns once the process has exited, or has been killed and reaped because
/// `timeout` elapsed or `cancel` fired.
pub async fn spawn_and_capture(
    mut cmd: Command,
    display_command: &str,
    log_path: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> CapturedRun {
    let start = Instant::now();
    let failed = |message: String| CapturedRun {
        termination: Termination::Failed(message),
        elapsed: start.elapsed(),
    };

    let log = match LogSink::create(log_path).await {
        Ok(sink) => Arc::new(sink),
        Err(e) => return failed(format!("cannot create log {}: {e}", log_path.display())),
    };
    let header = format!("command:\n{display_command}\n\n{}\n", "-".repeat(SEPARATOR_WIDTH));
    if let Err(e) = log.write_raw(header.as_bytes()).await {
        return failed(format!("cannot write log {}: {e}", log_path.display()));
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let message = format!("failed to spawn '{display_command}': {e}");
            log.append_line(&message).await;
            log.flush().await;
            return failed(message);
        }
    };
    tracing::debug!(pid = ?child.id(), command = display_command, "spawned simulator");

    let span = tracing::Span::current();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(pump_lines(stdout, Arc::clone(&log)).instrument(span.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(pump_lines(stderr, Arc::clone(&log)).instrument(span)));
    }

    enum Waited {
        Status(std::io::Result<ExitStatus>),
        TimedOut,
        Cancelled,
    }

    let waited = tokio::select! {
        biased;
        _ = cancel.cancelled() => Waited::Cancelled,
        res = tokio::time::timeout(timeout, child.wait()) => match res {
            Ok(status) => Waited::Status(status),
            Err(_) => Waited::TimedOut,
        },
    };

    let termination = match waited {
        Waited::Status(Ok(status)) => Termination::Exited(status),
        Waited::Status(Err(e)) => {
            terminate(&mut child).await;
            Termination::Failed(format!("failed to wait for simulator: {e}"))
        }
        Waited::TimedOut => {
            terminate(&mut child).await;
            log.append_line(&format!("killed: exceeded timeout of {:.1}s", timeout.as_secs_f64()))
                .await;
            Termination::TimedOut
        }
        Waited::Cancelled => {
            terminate(&mut child).await;
            log.append_line("killed: run cancelled").await;
            Termination::Cancelled
        }
    };

    // Grandchildren that outlive the process can hold the pipes open.
    for mut reader in readers {
        match tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await {
            Ok(Err(e)) => tracing::warn!("output reader task failed: {e}"),
            Err(_) => {
                reader.abort();
                tracing::warn!(log = %log_path.display(), "gave up draining simulator output");
            }
            Ok(Ok(())) => {}
        }
    }
    log.flush().await;

    CapturedRun {
        termination,
        elapsed: start.elapsed(),
    }
}

/// Copies one output stream into the log line by line until EOF.
///
/// Lines are read as raw bytes so that invalid UTF-8 from a simulator never
/// stops the drain; a stalled pipe would otherwise kill it with SIGPIPE.
async fn pump_lines<R>(stream: R, log: Arc<LogSink>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(256);
    let mut console = ProgressiveFilter::default();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("simulator output stream closed: {e}");
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf);
        let clean = strip_ansi(&line);
        let clean = clean.trim_end();
        if !is_noise(clean) {
            if let Some(done) = console.push(clean) {
                tracing::debug!(target: "verif_matrix::sim", "{done}");
            }
        }
        log.append_line(clean).await;
    }
    if let Some(done) = console.finish() {
        tracing::debug!(target: "verif_matrix::sim", "{done}");
    }
}

/// Kills the process group (Unix) and the child itself, then reaps it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::debug!(pid, "killpg failed: {e}");
        }
    }
    // `kill` also waits, so the child is reaped on return.
    if let Err(e) = child.kill().await {
        tracing::debug!("kill after timeout/cancel: {e}");
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_removes_color_codes() {
        assert_eq!(strip_ansi("\x1b[32mPASS\x1b[0m done"), "PASS done");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_log_body_skips_command_header() {
        let log = format!("command:\necho TESTS=9\n\n{}\nreal output\n", "-".repeat(60));
        assert_eq!(log_body(&log), "real output\n");
        assert_eq!(log_body("no header\n"), "no header\n");
    }

    #[test]
    fn test_noise_detection() {
        assert!(is_noise("VCD info: dumpfile waves.vcd opened for output."));
        assert!(is_noise("   "));
        assert!(is_noise("** TESTS=1 PASS=1 FAIL=0 SKIP=0 **"));
        assert!(is_noise("     -.--ns INFO     gpi   ..mbed/gpi_embed.cpp:76   in set_program_name_in_venv"));
        assert!(!is_noise("TESTS=1 PASS=1 FAIL=0 SKIP=0"));
    }

    #[test]
    fn test_progressive_lines_keep_the_longest() {
        let mut filter = ProgressiveFilter::default();
        assert_eq!(filter.push("Compiling uart"), None);
        assert_eq!(filter.push("Compiling uart_tx.v ... done"), None);
        assert_eq!(filter.push("Compiling uart"), None);
        assert_eq!(filter.push("Running test"), Some("Compiling uart_tx.v ... done".to_string()));
        // Growth of two bytes or less is a different line.
        assert_eq!(filter.push("Running test 1"), Some("Running test".to_string()));
        assert_eq!(filter.finish(), Some("Running test 1".to_string()));
        assert_eq!(filter.finish(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_does_not_stop_the_drain() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("sim.log");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(
            "printf 'bad \\377 byte\\n'; i=0; while [ $i -lt 20000 ]; do echo \"line $i\"; i=$((i+1)); done; \
             echo 'TESTS=1 PASS=1 FAIL=0 SKIP=0'",
        );
        let run = spawn_and_capture(cmd, "sh -c ...", &log, Duration::from_secs(60), &CancellationToken::new()).await;

        match run.termination {
            Termination::Exited(status) => assert_eq!(status.code(), Some(0)),
            other => panic!("unexpected termination: {other:?}"),
        }
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("bad \u{FFFD} byte"));
        assert!(content.contains("line 19999"));
        assert!(content.contains("TESTS=1 PASS=1 FAIL=0 SKIP=0"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_undrained_readers_are_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("sim.log");
        let mut cmd = Command::new("sh");
        // The subshell keeps both pipes open past the drain timeout, then
        // writes once more. With the readers gone that write hits a closed pipe.
        cmd.current_dir(dir.path())
            .arg("-c")
            .arg("(sleep 7; echo late && touch wrote_late) & exit 0");
        let run = spawn_and_capture(cmd, "sh -c ...", &log, Duration::from_secs(30), &CancellationToken::new()).await;

        assert!(matches!(run.termination, Termination::Exited(_)));
        assert!(run.elapsed < DRAIN_TIMEOUT + Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(9) - run.elapsed).await;
        assert!(!dir.path().join("wrote_late").exists());
        assert!(!std::fs::read_to_string(&log).unwrap().contains("late"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_failed_log_writes_are_recorded() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let sink = LogSink {
            writer: Mutex::new(BufWriter::new(tokio::fs::OpenOptions::new().write(true).open(full).await.unwrap())),
            path: full.to_path_buf(),
            write_failed: AtomicBool::new(false),
        };
        assert!(!sink.write_failed());
        sink.append_line(&"x".repeat(64 * 1024)).await;
        sink.flush().await;
        assert!(sink.write_failed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_writes_header_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("sim.log");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo hello; echo oops 1>&2; exit 3");
        let run = spawn_and_capture(
            cmd,
            "sh -c ...",
            &log,
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await;
        match run.termination {
            Termination::Exited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected termination: {other:?}"),
        }
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.starts_with("command:\nsh -c ..."));
        assert!(content.contains("hello"));
        assert!(content.contains("oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("sim.log");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 30");
        let run = spawn_and_capture(
            cmd,
            "sleep 30",
            &log,
            Duration::from_millis(200),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(run.termination, Termination::TimedOut));
        assert!(run.elapsed < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("sim.log");
        let cmd = Command::new("this_simulator_definitely_does_not_exist_12345");
        let run = spawn_and_capture(
            cmd,
            "missing",
            &log,
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(run.termination, Termination::Failed(_)));
        assert!(std::fs::read_to_string(&log).unwrap().contains("failed to spawn"));
    }
}
