use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::error::{EngineError, EngineResult};

pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 起動するエンジンのコマンドライン。
#[derive(Clone, Debug)]
pub struct EngineCommand {
    pub path: PathBuf,
    pub args: Vec<String>,
}

impl EngineCommand {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    /// 表示名が与えられなかった場合の既定名（実行ファイル名）
    pub fn default_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .map_or_else(|| self.path.display().to_string(), str::to_string)
    }
}

/// 全エンジンの送受信を 1 本に集約するログ。
///
/// 送信行は `<name> <- <line>`、受信行は `<name> -> <line>` の形式で 1 行ずつフラッシュする。
#[derive(Clone)]
pub struct TrafficLog {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl TrafficLog {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }

    fn record(&self, engine: &str, arrow: &str, line: &str) -> io::Result<()> {
        let mut sink = self.sink.lock();
        writeln!(sink, "{engine} {arrow} {line}")?;
        sink.flush()
    }
}

/// 子プロセスとして起動したエンジン 1 本分の行単位パイプ。
///
/// 標準出力は専用スレッドで行に分割してチャネルへ流すため、締め切り付きの受信ができる。
/// `terminate()` は何度呼んでもよく、`Drop` からも呼ばれる。
pub struct EngineProcess {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    rx: Receiver<String>,
    name: String,
    log: Option<TrafficLog>,
    terminated: bool,
}

impl EngineProcess {
    pub fn spawn(cmd: &EngineCommand, name: String, log: Option<TrafficLog>) -> EngineResult<Self> {
        let mut command = Command::new(&cmd.path);
        if !cmd.args.is_empty() {
            command.args(&cmd.args);
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                engine: name.clone(),
                source,
            })?;
        let stdin = child.stdin.take().ok_or_else(|| EngineError::Closed {
            engine: name.clone(),
            op: "spawn (stdin)",
        })?;
        let stdout = child.stdout.take().ok_or_else(|| EngineError::Closed {
            engine: name.clone(),
            op: "spawn (stdout)",
        })?;

        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        let l = l.trim_end_matches('\r').to_string();
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        log::debug!("{name}: spawned {} (pid {})", cmd.path.display(), child.id());
        Ok(Self {
            child,
            stdin: Some(BufWriter::new(stdin)),
            rx,
            name,
            log,
            terminated: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn write_line(&mut self, msg: &str) -> EngineResult<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(EngineError::Terminated {
                engine: self.name.clone(),
            });
        };
        let written = stdin
            .write_all(msg.as_bytes())
            .and_then(|()| stdin.write_all(b"\n"))
            .and_then(|()| stdin.flush());
        if let Err(source) = written {
            return Err(EngineError::Io {
                engine: self.name.clone(),
                op: "write",
                source,
            });
        }
        log::trace!("{} <- {}", self.name, msg);
        self.mirror("<-", msg)
    }

    /// 1 行読むまでブロックする。ストリームが閉じられた場合はエラー。
    pub fn read_line(&mut self) -> EngineResult<String> {
        self.ensure_alive()?;
        match self.rx.recv() {
            Ok(line) => self.received(line),
            Err(_) => Err(EngineError::Closed {
                engine: self.name.clone(),
                op: "read",
            }),
        }
    }

    /// `deadline` までに 1 行読めなければ `None` を返す。
    pub fn read_line_until(&mut self, deadline: Instant) -> EngineResult<Option<String>> {
        self.ensure_alive()?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(remaining) {
            Ok(line) => self.received(line).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::Closed {
                engine: self.name.clone(),
                op: "read",
            }),
        }
    }

    /// 同期待ち用。`timeout` 以内に行が来なければ `op` を添えたタイムアウトエラー。
    pub fn read_line_timeout(&mut self, timeout: Duration, op: &'static str) -> EngineResult<String> {
        match self.read_line_until(Instant::now() + timeout)? {
            Some(line) => Ok(line),
            None => Err(EngineError::Timeout {
                engine: self.name.clone(),
                op,
            }),
        }
    }

    /// `quit` を送り、短時間で終了しなければ kill する。2 回目以降は何もしない。
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        let _ = self.write_line("quit");
        self.terminated = true;
        // stdin を閉じてエンジン側に EOF を通知する
        self.stdin = None;

        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                log::debug!("{}: exited", self.name);
                return;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        log::debug!("{}: did not quit in time, killing", self.name);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn ensure_alive(&self) -> EngineResult<()> {
        if self.terminated {
            return Err(EngineError::Terminated {
                engine: self.name.clone(),
            });
        }
        Ok(())
    }

    fn received(&self, line: String) -> EngineResult<String> {
        log::trace!("{} -> {}", self.name, line);
        self.mirror("->", &line)?;
        Ok(line)
    }

    fn mirror(&self, arrow: &str, line: &str) -> EngineResult<()> {
        if let Some(log) = &self.log {
            log.record(&self.name, arrow, line).map_err(|source| EngineError::Io {
                engine: self.name.clone(),
                op: "traffic log",
                source,
            })?;
        }
        Ok(())
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn traffic_log_tags_direction_and_engine() {
        let buf = SharedBuf::default();
        let log = TrafficLog::new(buf.clone());
        log.record("alpha", "<-", "uci").unwrap();
        log.record("beta", "->", "uciok").unwrap();
        let text = String::from_utf8(buf.0.lock().clone()).unwrap();
        assert_eq!(text, "alpha <- uci\nbeta -> uciok\n");
    }

    #[test]
    fn default_name_is_file_name() {
        let cmd = EngineCommand::new("/usr/local/bin/stockfish");
        assert_eq!(cmd.default_name(), "stockfish");
    }

    #[test]
    fn spawn_failure_is_reported_with_engine_name() {
        let cmd = EngineCommand::new("/nonexistent/definitely-not-an-engine");
        let err = EngineProcess::spawn(&cmd, "ghost".to_string(), None)
            .err()
            .expect("spawn must fail");
        assert!(matches!(err, EngineError::Spawn { .. }));
        assert_eq!(err.engine(), "ghost");
    }
}
