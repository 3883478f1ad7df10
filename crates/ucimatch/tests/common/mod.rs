#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use ucimatch::selfplay::{EngineClient, EngineCommand, EngineConfig, TrafficLog};

/// テスト用エンジン（`mock-uci`）の設定
pub fn mock_engine(args: &[&str]) -> EngineConfig {
    let mut command = EngineCommand::new(env!("CARGO_BIN_EXE_mock-uci"));
    command.args = args.iter().map(|s| s.to_string()).collect();
    EngineConfig::new(command)
}

pub fn spawn_mock(args: &[&str]) -> EngineClient {
    EngineClient::spawn(&mock_engine(args), None).expect("mock engine must start")
}

/// 送受信ログをメモリに溜める
#[derive(Clone, Default)]
pub struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    pub fn traffic(&self) -> TrafficLog {
        TrafficLog::new(self.clone())
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
