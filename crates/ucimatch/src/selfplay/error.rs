//! エンジン通信で発生する致命的エラー。
//!
//! 反則手や時間切れは対局の終局理由であってエラーではない（`Termination` を参照）。

use std::io;

/// エンジンとの入出力・プロトコル解釈で発生するエラー
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// プロセス起動失敗
    #[error("{engine}: failed to spawn engine: {source}")]
    Spawn {
        engine: String,
        #[source]
        source: io::Error,
    },

    /// パイプへの読み書き失敗
    #[error("{engine}: {op} failed: {source}")]
    Io {
        engine: String,
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// エンジン側がストリームを閉じた（プロセス終了など）
    #[error("{engine}: engine exited unexpectedly during {op}")]
    Closed { engine: String, op: &'static str },

    /// 同期待ち（uciok / readyok / stop 後の bestmove）が返ってこない
    #[error("{engine}: no response to {op}")]
    Timeout { engine: String, op: &'static str },

    /// 必須フィールド欠落などのプロトコル違反
    #[error("{engine}: protocol violation: {detail}")]
    Protocol { engine: String, detail: String },

    /// 終了済みハンドルへの操作
    #[error("{engine}: engine handle already terminated")]
    Terminated { engine: String },
}

/// FEN や開始局面ファイルの解釈エラー
#[derive(thiserror::Error, Debug)]
pub enum PositionError {
    #[error("invalid FEN '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },

    #[error("invalid move '{mv}' in position '{fen}'")]
    InvalidMove { mv: String, fen: String },
}

impl EngineError {
    /// 問題を起こしたエンジン名
    pub fn engine(&self) -> &str {
        match self {
            EngineError::Spawn { engine, .. }
            | EngineError::Io { engine, .. }
            | EngineError::Closed { engine, .. }
            | EngineError::Timeout { engine, .. }
            | EngineError::Protocol { engine, .. }
            | EngineError::Terminated { engine } => engine,
        }
    }
}

/// エンジン操作の結果型
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_names_engine_and_operation() {
        let err = EngineError::Closed {
            engine: "stockfish".to_string(),
            op: "read",
        };
        assert_eq!(err.engine(), "stockfish");
        let msg = err.to_string();
        assert!(msg.contains("stockfish"), "{msg}");
        assert!(msg.contains("read"), "{msg}");
    }

    #[test]
    fn position_error_reports_fen_without_engine() {
        let err = PositionError::InvalidMove {
            mv: "e2e5".to_string(),
            fen: "8/8/8/8/8/8/8/8 w - - 0 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid move 'e2e5' in position '8/8/8/8/8/8/8/8 w - - 0 1'"
        );
    }
}
