//! UCI エンジン同士を対局させるためのライブラリ。
//!
//! - `selfplay`: エンジンプロセス、UCI クライアント、対局進行、PGN 出力
//! - `common`: 出力ファイルのユーティリティ

pub mod common;
pub mod selfplay;
