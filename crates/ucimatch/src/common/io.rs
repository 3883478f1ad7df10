//! 開始局面の読み込みと対局結果の書き出し（拡張子 `.gz` なら gzip、`-` なら標準入出力）

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;

const READER_BUF_CAP: usize = 64 * 1024;

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

/// 開始局面ファイルなどを行単位で読むためのリーダー。
pub fn open_reader(path: &Path) -> io::Result<Box<dyn BufRead>> {
    if is_stdio(path) {
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, io::stdin())));
    }
    let file = File::open(path)?;
    if is_gzip(path) {
        return Ok(Box::new(BufReader::with_capacity(
            READER_BUF_CAP,
            GzDecoder::new(file),
        )));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, file)))
}

enum Sink {
    File(BufWriter<File>),
    Stdout(io::Stdout),
    Gzip(BufWriter<GzEncoder<File>>),
}

/// 対局結果の出力ファイル（PGN テキストや JSONL レコード）。
///
/// gzip の終端と書き出し失敗は `finish()` で返す。
#[must_use = "call .finish() to flush the gzip trailer"]
pub struct OutputFile {
    path: PathBuf,
    sink: Sink,
}

impl OutputFile {
    /// 出力ファイルを作る。親ディレクトリが無ければ作成する。
    pub fn create(path: &Path) -> io::Result<Self> {
        let sink = if is_stdio(path) {
            Sink::Stdout(io::stdout())
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = File::create(path)?;
            if is_gzip(path) {
                Sink::Gzip(BufWriter::new(GzEncoder::new(file, Compression::default())))
            } else {
                Sink::File(BufWriter::new(file))
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            sink,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> &mut dyn Write {
        match &mut self.sink {
            Sink::File(w) => w,
            Sink::Stdout(w) => w,
            Sink::Gzip(w) => w,
        }
    }

    /// PGN など整形済みのテキストをそのまま書く
    pub fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.writer().write_all(text.as_bytes())
    }

    /// 1 レコードを JSON 1 行として書く
    pub fn write_jsonl<T: Serialize>(&mut self, record: &T) -> io::Result<()> {
        let w = self.writer();
        serde_json::to_writer(&mut *w, record)?;
        w.write_all(b"\n")
    }

    /// 1 局ごとに呼んで途中経過をディスクに残す
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer().flush()
    }

    pub fn finish(self) -> io::Result<()> {
        match self.sink {
            Sink::File(w) => w.into_inner().map_err(|e| e.into_error())?.flush(),
            Sink::Stdout(mut w) => w.flush(),
            Sink::Gzip(w) => w.into_inner().map_err(|e| e.into_error())?.finish()?.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row<'a> {
        game_id: u32,
        result: &'a str,
    }

    #[test]
    fn gzip_jsonl_reads_back_line_by_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/results.jsonl.gz");
        let mut out = OutputFile::create(&path).unwrap();
        out.write_jsonl(&Row { game_id: 1, result: "1-0" }).unwrap();
        out.write_jsonl(&Row { game_id: 2, result: "1/2-1/2" }).unwrap();
        out.finish().unwrap();

        let lines: Vec<String> = open_reader(&path).unwrap().lines().map(Result::unwrap).collect();
        assert_eq!(
            lines,
            vec![
                r#"{"game_id":1,"result":"1-0"}"#,
                r#"{"game_id":2,"result":"1/2-1/2"}"#
            ]
        );
    }

    #[test]
    fn pgn_text_is_written_uncompressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("games.pgn");
        let mut out = OutputFile::create(&path).unwrap();
        assert_eq!(out.path(), path.as_path());
        out.write_text("[White \"a\"]\n").unwrap();
        out.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[White \"a\"]\n");
        out.finish().unwrap();
    }
}
