//! 盤面ルールは `shakmaty` に任せ、対局管理に必要な窓口だけを置く。
//!
//! 開始局面ファイルの読み込みもここで行う。

use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result, bail};
use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::uci::UciMove;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, EnPassantMode, Move, MoveList, Position};

use super::error::PositionError;
use crate::common::io::open_reader;

pub const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

pub fn castling_mode(chess960: bool) -> CastlingMode {
    if chess960 {
        CastlingMode::Chess960
    } else {
        CastlingMode::Standard
    }
}

pub fn parse_fen(fen: &str, chess960: bool) -> Result<Chess, PositionError> {
    let invalid = |reason: String| PositionError::InvalidFen {
        fen: fen.to_string(),
        reason,
    };
    let setup: Fen = fen
        .trim()
        .parse()
        .map_err(|e: shakmaty::fen::ParseFenError| invalid(e.to_string()))?;
    setup
        .into_position(castling_mode(chess960))
        .map_err(|e| invalid(e.to_string()))
}

pub fn to_fen(pos: &Chess) -> String {
    Fen::from_setup(pos.clone().into_setup(EnPassantMode::Legal)).to_string()
}

pub fn legal_moves(pos: &Chess) -> MoveList {
    pos.legal_moves()
}

/// 繰り返し判定に使う局面キー
pub fn repetition_key(pos: &Chess) -> Zobrist64 {
    pos.zobrist_hash(EnPassantMode::Legal)
}

/// エンジンが返した UCI 表記を、この局面での指し手に変換する。
///
/// 表記として読めない、あるいは局面に合わない場合は `None`。
pub fn parse_uci_move(pos: &Chess, text: &str) -> Option<Move> {
    let uci: UciMove = text.parse().ok()?;
    uci.to_move(pos).ok()
}

pub fn move_to_uci(m: &Move, chess960: bool) -> String {
    m.to_uci(castling_mode(chess960)).to_string()
}

/// チェック記号を含まない SAN
pub fn move_to_san(pos: &Chess, m: &Move) -> String {
    San::from_move(pos, m).to_string()
}

pub fn play(pos: &Chess, m: &Move) -> Chess {
    let mut next = pos.clone();
    next.play_unchecked(m);
    next
}

/// `position ...` 行や FEN/EPD 行を分解した結果。
pub struct ParsedPosition {
    pub fen: String,
    pub moves: Vec<String>,
}

/// 開始局面群をファイル / 単一 FEN / デフォルト(初期配置) から読み込み、FEN の列にする。
///
/// ファイルは 1 行 1 局面（`.gz` 可）。`#` で始まる行と空行は無視する。
pub fn load_openings(file: Option<&Path>, fen: Option<&str>, chess960: bool) -> Result<Vec<String>> {
    match (file, fen) {
        (Some(_), Some(_)) => bail!("--openings and --fen cannot be used together"),
        (Some(path), None) => {
            let reader = open_reader(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            let mut openings = Vec::new();
            for (idx, line) in reader.lines().enumerate() {
                let line = line?;
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                let parsed = parse_position_line(trimmed).with_context(|| {
                    format!("invalid position syntax on line {}: {}", idx + 1, trimmed)
                })?;
                let pos = build_position(&parsed, chess960)
                    .with_context(|| format!("invalid position on line {}", idx + 1))?;
                openings.push(to_fen(&pos));
            }
            if openings.is_empty() {
                bail!("no usable positions found in {}", path.display());
            }
            Ok(openings)
        }
        (None, Some(fen_arg)) => {
            let parsed = parse_position_line(fen_arg)?;
            let pos = build_position(&parsed, chess960)?;
            Ok(vec![to_fen(&pos)])
        }
        (None, None) => Ok(vec![STARTPOS_FEN.to_string()]),
    }
}

/// `position startpos|fen ... [moves ...]`、`startpos ...`、`fen ...`、素の FEN/EPD を受け付ける。
pub fn parse_position_line(line: &str) -> Result<ParsedPosition> {
    let mut tokens = line.split_whitespace().peekable();
    tokens.next_if_eq(&"position");
    match tokens.peek().copied() {
        None => bail!("empty position line"),
        Some("startpos") => {
            tokens.next();
            let moves = parse_moves(tokens)?;
            Ok(ParsedPosition {
                fen: STARTPOS_FEN.to_string(),
                moves,
            })
        }
        Some(_) => {
            tokens.next_if_eq(&"fen");
            let mut fields = Vec::new();
            while let Some(token) = tokens.next_if(|t| *t != "moves") {
                fields.push(token);
            }
            let moves = parse_moves(tokens)?;
            Ok(ParsedPosition {
                fen: normalize_fen_fields(&fields)?,
                moves,
            })
        }
    }
}

/// EPD（手数フィールドなし、オペコード付き）を 6 フィールドの FEN に揃える。
fn normalize_fen_fields(fields: &[&str]) -> Result<String> {
    if fields.len() < 4 {
        bail!("missing FEN payload");
    }
    let board = fields[..4].join(" ");
    let counters: Vec<u32> = fields[4..]
        .iter()
        .take(2)
        .map_while(|f| f.parse().ok())
        .collect();
    Ok(match counters.as_slice() {
        [halfmoves, fullmoves] => format!("{board} {halfmoves} {fullmoves}"),
        [halfmoves] => format!("{board} {halfmoves} 1"),
        _ => format!("{board} 0 1"),
    })
}

/// moves トークン以降を UCI 形式の指し手列として回収する。
pub fn parse_moves<'a, I>(iter: I) -> Result<Vec<String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut iter = iter.peekable();
    match iter.peek() {
        Some(&"moves") => {
            iter.next();
            Ok(iter.map(str::to_string).collect())
        }
        Some(other) => bail!("expected 'moves' before move list, got '{other}'"),
        None => Ok(Vec::new()),
    }
}

pub fn build_position(parsed: &ParsedPosition, chess960: bool) -> Result<Chess, PositionError> {
    let mut pos = parse_fen(&parsed.fen, chess960)?;
    for mv_str in &parsed.moves {
        let mv = parse_uci_move(&pos, mv_str).ok_or_else(|| PositionError::InvalidMove {
            mv: mv_str.clone(),
            fen: to_fen(&pos),
        })?;
        pos.play_unchecked(&mv);
    }
    Ok(pos)
}
