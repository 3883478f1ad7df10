use std::fmt::Write as _;
use std::time::Duration;

/// 詰みスコアの飽和値。手数は捨てて「詰みを読み切った」ことだけを表す。
pub const MATE_SCORE_MAX: i32 = i32::MAX;
pub const MATE_SCORE_MIN: i32 = i32::MIN;

/// 手番側ごとの探索制限。いずれの組み合わせも同時に指定でき、毎手すべて `go` に載せる。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchLimits {
    pub nodes: Option<u64>,
    pub depth: Option<u32>,
    pub movetime: Option<u64>,
}

/// `go` に付ける時計情報（UCI の wtime/btime/winc/binc）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeArgs {
    pub wtime: u64,
    pub btime: u64,
    pub winc: u64,
    pub binc: u64,
}

/// `go` コマンドを組み立てる。
pub fn go_command(limits: &SearchLimits, time_args: Option<TimeArgs>) -> String {
    let mut cmd = String::from("go");
    if let Some(nodes) = limits.nodes {
        let _ = write!(cmd, " nodes {nodes}");
    }
    if let Some(depth) = limits.depth {
        let _ = write!(cmd, " depth {depth}");
    }
    if let Some(movetime) = limits.movetime {
        let _ = write!(cmd, " movetime {movetime}");
    }
    if let Some(t) = time_args {
        let _ = write!(
            cmd,
            " wtime {} btime {} winc {} binc {}",
            t.wtime, t.btime, t.winc, t.binc
        );
    }
    cmd
}

/// 1 手分の探索依頼
pub struct SearchRequest<'a> {
    /// `position fen ... [moves ...]` 行
    pub position: &'a str,
    pub limits: &'a SearchLimits,
    pub time_args: Option<TimeArgs>,
    /// 持ち時間なしで movetime のみ指定したときの猶予
    pub timeout_margin_ms: u64,
}

/// 探索結果。時間切れは通常の応答と区別して返す。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    BestMove {
        mv: String,
        /// 最後に観測した評価値（手番側視点、cp）。info が無ければ 0。
        score: i32,
        elapsed_ms: u64,
        depth: Option<u32>,
    },
    TimeLoss {
        elapsed_ms: u64,
    },
}

/// info 行から拾った最新の値
#[derive(Default, Clone, Debug)]
pub struct InfoSnapshot {
    pub score: Option<i32>,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
}

impl InfoSnapshot {
    /// info 行を空白区切りで走査して multipv=1 の値を保持する。
    ///
    /// `score` の後に `cp <整数>` / `mate <整数>` が続かない行はプロトコル違反としてエラーを返す。
    pub fn update_from_line(&mut self, line: &str) -> Result<(), String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first().copied() != Some("info") {
            return Ok(());
        }
        let multipv = tokens
            .windows(2)
            .find(|w| w[0] == "multipv")
            .and_then(|w| w[1].parse::<u32>().ok())
            .unwrap_or(1);

        let mut i = 1;
        while i < tokens.len() {
            match tokens[i] {
                // 文字列は行末まで続くので以降は見ない
                "string" | "pv" => break,
                "depth" => {
                    if multipv == 1 {
                        self.depth = tokens.get(i + 1).and_then(|t| t.parse().ok());
                    }
                    i += 1;
                }
                "nodes" => {
                    self.nodes = tokens.get(i + 1).and_then(|t| t.parse().ok());
                    i += 1;
                }
                "score" => {
                    let score = parse_score(tokens.get(i + 1).copied(), tokens.get(i + 2).copied())?;
                    if multipv == 1 {
                        self.score = Some(score);
                    }
                    i += 2;
                }
                _ => {}
            }
            i += 1;
        }
        Ok(())
    }
}

fn parse_score(kind: Option<&str>, value: Option<&str>) -> Result<i32, String> {
    let (Some(kind), Some(value)) = (kind, value) else {
        return Err("missing value after 'score' in info line".to_string());
    };
    let parsed = value
        .parse::<i32>()
        .map_err(|_| format!("non-integer score value '{value}'"))?;
    match kind {
        "cp" => Ok(parsed),
        "mate" => Ok(if parsed < 0 {
            MATE_SCORE_MIN
        } else {
            MATE_SCORE_MAX
        }),
        other => Err(format!("illegal syntax after 'score' in info line: '{other}'")),
    }
}

/// `bestmove <move> [ponder <move>]` から指し手を取り出す。
///
/// `Some(Err)` は指し手トークンが欠けた bestmove 行。
pub fn parse_bestmove(line: &str) -> Option<Result<String, String>> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("bestmove") {
        return None;
    }
    Some(
        tokens
            .next()
            .map(str::to_string)
            .ok_or_else(|| "bestmove line without a move".to_string()),
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameOutcome {
    InProgress,
    WhiteWin,
    BlackWin,
    Draw,
}

impl GameOutcome {
    pub fn label(self) -> &'static str {
        match self {
            GameOutcome::InProgress => "in_progress",
            GameOutcome::WhiteWin => "white_win",
            GameOutcome::BlackWin => "black_win",
            GameOutcome::Draw => "draw",
        }
    }

    /// 白から見た勝敗（1 / 0 / -1）。対局中は `None`。
    pub fn white_score(self) -> Option<i8> {
        match self {
            GameOutcome::InProgress => None,
            GameOutcome::WhiteWin => Some(1),
            GameOutcome::BlackWin => Some(-1),
            GameOutcome::Draw => Some(0),
        }
    }
}

pub fn duration_to_millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
