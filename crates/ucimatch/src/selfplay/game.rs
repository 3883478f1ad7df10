use serde::Serialize;
use shakmaty::zobrist::Zobrist64;
use shakmaty::{Chess, Color, Move, MoveList, Position};

use super::engine::EngineClient;
use super::error::{EngineResult, PositionError};
use super::position::{
    legal_moves, move_to_uci, parse_fen, parse_uci_move, play, repetition_key, to_fen,
};
use super::time_control::{TimeBudget, time_args};
use super::types::{GameOutcome, SearchLimits, SearchOutcome, SearchRequest};

/// 終局理由。対局中は `None`、終局後はちょうど 1 つに決まる。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    None,
    Checkmate,
    Stalemate,
    TimeLoss,
    IllegalMove,
    Resignation,
    Threefold,
    FiftyMoves,
    InsufficientMaterial,
    DrawAdjudication,
}

impl Termination {
    /// 手番側の負けで終わる理由か
    pub fn is_loss(self) -> bool {
        matches!(
            self,
            Termination::Checkmate
                | Termination::TimeLoss
                | Termination::IllegalMove
                | Termination::Resignation
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Termination::None => "none",
            Termination::Checkmate => "checkmate",
            Termination::Stalemate => "stalemate",
            Termination::TimeLoss => "time_loss",
            Termination::IllegalMove => "illegal_move",
            Termination::Resignation => "resignation",
            Termination::Threefold => "threefold",
            Termination::FiftyMoves => "fifty_moves",
            Termination::InsufficientMaterial => "insufficient_material",
            Termination::DrawAdjudication => "draw_adjudication",
        }
    }
}

/// 評価値による打ち切り。回数 0 でその判定は無効。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdjudicationConfig {
    /// |score| <= draw_score が続く手数（両者 1 手ずつで 1 回）
    pub draw_count: u32,
    pub draw_score: i32,
    /// 同じ側で score <= -resign_score が続く手数
    pub resign_count: u32,
    pub resign_score: i32,
}

/// 引き分け・投了の連続カウンタ。条件を外れた手で 0 に戻る。
#[derive(Debug)]
pub struct Adjudicator {
    config: AdjudicationConfig,
    draw_plies: u32,
    resign_plies: [u32; 2],
}

impl Adjudicator {
    pub fn new(config: AdjudicationConfig) -> Self {
        Self {
            config,
            draw_plies: 0,
            resign_plies: [0; 2],
        }
    }

    /// `turn` 番目のエンジンが返した評価値（手番側視点）でカウンタを進める。
    pub fn update(&mut self, turn: usize, score: i32) -> Termination {
        let cfg = self.config;
        // i32::MIN の絶対値を取るため i64 で比較する
        let score = i64::from(score);

        if cfg.draw_count > 0 && score.abs() <= i64::from(cfg.draw_score) {
            self.draw_plies += 1;
            if self.draw_plies >= 2 * cfg.draw_count {
                return Termination::DrawAdjudication;
            }
        } else {
            self.draw_plies = 0;
        }

        if cfg.resign_count > 0 && score <= -i64::from(cfg.resign_score) {
            self.resign_plies[turn] += 1;
            if self.resign_plies[turn] >= cfg.resign_count {
                return Termination::Resignation;
            }
        } else {
            self.resign_plies[turn] = 0;
        }

        Termination::None
    }
}

/// 対局設定。`limits` と `clocks` は [先に指すエンジン, もう一方] の順。
#[derive(Clone, Debug)]
pub struct GameConfig {
    pub chess960: bool,
    pub limits: [SearchLimits; 2],
    pub clocks: [TimeBudget; 2],
    pub adjudication: AdjudicationConfig,
    pub timeout_margin_ms: u64,
    pub record_samples: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            chess960: false,
            limits: [SearchLimits::default(); 2],
            clocks: [TimeBudget::unlimited(); 2],
            adjudication: AdjudicationConfig::default(),
            timeout_margin_ms: 100,
            record_samples: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlyEntry {
    pub pos: Chess,
    /// この局面に至った指し手（ply 0 は `None`）
    pub last_move: Option<Move>,
    pub key: Zobrist64,
}

/// ply 0 から現在までの局面列。追記のみで、容量は 256 から倍々に伸びる。
#[derive(Clone, Debug)]
pub struct PositionHistory {
    entries: Vec<PlyEntry>,
}

impl PositionHistory {
    pub const INITIAL_CAPACITY: usize = 256;

    pub fn new(pos: Chess) -> Self {
        let mut entries = Vec::with_capacity(Self::INITIAL_CAPACITY);
        entries.push(PlyEntry {
            key: repetition_key(&pos),
            pos,
            last_move: None,
        });
        Self { entries }
    }

    pub fn push(&mut self, pos: Chess, mv: Move) {
        let capacity = self.entries.capacity();
        if self.entries.len() == capacity {
            self.entries.reserve_exact(capacity);
        }
        self.entries.push(PlyEntry {
            key: repetition_key(&pos),
            pos,
            last_move: Some(mv),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn get(&self, ply: usize) -> Option<&PlyEntry> {
        self.entries.get(ply)
    }

    pub fn entries(&self) -> &[PlyEntry] {
        &self.entries
    }

    fn last(&self) -> &PlyEntry {
        // new() で ply 0 を必ず積むので空にはならない
        &self.entries[self.entries.len() - 1]
    }
}

/// 学習用サンプル 1 件。result は手番側から見た最終結果。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub fen: String,
    pub score: i32,
    pub result: i8,
}

/// 1 局分の状態。
#[derive(Clone, Debug)]
pub struct Game {
    history: PositionHistory,
    white: String,
    black: String,
    chess960: bool,
    termination: Termination,
    end_ply: Option<usize>,
    scores: Vec<i32>,
}

impl Game {
    pub fn new(fen: &str, chess960: bool) -> Result<Self, PositionError> {
        let pos = parse_fen(fen, chess960)?;
        Ok(Self {
            history: PositionHistory::new(pos),
            white: String::new(),
            black: String::new(),
            chess960,
            termination: Termination::None,
            end_ply: None,
            scores: Vec::new(),
        })
    }

    pub fn ply(&self) -> usize {
        self.history.len() - 1
    }

    /// 現在の局面（終局後は終局時の局面）
    pub fn position(&self) -> &Chess {
        &self.history.last().pos
    }

    pub fn history(&self) -> &PositionHistory {
        &self.history
    }

    pub fn chess960(&self) -> bool {
        self.chess960
    }

    pub fn set_players(&mut self, white: impl Into<String>, black: impl Into<String>) {
        self.white = white.into();
        self.black = black.into();
    }

    pub fn player(&self, color: Color) -> &str {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    pub fn end_ply(&self) -> Option<usize> {
        self.end_ply
    }

    /// 終局を確定する。一度決まった理由は上書きしない。
    pub fn finish(&mut self, termination: Termination) -> bool {
        if self.termination != Termination::None || termination == Termination::None {
            return false;
        }
        self.termination = termination;
        self.end_ply = Some(self.ply());
        true
    }

    pub fn apply(&mut self, mv: &Move) {
        let next = play(self.position(), mv);
        self.history.push(next, mv.clone());
    }

    /// 現局面がルール上の終局か。優先順は詰み/ステイルメイト、50 手、戦力不足、3 回繰り返し。
    pub fn check_termination(&self, legal: &MoveList) -> Termination {
        let current = self.history.last();
        let pos = &current.pos;
        if legal.is_empty() {
            return if pos.is_check() {
                Termination::Checkmate
            } else {
                Termination::Stalemate
            };
        }
        let rule50 = pos.halfmoves() as usize;
        if rule50 >= 100 {
            return Termination::FiftyMoves;
        }
        if pos.is_insufficient_material() {
            return Termination::InsufficientMaterial;
        }

        // 同じ手番の局面だけを、最後の不可逆手までさかのぼって数える
        let ply = self.ply();
        let mut repetitions = 1;
        let mut i = 4;
        while i <= rule50 && i <= ply {
            if self.history.entries[ply - i].key == current.key {
                repetitions += 1;
                if repetitions >= 3 {
                    return Termination::Threefold;
                }
            }
            i += 2;
        }
        Termination::None
    }

    /// 最後の不可逆手の局面を FEN で送り、以降を moves で続ける。
    pub fn position_command(&self) -> String {
        let ply = self.ply();
        let rule50 = self.position().halfmoves() as usize;
        let ply0 = ply.saturating_sub(rule50);
        let entries = self.history.entries();

        let mut cmd = format!("position fen {}", to_fen(&entries[ply0].pos));
        if ply0 < ply {
            cmd.push_str(" moves");
            for entry in &entries[ply0 + 1..=ply] {
                if let Some(mv) = &entry.last_move {
                    cmd.push(' ');
                    cmd.push_str(&move_to_uci(mv, self.chess960));
                }
            }
        }
        cmd
    }

    pub fn outcome(&self) -> GameOutcome {
        match self.termination {
            Termination::None => GameOutcome::InProgress,
            t if t.is_loss() => match self.position().turn() {
                Color::White => GameOutcome::BlackWin,
                Color::Black => GameOutcome::WhiteWin,
            },
            _ => GameOutcome::Draw,
        }
    }

    fn record_score(&mut self, score: i32) {
        self.scores.push(score);
    }

    /// 記録した評価値から学習用サンプルを作る。終局前や記録なしなら空。
    pub fn samples(&self) -> Vec<Sample> {
        let Some(white_result) = self.outcome().white_score() else {
            return Vec::new();
        };
        self.scores
            .iter()
            .zip(self.history.entries())
            .map(|(&score, entry)| Sample {
                fen: to_fen(&entry.pos),
                score,
                result: match entry.pos.turn() {
                    Color::White => white_result,
                    Color::Black => -white_result,
                },
            })
            .collect()
    }
}

/// 1 局を最後まで指す。
///
/// `engines[0]` が開始局面の手番側を持つ。ply の偶奇で手番のエンジンを選ぶ。
/// 時間切れと反則手は終局理由として `game` に記録し、通信エラーだけを返す。
pub fn run_game(
    game: &mut Game,
    mut engines: [&mut EngineClient; 2],
    config: &GameConfig,
) -> EngineResult<()> {
    let turn0 = game.position().turn();
    let white_idx = usize::from(turn0 != Color::White);
    let white_name = engines[white_idx].name().to_string();
    let black_name = engines[1 - white_idx].name().to_string();
    game.set_players(white_name, black_name);

    for engine in engines.iter_mut() {
        engine.new_game(config.chess960)?;
    }

    let mut clocks = config.clocks;
    let mut adjudicator = Adjudicator::new(config.adjudication);

    loop {
        let legal = legal_moves(game.position());
        let rule_end = game.check_termination(&legal);
        if rule_end != Termination::None {
            game.finish(rule_end);
            break;
        }

        let turn = game.ply() % 2;
        let position = game.position_command();
        let req = SearchRequest {
            position: &position,
            limits: &config.limits[turn],
            time_args: time_args(&clocks[white_idx], &clocks[1 - white_idx]),
            timeout_margin_ms: config.timeout_margin_ms,
        };
        let outcome = engines[turn].search(&req, &mut clocks[turn])?;

        let (mv_text, score) = match outcome {
            SearchOutcome::TimeLoss { elapsed_ms } => {
                log::debug!("{}: lost on time ({elapsed_ms} ms)", engines[turn].name());
                game.finish(Termination::TimeLoss);
                break;
            }
            SearchOutcome::BestMove { mv, score, .. } => (mv, score),
        };

        let played = parse_uci_move(game.position(), &mv_text).filter(|m| legal.contains(m));
        let Some(played) = played else {
            log::debug!("{}: illegal move '{mv_text}'", engines[turn].name());
            game.finish(Termination::IllegalMove);
            break;
        };

        if config.record_samples {
            game.record_score(score);
        }

        let verdict = adjudicator.update(turn, score);
        if verdict != Termination::None {
            game.finish(verdict);
            break;
        }

        game.apply(&played);
    }

    log::debug!(
        "game finished at ply {}: {}",
        game.ply(),
        game.termination().label()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selfplay::position::STARTPOS_FEN;

    fn play_uci(game: &mut Game, moves: &[&str]) {
        for text in moves {
            let mv = parse_uci_move(game.position(), text).unwrap();
            game.apply(&mv);
        }
    }

    fn status(game: &Game) -> Termination {
        game.check_termination(&legal_moves(game.position()))
    }

    #[test]
    fn knight_shuffle_reaches_threefold_on_third_occurrence() {
        let mut game = Game::new(STARTPOS_FEN, false).unwrap();
        play_uci(&mut game, &["g1f3", "g8f6", "f3g1", "f6g8"]);
        // 初期局面 2 回目
        assert_eq!(status(&game), Termination::None);
        play_uci(&mut game, &["g1f3", "g8f6", "f3g1"]);
        assert_eq!(status(&game), Termination::None);
        play_uci(&mut game, &["f6g8"]);
        assert_eq!(game.ply(), 8);
        assert_eq!(status(&game), Termination::Threefold);
    }

    #[test]
    fn pawn_move_resets_repetition_window() {
        let mut game = Game::new(STARTPOS_FEN, false).unwrap();
        play_uci(&mut game, &["g1f3", "g8f6", "f3g1", "f6g8", "e2e4"]);
        play_uci(&mut game, &["g8f6", "g1f3", "f6g8", "f3g1", "g8f6", "g1f3", "f6g8"]);
        // e4 以降は 2 回目まで
        assert_eq!(status(&game), Termination::None);
    }

    #[test]
    fn position_command_starts_from_last_irreversible_move() {
        let mut game = Game::new(STARTPOS_FEN, false).unwrap();
        assert_eq!(game.position_command(), format!("position fen {STARTPOS_FEN}"));

        play_uci(&mut game, &["e2e4", "e7e5", "g1f3", "b8c6"]);
        assert_eq!(
            game.position_command(),
            "position fen rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2 moves g1f3 b8c6"
        );
    }

    #[test]
    fn stalemate_and_mate_are_detected() {
        let stalemate = Game::new("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1", false).unwrap();
        assert_eq!(status(&stalemate), Termination::Stalemate);

        let mut mated = Game::new(
            "rnbqkbnr/ppppp2p/5p2/6p1/4P3/2N5/PPPP1PPP/R1BQKBNR w KQkq - 0 3",
            false,
        )
        .unwrap();
        play_uci(&mut mated, &["d1h5"]);
        assert_eq!(status(&mated), Termination::Checkmate);
        assert!(mated.finish(Termination::Checkmate));
        assert_eq!(mated.outcome(), GameOutcome::WhiteWin);
    }

    #[test]
    fn fifty_moves_and_bare_kings() {
        let fifty = Game::new("8/8/4k3/8/8/4K3/4R3/8 w - - 100 80", false).unwrap();
        assert_eq!(status(&fifty), Termination::FiftyMoves);

        let bare = Game::new("8/8/4k3/8/8/4K3/8/8 w - - 0 1", false).unwrap();
        assert_eq!(status(&bare), Termination::InsufficientMaterial);
    }

    #[test]
    fn termination_is_write_once() {
        let mut game = Game::new(STARTPOS_FEN, false).unwrap();
        assert_eq!(game.outcome(), GameOutcome::InProgress);
        assert!(!game.finish(Termination::None));
        assert!(game.finish(Termination::IllegalMove));
        assert!(!game.finish(Termination::DrawAdjudication));
        assert_eq!(game.termination(), Termination::IllegalMove);
        assert_eq!(game.end_ply(), Some(0));
        assert_eq!(game.outcome(), GameOutcome::BlackWin);
    }

    #[test]
    fn history_capacity_doubles() {
        let mut game = Game::new(STARTPOS_FEN, false).unwrap();
        assert!(game.history().capacity() >= PositionHistory::INITIAL_CAPACITY);
        let cycle = ["g1f3", "g8f6", "f3g1", "f6g8"];
        for i in 0..300 {
            play_uci(&mut game, &[cycle[i % 4]]);
        }
        assert_eq!(game.history().len(), 301);
        // 実バッファが 256 を超えた時点で少なくとも倍になっている
        assert!(game.history().capacity() >= 2 * PositionHistory::INITIAL_CAPACITY);
        assert!(game.history().get(0).unwrap().last_move.is_none());
        assert!(game.history().get(300).unwrap().last_move.is_some());
    }

    #[test]
    fn draw_adjudication_counts_ply_pairs() {
        let mut adj = Adjudicator::new(AdjudicationConfig {
            draw_count: 2,
            draw_score: 10,
            ..AdjudicationConfig::default()
        });
        assert_eq!(adj.update(0, 5), Termination::None);
        assert_eq!(adj.update(1, -10), Termination::None);
        assert_eq!(adj.update(0, 0), Termination::None);
        // 条件を外れるとやり直し
        assert_eq!(adj.update(1, 11), Termination::None);
        for turn in [0, 1, 0] {
            assert_eq!(adj.update(turn, 0), Termination::None);
        }
        assert_eq!(adj.update(1, 0), Termination::DrawAdjudication);
    }

    #[test]
    fn resign_counter_is_per_side_and_handles_mate_scores() {
        let mut adj = Adjudicator::new(AdjudicationConfig {
            resign_count: 2,
            resign_score: 500,
            ..AdjudicationConfig::default()
        });
        assert_eq!(adj.update(0, -600), Termination::None);
        // もう一方の側の評価値はカウンタに影響しない
        assert_eq!(adj.update(1, 600), Termination::None);
        assert_eq!(adj.update(0, -499), Termination::None);
        assert_eq!(adj.update(1, 0), Termination::None);
        assert_eq!(adj.update(0, i32::MIN), Termination::None);
        assert_eq!(adj.update(1, 0), Termination::None);
        assert_eq!(adj.update(0, -500), Termination::Resignation);
    }

    #[test]
    fn samples_carry_result_from_side_to_move() {
        let mut game = Game::new(STARTPOS_FEN, false).unwrap();
        game.record_score(20);
        play_uci(&mut game, &["e2e4"]);
        game.record_score(-15);
        assert!(game.samples().is_empty());

        assert!(game.finish(Termination::Resignation));
        let samples = game.samples();
        assert_eq!(samples.len(), 2);
        // 黒番で投了したので白の勝ち
        assert_eq!(samples[0].result, 1);
        assert_eq!(samples[0].score, 20);
        assert_eq!(samples[1].result, -1);
        assert_eq!(samples[1].fen, to_fen(game.position()));
    }
}
