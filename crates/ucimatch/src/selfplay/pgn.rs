use std::fmt::Write as _;

use shakmaty::{Color, Position};

use super::game::{Game, Termination};
use super::position::{move_to_san, to_fen};

/// 白から見た結果文字列と終局理由。
pub fn decode_result(game: &Game) -> (&'static str, &'static str) {
    let white_to_move = game.position().turn() == Color::White;
    let loss = if white_to_move { "0-1" } else { "1-0" };
    match game.termination() {
        Termination::None => ("*", "unterminated"),
        Termination::Checkmate => (loss, "checkmate"),
        Termination::TimeLoss => (loss, "time forfeit"),
        Termination::IllegalMove => (loss, "illegal move"),
        Termination::Resignation => (
            loss,
            if white_to_move {
                "white resigns"
            } else {
                "black resigns"
            },
        ),
        Termination::Stalemate => ("1/2-1/2", "stalemate"),
        Termination::Threefold => ("1/2-1/2", "3 repetitions"),
        Termination::FiftyMoves => ("1/2-1/2", "50 move rule"),
        Termination::InsufficientMaterial => ("1/2-1/2", "insufficient material"),
        Termination::DrawAdjudication => ("1/2-1/2", "draw by adjudication"),
    }
}

/// 1 局分の PGN（タグ + 指し手 + 結果 + 空行）。
pub fn game_pgn(game: &Game) -> String {
    let (result, reason) = decode_result(game);
    let entries = game.history().entries();
    let ply_count = game.ply();

    let mut pgn = String::new();
    let _ = writeln!(pgn, "[White \"{}\"]", game.player(Color::White));
    let _ = writeln!(pgn, "[Black \"{}\"]", game.player(Color::Black));
    let _ = writeln!(pgn, "[Result \"{result}\"]");
    let _ = writeln!(pgn, "[Termination \"{reason}\"]");
    let _ = writeln!(pgn, "[FEN \"{}\"]", to_fen(&entries[0].pos));
    if game.chess960() {
        pgn.push_str("[Variant \"Chess960\"]\n");
    }
    let _ = writeln!(pgn, "[PlyCount \"{ply_count}\"]\n");

    for ply in 1..=ply_count {
        let before = &entries[ply - 1].pos;
        let after = &entries[ply];
        let Some(mv) = &after.last_move else {
            continue;
        };

        let white_moved = before.turn() == Color::White;
        if white_moved || ply == 1 {
            let number = before.fullmoves();
            let _ = write!(pgn, "{number}{} ", if white_moved { "." } else { "..." });
        }

        pgn.push_str(&move_to_san(before, mv));
        if after.pos.is_check() {
            let mate = ply == ply_count && game.termination() == Termination::Checkmate;
            pgn.push(if mate { '#' } else { '+' });
        }
        pgn.push(if ply % 10 == 0 { '\n' } else { ' ' });
    }

    pgn.push_str(result);
    pgn.push_str("\n\n");
    pgn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selfplay::position::{STARTPOS_FEN, parse_uci_move};

    fn play_uci(game: &mut Game, moves: &[&str]) {
        for text in moves {
            let mv = parse_uci_move(game.position(), text).unwrap();
            game.apply(&mv);
        }
    }

    #[test]
    fn unfinished_game_is_unterminated() {
        let game = Game::new(STARTPOS_FEN, false).unwrap();
        assert_eq!(decode_result(&game), ("*", "unterminated"));
    }

    #[test]
    fn loser_is_side_to_move() {
        let mut game = Game::new(STARTPOS_FEN, false).unwrap();
        play_uci(&mut game, &["e2e4"]);
        game.finish(Termination::Resignation);
        assert_eq!(decode_result(&game), ("1-0", "black resigns"));

        let mut game = Game::new(STARTPOS_FEN, false).unwrap();
        game.finish(Termination::TimeLoss);
        assert_eq!(decode_result(&game), ("0-1", "time forfeit"));
    }

    #[test]
    fn fools_mate_transcript() {
        let mut game = Game::new(STARTPOS_FEN, false).unwrap();
        game.set_players("alpha", "beta");
        play_uci(&mut game, &["f2f3", "e7e5", "g2g4", "d8h4"]);
        game.finish(Termination::Checkmate);

        let pgn = game_pgn(&game);
        let expected = format!(
            "[White \"alpha\"]\n[Black \"beta\"]\n[Result \"0-1\"]\n[Termination \"checkmate\"]\n\
             [FEN \"{STARTPOS_FEN}\"]\n[PlyCount \"4\"]\n\n1. f3 e5 2. g4 Qh4# 0-1\n\n"
        );
        assert_eq!(pgn, expected);
    }

    #[test]
    fn black_first_move_gets_ellipsis_and_lines_wrap() {
        let fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
        let mut game = Game::new(fen, true).unwrap();
        let cycle = ["g8f6", "g1f3", "f6g8", "f3g1"];
        for i in 0..12 {
            play_uci(&mut game, &[cycle[i % 4]]);
        }
        let pgn = game_pgn(&game);
        assert!(pgn.contains("[Variant \"Chess960\"]\n"));
        assert!(pgn.contains("\n\n1... Nf6 2. Nf3 Ng8 "));
        // 10 手目の後で改行
        let body = pgn.split("\n\n").nth(1).unwrap();
        assert_eq!(body.lines().count(), 2);
        assert!(pgn.ends_with("Ng1 *\n\n"));
    }
}
