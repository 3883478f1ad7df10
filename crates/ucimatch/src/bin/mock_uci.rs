/// テスト用の最小 UCI エンジン。
///
/// 合法手からランダムに指すだけだが、`--mode` で反則手・応答なし・info 連打・詰み優先を切り替えられる。
/// 評価値は `--score` / `--mate` で固定値を報告する。
///
/// ```shell
/// ucimatch --engine target/debug/mock-uci --engine target/debug/mock-uci \
///   --engine-arg "1:--mode" --engine-arg "1:greedy" --movetime 10
/// ```
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use rand::SeedableRng;
use rand::prelude::IndexedRandom;
use rand::rngs::StdRng;
use shakmaty::{Chess, Move, Position};
use ucimatch::selfplay::position::{
    build_position, legal_moves, move_to_uci, parse_position_line, play,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// 合法手からランダム
    Random,
    /// 1 手詰みがあれば指し、なければランダム
    Greedy,
    /// 常に合法でない手を返す
    Illegal,
    /// `stop` が来るまで bestmove を返さない
    Hang,
    /// `stop` が来るまで info を出し続ける
    Flood,
}

const FLOOD_BATCH: usize = 64;
const FLOOD_PAUSE: Duration = Duration::from_micros(50);

/// `go` から `stop` までの間 info 行を書き続けるスレッド
struct Flood {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<io::Result<()>>,
}

impl Flood {
    fn start() -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || -> io::Result<()> {
            while !flag.load(Ordering::Relaxed) {
                let mut out = io::stdout().lock();
                for _ in 0..FLOOD_BATCH {
                    writeln!(out, "info depth 1 nodes 1 score cp 0")?;
                }
                out.flush()?;
                drop(out);
                std::thread::sleep(FLOOD_PAUSE);
            }
            Ok(())
        });
        Self { stop, handle }
    }

    fn finish(self) -> io::Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        self.handle
            .join()
            .map_err(|_| io::Error::other("flood thread panicked"))?
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Minimal UCI engine used by the ucimatch tests")]
struct Cli {
    /// Name reported in `id name`
    #[arg(long, default_value = "mock-uci")]
    name: String,

    #[arg(long, value_enum, default_value_t = Mode::Random)]
    mode: Mode,

    /// Centipawn score reported before every bestmove
    #[arg(long, allow_hyphen_values = true)]
    score: Option<i32>,

    /// Mate distance reported before every bestmove (overrides --score)
    #[arg(long, allow_hyphen_values = true)]
    mate: Option<i32>,

    /// RNG seed (random when omitted)
    #[arg(long)]
    seed: Option<u64>,
}

struct MockEngine {
    cli: Cli,
    rng: StdRng,
    pos: Chess,
    chess960: bool,
    pending_stop: bool,
    flood: Option<Flood>,
}

impl MockEngine {
    fn choose_move(&mut self) -> Option<Move> {
        let legal = legal_moves(&self.pos);
        if self.cli.mode == Mode::Greedy {
            if let Some(mate) = legal.iter().find(|m| play(&self.pos, m).is_checkmate()) {
                return Some(mate.clone());
            }
        }
        legal.choose(&mut self.rng).cloned()
    }

    fn bestmove(&mut self, out: &mut impl Write) -> io::Result<()> {
        if let Some(mate) = self.cli.mate {
            writeln!(out, "info depth 1 nodes 1 score mate {mate}")?;
        } else if let Some(cp) = self.cli.score {
            writeln!(out, "info depth 1 nodes 1 score cp {cp}")?;
        } else {
            writeln!(out, "info depth 1 nodes 1")?;
        }
        let mv = match self.cli.mode {
            Mode::Illegal => "0000".to_string(),
            _ => self
                .choose_move()
                .map_or_else(|| "0000".to_string(), |m| move_to_uci(&m, self.chess960)),
        };
        writeln!(out, "bestmove {mv}")?;
        out.flush()
    }

    fn handle(&mut self, line: &str, out: &mut impl Write) -> io::Result<bool> {
        match line.split_whitespace().next() {
            Some("uci") => {
                writeln!(out, "id name {}", self.cli.name)?;
                writeln!(out, "id author ucimatch")?;
                writeln!(out, "option name Hash type spin default 16 min 1 max 1024")?;
                writeln!(out, "option name UCI_Chess960 type check default false")?;
                writeln!(out, "uciok")?;
            }
            Some("isready") => writeln!(out, "readyok")?,
            Some("setoption") => {
                if line.contains("name UCI_Chess960 value true") {
                    self.chess960 = true;
                }
            }
            Some("ucinewgame") => self.pending_stop = false,
            Some("position") => match parse_position_line(line)
                .and_then(|parsed| Ok(build_position(&parsed, self.chess960)?))
            {
                Ok(pos) => self.pos = pos,
                Err(e) => writeln!(out, "info string bad position: {e}")?,
            },
            Some("go") => match self.cli.mode {
                Mode::Hang => self.pending_stop = true,
                Mode::Flood => {
                    self.pending_stop = true;
                    self.flood = Some(Flood::start());
                }
                _ => self.bestmove(out)?,
            },
            Some("stop") => {
                if let Some(flood) = self.flood.take() {
                    flood.finish()?;
                }
                if self.pending_stop {
                    self.pending_stop = false;
                    self.bestmove(out)?;
                }
            }
            Some("quit") => {
                if let Some(flood) = self.flood.take() {
                    flood.finish()?;
                }
                return Ok(false);
            }
            _ => {}
        }
        out.flush()?;
        Ok(true)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };
    let mut engine = MockEngine {
        cli,
        rng,
        pos: Chess::default(),
        chess960: false,
        pending_stop: false,
        flood: None,
    };

    let stdin = io::stdin();
    // flood スレッドと共有するので行ごとにロックする
    let mut out = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        log::debug!("<- {line}");
        if !engine.handle(line.trim(), &mut out)? {
            break;
        }
    }
    Ok(())
}
