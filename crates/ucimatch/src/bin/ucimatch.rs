/// UCI エンジン 2 本による対局ランナー。
///
/// 対局ごとに先後を入れ替えながら `--games` 局を順に指し、PGN と結果 JSONL を書き出す。
///
/// # 使用例
///
/// ```shell
/// cargo run -p ucimatch --release --bin ucimatch -- \
///   --engine /usr/local/bin/stockfish --engine ./target/release/my-engine \
///   --games 20 --time 10000 --inc 100 \
///   --uci-option "Hash=64" --engine-uci-option "1:Threads=2" \
///   --openings openings.epd --random-openings \
///   --draw-count 8 --draw-score 10 --resign-count 4 --resign-score 800 \
///   --pgn runs/ucimatch/sf-vs-mine.pgn --samples runs/ucimatch/sf-vs-mine.samples.jsonl.gz
/// ```
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use rand::prelude::IndexedRandom;
use serde::Serialize;
use shakmaty::{Color, Position};
use ucimatch::common::io::OutputFile;
use ucimatch::selfplay::{
    AdjudicationConfig, EngineClient, EngineCommand, EngineConfig, Game, GameConfig, GameOutcome,
    SearchLimits, TimeBudget, TrafficLog, decode_result, game_pgn, load_openings, run_game,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "UCI engine vs engine match runner")]
struct Cli {
    /// Engine binary (give exactly two; the same path may be repeated)
    #[arg(long = "engine", required = true)]
    engines: Vec<PathBuf>,

    /// Extra argument for one engine process (format: "INDEX:ARG", can be repeated)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Display name for each engine in order (defaults to the engine's `id name`)
    #[arg(long = "engine-name")]
    engine_names: Vec<String>,

    /// UCI options for both engines (format: "Name=Value", can be specified multiple times)
    #[arg(long = "uci-option", num_args = 1..)]
    uci_options: Option<Vec<String>>,

    /// Per-engine UCI options (format: "INDEX:Name=Value"); replaces --uci-option for that engine
    #[arg(long = "engine-uci-option", num_args = 1..)]
    engine_uci_options: Option<Vec<String>>,

    /// Node limit per move for both engines
    #[arg(long)]
    nodes: Option<u64>,

    /// Node limit for the first engine (overrides --nodes)
    #[arg(long)]
    nodes_first: Option<u64>,

    /// Node limit for the second engine (overrides --nodes)
    #[arg(long)]
    nodes_second: Option<u64>,

    /// Depth limit per move for both engines
    #[arg(long)]
    depth: Option<u32>,

    /// Depth limit for the first engine (overrides --depth)
    #[arg(long)]
    depth_first: Option<u32>,

    /// Depth limit for the second engine (overrides --depth)
    #[arg(long)]
    depth_second: Option<u32>,

    /// Fixed time per move in milliseconds for both engines
    #[arg(long)]
    movetime: Option<u64>,

    /// Fixed time per move for the first engine (overrides --movetime)
    #[arg(long)]
    movetime_first: Option<u64>,

    /// Fixed time per move for the second engine (overrides --movetime)
    #[arg(long)]
    movetime_second: Option<u64>,

    /// Time budget per game in milliseconds for each engine (no clock when omitted)
    #[arg(long)]
    time: Option<u64>,

    /// Increment per move in milliseconds (used with --time)
    #[arg(long, default_value_t = 0)]
    inc: u64,

    /// Grace period added to --movetime before a search counts as lost on time (no clock only)
    #[arg(long, default_value_t = 100)]
    timeout_margin_ms: u64,

    /// Play Chess960 (sends UCI_Chess960 and uses king-takes-rook castling)
    #[arg(long, default_value_t = false)]
    chess960: bool,

    /// Draw when both engines report |score| <= --draw-score for this many consecutive moves each
    #[arg(long, default_value_t = 0)]
    draw_count: u32,

    /// Score threshold (cp) for draw adjudication
    #[arg(long, default_value_t = 0)]
    draw_score: i32,

    /// Resign after this many consecutive moves of one engine with score <= -(--resign-score)
    #[arg(long, default_value_t = 0)]
    resign_count: u32,

    /// Score threshold (cp) for resignation
    #[arg(long, default_value_t = 0)]
    resign_score: i32,

    /// Single start position (FEN, EPD, or full `position ...` command)
    #[arg(long)]
    fen: Option<String>,

    /// Start position file (FEN/EPD/`position` lines, one per line; `.gz` allowed)
    #[arg(long)]
    openings: Option<PathBuf>,

    /// Pick openings at random instead of in file order
    #[arg(long, default_value_t = false)]
    random_openings: bool,

    /// Number of games to play
    #[arg(long, default_value_t = 1)]
    games: u32,

    /// PGN output path (defaults to runs/ucimatch/<timestamp>.pgn, "-" for stdout)
    #[arg(long)]
    pgn: Option<PathBuf>,

    /// Per-game results JSONL (defaults to <pgn>.results.jsonl)
    #[arg(long)]
    results: Option<PathBuf>,

    /// Training samples JSONL (`{fen, score, result}` per move, gzip when ending in .gz)
    #[arg(long)]
    samples: Option<PathBuf>,

    /// Log every line sent to / received from the engines
    #[arg(long)]
    log: Option<PathBuf>,
}

#[derive(Serialize)]
struct GameRecord<'a> {
    game_id: u32,
    white: &'a str,
    black: &'a str,
    result: &'a str,
    reason: &'a str,
    outcome: &'static str,
    plies: usize,
    fen: &'a str,
}

/// 1 本目のエンジンから見た勝敗
#[derive(Default)]
struct Tally {
    wins: u32,
    draws: u32,
    losses: u32,
}

impl Tally {
    fn record(&mut self, outcome: GameOutcome, first_is_white: bool) {
        match (outcome, first_is_white) {
            (GameOutcome::Draw, _) => self.draws += 1,
            (GameOutcome::WhiteWin, true) | (GameOutcome::BlackWin, false) => self.wins += 1,
            (GameOutcome::WhiteWin, false) | (GameOutcome::BlackWin, true) => self.losses += 1,
            (GameOutcome::InProgress, _) => {}
        }
    }

    fn score(&self) -> f64 {
        let games = self.wins + self.draws + self.losses;
        if games == 0 {
            return 0.0;
        }
        (f64::from(self.wins) + 0.5 * f64::from(self.draws)) / f64::from(games)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    if cli.engines.len() != 2 {
        bail!("exactly 2 engines are required (got {})", cli.engines.len());
    }
    if cli.engine_names.len() > 2 {
        bail!("--engine-name given more than twice");
    }
    if cli.games == 0 {
        bail!("--games must be at least 1");
    }

    let openings = load_openings(cli.openings.as_deref(), cli.fen.as_deref(), cli.chess960)?;
    log::info!("loaded {} start position(s)", openings.len());

    let engine_cfgs = build_engine_configs(&cli)?;
    let game_template = build_game_config(&cli);

    let timestamp = Local::now();
    let pgn_path = resolve_output_path(cli.pgn.as_deref(), &timestamp);
    let results_path = cli.results.clone().or_else(|| default_results_path(&pgn_path));

    let mut pgn_out = OutputFile::create(&pgn_path)
        .with_context(|| format!("failed to create {}", pgn_path.display()))?;
    let mut results_out = results_path
        .as_deref()
        .map(|p| OutputFile::create(p).with_context(|| format!("failed to create {}", p.display())))
        .transpose()?;
    let mut samples_out = cli
        .samples
        .as_deref()
        .map(|p| OutputFile::create(p).with_context(|| format!("failed to create {}", p.display())))
        .transpose()?;
    let traffic = cli
        .log
        .as_deref()
        .map(|p| TrafficLog::create(p).with_context(|| format!("failed to create {}", p.display())))
        .transpose()?;

    let mut first = EngineClient::spawn(&engine_cfgs[0], traffic.clone())
        .with_context(|| format!("failed to start {}", cli.engines[0].display()))?;
    let mut second = EngineClient::spawn(&engine_cfgs[1], traffic)
        .with_context(|| format!("failed to start {}", cli.engines[1].display()))?;
    log::info!("{} vs {}", first.name(), second.name());

    let mut rng = rand::rng();
    let mut tally = Tally::default();

    for game_idx in 0..cli.games {
        let game_id = game_idx + 1;
        let fen = if cli.random_openings {
            openings.choose(&mut rng).map_or(openings[0].as_str(), String::as_str)
        } else {
            openings[game_idx as usize % openings.len()].as_str()
        };

        // 奇数局目は 2 本目のエンジンが開始局面の手番を持つ
        let swapped = game_idx % 2 == 1;
        let mut config = game_template.clone();
        if swapped {
            config.limits.swap(0, 1);
            config.clocks.swap(0, 1);
        }

        let mut game = Game::new(fen, cli.chess960)?;
        let engines = if swapped {
            [&mut second, &mut first]
        } else {
            [&mut first, &mut second]
        };
        run_game(&mut game, engines, &config).with_context(|| format!("game {game_id} aborted"))?;

        let (result, reason) = decode_result(&game);
        let first_is_white = game.history().entries()[0].pos.turn().is_white() != swapped;
        tally.record(game.outcome(), first_is_white);
        log::info!(
            "game {game_id}/{}: {} vs {} {result} ({reason}, {} plies)",
            cli.games,
            game.player(Color::White),
            game.player(Color::Black),
            game.ply()
        );

        pgn_out.write_text(&game_pgn(&game))?;
        pgn_out.flush()?;
        if let Some(out) = results_out.as_mut() {
            let record = GameRecord {
                game_id,
                white: game.player(Color::White),
                black: game.player(Color::Black),
                result,
                reason,
                outcome: game.outcome().label(),
                plies: game.ply(),
                fen,
            };
            out.write_jsonl(&record)?;
            out.flush()?;
        }
        if let Some(out) = samples_out.as_mut() {
            for sample in game.samples() {
                out.write_jsonl(&sample)?;
            }
        }
    }

    first.quit();
    second.quit();

    for out in [Some(pgn_out), results_out, samples_out].into_iter().flatten() {
        finish_output(out)?;
    }

    println!();
    println!("=== Match Complete ===");
    println!(
        "{} vs {}: +{} ={} -{} (score {:.3})",
        first.name(),
        second.name(),
        tally.wins,
        tally.draws,
        tally.losses,
        tally.score()
    );
    println!("PGN: {}", pgn_path.display());
    if let Some(path) = &results_path {
        println!("Results: {}", path.display());
    }
    println!("======================");
    Ok(())
}

fn build_engine_configs(cli: &Cli) -> Result<[EngineConfig; 2]> {
    let mut cfgs = [
        EngineConfig::new(EngineCommand::new(&cli.engines[0])),
        EngineConfig::new(EngineCommand::new(&cli.engines[1])),
    ];

    for (cfg, name) in cfgs.iter_mut().zip(&cli.engine_names) {
        cfg.name = Some(name.clone());
    }

    for arg in &cli.engine_args {
        let (idx, value) = split_engine_index(arg, "--engine-arg")?;
        cfgs[idx].command.args.push(value.to_string());
    }

    let common = cli
        .uci_options
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|opt| parse_uci_option(opt))
        .collect::<Result<Vec<_>>>()?;
    let mut per_engine: [Option<Vec<(String, String)>>; 2] = [None, None];
    for opt in cli.engine_uci_options.as_deref().unwrap_or_default() {
        let (idx, kv) = split_engine_index(opt, "--engine-uci-option")?;
        per_engine[idx].get_or_insert_with(Vec::new).push(parse_uci_option(kv)?);
    }
    for (cfg, own) in cfgs.iter_mut().zip(per_engine) {
        cfg.options = own.unwrap_or_else(|| common.clone());
    }
    Ok(cfgs)
}

/// `"INDEX:rest"` を分解する。
fn split_engine_index<'a>(arg: &'a str, flag: &str) -> Result<(usize, &'a str)> {
    let (idx_str, rest) = arg
        .split_once(':')
        .with_context(|| format!("invalid {flag} format: {arg}"))?;
    let idx: usize = idx_str
        .parse()
        .with_context(|| format!("invalid engine index: {idx_str}"))?;
    if idx >= 2 {
        bail!("{flag} index {idx} out of range (0..2)");
    }
    Ok((idx, rest))
}

/// `"Name=Value"` を分解する。名前には空白を含んでよい。
fn parse_uci_option(opt: &str) -> Result<(String, String)> {
    let (name, value) = opt
        .split_once('=')
        .with_context(|| format!("invalid UCI option (expected Name=Value): {opt}"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("empty UCI option name: {opt}");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn build_game_config(cli: &Cli) -> GameConfig {
    let limits = |nodes: Option<u64>, depth: Option<u32>, movetime: Option<u64>| SearchLimits {
        nodes: nodes.or(cli.nodes),
        depth: depth.or(cli.depth),
        movetime: movetime.or(cli.movetime),
    };
    let clock = TimeBudget::from_config(cli.time, cli.inc);
    GameConfig {
        chess960: cli.chess960,
        limits: [
            limits(cli.nodes_first, cli.depth_first, cli.movetime_first),
            limits(cli.nodes_second, cli.depth_second, cli.movetime_second),
        ],
        clocks: [clock, clock],
        adjudication: AdjudicationConfig {
            draw_count: cli.draw_count,
            draw_score: cli.draw_score,
            resign_count: cli.resign_count,
            resign_score: cli.resign_score,
        },
        timeout_margin_ms: cli.timeout_margin_ms,
        record_samples: cli.samples.is_some(),
    }
}

fn resolve_output_path(out: Option<&Path>, timestamp: &chrono::DateTime<Local>) -> PathBuf {
    if let Some(path) = out {
        return path.to_path_buf();
    }
    PathBuf::from("runs/ucimatch").join(format!("{}.pgn", timestamp.format("%Y%m%d-%H%M%S")))
}

fn default_results_path(pgn: &Path) -> Option<PathBuf> {
    if pgn.as_os_str() == "-" {
        return None;
    }
    Some(pgn.with_extension("results.jsonl"))
}

fn finish_output(out: OutputFile) -> Result<()> {
    let path = out.path().to_path_buf();
    out.finish()
        .with_context(|| format!("failed to finish {}", path.display()))
}
