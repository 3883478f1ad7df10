pub mod engine;
pub mod error;
pub mod game;
pub mod pgn;
pub mod position;
pub mod process;
pub mod time_control;
pub mod types;

pub use engine::{ClientState, EngineClient, EngineConfig};
pub use error::{EngineError, EngineResult, PositionError};
pub use game::{
    AdjudicationConfig, Adjudicator, Game, GameConfig, PositionHistory, Sample, Termination,
    run_game,
};
pub use pgn::{decode_result, game_pgn};
pub use position::{STARTPOS_FEN, load_openings, parse_position_line};
pub use process::{EngineCommand, EngineProcess, TrafficLog};
pub use time_control::TimeBudget;
pub use types::{GameOutcome, SearchLimits, SearchOutcome, SearchRequest, TimeArgs};
