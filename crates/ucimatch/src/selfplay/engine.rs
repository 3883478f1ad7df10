use std::collections::HashSet;
use std::time::{Duration, Instant};

use super::error::{EngineError, EngineResult};
use super::process::{EngineCommand, EngineProcess, TrafficLog};
use super::time_control::TimeBudget;
use super::types::{
    InfoSnapshot, SearchOutcome, SearchRequest, duration_to_millis, go_command, parse_bestmove,
};

pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// エンジン起動時の設定。
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub command: EngineCommand,
    /// 表示名。`None` の場合は `id name` を採用する
    pub name: Option<String>,
    /// 起動直後に送る UCI オプション（順序どおりに送る）
    pub options: Vec<(String, String)>,
}

impl EngineConfig {
    pub fn new(command: EngineCommand) -> Self {
        Self {
            command,
            name: None,
            options: Vec::new(),
        }
    }
}

/// プロトコル上の状態。
///
/// `Init → OptionsSet → Ready ⇄ Searching → Terminated`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    Init,
    OptionsSet,
    Ready,
    Searching,
    Terminated,
}

/// UCI エンジン 1 本とのやり取りをまとめたクライアント。
pub struct EngineClient {
    process: EngineProcess,
    state: ClientState,
    opt_names: HashSet<String>,
}

impl EngineClient {
    /// プロセスを起動し、`uci` ハンドシェイクとオプション設定まで済ませる。
    pub fn spawn(cfg: &EngineConfig, log: Option<TrafficLog>) -> EngineResult<Self> {
        let initial_name = cfg.name.clone().unwrap_or_else(|| cfg.command.default_name());
        let process = EngineProcess::spawn(&cfg.command, initial_name, log)?;
        let mut client = Self {
            process,
            state: ClientState::Init,
            opt_names: HashSet::new(),
        };
        client.handshake(cfg.name.is_none())?;
        client.apply_options(&cfg.options)?;
        Ok(client)
    }

    pub fn name(&self) -> &str {
        self.process.name()
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// `uciok` までを読み、`id name` と宣言オプション名を拾う。
    fn handshake(&mut self, adopt_id_name: bool) -> EngineResult<()> {
        self.process.write_line("uci")?;
        loop {
            let line = self.process.read_line_timeout(ENGINE_READY_TIMEOUT, "uci")?;
            if let Some(rest) = line.strip_prefix("id name ") {
                let id_name = rest.trim();
                if adopt_id_name && !id_name.is_empty() {
                    log::debug!("{}: identifies as '{id_name}'", self.process.name());
                    self.process.set_name(id_name.to_string());
                }
            } else if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    self.opt_names.insert(name);
                }
            } else if line.trim() == "uciok" {
                break;
            }
        }
        Ok(())
    }

    fn apply_options(&mut self, options: &[(String, String)]) -> EngineResult<()> {
        for (name, value) in options {
            if !self.opt_names.is_empty() && !self.opt_names.contains(name) {
                log::warn!("{}: option '{name}' is not advertised by the engine", self.name());
            }
            self.process.write_line(&format!("setoption name {name} value {value}"))?;
        }
        self.state = ClientState::OptionsSet;
        Ok(())
    }

    /// 対局開始の準備。前の対局の出力を読み切るため最後に isready で同期する。
    pub fn new_game(&mut self, chess960: bool) -> EngineResult<()> {
        self.ensure_alive()?;
        if chess960 {
            self.process.write_line("setoption name UCI_Chess960 value true")?;
        }
        self.process.write_line("ucinewgame")?;
        self.sync_ready()?;
        self.state = ClientState::Ready;
        Ok(())
    }

    /// `isready` を送り、`readyok` まで関係ない行を読み捨てる。
    pub fn sync_ready(&mut self) -> EngineResult<()> {
        self.ensure_alive()?;
        self.process.write_line("isready")?;
        loop {
            let line = self.process.read_line_timeout(ENGINE_READY_TIMEOUT, "isready")?;
            if line.trim() == "readyok" {
                return Ok(());
            }
        }
    }

    /// 局面を送り、持ち時間を締め切りとして探索させる。
    ///
    /// 締め切りを過ぎたら `stop` を送り、保留中の bestmove を読み捨ててから時間切れを返す。
    /// 締め切り後に届いた bestmove も時間切れとして扱う。
    pub fn search(
        &mut self,
        req: &SearchRequest<'_>,
        budget: &mut TimeBudget,
    ) -> EngineResult<SearchOutcome> {
        self.ensure_alive()?;
        if self.state != ClientState::Ready {
            return Err(self.violation(format!("search requested in state {:?}", self.state)));
        }
        self.process.write_line(req.position)?;
        self.sync_ready()?;
        self.process.write_line(&go_command(req.limits, req.time_args))?;
        self.state = ClientState::Searching;

        let start = Instant::now();
        let deadline = budget.deadline(start, req.limits, req.timeout_margin_ms);
        let mut snapshot = InfoSnapshot::default();

        loop {
            // info が途切れず届く場合もあるので、受信のたびに締め切りを確かめる
            let line = match deadline {
                Some(d) if Instant::now() >= d => None,
                Some(d) => self.process.read_line_until(d)?,
                None => Some(self.process.read_line()?),
            };
            let Some(line) = line else {
                let elapsed_ms = duration_to_millis(start.elapsed());
                self.stop_and_drain()?;
                budget.consume(elapsed_ms);
                self.state = ClientState::Ready;
                log::debug!("{}: time out after {elapsed_ms} ms", self.name());
                return Ok(SearchOutcome::TimeLoss { elapsed_ms });
            };

            if let Err(detail) = snapshot.update_from_line(&line) {
                return Err(self.violation(detail));
            }
            let Some(bestmove) = parse_bestmove(&line) else {
                continue;
            };
            let mv = bestmove.map_err(|detail| self.violation(detail))?;
            let elapsed_ms = duration_to_millis(start.elapsed());
            self.state = ClientState::Ready;

            let overrun = if budget.has_clock() {
                budget.consume(elapsed_ms);
                budget.is_flagged()
            } else {
                deadline.is_some_and(|d| Instant::now() > d)
            };
            if overrun {
                log::debug!("{}: bestmove arrived late ({elapsed_ms} ms)", self.name());
                return Ok(SearchOutcome::TimeLoss { elapsed_ms });
            }
            budget.add_increment();
            return Ok(SearchOutcome::BestMove {
                mv,
                score: snapshot.score.unwrap_or(0),
                elapsed_ms,
                depth: snapshot.depth,
            });
        }
    }

    /// 止まらない探索を `stop` で打ち切り、bestmove が届くまで読み捨てる。
    fn stop_and_drain(&mut self) -> EngineResult<()> {
        self.process.write_line("stop")?;
        loop {
            let line = self.process.read_line_timeout(ENGINE_READY_TIMEOUT, "stop")?;
            if parse_bestmove(&line).is_some() {
                return Ok(());
            }
        }
    }

    /// `quit` を送ってプロセスを終了させる。以後の操作はエラーになる。
    pub fn quit(&mut self) {
        self.process.terminate();
        self.state = ClientState::Terminated;
    }

    fn ensure_alive(&self) -> EngineResult<()> {
        if self.state == ClientState::Terminated || self.process.is_terminated() {
            return Err(EngineError::Terminated {
                engine: self.name().to_string(),
            });
        }
        Ok(())
    }

    fn violation(&self, detail: String) -> EngineError {
        EngineError::Protocol {
            engine: self.name().to_string(),
            detail,
        }
    }
}

/// `option name <名前> type ...` から名前部分（空白を含みうる）を取り出す。
pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let mut parts = Vec::new();
            while let Some(next) = tokens.next_if(|t| *t != "type") {
                parts.push(next);
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_name_may_contain_spaces() {
        assert_eq!(
            parse_option_name("name Clear Hash type button").as_deref(),
            Some("Clear Hash")
        );
        assert_eq!(
            parse_option_name("name Hash type spin default 16 min 1 max 33554432").as_deref(),
            Some("Hash")
        );
        assert_eq!(parse_option_name("type spin"), None);
    }
}
