use std::time::{Duration, Instant};

use super::types::{SearchLimits, TimeArgs};

/// エンジン 1 本分の持ち時間。
///
/// 手数に関係なく、探索ごとに実経過時間だけ減る。負になった時点で時間切れ負け。
/// `remaining_ms == None` は持ち時間なし（movetime 指定時はそれ + 余裕で打ち切る）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeBudget {
    remaining_ms: Option<i64>,
    increment_ms: i64,
}

impl TimeBudget {
    pub fn new(time_ms: u64, increment_ms: u64) -> Self {
        Self {
            remaining_ms: Some(clamp_ms(time_ms)),
            increment_ms: clamp_ms(increment_ms),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            remaining_ms: None,
            increment_ms: 0,
        }
    }

    /// 設定値から作る。`time_ms` 未指定なら持ち時間なし。
    pub fn from_config(time_ms: Option<u64>, increment_ms: u64) -> Self {
        match time_ms {
            Some(t) => Self::new(t, increment_ms),
            None => Self::unlimited(),
        }
    }

    pub fn remaining_ms(&self) -> Option<i64> {
        self.remaining_ms
    }

    pub fn has_clock(&self) -> bool {
        self.remaining_ms.is_some()
    }

    pub fn is_flagged(&self) -> bool {
        self.remaining_ms.is_some_and(|r| r < 0)
    }

    /// 探索開始時刻から締め切りを計算する。
    ///
    /// 持ち時間があればそれが上限。無い場合は movetime + `margin_ms`、どちらも無ければ無制限。
    pub fn deadline(&self, start: Instant, limits: &SearchLimits, margin_ms: u64) -> Option<Instant> {
        match (self.remaining_ms, limits.movetime) {
            (Some(remaining), _) => Some(start + Duration::from_millis(remaining.max(0) as u64)),
            (None, Some(movetime)) => {
                Some(start + Duration::from_millis(movetime.saturating_add(margin_ms)))
            }
            (None, None) => None,
        }
    }

    /// `elapsed_ms` 経過時点での残り時間。持ち時間なしなら `None`。
    pub fn left_after(&self, elapsed_ms: u64) -> Option<i64> {
        self.remaining_ms.map(|r| r.saturating_sub(clamp_ms(elapsed_ms)))
    }

    /// 探索で使った時間を差し引く。
    pub fn consume(&mut self, elapsed_ms: u64) {
        if let Some(left) = self.left_after(elapsed_ms) {
            self.remaining_ms = Some(left);
        }
    }

    /// 着手成立後の加算。時間切れ後には加算しない。
    pub fn add_increment(&mut self) {
        if let Some(r) = self.remaining_ms {
            if r >= 0 {
                self.remaining_ms = Some(r.saturating_add(self.increment_ms));
            }
        }
    }
}

/// 手番ごとの持ち時間から `go` に付ける時計情報を組み立てる。
///
/// どちらか一方でも持ち時間が無ければ時計情報は送らない。
pub fn time_args(white: &TimeBudget, black: &TimeBudget) -> Option<TimeArgs> {
    let (Some(wtime), Some(btime)) = (white.remaining_ms, black.remaining_ms) else {
        return None;
    };
    Some(TimeArgs {
        wtime: wtime.max(0) as u64,
        btime: btime.max(0) as u64,
        winc: white.increment_ms.max(0) as u64,
        binc: black.increment_ms.max(0) as u64,
    })
}

fn clamp_ms(ms: u64) -> i64 {
    ms.min(i64::MAX as u64) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_goes_negative_after_overrun() {
        let mut budget = TimeBudget::new(1_000, 0);
        budget.consume(400);
        assert_eq!(budget.remaining_ms(), Some(600));
        assert!(!budget.is_flagged());
        budget.consume(700);
        assert_eq!(budget.remaining_ms(), Some(-100));
        assert!(budget.is_flagged());

        // 時間切れ後は加算しない
        budget.add_increment();
        assert_eq!(budget.remaining_ms(), Some(-100));
    }

    #[test]
    fn increment_is_added_after_move() {
        let mut budget = TimeBudget::new(5_000, 1_000);
        budget.consume(4_000);
        budget.add_increment();
        assert_eq!(budget.remaining_ms(), Some(2_000));
    }

    #[test]
    fn deadline_prefers_clock_then_movetime() {
        let start = Instant::now();
        let limits = SearchLimits {
            movetime: Some(100),
            ..SearchLimits::default()
        };

        let clock = TimeBudget::new(2_000, 0);
        assert_eq!(
            clock.deadline(start, &limits, 50),
            Some(start + Duration::from_millis(2_000))
        );

        let no_clock = TimeBudget::unlimited();
        assert_eq!(
            no_clock.deadline(start, &limits, 50),
            Some(start + Duration::from_millis(150))
        );
        assert_eq!(no_clock.deadline(start, &SearchLimits::default(), 50), None);
        assert_eq!(no_clock.left_after(10_000), None);
    }

    #[test]
    fn time_args_require_both_clocks() {
        let white = TimeBudget::new(60_000, 500);
        let black = TimeBudget::new(59_000, 0);
        let args = time_args(&white, &black).unwrap();
        assert_eq!((args.wtime, args.btime, args.winc, args.binc), (60_000, 59_000, 500, 0));
        assert!(time_args(&white, &TimeBudget::unlimited()).is_none());
    }
}
