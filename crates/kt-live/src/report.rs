//! Daily settlement report.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;

use kt_types::{KtResult, Position};

/// Snapshot written after the close.
#[derive(Debug, Clone)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub previous_equity: Decimal,
    pub current_equity: Decimal,
    pub positions: Vec<Position>,
    pub trade_counts: HashMap<String, u32>,
}

impl DailyReport {
    pub fn daily_return(&self) -> Decimal {
        if self.previous_equity == Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.current_equity - self.previous_equity) / self.previous_equity
    }

    /// Human-readable settlement log.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("=== Daily Settlement {} ===\n\n", self.date));
        out.push_str(&format!("Previous equity : {:>16} KRW\n", self.previous_equity.round()));
        out.push_str(&format!("Current equity  : {:>16} KRW\n", self.current_equity.round()));
        out.push_str(&format!(
            "Daily return    : {:>15.2}%\n\n",
            self.daily_return() * Decimal::from(100)
        ));

        if self.positions.is_empty() {
            out.push_str("No open positions.\n");
        } else {
            out.push_str("Open positions:\n");
            for position in &self.positions {
                out.push_str(&format!(
                    "  {:<8} qty {:>8}  avg {:>12}  last {:>12}  unrealized {:>14}\n",
                    position.symbol,
                    position.quantity,
                    position.avg_price.round(),
                    position.current_price.round(),
                    position.unrealized_pnl.round(),
                ));
            }
        }

        if !self.trade_counts.is_empty() {
            out.push_str("\nTrades today:\n");
            let mut entries: Vec<(&String, &u32)> = self.trade_counts.iter().collect();
            entries.sort();
            for (symbol, count) in entries {
                out.push_str(&format!("  {symbol:<8} {count} trades\n"));
            }
        }

        out
    }

    /// Write `daily_report_YYYYMMDD.txt` under `dir`.
    pub fn save(&self, dir: &Path) -> KtResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("daily_report_{}.txt", self.date.format("%Y%m%d")));
        std::fs::write(&path, self.render())?;
        info!(?path, "daily report written");
        Ok(path)
    }
}
