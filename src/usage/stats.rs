//! Daily, weekly and monthly usage reports

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use chrono::{Datelike, Duration, NaiveDate, TimeZone};

use crate::usage::models::{ModelBreakdown, UsageEntry};

const RULE_WIDTH: usize = 140;
const MODEL_COLUMN_WIDTH: usize = 30;

/// Lookback the CLI uses when none was given
pub const DEFAULT_HOURS_BACK: u32 = 24;

/// Report grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl ReportPeriod {
    pub fn title(&self) -> &'static str {
        match self {
            ReportPeriod::Daily => "Daily",
            ReportPeriod::Weekly => "Weekly",
            ReportPeriod::Monthly => "Monthly",
        }
    }

    fn column_label(&self) -> &'static str {
        match self {
            ReportPeriod::Daily => "Date",
            ReportPeriod::Weekly => "Week",
            ReportPeriod::Monthly => "Month",
        }
    }

    fn column_width(&self) -> usize {
        match self {
            ReportPeriod::Monthly => 10,
            _ => 12,
        }
    }

    /// Lookback covering a useful history for this grouping
    pub fn default_hours(&self) -> u32 {
        match self {
            ReportPeriod::Daily => 720,
            ReportPeriod::Weekly => 2_160,
            ReportPeriod::Monthly => 8_760,
        }
    }

    /// First day of the period containing `date`; weeks start on Monday
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            ReportPeriod::Daily => date,
            ReportPeriod::Weekly => date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
            ReportPeriod::Monthly => date.with_day(1).unwrap_or(date),
        }
    }

    /// Display key: `2025-12-01`, `2025-W49` or `2025-12`
    pub fn key(&self, date: NaiveDate) -> String {
        match self {
            ReportPeriod::Daily => date.format("%Y-%m-%d").to_string(),
            ReportPeriod::Weekly => {
                let week = date.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            ReportPeriod::Monthly => date.format("%Y-%m").to_string(),
        }
    }
}

/// Hours of history to load for a report: an unchanged default widens to the period's span
pub fn report_hours(period: ReportPeriod, hours_back: u32) -> u32 {
    if hours_back == DEFAULT_HOURS_BACK {
        return period.default_hours();
    }
    hours_back
}

/// Per-model totals for one reporting period
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodStats {
    pub start: NaiveDate,
    pub models: BTreeMap<String, ModelBreakdown>,
}

impl PeriodStats {
    pub fn subtotal(&self) -> ModelBreakdown {
        self.models.values().fold(ModelBreakdown::default(), |mut acc, m| {
            acc.add(m);
            acc
        })
    }
}

/// Group entries by local period and model, oldest period first
pub fn aggregate_report<Tz: TimeZone>(entries: &[UsageEntry], period: ReportPeriod, tz: &Tz) -> Vec<PeriodStats> {
    let mut period_map: HashMap<NaiveDate, PeriodStats> = HashMap::new();

    for entry in entries {
        let local_date = entry.timestamp.with_timezone(tz).date_naive();
        let start = period.period_start(local_date);

        period_map
            .entry(start)
            .or_insert_with(|| PeriodStats {
                start,
                models: BTreeMap::new(),
            })
            .models
            .entry(entry.model.clone())
            .or_default()
            .absorb(entry);
    }

    let mut stats: Vec<_> = period_map.into_values().collect();
    stats.sort_by_key(|s| s.start);
    stats
}

/// Format with thousands separators
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
}

fn write_row(out: &mut String, width: usize, period: &str, model: &str, m: &ModelBreakdown) {
    let _ = writeln!(
        out,
        "{:<width$}  {:<30}  {:>12}  {:>12}  {:>16}  {:>18}  {:>16}  {:>12}",
        period,
        truncate(model, MODEL_COLUMN_WIDTH),
        format_number(m.input_tokens),
        format_number(m.output_tokens),
        format_number(m.cache_creation_tokens),
        format_number(m.cache_read_tokens),
        format_number(m.total_tokens()),
        format!("${:.2}", m.cost_usd),
        width = width,
    );
}

/// Render aggregated stats as a plain-text table.
///
/// The period containing `today` is marked partial.
pub fn render_report(stats: &[PeriodStats], period: ReportPeriod, tz_name: &str, today: NaiveDate) -> String {
    let width = period.column_width();
    let rule = "─".repeat(RULE_WIDTH);
    let current = period.period_start(today);
    let mut out = String::new();

    let _ = writeln!(out, "Claude Code Token Usage Report - {} ({})", period.title(), tz_name);
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "{:<width$}  {:<30}  {:>12}  {:>12}  {:>16}  {:>18}  {:>16}  {:>12}",
        period.column_label(),
        "Model",
        "Input",
        "Output",
        "Cache Create",
        "Cache Read",
        "Total Tokens",
        "Est. Cost",
        width = width,
    );
    let _ = writeln!(out, "{}", rule);

    let mut total = ModelBreakdown::default();
    let mut has_partial = false;

    for s in stats {
        let is_partial = s.start == current;
        has_partial |= is_partial;
        let mut label = period.key(s.start);
        if is_partial {
            label.push_str(" *");
        }

        for (i, (model, m)) in s.models.iter().enumerate() {
            write_row(&mut out, width, if i == 0 { &label } else { "" }, model, m);
            total.add(m);
        }

        if s.models.len() > 1 {
            let subtotal_label = if is_partial { "Subtotal *" } else { "Subtotal" };
            write_row(&mut out, width, "", subtotal_label, &s.subtotal());
        }
        out.push('\n');
    }

    let _ = writeln!(out, "{}", rule);
    write_row(&mut out, width, "TOTAL", "", &total);
    out.push('\n');
    if has_partial {
        out.push_str("* Partial period (current month/week/day)\n");
    }
    out.push_str("Pricing: built-in per-model rates\n");
    out
}

/// Aggregate and render in one step
pub fn generate_report<Tz: TimeZone>(
    entries: &[UsageEntry],
    period: ReportPeriod,
    tz: &Tz,
    tz_name: &str,
    today: NaiveDate,
) -> String {
    if entries.is_empty() {
        return "No usage data found.\n".to_string();
    }
    render_report(&aggregate_report(entries, period, tz), period, tz_name, today)
}
