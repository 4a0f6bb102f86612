//! Performance matrix import.
//!
//! Layout (CSV or first workbook sheet): row 1 holds match dates from
//! column E onward; column A starts a player block; column D names the
//! metric of each row in the block (`raw score`, `ranking`, `reward`).
//! Parsing and validation produce typed records and a list of rejected
//! rows before anything is reconciled or written.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use calamine::{Data, Reader};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info};

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::matching::{ReconcileReport, Reconciler};
use crate::types::Performance;

pub const NAME_COLUMN: usize = 0;
pub const METRIC_COLUMN: usize = 3;
pub const FIRST_DATE_COLUMN: usize = 4;

// ---------------------------------------------------------------------------
// Cells and readers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

pub type Sheet = Vec<Vec<Cell>>;

static EMPTY: Cell = Cell::Empty;

impl Cell {
    pub fn from_text(raw: &str) -> Self {
        let s = raw.trim();
        if s.is_empty() {
            return Cell::Empty;
        }
        match s.parse::<f64>() {
            Ok(n) if n.is_finite() => Cell::Number(n),
            _ => Cell::Text(s.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Number(n) => Some(n.to_string()),
            Cell::Date(d) => Some(d.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => s.replace(',', "").trim().parse().ok().filter(|n: &f64| n.is_finite()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            Cell::Text(s) => parse_match_date(s),
            _ => None,
        }
    }
}

/// `m/d/yy`, `m/d/yyyy` (two-digit years are 20xx) or ISO `yyyy-mm-dd`, optionally with a time part.
pub fn parse_match_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() == 3 {
        let month: u32 = parts[0].trim().parse().ok()?;
        let day: u32 = parts[1].trim().parse().ok()?;
        let year_str = parts[2].trim();
        let mut year: i32 = year_str.parse().ok()?;
        if year_str.len() == 2 {
            year += 2000;
        }
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    let date_part = match s.char_indices().nth(10) {
        Some((i, c)) if c == ' ' || c == 'T' => &s[..i],
        _ => s,
    };
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

pub fn read_csv<R: Read>(reader: R) -> Result<Sheet> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut sheet = Vec::new();
    for record in rdr.records() {
        let record = record?;
        sheet.push(record.iter().map(Cell::from_text).collect());
    }
    Ok(sheet)
}

pub fn read_csv_path(path: &Path) -> Result<Sheet> {
    read_csv(std::fs::File::open(path)?)
}

/// First sheet of an `.xlsx`/`.xls`/`.ods` workbook, positioned so that
/// row and column indices match the spreadsheet's own (A1 = [0][0]).
pub fn read_workbook(path: &Path) -> Result<Sheet> {
    let mut workbook = calamine::open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::Workbook("workbook has no sheets".to_string()))??;

    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let mut sheet: Sheet = vec![Vec::new(); start_row as usize];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; start_col as usize];
        cells.extend(row.iter().map(cell_from_data));
        sheet.push(cells);
    }
    Ok(sheet)
}

/// Dispatch on extension: `.csv` goes through the CSV reader, anything else through calamine.
pub fn read_sheet(path: &Path) -> Result<Sheet> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        read_csv_path(path)
    } else {
        read_workbook(path)
    }
}

fn cell_from_data(d: &Data) -> Cell {
    match d {
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::String(s) => Cell::from_text(s),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()).map_or(Cell::Empty, Cell::Date),
        Data::DateTimeIso(s) => parse_match_date(s).map_or_else(|| Cell::from_text(s), Cell::Date),
        Data::DurationIso(s) => Cell::Text(s.clone()),
        _ => Cell::Empty,
    }
}

fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(chrono::Duration::days(serial.floor() as i64))
}

// ---------------------------------------------------------------------------
// Parse and validate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    RawScore,
    Ranking,
    Reward,
}

impl Metric {
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase().replace('_', " ");
        match label.as_str() {
            "raw score" | "score" => Some(Metric::RawScore),
            "ranking" | "rank" => Some(Metric::Ranking),
            "reward" | "tp" => Some(Metric::Reward),
            _ => None,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Metric::RawScore => "raw score",
            Metric::Ranking => "ranking",
            Metric::Reward => "reward",
        };
        write!(f, "{s}")
    }
}

/// One validated (player name, date) cell group, not yet tied to a player id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixRecord {
    pub player_name: String,
    pub match_date: NaiveDate,
    pub raw_score: Option<f64>,
    pub ranking: Option<i64>,
    pub reward: Option<f64>,
    /// 1-based sheet line where the player's block starts.
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRow {
    /// 1-based sheet line.
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedMatrix {
    pub dates: Vec<NaiveDate>,
    pub records: Vec<MatrixRecord>,
    pub rejected: Vec<RejectedRow>,
    pub players: usize,
}

#[derive(Default)]
struct Metrics {
    raw_score: Option<f64>,
    ranking: Option<i64>,
    reward: Option<f64>,
}

struct Block {
    name: String,
    line: usize,
    values: BTreeMap<NaiveDate, Metrics>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn flush(block: Option<Block>, out: &mut Vec<MatrixRecord>) {
    let Some(block) = block else { return };
    for (date, m) in block.values {
        let nonzero = m.raw_score.is_some_and(|v| v != 0.0)
            || m.ranking.is_some_and(|v| v != 0)
            || m.reward.is_some_and(|v| v != 0.0);
        if nonzero {
            out.push(MatrixRecord {
                player_name: block.name.clone(),
                match_date: date,
                raw_score: m.raw_score,
                ranking: m.ranking,
                reward: m.reward,
                line: block.line,
            });
        }
    }
}

pub fn parse_performance_matrix(sheet: &Sheet) -> Result<ParsedMatrix> {
    let header = sheet
        .first()
        .ok_or_else(|| AppError::BadRequest("sheet is empty".to_string()))?;

    let date_columns: Vec<(usize, NaiveDate)> = header
        .iter()
        .enumerate()
        .skip(FIRST_DATE_COLUMN)
        .filter_map(|(col, cell)| cell.as_date().map(|d| (col, d)))
        .collect();
    if date_columns.is_empty() {
        return Err(AppError::BadRequest("no match date columns in header row".to_string()));
    }

    let mut parsed = ParsedMatrix {
        dates: date_columns.iter().map(|(_, d)| *d).collect(),
        ..Default::default()
    };
    let mut current: Option<Block> = None;

    for (idx, row) in sheet.iter().enumerate().skip(1) {
        let line = idx + 1;
        let cell = |col: usize| row.get(col).unwrap_or(&EMPTY);

        if let Some(name) = cell(NAME_COLUMN).as_text() {
            flush(current.take(), &mut parsed.records);
            parsed.players += 1;
            current = Some(Block { name, line, values: BTreeMap::new() });
        }

        let Some(label) = cell(METRIC_COLUMN).as_text() else {
            continue;
        };
        let Some(metric) = Metric::from_label(&label) else {
            parsed.rejected.push(RejectedRow { line, reason: format!("unknown metric {label:?}") });
            continue;
        };
        let Some(block) = current.as_mut() else {
            parsed.rejected.push(RejectedRow { line, reason: format!("{metric} row before any player name") });
            continue;
        };

        for &(col, date) in &date_columns {
            let raw = cell(col);
            if raw.is_empty() {
                continue;
            }
            let Some(value) = raw.as_number() else {
                let shown = raw.as_text().unwrap_or_default();
                parsed.rejected.push(RejectedRow {
                    line,
                    reason: format!("{}: non-numeric {metric} {shown:?} on {date}", block.name),
                });
                continue;
            };

            let entry = block.values.entry(date).or_default();
            let duplicate = match metric {
                Metric::RawScore => entry.raw_score.replace(round2(value)).is_some(),
                Metric::Ranking => {
                    if value < 1.0 || value.fract() != 0.0 {
                        parsed.rejected.push(RejectedRow {
                            line,
                            reason: format!("{}: invalid ranking {value} on {date}", block.name),
                        });
                        continue;
                    }
                    entry.ranking.replace(value as i64).is_some()
                }
                Metric::Reward => entry.reward.replace(round2(value)).is_some(),
            };
            if duplicate {
                parsed.rejected.push(RejectedRow {
                    line,
                    reason: format!("{}: duplicate {metric} on {date}, later value kept", block.name),
                });
            }
        }
    }
    flush(current, &mut parsed.records);

    Ok(parsed)
}

// ---------------------------------------------------------------------------
// Reconcile and write
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ImportPlan {
    /// Sorted by (player_id, match_date); one row per key.
    pub accepted: Vec<Performance>,
    pub report: ReconcileReport,
}

pub fn plan_import(parsed: &ParsedMatrix, reconciler: &Reconciler) -> ImportPlan {
    let mut report = ReconcileReport::default();
    let mut rows: BTreeMap<(i64, NaiveDate), Performance> = BTreeMap::new();

    for record in &parsed.records {
        let resolution = reconciler.resolve(&record.player_name);
        report.record(&record.player_name, resolution);
        let Some(player_id) = resolution.player_id() else {
            continue;
        };
        rows.insert(
            (player_id, record.match_date),
            Performance {
                player_id,
                match_date: record.match_date,
                raw_score: record.raw_score,
                ranking: record.ranking,
                reward: record.reward,
            },
        );
    }

    ImportPlan { accepted: rows.into_values().collect(), report }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportOutcome {
    pub written: usize,
    pub batches: usize,
    /// (1-based batch number, error) for batches the store refused.
    pub failed_batches: Vec<(usize, String)>,
}

/// Upsert in batches. A failed batch is reported and skipped; earlier batches stay written.
pub async fn apply_plan(store: &dyn Store, plan: &ImportPlan, batch_size: usize) -> ImportOutcome {
    let mut outcome = ImportOutcome::default();
    for (i, batch) in plan.accepted.chunks(batch_size.max(1)).enumerate() {
        outcome.batches += 1;
        match store.upsert_performance(batch).await {
            Ok(n) => {
                outcome.written += n;
                info!("Upserted batch {}: {} records", i + 1, n);
            }
            Err(e) => {
                error!("Batch {} failed: {e}", i + 1);
                outcome.failed_batches.push((i + 1, e.to_string()));
            }
        }
    }
    outcome
}

/// Serializable digest of one import run, returned by the admin upload route.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub dates: usize,
    pub players_in_file: usize,
    pub records: usize,
    pub accepted: usize,
    pub rejected: Vec<RejectedRow>,
    pub matched_exact: usize,
    pub matched_approximate: Vec<ApproximateMatch>,
    pub unmatched: Vec<String>,
    pub outcome: Option<ImportOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApproximateMatch {
    pub name: String,
    pub player_id: i64,
    pub distance: usize,
}

impl ImportSummary {
    pub fn new(parsed: &ParsedMatrix, plan: &ImportPlan, outcome: Option<ImportOutcome>) -> Self {
        Self {
            dates: parsed.dates.len(),
            players_in_file: parsed.players,
            records: parsed.records.len(),
            accepted: plan.accepted.len(),
            rejected: parsed.rejected.clone(),
            matched_exact: plan.report.exact.len(),
            matched_approximate: plan
                .report
                .approximate
                .iter()
                .map(|(name, player_id, distance)| ApproximateMatch {
                    name: name.clone(),
                    player_id: *player_id,
                    distance: *distance,
                })
                .collect(),
            unmatched: plan.report.unmatched.iter().cloned().collect(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{all_performance, MemoryStore};
    use crate::matching::{MatchPolicy, MatchStrategy};
    use crate::types::Player;

    const MATRIX: &str = "\
Player,Team,Pos,Metric,3/1/25,3/8/25,2025-03-15
Bukayo Saka,ARS,MID,Raw Score,55.456,0,
,,,Ranking,3,12,
,,,Reward,12.5,0,
Rúben Dias,MCI,DEF,raw score,40,41,abc
,,,ranking,0.5,7,
,,,reward,,,3
,,,Assists,1,2,3
";

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    #[test]
    fn parses_match_dates() {
        assert_eq!(parse_match_date("3/1/25"), Some(date(3, 1)));
        assert_eq!(parse_match_date("03/01/2025"), Some(date(3, 1)));
        assert_eq!(parse_match_date("2025-03-15"), Some(date(3, 15)));
        assert_eq!(parse_match_date("2025-03-15T00:00:00"), Some(date(3, 15)));
        assert_eq!(parse_match_date("13/1/25"), None);
        assert_eq!(parse_match_date("Metric"), None);
        assert_eq!(excel_serial_to_date(45717.0), Some(date(3, 1)));
    }

    #[test]
    fn parses_and_validates_matrix() {
        let sheet = read_csv(MATRIX.as_bytes()).unwrap();
        let parsed = parse_performance_matrix(&sheet).unwrap();

        assert_eq!(parsed.dates, vec![date(3, 1), date(3, 8), date(3, 15)]);
        assert_eq!(parsed.players, 2);

        let saka: Vec<&MatrixRecord> = parsed.records.iter().filter(|r| r.player_name == "Bukayo Saka").collect();
        assert_eq!(saka.len(), 2, "third date has no values");
        assert_eq!(saka[0].raw_score, Some(55.46));
        assert_eq!(saka[0].ranking, Some(3));
        assert_eq!(saka[0].reward, Some(12.5));
        assert_eq!((saka[1].raw_score, saka[1].ranking, saka[1].reward), (Some(0.0), Some(12), Some(0.0)));

        let dias: Vec<&MatrixRecord> = parsed.records.iter().filter(|r| r.player_name == "Rúben Dias").collect();
        assert_eq!(dias.len(), 3);
        assert_eq!(dias[0].ranking, None, "0.5 is not a valid ranking");
        assert_eq!(dias[1].ranking, Some(7));
        assert_eq!((dias[2].raw_score, dias[2].reward), (None, Some(3.0)));
        assert!(dias.iter().all(|r| r.line == 5));

        let lines: Vec<usize> = parsed.rejected.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![5, 6, 8]);
        assert!(parsed.rejected[2].reason.contains("Assists"));
    }

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
    }

    #[test]
    fn workbook_parses_like_the_csv() {
        let sheet = read_sheet(&fixture("matrix.xlsx")).unwrap();
        assert_eq!(sheet[0][4], Cell::Date(date(3, 1)), "header dates are Excel date cells");

        let from_workbook = parse_performance_matrix(&sheet).unwrap();
        let from_csv = parse_performance_matrix(&read_csv(MATRIX.as_bytes()).unwrap()).unwrap();

        assert_eq!(from_workbook.dates, from_csv.dates);
        assert_eq!(from_workbook.records, from_csv.records);
        assert_eq!(from_workbook.rejected, from_csv.rejected);
        assert_eq!(from_workbook.players, from_csv.players);
    }

    #[test]
    fn workbook_cells_keep_spreadsheet_positions() {
        // First populated cell is C3.
        let sheet = read_workbook(&fixture("offset.xlsx")).unwrap();
        assert_eq!(sheet.len(), 4);
        assert!(sheet[0].is_empty() && sheet[1].is_empty());
        assert_eq!(sheet[2][..2], [Cell::Empty, Cell::Empty]);
        assert_eq!(sheet[2][2], Cell::Text("x".into()));
        assert_eq!(sheet[2][3], Cell::Number(5.0));
        assert_eq!(sheet[3][3], Cell::Date(date(3, 1)));
    }

    #[test]
    fn missing_workbook_is_an_error() {
        assert!(read_sheet(&fixture("does_not_exist.xlsx")).is_err());
    }

    #[test]
    fn all_zero_cells_produce_no_record() {
        let csv = "a,b,c,d,1/1/25\nZero Man,,,reward,0\n,,,ranking,\n";
        let parsed = parse_performance_matrix(&read_csv(csv.as_bytes()).unwrap()).unwrap();
        assert!(parsed.records.is_empty());
        assert!(parsed.rejected.is_empty());
    }

    #[test]
    fn metric_before_player_and_duplicates_are_rejected() {
        let csv = "a,b,c,d,1/1/25\n,,,reward,5\nSaka,,,reward,1\n,,,reward,2\n";
        let parsed = parse_performance_matrix(&read_csv(csv.as_bytes()).unwrap()).unwrap();
        assert_eq!(parsed.rejected.len(), 2);
        assert_eq!(parsed.rejected[0].line, 2);
        assert_eq!(parsed.rejected[1].line, 4);
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].reward, Some(2.0));
    }

    #[test]
    fn header_without_dates_is_an_error() {
        let sheet = read_csv("Player,Team,Pos,Metric,Notes\n".as_bytes()).unwrap();
        assert!(matches!(parse_performance_matrix(&sheet), Err(AppError::BadRequest(_))));
        assert!(parse_performance_matrix(&Vec::new()).is_err());
    }

    fn roster() -> Vec<Player> {
        vec![Player::named(10, "Bukayo Saka"), Player::named(20, "Ruben Dias")]
    }

    #[test]
    fn plan_reconciles_and_reports_unmatched() {
        let csv = format!("{MATRIX}Ghost Player,,,reward,1,,\n");
        let parsed = parse_performance_matrix(&read_csv(csv.as_bytes()).unwrap()).unwrap();
        let reconciler = Reconciler::new(&roster(), MatchStrategy::EditDistance, MatchPolicy::default());
        let plan = plan_import(&parsed, &reconciler);

        assert_eq!(plan.accepted.len(), 5);
        assert!(plan.accepted.iter().any(|p| p.player_id == 20 && p.match_date == date(3, 15)));
        assert_eq!(plan.report.unmatched.iter().cloned().collect::<Vec<_>>(), vec!["Ghost Player".to_string()]);
        assert_eq!(plan.report.exact.len(), 2);

        let summary = ImportSummary::new(&parsed, &plan, None);
        assert_eq!(summary.unmatched, vec!["Ghost Player".to_string()]);
        assert_eq!(summary.rejected.len(), 3);
    }

    #[tokio::test]
    async fn failed_batch_does_not_roll_back_earlier_batches() {
        let store = MemoryStore::with_players(roster());
        let mut plan = ImportPlan::default();
        for (player_id, day) in [(10, 1), (10, 2), (99, 3), (20, 4)] {
            plan.accepted.push(Performance {
                player_id,
                match_date: date(3, day),
                raw_score: None,
                ranking: None,
                reward: Some(1.0),
            });
        }

        let outcome = apply_plan(&store, &plan, 2).await;
        assert_eq!(outcome.batches, 2);
        assert_eq!(outcome.written, 2);
        assert_eq!(outcome.failed_batches.len(), 1);
        assert_eq!(outcome.failed_batches[0].0, 2);
        assert_eq!(all_performance(&store, None, 100).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reimport_is_idempotent() {
        let store = MemoryStore::with_players(roster());
        let parsed = parse_performance_matrix(&read_csv(MATRIX.as_bytes()).unwrap()).unwrap();
        let reconciler = Reconciler::new(&roster(), MatchStrategy::EditDistance, MatchPolicy::default());
        let plan = plan_import(&parsed, &reconciler);

        apply_plan(&store, &plan, 200).await;
        apply_plan(&store, &plan, 200).await;
        assert_eq!(all_performance(&store, None, 100).await.unwrap().len(), plan.accepted.len());
    }
}
