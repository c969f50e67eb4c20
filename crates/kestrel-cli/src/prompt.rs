//! Operator choices: which table to generate and which report to retrieve.

use async_trait::async_trait;
use console::{Term, style};
use kestrel_core::{Error, ReportRecord, Result, TableEntry};

/// Outcome of parsing one answer to the report prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportChoice {
    Cancel,
    Report(ReportRecord),
    Invalid(String),
}

/// Parse an answer to the table prompt: a 1-based position
pub fn parse_table_choice(input: &str, tables: &[TableEntry]) -> std::result::Result<TableEntry, String> {
    let input = input.trim();
    match input.parse::<usize>() {
        Ok(n) if (1..=tables.len()).contains(&n) => Ok(tables[n - 1].clone()),
        Ok(n) => Err(format!("Choose a number between 1 and {} (got {})", tables.len(), n)),
        Err(_) => Err(format!("'{}' is not a number", input)),
    }
}

/// Parse an answer to the report prompt: a report number or `0` to cancel
pub fn parse_report_choice(input: &str, reports: &[ReportRecord]) -> ReportChoice {
    let input = input.trim();
    match input.parse::<usize>() {
        Ok(0) => ReportChoice::Cancel,
        Ok(n) => match reports.iter().find(|r| r.index == n) {
            Some(record) => ReportChoice::Report(record.clone()),
            None => ReportChoice::Invalid(format!("There is no report number {}", n)),
        },
        Err(_) => ReportChoice::Invalid(format!("'{}' is not a number", input)),
    }
}

/// Answers the workflow's two questions
#[async_trait]
pub trait Operator: Send + Sync {
    async fn choose_table(&self, tables: &[TableEntry]) -> Result<TableEntry>;

    /// `None` means the operator cancelled
    async fn choose_report(&self, reports: &[ReportRecord]) -> Result<Option<ReportRecord>>;
}

/// Prompts on the terminal until a valid answer is given
#[derive(Debug, Default)]
pub struct ConsoleOperator;

impl ConsoleOperator {
    pub fn new() -> Self {
        Self
    }

    async fn read_answer(question: &'static str) -> Result<String> {
        tokio::task::spawn_blocking(move || {
            let term = Term::stdout();
            term.write_str(question)?;
            term.read_line()
        })
        .await
        .map_err(|e| Error::Driver(format!("Prompt task failed: {}", e)))?
        .map_err(Error::Io)
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn choose_table(&self, tables: &[TableEntry]) -> Result<TableEntry> {
        println!("\n{}", style("Available tables").bold().cyan());
        for (i, table) in tables.iter().enumerate() {
            println!("  {}. {}", style(i + 1).yellow(), table.text);
        }
        println!();

        loop {
            let answer = Self::read_answer("Select a table by number: ").await?;
            match parse_table_choice(&answer, tables) {
                Ok(table) => {
                    println!("✅ Selected table: {}", table.text);
                    return Ok(table);
                }
                Err(message) => println!("❌ {}", message),
            }
        }
    }

    async fn choose_report(&self, reports: &[ReportRecord]) -> Result<Option<ReportRecord>> {
        println!("\n{}", style("Available reports").bold().cyan());
        for report in reports {
            let date = if report.date.is_empty() {
                String::new()
            } else {
                format!(" {}", style(format!("({})", report.date)).dim())
            };
            println!("  {}. {}{}", style(report.index).yellow(), report.name, date);
        }
        println!();

        loop {
            let answer = Self::read_answer("Select a report by number (or \"0\" to exit): ").await?;
            match parse_report_choice(&answer, reports) {
                ReportChoice::Cancel => {
                    println!("🚫 Cancelled by operator");
                    return Ok(None);
                }
                ReportChoice::Report(record) => {
                    println!("✅ Selected report: {}", record.name);
                    return Ok(Some(record));
                }
                ReportChoice::Invalid(message) => println!("❌ {}", message),
            }
        }
    }
}

/// Operator fed from canned answers, consumed in order across re-prompts
#[cfg(test)]
pub struct ScriptedOperator {
    tables: std::sync::Mutex<std::collections::VecDeque<String>>,
    reports: std::sync::Mutex<std::collections::VecDeque<String>>,
}

#[cfg(test)]
impl ScriptedOperator {
    pub fn new(tables: &[&str], reports: &[&str]) -> Self {
        Self {
            tables: std::sync::Mutex::new(tables.iter().map(|s| s.to_string()).collect()),
            reports: std::sync::Mutex::new(reports.iter().map(|s| s.to_string()).collect()),
        }
    }

    fn next(queue: &std::sync::Mutex<std::collections::VecDeque<String>>) -> Result<String> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Io(std::io::ErrorKind::UnexpectedEof.into()))
    }
}

#[cfg(test)]
#[async_trait]
impl Operator for ScriptedOperator {
    async fn choose_table(&self, tables: &[TableEntry]) -> Result<TableEntry> {
        loop {
            if let Ok(table) = parse_table_choice(&Self::next(&self.tables)?, tables) {
                return Ok(table);
            }
        }
    }

    async fn choose_report(&self, reports: &[ReportRecord]) -> Result<Option<ReportRecord>> {
        loop {
            match parse_report_choice(&Self::next(&self.reports)?, reports) {
                ReportChoice::Cancel => return Ok(None),
                ReportChoice::Report(record) => return Ok(Some(record)),
                ReportChoice::Invalid(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::RawReportRow;

    fn tables() -> Vec<TableEntry> {
        TableEntry::snapshot(["Alumnado", "Profesorado"])
    }

    fn reports() -> Vec<ReportRecord> {
        ReportRecord::from_rows(vec![
            RawReportRow {
                name: "Informe A".to_string(),
                ..Default::default()
            },
            RawReportRow {
                name: "Informe B".to_string(),
                url: "https://x/y".to_string(),
                ..Default::default()
            },
        ])
    }

    #[test]
    fn test_table_choice_is_one_based() {
        assert_eq!(parse_table_choice(" 2\n", &tables()).unwrap().text, "Profesorado");
    }

    #[test]
    fn test_table_choice_rejects_out_of_range_and_garbage() {
        assert!(parse_table_choice("0", &tables()).is_err());
        assert!(parse_table_choice("3", &tables()).is_err());
        assert!(parse_table_choice("dos", &tables()).unwrap_err().contains("not a number"));
    }

    #[test]
    fn test_report_choice_zero_cancels() {
        assert_eq!(parse_report_choice("0", &reports()), ReportChoice::Cancel);
    }

    #[test]
    fn test_report_choice_finds_by_number() {
        match parse_report_choice("2", &reports()) {
            ReportChoice::Report(record) => assert_eq!(record.url, "https://x/y"),
            other => panic!("unexpected choice: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_report_number_is_invalid() {
        assert!(matches!(parse_report_choice("7", &reports()), ReportChoice::Invalid(_)));
        assert!(matches!(parse_report_choice("-1", &reports()), ReportChoice::Invalid(_)));
    }

    #[tokio::test]
    async fn test_scripted_operator_reprompts_until_valid() {
        let operator = ScriptedOperator::new(&["9", "x", "1"], &["5", "2"]);

        assert_eq!(operator.choose_table(&tables()).await.unwrap().text, "Alumnado");
        assert_eq!(
            operator.choose_report(&reports()).await.unwrap().map(|r| r.index),
            Some(2)
        );
    }
}
