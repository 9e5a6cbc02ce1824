use crate::domain::model::{ChainDraws, SamplerConfig, SamplerInfo};
use crate::utils::error::{ConvertError, Result};

const TIMING_START: &str = "Elapsed Time";
const TIMING_END: &str = "(Total)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum TimingBlock {
    #[default]
    NotSeen,
    Open,
    Closed,
}

/// Lines and draws collected for a chain that has not been closed yet.
#[derive(Debug, Default)]
struct PendingChain {
    in_body: bool,
    configuration: Vec<String>,
    adaptation: Vec<String>,
    timing: Vec<String>,
    // comments after the latest draw that are not part of the timing block
    trailing: Vec<String>,
    timing_block: TimingBlock,
    rows: Vec<Vec<f64>>,
}

impl PendingChain {
    fn push_comment(&mut self, line: String) {
        if !self.in_body {
            self.configuration.push(line);
            return;
        }
        match self.timing_block {
            TimingBlock::Open => {
                if line.contains(TIMING_END) {
                    self.timing_block = TimingBlock::Closed;
                }
                self.timing.push(line);
            }
            TimingBlock::NotSeen if line.contains(TIMING_START) => {
                self.timing_block = TimingBlock::Open;
                self.timing.append(&mut self.trailing);
                self.timing.push(line);
            }
            _ => self.trailing.push(line),
        }
    }

    fn push_row(&mut self, row: Vec<f64>) {
        if !self.trailing.is_empty() {
            self.adaptation.append(&mut self.trailing);
        }
        self.rows.push(row);
    }

    /// Comments left after this chain's draws open the next chain.
    fn split_next(&mut self) -> PendingChain {
        PendingChain {
            configuration: std::mem::take(&mut self.trailing),
            ..Default::default()
        }
    }

    fn finish(mut self, source: &str, columns: &[String]) -> Result<ChainDraws> {
        let config = SamplerConfig::from_comments(source, &self.configuration)?;
        self.timing.append(&mut self.trailing);

        let mut rows = self.rows;
        let mut warmup_rows = Vec::new();
        if config.save_warmup {
            let keep = config.saved_draws();
            if rows.len() > keep {
                let rest = rows.split_off(rows.len() - keep);
                warmup_rows = std::mem::replace(&mut rows, rest);
            }
        }

        tracing::debug!(
            "{}: chain with {} draws ({} warmup), {} columns",
            source,
            rows.len(),
            warmup_rows.len(),
            columns.len()
        );

        Ok(ChainDraws {
            source: source.to_string(),
            columns: columns.to_vec(),
            rows,
            warmup_rows,
            info: SamplerInfo {
                configuration: self.configuration,
                adaptation: self.adaptation,
                timing: self.timing,
                config,
            },
        })
    }
}

fn parse_row(source: &str, line: usize, columns: &[String], fields: &[&str]) -> Result<Vec<f64>> {
    if fields.len() != columns.len() {
        return Err(ConvertError::parse(
            source,
            line,
            format!("expected {} fields, found {}", columns.len(), fields.len()),
        ));
    }
    fields
        .iter()
        .zip(columns)
        .map(|(field, column)| {
            field.trim().parse::<f64>().map_err(|_| {
                ConvertError::parse(
                    source,
                    line,
                    format!("invalid number '{}' in column '{}'", field.trim(), column),
                )
            })
        })
        .collect()
}

/// Reads the text of a CmdStan output CSV. Returns one entry per chain; a
/// file made by concatenating several chain files yields several chains.
pub fn read_output(source: &str, text: &str) -> Result<Vec<ChainDraws>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(text.as_bytes());

    let mut chains = Vec::new();
    let mut header: Option<Vec<String>> = None;
    let mut current = PendingChain::default();

    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
        let fields: Vec<&str> = record.iter().collect();
        if fields.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        let first = fields[0].trim();
        if first.starts_with('#') {
            current.push_comment(fields.join(",").trim().to_string());
            continue;
        }

        match &header {
            None => {
                let columns: Vec<String> = fields.iter().map(|f| f.trim().to_string()).collect();
                if let Some(dup) = first_duplicate(&columns) {
                    return Err(ConvertError::parse(
                        source,
                        line,
                        format!("duplicate column '{}'", dup),
                    ));
                }
                header = Some(columns);
                current.in_body = true;
            }
            Some(columns) if first == columns[0] => {
                let repeated = fields.iter().map(|f| f.trim()).eq(columns.iter().map(String::as_str));
                if !repeated {
                    return Err(ConvertError::parse(
                        source,
                        line,
                        "header mismatch between concatenated chains",
                    ));
                }
                let mut next = current.split_next();
                next.in_body = true;
                let done = std::mem::replace(&mut current, next);
                push_chain(&mut chains, done.finish(source, columns)?);
            }
            Some(columns) => {
                let row = parse_row(source, line, columns, &fields)?;
                current.push_row(row);
            }
        }
    }

    let columns = header.ok_or_else(|| ConvertError::parse(source, 0, "no header found"))?;
    let last = current.finish(source, &columns)?;
    if chains.is_empty() {
        chains.push(last);
    } else {
        push_chain(&mut chains, last);
    }

    if chains.len() > 1 {
        tracing::info!("{}: found {} concatenated chains", source, chains.len());
    }
    Ok(chains)
}

/// Segments of a concatenated file without any draws are dropped.
fn push_chain(chains: &mut Vec<ChainDraws>, chain: ChainDraws) {
    if chain.rows.is_empty() && chain.warmup_rows.is_empty() {
        tracing::warn!("{}: skipping chain segment without draws", chain.source);
    } else {
        chains.push(chain);
    }
}

fn first_duplicate(columns: &[String]) -> Option<&str> {
    let mut seen = std::collections::HashSet::new();
    columns
        .iter()
        .find(|c| !seen.insert(c.as_str()))
        .map(String::as_str)
}
