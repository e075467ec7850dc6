use anyhow::Result;
use chrono::NaiveDate;
use clap::Args;
use serde::Serialize;
use std::str::FromStr;
use tenure_core::model::{AttributeType, HistoryRecord, parse_date};
use tenure_core::store::HistoryStore;

use super::Project;
use crate::output::{OutputMode, pretty_section, render};

#[derive(Args, Debug)]
pub struct AsOfArgs {
    /// Entity (security) id.
    pub entity: String,

    /// Date to resolve (YYYY-MM-DD or YYYYMMDD).
    #[arg(long, value_parser = parse_date)]
    pub date: NaiveDate,

    /// Limit to one attribute type.
    #[arg(long, short, value_parser = AttributeType::from_str)]
    pub attribute: Option<AttributeType>,
}

#[derive(Debug, Serialize)]
struct AsOfValue {
    attribute: AttributeType,
    /// `None` when no interval contains the date.
    value: Option<String>,
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
}

impl AsOfValue {
    fn resolve(attribute: AttributeType, record: Option<HistoryRecord>) -> Self {
        match record {
            Some(record) => Self {
                attribute,
                value: record.value,
                since: Some(record.start_date),
                until: record.end_date,
            },
            None => Self {
                attribute,
                value: None,
                since: None,
                until: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct AsOfReport {
    entity_id: String,
    date: NaiveDate,
    values: Vec<AsOfValue>,
}

/// Execute `tn as-of`: the value of each tracked attribute on a date, using
/// half-open intervals (a value closed on `D` is not valid on `D`).
///
/// # Errors
///
/// Returns an error if the store cannot be read or the config is invalid.
pub fn run_as_of(args: &AsOfArgs, project: &Project, output: OutputMode) -> Result<()> {
    let store = project.open_existing_store()?;
    let attributes = match args.attribute {
        Some(attribute) => vec![attribute],
        None => project.tracking_plan()?.attributes().to_vec(),
    };

    let values = attributes
        .into_iter()
        .map(|attribute| {
            store
                .value_as_of(&args.entity, attribute, args.date)
                .map(|record| AsOfValue::resolve(attribute, record))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let report = AsOfReport {
        entity_id: args.entity.clone(),
        date: args.date,
        values,
    };

    render(output, &report, |report, mode, w| {
        if mode.is_pretty() {
            pretty_section(w, &format!("{} as of {}", report.entity_id, report.date))?;
        }
        for entry in &report.values {
            let value = entry.value.as_deref().unwrap_or("-");
            let since = entry
                .since
                .map_or_else(|| "-".to_string(), |date| date.to_string());
            if mode.is_pretty() {
                writeln!(w, "{:<12} {value}  (since {since})", entry.attribute.as_str())?;
            } else {
                writeln!(w, "{}\t{value}\t{since}", entry.attribute)?;
            }
        }
        Ok(())
    })
}
