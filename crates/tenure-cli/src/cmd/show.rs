use anyhow::Result;
use clap::Args;
use std::io::Write;
use std::str::FromStr;
use tenure_core::error::ErrorCode;
use tenure_core::model::{AttributeType, HistoryRecord};
use tenure_core::store::HistoryStore;

use super::Project;
use crate::output::{OutputMode, coded, pretty_section, render};

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Entity (security) id, e.g. 005930.
    pub entity: String,

    /// Limit to one attribute type (SECTOR, MARKET, NAME, DEPARTMENT, SHARES).
    #[arg(long, short, value_parser = AttributeType::from_str)]
    pub attribute: Option<AttributeType>,
}

/// Execute `tn show`: print an entity's full interval history.
///
/// # Errors
///
/// Returns an error if the store cannot be read or the entity has no
/// history.
pub fn run_show(args: &ShowArgs, project: &Project, output: OutputMode) -> Result<()> {
    let store = project.open_existing_store()?;
    let records = store.history(&args.entity, args.attribute)?;
    if records.is_empty() {
        return Err(coded(
            ErrorCode::EntityNotFound,
            format!("no history for entity {}", args.entity),
        ));
    }

    render(output, &records, |records, mode, w| {
        if mode.is_pretty() {
            pretty_section(w, &format!("History of {}", args.entity))?;
            writeln!(w, "{:<12} {:<10} {:<10} VALUE", "ATTRIBUTE", "FROM", "UNTIL")?;
        }
        for record in records {
            write_record(record, mode, w)?;
        }
        Ok(())
    })
}

/// One history row; the open end is shown as `-`.
fn write_record(
    record: &HistoryRecord,
    mode: OutputMode,
    w: &mut dyn Write,
) -> std::io::Result<()> {
    let until = record
        .end_date
        .map_or_else(|| "-".to_string(), |end| end.to_string());
    let value = record.value.as_deref().unwrap_or("(null)");
    if mode.is_pretty() {
        writeln!(
            w,
            "{:<12} {:<10} {:<10} {value}",
            record.attribute_type.as_str(),
            record.start_date.to_string(),
            until
        )
    } else {
        writeln!(
            w,
            "{}\t{}\t{}\t{until}\t{value}",
            record.entity_id, record.attribute_type, record.start_date
        )
    }
}
