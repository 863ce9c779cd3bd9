use std::{collections::HashMap, io::Write};

pub const NO_OFFENDERS: &str = "There was no brute-force offenders activity detected.";
const HEADER: &str = "  Brute-force offenders:";
const RULE: &str = "-------------------------";

/// Offenders ordered by count descending, then by IP
fn ranked(offenders: &HashMap<String, usize>) -> Vec<(&str, usize)> {
    let mut rows: Vec<(&str, usize)> = offenders
        .iter()
        .map(|(ip, count)| (ip.as_str(), *count))
        .collect();
    rows.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    rows
}

/// Print the offender table, or a single line if there is nothing to report
pub fn write_report<W: Write>(
    out: &mut W,
    offenders: &HashMap<String, usize>,
) -> std::io::Result<()> {
    if offenders.is_empty() {
        writeln!(out, "{NO_OFFENDERS}")?;
        return Ok(());
    }
    writeln!(out, "{HEADER}")?;
    writeln!(out, "{RULE}")?;
    for (ip, count) in ranked(offenders) {
        writeln!(out, "{ip:<15}  {count} failed logins")?;
    }
    Ok(())
}
