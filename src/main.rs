use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::Context;
use chrono::Datelike;
use clap::Parser;

mod attack;
mod authlog;
mod error;
mod report;

const DEFAULT_FAILS: u32 = 5;
const DEFAULT_WINDOW_MINS: u32 = 10;

/// Report IPs with repeated failed SSH password logins in an auth log
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Log file to analyze
    logfile: PathBuf,
    /// Minimum failures within the window to flag an IP
    #[arg(long, default_value_t = DEFAULT_FAILS)]
    fails: u32,
    /// Sliding window length in minutes
    #[arg(long, default_value_t = DEFAULT_WINDOW_MINS)]
    window: u32,
    /// Year for log timestamps, which carry none [default: current year]
    #[arg(long)]
    year: Option<i32>,
    /// Count reported for an IP that crosses the threshold more than once
    #[arg(long, value_enum, default_value_t = attack::CountMode::Last)]
    count: attack::CountMode,
}

/// Scan the log and write the report to `out`
fn run<W: Write>(cli: &Cli, out: &mut W) -> anyhow::Result<()> {
    let year = cli.year.unwrap_or_else(|| chrono::Local::now().year());
    log::debug!(
        "scanning {} with year={year} fails={} window={}m count={:?}",
        cli.logfile.display(),
        cli.fails,
        cli.window,
        cli.count
    );
    let events = authlog::load_fail_events(&cli.logfile, year)?;
    let offenders = attack::detect(&events, cli.fails, cli.window, cli.count);
    report::write_report(out, &offenders).context("Failed to write report")?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let stdout = io::stdout();
    match run(&cli, &mut stdout.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            e.downcast_ref::<error::ScanError>()
                .map_or(ExitCode::FAILURE, |e| ExitCode::from(e.exit_status()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn cli(logfile: &Path, extra: &[&str]) -> Cli {
        let mut args = vec!["authscan", logfile.to_str().unwrap()];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args).unwrap()
    }

    fn write_log(dir: &TempDir, lines: &[String]) -> PathBuf {
        let path = dir.path().join("auth.log");
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    fn failure(ip: &str, minute: u32, second: u32) -> String {
        format!(
            "Jun 14 08:{minute:02}:{second:02} bastion sshd[4021]: Failed password for root from {ip} port 51234 ssh2"
        )
    }

    fn render(path: &Path, extra: &[&str]) -> anyhow::Result<String> {
        let mut out = Vec::new();
        run(&cli(path, extra), &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn defaults() {
        let cli = cli(Path::new("auth.log"), &[]);
        assert_eq!(cli.fails, 5);
        assert_eq!(cli.window, 10);
        assert_eq!(cli.year, None);
        assert_eq!(cli.count, attack::CountMode::Last);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Cli::try_parse_from(["authscan"]).is_err());
        assert!(Cli::try_parse_from(["authscan", "auth.log", "--window", "-1"]).is_err());
        assert!(Cli::try_parse_from(["authscan", "auth.log", "--fails", "-1"]).is_err());
    }

    #[test]
    fn zero_threshold_lists_every_ip() {
        let dir = TempDir::new().unwrap();
        let lines = vec![failure("10.0.0.1", 0, 0), failure("10.0.0.2", 5, 0)];
        let path = write_log(&dir, &lines);
        let text = render(&path, &["--fails", "0"]).unwrap();
        let rows: Vec<_> = text.lines().skip(2).collect();
        assert_eq!(
            rows,
            vec!["10.0.0.1         1 failed logins", "10.0.0.2         1 failed logins"]
        );
    }

    #[test]
    fn empty_file_reports_nothing() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, &[]);
        assert_eq!(render(&path, &[]).unwrap(), format!("{}\n", report::NO_OFFENDERS));
    }

    #[test]
    fn burst_within_window_is_reported() {
        let dir = TempDir::new().unwrap();
        let lines: Vec<_> = (0..5).map(|i| failure("10.0.0.1", i / 3, i * 20 % 60)).collect();
        let path = write_log(&dir, &lines);
        let text = render(&path, &["--fails", "5", "--window", "10"]).unwrap();
        assert_eq!(
            text,
            "  Brute-force offenders:\n-------------------------\n10.0.0.1         5 failed logins\n"
        );
    }

    #[test]
    fn spread_out_failures_are_not_reported() {
        let dir = TempDir::new().unwrap();
        let lines: Vec<_> = [0, 7, 14, 20].iter().map(|&m| failure("10.0.0.1", m, 0)).collect();
        let path = write_log(&dir, &lines);
        let text = render(&path, &["--window", "10"]).unwrap();
        assert_eq!(text, format!("{}\n", report::NO_OFFENDERS));
    }

    #[test]
    fn only_qualifying_ip_is_listed() {
        let dir = TempDir::new().unwrap();
        let mut lines = Vec::new();
        for i in 0..6 {
            lines.push(failure("203.0.113.50", i, 0));
            lines.push(failure("198.51.100.4", i, 30));
            if i % 2 == 0 {
                lines.push("Jun 14 08:00:00 bastion CRON[1]: session opened".to_string());
            }
        }
        lines.pop();
        let path = write_log(&dir, &lines);
        let text = render(&path, &["--fails", "6"]).unwrap();
        let rows: Vec<_> = text.lines().skip(2).collect();
        assert_eq!(rows, vec!["203.0.113.50     6 failed logins"]);
    }

    #[test]
    fn unknown_month_aborts_without_report() {
        let dir = TempDir::new().unwrap();
        let mut lines: Vec<_> = (0..5).map(|i| failure("10.0.0.1", i, 0)).collect();
        lines.push(
            "Jux 14 08:09:00 bastion sshd[4021]: Failed password for root from 10.0.0.1 port 1 ssh2"
                .to_string(),
        );
        let path = write_log(&dir, &lines);
        let mut out = Vec::new();
        let err = run(&cli(&path, &[]), &mut out).unwrap_err();
        let scan = err.downcast_ref::<error::ScanError>().unwrap();
        assert!(matches!(scan, error::ScanError::UnknownMonth { line: 6, .. }));
        assert_eq!(scan.exit_status(), 65);
        assert!(out.is_empty());
    }

    #[test]
    fn explicit_year_is_used() {
        let dir = TempDir::new().unwrap();
        let lines = vec![
            "Feb 29 23:59:00 h sshd[1]: Failed password for root from 10.0.0.1 port 1 ssh2".to_string(),
            "Mar  1 00:01:00 h sshd[1]: Failed password for root from 10.0.0.1 port 1 ssh2".to_string(),
        ];
        let path = write_log(&dir, &lines);
        assert!(render(&path, &["--year", "2024", "--fails", "2"]).unwrap().contains("2 failed logins"));
        let err = render(&path, &["--year", "2023"]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<error::ScanError>(),
            Some(error::ScanError::InvalidTimestamp { line: 1, .. })
        ));
    }

    #[test]
    fn missing_file_maps_to_noinput() {
        let err = render(Path::new("/nonexistent/auth.log"), &[]).unwrap_err();
        let scan = err.downcast_ref::<error::ScanError>().unwrap();
        assert_eq!(scan.exit_status(), 66);
        let message = format!("{err:#}");
        assert!(message.starts_with("cannot read /nonexistent/auth.log: "));
        assert_eq!(message.matches("os error").count(), 1, "{message}");
    }

    #[test]
    fn max_count_mode() {
        let dir = TempDir::new().unwrap();
        let mut lines: Vec<_> = (0..6).map(|s| failure("10.0.0.9", 0, s)).collect();
        lines.extend((0..3).map(|s| failure("10.0.0.9", 30, s)));
        let path = write_log(&dir, &lines);
        assert!(render(&path, &["--fails", "3"]).unwrap().contains("3 failed logins"));
        assert!(
            render(&path, &["--fails", "3", "--count", "max"])
                .unwrap()
                .contains("6 failed logins")
        );
    }
}
