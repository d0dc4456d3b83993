//! Hand-rolled CLI argument parsing, in the style of the reference agent's
//! own `--flag value` parser (no derive-macro CLI framework): flag parsing
//! itself is out of core scope, so this stays a thin, direct translation of
//! `std::env::args()` into a typed command.

use anyhow::Context;

pub enum Command {
    RunTests(RunTestsArgs),
    TestRunExecution { id: i64, log: bool },
    TestRunnerStatus,
    AbortTesting,
}

pub struct RunTestsArgs {
    pub tests_list: Vec<String>,
    pub title: Option<String>,
    pub config: Option<String>,
    pub pics_config_folder: Option<String>,
    pub project_id: Option<i64>,
    pub no_color: bool,
}

pub fn parse_args() -> anyhow::Result<Command> {
    let args: Vec<String> = std::env::args().collect();
    let subcommand = args.get(1).context("missing subcommand")?.as_str();

    match subcommand {
        "run-tests" => Ok(Command::RunTests(parse_run_tests(&args[2..])?)),
        "test-run-execution" => {
            let mut id = None;
            let mut log = false;
            let mut i = 0;
            while i < args[2..].len() {
                match args[2..][i].as_str() {
                    "--id" => {
                        i += 1;
                        id = Some(
                            args[2..]
                                .get(i)
                                .context("missing --id value")?
                                .parse()
                                .context("invalid --id value")?,
                        );
                    }
                    "--log" => log = true,
                    other => anyhow::bail!("unknown argument: {other}"),
                }
                i += 1;
            }
            Ok(Command::TestRunExecution {
                id: id.context("--id is required")?,
                log,
            })
        }
        "test-runner-status" => Ok(Command::TestRunnerStatus),
        "abort-testing" => Ok(Command::AbortTesting),
        other => anyhow::bail!("unknown subcommand: {other}"),
    }
}

fn parse_run_tests(args: &[String]) -> anyhow::Result<RunTestsArgs> {
    let mut tests_list = None;
    let mut title = None;
    let mut config = None;
    let mut pics_config_folder = None;
    let mut project_id = None;
    let mut no_color = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--tests-list" => {
                i += 1;
                let raw = args.get(i).context("missing --tests-list value")?;
                tests_list = Some(normalize_test_ids(raw));
            }
            "--title" => {
                i += 1;
                title = Some(args.get(i).context("missing --title value")?.clone());
            }
            "--config" => {
                i += 1;
                config = Some(args.get(i).context("missing --config value")?.clone());
            }
            "--pics-config-folder" => {
                i += 1;
                pics_config_folder = Some(args.get(i).context("missing --pics-config-folder value")?.clone());
            }
            "--project-id" => {
                i += 1;
                project_id = Some(
                    args.get(i)
                        .context("missing --project-id value")?
                        .parse()
                        .context("invalid --project-id value")?,
                );
            }
            "--no-color" => no_color = true,
            other => anyhow::bail!("unknown argument: {other}"),
        }
        i += 1;
    }

    Ok(RunTestsArgs {
        tests_list: tests_list.context("--tests-list is required")?,
        title,
        config,
        pics_config_folder,
        project_id,
        no_color,
    })
}

/// Split a comma-separated test id list, trimming whitespace and
/// normalizing case and separator punctuation (`-`/`.` -> `_`) so
/// `TC-WEBRTC-1.6`, `tc_webrtc_1_6`, and `TC_WEBRTC_1_6` all resolve to the
/// same canonical id.
fn normalize_test_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_uppercase().replace(['-', '.'], "_"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_test_ids_unifies_separators_and_case() {
        let ids = normalize_test_ids("tc-webrtc-1.6, TC_WEBRTC_1_7 ,tc.webrtc.1.8");
        assert_eq!(ids, vec!["TC_WEBRTC_1_6", "TC_WEBRTC_1_7", "TC_WEBRTC_1_8"]);
    }

    #[test]
    fn normalize_test_ids_drops_empty_entries() {
        let ids = normalize_test_ids("TC_A,,TC_B,");
        assert_eq!(ids, vec!["TC_A", "TC_B"]);
    }
}
