use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::process::Command;

const FAULT_ENV: &str = "STEPCTL_TEST_SIM_FAULT";

#[rstest]
#[case("absent", &["self-check"], 4, "encoder was not detected")]
#[case("encoder", &["self-check"], 4, "encoder was not detected")]
#[case("encoder", &["run", "--duration-ms", "50"], 5, "did not answer")]
#[case("driver", &["run", "--duration-ms", "50"], 6, "Hardware fault")]
#[case("parity", &["self-check"], 6, "encoder status 0x04")]
#[case("bogus", &["self-check"], 1, "unknown STEPCTL_TEST_SIM_FAULT value")]
fn injected_faults_bubble_to_cli(
    #[case] fault: &str,
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
) {
    Command::cargo_bin("stepctl")
        .unwrap()
        .env(FAULT_ENV, fault)
        .args(args)
        .assert()
        .code(exit_code)
        .stderr(predicate::str::contains(needle));
}

#[rstest]
fn parity_errors_are_counted_not_fatal_during_run() {
    // Without the health gate the tick keeps using flagged samples.
    Command::cargo_bin("stepctl")
        .unwrap()
        .env(FAULT_ENV, "parity")
        .args(["run", "--duration-ms", "50", "--move-steps", "200"])
        .assert()
        .success()
        .stdout(predicate::str::contains("run complete"));
}
