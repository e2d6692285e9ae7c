use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_both_roles() {
    Command::cargo_bin("hookwire")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("helper").and(predicate::str::contains("selftest")),
        );
}

#[test]
fn test_selftest_round_trips_through_a_real_helper() {
    Command::cargo_bin("hookwire")
        .unwrap()
        .args(["selftest", "--timeout-ms", "2000"])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success()
        .stdout(
            predicate::str::contains("ping round trip")
                .and(predicate::str::contains("events answered: 10/10")),
        );
}

#[test]
fn test_unknown_subcommand_fails() {
    Command::cargo_bin("hookwire")
        .unwrap()
        .arg("monitor")
        .assert()
        .failure();
}
