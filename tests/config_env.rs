use clap::Parser;
use serial_test::serial;
use supercache::config::{self, CliArgs};

const DURATION_KEY: &str = "SUPERCACHE__CACHE__DURATION_SECONDS";
const SECTIONS_KEY: &str = "SUPERCACHE__SITE__SECTIONS";

fn clear_env() {
    // SAFETY: the tests in this file run serially and no other threads read the environment.
    unsafe {
        std::env::remove_var(DURATION_KEY);
        std::env::remove_var(SECTIONS_KEY);
    }
}

#[test]
#[serial]
fn environment_overrides_file_defaults() {
    clear_env();
    // SAFETY: see `clear_env`.
    unsafe {
        std::env::set_var(DURATION_KEY, "120");
        std::env::set_var(SECTIONS_KEY, "home,forum");
    }

    let settings = config::load(&CliArgs::parse_from(["supercache"]));
    clear_env();

    let settings = settings.expect("environment settings should load");
    assert_eq!(settings.cache.duration_seconds, 120);
    assert_eq!(settings.site.sections, vec!["home", "forum"]);
}

#[test]
#[serial]
fn cli_flags_beat_environment() {
    clear_env();
    // SAFETY: see `clear_env`.
    unsafe {
        std::env::set_var(DURATION_KEY, "120");
    }

    let settings = config::load(&CliArgs::parse_from([
        "supercache",
        "serve",
        "--cache-duration-seconds",
        "45",
    ]));
    clear_env();

    let settings = settings.expect("settings should load");
    assert_eq!(settings.cache.duration_seconds, 45);
}

#[test]
#[serial]
fn invalid_environment_value_is_rejected() {
    clear_env();
    // SAFETY: see `clear_env`.
    unsafe {
        std::env::set_var(DURATION_KEY, "0");
    }

    let result = config::load(&CliArgs::parse_from(["supercache"]));
    clear_env();

    assert!(result.is_err());
}
