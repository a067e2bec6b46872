use clap::{App, Arg, ArgMatches};

use super::kubeapi::HpaTarget;
use super::schedule::{parse_clock, parse_timezone, Schedule};
use super::{ErrorKind, Result};

/// Command line interface
///
/// Every setting can also come from the environment variable named in its help,
/// which is how the scaler is normally configured when run as a CronJob.
pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("hpa-time-scaler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Raise or lower a HorizontalPodAutoscaler floor by time of day")
        .arg(Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .help("Increase verbosity"))
        .arg(Arg::with_name("debug")
            .short("d")
            .long("debug")
            .help("Adds line numbers to log statements"))
        .arg(Arg::with_name("scale-up-time")
            .long("scale-up-time")
            .env("SCALE_UP_TIME")
            .default_value("05:00")
            .help("Time of day (HH:MM) the scale up window starts"))
        .arg(Arg::with_name("scale-down-time")
            .long("scale-down-time")
            .env("SCALE_DOWN_TIME")
            .default_value("18:00")
            .help("Time of day (HH:MM) the scale down window starts"))
        .arg(Arg::with_name("timezone")
            .long("timezone")
            .env("TIMEZONE")
            .default_value("UTC")
            .help("IANA timezone the times are read in"))
        .arg(Arg::with_name("scale-up-replicas")
            .long("scale-up-replicas")
            .env("SCALE_UP_REPLICAS")
            .default_value("2")
            .help("minReplicas during the scale up window"))
        .arg(Arg::with_name("scale-down-replicas")
            .long("scale-down-replicas")
            .env("SCALE_DOWN_REPLICAS")
            .default_value("1")
            .help("minReplicas outside the scale up window"))
        .arg(Arg::with_name("hpa-name")
            .long("hpa-name")
            .env("HPA_NAME")
            .takes_value(true)
            .help("Name of the HorizontalPodAutoscaler (required)"))
        .arg(Arg::with_name("namespace")
            .short("n")
            .long("namespace")
            .env("NAMESPACE")
            .takes_value(true)
            .help("Namespace of the HorizontalPodAutoscaler (required)"))
        .arg(Arg::with_name("local-run")
            .long("local-run")
            .env("LOCAL_RUN")
            .default_value("false")
            .help("Use local kubeconfig credentials rather than the in-cluster service account"))
        .arg(Arg::with_name("dry-run")
            .long("dry-run")
            .env("DRY_RUN")
            .default_value("false")
            .help("Show the change only"))
}

/// Settings for one invocation
///
/// Built and validated once at startup, then only borrowed.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub schedule: Schedule,
    pub target: HpaTarget,
    /// Use kubeconfig rather than in-cluster credentials
    pub local: bool,
    pub dry_run: bool,
}

impl Config {
    pub fn from_matches(args: &ArgMatches<'_>) -> Result<Config> {
        let value = |key: &str| args.value_of(key).unwrap_or_default();
        let schedule = Schedule {
            timezone: parse_timezone(value("timezone"))?,
            scale_up_time: parse_clock("scale-up-time", value("scale-up-time"))?,
            scale_down_time: parse_clock("scale-down-time", value("scale-down-time"))?,
            scale_up_replicas: parse_replicas("scale-up-replicas", value("scale-up-replicas"))?,
            scale_down_replicas: parse_replicas("scale-down-replicas", value("scale-down-replicas"))?,
        };
        let target = HpaTarget {
            name: required("hpa-name", "HPA_NAME", value("hpa-name"))?,
            namespace: required("namespace", "NAMESPACE", value("namespace"))?,
        };
        Ok(Config {
            schedule,
            target,
            local: parse_flag("local-run", value("local-run"))?,
            dry_run: parse_flag("dry-run", value("dry-run"))?,
        })
    }
}

fn required(key: &str, evar: &str, value: &str) -> Result<String> {
    if value.trim().is_empty() {
        bail!(ErrorKind::InvalidConfig(key.into(), format!("required (--{} or {})", key, evar)));
    }
    Ok(value.into())
}

fn parse_replicas(key: &str, value: &str) -> Result<i32> {
    let n = value
        .parse::<i32>()
        .map_err(|e| ErrorKind::InvalidConfig(key.into(), format!("'{}': {}", value, e)))?;
    if n < 0 {
        bail!(ErrorKind::InvalidConfig(key.into(), format!("'{}' is negative", value)));
    }
    Ok(n)
}

// Accepts the usual spellings of a boolean environment variable; unset means false
fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "" | "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => bail!(ErrorKind::InvalidConfig(key.into(), format!("'{}' is not a boolean", value))),
    }
}

#[cfg(test)]
mod tests {
    use super::{app, Config};
    use crate::{ErrorKind, Result};

    // explicit flags always win over the environment, so every test sets what it checks
    fn parse_raw(flags: &[&str]) -> Result<Config> {
        let mut argv = vec!["hpa-time-scaler"];
        argv.extend_from_slice(flags);
        let args = app().get_matches_from_safe(argv).unwrap();
        Config::from_matches(&args)
    }
    fn parse(extra: &[&str]) -> Result<Config> {
        let mut flags = vec!["--hpa-name", "web", "--namespace", "shop"];
        flags.extend_from_slice(extra);
        parse_raw(&flags)
    }

    #[test]
    fn explicit_values() {
        let cfg = parse(&[
            "--scale-up-time", "07:30",
            "--scale-down-time", "19:15",
            "--timezone", "Europe/Oslo",
            "--scale-up-replicas", "6",
            "--scale-down-replicas", "0",
            "--local-run", "true",
            "--dry-run", "0",
        ]).unwrap();
        assert_eq!(cfg.target.name, "web");
        assert_eq!(cfg.target.namespace, "shop");
        assert_eq!(cfg.schedule.scale_up_time.to_string(), "07:30:00");
        assert_eq!(cfg.schedule.scale_down_time.to_string(), "19:15:00");
        assert_eq!(cfg.schedule.timezone, chrono_tz::Europe::Oslo);
        assert_eq!(cfg.schedule.scale_up_replicas, 6);
        assert_eq!(cfg.schedule.scale_down_replicas, 0);
        assert!(cfg.local);
        assert!(!cfg.dry_run);
    }

    #[test]
    fn bad_timezone() {
        let err = parse(&["--timezone", "Narnia/Cair_Paravel"]).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn bad_times() {
        let err = parse(&["--scale-down-time", "6pm"]).unwrap_err();
        match err.kind() {
            ErrorKind::InvalidTime(key, value) => {
                assert_eq!(key, "scale-down-time");
                assert_eq!(value, "6pm");
            }
            k => panic!("unexpected error {:?}", k),
        }
    }

    #[test]
    fn bad_replicas() {
        assert!(parse(&["--scale-up-replicas=-1"]).unwrap_err().is_config());
        assert!(parse(&["--scale-down-replicas", "two"]).unwrap_err().is_config());
    }

    #[test]
    fn bad_flag() {
        assert!(parse(&["--local-run", "yes please"]).unwrap_err().is_config());
    }

    #[test]
    fn empty_identity_is_rejected() {
        let err = parse_raw(&["--hpa-name", "", "--namespace", "shop"]).unwrap_err();
        match err.kind() {
            ErrorKind::InvalidConfig(key, _) => assert_eq!(key, "hpa-name"),
            k => panic!("unexpected error {:?}", k),
        }
    }
}
