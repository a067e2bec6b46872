#![recursion_limit = "1024"]
#![allow(renamed_and_removed_lints)]
#![allow(deprecated)]

#[macro_use]
extern crate log;

#[macro_use]
extern crate error_chain;
error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    links {}
    foreign_links {
        SerdeJ(serde_json::Error);
    }
    errors {
        InvalidConfig(key: String, reason: String) {
            description("invalid configuration")
            display("invalid configuration for {}: {}", key, reason)
        }
        InvalidTimezone(tz: String) {
            description("unknown timezone")
            display("unknown timezone '{}'", tz)
        }
        InvalidTime(key: String, value: String) {
            description("invalid time of day")
            display("{} '{}' is not a 24-hour HH:MM time", key, value)
        }
        KubeConfig(reason: String) {
            description("cluster credentials unavailable")
            display("failed to establish cluster credentials: {}", reason)
        }
        MissingHpa(ns: String, name: String) {
            description("horizontalpodautoscaler not found")
            display("HorizontalPodAutoscaler {}/{} not found", ns, name)
        }
        KubeError(e: kube::Error) {
            description("kube api failure")
            display("kube api failure: {}", e)
        }
    }
}

impl Error {
    /// Whether this error stems from configuration rather than the cluster
    pub fn is_config(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidConfig(..) | ErrorKind::InvalidTimezone(_) | ErrorKind::InvalidTime(..)
        )
    }
}

/// Validated invocation settings
pub mod config;
pub use config::Config;

/// Time window evaluation
pub mod schedule;
pub use schedule::{decide_target_replicas, Evaluation, Schedule, Window};

/// A small kubernetes interface for the autoscaler floor
pub mod kubeapi;
pub use kubeapi::{reconcile, AutoscalerApi, DryRun, HpaKube, HpaTarget, ScaleEvent, ScaleState};

/// Name used as field manager, reporting controller and event prefix
pub const MANAGER: &str = "hpa-time-scaler";

use chrono::{DateTime, Utc};

/// Evaluate the schedule at `now` and apply the resulting floor
///
/// Returns whether the autoscaler was changed.
pub async fn run_once<A: AutoscalerApi>(api: &A, cfg: &Config, now: DateTime<Utc>) -> Result<bool> {
    let schedule = &cfg.schedule;
    let eval = schedule.evaluate(now);
    info!("Timezone: {}", schedule.timezone);
    info!("Current time: {}", eval.now);
    info!("Current schedule: {} - {}", eval.scale_up_at, eval.scale_down_at);

    let window = eval.window();
    let desired = schedule.replicas_for(window);
    info!("Inside {} window, want min replicas {} on {}", window, desired, cfg.target);
    reconcile(api, &cfg.target, desired).await
}
